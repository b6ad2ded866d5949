pub(crate) fn enabled() -> bool {
    std::env::var("WSMAN_DEBUG")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Dump an HTTP message when `WSMAN_DEBUG` is set.
///
/// Authorization headers are masked; everything else is printed as sent or
/// received.
pub(crate) fn dump_text(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(label.len() + text.len() + 16);
    out.push_str(label);
    out.push_str(" (");
    out.push_str(&bytes.len().to_string());
    out.push_str("):\n");
    for line in text.split_inclusive('\n') {
        if line
            .get(..14)
            .is_some_and(|name| name.eq_ignore_ascii_case("authorization:"))
        {
            out.push_str("Authorization: <redacted>\r\n");
        } else {
            out.push_str(line);
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("{out}");

    #[cfg(not(feature = "tracing"))]
    eprintln!("{out}");
}
