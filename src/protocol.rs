use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::crypto::to_hex;
use crate::error::{Error, Result};

/// Terminal zero-size chunk of a chunked body with no trailers.
pub const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

const CRLF: &[u8] = b"\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// An HTTP response as returned by a [`crate::Transport`].
///
/// `body` holds the bytes after the header block exactly as received, still
/// chunk-framed when the response uses chunked transfer encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Assemble a response from its parts.
    pub fn new(status_code: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status_code,
            headers,
            body,
        }
    }

    /// First header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// All header values named `name` (case-insensitive).
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the body is chunk-framed.
    pub fn is_chunked(&self) -> bool {
        is_chunked(&self.headers)
    }

    /// Whether the server asked for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Status line and header block of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
}

/// How the end of a response body is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Chunked,
    Length(usize),
    UntilClose,
}

impl ResponseHead {
    pub(crate) fn framing(&self) -> Result<BodyFraming> {
        if (100..200).contains(&self.status_code)
            || self.status_code == 204
            || self.status_code == 304
        {
            return Ok(BodyFraming::Length(0));
        }
        if is_chunked(&self.headers) {
            return Ok(BodyFraming::Chunked);
        }
        match find_header(&self.headers, "content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map(BodyFraming::Length)
                .map_err(|_| Error::Protocol("invalid Content-Length header")),
            None => Ok(BodyFraming::UntilClose),
        }
    }

    pub(crate) fn into_response(self, body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status_code: self.status_code,
            headers: self.headers,
            body,
        }
    }
}

/// Parse the status line and headers once the whole head is buffered.
///
/// Returns the head and the offset of the first body byte, or `None` when the
/// blank line ending the head has not arrived yet.
pub(crate) fn parse_response_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>> {
    let Some(end) = find(buf, HEAD_END) else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::Protocol("response head is not valid UTF-8"))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().ok_or(Error::Protocol("missing status line"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::protocol_owned(format!(
            "unexpected status line: {status_line}"
        )));
    }
    let status_code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(Error::Protocol("invalid status code"))?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(Error::Protocol("malformed header line"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Some((
        ResponseHead {
            status_code,
            headers,
        },
        end + HEAD_END.len(),
    )))
}

/// Whether `body` holds everything `framing` promises.
pub(crate) fn body_complete(framing: BodyFraming, body: &[u8]) -> Result<bool> {
    match framing {
        BodyFraming::Chunked => Ok(decode_chunked(body)?.is_some()),
        BodyFraming::Length(len) => Ok(body.len() >= len),
        BodyFraming::UntilClose => Ok(false),
    }
}

/// Reassemble a chunked-transfer body.
///
/// Returns `Ok(None)` while the body is not complete: the next size line, the
/// declared chunk data, or the terminal zero-size chunk has not been received
/// yet. Callers treat that as "read more", not as a failure.
pub fn decode_chunked(body: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;

    loop {
        let Some(line_end) = find(rest, CRLF) else {
            return Ok(None);
        };
        let size = parse_chunk_size(&rest[..line_end])?;
        rest = &rest[line_end + CRLF.len()..];

        if size == 0 {
            // Optional trailer fields, then the empty line.
            let complete = rest.starts_with(CRLF) || find(rest, HEAD_END).is_some();
            return Ok(complete.then_some(out));
        }

        let Some(data_end) = size.checked_add(CRLF.len()) else {
            return Ok(None);
        };
        if rest.len() < data_end {
            return Ok(None);
        }
        if &rest[size..data_end] != CRLF {
            return Err(Error::Protocol("chunk data not followed by CRLF"));
        }

        out.extend_from_slice(&rest[..size]);
        rest = &rest[data_end..];
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = std::str::from_utf8(line).map_err(|_| Error::Protocol("invalid chunk size"))?;
    let digits = line.split(';').next().unwrap_or_default().trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::protocol_owned(format!("invalid chunk size: {line:?}")));
    }
    // Too large for usize: it cannot be in the buffer yet.
    Ok(usize::from_str_radix(digits, 16).unwrap_or(usize::MAX))
}

/// Convert a base64-encoded 16-byte mixed-endian GUID into dashed text.
///
/// The first three fields are little-endian, the clock sequence is big-endian
/// and the node bytes are emitted in wire order, e.g.
/// `AAECAwQFBgcICQoLDA0ODw==` becomes `03020100-0504-0706-0809-0a0b0c0d0e0f`.
pub fn decode_guid(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::UnsupportedGuidInput(format!("invalid base64: {e}")))?;
    let bytes: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
        Error::UnsupportedGuidInput(format!("expected 16 bytes, got {}", bytes.len()))
    })?;

    let time_low = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let time_mid = u16::from_le_bytes([bytes[4], bytes[5]]);
    let time_hi = u16::from_le_bytes([bytes[6], bytes[7]]);
    let clock_seq = u16::from_be_bytes([bytes[8], bytes[9]]);
    let node = to_hex(&bytes[10..16]);

    Ok(format!(
        "{time_low:08x}-{time_mid:04x}-{time_hi:04x}-{clock_seq:04x}-{node}"
    ))
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    find_header(headers, "transfer-encoding").is_some_and(|v| {
        v.split(',')
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    })
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
