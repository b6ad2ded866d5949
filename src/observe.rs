use std::time::Duration;

use crate::error::Error;
use crate::types::ExchangeState;

pub(crate) fn record_ok(
    mode: &'static str,
    method: &'static str,
    identifier: &str,
    elapsed: Duration,
    status_code: Option<u16>,
) {
    let _ = (mode, method, identifier, elapsed, status_code);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!(
            "wsman_requests_total",
            "mode" => mode,
            "method" => method,
            "outcome" => "ok"
        )
        .increment(1);
        metrics::histogram!("wsman_request_seconds", "mode" => mode, "method" => method)
            .record(elapsed.as_secs_f64());
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(
            mode,
            method,
            identifier,
            status_code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "wsman request ok"
        );
    }
}

pub(crate) fn record_err(
    mode: &'static str,
    method: &'static str,
    identifier: &str,
    elapsed: Duration,
    err: &Error,
) {
    let _ = (mode, method, identifier, elapsed, err);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!(
            "wsman_requests_total",
            "mode" => mode,
            "method" => method,
            "outcome" => "err"
        )
        .increment(1);
        metrics::counter!(
            "wsman_request_errors_total",
            "mode" => mode,
            "kind" => error_kind(err)
        )
        .increment(1);
        metrics::histogram!("wsman_request_seconds", "mode" => mode, "method" => method)
            .record(elapsed.as_secs_f64());
    }

    #[cfg(feature = "tracing")]
    {
        tracing::warn!(
            mode,
            method,
            identifier,
            error = %err,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "wsman request failed"
        );
    }
}

pub(crate) fn record_auth_retry(mode: &'static str, stale: bool) {
    let _ = (mode, stale);

    #[cfg(feature = "metrics")]
    metrics::counter!("wsman_auth_retries_total", "mode" => mode).increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(mode, stale, "digest challenge received, resending");
}

pub(crate) fn record_transition(class: &str, member: &str, state: ExchangeState) {
    let _ = (class, member, state);

    #[cfg(feature = "tracing")]
    tracing::trace!(class, member, state = state.as_str(), "exchange state");
}

#[cfg(feature = "metrics")]
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Io(_) => "io",
        Error::Timeout => "timeout",
        Error::Protocol(_) | Error::ProtocolOwned(_) => "protocol",
        Error::InvalidRequest(_) => "invalid_request",
        Error::UnsupportedMethod(_) => "unsupported_method",
        Error::AuthenticationFailed(_) => "authentication",
        Error::IncompleteBody => "incomplete_body",
        Error::MalformedEnvelope(_) => "malformed_envelope",
        Error::UnsupportedGuidInput(_) => "unsupported_guid_input",
        Error::InvalidArgument(_) => "invalid_argument",
    }
}
