use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out.
    #[error("timeout waiting for response")]
    Timeout,

    /// Peer responded with an unexpected or invalid HTTP message.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer responded with an unexpected or invalid HTTP message.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// The request identifier or method is missing or malformed.
    ///
    /// The client records this on [`crate::Exchange::errors`] instead of returning it;
    /// it is surfaced directly only by [`crate::decompose`].
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The method name is not one the dispatcher knows how to satisfy.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The controller rejected the refreshed digest credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// A chunked body ended before its terminal chunk.
    #[error("incomplete chunked body")]
    IncompleteBody,

    /// The response XML is malformed or lacks an expected element.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A binary GUID did not decode to exactly 16 bytes.
    #[error("unsupported GUID input: {0}")]
    UnsupportedGuidInput(String),

    /// Invalid caller-supplied argument (user input, configuration).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
