#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A WS-Management client for Intel AMT controllers.
//!
//! The crate implements:
//! - HTTP digest authentication (RFC 2617, `qop=auth`) with a single
//!   challenge-driven retry
//! - Chunked transfer decoding
//! - SOAP envelope parsing into a `serde_json::Value` tree
//! - Precursor orchestration: `Pull` enumerates first, `Put` reads the
//!   current instance first
//! - Canonicalisation of the binary GUID returned by `GetUuid`
//!
//! [`Client`] (blocking) and [`AsyncClient`] (tokio, feature `async`) accept
//! a [`Request`] naming a managed class such as `AMT_GeneralSettings` and a
//! method, and return the completed [`Exchange`].

mod client;
mod crypto;
mod debug;
mod envelope;
mod error;
mod messages;
mod observe;
mod protocol;
pub mod registry;
mod session;
mod transport;
mod types;

pub use crate::client::core::decompose;
#[cfg(feature = "async")]
pub use crate::client::{AsyncClient, AsyncClientBuilder};
#[cfg(feature = "blocking")]
pub use crate::client::{Client, ClientBuilder};
pub use crate::envelope::{Envelope, ResponseKind, coerce_value, parse_envelope};
pub use crate::error::{Error, Result};
pub use crate::messages::{
    Action, AdminCredential, AlarmTemplate, MessageBuilder, Messages, parse_start_time,
};
pub use crate::protocol::{CHUNKED_TERMINATOR, HttpResponse, decode_chunked, decode_guid};
pub use crate::session::{AuthSession, Challenge, DigestAuth, HttpDigest};
#[cfg(feature = "async")]
pub use crate::transport::AsyncTransport;
#[cfg(feature = "blocking")]
pub use crate::transport::Transport;
#[cfg(feature = "blocking")]
pub use crate::transport::blocking::TcpTransport;
#[cfg(feature = "async")]
pub use crate::transport::tokio::TcpTransport as AsyncTcpTransport;
pub use crate::types::{Exchange, ExchangeState, Method, Namespace, Request, Target};
