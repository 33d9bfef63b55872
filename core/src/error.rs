//! Error types for the request client.
//!
//! # Design
//! `Validation` comes back directly from the builder and `Decode` from
//! `ResponseRecord::json`. Every execution-time fault is stored on the
//! `ResponseRecord` instead, which is why the enum is `Clone` and carries
//! rendered messages rather than the underlying `io::Error` /
//! `rustls::Error` values.

use std::io;
use std::time::Duration;

/// Errors produced while building or executing a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The descriptor could not be built or sent as described: bad URL,
    /// unsupported scheme, a zero timeout or a malformed header field.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The connection could not be established (DNS, refusal, unreachable).
    #[error("connect failed: {0}")]
    Connect(String),

    /// No address answered within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A fault after the socket was open: TLS handshake, write or read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body is not the JSON the caller asked for.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl RequestError {
    /// True when the request never reached the server.
    pub fn is_connect(&self) -> bool {
        matches!(self, RequestError::Connect(_) | RequestError::ConnectTimeout(_))
    }

    pub(crate) fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        RequestError::Transport(format!("{context}: {err}"))
    }
}

impl From<url::ParseError> for RequestError {
    fn from(err: url::ParseError) -> Self {
        RequestError::Validation(format!("malformed url: {err}"))
    }
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        RequestError::Transport(err.to_string())
    }
}
