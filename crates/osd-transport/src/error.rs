//! Transport error types.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// HTTP Errors
// ============================================================================

/// Errors in the HTTP layer: URLs, response heads and body framing.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The status line or a header line could not be parsed.
    #[error("malformed response head: {0}")]
    Head(#[from] httparse::Error),

    /// The head parsed but a field in it is unusable.
    #[error("malformed response head: {0}")]
    MalformedHead(String),

    #[error("response head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// Non-2xx response.
    #[error("server returned HTTP {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed chunked body: {0}")]
    Chunked(String),
}

// ============================================================================
// Transfer Errors
// ============================================================================

/// Why a transfer ended unsuccessfully.
///
/// These are recorded by the transfer itself and reported through its
/// outcome; the multiplexer never interprets them.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddress(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("invalid TLS server name: {0}")]
    ServerName(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] HttpError),

    /// The peer closed the connection before the body was complete.
    #[error("connection closed before the response was complete")]
    UnexpectedEof,

    /// The receiver rejected the data and the transfer was torn down.
    #[error("transfer aborted by receiver")]
    Aborted,
}

impl TransferError {
    /// Whether the transfer ended because the server answered with an error status.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http(HttpError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = HttpError::Status {
            status: 401,
            reason: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "server returned HTTP 401 Unauthorized");
    }

    #[test]
    fn test_http_status_accessor() {
        let err: TransferError = HttpError::Status {
            status: 503,
            reason: String::new(),
        }
        .into();
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(TransferError::UnexpectedEof.http_status(), None);
    }

    #[test]
    fn test_head_error_from_conversion() {
        let err: TransferError = HttpError::from(httparse::Error::Status).into();
        assert!(matches!(err, TransferError::Http(HttpError::Head(_))));
        assert!(err.to_string().starts_with("malformed response head"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let err: TransferError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, TransferError::Io(_)));
        assert!(err.to_string().contains("reset"));
    }
}
