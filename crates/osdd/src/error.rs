//! Error types for the irccloud-osd daemon.
//!
//! Each collaborator has its own error enum; `OsdError` is what the daemon
//! loop and startup hand back to the binary.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::path::PathBuf;

use osd_protocol::ProtocolError;
use osd_transport::TransferError;
use thiserror::Error;

/// Longest prefix of an offending line kept in a decode error.
pub const MAX_LINE_PREVIEW: usize = 200;

// ============================================================================
// Stream Errors
// ============================================================================

/// The stream produced something the handler cannot continue past.
#[derive(Error, Debug)]
pub enum StreamError {
    /// A record failed to decode. The stream is abandoned.
    #[error("could not decode stream record {line:?}: {source}")]
    Decode {
        /// The offending line, truncated to [`MAX_LINE_PREVIEW`] bytes
        line: String,
        #[source]
        source: ProtocolError,
    },
}

impl StreamError {
    pub(crate) fn decode(line: &[u8], source: ProtocolError) -> Self {
        let preview = &line[..line.len().min(MAX_LINE_PREVIEW)];
        Self::Decode {
            line: String::from_utf8_lossy(preview).into_owned(),
            source,
        }
    }
}

// ============================================================================
// Sink Errors
// ============================================================================

/// An alert could not be rendered.
///
/// Sink failures never stop the stream; they are logged and the alert is
/// retried on the next qualifying message.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The notifier command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("notifier pipe error: {0}")]
    Pipe(#[from] io::Error),
}

// ============================================================================
// Login Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("login request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered `success: false`.
    #[error("authentication failure{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Rejected(Option<String>),

    /// The server answered with an error status and no login response.
    #[error("login endpoint returned HTTP {0}")]
    Status(u16),

    #[error("unreadable login response: {0}")]
    Decode(#[from] serde_json::Error),

    /// `success: true` but no usable session token.
    #[error("login succeeded but no session token was returned")]
    NoSession,
}

// ============================================================================
// Config Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A required setting is absent from every layer.
    #[error("missing {0}; pass it on the command line, in the environment, or in the config file")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Daemon Errors
// ============================================================================

/// Why the daemon stopped with a failure.
#[derive(Error, Debug)]
pub enum OsdError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The streaming transfer ended with an error.
    #[error("stream transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("event loop error: {0}")]
    EventLoop(#[source] io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] nix::Error),
}

impl OsdError {
    /// Whether this is an authentication failure at startup.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Login(LoginError::Rejected(_) | LoginError::NoSession)
        )
    }
}

pub type Result<T> = std::result::Result<T, OsdError>;
