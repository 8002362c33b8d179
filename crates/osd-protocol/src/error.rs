//! Wire decoding errors.

use thiserror::Error;

/// A stream record could not be decoded.
///
/// Any of these means the stream can no longer be trusted; callers treat
/// them as fatal rather than skipping the record.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The record is not valid JSON (or not valid UTF-8).
    #[error("malformed JSON record: {0}")]
    Json(#[from] serde_json::Error),

    /// The record is valid JSON but not an object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// A known event type is missing a required field or has the wrong shape.
    #[error("invalid {kind} event: {source}")]
    InvalidEvent {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
