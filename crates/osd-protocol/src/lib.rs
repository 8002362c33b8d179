//! irccloud-osd Protocol - IRCCloud stream wire format
//!
//! This crate turns the bytes of the `/chat/stream` response body into
//! typed events:
//! - `line` - reassembly of newline-delimited records from arbitrary chunks
//! - `event` - decoding one record into a `StreamEvent`
//! - `auth` - the `/chat/login` response body

pub mod auth;
pub mod error;
pub mod event;
pub mod line;

pub use auth::LoginResponse;
pub use error::ProtocolError;
pub use event::{decode_event, MessageRecord, RawBuffer, RawMessage, RawServer, StreamEvent};
pub use line::{LineAssembler, Lines};
