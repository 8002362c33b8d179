//! irccloud-osd Core - Shared domain types for the IRCCloud notifier
//!
//! This crate provides the session model the stream handler maintains
//! (servers, buffers, backlog phase) and the notification decision that
//! runs against it.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod buffer;
pub mod message;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use buffer::{BufferId, BufferInfo, BufferKind};
pub use message::IncomingMessage;
pub use server::{ConnectionId, ServerInfo};
pub use session::{Decision, Notification, SessionState, Suppressed};
