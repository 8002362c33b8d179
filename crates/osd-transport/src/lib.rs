//! irccloud-osd Transport - non-blocking streaming transfer and event loop
//!
//! This crate keeps a long-lived HTTP(S) response streaming on a single
//! thread without ever blocking it:
//! - `reactor` - the `Reactor` seam: fd watches by interest
//! - `poll` - `PollLoop`, a `Reactor` backed by `poll(2)`
//! - `transfer` - the `Transfer` and `Receiver` seams
//! - `mux` - `Multiplexer`, which steps a transfer and keeps the loop's
//!   watches equal to the transfer's socket sets
//! - `http` - `HttpStream`, a non-blocking HTTP/1.1 GET over TCP or TLS
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ fired watch ┌──────────────┐ perform ┌──────────────┐
//! │   PollLoop   │────────────▶│  Multiplexer │────────▶│  HttpStream  │
//! │  (poll(2))   │◀────────────│  step()      │◀────────│  fdset()     │
//! └──────────────┘ add/remove  └──────────────┘         └──────┬───────┘
//!                                                             │ body bytes
//!                                                             ▼
//!                                                       ┌──────────────┐
//!                                                       │   Receiver   │
//!                                                       └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`

pub mod error;
pub mod http;
pub mod mux;
pub mod poll;
pub mod reactor;
pub mod tls;
pub mod transfer;

pub use error::{HttpError, TransferError};
pub use http::{HttpStream, StreamOptions};
pub use mux::Multiplexer;
pub use poll::PollLoop;
pub use reactor::{Interest, Reactor, SocketSets, WatchId};
pub use transfer::{Progress, Receiver, Transfer};
