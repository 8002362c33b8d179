//! The transfer seam.

use std::time::Duration;

use crate::SocketSets;

/// Consumer of the bytes a transfer produces.
pub trait Receiver {
    type Error;

    /// Accepts one chunk of body bytes, in stream order.
    ///
    /// An error aborts the transfer and is handed back to whoever stepped it.
    fn on_receive(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;
}

/// Whether a transfer still has work to do after a `perform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Finished,
}

/// A network transfer that can be advanced without blocking.
///
/// Implementations do as much work as their sockets allow on each
/// `perform` and report which descriptors they need watched before the next
/// one. Failures are the transfer's own business: they end the transfer
/// (`Progress::Finished`, empty socket sets) rather than erroring out of
/// `perform`, which only propagates the receiver's errors.
pub trait Transfer {
    /// Advances the transfer as far as possible without blocking.
    ///
    /// May call `receiver.on_receive` any number of times.
    fn perform<R: Receiver>(&mut self, receiver: &mut R) -> Result<Progress, R::Error>;

    /// Descriptors to watch before the next `perform`.
    fn fdset(&self) -> SocketSets;

    /// How long the loop may sleep before `perform` must run again even
    /// without socket readiness. `None` means only readiness matters.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}
