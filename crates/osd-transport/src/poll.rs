//! A single-threaded event loop over `poll(2)`.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::trace;

use crate::{Interest, Reactor, WatchId};

#[derive(Debug, Clone, Copy)]
struct Watch {
    fd: RawFd,
    interest: Interest,
}

impl Interest {
    fn poll_flags(self) -> PollFlags {
        match self {
            Self::Read => PollFlags::POLLIN,
            Self::Write => PollFlags::POLLOUT,
            Self::Error => PollFlags::POLLPRI,
        }
    }

    /// Whether `revents` should wake a watch with this interest.
    ///
    /// Error and hang-up conditions wake every interest: the owner finds out
    /// what happened when it next touches the descriptor.
    fn fired_by(self, revents: PollFlags) -> bool {
        let failure = PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;
        revents.intersects(self.poll_flags() | failure)
    }
}

/// `Reactor` backed by `poll(2)`.
///
/// Watches are one-shot: [`PollLoop::wait`] removes every watch it reports.
/// The same descriptor may be watched several times with different
/// interests.
#[derive(Debug, Default)]
pub struct PollLoop {
    watches: BTreeMap<WatchId, Watch>,
    next_id: u64,
}

impl PollLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered watches.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Sleeps until at least one watch is ready or `timeout` elapses.
    ///
    /// Returns the watches that fired, already unregistered. An empty result
    /// means the timeout elapsed or a signal interrupted the wait.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - no watches and no timeout (the wait would never end)
    /// * any other error `poll(2)` reports
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<WatchId>> {
        if self.watches.is_empty() && timeout.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no watches registered and no timeout",
            ));
        }

        let entries: Vec<(WatchId, Watch)> = self.watches.iter().map(|(&id, &w)| (id, w)).collect();

        let mut fds: Vec<PollFd<'_>> = entries
            .iter()
            .map(|(_, watch)| {
                // SAFETY: watched descriptors belong to live sockets and pipes;
                // their owners withdraw the watch before closing them.
                let fd = unsafe { BorrowedFd::borrow_raw(watch.fd) };
                PollFd::new(fd, watch.interest.poll_flags())
            })
            .collect();

        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => {
                trace!("Poll timed out");
                return Ok(Vec::new());
            }
            Ok(_) => {}
            Err(Errno::EINTR) => {
                trace!("Poll interrupted");
                return Ok(Vec::new());
            }
            Err(errno) => return Err(errno.into()),
        }

        let fired: Vec<WatchId> = entries
            .iter()
            .zip(fds.iter())
            .filter_map(|((id, watch), pfd)| {
                let revents = pfd.revents()?;
                watch.interest.fired_by(revents).then_some(*id)
            })
            .collect();

        for id in &fired {
            self.watches.remove(id);
        }

        trace!(fired = fired.len(), remaining = self.watches.len(), "Poll returned");
        Ok(fired)
    }
}

impl Reactor for PollLoop {
    fn add_watch(&mut self, fd: RawFd, interest: Interest) -> WatchId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = WatchId::new(self.next_id);
        self.watches.insert(id, Watch { fd, interest });
        id
    }

    fn remove_watch(&mut self, id: WatchId) -> bool {
        self.watches.remove(&id).is_some()
    }
}

/// Converts to whole milliseconds, rounding up so short timers do not spin.
fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(duration) => {
            let millis = duration.as_micros().div_ceil(1000);
            let millis = u16::try_from(millis).unwrap_or(u16::MAX);
            PollTimeout::from(millis)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
