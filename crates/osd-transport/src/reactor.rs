//! The event-loop seam: readiness watches on file descriptors.

use std::os::fd::RawFd;

/// What readiness a watch waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
    /// Error or hang-up conditions only
    Error,
}

/// Handle for one registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// An event loop that can watch descriptors.
///
/// Watches are one-shot: once a watch has fired the loop forgets it, and
/// whoever registered it must register again if it still cares. Removing
/// a watch that already fired (or was never added) is a no-op.
pub trait Reactor {
    /// Registers interest in `fd` and returns the new watch.
    fn add_watch(&mut self, fd: RawFd, interest: Interest) -> WatchId;

    /// Withdraws a watch. Returns whether it was still registered.
    fn remove_watch(&mut self, id: WatchId) -> bool;
}

/// The descriptors a transfer needs watched, split by interest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketSets {
    pub read: Vec<RawFd>,
    pub write: Vec<RawFd>,
    pub error: Vec<RawFd>,
}

impl SocketSets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.error.is_empty()
    }

    /// Total number of (fd, interest) pairs.
    pub fn len(&self) -> usize {
        self.read.len() + self.write.len() + self.error.len()
    }

    /// Every (fd, interest) pair, read set first.
    pub fn iter(&self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        let read = self.read.iter().map(|&fd| (fd, Interest::Read));
        let write = self.write.iter().map(|&fd| (fd, Interest::Write));
        let error = self.error.iter().map(|&fd| (fd, Interest::Error));
        read.chain(write).chain(error)
    }
}
