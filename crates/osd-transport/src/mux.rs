//! Transport multiplexer.
//!
//! Drives a [`Transfer`] from an event loop. Every step withdraws all the
//! watches the previous step installed, lets the transfer make progress,
//! and installs one fresh watch per descriptor in each of the transfer's
//! socket sets. The transfer may open, swap or drop sockets between steps;
//! replacing the whole watch set means the loop never holds a stale watch,
//! and once the transfer has ended (empty sets) no watch is left at all.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{Progress, Reactor, Receiver, Transfer, WatchId};

/// Owns a transfer and the loop watches that keep it moving.
pub struct Multiplexer<T> {
    transfer: T,

    /// Watches installed by the most recent step.
    watches: Vec<WatchId>,

    finished: bool,
    steps: u64,
}

impl<T: Transfer> Multiplexer<T> {
    pub fn new(transfer: T) -> Self {
        Self {
            transfer,
            watches: Vec::new(),
            finished: false,
            steps: 0,
        }
    }

    /// Registers the transfer with the loop.
    ///
    /// Performs the first step, which starts the transfer and installs the
    /// watches it asks for.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error if the first step already delivered
    /// data it rejected.
    pub fn initialize<R: Receiver>(
        &mut self,
        reactor: &mut dyn Reactor,
        receiver: &mut R,
    ) -> Result<(), R::Error> {
        debug!("Starting transfer");
        self.step(reactor, receiver)
    }

    /// Advances the transfer after the loop reported readiness (or a timeout).
    ///
    /// Which watch fired does not matter: the transfer knows what work is
    /// possible. The steps are:
    /// 1. withdraw every watch from the previous step
    /// 2. `perform` the transfer, delivering data to `receiver`
    /// 3. install one watch per descriptor in each reported socket set
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error. The old watches have already been
    /// withdrawn at that point and no new ones are installed.
    pub fn step<R: Receiver>(
        &mut self,
        reactor: &mut dyn Reactor,
        receiver: &mut R,
    ) -> Result<(), R::Error> {
        self.withdraw(reactor);
        self.steps = self.steps.saturating_add(1);

        let progress = self.transfer.perform(receiver)?;
        self.finished = progress == Progress::Finished;

        let sets = self.transfer.fdset();
        for (fd, interest) in sets.iter() {
            self.watches.push(reactor.add_watch(fd, interest));
        }

        trace!(
            step = self.steps,
            watches = self.watches.len(),
            finished = self.finished,
            "Multiplexer step"
        );
        Ok(())
    }

    /// Withdraws every installed watch without touching the transfer.
    pub fn shutdown(&mut self, reactor: &mut dyn Reactor) {
        self.withdraw(reactor);
    }

    fn withdraw(&mut self, reactor: &mut dyn Reactor) {
        for id in self.watches.drain(..) {
            reactor.remove_watch(id);
        }
    }

    /// Whether `id` is one of this multiplexer's current watches.
    pub fn owns(&self, id: WatchId) -> bool {
        self.watches.contains(&id)
    }

    pub fn watches(&self) -> &[WatchId] {
        &self.watches
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// How long the loop may wait before the next step is due regardless of
    /// readiness.
    pub fn timeout(&self) -> Option<Duration> {
        if self.finished {
            return None;
        }
        self.transfer.timeout()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    pub fn into_transfer(self) -> T {
        self.transfer
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::os::fd::RawFd;

    use super::*;
    use crate::{Interest, SocketSets};

    /// Reactor that just records the live watch set.
    #[derive(Default)]
    struct RecordingReactor {
        live: BTreeMap<WatchId, (RawFd, Interest)>,
        next: u64,
        removed: usize,
    }

    impl RecordingReactor {
        fn pairs(&self) -> Vec<(RawFd, Interest)> {
            let mut pairs: Vec<_> = self.live.values().copied().collect();
            pairs.sort_by_key(|&(fd, interest)| (fd, interest as u8));
            pairs
        }
    }

    impl Reactor for RecordingReactor {
        fn add_watch(&mut self, fd: RawFd, interest: Interest) -> WatchId {
            self.next += 1;
            let id = WatchId::new(self.next);
            self.live.insert(id, (fd, interest));
            id
        }

        fn remove_watch(&mut self, id: WatchId) -> bool {
            let removed = self.live.remove(&id).is_some();
            if removed {
                self.removed += 1;
            }
            removed
        }
    }

    /// One scripted `perform`: chunks to deliver, then the sets to report.
    struct Script {
        chunks: Vec<&'static [u8]>,
        sets: SocketSets,
        progress: Progress,
    }

    struct ScriptedTransfer {
        script: VecDeque<Script>,
        current: SocketSets,
        performs: usize,
    }

    impl ScriptedTransfer {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: script.into(),
                current: SocketSets::default(),
                performs: 0,
            }
        }
    }

    impl Transfer for ScriptedTransfer {
        fn perform<R: Receiver>(&mut self, receiver: &mut R) -> Result<Progress, R::Error> {
            self.performs += 1;
            let Some(next) = self.script.pop_front() else {
                self.current = SocketSets::default();
                return Ok(Progress::Finished);
            };
            for chunk in next.chunks {
                receiver.on_receive(chunk)?;
            }
            self.current = next.sets;
            Ok(next.progress)
        }

        fn fdset(&self) -> SocketSets {
            self.current.clone()
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }
    }

    #[derive(Default)]
    struct Collect {
        chunks: Vec<Vec<u8>>,
        reject: bool,
    }

    impl Receiver for Collect {
        type Error = String;

        fn on_receive(&mut self, chunk: &[u8]) -> Result<(), String> {
            if self.reject {
                return Err("rejected".to_string());
            }
            self.chunks.push(chunk.to_vec());
            Ok(())
        }
    }

    fn sets(read: &[RawFd], write: &[RawFd], error: &[RawFd]) -> SocketSets {
        SocketSets {
            read: read.to_vec(),
            write: write.to_vec(),
            error: error.to_vec(),
        }
    }

    fn running(chunks: Vec<&'static [u8]>, sets: SocketSets) -> Script {
        Script {
            chunks,
            sets,
            progress: Progress::Running,
        }
    }

    #[test]
    fn test_initialize_installs_reported_watches() {
        let transfer = ScriptedTransfer::new(vec![running(vec![], sets(&[], &[3], &[]))]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();

        assert_eq!(reactor.pairs(), vec![(3, Interest::Write)]);
        assert_eq!(mux.watches().len(), 1);
        assert_eq!(mux.steps(), 1);
        assert!(!mux.is_finished());
    }

    #[test]
    fn test_each_step_replaces_the_watch_set() {
        let transfer = ScriptedTransfer::new(vec![
            running(vec![], sets(&[], &[3], &[])),
            running(vec![b"a"], sets(&[3], &[3], &[])),
            running(vec![b"b", b"c"], sets(&[3, 4], &[], &[4])),
            running(vec![], sets(&[4], &[], &[])),
        ]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();
        assert_eq!(reactor.pairs(), vec![(3, Interest::Write)]);

        mux.step(&mut reactor, &mut rx).unwrap();
        assert_eq!(reactor.pairs(), vec![(3, Interest::Read), (3, Interest::Write)]);

        mux.step(&mut reactor, &mut rx).unwrap();
        assert_eq!(
            reactor.pairs(),
            vec![(3, Interest::Read), (4, Interest::Read), (4, Interest::Error)]
        );

        mux.step(&mut reactor, &mut rx).unwrap();
        assert_eq!(reactor.pairs(), vec![(4, Interest::Read)]);

        // Exactly the previous step's watches were withdrawn each time
        assert_eq!(reactor.removed, 1 + 2 + 3);
        assert_eq!(rx.chunks, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_fired_watches_are_tolerated() {
        let transfer = ScriptedTransfer::new(vec![
            running(vec![], sets(&[3], &[], &[])),
            running(vec![], sets(&[3], &[], &[])),
        ]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();

        // The loop forgets a watch once it fires
        let fired = mux.watches()[0];
        reactor.live.remove(&fired);

        mux.step(&mut reactor, &mut rx).unwrap();
        assert_eq!(reactor.pairs(), vec![(3, Interest::Read)]);
        assert!(!mux.owns(fired));
    }

    #[test]
    fn test_finished_transfer_leaves_no_watches() {
        let transfer = ScriptedTransfer::new(vec![
            running(vec![], sets(&[3], &[], &[])),
            Script {
                chunks: vec![b"last"],
                sets: SocketSets::default(),
                progress: Progress::Finished,
            },
        ]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();
        mux.step(&mut reactor, &mut rx).unwrap();

        assert!(mux.is_finished());
        assert!(reactor.live.is_empty());
        assert!(mux.watches().is_empty());
        assert_eq!(mux.timeout(), None);
    }

    #[test]
    fn test_receiver_error_propagates_without_leaking_watches() {
        let transfer = ScriptedTransfer::new(vec![
            running(vec![], sets(&[3], &[], &[])),
            running(vec![b"boom"], sets(&[3], &[], &[])),
        ]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();
        rx.reject = true;

        let err = mux.step(&mut reactor, &mut rx).unwrap_err();
        assert_eq!(err, "rejected");
        assert!(reactor.live.is_empty());
    }

    #[test]
    fn test_owns_and_shutdown() {
        let transfer = ScriptedTransfer::new(vec![running(vec![], sets(&[3], &[3], &[]))]);
        let mut mux = Multiplexer::new(transfer);
        let mut reactor = RecordingReactor::default();
        let mut rx = Collect::default();

        mux.initialize(&mut reactor, &mut rx).unwrap();
        let ids: Vec<WatchId> = mux.watches().to_vec();
        assert!(ids.iter().all(|&id| mux.owns(id)));
        assert!(!mux.owns(WatchId::new(999)));
        assert_eq!(mux.timeout(), Some(Duration::from_secs(5)));

        mux.shutdown(&mut reactor);
        assert!(reactor.live.is_empty());
        assert_eq!(mux.into_transfer().performs, 1);
    }
}
