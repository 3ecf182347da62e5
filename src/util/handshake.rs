//! A suspendible-thread-set style handshake between mutators and the collector.
//!
//! Mutators are *joined* while they run heap operations and leave the set at safepoint polls and
//! around blocking calls. [`Handshake::synchronize`] waits until no mutator is joined, runs a
//! closure, and lets mutators back in. While the closure runs, no mutator is between two of its
//! safepoint polls, so phase changes made in the closure are observed by every mutator before its
//! next heap operation.
//!
//! A thread must never call `synchronize` while joined; it would wait for itself.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

#[derive(Default)]
struct HandshakeState {
    /// Number of joined mutators.
    joined: usize,
    /// A collector is waiting for, or running, a handshake. Mutators may not join.
    pending: bool,
}

#[derive(Default)]
pub struct Handshake {
    state: Mutex<HandshakeState>,
    cond: Condvar,
    /// Mirror of `state.pending` for the polling fast path.
    should_yield: AtomicBool,
    /// Serializes collectors.
    sync_lock: Mutex<()>,
    count: AtomicUsize,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HandshakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter the set. Blocks while a handshake is pending.
    pub fn join(&self) {
        let mut state = self.lock_state();
        while state.pending {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.joined += 1;
    }

    /// Leave the set.
    pub fn leave(&self) {
        let mut state = self.lock_state();
        debug_assert!(state.joined > 0);
        state.joined -= 1;
        if state.joined == 0 && state.pending {
            self.cond.notify_all();
        }
    }

    /// Whether a collector is waiting for joined mutators to reach a poll.
    #[inline(always)]
    pub fn should_yield(&self) -> bool {
        self.should_yield.load(Ordering::Acquire)
    }

    /// Called by a joined mutator at a safepoint poll. Returns whether the mutator yielded.
    pub fn poll(&self) -> bool {
        if self.should_yield() {
            self.leave();
            self.join();
            true
        } else {
            false
        }
    }

    /// Run `f` while no mutator is joined.
    pub fn synchronize<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let _sync = self
            .sync_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        {
            let mut state = self.lock_state();
            state.pending = true;
            self.should_yield.store(true, Ordering::Release);
            while state.joined > 0 {
                state = self
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }
        trace!("Handshake started");
        let result = f();
        {
            let mut state = self.lock_state();
            state.pending = false;
            self.should_yield.store(false, Ordering::Release);
            self.cond.notify_all();
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        trace!("Handshake finished");
        result
    }

    pub fn joined_count(&self) -> usize {
        self.lock_state().joined
    }

    /// Number of completed handshakes.
    pub fn handshake_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn synchronize_without_mutators() {
        let handshake = Handshake::new();
        assert_eq!(handshake.synchronize(|| 42), 42);
        assert_eq!(handshake.handshake_count(), 1);
    }

    #[test]
    fn synchronize_waits_for_poll() {
        panic_after(5000, || {
            let handshake = Arc::new(Handshake::new());
            let progress = Arc::new(AtomicUsize::new(0));
            let stop = Arc::new(AtomicBool::new(false));
            handshake.join();
            let mutator = {
                let handshake = handshake.clone();
                let progress = progress.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        // A heap operation.
                        progress.fetch_add(1, Ordering::SeqCst);
                        handshake.poll();
                    }
                    handshake.leave();
                })
            };
            let observed = handshake.synchronize(|| {
                let before = progress.load(Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                // The mutator is parked at its poll.
                assert_eq!(progress.load(Ordering::SeqCst), before);
                before
            });
            stop.store(true, Ordering::Release);
            mutator.join().unwrap();
            assert!(progress.load(Ordering::SeqCst) >= observed);
            assert_eq!(handshake.joined_count(), 0);
        })
    }
}
