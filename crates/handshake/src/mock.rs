//! Test harness used by this crate's own tests, and importable by anything
//! that wants to exercise [`HandshakeEngine`](crate::engine::HandshakeEngine)
//! without a real VM runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::worker::{Host, Interrupter, WorkerId};

/// A [`Host`] that tracks the fast-pending flag per worker in a plain map,
/// instead of real thread-local storage, so tests can assert on it.
pub struct MockHost {
    fast_pending: Mutex<HashMap<WorkerId, bool>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fast_pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_fast_pending(&self, worker: WorkerId) -> bool {
        *self.fast_pending.lock().get(&worker).unwrap_or(&false)
    }
}

impl Host for MockHost {
    fn set_fast_pending(&self, worker: WorkerId) {
        self.fast_pending.lock().insert(worker, true);
    }

    fn clear_fast_pending(&self, worker: WorkerId) {
        self.fast_pending.lock().insert(worker, false);
    }
}

/// An [`Interrupter`] modeling a worker parked on a condvar. `park` is the
/// worker-side call that blocks until `interrupt` is invoked; together they
/// stand in for whatever cooperative blocking primitive a real host wraps
/// with [`SafepointState::set_blocked`](crate::safepoint::SafepointState::set_blocked).
pub struct MockParker {
    interrupted: Mutex<bool>,
    cvar: Condvar,
}

impl MockParker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            interrupted: Mutex::new(false),
            cvar: Condvar::new(),
        })
    }

    /// Blocks until interrupted, then clears the flag and returns.
    pub fn park(&self) {
        let mut interrupted = self.interrupted.lock();
        while !*interrupted {
            self.cvar.wait(&mut interrupted);
        }
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupted.lock()
    }
}

impl Interrupter for MockParker {
    fn interrupt(&self, _worker: WorkerId) {
        let mut interrupted = self.interrupted.lock();
        *interrupted = true;
        self.cvar.notify_all();
    }

    fn reset_interrupted(&self, _worker: WorkerId) {
        *self.interrupted.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_host_tracks_pending_per_worker() {
        let host = MockHost::new();
        assert!(!host.is_fast_pending(1));
        host.set_fast_pending(1);
        assert!(host.is_fast_pending(1));
        assert!(!host.is_fast_pending(2));
        host.clear_fast_pending(1);
        assert!(!host.is_fast_pending(1));
    }

    #[test]
    fn mock_parker_wakes_on_interrupt() {
        let parker = MockParker::new();
        let p = parker.clone();
        let handle = std::thread::spawn(move || {
            p.park();
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        parker.interrupt(1);
        handle.join().unwrap();
    }
}
