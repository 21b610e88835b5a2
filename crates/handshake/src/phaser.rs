use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The phase a [`Phaser`] is currently in.
///
/// Async handshakes never observe `One`: their only rendezvous is the one
/// that drives `Zero` straight to `Terminated`. Sync handshakes pass through
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Zero,
    One,
    Terminated,
}

struct Inner {
    registered: usize,
    arrived: usize,
    phase: Phase,
}

/// A dynamic, two-round barrier with deregistration.
///
/// Round one (`Zero -> One`) is a classic "everyone arrives, everyone
/// proceeds together" barrier used by the sync handshake protocol to make
/// sure no party runs its action before every party has started draining.
/// Round two is a countdown: every party that finishes calls
/// [`arrive_and_deregister`](Phaser::arrive_and_deregister), which shrinks
/// the party count, and the phaser terminates the instant it reaches zero.
///
/// Late joiners call [`register`](Phaser::register), which atomically bumps
/// the party count and reports the phase observed at that instant; if the
/// phaser had already left `Zero`, the caller is expected to immediately
/// call `arrive_and_deregister` to undo the bump (see `engine::activate_thread`).
pub struct Phaser {
    inner: Mutex<Inner>,
    cvar: Condvar,
}

impl Phaser {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registered: parties,
                arrived: 0,
                phase: Phase::Zero,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Atomically adds one party and returns the phase observed at that
    /// instant. The caller only keeps the registration if the returned phase
    /// is `Zero`; if it's `One` the caller must compensate with a single
    /// [`arrive_and_deregister`](Phaser::arrive_and_deregister) to undo the
    /// speculative join. A phaser that has already fully terminated never
    /// gains a party — there is nothing left to compensate, and doing so
    /// would spuriously re-trigger termination.
    pub fn register(&self) -> Phase {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Terminated {
            inner.registered += 1;
        }
        inner.phase
    }

    /// Round-one rendezvous: blocks until every currently registered party
    /// has called this method at least once since the last round-one
    /// advance. The last party to arrive flips the phase to `One` and wakes
    /// everyone else.
    pub fn arrive_and_await_advance(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Zero {
            // already advanced past round one (e.g. we are a very late party
            // that registered after the flip); nothing to wait for.
            return;
        }
        inner.arrived += 1;
        if inner.arrived >= inner.registered {
            inner.arrived = 0;
            inner.phase = Phase::One;
            self.cvar.notify_all();
        } else {
            while inner.phase == Phase::Zero {
                self.cvar.wait(&mut inner);
            }
        }
    }

    /// Round-two rendezvous: removes one party. Returns `true` exactly once,
    /// to whichever caller observes the party count reach zero — that caller
    /// is responsible for running any terminal action (`on_done`).
    ///
    /// Deregistering can also close round one: if a party leaves (e.g. a
    /// voluntary `deactivate`) while others are still parked in
    /// `arrive_and_await_advance`, the departure may be exactly what brings
    /// `arrived` up to the new, smaller `registered` count. Re-checking that
    /// condition here, the same way the last arriver itself would, is what
    /// keeps those parked waiters from blocking forever.
    pub fn arrive_and_deregister(&self) -> bool {
        let mut inner = self.inner.lock();
        debug_assert!(inner.registered > 0);
        inner.registered -= 1;
        if inner.registered == 0 {
            inner.phase = Phase::Terminated;
            self.cvar.notify_all();
            true
        } else {
            if inner.phase == Phase::Zero && inner.arrived >= inner.registered {
                inner.arrived = 0;
                inner.phase = Phase::One;
                self.cvar.notify_all();
            }
            false
        }
    }

    /// Blocks until the phaser has terminated.
    pub fn await_terminated(&self) {
        let mut inner = self.inner.lock();
        while inner.phase != Phase::Terminated {
            self.cvar.wait(&mut inner);
        }
    }

    /// Blocks until the phaser has terminated or `timeout` elapses. Returns
    /// whether it terminated in time.
    pub fn await_terminated_timeout(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if inner.phase == Phase::Terminated {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.cvar.wait_for(&mut inner, deadline - now);
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Terminated)
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.inner.lock().registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn async_single_party_terminates_immediately() {
        let phaser = Phaser::new(1);
        assert!(phaser.arrive_and_deregister());
        assert!(phaser.is_terminated());
    }

    #[test]
    fn sync_four_parties_round_trip() {
        let phaser = Arc::new(Phaser::new(4));
        let arrived_round_one = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let phaser = phaser.clone();
            let arrived_round_one = arrived_round_one.clone();
            handles.push(std::thread::spawn(move || {
                phaser.arrive_and_await_advance();
                arrived_round_one.fetch_add(1, Ordering::SeqCst);
                let terminated = phaser.arrive_and_deregister();
                terminated
            }));
        }
        let terminations: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|t| *t)
            .count();
        assert_eq!(terminations, 1);
        assert_eq!(arrived_round_one.load(Ordering::SeqCst), 4);
        assert!(phaser.is_terminated());
    }

    #[test]
    fn late_registration_after_round_one_is_undone() {
        let phaser = Phaser::new(1);
        phaser.arrive_and_await_advance();
        // round one already closed (single party advanced itself).
        let phase = phaser.register();
        assert_eq!(phase, Phase::One);
        assert_eq!(phaser.registered(), 2);
        // caller discards: compensate with a deregister.
        assert!(!phaser.arrive_and_deregister());
        assert_eq!(phaser.registered(), 1);
    }

    #[test]
    fn deregister_while_others_are_parked_in_round_one_wakes_them() {
        let phaser = Arc::new(Phaser::new(2));
        let waiter = {
            let phaser = phaser.clone();
            std::thread::spawn(move || {
                phaser.arrive_and_await_advance();
            })
        };
        // give the spawned thread a moment to actually park in round one
        // before the other party leaves out from under it.
        std::thread::sleep(Duration::from_millis(20));
        // the second party deactivates instead of arriving; this must still
        // close round one for the first party, rather than leaving it
        // parked forever waiting for an arrival that will never come.
        assert!(!phaser.arrive_and_deregister());
        waiter.join().unwrap();
        assert_eq!(phaser.phase(), Phase::One);
    }

    #[test]
    fn timeout_elapses_without_termination() {
        let phaser = Phaser::new(2);
        assert!(!phaser.await_terminated_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn register_after_termination_does_not_gain_a_party() {
        let phaser = Phaser::new(1);
        assert!(phaser.arrive_and_deregister());
        assert!(phaser.is_terminated());
        assert_eq!(phaser.register(), Phase::Terminated);
        assert_eq!(phaser.registered(), 0);
    }
}
