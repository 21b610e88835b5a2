use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::AggregateError;
use crate::handshake::Handshake;
use crate::phaser::Phase;
use crate::worker::{BlockOutcome, Host, Interrupter, WorkerId};

struct QueueEntry {
    handshake: Arc<Handshake>,
    active: bool,
}

struct Inner {
    queue: VecDeque<QueueEntry>,
    side_effects_enabled: bool,
    blocked_action: Option<Arc<dyn Interrupter>>,
}

/// Per-worker aggregate of everything a single worker needs to participate
/// in handshakes: its pending queue, its side-effect gate, and whatever
/// capability it is currently blocked under.
///
/// `pending` is the only field read on the worker's hot path; everything
/// else is behind `inner`'s mutex.
pub struct SafepointState {
    worker: WorkerId,
    inner: Mutex<Inner>,
    pending: AtomicBool,
    interrupted: AtomicBool,
    config: Arc<EngineConfig>,
}

impl SafepointState {
    pub(crate) fn new(worker: WorkerId, config: Arc<EngineConfig>) -> Self {
        Self {
            worker,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                side_effects_enabled: true,
                blocked_action: None,
            }),
            pending: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            config,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Fast-path check a worker's hot loop can use without taking the mutex.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn raise_pending(&self, host: &dyn Host) {
        self.pending.store(true, Ordering::Release);
        host.set_fast_pending(self.worker);
    }

    fn lower_pending_if_empty(&self, inner: &Inner, host: &dyn Host) {
        let any_eligible = inner
            .queue
            .iter()
            .any(|e| e.active && (inner.side_effects_enabled || !e.handshake.side_effecting()));
        if !any_eligible {
            self.pending.store(false, Ordering::Release);
            host.clear_fast_pending(self.worker);
        }
    }

    pub(crate) fn post(&self, handshake: Arc<Handshake>, host: &dyn Host) {
        let (blocked_action, depth) = {
            let mut inner = self.inner.lock();
            inner.queue.push_back(QueueEntry {
                handshake,
                active: true,
            });
            (inner.blocked_action.clone(), inner.queue.len())
        };
        if depth > self.config.queue_depth_warning {
            log::warn!(
                target: "handshake::safepoint",
                "worker {} has {depth} pending handshake entries (warning threshold {}); it may not be polling often enough",
                self.worker,
                self.config.queue_depth_warning,
            );
        }
        self.raise_pending(host);
        if let Some(interrupter) = blocked_action {
            interrupter.interrupt(self.worker);
            self.interrupted.store(true, Ordering::Release);
        }
    }

    /// Drains every eligible entry in the queue, running each handshake's
    /// protocol on this worker. Errors from individual actions are
    /// aggregated and returned after every claimed entry has had a chance to
    /// run.
    pub fn poll(&self, host: &dyn Host) -> Result<(), AggregateError> {
        if self.config.trace_poll {
            log::trace!(target: "handshake::safepoint", "worker {} polling", self.worker);
        }
        if !self.is_pending() {
            return Ok(());
        }

        log::debug!(target: "handshake::safepoint", "worker {} draining pending handshakes", self.worker);

        let to_process: Vec<Arc<Handshake>> = {
            let inner = self.inner.lock();
            inner
                .queue
                .iter()
                .filter(|e| e.active && (inner.side_effects_enabled || !e.handshake.side_effecting()))
                .map(|e| e.handshake.clone())
                .collect()
        };

        if self.interrupted.swap(false, Ordering::AcqRel) {
            let action = self.inner.lock().blocked_action.clone();
            if let Some(action) = action {
                action.reset_interrupted(self.worker);
            }
        }

        let mut aggregate: Option<AggregateError> = None;
        for handshake in to_process {
            let claimed = {
                let mut inner = self.inner.lock();
                if let Some(pos) = inner
                    .queue
                    .iter()
                    .position(|e| Arc::ptr_eq(&e.handshake, &handshake) && e.active)
                {
                    inner.queue.remove(pos);
                    true
                } else {
                    false
                }
            };
            if !claimed {
                continue;
            }
            if let Err(failure) = handshake.perform(self.worker) {
                let err = crate::error::ActionError {
                    worker: self.worker,
                    failure,
                };
                aggregate = Some(match aggregate {
                    Some(agg) => agg.merge(err),
                    None => AggregateError::new(err),
                });
            }
        }

        {
            let inner = self.inner.lock();
            self.lower_pending_if_empty(&inner, host);
        }

        match aggregate {
            Some(agg) => Err(agg),
            None => Ok(()),
        }
    }

    /// Flips the side-effect gate, re-evaluating the pending flag and waking
    /// the worker if it is currently blocked and new work just became
    /// eligible. Returns the prior value.
    pub fn set_allow_side_effects(&self, enabled: bool, host: &dyn Host) -> bool {
        let (prior, blocked_action, any_eligible) = {
            let mut inner = self.inner.lock();
            let prior = inner.side_effects_enabled;
            inner.side_effects_enabled = enabled;
            let any_eligible = inner
                .queue
                .iter()
                .any(|e| e.active && (enabled || !e.handshake.side_effecting()));
            (prior, inner.blocked_action.clone(), any_eligible)
        };

        if any_eligible {
            self.raise_pending(host);
            if let Some(interrupter) = blocked_action {
                interrupter.interrupt(self.worker);
                self.interrupted.store(true, Ordering::Release);
            }
        } else {
            self.pending.store(false, Ordering::Release);
            host.clear_fast_pending(self.worker);
        }

        prior
    }

    pub fn has_pending_side_effecting_actions(&self) -> bool {
        let inner = self.inner.lock();
        !inner.side_effects_enabled
            && inner
                .queue
                .iter()
                .any(|e| e.active && e.handshake.side_effecting())
    }

    /// Called by a late-joining worker that wants in on an already-posted
    /// handshake. A no-op if the worker is already a party, or if the
    /// handshake has already left its registration phase (phase zero).
    pub fn activate(&self, handshake: &Arc<Handshake>, host: &dyn Host) {
        {
            let inner = self.inner.lock();
            if inner.queue.iter().any(|e| Arc::ptr_eq(&e.handshake, handshake)) {
                return;
            }
        }

        match handshake.phaser().register() {
            Phase::Zero => {
                {
                    let mut inner = self.inner.lock();
                    inner.queue.push_back(QueueEntry {
                        handshake: handshake.clone(),
                        active: true,
                    });
                }
                self.raise_pending(host);
            }
            Phase::One => {
                // too late to join this round: undo the speculative
                // registration and don't contribute a performance of the
                // action.
                handshake.deactivate();
            }
            Phase::Terminated => {
                // already finished; register() left the party count alone,
                // so there is nothing to undo.
            }
        }
    }

    /// Voluntary opt-out of an already-queued handshake.
    pub fn deactivate(&self, handshake: &Arc<Handshake>, host: &dyn Host) {
        let removed = {
            let mut inner = self.inner.lock();
            if let Some(pos) = inner
                .queue
                .iter()
                .position(|e| Arc::ptr_eq(&e.handshake, handshake) && e.active)
            {
                inner.queue.remove(pos);
                true
            } else {
                false
            }
        };
        if !removed {
            return;
        }
        {
            let inner = self.inner.lock();
            self.lower_pending_if_empty(&inner, host);
        }
        handshake.deactivate();
    }

    fn install_blocked(&self, new: Option<Arc<dyn Interrupter>>) -> Option<Arc<dyn Interrupter>> {
        std::mem::replace(&mut self.inner.lock().blocked_action, new)
    }

    /// Wraps a cooperative blocking call so pending handshakes get serviced
    /// even while this worker is parked inside it.
    ///
    /// `interruptible` is retried until it reports [`BlockOutcome::Done`];
    /// each time it is interrupted, eligible handshakes are drained inline,
    /// the interrupter is reset, and — if more work remains pending — the
    /// interrupt is re-armed on this same thread so the next loop iteration
    /// also returns promptly instead of blocking indefinitely.
    pub fn set_blocked<T>(
        &self,
        host: &dyn Host,
        interrupter: Arc<dyn Interrupter>,
        mut interruptible: impl FnMut() -> BlockOutcome<T>,
        mut before_interrupt: impl FnMut(),
        mut after_interrupt: impl FnMut(),
    ) -> T {
        let previous = self.install_blocked(Some(interrupter.clone()));

        let result = loop {
            match interruptible() {
                BlockOutcome::Done(value) => break value,
                BlockOutcome::Interrupted => {
                    before_interrupt();
                    let _ = self.poll(host);
                    self.interrupted.store(false, Ordering::Release);
                    interrupter.reset_interrupted(self.worker);
                    after_interrupt();
                    if self.is_pending() {
                        interrupter.interrupt(self.worker);
                        self.interrupted.store(true, Ordering::Release);
                    }
                }
            }
        };

        self.install_blocked(previous);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pending_clears_once_queue_drains() {
        let host = MockHost::new();
        let state = SafepointState::new(1, Arc::new(EngineConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handshake = Arc::new(Handshake::new(
            1,
            Arc::new(move |_w| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Box::new(|| {}),
            true,
            false,
        ));
        state.post(handshake, host.as_ref());
        assert!(state.is_pending());
        state.poll(host.as_ref()).unwrap();
        assert!(!state.is_pending());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
