use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ActionFailure, HandshakeError};
use crate::phaser::Phaser;
use crate::worker::WorkerId;

/// Result returned by a handshake action.
pub type ActionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub(crate) type Action = dyn Fn(WorkerId) -> ActionResult + Send + Sync;
pub(crate) type OnDone = dyn FnOnce() + Send;

/// A single thread-local handshake request, shared by every worker it
/// targets and by the coordinator's [`HandshakeFuture`].
///
/// Construction pre-registers every initial target as a phaser party; the
/// handshake terminates — and `on_done` fires, exactly once — when the last
/// party deregisters.
pub struct Handshake {
    phaser: Phaser,
    action: Arc<Action>,
    on_done: Mutex<Option<Box<OnDone>>>,
    side_effecting: bool,
    sync: bool,
    cancelled: AtomicBool,
}

impl Handshake {
    pub(crate) fn new(
        parties: usize,
        action: Arc<Action>,
        on_done: Box<OnDone>,
        side_effecting: bool,
        sync: bool,
    ) -> Self {
        Self {
            phaser: Phaser::new(parties),
            action,
            on_done: Mutex::new(Some(on_done)),
            side_effecting,
            sync,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn side_effecting(&self) -> bool {
        self.side_effecting
    }

    pub(crate) fn phaser(&self) -> &Phaser {
        &self.phaser
    }

    /// Runs this handshake's protocol on behalf of `worker`, having just
    /// claimed one entry for it out of the worker's queue.
    ///
    /// Sync mode rendezvouses twice (once before running the action, once
    /// after); async mode rendezvouses only on the way out. Either way, the
    /// party that observes the phaser reach zero is the one that fires
    /// `on_done`.
    pub(crate) fn perform(&self, worker: WorkerId) -> Result<(), ActionFailure> {
        if self.sync {
            self.phaser.arrive_and_await_advance();
        }

        let result = if self.cancelled.load(Ordering::Acquire) {
            Ok(())
        } else {
            run_action(&self.action, worker)
        };

        let terminated = self.phaser.arrive_and_deregister();

        if self.sync {
            self.phaser.await_terminated();
        }

        if terminated {
            self.fire_on_done();
        }

        result
    }

    /// Voluntary opt-out: counts as having arrived, without running the
    /// action.
    pub(crate) fn deactivate(&self) {
        if self.phaser.arrive_and_deregister() {
            self.fire_on_done();
        }
    }

    fn fire_on_done(&self) {
        if let Some(on_done) = self.on_done.lock().take() {
            log::debug!(target: "handshake::handshake", "handshake terminated, firing on_done");
            on_done();
        }
    }

    /// Sets the cancelled flag, unless the handshake has already terminated.
    /// Returns whether it took effect. Cancellation only suppresses actions
    /// that have not yet run; it does not affect the rendezvous protocol.
    pub fn cancel(&self) -> bool {
        if self.phaser.is_terminated() {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        log::debug!(target: "handshake::handshake", "handshake cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.phaser.is_terminated()
    }
}

fn run_action(action: &Action, worker: WorkerId) -> Result<(), ActionFailure> {
    match catch_unwind(AssertUnwindSafe(|| action(worker))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ActionFailure::Error(e)),
        Err(payload) => {
            let message = panic_message(payload);
            log::warn!(target: "handshake::handshake", "handshake action panicked on worker {worker}: {message}");
            Err(ActionFailure::Panic(message))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Coordinator-facing handle returned by
/// [`HandshakeEngine::run_thread_local`](crate::engine::HandshakeEngine::run_thread_local).
#[derive(Clone)]
pub struct HandshakeFuture {
    pub(crate) handshake: Arc<Handshake>,
}

impl HandshakeFuture {
    pub(crate) fn new(handshake: Arc<Handshake>) -> Self {
        Self { handshake }
    }

    /// Blocks until the handshake terminates.
    pub fn get(&self) {
        self.handshake.phaser.await_terminated();
    }

    /// Blocks until the handshake terminates or `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Result<(), HandshakeError> {
        if self.handshake.phaser.await_terminated_timeout(timeout) {
            Ok(())
        } else {
            Err(HandshakeError::Timeout)
        }
    }

    pub fn cancel(&self) -> bool {
        self.handshake.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handshake.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.handshake.is_done()
    }
}
