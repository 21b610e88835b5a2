use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{AggregateError, HandshakeError};
use crate::handshake::{ActionResult, Handshake, HandshakeFuture};
use crate::safepoint::SafepointState;
use crate::worker::{Host, WorkerId};

/// Process-wide registry of worker safepoint state, and the entry point for
/// posting handshakes.
///
/// Workers are added and removed explicitly (`register_worker` /
/// `deregister_worker`) rather than held through a weak-keyed map: the
/// engine only needs to know about a worker for the span between it joining
/// and it exiting, and an explicit lifecycle call at each end is simpler and
/// more predictable than relying on collection of a weak reference.
pub struct HandshakeEngine<H: Host> {
    host: Arc<H>,
    config: Arc<EngineConfig>,
    registry: Mutex<HashMap<WorkerId, Arc<SafepointState>>>,
}

impl<H: Host> HandshakeEngine<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    /// Same as [`new`](Self::new), but with an explicit config instead of one
    /// read from the environment — mainly for tests that want deterministic
    /// queue-depth-warning thresholds.
    pub fn with_config(host: Arc<H>, config: EngineConfig) -> Self {
        Self {
            host,
            config: Arc::new(config),
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Clones the shared handle to the host, for callers (tests, worker
    /// threads) that need to move it across a thread boundary.
    pub fn host_arc(&self) -> Arc<H> {
        self.host.clone()
    }

    /// Registers a worker, creating its safepoint state if this is the first
    /// time it's seen. Idempotent.
    pub fn register_worker(&self, worker: WorkerId) -> Arc<SafepointState> {
        let config = self.config.clone();
        self.registry
            .lock()
            .entry(worker)
            .or_insert_with(|| Arc::new(SafepointState::new(worker, config)))
            .clone()
    }

    /// Removes a worker's state. Any handshake still targeting it will simply
    /// never see that party arrive; callers are expected to deactivate the
    /// worker from in-flight handshakes before calling this.
    pub fn deregister_worker(&self, worker: WorkerId) {
        log::debug!(target: "handshake::engine", "worker {worker} deregistered");
        self.registry.lock().remove(&worker);
    }

    pub fn current(&self, worker: WorkerId) -> Option<Arc<SafepointState>> {
        self.registry.lock().get(&worker).cloned()
    }

    pub fn is_registered(&self, worker: WorkerId) -> bool {
        self.registry.lock().contains_key(&worker)
    }

    /// Called by `worker` at a safepoint. Drains and runs whatever is
    /// eligible in its queue.
    pub fn poll(&self, worker: WorkerId) -> Result<(), AggregateError> {
        match self.current(worker) {
            Some(state) => state.poll(self.host.as_ref()),
            None => Ok(()),
        }
    }

    /// Posts a handshake to every worker in `workers`.
    ///
    /// Fails fast with [`HandshakeError::Unsupported`] if the host reports
    /// the platform can't support handshakes, or
    /// [`HandshakeError::WorkerNotAlive`] if any listed worker isn't
    /// currently registered.
    pub fn run_thread_local(
        &self,
        workers: &[WorkerId],
        action: impl Fn(WorkerId) -> ActionResult + Send + Sync + 'static,
        on_done: impl FnOnce() + Send + 'static,
        side_effecting: bool,
        sync: bool,
    ) -> Result<HandshakeFuture, HandshakeError> {
        if !self.host.is_supported() {
            log::warn!(target: "handshake::engine", "run_thread_local rejected: host does not support handshakes");
            return Err(HandshakeError::Unsupported);
        }

        let states: Vec<Arc<SafepointState>> = {
            let registry = self.registry.lock();
            let mut states = Vec::with_capacity(workers.len());
            for worker in workers {
                match registry.get(worker) {
                    Some(state) => states.push(state.clone()),
                    None => {
                        log::warn!(target: "handshake::engine", "run_thread_local rejected: worker {worker} not alive");
                        return Err(HandshakeError::WorkerNotAlive(*worker));
                    }
                }
            }
            states
        };

        log::debug!(
            target: "handshake::engine",
            "posting handshake to {} worker(s), side_effecting={side_effecting} sync={sync}",
            workers.len(),
        );

        let handshake = Arc::new(Handshake::new(
            workers.len(),
            Arc::new(action),
            Box::new(on_done),
            side_effecting,
            sync,
        ));

        for state in &states {
            state.post(handshake.clone(), self.host.as_ref());
        }

        Ok(HandshakeFuture::new(handshake))
    }

    /// Lets `worker` join an already-posted handshake. A no-op if the
    /// handshake's registration phase has already closed.
    pub fn activate_thread(&self, worker: WorkerId, future: &HandshakeFuture) {
        log::debug!(target: "handshake::engine", "worker {worker} activating into an in-flight handshake");
        if let Some(state) = self.current(worker) {
            state.activate(&future.handshake, self.host.as_ref());
        }
    }

    /// Lets `worker` voluntarily opt out of a handshake it was targeted by.
    pub fn deactivate_thread(&self, worker: WorkerId, future: &HandshakeFuture) {
        log::debug!(target: "handshake::engine", "worker {worker} deactivating from a handshake");
        if let Some(state) = self.current(worker) {
            state.deactivate(&future.handshake, self.host.as_ref());
        }
    }
}
