use std::fmt;

/// Identity of a worker thread known to a [`HandshakeEngine`](crate::engine::HandshakeEngine).
///
/// Workers register and deregister explicitly; nothing here implies any
/// particular thread model beyond "some identifier a host can use to find
/// the right thread-local flag".
pub type WorkerId = u64;

/// Host-supplied hooks the engine calls outward to reach the actual
/// thread-local fast-path flag and the platform gate.
///
/// A real VM implements this over its own thread-local storage; tests use
/// [`mock::MockHost`](crate::mock::MockHost).
pub trait Host: Send + Sync + 'static {
    /// Raise the worker's fast, thread-local pending bit. May be called from
    /// any thread.
    fn set_fast_pending(&self, worker: WorkerId);

    /// Lower the worker's fast pending bit. Only ever called from the
    /// worker's own drain loop.
    fn clear_fast_pending(&self, worker: WorkerId);

    /// Whether the host can support handshakes at all on this platform.
    /// Defaults to `true`.
    fn is_supported(&self) -> bool {
        true
    }
}

/// A capability that can cooperatively interrupt a worker currently parked in
/// a blocking call, and clear any such pending interrupt.
///
/// Different blocking primitives supply different implementations: a condvar
/// wait is woken by `notify`, a socket read by closing the socket, and so on.
/// The core only needs the two operations below.
pub trait Interrupter: Send + Sync {
    fn interrupt(&self, worker: WorkerId);
    fn reset_interrupted(&self, worker: WorkerId);
}

/// Outcome of one attempt at the interruptible operation passed to
/// [`SafepointState::set_blocked`](crate::safepoint::SafepointState::set_blocked).
pub enum BlockOutcome<T> {
    Done(T),
    Interrupted,
}

impl<T> fmt::Debug for BlockOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOutcome::Done(_) => write!(f, "Done"),
            BlockOutcome::Interrupted => write!(f, "Interrupted"),
        }
    }
}
