use std::error::Error;
use std::fmt;

use crate::worker::WorkerId;

/// Errors raised directly by the coordinator-facing API, before or instead
/// of any worker-side action running.
#[derive(Debug)]
pub enum HandshakeError {
    /// The host reports it cannot support handshakes on this platform.
    Unsupported,
    /// One of the requested workers was not alive when the handshake was
    /// posted.
    WorkerNotAlive(WorkerId),
    /// `future.get(timeout)` elapsed before the handshake terminated. The
    /// handshake itself is left intact; workers may still run the action.
    Timeout,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Unsupported => write!(f, "handshakes are not supported on this host"),
            HandshakeError::WorkerNotAlive(w) => write!(f, "worker {w} is not alive"),
            HandshakeError::Timeout => write!(f, "timed out waiting for handshake completion"),
        }
    }
}

impl Error for HandshakeError {}

/// How a single worker's action attempt failed.
pub enum ActionFailure {
    /// The action returned an ordinary error.
    Error(Box<dyn Error + Send + Sync>),
    /// The action panicked. Treated as the fatal case of the aggregation
    /// rule below — the moral equivalent of a thread-death signal.
    Panic(String),
}

impl fmt::Debug for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionFailure::Error(e) => write!(f, "Error({e})"),
            ActionFailure::Panic(msg) => write!(f, "Panic({msg})"),
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionFailure::Error(e) => write!(f, "{e}"),
            ActionFailure::Panic(msg) => write!(f, "action panicked: {msg}"),
        }
    }
}

/// A single action failure, tagged with the worker it happened on.
#[derive(Debug)]
pub struct ActionError {
    pub worker: WorkerId,
    pub failure: ActionFailure,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}: {}", self.worker, self.failure)
    }
}

/// One or more action failures collected from a single drain.
///
/// The primary error is the one surfaced by `Display`/`source`; the rest are
/// kept as suppressed causes. A panic always outranks an ordinary error as
/// primary — see [`AggregateError::merge`].
#[derive(Debug)]
pub struct AggregateError {
    primary: ActionError,
    suppressed: Vec<ActionError>,
}

impl AggregateError {
    pub fn new(first: ActionError) -> Self {
        Self {
            primary: first,
            suppressed: Vec::new(),
        }
    }

    /// Folds a new error into this aggregate. A new panic is promoted to
    /// primary (the old primary, and anything already suppressed, move
    /// behind it); anything else is appended as suppressed.
    pub fn merge(mut self, next: ActionError) -> Self {
        let next_is_panic = matches!(next.failure, ActionFailure::Panic(_));
        let primary_is_panic = matches!(self.primary.failure, ActionFailure::Panic(_));
        if next_is_panic && !primary_is_panic {
            let old_primary = std::mem::replace(&mut self.primary, next);
            self.suppressed.insert(0, old_primary);
            self
        } else {
            self.suppressed.push(next);
            self
        }
    }

    pub fn primary(&self) -> &ActionError {
        &self.primary
    }

    pub fn suppressed(&self) -> &[ActionError] {
        &self.suppressed
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} more suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl Error for AggregateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.primary.failure {
            ActionFailure::Error(e) => Some(e.as_ref()),
            ActionFailure::Panic(_) => None,
        }
    }
}
