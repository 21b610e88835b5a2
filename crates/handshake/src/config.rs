/// Small typed configuration surface for the engine itself.
///
/// This crate has no command-line surface of its own — the handful of knobs
/// below are read from the environment, following the same
/// prefixed-env-var/typed-default shape as the rest of the host VM's own
/// runtime options, just without the surrounding CLI flag machinery (there
/// is no `argv` to parse here).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Logs a warning (see `target: "handshake::safepoint"`) when a worker's
    /// queue grows past this many entries, a sign some worker isn't polling
    /// often enough.
    pub queue_depth_warning: usize,
    /// Enables `trace!`-level logging on every `poll` call, not just on
    /// drains that actually do work. Off by default: far too noisy for
    /// anything but debugging the engine itself.
    pub trace_poll: bool,
}

const QUEUE_DEPTH_WARNING_VAR: &str = "HANDSHAKE_QUEUE_DEPTH_WARNING";
const TRACE_POLL_VAR: &str = "HANDSHAKE_TRACE_POLL";

const DEFAULT_QUEUE_DEPTH_WARNING: usize = 64;

impl EngineConfig {
    pub fn from_env() -> Self {
        let queue_depth_warning = std::env::var(QUEUE_DEPTH_WARNING_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_DEPTH_WARNING);

        let trace_poll = std::env::var(TRACE_POLL_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            queue_depth_warning,
            trace_poll,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env_overrides() {
        std::env::remove_var(QUEUE_DEPTH_WARNING_VAR);
        std::env::remove_var(TRACE_POLL_VAR);
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.queue_depth_warning, DEFAULT_QUEUE_DEPTH_WARNING);
        assert!(!cfg.trace_poll);
    }
}
