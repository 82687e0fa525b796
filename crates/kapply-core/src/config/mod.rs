//! Process-wide engine defaults, resolvable from the environment.
//!
//! Per-run behaviour is controlled by [`crate::Options`]; this module only
//! supplies the fallback values used when a caller does not set a given
//! option explicitly, following the same `from_env`/`DEFAULT_*` pattern the
//! rest of this ecosystem uses for process configuration.

use std::env;
use std::time::Duration;

/// Engine-wide defaults, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EngineDefaults {
    /// Default interval the status watcher is asked to poll at.
    pub poll_interval: Duration,
    /// Default per-wait-task timeout (0 disables the deadline).
    pub reconcile_timeout: Duration,
    /// Capacity of the event channel created by [`crate::event::EventSink::channel`]
    /// when a caller does not specify one.
    pub event_channel_capacity: usize,
}

impl EngineDefaults {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
    pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Build defaults from the environment, falling back to compile-time
    /// constants for anything unset or unparsable.
    ///
    /// Reads `KAPPLY_POLL_INTERVAL_MS` and `KAPPLY_RECONCILE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let poll_interval_ms = env::var("KAPPLY_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_POLL_INTERVAL_MS);

        let reconcile_timeout_secs = env::var("KAPPLY_RECONCILE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_RECONCILE_TIMEOUT_SECS);

        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            reconcile_timeout: Duration::from_secs(reconcile_timeout_secs),
            event_channel_capacity: Self::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_without_env() {
        // SAFETY: test-local env var mutation, no other test reads these keys.
        unsafe {
            env::remove_var("KAPPLY_POLL_INTERVAL_MS");
            env::remove_var("KAPPLY_RECONCILE_TIMEOUT_SECS");
        }
        let defaults = EngineDefaults::from_env();
        assert_eq!(defaults.poll_interval, Duration::from_millis(2_000));
        assert_eq!(defaults.reconcile_timeout, Duration::from_secs(120));
    }

    #[test]
    fn overrides_from_env() {
        // SAFETY: test-local env var mutation, no other test reads these keys.
        unsafe {
            env::set_var("KAPPLY_POLL_INTERVAL_MS", "500");
            env::set_var("KAPPLY_RECONCILE_TIMEOUT_SECS", "30");
        }
        let defaults = EngineDefaults::from_env();
        assert_eq!(defaults.poll_interval, Duration::from_millis(500));
        assert_eq!(defaults.reconcile_timeout, Duration::from_secs(30));
        // SAFETY: test-local env var mutation, no other test reads these keys.
        unsafe {
            env::remove_var("KAPPLY_POLL_INTERVAL_MS");
            env::remove_var("KAPPLY_RECONCILE_TIMEOUT_SECS");
        }
    }
}
