//! Environment-driven runtime configuration.

use std::time::Duration;

use quasar_bus::DEFAULT_CHANNEL_CAPACITY;

/// Runtime knobs, overridable from the environment:
///
/// - `QUASAR_BUS_CAPACITY` - per-subscriber channel capacity
/// - `QUASAR_SHUTDOWN_GRACE_MS` - time given to in-flight handlers after
///   services unsubscribe
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-subscriber bus channel capacity.
    pub bus_capacity: usize,
    /// Grace period after shutdown before `run` returns.
    pub shutdown_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration, applying environment overrides to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("QUASAR_BUS_CAPACITY") {
            if let Ok(capacity) = value.parse() {
                config.bus_capacity = capacity;
            }
        }
        if let Ok(value) = std::env::var("QUASAR_SHUTDOWN_GRACE_MS") {
            if let Ok(millis) = value.parse() {
                config.shutdown_grace = Duration::from_millis(millis);
            }
        }

        config
    }
}
