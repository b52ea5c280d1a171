//! Dispatcher and per-call configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use threadmill_protocol::ConfigError;

use crate::cancel::Timeout;

/// Pool and queue configuration for one dispatcher.
///
/// # Example
///
/// ```
/// use threadmill_pool::DispatcherConfig;
/// use std::time::Duration;
///
/// let config = DispatcherConfig::default()
///     .with_min_workers(2)
///     .with_max_workers(8)
///     .with_max_queue_size(64)
///     .with_terminate_idle_delay(Duration::from_millis(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Warm floor of workers kept alive even when idle.
    pub min_workers: usize,

    /// Ceiling the pool may grow to under load.
    pub max_workers: usize,

    /// Bound on the pending-call queue (`None` = unbounded). Enqueueing
    /// beyond the bound rejects the call with a queue-overflow error.
    pub max_queue_size: Option<usize>,

    /// How long a surplus idle worker lingers before being evicted.
    #[serde(with = "duration_millis")]
    pub terminate_idle_delay: Duration,

    /// Minimum spacing between crash-healing respawns. `None` preserves the
    /// always-respawn behavior; a window guards against crash-loop
    /// amplification (the floor is then restored on the next acquire).
    #[serde(with = "option_duration_millis")]
    pub respawn_cooldown: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            max_queue_size: None,
            terminate_idle_delay: Duration::from_millis(500),
            respawn_cooldown: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the warm floor (may be 0).
    pub fn with_min_workers(mut self, min: usize) -> Self {
        self.min_workers = min;
        self
    }

    /// Set the growth ceiling.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Bound the pending-call queue.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    /// Set the idle-eviction delay.
    pub fn with_terminate_idle_delay(mut self, delay: Duration) -> Self {
        self.terminate_idle_delay = delay;
        self
    }

    /// Space out crash-healing respawns.
    pub fn with_respawn_cooldown(mut self, cooldown: Duration) -> Self {
        self.respawn_cooldown = Some(cooldown);
        self
    }

    /// Check the floor/ceiling relationship.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroMaxWorkers);
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError::WorkerBounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        Ok(())
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Time budget measured from dispatch (default 5000ms). Zero is a
    /// configuration error; use [`Timeout::Never`] to disable.
    pub timeout: Timeout,

    /// Caller-supplied cancellation token, merged with the timeout into one
    /// effective signal.
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_millis(mut self, ms: u64) -> Self {
        self.timeout = Timeout::millis(ms);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Serde support for Duration as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Saturating: anything past u64::MAX ms is effectively forever.
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds.
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_queue_size, None);
        assert_eq!(config.terminate_idle_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_min_workers_is_valid() {
        let config = DispatcherConfig::default().with_min_workers(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ceiling_below_floor_is_rejected() {
        let config = DispatcherConfig::default()
            .with_min_workers(5)
            .with_max_workers(2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::WorkerBounds { min: 5, max: 2 })
        );
    }

    #[test]
    fn zero_max_workers_is_rejected() {
        let config = DispatcherConfig::default()
            .with_min_workers(0)
            .with_max_workers(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxWorkers));
    }

    #[test]
    fn durations_serialize_as_u64_millis() {
        let config = DispatcherConfig::default()
            .with_terminate_idle_delay(Duration::from_secs(2))
            .with_respawn_cooldown(Duration::from_secs(3));
        let wire = serde_json::to_value(&config).unwrap();
        assert_eq!(wire["terminate_idle_delay"], serde_json::json!(2000));
        assert_eq!(wire["respawn_cooldown"], serde_json::json!(3000));
    }

    #[test]
    fn oversized_duration_saturates() {
        let config = DispatcherConfig::default().with_terminate_idle_delay(Duration::MAX);
        let wire = serde_json::to_value(&config).unwrap();
        assert_eq!(wire["terminate_idle_delay"], serde_json::json!(u64::MAX));
    }

    #[test]
    fn config_serde_round_trip() {
        let config = DispatcherConfig::default()
            .with_max_queue_size(16)
            .with_respawn_cooldown(Duration::from_millis(1000));
        let wire = serde_json::to_string(&config).unwrap();
        let back: DispatcherConfig = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, config);
    }
}
