//! Configuration types for handoff

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing and threading configuration shared by channels and background tasks
///
/// Connectors usually embed this in their own configuration so operators can
/// tune buffer sizes without code changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Byte capacity of a [`RingByteChannel`](crate::ring::RingByteChannel) (default: 65536)
    ///
    /// Must be a non-zero power of two; cursor wraparound uses a bitmask.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Maximum number of buffered items in a [`HandoffQueue`](crate::queue::HandoffQueue) (default: 1024)
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,

    /// Prefix for background thread names (default: "handoff")
    ///
    /// Threads are named `{prefix}-{task name}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Stack size for background threads in bytes (None = platform default)
    #[serde(default)]
    pub stack_size: Option<usize>,

    /// Upper bound for joins performed on the caller's behalf (None = wait indefinitely)
    ///
    /// Used by [`TaskStream::close`](crate::pipeline::TaskStream::close) and
    /// [`ItemPipeline::run`](crate::pipeline::ItemPipeline::run). Stored in
    /// milliseconds; must be non-zero when set.
    #[serde(default, rename = "join_timeout_ms", with = "optional_duration_millis")]
    pub join_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            queue_max_size: default_queue_max_size(),
            thread_name_prefix: default_thread_name_prefix(),
            stack_size: None,
            join_timeout: None,
        }
    }
}

impl BridgeConfig {
    /// Set the ring capacity
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the queue bound
    pub fn with_queue_max_size(mut self, max_size: usize) -> Self {
        self.queue_max_size = max_size;
        self
    }

    /// Set the join bound
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    /// Check every setting, reporting the first invalid key
    pub fn validate(&self) -> Result<()> {
        validate_ring_capacity(self.ring_capacity)?;
        validate_queue_max_size(self.queue_max_size)?;
        if self.thread_name_prefix.trim().is_empty() {
            return Err(Error::config(
                "thread name prefix must not be empty",
                "thread_name_prefix",
            ));
        }
        if self.stack_size == Some(0) {
            return Err(Error::config("stack size must be positive", "stack_size"));
        }
        if self.join_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config(
                "join timeout must be positive",
                "join_timeout_ms",
            ));
        }
        Ok(())
    }

    /// Build the full thread name for a task
    pub(crate) fn thread_name(&self, task: &str) -> String {
        format!("{}-{}", self.thread_name_prefix, task)
    }
}

pub(crate) fn validate_ring_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(Error::config(
            format!("ring capacity must be a non-zero power of two, got {capacity}"),
            "ring_capacity",
        ));
    }
    Ok(())
}

pub(crate) fn validate_queue_max_size(max_size: usize) -> Result<()> {
    if max_size == 0 {
        return Err(Error::config(
            "queue max size must be at least 1",
            "queue_max_size",
        ));
    }
    Ok(())
}

fn default_ring_capacity() -> usize {
    65536
}

fn default_queue_max_size() -> usize {
    1024
}

fn default_thread_name_prefix() -> String {
    "handoff".into()
}

// Optional Duration serialization helper (milliseconds)
mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.ring_capacity, 65536);
        assert_eq!(config.queue_max_size, 1024);
        assert_eq!(config.thread_name_prefix, "handoff");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_power_of_two_capacity_is_rejected_with_key() {
        let config = BridgeConfig::default().with_ring_capacity(1000);
        match config.validate() {
            Err(Error::Config { key, message }) => {
                assert_eq!(key.as_deref(), Some("ring_capacity"));
                assert!(message.contains("1000"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_and_zero_queue_are_rejected() {
        assert!(BridgeConfig::default().with_ring_capacity(0).validate().is_err());
        assert!(BridgeConfig::default().with_queue_max_size(0).validate().is_err());
    }

    #[test]
    fn empty_thread_prefix_is_rejected() {
        let config = BridgeConfig {
            thread_name_prefix: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "thread_name_prefix"
        ));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn join_timeout_round_trips_as_millis() {
        let config = BridgeConfig::default().with_join_timeout(Duration::from_secs(30));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["join_timeout_ms"], 30_000);

        let back: BridgeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.join_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn sub_second_join_timeout_survives_reload() {
        let config = BridgeConfig::default().with_join_timeout(Duration::from_millis(500));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"join_timeout_ms\":500"), "{json}");

        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.join_timeout, Some(Duration::from_millis(500)));
        assert!(back.validate().is_ok());
    }

    #[test]
    fn zero_join_timeout_is_rejected() {
        let config = BridgeConfig::default().with_join_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "join_timeout_ms"
        ));
    }

    #[test]
    fn thread_name_uses_prefix() {
        let config = BridgeConfig::default();
        assert_eq!(config.thread_name("ldap-search"), "handoff-ldap-search");
    }
}
