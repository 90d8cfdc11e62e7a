//! `AmcpConfig`: every knob enumerated in §6 "Configuration surface",
//! TOML-first per `llmspell-config`'s `toml` + `schemars`-derive
//! approach. `Default` is hand-written (not derived) to match the
//! documented defaults, the way `FlowControllerConfig::default()` does
//! in `llmspell-events::flow_controller`.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use amcp_broker::BrokerConfig;
use amcp_broker::RetryPolicy;
use amcp_core::DeliveryOptions;

/// Duration expressed in milliseconds on the wire (TOML has no native
/// duration type); converted to/from [`std::time::Duration`] at the
/// config boundary.
fn duration_from_millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Every AMCP runtime knob (§6 "Configuration surface").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AmcpConfig {
    /// How long reliable publish waits on a full queue before
    /// `BackpressureError` (default 5s).
    pub publish_timeout_ms: u64,
    /// Per-topic queue capacity (default 10,000).
    pub queue_bound: usize,
    /// Max user-callback runtime before treated as failed (default 30s).
    pub callback_timeout_ms: u64,
    /// Source-side ACK wait for migration hand-off (default 15s).
    pub migration_timeout_ms: u64,
    /// Default wall-clock orchestration session deadline (default 60s).
    pub orchestration_deadline_default_ms: u64,
    /// Capability registry heartbeat sweep interval (default 30s).
    pub heartbeat_interval_ms: u64,
    /// Capability registry heartbeat staleness threshold before SUSPECT
    /// (default 30s; DEAD at 2x this value).
    pub heartbeat_timeout_ms: u64,
    /// Retry base delay for reliable delivery (default 100ms).
    pub retry_base_delay_ms: u64,
    /// Retry backoff factor (default 2.0).
    pub retry_factor: f64,
    /// Retry backoff cap (default 30s).
    pub retry_cap_ms: u64,
    /// Retry max attempts (default 5).
    pub retry_max_attempts: u32,
    /// Prepended by cross-process transports to all topics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_prefix: Option<String>,
    /// Broker drain wait on `stop()` (default 10s).
    pub broker_drain_timeout_ms: u64,
    /// Baseline delivery options when an event omits them.
    pub default_delivery: DeliveryOptionsConfig,
}

/// TOML-friendly mirror of [`amcp_core::DeliveryOptions`] (durations as
/// milliseconds, since `toml` has no native duration type).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DeliveryOptionsConfig {
    pub persistent: bool,
    pub priority: PriorityConfig,
    pub ttl_ms: Option<u64>,
    pub ordered: bool,
    pub reliable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub enum PriorityConfig {
    Low,
    Normal,
    High,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self::Normal
    }
}

impl Default for DeliveryOptionsConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            priority: PriorityConfig::Normal,
            ttl_ms: None,
            ordered: false,
            reliable: false,
        }
    }
}

impl From<DeliveryOptionsConfig> for DeliveryOptions {
    fn from(cfg: DeliveryOptionsConfig) -> Self {
        Self {
            persistent: cfg.persistent,
            priority: match cfg.priority {
                PriorityConfig::Low => amcp_core::Priority::Low,
                PriorityConfig::Normal => amcp_core::Priority::Normal,
                PriorityConfig::High => amcp_core::Priority::High,
            },
            ttl: cfg.ttl_ms.map(Duration::from_millis),
            ordered: cfg.ordered,
            reliable: cfg.reliable,
        }
    }
}

impl Default for AmcpConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 5_000,
            queue_bound: 10_000,
            callback_timeout_ms: 30_000,
            migration_timeout_ms: 15_000,
            orchestration_deadline_default_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 30_000,
            retry_base_delay_ms: 100,
            retry_factor: 2.0,
            retry_cap_ms: 30_000,
            retry_max_attempts: 5,
            topic_prefix: None,
            broker_drain_timeout_ms: 10_000,
            default_delivery: DeliveryOptionsConfig::default(),
        }
    }
}

impl AmcpConfig {
    /// Parse from a TOML document (`llmspell-config`'s `toml::from_str`
    /// idiom).
    ///
    /// # Errors
    /// Returns the underlying `toml` deserialization error.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Serialize back to TOML.
    ///
    /// # Errors
    /// Returns the underlying `toml` serialization error.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        duration_from_millis(self.callback_timeout_ms)
    }

    #[must_use]
    pub fn migration_timeout(&self) -> Duration {
        duration_from_millis(self.migration_timeout_ms)
    }

    #[must_use]
    pub fn orchestration_deadline_default(&self) -> Duration {
        duration_from_millis(self.orchestration_deadline_default_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        duration_from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        duration_from_millis(self.heartbeat_timeout_ms)
    }

    /// Build the [`BrokerConfig`] this configuration implies.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            publish_timeout: duration_from_millis(self.publish_timeout_ms),
            queue_bound: self.queue_bound,
            drain_timeout: duration_from_millis(self.broker_drain_timeout_ms),
            retry: RetryPolicy {
                base_delay: duration_from_millis(self.retry_base_delay_ms),
                factor: self.retry_factor,
                cap: duration_from_millis(self.retry_cap_ms),
                max_attempts: self.retry_max_attempts,
            },
            topic_prefix: self.topic_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AmcpConfig::default();
        assert_eq!(config.publish_timeout_ms, 5_000);
        assert_eq!(config.queue_bound, 10_000);
        assert_eq!(config.callback_timeout_ms, 30_000);
        assert_eq!(config.migration_timeout_ms, 15_000);
        assert_eq!(config.orchestration_deadline_default_ms, 60_000);
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.retry_factor, 2.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AmcpConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AmcpConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.queue_bound, config.queue_bound);
    }

    #[test]
    fn partial_toml_uses_defaults_for_missing_fields() {
        let parsed = AmcpConfig::from_toml("queue_bound = 500\n").unwrap();
        assert_eq!(parsed.queue_bound, 500);
        assert_eq!(parsed.retry_max_attempts, 5);
    }
}
