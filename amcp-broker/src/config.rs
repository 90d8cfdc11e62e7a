//! Broker-owned configuration knobs (§5, §6 "Configuration surface").
//!
//! Hand-written `Default`, matching `FlowControllerConfig::default()` in
//! `llmspell-events::flow_controller` rather than `#[derive(Default)]`,
//! so the documented defaults stay the single source of truth.

use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// How long reliable publish waits on a full queue before
    /// `BackpressureError` (§5, default 5s).
    pub publish_timeout: Duration,
    /// Per-topic queue capacity (§5, default 10,000).
    pub queue_bound: usize,
    /// Bounded drain wait on `stop()` (§5, default 10s).
    pub drain_timeout: Duration,
    /// Retry/backoff policy for reliable delivery (§4.9).
    pub retry: RetryPolicy,
    /// Prepended by cross-process transports to all topics (§6).
    pub topic_prefix: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            queue_bound: 10_000,
            drain_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            topic_prefix: None,
        }
    }
}
