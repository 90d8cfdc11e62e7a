//! The pub/sub broker: subscription registry, QoS-aware fan-out, retry
//! and dead-letter routing (component C3, plus the retry half of C9).

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod queue;
pub mod retry;

pub use broker::{Broker, BrokerBuilder, CloudEventHandler, SubscriptionHandle, SubscriptionOptions};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use handler::{EventHandler, SecurityInterceptor};
pub use metrics::{BrokerMetrics, BrokerMetricsSnapshot};
pub use retry::RetryPolicy;
