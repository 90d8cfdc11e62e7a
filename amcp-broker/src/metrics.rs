//! Broker metrics hooks (§2 C3 "metrics hooks", §8 boundary cases
//! "publish to a topic with no subscribers (no-op, metric incremented)").
//!
//! Grounded on `llmspell-events::flow_controller::FlowStats`'s plain
//! atomic-counter snapshot idiom.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BrokerMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    no_subscribers: AtomicU64,
    ttl_dropped: AtomicU64,
    overflow_dropped: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    handler_errors: AtomicU64,
}

/// Point-in-time snapshot of [`BrokerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub no_subscribers: u64,
    pub ttl_dropped: u64,
    pub overflow_dropped: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub handler_errors: u64,
}

impl BrokerMetrics {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_subscribers(&self) {
        self.no_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ttl_dropped(&self) {
        self.ttl_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_dropped(&self, n: u64) {
        self.overflow_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> BrokerMetricsSnapshot {
        BrokerMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            no_subscribers: self.no_subscribers.load(Ordering::Relaxed),
            ttl_dropped: self.ttl_dropped.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}
