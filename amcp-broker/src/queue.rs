//! Per-subscription bounded delivery queue (§5 "single-writer (broker)
//! multi-reader (handler pool) bounded channels; `bound = 10_000` by
//! default").
//!
//! Adapted from `llmspell-events::overflow` (`OverflowStrategy`,
//! high/low water marks) to realize spec.md §5's exact rule:
//! `reliable ? block-producer-with-timeout : drop-oldest-non-reliable`.
//! Priority partitioning follows `llmspell-events::flow_controller`'s
//! token-bucket-adjacent `FlowStats` counter idiom for drop accounting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use amcp_core::{Event, Priority};

use crate::error::BrokerError;

#[derive(Default)]
struct Lanes {
    high: VecDeque<Event>,
    normal: VecDeque<Event>,
    low: VecDeque<Event>,
}

impl Lanes {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn push(&mut self, priority: Priority, event: Event) {
        match priority {
            Priority::High => self.high.push_back(event),
            Priority::Normal => self.normal.push_back(event),
            Priority::Low => self.low.push_back(event),
        }
    }

    fn pop_front_any_priority_first(&mut self) -> Option<Event> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn pop_oldest_across_lanes(&mut self) -> Option<Event> {
        // Drop-oldest must consider wall-clock arrival order, not lane
        // order, so sequence number (monotonic, assigned at construction)
        // is compared across all three lanes.
        let candidates = [
            self.high.front().map(Event::sequence),
            self.normal.front().map(Event::sequence),
            self.low.front().map(Event::sequence),
        ];
        let oldest = candidates.into_iter().flatten().min()?;
        if self.high.front().map(Event::sequence) == Some(oldest) {
            self.high.pop_front()
        } else if self.normal.front().map(Event::sequence) == Some(oldest) {
            self.normal.pop_front()
        } else {
            self.low.pop_front()
        }
    }
}

/// A bounded, priority-aware delivery queue for a single subscription.
///
/// When `ordered` is set, priority partitioning is bypassed and a single
/// FIFO lane (`normal`) is used instead, since "within an ordered stream,
/// priority never reorders events" (§9 open question resolution).
pub struct DeliveryQueue {
    lanes: Mutex<Lanes>,
    capacity: usize,
    ordered: bool,
    notify: Notify,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl DeliveryQueue {
    #[must_use]
    pub fn new(capacity: usize, ordered: bool) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            capacity,
            ordered,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Push onto the queue. Best-effort events (`reliable = false`) use
    /// drop-oldest when full; reliable events block the caller (with a
    /// timeout) waiting for room.
    pub async fn push(
        &self,
        event: Event,
        reliable: bool,
        publish_timeout: Duration,
    ) -> Result<(), BrokerError> {
        let priority = if self.ordered {
            Priority::Normal
        } else {
            event.delivery_options().priority
        };

        if reliable {
            self.push_reliable(event, priority, publish_timeout).await
        } else {
            self.push_best_effort(event, priority);
            Ok(())
        }
    }

    fn push_best_effort(&self, event: Event, priority: Priority) {
        let mut lanes = self.lanes.lock();
        if lanes.len() >= self.capacity {
            if lanes.pop_oldest_across_lanes().is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        lanes.push(priority, event);
        drop(lanes);
        self.notify.notify_one();
    }

    async fn push_reliable(
        &self,
        event: Event,
        priority: Priority,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut lanes = self.lanes.lock();
                if lanes.len() < self.capacity {
                    lanes.push(priority, event);
                    drop(lanes);
                    self.notify.notify_one();
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::Backpressure);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = remaining.min(Duration::from_millis(20));
            let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        }
    }

    /// Pop the next event in delivery order, waiting if the queue is
    /// empty. `ordered` subscriptions always drain strict FIFO; others
    /// drain high-priority-first.
    pub async fn pop(&self) -> Event {
        loop {
            {
                let mut lanes = self.lanes.lock();
                let popped = if self.ordered {
                    lanes.normal.pop_front()
                } else {
                    lanes.pop_front_any_priority_first()
                };
                if let Some(event) = popped {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amcp_core::DeliveryOptions;

    fn event(topic: &str) -> Event {
        Event::builder(topic, "urn:x").build().unwrap()
    }

    #[tokio::test]
    async fn best_effort_drops_oldest_when_full() {
        let queue = DeliveryQueue::new(2, false);
        queue.push(event("a"), false, Duration::from_millis(10)).await.unwrap();
        queue.push(event("b"), false, Duration::from_millis(10)).await.unwrap();
        queue.push(event("c"), false, Duration::from_millis(10)).await.unwrap();
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.len(), 2);
        let first = queue.pop().await;
        assert_eq!(first.topic(), "b");
    }

    #[tokio::test]
    async fn reliable_push_times_out_on_full_queue() {
        let queue = DeliveryQueue::new(1, false);
        queue.push(event("a"), true, Duration::from_millis(50)).await.unwrap();
        let result = queue.push(event("b"), true, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(BrokerError::Backpressure)));
    }

    #[tokio::test]
    async fn high_priority_jumps_ahead_when_unordered() {
        let queue = DeliveryQueue::new(10, false);
        let low = Event::builder("a", "urn:x")
            .delivery_options(DeliveryOptions {
                priority: amcp_core::Priority::Low,
                ..Default::default()
            })
            .build()
            .unwrap();
        let high = Event::builder("b", "urn:x")
            .delivery_options(DeliveryOptions {
                priority: amcp_core::Priority::High,
                ..Default::default()
            })
            .build()
            .unwrap();
        queue.push(low, false, Duration::from_millis(10)).await.unwrap();
        queue.push(high, false, Duration::from_millis(10)).await.unwrap();
        let first = queue.pop().await;
        assert_eq!(first.topic(), "b");
    }

    #[tokio::test]
    async fn ordered_subscription_preserves_fifo_regardless_of_priority() {
        let queue = DeliveryQueue::new(10, true);
        let low = Event::builder("a", "urn:x")
            .delivery_options(DeliveryOptions {
                priority: amcp_core::Priority::Low,
                ordered: true,
                ..Default::default()
            })
            .build()
            .unwrap();
        let high = Event::builder("b", "urn:x")
            .delivery_options(DeliveryOptions {
                priority: amcp_core::Priority::High,
                ordered: true,
                ..Default::default()
            })
            .build()
            .unwrap();
        queue.push(low, false, Duration::from_millis(10)).await.unwrap();
        queue.push(high, false, Duration::from_millis(10)).await.unwrap();
        let first = queue.pop().await;
        assert_eq!(first.topic(), "a");
    }
}
