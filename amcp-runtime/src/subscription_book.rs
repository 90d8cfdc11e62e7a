//! The per-agent subscription book (§4.5 "Scoped acquisition of
//! subscriptions").
//!
//! Grounded on the DashMap-registry idiom in
//! `llmspell-events::bus::EventBus`, specialized to the invariant §8
//! item 2 demands: "the set of active subscriptions is exactly those
//! created via A's context calls since its last `onActivate` and not
//! explicitly unsubscribed; after deactivation the set is empty."
//!
//! Every subscription created while an agent is `ACTIVE` is tracked
//! here; exiting `ACTIVE` by any path removes the whole set from the
//! broker in one call, which is a safe over-approximation of "auto
//! release the ones created in `onActivate`" since the book never lets a
//! subscription survive past its owning agent's active lifetime anyway.

use dashmap::DashMap;

use amcp_broker::{SubscriptionHandle, SubscriptionOptions};
use amcp_core::AgentId;

/// One subscription owned by an agent: the broker handle plus enough to
/// reconstruct it elsewhere (used by `amcp-mobility` to snapshot and
/// re-establish an agent's subscriptions across a hand-off, §4.6 step 4
/// "re-establish subscriptions").
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub handle: SubscriptionHandle,
    pub pattern: String,
    pub options: SubscriptionOptions,
}

#[derive(Default)]
pub struct SubscriptionBook {
    by_agent: DashMap<AgentId, Vec<BookEntry>>,
}

impl SubscriptionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        agent_id: AgentId,
        handle: SubscriptionHandle,
        pattern: String,
        options: SubscriptionOptions,
    ) {
        self.by_agent
            .entry(agent_id)
            .or_default()
            .push(BookEntry { handle, pattern, options });
    }

    /// Remove and return every entry owned by `agent_id` (§4.5 "the
    /// subscription book guarantees no leak").
    pub fn take_all(&self, agent_id: &AgentId) -> Vec<BookEntry> {
        self.by_agent
            .remove(agent_id)
            .map(|(_, entries)| entries)
            .unwrap_or_default()
    }

    /// Read-only snapshot of `agent_id`'s current subscriptions, without
    /// removing them (used by `clone`, which leaves the source agent's
    /// subscriptions untouched, §4.6).
    #[must_use]
    pub fn snapshot(&self, agent_id: &AgentId) -> Vec<BookEntry> {
        self.by_agent
            .get(agent_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count_for(&self, agent_id: &AgentId) -> usize {
        self.by_agent.get(agent_id).map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amcp_broker::{Broker, EventHandler, SubscriptionOptions};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _event: &amcp_core::Event) -> Result<(), amcp_core::AmcpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn take_all_empties_the_set() {
        let broker = Broker::builder().build();
        broker.start();
        let book = SubscriptionBook::new();
        let agent = AgentId::new("a1", "weather");

        let h1 = broker
            .subscribe("a.b", Arc::new(NoopHandler), agent.clone(), SubscriptionOptions::default())
            .await
            .unwrap();
        let h2 = broker
            .subscribe("c.d", Arc::new(NoopHandler), agent.clone(), SubscriptionOptions::default())
            .await
            .unwrap();

        book.record(agent.clone(), h1, "a.b".to_string(), SubscriptionOptions::default());
        book.record(agent.clone(), h2, "c.d".to_string(), SubscriptionOptions::default());
        assert_eq!(book.count_for(&agent), 2);
        let snapshot = book.snapshot(&agent);
        assert_eq!(snapshot.len(), 2);
        let taken = book.take_all(&agent);
        assert_eq!(taken.len(), 2);
        assert_eq!(book.count_for(&agent), 0);
    }
}
