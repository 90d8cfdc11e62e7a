//! `CapabilityRegistry`: agent-capability advertisement, lookup and
//! TTL-based health (component C7, §4.7).
//!
//! Grounded on `llmspell-agents::registry::discovery::Discovery<R>` for
//! the registry-wraps-a-shared-map shape, generalized to spec.md §4.7's
//! own simpler lookup rule (round-robin over HEALTHY, falling back to
//! SUSPECT in registration order, never DEAD) rather than
//! `discovery.rs`'s relevance-scoring `search`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use amcp_broker::Broker;
use amcp_core::AgentId;

use crate::error::RegistryError;

/// Monotonic registration counter, stamped onto each [`CapabilityRecord`]
/// at `register` time so SUSPECT fallback can honor "registration order"
/// (§4.7) despite `DashMap` giving no stable iteration order. Mirrors the
/// `SEQUENCE_COUNTER` idiom in `amcp-core::event`.
static REGISTRATION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_registration_sequence() -> u64 {
    REGISTRATION_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Health classification of a [`CapabilityRecord`] (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Suspect,
    Dead,
}

/// One agent's capability advertisement (§3 `CapabilityRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub agent_id: AgentId,
    pub capabilities: Vec<String>,
    pub description: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: HealthStatus,
    /// Registration order, not part of the wire-visible record (§3); used
    /// only to break ties among SUSPECT candidates in
    /// [`CapabilityRegistry::find_by_capability`].
    #[serde(skip)]
    sequence: u64,
}

/// Round-robin cursor per capability name, so repeated `find_by_capability`
/// calls spread load across every advertising agent rather than always
/// returning the first match (§4.7 "tie-break ... round-robin").
#[derive(Default)]
struct RoundRobinCursors {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinCursors {
    fn next(&self, capability: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let cursor = self
            .cursors
            .entry(capability.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        cursor.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Component C7: the process-wide capability advertisement table
/// (§4.9 "the subscription book, agent registry, capability registry,
/// and orchestration session table are the only process-wide mutable
/// structures").
pub struct CapabilityRegistry {
    records: DashMap<AgentId, CapabilityRecord>,
    cursors: RoundRobinCursors,
    broker: Broker,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(broker: Broker) -> Self {
        Self {
            records: DashMap::new(),
            cursors: RoundRobinCursors::default(),
            broker,
        }
    }

    /// Advertise `agent_id`'s capabilities, emitting
    /// `registry.agent.registered` (§4.7).
    ///
    /// # Errors
    /// [`RegistryError::AlreadyRegistered`] if `agent_id` is already
    /// advertised; callers that want to update an existing advertisement
    /// should [`CapabilityRegistry::deregister`] first or call
    /// [`CapabilityRegistry::heartbeat`].
    pub async fn register(
        &self,
        agent_id: AgentId,
        capabilities: Vec<String>,
        description: impl Into<String>,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Result<(), RegistryError> {
        if self.records.contains_key(&agent_id) {
            return Err(RegistryError::AlreadyRegistered(agent_id.to_string()));
        }
        let record = CapabilityRecord {
            agent_id: agent_id.clone(),
            capabilities,
            description: description.into(),
            parameters,
            last_heartbeat: Utc::now(),
            status: HealthStatus::Healthy,
            sequence: next_registration_sequence(),
        };
        self.records.insert(agent_id.clone(), record);
        self.emit("registry.agent.registered", &agent_id).await;
        Ok(())
    }

    /// Withdraw `agent_id`'s advertisement (§4.7 `deregister`).
    ///
    /// # Errors
    /// [`RegistryError::NotRegistered`] if `agent_id` was never (or no
    /// longer) advertised.
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        self.records
            .remove(agent_id)
            .ok_or_else(|| RegistryError::NotRegistered(agent_id.to_string()))?;
        self.emit("registry.agent.removed", agent_id).await;
        Ok(())
    }

    /// Refresh `agent_id`'s `lastHeartbeat`, reviving it to `HEALTHY` if
    /// it had degraded to `SUSPECT` (§4.7 `heartbeat`).
    ///
    /// # Errors
    /// [`RegistryError::NotRegistered`] if `agent_id` was never (or no
    /// longer) advertised.
    pub fn heartbeat(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        let mut record = self
            .records
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotRegistered(agent_id.to_string()))?;
        record.last_heartbeat = Utc::now();
        record.status = HealthStatus::Healthy;
        Ok(())
    }

    /// Find an agent advertising `capability`, round-robining across
    /// `HEALTHY` records and falling back to `SUSPECT` records in
    /// registration order if none are `HEALTHY` (§4.7, §8 item 7: a
    /// record older than `2x heartbeatTimeout` is never returned, which
    /// holds here since such a record has already been swept to `DEAD`
    /// and removed by the time this is called).
    ///
    /// # Errors
    /// [`RegistryError::CapabilityNotFound`] if no `HEALTHY`/`SUSPECT`
    /// record advertises `capability`.
    pub fn find_by_capability(&self, capability: &str) -> Result<AgentId, RegistryError> {
        let mut healthy: Vec<(u64, AgentId)> = Vec::new();
        let mut suspect: Vec<(u64, AgentId)> = Vec::new();
        for entry in &self.records {
            if !entry.capabilities.iter().any(|c| c == capability) {
                continue;
            }
            match entry.status {
                HealthStatus::Healthy => healthy.push((entry.sequence, entry.agent_id.clone())),
                HealthStatus::Suspect => suspect.push((entry.sequence, entry.agent_id.clone())),
                HealthStatus::Dead => {}
            }
        }
        // Registration order (§4.7): sort by the sequence stamped at
        // `register` time, since `DashMap` iteration order is unstable.
        healthy.sort_by_key(|(sequence, _)| *sequence);
        suspect.sort_by_key(|(sequence, _)| *sequence);
        let healthy: Vec<AgentId> = healthy.into_iter().map(|(_, id)| id).collect();
        let suspect: Vec<AgentId> = suspect.into_iter().map(|(_, id)| id).collect();

        let candidates = if !healthy.is_empty() { &healthy } else { &suspect };
        if candidates.is_empty() {
            return Err(RegistryError::CapabilityNotFound(capability.to_string()));
        }
        let idx = self.cursors.next(capability, candidates.len());
        Ok(candidates[idx].clone())
    }

    /// All current advertisements, in no particular order (§4.7 `list`).
    #[must_use]
    pub fn list(&self) -> Vec<CapabilityRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    #[must_use]
    pub fn lookup(&self, agent_id: &AgentId) -> Option<CapabilityRecord> {
        self.records.get(agent_id).map(|e| e.value().clone())
    }

    /// One health-sweep pass: demotes stale `HEALTHY` records to
    /// `SUSPECT`, removes records stale past `2x heartbeatTimeout`
    /// (§4.7). Called on an interval by [`crate::health::HealthMonitor`].
    pub async fn sweep(&self, heartbeat_timeout: chrono::Duration) {
        let now = Utc::now();
        let mut to_remove = Vec::new();
        let mut to_demote = Vec::new();
        for entry in &self.records {
            let age = now - entry.last_heartbeat;
            if age > heartbeat_timeout * 2 {
                to_remove.push(entry.agent_id.clone());
            } else if age > heartbeat_timeout && entry.status == HealthStatus::Healthy {
                to_demote.push(entry.agent_id.clone());
            }
        }
        for agent_id in to_demote {
            if let Some(mut record) = self.records.get_mut(&agent_id) {
                record.status = HealthStatus::Suspect;
            }
            self.emit("registry.agent.unhealthy", &agent_id).await;
        }
        for agent_id in to_remove {
            self.records.remove(&agent_id);
            self.emit("registry.agent.removed", &agent_id).await;
        }
    }

    async fn emit(&self, topic: &str, agent_id: &AgentId) {
        if let Ok(event) = amcp_core::Event::builder(topic, "urn:amcp:registry")
            .correlation_id(agent_id.to_string())
            .json_data(serde_json::json!({ "agent_id": agent_id.to_string() }))
            .build()
        {
            let _ = self.broker.publish_system(event).await;
        }
    }
}

#[must_use]
pub fn shared(broker: Broker) -> Arc<CapabilityRegistry> {
    Arc::new(CapabilityRegistry::new(broker))
}

#[cfg(test)]
impl CapabilityRegistry {
    /// Back-date `agent_id`'s `lastHeartbeat` by `age`, for exercising
    /// [`CapabilityRegistry::sweep`]/[`crate::health::HealthMonitor`]
    /// without a real clock wait.
    pub fn age_for_test(&self, agent_id: &AgentId, age: chrono::Duration) {
        if let Some(mut record) = self.records.get_mut(agent_id) {
            record.last_heartbeat = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn running_registry() -> CapabilityRegistry {
        let broker = Broker::builder().build();
        broker.start();
        CapabilityRegistry::new(broker)
    }

    #[tokio::test]
    async fn register_then_find_by_capability() {
        let registry = running_registry().await;
        let id = AgentId::new("a1", "weather");
        registry
            .register(id.clone(), vec!["forecast".to_string()], "weather agent", HashMap::new())
            .await
            .unwrap();

        let found = registry.find_by_capability("forecast").unwrap();
        assert_eq!(found, id);
    }

    #[tokio::test]
    async fn find_by_capability_round_robins_across_healthy() {
        let registry = running_registry().await;
        let a = AgentId::new("a1", "weather");
        let b = AgentId::new("a2", "weather");
        registry.register(a.clone(), vec!["forecast".to_string()], "a", HashMap::new()).await.unwrap();
        registry.register(b.clone(), vec!["forecast".to_string()], "b", HashMap::new()).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            seen.insert(registry.find_by_capability("forecast").unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn suspect_fallback_honors_registration_order() {
        let registry = running_registry().await;
        // Register in reverse-of-lexicographic id order so a by-id sort
        // would disagree with registration order.
        let z = AgentId::new("z-first-registered", "weather");
        let a = AgentId::new("a-second-registered", "weather");
        registry.register(z.clone(), vec!["forecast".to_string()], "z", HashMap::new()).await.unwrap();
        registry.register(a.clone(), vec!["forecast".to_string()], "a", HashMap::new()).await.unwrap();
        registry.records.get_mut(&z).unwrap().status = HealthStatus::Suspect;
        registry.records.get_mut(&a).unwrap().status = HealthStatus::Suspect;

        assert_eq!(registry.find_by_capability("forecast").unwrap(), z);
    }

    #[tokio::test]
    async fn unknown_capability_is_not_found() {
        let registry = running_registry().await;
        let err = registry.find_by_capability("ghost").unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityNotFound(_)));
    }

    #[tokio::test]
    async fn heartbeat_revives_suspect_record() {
        let registry = running_registry().await;
        let id = AgentId::new("a1", "weather");
        registry.register(id.clone(), vec!["forecast".to_string()], "a", HashMap::new()).await.unwrap();
        registry.records.get_mut(&id).unwrap().status = HealthStatus::Suspect;

        registry.heartbeat(&id).unwrap();
        assert_eq!(registry.lookup(&id).unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn sweep_demotes_then_removes_stale_records() {
        let registry = running_registry().await;
        let id = AgentId::new("a1", "weather");
        registry.register(id.clone(), vec!["forecast".to_string()], "a", HashMap::new()).await.unwrap();
        registry.records.get_mut(&id).unwrap().last_heartbeat = Utc::now() - chrono::Duration::seconds(31);

        registry.sweep(chrono::Duration::seconds(30)).await;
        assert_eq!(registry.lookup(&id).unwrap().status, HealthStatus::Suspect);

        registry.records.get_mut(&id).unwrap().last_heartbeat = Utc::now() - chrono::Duration::seconds(61);
        registry.sweep(chrono::Duration::seconds(30)).await;
        assert!(registry.lookup(&id).is_none());
    }

    #[tokio::test]
    async fn dead_capability_not_returned_even_if_present() {
        let registry = running_registry().await;
        let id = AgentId::new("a1", "weather");
        registry.register(id.clone(), vec!["forecast".to_string()], "a", HashMap::new()).await.unwrap();
        registry.records.get_mut(&id).unwrap().status = HealthStatus::Dead;

        let err = registry.find_by_capability("forecast").unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityNotFound(_)));
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let registry = running_registry().await;
        let id = AgentId::new("a1", "weather");
        registry.register(id.clone(), vec![], "a", HashMap::new()).await.unwrap();
        let err = registry.register(id, vec![], "a", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }
}
