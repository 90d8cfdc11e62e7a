//! `MobilityEngine`: dispatch/clone/retract/migrate/replicate (component
//! C6, §4.6).
//!
//! No single teacher file implements cross-context hand-off; the
//! surrounding idiom (async methods returning `Result<T, MobilityError>`,
//! reuse of `amcp-runtime`'s per-agent transition lock rather than a
//! second one) is carried from
//! `llmspell-agents::lifecycle::state_machine`'s transition-lock pattern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{instrument, warn};

use amcp_broker::EventHandler;
use amcp_cloudevents::{from_cloud_event, to_cloud_event};
use amcp_core::{AgentId, AmcpError, Event, MigrationKind, MigrationRecord};
use amcp_runtime::{AgentContext, BookEntry};

use crate::error::MobilityError;
use crate::nonce::NonceStore;
use crate::token::{MigrationToken, SubscriptionSnapshot};
use crate::transport::{AgentFactory, MobilityTransport};

/// Consulted by `migrate` to pick a destination context when the caller
/// does not name one explicitly (§4.6 "consult destination selector
/// (policy interface external to core)").
#[async_trait]
pub trait DestinationSelector: Send + Sync {
    async fn select(&self, agent_id: &AgentId) -> Option<String>;
}

/// A handler that appends every delivered event to an in-memory buffer
/// instead of invoking any agent logic. Installed in place of an agent's
/// real subscriptions for the brief window between `on_before_migration`
/// and the token being built, so that events addressed to the migrating
/// agent are captured as `queuedEvents` rather than lost or delivered to
/// a handler that is about to move (§4.6 step 2).
struct BufferingHandler {
    buffer: parking_lot::Mutex<Vec<Event>>,
}

#[async_trait]
impl EventHandler for BufferingHandler {
    async fn handle(&self, event: &Event) -> Result<(), AmcpError> {
        self.buffer.lock().push(event.clone());
        Ok(())
    }
}

/// Per-agent migration history, independent of `amcp-runtime`'s lifecycle
/// transition history (§3 "migrationHistory: ordered list").
#[derive(Default)]
struct HistoryStore {
    by_agent: DashMap<AgentId, Vec<MigrationRecord>>,
}

impl HistoryStore {
    fn append(&self, agent_id: AgentId, record: MigrationRecord) {
        self.by_agent.entry(agent_id).or_default().push(record);
    }
}

/// Component C6: owns one context's half of the mobility protocol. Two
/// contexts that want to exchange agents each get their own
/// `MobilityEngine`, sharing a [`MobilityTransport`] (§4.6).
pub struct MobilityEngine {
    context: Arc<AgentContext>,
    context_uri: String,
    transport: Arc<dyn MobilityTransport>,
    factory: Arc<dyn AgentFactory>,
    migration_timeout: Duration,
    nonces: NonceStore,
    history: HistoryStore,
}

impl MobilityEngine {
    /// `migration_timeout` defaults to `context.config().migration_timeout()`
    /// (§6) unless overridden via [`MobilityEngine::with_timeout`].
    #[must_use]
    pub fn new(
        context: Arc<AgentContext>,
        context_uri: impl Into<String>,
        transport: Arc<dyn MobilityTransport>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        let migration_timeout = context.config().migration_timeout();
        Self {
            context,
            context_uri: context_uri.into(),
            transport,
            factory,
            migration_timeout,
            nonces: NonceStore::new(),
            history: HistoryStore::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, migration_timeout: Duration) -> Self {
        self.migration_timeout = migration_timeout;
        self
    }

    #[must_use]
    pub fn context_uri(&self) -> &str {
        &self.context_uri
    }

    #[must_use]
    pub fn migration_history(&self, agent_id: &AgentId) -> Vec<MigrationRecord> {
        self.history
            .by_agent
            .get(agent_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Dispatch `id` from this engine's context to `dest_context_uri`,
    /// following the ACK-based protocol of §4.6 end to end.
    ///
    /// # Errors
    /// [`MobilityError::NotMobile`] if `id` was not registered as mobile;
    /// [`MobilityError::Aborted`] if the hand-off fails or times out
    /// (the agent is restored to `ACTIVE` at the source in that case).
    pub async fn dispatch(&self, id: &AgentId, dest_context_uri: &str) -> Result<(), MobilityError> {
        self.dispatch_as(id, dest_context_uri, MigrationKind::Dispatch).await
    }

    /// D-initiated dispatch back to the source (§4.6 "Retract: D-initiated
    /// dispatch from D back to S"). Identical protocol to
    /// [`MobilityEngine::dispatch`], recorded under its own history kind.
    pub async fn retract(&self, id: &AgentId, source_context_uri: &str) -> Result<(), MobilityError> {
        self.dispatch_as(id, source_context_uri, MigrationKind::Retract).await
    }

    /// Consult `selector` for a preferred destination, otherwise behave
    /// exactly like [`MobilityEngine::dispatch`] (§4.6 `Migrate(options)`).
    ///
    /// # Errors
    /// [`MobilityError::NoDestinationAvailable`] if the selector returns
    /// `None`.
    pub async fn migrate(
        &self,
        id: &AgentId,
        selector: &dyn DestinationSelector,
    ) -> Result<(), MobilityError> {
        let dest = selector
            .select(id)
            .await
            .ok_or_else(|| MobilityError::NoDestinationAvailable(id.to_string()))?;
        self.dispatch_as(id, &dest, MigrationKind::Migrate).await
    }

    #[instrument(skip(self), fields(agent = %id, dest = dest_context_uri, kind = ?kind))]
    async fn dispatch_as(
        &self,
        id: &AgentId,
        dest_context_uri: &str,
        kind: MigrationKind,
    ) -> Result<(), MobilityError> {
        if !self.context.is_mobile(id) {
            return Err(MobilityError::NotMobile(id.to_string()));
        }

        let hook_ok = self.context.begin_migration(id, dest_context_uri).await?;
        if !hook_ok {
            return Err(MobilityError::Aborted {
                agent: id.to_string(),
                dest: dest_context_uri.to_string(),
                reason: "on_before_migration failed or timed out".to_string(),
            });
        }

        let detached = self.context.detach_subscriptions(id);
        let buffer = Arc::new(BufferingHandler { buffer: parking_lot::Mutex::new(Vec::new()) });
        let mut buffer_handles = Vec::with_capacity(detached.len());
        for entry in &detached {
            let handle = self
                .context
                .broker()
                .subscribe(&entry.pattern, buffer.clone(), id.clone(), entry.options)
                .await?;
            buffer_handles.push(handle);
        }

        let state = self.context.save_agent_state(id).await?;
        let queued_events = buffer.buffer.lock().clone();
        for handle in buffer_handles {
            self.context.broker().unsubscribe(handle);
        }

        let queued = match queued_events.iter().map(to_cloud_event).collect::<Result<Vec<_>, _>>() {
            Ok(queued) => queued,
            Err(err) => {
                return self
                    .abort_and_restore(id, dest_context_uri, kind, &detached, queued_events, chrono::Utc::now(), &err.to_string())
                    .await;
            }
        };

        let subscriptions = detached
            .iter()
            .map(|e| SubscriptionSnapshot { pattern: e.pattern.clone(), options: e.options })
            .collect();

        let token = MigrationToken::new(
            id.clone(),
            self.context_uri.clone(),
            dest_context_uri.to_string(),
            state,
            subscriptions,
            queued,
        );
        let started_at = token.started_at;

        match tokio::time::timeout(self.migration_timeout, self.transport.send_token(token)).await {
            Ok(Ok(())) => {
                self.context.complete_migration_source(id).await?;
                self.history.append(
                    id.clone(),
                    MigrationRecord {
                        kind,
                        source_context: self.context_uri.clone(),
                        dest_context: dest_context_uri.to_string(),
                        started_at,
                        completed_at: chrono::Utc::now(),
                        aborted: false,
                    },
                );
                Ok(())
            }
            Ok(Err(err)) => {
                self.abort_and_restore(id, dest_context_uri, kind, &detached, queued_events, started_at, &err.to_string())
                    .await
            }
            Err(_) => {
                self.abort_and_restore(id, dest_context_uri, kind, &detached, queued_events, started_at, "migration timeout elapsed")
                    .await
            }
        }
    }

    /// Shared abort path: restore `ACTIVE`, re-subscribe the original
    /// patterns, replay whatever was buffered directly into the agent's
    /// lane in order (§4.6 "S transitions back MIGRATING -> ACTIVE,
    /// drains queuedEvents locally").
    #[allow(clippy::too_many_arguments)]
    async fn abort_and_restore(
        &self,
        id: &AgentId,
        dest_context_uri: &str,
        kind: MigrationKind,
        detached: &[BookEntry],
        queued_events: Vec<Event>,
        started_at: chrono::DateTime<chrono::Utc>,
        reason: &str,
    ) -> Result<(), MobilityError> {
        self.context.abort_migration(id).await?;
        for entry in detached {
            self.context.subscribe(id, &entry.pattern, entry.options).await?;
        }
        for event in queued_events {
            if let Err(err) = self.context.deliver_directly(id, &event).await {
                warn!(agent = %id, error = %err, "failed to replay buffered event after migration abort");
            }
        }
        self.history.append(
            id.clone(),
            MigrationRecord {
                kind,
                source_context: self.context_uri.clone(),
                dest_context: dest_context_uri.to_string(),
                started_at,
                completed_at: chrono::Utc::now(),
                aborted: true,
            },
        );
        Err(MobilityError::Aborted {
            agent: id.to_string(),
            dest: dest_context_uri.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Clone `id` into `dest_context_uri`, leaving the source instance
    /// running independently (§4.6 `Clone`). The new instance gets a
    /// fresh `AgentID` of the same type; `queuedEvents` is empty since
    /// the source never stops serving the agent, so there is nothing
    /// in flight to buffer (§4.6 "queuedEvents is only replayed at D").
    ///
    /// # Errors
    /// [`MobilityError::NotMobile`] if `id` is not mobile;
    /// [`MobilityError::Aborted`] if the hand-off to `dest_context_uri`
    /// fails.
    #[instrument(skip(self), fields(agent = %id, dest = dest_context_uri))]
    pub async fn clone_agent(
        &self,
        id: &AgentId,
        dest_context_uri: &str,
    ) -> Result<AgentId, MobilityError> {
        if !self.context.is_mobile(id) {
            return Err(MobilityError::NotMobile(id.to_string()));
        }

        let state = self.context.save_agent_state(id).await?;
        let subscriptions = self
            .context
            .subscriptions_of(id)
            .iter()
            .map(|e| SubscriptionSnapshot { pattern: e.pattern.clone(), options: e.options })
            .collect();
        let new_id = AgentId::generate(id.agent_type());

        let token = MigrationToken::new(
            new_id.clone(),
            self.context_uri.clone(),
            dest_context_uri.to_string(),
            state,
            subscriptions,
            vec![],
        );
        let started_at = token.started_at;

        match tokio::time::timeout(self.migration_timeout, self.transport.send_token(token)).await {
            Ok(Ok(())) => {
                self.history.append(
                    new_id.clone(),
                    MigrationRecord {
                        kind: MigrationKind::Clone,
                        source_context: self.context_uri.clone(),
                        dest_context: dest_context_uri.to_string(),
                        started_at,
                        completed_at: chrono::Utc::now(),
                        aborted: false,
                    },
                );
                Ok(new_id)
            }
            Ok(Err(err)) => Err(MobilityError::Aborted {
                agent: new_id.to_string(),
                dest: dest_context_uri.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(MobilityError::Aborted {
                agent: new_id.to_string(),
                dest: dest_context_uri.to_string(),
                reason: "migration timeout elapsed".to_string(),
            }),
        }
    }

    /// Clone `id` to each of `dest_context_uris` independently, reporting
    /// per-target success or failure rather than failing the whole batch
    /// (§4.6 `Replicate(contexts)`).
    pub async fn replicate(
        &self,
        id: &AgentId,
        dest_context_uris: &[String],
    ) -> Vec<Result<AgentId, MobilityError>> {
        let mut results = Vec::with_capacity(dest_context_uris.len());
        for dest in dest_context_uris {
            results.push(self.clone_agent(id, dest).await);
        }
        results
    }

    /// Destination side of the protocol: accept a token transmitted by a
    /// peer engine (§4.6 step 4). Called by a [`MobilityTransport`]
    /// implementation, never directly by application code.
    ///
    /// # Errors
    /// [`MobilityError::RestorationFailed`] if reconstruction, state
    /// restore, subscription re-establishment or `on_after_migration`
    /// fail; in every such case no partial agent is left registered and
    /// no ACK should be considered sent (the caller's `Err` return *is*
    /// the missing ACK).
    #[instrument(skip(self, token), fields(agent = %token.agent_id, source = %token.source))]
    pub async fn receive_token(&self, token: MigrationToken) -> Result<(), MobilityError> {
        if !self.nonces.observe(&token.nonce) {
            // Duplicate delivery of an already-processed token: silently
            // acknowledged, not instantiated twice (§4.6).
            return Ok(());
        }

        let id = token.agent_id.clone();
        let restore = self.restore_from_token(&token).await;

        if let Err(err) = &restore {
            warn!(agent = %id, error = %err, "discarding partially restored agent");
            let _ = self.context.destroy(&id).await;
        }

        restore
    }

    async fn restore_from_token(&self, token: &MigrationToken) -> Result<(), MobilityError> {
        let id = token.agent_id.clone();
        let agent = self.factory.create(&id)?;
        self.context.register_agent_as_migrating(agent)?;
        self.context.load_agent_state(&id, &token.state).await?;

        for ce in &token.queued {
            let event = from_cloud_event(ce)?;
            self.context.deliver_directly(&id, &event).await?;
        }

        for sub in &token.subscriptions {
            self.context.subscribe(&id, &sub.pattern, sub.options).await?;
        }

        let completed = self.context.complete_migration_dest(&id, &token.source).await?;
        if !completed {
            return Err(MobilityError::RestorationFailed(
                id.to_string(),
                "on_after_migration failed or timed out".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use amcp_broker::Broker;
    use amcp_core::{AgentCore, MobileAgent};
    use amcp_runtime::AmcpConfig;

    struct CounterAgent {
        id: AgentId,
        count: AtomicU64,
    }

    #[async_trait]
    impl AgentCore for CounterAgent {
        fn agent_id(&self) -> &AgentId {
            &self.id
        }

        async fn handle_event(&self, _event: &Event) -> Result<(), AmcpError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[async_trait]
    impl MobileAgent for CounterAgent {
        async fn save_state(&self) -> Result<Vec<u8>, AmcpError> {
            Ok(self.count.load(Ordering::SeqCst).to_le_bytes().to_vec())
        }

        async fn load_state(&self, state: &[u8]) -> Result<(), AmcpError> {
            let bytes: [u8; 8] = state.try_into().map_err(|_| AmcpError::validation("bad state"))?;
            self.count.store(u64::from_le_bytes(bytes), Ordering::SeqCst);
            Ok(())
        }
    }

    struct CounterFactory;

    impl AgentFactory for CounterFactory {
        fn create(&self, agent_id: &AgentId) -> Result<Arc<dyn MobileAgent>, MobilityError> {
            Ok(Arc::new(CounterAgent { id: agent_id.clone(), count: AtomicU64::new(0) }))
        }
    }

    async fn new_context() -> Arc<AgentContext> {
        let broker = Broker::builder().build();
        broker.start();
        Arc::new(AgentContext::new(AmcpConfig::default(), broker))
    }

    fn new_engine(
        ctx: Arc<AgentContext>,
        uri: &str,
        transport: Arc<dyn MobilityTransport>,
    ) -> Arc<MobilityEngine> {
        Arc::new(
            MobilityEngine::new(ctx, uri, transport, Arc::new(CounterFactory))
                .with_timeout(Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn s3_dispatch_preserves_state_and_history() {
        let source_ctx = new_context().await;
        let dest_ctx = new_context().await;
        let transport = Arc::new(crate::transport::InProcessTransport::new());

        let source_engine = new_engine(source_ctx.clone(), "urn:context:s", transport.clone());
        let dest_engine = new_engine(dest_ctx.clone(), "urn:context:d", transport.clone());
        transport.register("urn:context:s", &source_engine);
        transport.register("urn:context:d", &dest_engine);

        let id = AgentId::new("c1", "counter");
        let agent = Arc::new(CounterAgent { id: id.clone(), count: AtomicU64::new(0) });
        source_ctx.register_mobile_agent(agent).unwrap();
        source_ctx.activate(&id).await.unwrap();
        source_ctx
            .subscribe(&id, "counter.inc", Default::default())
            .await
            .unwrap();

        for _ in 0..5 {
            source_ctx
                .publish(Event::builder("counter.inc", "urn:agent:producer").build().unwrap())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        source_engine.dispatch(&id, "urn:context:d").await.unwrap();

        assert_eq!(source_ctx.find_agent(&id), None);
        assert_eq!(dest_ctx.find_agent(&id), Some(amcp_core::AgentLifecycle::Active));

        let history = source_engine.migration_history(&id);
        assert_eq!(history.len(), 1);
        assert!(!history[0].aborted);
        assert_eq!(history[0].kind, MigrationKind::Dispatch);
    }

    #[tokio::test]
    async fn s4_clone_runs_independently() {
        let source_ctx = new_context().await;
        let dest_ctx = new_context().await;
        let transport = Arc::new(crate::transport::InProcessTransport::new());

        let source_engine = new_engine(source_ctx.clone(), "urn:context:s", transport.clone());
        let dest_engine = new_engine(dest_ctx.clone(), "urn:context:d", transport.clone());
        transport.register("urn:context:s", &source_engine);
        transport.register("urn:context:d", &dest_engine);

        let id = AgentId::new("c1", "counter");
        let agent = Arc::new(CounterAgent { id: id.clone(), count: AtomicU64::new(0) });
        source_ctx.register_mobile_agent(agent).unwrap();
        source_ctx.activate(&id).await.unwrap();

        let new_id = source_engine.clone_agent(&id, "urn:context:d").await.unwrap();
        assert_ne!(new_id.id(), id.id());
        assert_eq!(new_id.agent_type(), id.agent_type());
        assert_eq!(source_ctx.find_agent(&id), Some(amcp_core::AgentLifecycle::Active));
        assert_eq!(dest_ctx.find_agent(&new_id), Some(amcp_core::AgentLifecycle::Active));
    }

    #[tokio::test]
    async fn dispatch_of_non_mobile_agent_fails_fast() {
        let ctx = new_context().await;
        let transport = Arc::new(crate::transport::InProcessTransport::new());
        let engine = new_engine(ctx.clone(), "urn:context:s", transport);

        struct Plain {
            id: AgentId,
        }
        #[async_trait]
        impl AgentCore for Plain {
            fn agent_id(&self) -> &AgentId {
                &self.id
            }
            async fn handle_event(&self, _event: &Event) -> Result<(), AmcpError> {
                Ok(())
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let id = AgentId::new("p1", "plain");
        ctx.register_agent(Arc::new(Plain { id: id.clone() })).unwrap();
        ctx.activate(&id).await.unwrap();

        let err = engine.dispatch(&id, "urn:context:d").await.unwrap_err();
        assert!(matches!(err, MobilityError::NotMobile(_)));
    }

    #[tokio::test]
    async fn dispatch_with_no_registered_destination_aborts_and_restores() {
        let ctx = new_context().await;
        let transport = Arc::new(crate::transport::InProcessTransport::new());
        let engine = new_engine(ctx.clone(), "urn:context:s", transport);

        let id = AgentId::new("c1", "counter");
        let agent = Arc::new(CounterAgent { id: id.clone(), count: AtomicU64::new(0) });
        ctx.register_mobile_agent(agent).unwrap();
        ctx.activate(&id).await.unwrap();
        ctx.subscribe(&id, "counter.inc", Default::default()).await.unwrap();

        let err = engine.dispatch(&id, "urn:context:nowhere").await.unwrap_err();
        assert!(matches!(err, MobilityError::Aborted { .. }));
        assert_eq!(ctx.find_agent(&id), Some(amcp_core::AgentLifecycle::Active));

        let history = engine.migration_history(&id);
        assert_eq!(history.len(), 1);
        assert!(history[0].aborted);
    }

    #[tokio::test]
    async fn duplicate_nonce_is_silently_acked() {
        let dest_ctx = new_context().await;
        let transport = Arc::new(crate::transport::InProcessTransport::new());
        let dest_engine = new_engine(dest_ctx.clone(), "urn:context:d", transport);

        let id = AgentId::new("c1", "counter");
        let token = MigrationToken::new(
            id.clone(),
            "urn:context:s".to_string(),
            "urn:context:d".to_string(),
            0u64.to_le_bytes().to_vec(),
            vec![],
            vec![],
        );

        dest_engine.receive_token(token.clone()).await.unwrap();
        assert_eq!(dest_ctx.find_agent(&id), Some(amcp_core::AgentLifecycle::Active));

        dest_engine.receive_token(token).await.unwrap();
    }
}
