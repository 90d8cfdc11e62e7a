//! `AgentContext` (component C4, §4.4): the host boundary an agent lives
//! behind. Ties the [`AgentStateMachine`] and [`SubscriptionBook`]
//! together with a [`Broker`] handle so that registration, lifecycle
//! transitions and subscriptions all go through one place.
//!
//! Grounded on `llmspell-agents::lifecycle::manager::LifecycleManager`,
//! which plays the same coordinating role over the teacher's state
//! machine and event bus; the per-agent handler serialization (§4.4
//! "handlers of the same agent never run concurrently") is new here
//! since the teacher dispatches hooks directly rather than through a
//! shared event bus subscription.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use amcp_broker::{Broker, EventHandler, SubscriptionHandle, SubscriptionOptions};
use amcp_core::{AgentCore, AgentId, AgentLifecycle, AmcpError, Event, MobileAgent};

use crate::config::AmcpConfig;
use crate::error::LifecycleError;
use crate::state_machine::{AgentStateMachine, TransitionRecord};
use crate::subscription_book::SubscriptionBook;

/// Everything the context keeps about one registered agent.
struct AgentRecord {
    agent: Arc<dyn AgentCore>,
    /// Present only for agents registered through
    /// [`AgentContext::register_mobile_agent`]; gives `amcp-mobility` a
    /// handle to `save_state`/`load_state` without the context needing to
    /// downcast a `dyn Any` to a trait object (§9 "capability trait set").
    mobile: Option<Arc<dyn MobileAgent>>,
    state_machine: AgentStateMachine,
    /// Serializes `handle_event` calls for this agent (§4.4 per-agent
    /// execution lane); registration and lifecycle hooks do not go
    /// through this lock since they're already serialized by the state
    /// machine's own `transition_lock`.
    handler_lock: AsyncMutex<()>,
}

/// Bridges [`AgentCore::handle_event`] into [`amcp_broker::EventHandler`],
/// holding the per-agent lock for the duration of the call.
struct AgentEventHandler {
    record: Arc<AgentRecord>,
}

#[async_trait]
impl EventHandler for AgentEventHandler {
    async fn handle(&self, event: &Event) -> Result<(), AmcpError> {
        let _guard = self.record.handler_lock.lock().await;
        self.record.agent.handle_event(event).await
    }
}

/// The host boundary for a population of agents sharing one [`Broker`]
/// (§4.4 "Context"). Multiple contexts may share a broker (e.g. one per
/// logical node in a test topology); each context owns its own agent
/// registrations and subscription book-keeping.
pub struct AgentContext {
    config: AmcpConfig,
    broker: Broker,
    agents: DashMap<AgentId, Arc<AgentRecord>>,
    subscriptions: SubscriptionBook,
}

impl AgentContext {
    #[must_use]
    pub fn new(config: AmcpConfig, broker: Broker) -> Self {
        Self {
            config,
            broker,
            agents: DashMap::new(),
            subscriptions: SubscriptionBook::new(),
        }
    }

    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    #[must_use]
    pub fn config(&self) -> &AmcpConfig {
        &self.config
    }

    /// Register an agent in `INACTIVE` state (§4.4 `registerAgent`).
    ///
    /// # Errors
    /// `AlreadyRegistered` if `agent.agent_id()` is already known to this
    /// context.
    pub fn register_agent(&self, agent: Arc<dyn AgentCore>) -> Result<AgentId, LifecycleError> {
        self.insert_record(agent, None, AgentLifecycle::Inactive)
    }

    /// Register an agent that also implements [`MobileAgent`], so
    /// `amcp-mobility` can later `save_state`/`load_state` it (§4.6).
    ///
    /// # Errors
    /// `AlreadyRegistered` if `agent.agent_id()` is already known.
    pub fn register_mobile_agent(
        &self,
        agent: Arc<dyn MobileAgent>,
    ) -> Result<AgentId, LifecycleError> {
        let core: Arc<dyn AgentCore> = agent.clone();
        self.insert_record(core, Some(agent), AgentLifecycle::Inactive)
    }

    /// Register an incoming migrated agent directly as `MIGRATING` rather
    /// than `INACTIVE` (§4.6 step 4: "register as MIGRATING").
    ///
    /// # Errors
    /// `AlreadyRegistered` if `agent.agent_id()` is already known.
    pub fn register_agent_as_migrating(
        &self,
        agent: Arc<dyn MobileAgent>,
    ) -> Result<AgentId, LifecycleError> {
        let core: Arc<dyn AgentCore> = agent.clone();
        self.insert_record(core, Some(agent), AgentLifecycle::Migrating)
    }

    fn insert_record(
        &self,
        agent: Arc<dyn AgentCore>,
        mobile: Option<Arc<dyn MobileAgent>>,
        initial_state: AgentLifecycle,
    ) -> Result<AgentId, LifecycleError> {
        let id = agent.agent_id().clone();
        let agent_id_str = id.to_string();
        let record = Arc::new(AgentRecord {
            agent,
            mobile,
            state_machine: AgentStateMachine::with_initial_state(agent_id_str.clone(), initial_state),
            handler_lock: AsyncMutex::new(()),
        });
        match self.agents.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LifecycleError::AlreadyRegistered(agent_id_str))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(id)
            }
        }
    }

    fn record_for(&self, id: &AgentId) -> Result<Arc<AgentRecord>, LifecycleError> {
        self.agents
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| LifecycleError::AgentNotFound(id.to_string()))
    }

    /// Drive `INACTIVE -> ACTIVE`, firing `on_activate` (§4.4 `activate`).
    /// A hook failure lands the agent in `FAILED` rather than propagating
    /// as an error to the caller (§4.5); callers that need to know should
    /// inspect [`AgentContext::lifecycle_of`] afterward.
    ///
    /// # Errors
    /// `AgentNotFound` if `id` was never registered, `IllegalTransition`
    /// if the agent is not currently `INACTIVE`.
    #[instrument(skip(self), fields(agent = %id))]
    pub async fn activate(&self, id: &AgentId) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        let agent = record.agent.clone();
        let completed = record
            .state_machine
            .transition(
                AgentLifecycle::Active,
                self.config.callback_timeout(),
                move || async move { agent.on_activate().await },
                false,
            )
            .await?;
        if !completed {
            self.emit_failure(id, "on_activate failed or timed out").await;
        }
        Ok(())
    }

    /// Drive the current state `-> INACTIVE`, firing `on_deactivate` and
    /// releasing every subscription this agent opened through this
    /// context since its last activation (§4.4 `deactivate`, §8 item 2).
    /// The transition completes even if the hook fails (§4.5).
    ///
    /// # Errors
    /// `AgentNotFound` if `id` was never registered, `IllegalTransition`
    /// if the agent is not currently `ACTIVE`/`SUSPENDED`.
    #[instrument(skip(self), fields(agent = %id))]
    pub async fn deactivate(&self, id: &AgentId) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        let agent = record.agent.clone();
        let completed = record
            .state_machine
            .transition(
                AgentLifecycle::Inactive,
                self.config.callback_timeout(),
                move || async move { agent.on_deactivate().await },
                true,
            )
            .await?;
        if !completed {
            warn!(agent = %id, "on_deactivate failed; transition completed anyway");
        }
        self.release_subscriptions(id);
        Ok(())
    }

    /// Terminally destroy an agent: fires `on_destroy`, releases its
    /// subscriptions and removes it from this context (§4.4 `destroy`).
    /// Like `deactivate`, completes even if the hook fails.
    ///
    /// # Errors
    /// `AgentNotFound` if `id` was never registered.
    #[instrument(skip(self), fields(agent = %id))]
    pub async fn destroy(&self, id: &AgentId) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        let agent = record.agent.clone();
        let completed = record
            .state_machine
            .transition(
                AgentLifecycle::Destroyed,
                self.config.callback_timeout(),
                move || async move { agent.on_destroy().await },
                true,
            )
            .await?;
        if !completed {
            warn!(agent = %id, "on_destroy failed; agent destroyed anyway");
        }
        self.release_subscriptions(id);
        self.agents.remove(id);
        Ok(())
    }

    fn release_subscriptions(&self, id: &AgentId) {
        for entry in self.subscriptions.take_all(id) {
            self.broker.unsubscribe(entry.handle);
        }
    }

    /// Remove and return `id`'s current subscriptions (pattern + options,
    /// not just the opaque handle), unsubscribing each from the broker.
    /// Used by `amcp-mobility` at the start of a dispatch/migrate hand-off
    /// (§4.6 step 1-2: the source's subscriptions are part of the
    /// `MigrationToken`, and must stop delivering locally once the agent
    /// is `MIGRATING`).
    pub fn detach_subscriptions(&self, id: &AgentId) -> Vec<crate::subscription_book::BookEntry> {
        let entries = self.subscriptions.take_all(id);
        for entry in &entries {
            self.broker.unsubscribe(entry.handle);
        }
        entries
    }

    /// Read-only snapshot of `id`'s current subscriptions, left intact
    /// (used by `clone`, which does not detach the source agent, §4.6).
    #[must_use]
    pub fn subscriptions_of(&self, id: &AgentId) -> Vec<crate::subscription_book::BookEntry> {
        self.subscriptions.snapshot(id)
    }

    async fn emit_failure(&self, id: &AgentId, reason: &str) {
        if let Ok(event) = Event::builder("system.agent.failed", "urn:amcp:context")
            .json_data(serde_json::json!({ "agent_id": id.to_string(), "reason": reason }))
            .build()
        {
            let _ = self.broker.publish_system(event).await;
        }
    }

    /// Whether `id` was registered with mobility support (§4.6).
    #[must_use]
    pub fn is_mobile(&self, id: &AgentId) -> bool {
        self.agents.get(id).is_some_and(|r| r.mobile.is_some())
    }

    fn mobile_of(&self, id: &AgentId) -> Result<Arc<dyn MobileAgent>, LifecycleError> {
        let record = self.record_for(id)?;
        record
            .mobile
            .clone()
            .ok_or_else(|| LifecycleError::Broker(amcp_broker::BrokerError::Validation(format!(
                "agent {id} was not registered as mobile"
            ))))
    }

    /// Capture this agent's state for a migration token (§4.6 step 2).
    ///
    /// # Errors
    /// `AgentNotFound`, or a validation error if `id` is not mobile.
    pub async fn save_agent_state(&self, id: &AgentId) -> Result<Vec<u8>, LifecycleError> {
        let agent = self.mobile_of(id)?;
        Ok(agent.save_state().await?)
    }

    /// Restore state captured by [`AgentContext::save_agent_state`] onto
    /// a freshly constructed, already-registered instance (§4.6 step 4).
    ///
    /// # Errors
    /// `AgentNotFound`, or a validation error if `id` is not mobile.
    pub async fn load_agent_state(&self, id: &AgentId, state: &[u8]) -> Result<(), LifecycleError> {
        let agent = self.mobile_of(id)?;
        Ok(agent.load_state(state).await?)
    }

    /// Source side, step 1: `ACTIVE -> MIGRATING`, firing
    /// `on_before_migration(dest)` (§4.6).
    ///
    /// # Errors
    /// `AgentNotFound`/`IllegalTransition` as usual; a failed hook still
    /// lands the agent in `FAILED` rather than aborting silently, since
    /// the hook-failure contract is shared with `activate`/`deactivate`.
    pub async fn begin_migration(
        &self,
        id: &AgentId,
        dest_context_uri: &str,
    ) -> Result<bool, LifecycleError> {
        let record = self.record_for(id)?;
        let agent = record.agent.clone();
        let dest = dest_context_uri.to_string();
        record
            .state_machine
            .transition(
                AgentLifecycle::Migrating,
                self.config.callback_timeout(),
                move || async move { agent.on_before_migration(&dest).await },
                false,
            )
            .await
    }

    /// Source side, failure path: `MIGRATING -> ACTIVE` with no hook
    /// (§4.6 "S transitions back MIGRATING -> ACTIVE").
    ///
    /// # Errors
    /// `AgentNotFound`/`IllegalTransition`.
    pub async fn abort_migration(&self, id: &AgentId) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        record
            .state_machine
            .transition(AgentLifecycle::Active, self.config.callback_timeout(), || async { Ok(()) }, true)
            .await?;
        Ok(())
    }

    /// Source side, success path, step 5: `MIGRATING -> INACTIVE`, release
    /// subscriptions, remove the local instance (§4.6).
    ///
    /// # Errors
    /// `AgentNotFound`/`IllegalTransition`.
    pub async fn complete_migration_source(&self, id: &AgentId) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        record
            .state_machine
            .transition(AgentLifecycle::Inactive, self.config.callback_timeout(), || async { Ok(()) }, true)
            .await?;
        self.release_subscriptions(id);
        self.agents.remove(id);
        Ok(())
    }

    /// Destination side, step 4 tail: fire `on_after_migration(source)`
    /// and transition `MIGRATING -> ACTIVE` (§4.6).
    ///
    /// # Errors
    /// `AgentNotFound`/`IllegalTransition`.
    pub async fn complete_migration_dest(
        &self,
        id: &AgentId,
        source_context_uri: &str,
    ) -> Result<bool, LifecycleError> {
        let record = self.record_for(id)?;
        let agent = record.agent.clone();
        let source = source_context_uri.to_string();
        record
            .state_machine
            .transition(
                AgentLifecycle::Active,
                self.config.callback_timeout(),
                move || async move { agent.on_after_migration(&source).await },
                false,
            )
            .await
    }

    /// Deliver one event directly to `id`'s handler, bypassing the broker
    /// (§4.6 step 4: "replay `queuedEvents` into its lane in original
    /// order" happens before subscriptions are re-established, so there
    /// is no broker route to use yet).
    ///
    /// # Errors
    /// `AgentNotFound`.
    pub async fn deliver_directly(&self, id: &AgentId, event: &Event) -> Result<(), LifecycleError> {
        let record = self.record_for(id)?;
        let _guard = record.handler_lock.lock().await;
        record.agent.handle_event(event).await?;
        Ok(())
    }

    /// Subscribe `id` to `pattern`, routing matching events through its
    /// `handle_event`, serialized against any other in-flight call for
    /// the same agent (§4.4 per-agent lane).
    ///
    /// # Errors
    /// `AgentNotFound` if `id` was never registered; broker-side
    /// validation/policy errors surface via `LifecycleError::Broker`.
    pub async fn subscribe(
        &self,
        id: &AgentId,
        pattern: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, LifecycleError> {
        let record = self.record_for(id)?;
        let handler = Arc::new(AgentEventHandler { record });
        let handle = self
            .broker
            .subscribe(pattern, handler, id.clone(), options)
            .await?;
        self.subscriptions
            .record(id.clone(), handle, pattern.to_string(), options);
        Ok(handle)
    }

    /// Publish on behalf of any caller (§4.4 `publish`); the context does
    /// not attribute sender identity beyond what the event itself carries.
    ///
    /// # Errors
    /// Whatever [`Broker::publish`] returns.
    pub async fn publish(&self, event: Event) -> Result<(), LifecycleError> {
        self.broker.publish(event).await.map_err(LifecycleError::from)
    }

    #[must_use]
    pub fn find_agent(&self, id: &AgentId) -> Option<AgentLifecycle> {
        self.agents.get(id).map(|r| r.state_machine.current())
    }

    #[must_use]
    pub fn list_agents(&self) -> Vec<AgentId> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn history_of(&self, id: &AgentId) -> Vec<TransitionRecord> {
        self.agents
            .get(id)
            .map(|r| r.state_machine.history())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingAgent {
        id: AgentId,
        received: StdMutex<Vec<String>>,
        activations: AtomicU32,
        fail_activate: bool,
    }

    #[async_trait]
    impl AgentCore for RecordingAgent {
        fn agent_id(&self) -> &AgentId {
            &self.id
        }

        async fn on_activate(&self) -> Result<(), AmcpError> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.fail_activate {
                Err(AmcpError::validation("refusing to activate"))
            } else {
                Ok(())
            }
        }

        async fn handle_event(&self, event: &Event) -> Result<(), AmcpError> {
            self.received.lock().unwrap().push(event.topic().to_string());
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    async fn running_context() -> AgentContext {
        let broker = Broker::builder().build();
        broker.start();
        AgentContext::new(AmcpConfig::default(), broker)
    }

    #[tokio::test]
    async fn register_activate_subscribe_deliver() {
        let ctx = running_context().await;
        let id = AgentId::new("a1", "weather");
        let agent = Arc::new(RecordingAgent {
            id: id.clone(),
            received: StdMutex::new(Vec::new()),
            activations: AtomicU32::new(0),
            fail_activate: false,
        });

        ctx.register_agent(agent.clone()).unwrap();
        ctx.activate(&id).await.unwrap();
        assert_eq!(ctx.find_agent(&id), Some(AgentLifecycle::Active));

        ctx.subscribe(&id, "weather.*", SubscriptionOptions::default())
            .await
            .unwrap();

        let event = Event::builder("weather.alert", "urn:agent:producer").build().unwrap();
        ctx.publish(event).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(agent.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activate_failure_lands_in_failed_but_does_not_error() {
        let ctx = running_context().await;
        let id = AgentId::new("a1", "weather");
        let agent = Arc::new(RecordingAgent {
            id: id.clone(),
            received: StdMutex::new(Vec::new()),
            activations: AtomicU32::new(0),
            fail_activate: true,
        });
        ctx.register_agent(agent).unwrap();
        ctx.activate(&id).await.unwrap();
        assert_eq!(ctx.find_agent(&id), Some(AgentLifecycle::Failed));
    }

    #[tokio::test]
    async fn deactivate_releases_subscriptions() {
        let ctx = running_context().await;
        let id = AgentId::new("a1", "weather");
        let agent = Arc::new(RecordingAgent {
            id: id.clone(),
            received: StdMutex::new(Vec::new()),
            activations: AtomicU32::new(0),
            fail_activate: false,
        });
        ctx.register_agent(agent.clone()).unwrap();
        ctx.activate(&id).await.unwrap();
        ctx.subscribe(&id, "weather.*", SubscriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.broker().subscription_count(), 1);

        ctx.deactivate(&id).await.unwrap();
        assert_eq!(ctx.find_agent(&id), Some(AgentLifecycle::Inactive));
        assert_eq!(ctx.broker().subscription_count(), 0);
    }

    #[tokio::test]
    async fn destroy_removes_agent_from_context() {
        let ctx = running_context().await;
        let id = AgentId::new("a1", "weather");
        let agent = Arc::new(RecordingAgent {
            id: id.clone(),
            received: StdMutex::new(Vec::new()),
            activations: AtomicU32::new(0),
            fail_activate: false,
        });
        ctx.register_agent(agent).unwrap();
        ctx.destroy(&id).await.unwrap();
        assert_eq!(ctx.find_agent(&id), None);
        assert!(!ctx.list_agents().contains(&id));
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let ctx = running_context().await;
        let id = AgentId::new("a1", "weather");
        let agent = Arc::new(RecordingAgent {
            id: id.clone(),
            received: StdMutex::new(Vec::new()),
            activations: AtomicU32::new(0),
            fail_activate: false,
        });
        ctx.register_agent(agent.clone()).unwrap();
        let err = ctx.register_agent(agent).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn activate_unregistered_agent_fails() {
        let ctx = running_context().await;
        let err = ctx.activate(&AgentId::new("ghost", "weather")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AgentNotFound(_)));
    }
}
