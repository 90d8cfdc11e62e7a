//! The broker: subscription registry, fan-out, QoS enforcement and
//! dead-letter routing (component C3, §4.3).
//!
//! Grounded on `llmspell-events::bus::EventBus`/`EventBusBuilder` for the
//! overall shape (DashMap-indexed subscriptions, builder-constructed,
//! optional pluggable hook), generalized with the QoS/backpressure/DLQ
//! machinery `bus.rs` does not have.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use amcp_cloudevents::{from_cloud_event, to_cloud_event, CloudEventJson};
use amcp_core::{reserved_topics, AgentId, AmcpError, Event};
use amcp_topic::{Pattern, SubscriptionIndex};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::handler::{EventHandler, SecurityInterceptor};
use crate::metrics::{BrokerMetrics, BrokerMetricsSnapshot};
use crate::queue::DeliveryQueue;

/// Opaque handle returned by [`Broker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Subscription-level QoS defaults, overridden by per-event
/// `deliveryOptions` (§4.3 "QoS selection precedence").
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionOptions {
    pub ordered: bool,
    pub reliable: bool,
}

struct SubscriptionEntry {
    id: u64,
    topic_handle: amcp_topic::SubscriptionHandle,
    pattern: Pattern,
    agent_id: AgentId,
    handler: Arc<dyn EventHandler>,
    options: SubscriptionOptions,
    queue: Arc<DeliveryQueue>,
    cancel: CancellationToken,
}

struct Inner {
    config: BrokerConfig,
    index: RwLock<SubscriptionIndex<u64>>,
    subscriptions: DashMap<u64, Arc<SubscriptionEntry>>,
    agent_index: DashMap<AgentId, Vec<u64>>,
    next_id: AtomicU64,
    metrics: BrokerMetrics,
    running: AtomicBool,
    security: RwLock<Option<Arc<dyn SecurityInterceptor>>>,
}

/// The in-process broker (§6 "the in-process transport is the reference
/// implementation").
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

/// Constructs a [`Broker`] (mirrors `EventBusBuilder` in
/// `llmspell-events::bus`).
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    security: Option<Arc<dyn SecurityInterceptor>>,
}

impl BrokerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
            security: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn security_interceptor(mut self, interceptor: Arc<dyn SecurityInterceptor>) -> Self {
        self.security = Some(interceptor);
        self
    }

    #[must_use]
    pub fn build(self) -> Broker {
        Broker {
            inner: Arc::new(Inner {
                config: self.config,
                index: RwLock::new(SubscriptionIndex::new()),
                subscriptions: DashMap::new(),
                agent_index: DashMap::new(),
                next_id: AtomicU64::new(0),
                metrics: BrokerMetrics::default(),
                running: AtomicBool::new(false),
                security: RwLock::new(self.security),
            }),
        }
    }
}

impl Broker {
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Start accepting publishes (§4.3 `start()`).
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);
    }

    /// Stop the broker: waits for in-flight deliveries up to the
    /// configured drain timeout, then cancels remaining subscription
    /// workers (§4.3 `stop()`, §5 "Broker drain on stop: 10s").
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let deadline = Instant::now() + self.inner.config.drain_timeout;
        loop {
            let all_drained = self
                .inner
                .subscriptions
                .iter()
                .all(|entry| entry.queue.is_empty());
            if all_drained || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for entry in self.inner.subscriptions.iter() {
            entry.cancel.cancel();
        }
    }

    #[must_use]
    pub fn metrics(&self) -> BrokerMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Publish an event (§4.3 `publish`).
    ///
    /// # Errors
    /// `BrokerUnavailable` if stopped, `RejectedByPolicy` if a security
    /// interceptor vetoes, `BackpressureError` for a full reliable queue,
    /// `Validation` for a user attempt to publish into a reserved prefix.
    #[instrument(skip(self, event), fields(topic = event.topic()))]
    pub async fn publish(&self, event: Event) -> Result<(), BrokerError> {
        if reserved_topics::is_reserved(event.topic()) {
            return Err(BrokerError::Validation(format!(
                "topic `{}` uses a reserved prefix reserved for core components",
                event.topic()
            )));
        }
        self.publish_internal(event).await
    }

    /// Publish one of AMCP's own reserved-prefix events (`system.*`,
    /// `registry.*`, `task.*`), bypassing the check that rejects user
    /// publishes into those prefixes (§6 "Topic namespace (wire)").
    /// Used by `amcp-runtime`, `amcp-registry` and `amcp-orchestrator` to
    /// emit their lifecycle/registry/task events; user-facing code must
    /// go through [`Broker::publish`].
    pub async fn publish_system(&self, event: Event) -> Result<(), BrokerError> {
        self.publish_internal(event).await
    }

    /// Publish bypassing the reserved-topic check, used by the broker
    /// itself for DLQ and `system.*`/`delivery.failed` events.
    pub(crate) async fn publish_internal(&self, event: Event) -> Result<(), BrokerError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(BrokerError::Unavailable);
        }

        if let Some(policy) = self.inner.security.read().clone() {
            if !policy.authorize_publish(&event).await {
                return Err(BrokerError::RejectedByPolicy(format!(
                    "publish to `{}` denied",
                    event.topic()
                )));
            }
        }

        self.inner.metrics.record_published();

        let matches = {
            let index = self.inner.index.read();
            index.find_matching(event.topic())
        };

        if matches.is_empty() {
            self.inner.metrics.record_no_subscribers();
            return Ok(());
        }

        for id in matches {
            let Some(entry) = self.inner.subscriptions.get(&id).map(|e| e.clone()) else {
                continue;
            };
            let reliable = event.delivery_options().reliable || entry.options.reliable;
            entry
                .queue
                .push(event.clone(), reliable, self.inner.config.publish_timeout)
                .await?;
        }

        Ok(())
    }

    /// Subscribe a handler under `pattern` (§4.3 `subscribe`).
    ///
    /// # Errors
    /// `Validation` if the pattern fails to compile, `RejectedByPolicy`
    /// if a security interceptor vetoes.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        agent_id: AgentId,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, BrokerError> {
        let compiled =
            Pattern::compile(pattern).map_err(|e| BrokerError::Validation(e.to_string()))?;

        if let Some(policy) = self.inner.security.read().clone() {
            if !policy.authorize_subscribe(pattern, &agent_id).await {
                return Err(BrokerError::RejectedByPolicy(format!(
                    "subscribe to `{pattern}` denied for {agent_id}"
                )));
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(DeliveryQueue::new(self.inner.config.queue_bound, options.ordered));
        let cancel = CancellationToken::new();

        let topic_handle = {
            let mut index = self.inner.index.write();
            index.insert(compiled.clone(), id)
        };

        let entry = Arc::new(SubscriptionEntry {
            id,
            topic_handle,
            pattern: compiled,
            agent_id: agent_id.clone(),
            handler,
            options,
            queue: queue.clone(),
            cancel: cancel.clone(),
        });

        self.inner.subscriptions.insert(id, entry.clone());
        self.inner
            .agent_index
            .entry(agent_id)
            .or_default()
            .push(id);

        let worker_entry = entry.clone();
        let broker_for_worker = self.clone();
        tokio::spawn(async move {
            broker_for_worker.run_subscription_worker(worker_entry, cancel).await;
        });

        Ok(SubscriptionHandle(id))
    }

    async fn run_subscription_worker(
        &self,
        entry: Arc<SubscriptionEntry>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = entry.queue.pop() => event,
            };
            self.deliver_one(&entry, event).await;
        }
        debug!(subscription = entry.id, "subscription worker stopped");
    }

    async fn deliver_one(&self, entry: &SubscriptionEntry, event: Event) {
        let now = chrono::Utc::now();
        if event.is_expired_at(now) {
            self.inner.metrics.record_ttl_dropped();
            return;
        }

        let reliable = event.delivery_options().reliable || entry.options.reliable;

        if !reliable {
            if let Err(err) = entry.handler.handle(&event).await {
                warn!(error = %err, subscription = entry.id, "best-effort handler failed");
                self.inner.metrics.record_handler_error();
            } else {
                self.inner.metrics.record_delivered();
            }
            return;
        }

        let mut attempts: u32 = 1;
        loop {
            match entry.handler.handle(&event).await {
                Ok(()) => {
                    self.inner.metrics.record_delivered();
                    return;
                }
                Err(err) => {
                    if self.inner.config.retry.should_retry(attempts) {
                        self.inner.metrics.record_retried();
                        let delay = self.inner.config.retry.delay_for(attempts);
                        tokio::time::sleep(delay).await;
                        attempts += 1;
                    } else {
                        warn!(
                            error = %err,
                            subscription = entry.id,
                            attempts,
                            "reliable delivery exhausted retries, dead-lettering"
                        );
                        self.inner.metrics.record_dead_lettered();
                        self.dead_letter(&event, &err).await;
                        return;
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, event: &Event, cause: &AmcpError) {
        let dlq_topic = format!("{}.{}", reserved_topics::DLQ, event.topic());
        if let Ok(dlq_event) = Event::builder(dlq_topic, event.source())
            .correlation_id(event.correlation_id().unwrap_or(event.id()).to_string())
            .json_data(serde_json::json!({ "original_event_id": event.id() }))
            .build()
        {
            let _ = self.publish_internal(dlq_event).await;
        }

        if let Ok(failure_event) = Event::builder("system.delivery.failed", event.source())
            .json_data(serde_json::json!({
                "event_id": event.id(),
                "topic": event.topic(),
                "reason": cause.to_string(),
            }))
            .build()
        {
            let _ = self.publish_internal(failure_event).await;
        }
    }

    /// Remove a single subscription (§4.3 `unsubscribe`).
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some((_, entry)) = self.inner.subscriptions.remove(&handle.0) {
            entry.cancel.cancel();
            self.inner.index.write().remove(entry.topic_handle);
            if let Some(mut ids) = self.inner.agent_index.get_mut(&entry.agent_id) {
                ids.retain(|id| *id != entry.id);
            }
        }
    }

    /// Remove every subscription belonging to `agent_id` (§4.3
    /// `unsubscribeAll`, §4.5 "deactivation removes all of that agent's
    /// subscriptions").
    pub fn unsubscribe_all(&self, agent_id: &AgentId) {
        let ids = self
            .inner
            .agent_index
            .remove(agent_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        for id in ids {
            if let Some((_, entry)) = self.inner.subscriptions.remove(&id) {
                entry.cancel.cancel();
                self.inner.index.write().remove(entry.topic_handle);
            }
        }
    }

    /// Convenience wrapper: decode a CloudEvent and publish it through
    /// the same pipeline as [`Broker::publish`] (§4.3
    /// `publishCloudEvent`).
    pub async fn publish_cloud_event(&self, ce: &CloudEventJson) -> Result<(), BrokerError> {
        let event = from_cloud_event(ce).map_err(|e| BrokerError::Validation(e.to_string()))?;
        self.publish(event).await
    }

    /// Convenience wrapper: subscribe a CloudEvents-shaped handler
    /// (§4.3 `subscribeToCloudEvents`).
    pub async fn subscribe_to_cloud_events(
        &self,
        pattern: &str,
        handler: Arc<dyn CloudEventHandler>,
        agent_id: AgentId,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, BrokerError> {
        let adapter = Arc::new(CloudEventHandlerAdapter(handler));
        self.subscribe(pattern, adapter, agent_id, options).await
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

/// A handler expressed in terms of CloudEvents JSON rather than the
/// internal [`Event`] type, for cross-process-shaped consumers (§4.3).
#[async_trait]
pub trait CloudEventHandler: Send + Sync {
    async fn handle(&self, ce: &CloudEventJson) -> Result<(), AmcpError>;
}

struct CloudEventHandlerAdapter(Arc<dyn CloudEventHandler>);

#[async_trait]
impl EventHandler for CloudEventHandlerAdapter {
    async fn handle(&self, event: &Event) -> Result<(), AmcpError> {
        let ce = to_cloud_event(event).map_err(AmcpError::from)?;
        self.0.handle(&ce).await
    }
}

/// Prepend the configured `topic_prefix` for cross-process transports
/// (§6 "Configuration surface"). The in-process broker itself does not
/// call this; it exists for transport bindings layered on top.
#[must_use]
pub fn qualify_for_transport(config: &BrokerConfig, topic: &str) -> String {
    match &config.topic_prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}.{topic}"),
        _ => topic.to_string(),
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}
