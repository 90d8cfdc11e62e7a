//! `Orchestrator`: request decomposition, parallel task fan-out/fan-in and
//! synthesis (component C8, §4.8).
//!
//! Grounded on `amcp_broker::Broker`'s subscribe/publish shape for wiring
//! `task.request`/`task.response` through the same pipeline every other
//! AMCP component uses, and on `llmspell-events`'s correlation-id-keyed
//! response matching for the one-shot waiter table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use amcp_broker::{Broker, EventHandler, SubscriptionOptions};
use amcp_core::{AgentId, AmcpError, Event};
use amcp_registry::CapabilityRegistry;

use crate::error::OrchestratorError;
use crate::planner::Planner;
use crate::session::OrchestrationSession;
use crate::types::{PlannedTask, ResultMap, SessionState, TaskResponsePayload, TaskResult};

const ORCHESTRATOR_SOURCE: &str = "urn:amcp:orchestrator";

/// Key a pending response waiter by `(correlationId, taskId)` (§4.8 step 4,
/// §8 item 4 "uncorrelated responses are ignored").
type WaiterKey = (String, String);

struct ResponseRouter {
    waiters: Arc<DashMap<WaiterKey, oneshot::Sender<TaskResult>>>,
}

#[async_trait]
impl EventHandler for ResponseRouter {
    async fn handle(&self, event: &Event) -> Result<(), AmcpError> {
        let Some(correlation_id) = event.correlation_id() else {
            return Ok(());
        };
        let Some(task_id) = event.metadata().get("task_id") else {
            return Ok(());
        };
        let key = (correlation_id.to_string(), task_id.clone());
        let Some((_, sender)) = self.waiters.remove(&key) else {
            // No waiter: either already collected, already timed out, or a
            // response for a correlation id we never issued (§8 item 4).
            return Ok(());
        };

        let payload = match event.data() {
            amcp_core::EventData::Structured(value) => {
                serde_json::from_value::<TaskResponsePayload>(value.clone()).ok()
            }
            _ => None,
        };
        let result = match payload {
            Some(p) => TaskResult {
                task_id: task_id.clone(),
                success: p.success,
                data: p.data,
                error: p.error,
            },
            None => TaskResult::failure(task_id.clone(), "task.response payload was not the expected shape"),
        };
        let _ = sender.send(result);
        Ok(())
    }
}

/// Component C8: decomposes a user request via an external [`Planner`],
/// dispatches independent tasks in parallel, collects correlated
/// responses, and synthesizes a final result.
pub struct Orchestrator {
    broker: Broker,
    registry: Arc<CapabilityRegistry>,
    planner: Arc<dyn Planner>,
    waiters: Arc<DashMap<WaiterKey, oneshot::Sender<TaskResult>>>,
    default_deadline: std::time::Duration,
}

impl Orchestrator {
    /// Construct an orchestrator and subscribe its `task.response` router
    /// (§4.8 step 4). `default_deadline` is normally
    /// `AmcpConfig::orchestration_deadline_default()`.
    pub async fn new(
        broker: Broker,
        registry: Arc<CapabilityRegistry>,
        planner: Arc<dyn Planner>,
        default_deadline: std::time::Duration,
    ) -> Result<Self, OrchestratorError> {
        let waiters = Arc::new(DashMap::new());
        let router = Arc::new(ResponseRouter { waiters: waiters.clone() });
        broker
            .subscribe(
                "task.response",
                router,
                AgentId::new("orchestrator", "system"),
                SubscriptionOptions { ordered: false, reliable: true },
            )
            .await?;
        Ok(Self {
            broker,
            registry,
            planner,
            waiters,
            default_deadline,
        })
    }

    /// Run one orchestration end to end (§4.8 `orchestrate(userRequest)`).
    ///
    /// # Errors
    /// [`OrchestratorError::CycleDetected`] if the plan's dependency graph
    /// is not a DAG; [`OrchestratorError::Timeout`] if the session deadline
    /// elapses before every task settles; planner failures propagate as
    /// [`OrchestratorError::PlanningFailed`]/[`OrchestratorError::SynthesisFailed`].
    pub async fn orchestrate(
        &self,
        user_request: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let correlation_id = Uuid::new_v4().to_string();
        let available_capabilities: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .flat_map(|r| r.capabilities)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let plan = self.planner.plan(&user_request, &available_capabilities).await?;
        let layers = topological_layers(&plan.tasks)?;

        let deadline = chrono::Utc::now()
            + chrono::Duration::from_std(self.default_deadline).unwrap_or(chrono::Duration::seconds(60));
        let mut session = OrchestrationSession::new(correlation_id.clone(), user_request.clone(), plan.tasks, deadline);
        session.state = SessionState::Dispatched;

        let mut failed: HashSet<String> = HashSet::new();

        for layer in layers {
            let mut pending = Vec::new();
            for task in layer {
                if task.depends_on.iter().any(|dep| failed.contains(dep)) {
                    if task.optional {
                        session.record(TaskResult::failure(&task.task_id, "skipped: a non-optional predecessor failed"));
                    } else {
                        failed.insert(task.task_id.clone());
                        session.record(TaskResult::failure(&task.task_id, "a predecessor task failed"));
                    }
                    continue;
                }

                match self.registry.find_by_capability(&task.capability) {
                    Ok(agent_id) => {
                        let (tx, rx) = oneshot::channel();
                        self.waiters.insert((correlation_id.clone(), task.task_id.clone()), tx);
                        if let Err(err) = self.dispatch_task(&correlation_id, &task, &agent_id.to_string()).await {
                            self.waiters.remove(&(correlation_id.clone(), task.task_id.clone()));
                            if task.optional {
                                session.record(TaskResult::failure(&task.task_id, err.to_string()));
                            } else {
                                failed.insert(task.task_id.clone());
                                session.record(TaskResult::failure(&task.task_id, err.to_string()));
                            }
                            continue;
                        }
                        pending.push((task, rx));
                    }
                    Err(_) => {
                        let message = format!("no agent advertises capability `{}`", task.capability);
                        if task.optional {
                            session.record(TaskResult::failure(&task.task_id, message));
                        } else {
                            failed.insert(task.task_id.clone());
                            session.record(TaskResult::failure(&task.task_id, message));
                        }
                    }
                }
            }

            session.state = SessionState::Collecting;
            for (task, rx) in pending {
                let now = chrono::Utc::now();
                if session.is_past_deadline(now) {
                    self.cancel_remaining(&correlation_id, &session).await;
                    session.state = SessionState::Failed;
                    return Err(OrchestratorError::Timeout(correlation_id));
                }
                let remaining = (session.deadline - now).to_std().unwrap_or(std::time::Duration::ZERO);

                match tokio::time::timeout(remaining, rx).await {
                    Ok(Ok(result)) => {
                        if !result.success && !task.optional {
                            failed.insert(task.task_id.clone());
                        }
                        session.record(result);
                    }
                    Ok(Err(_)) => {
                        if !task.optional {
                            failed.insert(task.task_id.clone());
                        }
                        session.record(TaskResult::failure(&task.task_id, "response waiter dropped before a reply arrived"));
                    }
                    Err(_elapsed) => {
                        self.waiters.remove(&(correlation_id.clone(), task.task_id.clone()));
                        self.cancel_remaining(&correlation_id, &session).await;
                        session.state = SessionState::Failed;
                        return Err(OrchestratorError::Timeout(correlation_id));
                    }
                }
            }
        }

        session.state = SessionState::Synthesizing;
        let final_result = self
            .planner
            .synthesize(&session.original_request, &session.collected_results)
            .await?;
        session.state = SessionState::Completed;
        Ok(final_result)
    }

    async fn dispatch_task(
        &self,
        correlation_id: &str,
        task: &PlannedTask,
        target_agent_id: &str,
    ) -> Result<(), OrchestratorError> {
        let event = Event::builder("task.request", ORCHESTRATOR_SOURCE)
            .subject(task.capability.clone())
            .correlation_id(correlation_id.to_string())
            .metadata("task_id", task.task_id.clone())
            .metadata("target_agent_id", target_agent_id.to_string())
            .json_data(task.parameters.clone())
            .build()
            .map_err(OrchestratorError::Core)?;
        self.broker.publish_system(event).await?;
        Ok(())
    }

    /// Publish `task.cancel` for every task still pending when the session
    /// deadline expires (§4.8 "on expiry, remaining tasks are cancelled").
    async fn cancel_remaining(&self, correlation_id: &str, session: &OrchestrationSession) {
        for task_id in &session.pending_task_ids {
            self.waiters.remove(&(correlation_id.to_string(), task_id.clone()));
            let event = Event::builder("task.cancel", ORCHESTRATOR_SOURCE)
                .correlation_id(correlation_id.to_string())
                .metadata("task_id", task_id.clone())
                .build();
            if let Ok(event) = event {
                if let Err(err) = self.broker.publish_system(event).await {
                    warn!(error = %err, task_id, "failed to publish task.cancel");
                }
            }
        }
    }
}

/// Kahn's-algorithm layering: each returned layer's tasks have no
/// undispatched dependency and can be dispatched in parallel (§4.8 step 3
/// "independent tasks are dispatched in parallel").
fn topological_layers(tasks: &[PlannedTask]) -> Result<Vec<Vec<PlannedTask>>, OrchestratorError> {
    let by_id: HashMap<&str, &PlannedTask> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        indegree.entry(&task.task_id).or_insert(0);
        for dep in &task.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                continue;
            }
            *indegree.entry(&task.task_id).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(&task.task_id);
        }
    }

    let mut layers = Vec::new();
    let mut frontier: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut remaining = indegree.clone();
    let mut visited = 0usize;

    while !frontier.is_empty() {
        let mut layer = Vec::new();
        let mut next_frontier = VecDeque::new();
        for id in frontier.drain(..) {
            layer.push((*by_id[id]).clone());
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let entry = remaining.get_mut(child).expect("child registered in indegree map");
                    *entry -= 1;
                    if *entry == 0 {
                        next_frontier.push_back(*child);
                    }
                }
            }
        }
        layers.push(layer);
        frontier = next_frontier;
    }

    if visited != tasks.len() {
        return Err(OrchestratorError::CycleDetected);
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn task(id: &str, capability: &str, depends_on: &[&str], optional: bool) -> PlannedTask {
        PlannedTask {
            task_id: id.to_string(),
            capability: capability.to_string(),
            parameters: serde_json::json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            optional,
        }
    }

    #[test]
    fn layers_independent_tasks_together() {
        let tasks = vec![
            task("weather", "cap.weather", &[], false),
            task("stock", "cap.stock", &[], false),
            task("synthesis", "cap.synthesis", &["weather", "stock"], false),
        ];
        let layers = topological_layers(&tasks).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].len(), 2);
        assert_eq!(layers[1].len(), 1);
        assert_eq!(layers[1][0].task_id, "synthesis");
    }

    #[test]
    fn cyclic_plan_is_rejected() {
        let tasks = vec![task("a", "cap.a", &["b"], false), task("b", "cap.b", &["a"], false)];
        let err = topological_layers(&tasks).unwrap_err();
        assert!(matches!(err, OrchestratorError::CycleDetected));
    }

    struct FixedPlanner;

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(
            &self,
            _user_request: &serde_json::Value,
            _available_capabilities: &[String],
        ) -> Result<crate::types::TaskPlan, OrchestratorError> {
            Ok(crate::types::TaskPlan {
                tasks: vec![
                    task("weather", "cap.weather", &[], false),
                    task("stock", "cap.stock", &[], false),
                ],
            })
        }

        async fn synthesize(
            &self,
            _user_request: &serde_json::Value,
            results: &ResultMap,
        ) -> Result<serde_json::Value, OrchestratorError> {
            let mut out = StdHashMap::new();
            for (id, result) in results {
                out.insert(id.clone(), result.data.clone());
            }
            Ok(serde_json::to_value(out).unwrap())
        }
    }

    struct EchoAgent {
        broker: Broker,
    }

    #[async_trait]
    impl EventHandler for EchoAgent {
        async fn handle(&self, event: &Event) -> Result<(), AmcpError> {
            let Some(task_id) = event.metadata().get("task_id").cloned() else {
                return Ok(());
            };
            let Some(correlation_id) = event.correlation_id().map(str::to_string) else {
                return Ok(());
            };
            let response = Event::builder("task.response", "urn:agent:echo")
                .correlation_id(correlation_id)
                .metadata("task_id", task_id)
                .json_data(serde_json::json!({ "success": true, "data": { "ok": true } }))
                .build()
                .unwrap();
            self.broker.publish_system(response).await.map_err(AmcpError::from)
        }
    }

    #[tokio::test]
    async fn s5_orchestration_fans_out_and_synthesizes() {
        let broker = Broker::builder().build();
        broker.start();
        let registry = Arc::new(CapabilityRegistry::new(broker.clone()));

        let weather_agent = AgentId::new("wa", "weather");
        let stock_agent = AgentId::new("sa", "stock");
        registry
            .register(weather_agent.clone(), vec!["cap.weather".into()], "weather", StdHashMap::new())
            .await
            .unwrap();
        registry
            .register(stock_agent.clone(), vec!["cap.stock".into()], "stock", StdHashMap::new())
            .await
            .unwrap();

        broker
            .subscribe(
                "task.request",
                Arc::new(EchoAgent { broker: broker.clone() }),
                weather_agent,
                SubscriptionOptions::default(),
            )
            .await
            .unwrap();
        broker
            .subscribe(
                "task.request",
                Arc::new(EchoAgent { broker: broker.clone() }),
                stock_agent,
                SubscriptionOptions::default(),
            )
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(
            broker,
            registry,
            Arc::new(FixedPlanner),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();

        let result = orchestrator.orchestrate(serde_json::json!({ "q": "trip" })).await.unwrap();
        let obj = result.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("weather"));
        assert!(obj.contains_key("stock"));
    }

    #[tokio::test]
    async fn unroutable_capability_fails_task_but_still_synthesizes() {
        let broker = Broker::builder().build();
        broker.start();
        let registry = Arc::new(CapabilityRegistry::new(broker.clone()));

        let orchestrator = Orchestrator::new(
            broker,
            registry,
            Arc::new(FixedPlanner),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();

        let result = orchestrator.orchestrate(serde_json::json!({})).await.unwrap();
        assert!(result.is_object());
    }
}
