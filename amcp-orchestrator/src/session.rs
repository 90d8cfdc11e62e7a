//! `OrchestrationSession`: per-request bookkeeping for one `orchestrate`
//! call (component C8, §3).

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::types::{PlannedTask, ResultMap, SessionState, TaskResult};

/// One in-flight (or finished) orchestration request (§3
/// `OrchestrationSession`).
#[derive(Debug, Clone)]
pub struct OrchestrationSession {
    pub correlation_id: String,
    pub original_request: serde_json::Value,
    pub plan_tasks: Vec<PlannedTask>,
    pub pending_task_ids: HashSet<String>,
    pub collected_results: ResultMap,
    pub deadline: DateTime<Utc>,
    pub state: SessionState,
}

impl OrchestrationSession {
    #[must_use]
    pub fn new(
        correlation_id: String,
        original_request: serde_json::Value,
        plan_tasks: Vec<PlannedTask>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let pending_task_ids = plan_tasks.iter().map(|t| t.task_id.clone()).collect();
        Self {
            correlation_id,
            original_request,
            plan_tasks,
            pending_task_ids,
            collected_results: ResultMap::new(),
            deadline,
            state: SessionState::Planning,
        }
    }

    pub fn record(&mut self, result: TaskResult) {
        self.pending_task_ids.remove(&result.task_id);
        self.collected_results.insert(result.task_id.clone(), result);
    }

    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}
