//! Wire-level task-planning types (component C8, §3 `OrchestrationSession`,
//! §4.8 "a list of tasks each tagged with a required capability, parameters,
//! and optional dependency set").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One task in a [`TaskPlan`], produced by an external [`crate::Planner`]
/// (§4.8 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub task_id: String,
    pub capability: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// If true, this task's failure does not fail tasks that depend on it
    /// or the overall session (§4.8 "optional=true task failure-propagation
    /// exemption").
    #[serde(default)]
    pub optional: bool,
}

/// The external planner's decomposition of a user request into tasks
/// (§4.8 `plan(userRequest, availableCapabilities) -> TaskPlan`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPlan {
    pub tasks: Vec<PlannedTask>,
}

/// One task's outcome, collected into `OrchestrationSession.collectedResults`
/// (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    #[must_use]
    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Lifecycle state of an [`crate::session::OrchestrationSession`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Planning,
    Dispatched,
    Collecting,
    Synthesizing,
    Completed,
    Failed,
}

/// The `task.response` payload a capability handler publishes back, keyed
/// to the originating task via `task_id` metadata and `correlationId`
/// (§4.8 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Map of `parameters` keyed by task id, handed to [`crate::Planner::synthesize`].
pub type ResultMap = HashMap<String, TaskResult>;
