//! The external planner boundary (component C8, §4.8 steps 2 and 6).
//!
//! Grounded on `amcp_broker::MobilityTransport`/`amcp_mobility::AgentFactory`'s
//! pattern of putting the one genuinely pluggable piece behind a small
//! `async_trait` boundary rather than baking a concrete LLM or rules engine
//! into the core.

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::types::{ResultMap, TaskPlan};

/// Decomposes a user request into a [`TaskPlan`] and synthesizes the final
/// result from collected [`crate::types::TaskResult`]s. An LLM-backed
/// planner, a rules engine, or a fixed lookup table can all implement this;
/// none of those concrete back-ends are in scope here (§1 Non-goals "LLM
/// back-end ... out of scope for the core").
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        user_request: &serde_json::Value,
        available_capabilities: &[String],
    ) -> Result<TaskPlan, OrchestratorError>;

    async fn synthesize(
        &self,
        user_request: &serde_json::Value,
        results: &ResultMap,
    ) -> Result<serde_json::Value, OrchestratorError>;
}
