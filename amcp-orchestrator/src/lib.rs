//! Request decomposition via an external planner, capability-routed task
//! fan-out/fan-in, and correlation-ID tracking (component C8, §4.8).
//!
//! See `DESIGN.md` at the workspace root for the grounding of each module
//! against the teacher repository.

pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod types;

pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use planner::Planner;
pub use session::OrchestrationSession;
pub use types::{PlannedTask, ResultMap, SessionState, TaskPlan, TaskResponsePayload, TaskResult};
