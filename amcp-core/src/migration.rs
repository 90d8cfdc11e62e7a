//! The migration history record kept on [`crate::identity::AgentId`]'s
//! owning `AgentRecord` (§3 "migrationHistory: ordered list").
//!
//! Lives in `amcp-core` rather than `amcp-mobility` so that both
//! `amcp-runtime` (which owns `AgentRecord`) and `amcp-mobility` (which
//! appends to the history) can depend on the same type without a cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which mobility operation produced this history entry (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationKind {
    Dispatch,
    Clone,
    Retract,
    Migrate,
    Replicate,
}

/// One completed (or aborted) mobility operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub kind: MigrationKind,
    pub source_context: String,
    pub dest_context: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub aborted: bool,
}
