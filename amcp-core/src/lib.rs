//! Core types shared by every AMCP crate: the immutable event value and
//! its builder, agent identity, lifecycle states, the agent boundary
//! traits, and the error taxonomy (components C1 and C9).
//!
//! See `DESIGN.md` at the workspace root for the grounding of each module
//! against the teacher repository.

pub mod agent;
pub mod error;
pub mod event;
pub mod identity;
pub mod lifecycle;
pub mod migration;

pub use agent::{AgentCore, MobileAgent};
pub use error::{AmcpError, ErrorKind, Result};
pub use event::{DeliveryOptions, Event, EventBuilder, EventData, Priority};
pub use identity::AgentId;
pub use lifecycle::AgentLifecycle;
pub use migration::{MigrationKind, MigrationRecord};

/// Reserved topic prefixes the core itself publishes into (§6 "Topic
/// namespace (wire)"). User agents must not publish into these prefixes;
/// enforcement lives in `amcp-broker`.
pub mod reserved_topics {
    pub const REGISTRY: &str = "registry";
    pub const TASK: &str = "task";
    pub const DLQ: &str = "__dlq";
    pub const SYSTEM: &str = "system";

    /// Whether `topic` starts with a reserved prefix segment.
    #[must_use]
    pub fn is_reserved(topic: &str) -> bool {
        let first_segment = topic.split('.').next().unwrap_or(topic);
        matches!(first_segment, REGISTRY | TASK | DLQ | SYSTEM)
    }
}

/// Commonly imported types, following the teacher's `pub mod prelude`
/// convention (`llmspell-events::prelude`).
pub mod prelude {
    pub use crate::agent::{AgentCore, MobileAgent};
    pub use crate::error::{AmcpError, ErrorKind, Result};
    pub use crate::event::{DeliveryOptions, Event, EventBuilder, EventData, Priority};
    pub use crate::identity::AgentId;
    pub use crate::lifecycle::AgentLifecycle;
    pub use crate::migration::{MigrationKind, MigrationRecord};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_topics_are_flagged() {
        assert!(reserved_topics::is_reserved("registry.agent.registered"));
        assert!(reserved_topics::is_reserved("task.request"));
        assert!(reserved_topics::is_reserved("__dlq.orders.new"));
        assert!(reserved_topics::is_reserved("system.agent.failed"));
        assert!(!reserved_topics::is_reserved("weather.alert.severe"));
    }
}
