//! Agent identity (§3 `AgentID`).

use serde::{Deserialize, Serialize};

/// Identifies an agent by id and type. Equality is by both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    id: String,
    agent_type: String,
}

impl AgentId {
    #[must_use]
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
        }
    }

    /// Generate a fresh id (UUID v4) for the given agent type, used by
    /// clone/replicate which must mint a new identity of the same type
    /// (§4.6).
    #[must_use]
    pub fn generate(agent_type: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), agent_type)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_both_fields() {
        let a = AgentId::new("1", "weather");
        let b = AgentId::new("1", "weather");
        let c = AgentId::new("1", "stock");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generate_preserves_type_with_fresh_id() {
        let a = AgentId::generate("weather");
        let b = AgentId::generate("weather");
        assert_eq!(a.agent_type(), "weather");
        assert_ne!(a.id(), b.id());
    }
}
