//! Agent lifecycle states (§3 `AgentLifecycle`, §4.5 transition table).
//!
//! The state machine itself lives in `amcp-runtime` (it needs the
//! per-agent lock and hook-firing machinery); this crate only owns the
//! enum and the pure transition-validity rule so that both
//! `amcp-runtime` and `amcp-mobility` can check legality without a
//! circular dependency.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentLifecycle {
    Inactive,
    Active,
    Migrating,
    Suspended,
    Failed,
    Destroyed,
}

impl AgentLifecycle {
    /// Whether `self → next` is a legal transition per §4.5's table.
    /// `Failed` and `Destroyed` are reachable from any state. `deactivate`
    /// (ACTIVE|SUSPENDED → INACTIVE) is not spelled out as its own row in
    /// §4.5 but is implied by §4.4's context boundary, which lists
    /// `deactivate` as a first-class operation alongside `activate`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use AgentLifecycle::{Active, Destroyed, Failed, Inactive, Migrating, Suspended};
        match next {
            Failed | Destroyed => true,
            _ => matches!(
                (self, next),
                (Inactive, Active)
                    | (Active, Migrating)
                    | (Migrating, Active)
                    | (Migrating, Inactive)
                    | (Active, Suspended)
                    | (Suspended, Active)
                    | (Active, Inactive)
                    | (Suspended, Inactive)
            ),
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl std::fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Migrating => "MIGRATING",
            Self::Suspended => "SUSPENDED",
            Self::Failed => "FAILED",
            Self::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentLifecycle::{Active, Destroyed, Failed, Inactive, Migrating, Suspended};

    #[test]
    fn legal_transitions_per_table() {
        assert!(Inactive.can_transition_to(Active));
        assert!(Active.can_transition_to(Migrating));
        assert!(Migrating.can_transition_to(Active));
        assert!(Migrating.can_transition_to(Inactive));
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
    }

    #[test]
    fn any_state_can_fail_or_be_destroyed() {
        for state in [Inactive, Active, Migrating, Suspended, Failed, Destroyed] {
            assert!(state.can_transition_to(Failed));
            assert!(state.can_transition_to(Destroyed));
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!Inactive.can_transition_to(Migrating));
        assert!(!Suspended.can_transition_to(Migrating));
        assert!(!Destroyed.can_transition_to(Active));
    }
}
