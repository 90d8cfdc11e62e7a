//! Per-agent lifecycle state machine (component C5, §4.5).
//!
//! Grounded on `llmspell-agents::lifecycle::state_machine::AgentStateMachine`
//! (`Arc<RwLock<State>>`, per-agent transition lock, transition history,
//! hook-firing-even-on-failure guarantee), remapped from the teacher's
//! 9-state `AgentState` enum to spec.md §3/§4.5's exact six-state
//! `AgentLifecycle` and its transition table (owned by `amcp-core` so
//! `amcp-mobility` can reuse the legality check).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use amcp_core::AgentLifecycle;

use crate::error::LifecycleError;

/// One recorded transition, kept for introspection/debugging (the
/// teacher's `state_machine.rs` keeps an equivalent `transition_history`
/// vector).
#[derive(Debug, Clone, Copy)]
pub struct TransitionRecord {
    pub from: AgentLifecycle,
    pub to: AgentLifecycle,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Serializes lifecycle transitions for a single agent (§3 "Lifecycle
/// transitions are serialized per-agent (no concurrent transitions for
/// the same id)") and tracks the current state plus history.
pub struct AgentStateMachine {
    agent_id: String,
    state: RwLock<AgentLifecycle>,
    history: RwLock<Vec<TransitionRecord>>,
    transition_lock: AsyncMutex<()>,
}

impl AgentStateMachine {
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self::with_initial_state(agent_id, AgentLifecycle::Inactive)
    }

    /// Construct already in `initial` rather than `INACTIVE` (§4.6 step 4:
    /// a migrated-in agent is registered directly as `MIGRATING`, not
    /// `INACTIVE → ACTIVE`).
    #[must_use]
    pub fn with_initial_state(agent_id: impl Into<String>, initial: AgentLifecycle) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: RwLock::new(initial),
            history: RwLock::new(Vec::new()),
            transition_lock: AsyncMutex::new(()),
        }
    }

    #[must_use]
    pub fn current(&self) -> AgentLifecycle {
        *self.state.read()
    }

    #[must_use]
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.read().clone()
    }

    /// Attempt `from -> to`, running `hook` while holding the per-agent
    /// transition lock. The hook runs under `callback_timeout`; if the
    /// hook errors or times out, `on_hook_failure` decides whether the
    /// transition still completes (true for deactivate/destroy per §4.5,
    /// false for activate per §4.4 "failure -> FAILED").
    ///
    /// # Errors
    /// `IllegalTransition` if `current() != from` is not itself `to`, or
    /// the transition table forbids `current() -> to`.
    #[instrument(skip(self, hook), fields(agent = %self.agent_id))]
    pub async fn transition<F, Fut>(
        &self,
        to: AgentLifecycle,
        callback_timeout: Duration,
        hook: F,
        complete_despite_hook_failure: bool,
    ) -> Result<bool, LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), amcp_core::AmcpError>>,
    {
        let _guard = self.transition_lock.lock().await;
        let from = self.current();

        if !from.can_transition_to(to) {
            return Err(LifecycleError::IllegalTransition {
                agent: self.agent_id.clone(),
                from,
                to,
            });
        }

        let hook_result = tokio::time::timeout(callback_timeout, hook()).await;

        let hook_failed = match hook_result {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                warn!(error = %err, agent = %self.agent_id, "lifecycle hook failed");
                true
            }
            Err(_) => {
                warn!(agent = %self.agent_id, "lifecycle hook timed out");
                true
            }
        };

        if hook_failed && !complete_despite_hook_failure {
            self.record(from, AgentLifecycle::Failed);
            *self.state.write() = AgentLifecycle::Failed;
            return Ok(false);
        }

        self.record(from, to);
        *self.state.write() = to;
        Ok(!hook_failed)
    }

    fn record(&self, from: AgentLifecycle, to: AgentLifecycle) {
        self.history.write().push(TransitionRecord {
            from,
            to,
            at: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activate_failure_lands_in_failed() {
        let machine = AgentStateMachine::new("a1");
        let ok = machine
            .transition(
                AgentLifecycle::Active,
                Duration::from_millis(100),
                || async { Err(amcp_core::AmcpError::validation("boom")) },
                false,
            )
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(machine.current(), AgentLifecycle::Failed);
    }

    #[tokio::test]
    async fn deactivate_completes_despite_hook_failure() {
        let machine = AgentStateMachine::new("a1");
        machine
            .transition(AgentLifecycle::Active, Duration::from_millis(100), || async { Ok(()) }, false)
            .await
            .unwrap();
        let ok = machine
            .transition(
                AgentLifecycle::Inactive,
                Duration::from_millis(100),
                || async { Err(amcp_core::AmcpError::validation("boom")) },
                true,
            )
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(machine.current(), AgentLifecycle::Inactive);
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let machine = AgentStateMachine::new("a1");
        let err = machine
            .transition(AgentLifecycle::Migrating, Duration::from_millis(100), || async { Ok(()) }, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn callback_timeout_treated_as_failure() {
        let machine = AgentStateMachine::new("a1");
        let ok = machine
            .transition(
                AgentLifecycle::Active,
                Duration::from_millis(10),
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
                false,
            )
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(machine.current(), AgentLifecycle::Failed);
    }
}
