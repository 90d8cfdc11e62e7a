//! The agent boundary (§6, §9 redesign note replacing `Agent →
//! AbstractMobileAgent` inheritance with a capability trait set).
//!
//! `AgentCore` is required of every agent; `MobileAgent` is an optional
//! capability checked at runtime by `amcp-mobility` before `dispatch` /
//! `clone` / `migrate` / `replicate` — calling those on a non-mobile
//! agent fails fast with `ValidationError` rather than compiling away the
//! distinction, since capability presence is only knowable through a
//! trait-object downcast at the point a host actually attempts mobility.

use async_trait::async_trait;
use std::any::Any;

use crate::error::AmcpError;
use crate::event::Event;
use crate::identity::AgentId;

/// Lifecycle callbacks and the event handler every agent must implement.
///
/// The runtime guarantees `on_activate`/`on_deactivate`/`on_destroy` each
/// fire exactly once per matching transition, even if the body returns an
/// error (§4.5): failure is recorded and does not prevent the transition
/// from reaching its terminal state for deactivate/destroy.
#[async_trait]
pub trait AgentCore: Send + Sync + Any {
    /// This agent's identity, set once at registration.
    fn agent_id(&self) -> &AgentId;

    /// Called on `INACTIVE → ACTIVE`.
    async fn on_activate(&self) -> Result<(), AmcpError> {
        Ok(())
    }

    /// Called on exit from `ACTIVE` toward `INACTIVE`/`SUSPENDED`/
    /// `DESTROYED`.
    async fn on_deactivate(&self) -> Result<(), AmcpError> {
        Ok(())
    }

    /// Called once, terminally, on destroy.
    async fn on_destroy(&self) -> Result<(), AmcpError> {
        Ok(())
    }

    /// Called at the source context immediately before a migration
    /// hand-off begins (§4.6 step 1).
    async fn on_before_migration(&self, _dest_context: &str) -> Result<(), AmcpError> {
        Ok(())
    }

    /// Called at the destination context after state restoration, before
    /// the transition back to `ACTIVE` (§4.6 step 4).
    async fn on_after_migration(&self, _source_context: &str) -> Result<(), AmcpError> {
        Ok(())
    }

    /// Handle one delivered event. Handlers of the same agent never run
    /// concurrently with each other (§4.4 per-agent lane serialization).
    async fn handle_event(&self, event: &Event) -> Result<(), AmcpError>;

    /// Upcast for the optional `MobileAgent` downcast in `amcp-mobility`.
    fn as_any(&self) -> &dyn Any;
}

/// Optional capability: an agent that can serialize/restore its state for
/// mobility (§6 "serialization hooks ... only required if the agent is
/// mobile").
#[async_trait]
pub trait MobileAgent: AgentCore {
    /// Serialize this agent's state for transfer.
    async fn save_state(&self) -> Result<Vec<u8>, AmcpError>;

    /// Restore state captured by a prior `save_state` call on a freshly
    /// constructed instance of the same agent type.
    async fn load_state(&self, state: &[u8]) -> Result<(), AmcpError>;
}
