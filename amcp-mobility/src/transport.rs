//! The mobility transport boundary (§4.6 step 3 "transmit token to D
//! (mechanism = context-transport, outside the core; treated as reliable
//! FIFO)") and the agent-reconstruction boundary (§4.6 step 4 "reconstruct
//! agent instance from state").
//!
//! Concrete cross-process transports are collaborator modules, mirroring
//! the broker's pluggable-transport boundary (§9 "Concrete transport
//! bindings ... only the broker contract is in scope"). [`InProcessTransport`]
//! is the reference implementation, used when source and destination
//! contexts live in the same process (e.g. every test in this workspace).

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::engine::MobilityEngine;
use crate::error::MobilityError;
use crate::token::MigrationToken;

/// Delivers a [`MigrationToken`] to its destination and returns once the
/// destination has ACK'd (or rejected) the hand-off. Implementations are
/// expected to behave as a reliable FIFO channel per context pair (§4.6);
/// the mobility engine layers its own `migrationTimeout` on top via
/// `tokio::time::timeout`; transports should not impose a shorter one.
///
/// # Errors
/// Implementations return `Err` for any failure that should abort the
/// hand-off at the source (connection failure, destination explicitly
/// rejecting); the caller does not distinguish the two.
#[async_trait]
pub trait MobilityTransport: Send + Sync {
    async fn send_token(&self, token: MigrationToken) -> Result<(), MobilityError>;
}

/// Reconstructs a fresh agent instance of the right type at the
/// destination, ready for [`amcp_core::MobileAgent::load_state`] (§9
/// "Replace with a capability trait/interface set"; the runtime never
/// introspects user types, so this factory is how a host tells the
/// mobility engine which concrete type `agent_id.agent_type()` maps to).
pub trait AgentFactory: Send + Sync {
    /// # Errors
    /// Returns [`MobilityError::RestorationFailed`] if `agent_id`'s type
    /// is unknown to this factory.
    fn create(&self, agent_id: &amcp_core::AgentId) -> Result<Arc<dyn amcp_core::MobileAgent>, MobilityError>;
}

/// In-process reference transport: routes tokens directly to the target
/// [`MobilityEngine`] registered under a context URI, bypassing any wire
/// encoding. Engines are held weakly so that an engine's own
/// `Arc<dyn MobilityTransport>` field does not keep this registry (and
/// thus every other engine) alive forever.
#[derive(Default)]
pub struct InProcessTransport {
    contexts: DashMap<String, Weak<MobilityEngine>>,
}

impl InProcessTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `engine` under its own context URI so other engines
    /// sharing this transport can route tokens to it.
    pub fn register(&self, context_uri: impl Into<String>, engine: &Arc<MobilityEngine>) {
        self.contexts.insert(context_uri.into(), Arc::downgrade(engine));
    }
}

#[async_trait]
impl MobilityTransport for InProcessTransport {
    async fn send_token(&self, token: MigrationToken) -> Result<(), MobilityError> {
        let engine = self
            .contexts
            .get(&token.dest)
            .and_then(|e| e.upgrade())
            .ok_or_else(|| MobilityError::Aborted {
                agent: token.agent_id.to_string(),
                dest: token.dest.clone(),
                reason: format!("no context registered for destination `{}`", token.dest),
            })?;
        engine.receive_token(token).await
    }
}
