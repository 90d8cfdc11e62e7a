//! Handler and security-interceptor boundaries the broker dispatches
//! through (§6 "A transport implements ..."; §9 "expose a
//! `SecurityInterceptor` hook on publish and subscribe that can veto").

use async_trait::async_trait;

use amcp_core::{AgentId, Event};

/// Invoked by the broker for every event matching a subscription.
/// Distinct from [`amcp_core::AgentCore::handle_event`]: `amcp-runtime`
/// adapts an agent's handler into this trait so the broker never depends
/// on the agent runtime crate (keeps the dependency graph leaves-first).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), amcp_core::AmcpError>;

    /// Whether a failure from this handler should be treated as
    /// transient (retryable) when the subscription is best-effort and
    /// the handler itself knows the failure mode. Defaults to `false`;
    /// reliable subscriptions retry regardless per §4.9.
    fn is_transient_failure(&self, _err: &amcp_core::AmcpError) -> bool {
        false
    }
}

/// Optional veto hook checked by the broker before accepting a publish
/// or a subscribe (§9 "Security/authentication abstractions ... out of
/// scope for the core; expose a `SecurityInterceptor` hook").
#[async_trait]
pub trait SecurityInterceptor: Send + Sync {
    async fn authorize_publish(&self, event: &Event) -> bool;
    async fn authorize_subscribe(&self, pattern: &str, agent_id: &AgentId) -> bool;
}
