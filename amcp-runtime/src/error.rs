//! Runtime-local errors (component C4, C5).

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition for agent {agent}: {from} -> {to}")]
    IllegalTransition {
        agent: String,
        from: amcp_core::AgentLifecycle,
        to: amcp_core::AgentLifecycle,
    },
    #[error("agent {0} not found")]
    AgentNotFound(String),
    #[error("agent {0} is already registered")]
    AlreadyRegistered(String),
    #[error("lifecycle callback for agent {agent} timed out after {timeout_ms}ms")]
    CallbackTimeout { agent: String, timeout_ms: u64 },
    #[error("{0}")]
    Broker(#[from] amcp_broker::BrokerError),
    #[error("{0}")]
    Core(#[from] AmcpError),
}

impl From<LifecycleError> for AmcpError {
    fn from(err: LifecycleError) -> Self {
        let kind = match &err {
            LifecycleError::IllegalTransition { .. } => ErrorKind::IllegalLifecycleTransition,
            LifecycleError::AgentNotFound(_) => ErrorKind::ValidationError,
            LifecycleError::AlreadyRegistered(_) => ErrorKind::ValidationError,
            LifecycleError::CallbackTimeout { .. } => ErrorKind::TimeoutError,
            LifecycleError::Broker(inner) => return AmcpError::from(inner.clone()),
            LifecycleError::Core(inner) => return inner.clone(),
        };
        AmcpError::new(kind, err.to_string())
    }
}
