//! Error taxonomy for component C8.

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("external planner failed: {0}")]
    PlanningFailed(String),
    #[error("external planner synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("task plan has a dependency cycle")]
    CycleDetected,
    #[error("session {0} exceeded its deadline")]
    Timeout(String),
    #[error("no agent advertises capability `{0}`")]
    CapabilityNotFound(String),
    #[error(transparent)]
    Broker(#[from] amcp_broker::BrokerError),
    #[error(transparent)]
    Registry(#[from] amcp_registry::RegistryError),
    #[error(transparent)]
    Core(#[from] AmcpError),
}

impl From<OrchestratorError> for AmcpError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Timeout(ref session) => {
                Self::new(ErrorKind::TimeoutError, err.to_string()).with_correlation_id(session.clone())
            }
            OrchestratorError::CapabilityNotFound(_) => {
                Self::new(ErrorKind::CapabilityNotFound, err.to_string())
            }
            OrchestratorError::CycleDetected
            | OrchestratorError::PlanningFailed(_)
            | OrchestratorError::SynthesisFailed(_) => Self::new(ErrorKind::ValidationError, err.to_string()),
            OrchestratorError::Broker(e) => e.into(),
            OrchestratorError::Registry(e) => e.into(),
            OrchestratorError::Core(e) => e,
        }
    }
}
