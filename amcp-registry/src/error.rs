//! Registry-local error type (component C7).

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("agent {0} is not registered")]
    NotRegistered(String),
    #[error("agent {0} is already registered")]
    AlreadyRegistered(String),
    #[error("no HEALTHY or SUSPECT agent advertises capability `{0}`")]
    CapabilityNotFound(String),
    #[error("{0}")]
    Broker(#[from] amcp_broker::BrokerError),
    #[error("{0}")]
    Core(#[from] AmcpError),
}

impl From<RegistryError> for AmcpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CapabilityNotFound(_) => {
                AmcpError::new(ErrorKind::CapabilityNotFound, err.to_string())
            }
            RegistryError::NotRegistered(_) | RegistryError::AlreadyRegistered(_) => {
                AmcpError::new(ErrorKind::ValidationError, err.to_string())
            }
            RegistryError::Broker(inner) => AmcpError::from(inner),
            RegistryError::Core(inner) => inner,
        }
    }
}
