//! Broker-local error type (component C3, C9).

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("broker is stopped")]
    Unavailable,
    #[error("queue full past publish timeout")]
    Backpressure,
    #[error("rejected by security policy: {0}")]
    RejectedByPolicy(String),
    #[error("{0}")]
    Validation(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<BrokerError> for AmcpError {
    fn from(err: BrokerError) -> Self {
        let kind = match err {
            BrokerError::Unavailable => ErrorKind::BrokerUnavailable,
            BrokerError::Backpressure => ErrorKind::BackpressureError,
            BrokerError::RejectedByPolicy(_) => ErrorKind::SecurityDenied,
            BrokerError::Validation(_) => ErrorKind::ValidationError,
            BrokerError::Cancelled => ErrorKind::Cancelled,
        };
        AmcpError::new(kind, err.to_string())
    }
}
