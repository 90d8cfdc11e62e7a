//! Errors raised while bridging between [`amcp_core::Event`] and
//! CloudEvents wire representations.

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Error, Debug, Clone)]
pub enum CloudEventError {
    #[error("missing required CloudEvents attribute: {0}")]
    MissingAttribute(&'static str),
    #[error("extension key `{0}` uses reserved prefix `ce-`")]
    ReservedExtensionKey(String),
    #[error("`time` is not RFC 3339: {0}")]
    InvalidTime(String),
    #[error("`source` is not a valid URI: {0}")]
    InvalidSource(String),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("malformed CloudEvents JSON: {0}")]
    Malformed(String),
    #[error(transparent)]
    Core(#[from] AmcpError),
}

impl From<CloudEventError> for AmcpError {
    fn from(err: CloudEventError) -> Self {
        if let CloudEventError::Core(inner) = err {
            return inner;
        }
        AmcpError::new(ErrorKind::ValidationError, err.to_string())
    }
}
