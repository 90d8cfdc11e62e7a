//! Errors raised compiling a topic pattern (component C2).

use thiserror::Error;

use amcp_core::{AmcpError, ErrorKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must not be empty")]
    Empty,
    #[error("segment `{0}` is invalid: must match `[A-Za-z0-9_-]+`, `*`, or `**`")]
    InvalidSegment(String),
    #[error("`**` is only allowed as the final segment of a pattern")]
    MultiWildcardNotFinal,
}

impl From<PatternError> for AmcpError {
    fn from(err: PatternError) -> Self {
        AmcpError::new(ErrorKind::ValidationError, err.to_string())
    }
}
