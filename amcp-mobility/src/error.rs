//! Mobility-local error type (component C6).

use thiserror::Error;

use amcp_broker::BrokerError;
use amcp_cloudevents::CloudEventError;
use amcp_core::{AmcpError, ErrorKind};
use amcp_runtime::LifecycleError;

#[derive(Error, Debug, Clone)]
pub enum MobilityError {
    /// `dispatch`/`clone`/`migrate`/`replicate` called on an agent that
    /// was not registered through
    /// [`amcp_runtime::AgentContext::register_mobile_agent`] (§9
    /// "capability trait set ... failing fast with `ValidationError`").
    #[error("agent {0} is not mobile")]
    NotMobile(String),
    /// The hand-off failed to complete within `migrationTimeout` (or the
    /// destination explicitly rejected it); the agent remains `ACTIVE` at
    /// the source (§4.6 failure handling).
    #[error("migration of {agent} to {dest} aborted: {reason}")]
    Aborted {
        agent: String,
        dest: String,
        reason: String,
    },
    /// `migrate`'s destination selector returned no candidate context.
    #[error("no destination context available for agent {0}")]
    NoDestinationAvailable(String),
    /// Destination-side restoration failed after the token was accepted
    /// (factory, `load_state`, re-subscribe, or `on_after_migration`);
    /// the partial agent is discarded and no ACK is sent (§4.6).
    #[error("restoration of {0} at destination failed: {1}")]
    RestorationFailed(String, String),
    #[error("{0}")]
    Runtime(#[from] LifecycleError),
    #[error("{0}")]
    Broker(#[from] BrokerError),
    #[error("{0}")]
    CloudEvent(#[from] CloudEventError),
    #[error("{0}")]
    Core(#[from] AmcpError),
}

impl From<MobilityError> for AmcpError {
    fn from(err: MobilityError) -> Self {
        match err {
            MobilityError::Aborted { .. } => AmcpError::new(ErrorKind::MigrationAborted, err.to_string()),
            MobilityError::NotMobile(_) | MobilityError::NoDestinationAvailable(_) => {
                AmcpError::new(ErrorKind::ValidationError, err.to_string())
            }
            MobilityError::RestorationFailed(..) => {
                AmcpError::new(ErrorKind::MigrationAborted, err.to_string())
            }
            MobilityError::Runtime(inner) => inner.into(),
            MobilityError::Broker(inner) => inner.into(),
            MobilityError::CloudEvent(inner) => inner.into(),
            MobilityError::Core(inner) => inner,
        }
    }
}
