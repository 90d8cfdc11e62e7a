//! Strong mobility: dispatch, clone, retract, migrate and replicate an
//! agent between contexts (component C6, §4.6).
//!
//! See `DESIGN.md` at the workspace root for the grounding of each module
//! against the teacher repository.

pub mod engine;
pub mod error;
pub mod nonce;
pub mod token;
pub mod transport;

pub use engine::{DestinationSelector, MobilityEngine};
pub use error::MobilityError;
pub use nonce::NonceStore;
pub use token::{MigrationToken, SubscriptionSnapshot};
pub use transport::{AgentFactory, InProcessTransport, MobilityTransport};
