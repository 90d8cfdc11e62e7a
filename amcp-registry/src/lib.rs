//! Capability advertisement, lookup and TTL-based health for AMCP agents
//! (component C7, §4.7).
//!
//! See `DESIGN.md` at the workspace root for the grounding of each module
//! against the teacher repository.

pub mod error;
pub mod health;
pub mod registry;

pub use error::RegistryError;
pub use health::HealthMonitor;
pub use registry::{shared, CapabilityRecord, CapabilityRegistry, HealthStatus};
