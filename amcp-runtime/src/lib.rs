//! Agent runtime: configuration, the per-agent lifecycle state machine,
//! the subscription book and the `AgentContext` host boundary
//! (components C4 and C5).
//!
//! See `DESIGN.md` at the workspace root for the grounding of each module
//! against the teacher repository.

pub mod config;
pub mod context;
pub mod error;
pub mod state_machine;
pub mod subscription_book;

pub use config::{AmcpConfig, DeliveryOptionsConfig, PriorityConfig};
pub use context::AgentContext;
pub use error::LifecycleError;
pub use state_machine::{AgentStateMachine, TransitionRecord};
pub use subscription_book::{BookEntry, SubscriptionBook};
