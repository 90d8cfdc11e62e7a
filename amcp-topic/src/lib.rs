//! Hierarchical topic pattern compiler and trie-indexed subscription
//! matcher (component C2, §4.2).

pub mod error;
pub mod index;
pub mod pattern;

pub use error::PatternError;
pub use index::{SubscriptionHandle, SubscriptionIndex};
pub use pattern::Pattern;
