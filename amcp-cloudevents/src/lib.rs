//! Bidirectional CloudEvents v1.0 bridge between the internal
//! [`amcp_core::Event`] model and wire-level CloudEvents (component C1,
//! §4.1).

pub mod codec;
pub mod error;

pub use codec::{
    from_cloud_event, from_cloud_event_binary, to_cloud_event, to_cloud_event_binary,
    CloudEventBinary, CloudEventJson,
};
pub use error::CloudEventError;
