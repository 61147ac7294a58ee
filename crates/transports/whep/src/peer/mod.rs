//! Peer connection resources
//!
//! - [`resource`]: the [`ConnectionResource`] seam used by sessions
//! - [`connection`]: webrtc-rs implementation
//! - [`gathering`]: bounded ICE gathering wait

pub mod connection;
pub mod gathering;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod resource;

pub use connection::{WebRtcResource, WebRtcResourceFactory};
pub use gathering::{GatheringOutcome, IceGatheringWaiter};
pub use resource::{ConnectionResource, GatheringState, PeerState, ResourceEvent, ResourceFactory};
