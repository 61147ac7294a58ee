//! Connection resource abstraction
//!
//! A [`ConnectionResource`] is one peer connection owned by exactly one
//! session. The negotiator and lifecycle manager only talk to this trait, so
//! the webrtc-rs implementation and the in-process mock are interchangeable.

use crate::config::WhepConfig;
use crate::error::NegotiationError;
use crate::media::MediaTrack;
use crate::observer::Subscription;
use async_trait::async_trait;
use std::sync::Arc;

/// ICE candidate gathering state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// Transport-level state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Event emitted by a resource after the offer is applied
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// Remote side started sending a track
    Track(MediaTrack),
    /// Transport state changed
    PeerStateChanged(PeerState),
}

/// One receive-only peer connection
#[async_trait]
pub trait ConnectionResource: Send + Sync {
    /// Identifier for logging
    fn id(&self) -> &str;

    /// Build a receive-only offer, set it as the local description and start
    /// ICE gathering. Returns the offer SDP (without candidates).
    async fn create_receive_offer(&self) -> Result<String, NegotiationError>;

    /// Current local description including every candidate gathered so far
    async fn local_description(&self) -> Option<String>;

    fn gathering_state(&self) -> GatheringState;

    /// Observe gathering state changes; dropping the subscription deregisters
    fn subscribe_gathering(&self) -> Subscription<GatheringState>;

    /// Candidates gathered so far (opaque `candidate:` lines)
    fn gathered_candidates(&self) -> Vec<String>;

    /// Apply the remote SDP answer
    async fn apply_answer(&self, sdp: &str) -> Result<(), NegotiationError>;

    fn peer_state(&self) -> PeerState;

    /// Observe tracks and transport state; dropping the subscription deregisters
    fn subscribe_events(&self) -> Subscription<ResourceEvent>;

    /// Release the resource: detach every observer and close the transport
    async fn close(&self) -> crate::Result<()>;
}

/// Creates connection resources for new sessions
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn create(
        &self,
        config: &WhepConfig,
    ) -> Result<Arc<dyn ConnectionResource>, NegotiationError>;
}
