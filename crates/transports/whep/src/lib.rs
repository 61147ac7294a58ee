//! WHEP live-view client for ALPR barrier cameras
//!
//! This crate pulls a live camera stream from a media server using the WHEP
//! (WebRTC-HTTP Egress Protocol) signaling pattern and manages the resulting
//! receive-only WebRTC connection.
//!
//! # Features
//!
//! - **Receive-only offers**: recv-only video and audio transceivers
//! - **Bounded ICE gathering**: the offer goes out when gathering completes or
//!   the timeout elapses, with whatever candidates were found
//! - **WHEP signaling**: `POST application/sdp`, answer validation, `Location`
//!   tracking and best-effort `DELETE` on teardown
//! - **Validated state machine**: `Idle → Negotiating → Live →
//!   {Disconnected, Failed} → Closed`, observers notified in order
//! - **Exactly-once release**: each session's peer connection is closed once,
//!   whatever mix of stop, cancellation and failure races to do it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  WhepPlayer (status: connecting | live | error)      │
//! │  └─ ResourceLifecycleManager (one session at a time) │
//! │     ├─ ConnectionStateMachine (+ observers)          │
//! │     └─ SessionNegotiator                             │
//! │        ├─ ResourceFactory → ConnectionResource       │
//! │        ├─ IceGatheringWaiter                         │
//! │        └─ WhepClient (HTTP offer/answer)             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use gateview_whep::WhepConfig;
//!
//! let config = WhepConfig {
//!     stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
//!     ice_gathering_timeout_ms: 3000,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use gateview_whep::{PlayerStatus, WhepConfig, WhepPlayer};
//!
//! # async fn example() -> gateview_whep::Result<()> {
//! let player = WhepPlayer::new(WhepConfig::default())?;
//! player.start("http://192.168.1.50:8889/cam01/whep").await?;
//!
//! let mut status = player.watch_status();
//! while status.changed().await.is_ok() {
//!     if *status.borrow() == PlayerStatus::Live {
//!         // hand the stream (video and audio tracks) to the renderer
//!         let _media = player.media();
//!         break;
//!     }
//! }
//!
//! player.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod observer;
pub mod peer;
pub mod player;
pub mod retry;
pub mod session;
pub mod signaling;

pub use config::{TurnServerConfig, WhepConfig, DEFAULT_STUN_SERVER};
pub use error::{
    Error, NegotiationError, NegotiationErrorKind, Result, SessionError, TransportError,
};
pub use media::{MediaHandle, MediaKind, MediaTrack};
pub use observer::{ObserverRegistry, Subscription};
pub use peer::{ConnectionResource, GatheringOutcome, IceGatheringWaiter, ResourceFactory};
pub use player::WhepPlayer;
pub use retry::ReconnectionPolicy;
pub use session::{
    ConnectionState, PlayerStatus, ResourceLifecycleManager, SessionId, SessionInfo, StateChange,
};
pub use signaling::WhepClient;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
