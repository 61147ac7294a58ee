//! webrtc-rs backed connection resource

use crate::config::WhepConfig;
use crate::error::NegotiationError;
use crate::media::MediaTrack;
use crate::observer::{ObserverRegistry, Subscription};
use crate::peer::resource::{
    ConnectionResource, GatheringState, PeerState, ResourceEvent, ResourceFactory,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

/// Receive-only WebRTC peer connection
///
/// Wraps a webrtc::RTCPeerConnection. Callback state (gathering, transport
/// state, candidates) is mirrored into local cells so the synchronous getters
/// of [`ConnectionResource`] never block on the peer connection.
pub struct WebRtcResource {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    gathering_state: Arc<Mutex<GatheringState>>,
    peer_state: Arc<Mutex<PeerState>>,
    candidates: Arc<Mutex<Vec<String>>>,

    gathering_observers: ObserverRegistry<GatheringState>,
    events: ObserverRegistry<ResourceEvent>,
}

impl WebRtcResource {
    /// Create a new receive-only peer connection
    ///
    /// # Arguments
    ///
    /// * `config` - STUN/TURN servers and which media kinds to receive
    #[instrument(skip(config))]
    pub async fn new(config: &WhepConfig) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!("Creating WHEP peer connection: connection_id={}", connection_id);

        // Default codecs (Opus, VP8/VP9/H.264); the server picks from the offer
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        let mut kinds = Vec::new();
        if config.receive_video {
            kinds.push(RTPCodecType::Video);
        }
        if config.receive_audio {
            kinds.push(RTPCodecType::Audio);
        }

        for kind in kinds {
            let added = peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await;

            if let Err(e) = added {
                // Not owned by any session yet
                if let Err(close_err) = peer_connection.close().await {
                    warn!(
                        "Failed to close half-built connection {}: {}",
                        connection_id, close_err
                    );
                }
                return Err(Error::PeerConnectionError(format!(
                    "Failed to add {} transceiver: {}",
                    kind, e
                )));
            }
        }

        let resource = Self {
            connection_id,
            peer_connection,
            gathering_state: Arc::new(Mutex::new(GatheringState::New)),
            peer_state: Arc::new(Mutex::new(PeerState::New)),
            candidates: Arc::new(Mutex::new(Vec::new())),
            gathering_observers: ObserverRegistry::new(),
            events: ObserverRegistry::new(),
        };
        resource.install_handlers();

        Ok(resource)
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn install_handlers(&self) {
        let gathering_state = Arc::clone(&self.gathering_state);
        let gathering_observers = self.gathering_observers.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                if let Some(new_state) = map_gathering_state(s) {
                    debug!(
                        "Connection {} ICE gathering state: {:?}",
                        connection_id, new_state
                    );
                    *gathering_state.lock() = new_state;
                    gathering_observers.notify(new_state);
                }
                Box::pin(async {})
            }));

        let candidates = Arc::clone(&self.candidates);
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => candidates.lock().push(init.candidate),
                        Err(e) => warn!(
                            "Connection {} dropped unserializable candidate: {}",
                            connection_id, e
                        ),
                    }
                }
                Box::pin(async {})
            }));

        let peer_state = Arc::clone(&self.peer_state);
        let events = self.events.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                if let Some(new_state) = map_peer_state(s) {
                    let mut guard = peer_state.lock();
                    if *guard != new_state {
                        debug!(
                            "Connection {} state transition: {:?} -> {:?}",
                            connection_id, *guard, new_state
                        );
                        *guard = new_state;
                        events.notify(ResourceEvent::PeerStateChanged(new_state));
                    }
                }
                Box::pin(async {})
            }));

        let events = self.events.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let handle = MediaTrack::from_remote(track);
                info!(
                    "Connection {} received {} track {} ({})",
                    connection_id,
                    handle.kind(),
                    handle.track_id(),
                    handle.mime_type()
                );
                events.notify(ResourceEvent::Track(handle));
                Box::pin(async {})
            },
        ));
    }

    /// Replace every callback with a no-op so the peer connection no longer
    /// references our registries
    fn detach_handlers(&self) {
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(|_: RTCIceGathererState| Box::pin(async {})));
        self.peer_connection
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.peer_connection
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| {
                Box::pin(async {})
            }));
        self.peer_connection.on_track(Box::new(
            |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async {})
            },
        ));
    }
}

#[async_trait]
impl ConnectionResource for WebRtcResource {
    fn id(&self) -> &str {
        &self.connection_id
    }

    async fn create_receive_offer(&self) -> std::result::Result<String, NegotiationError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::PeerConnection(format!("Failed to create offer: {}", e)))?;

        // Setting the local description starts ICE gathering
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                NegotiationError::PeerConnection(format!("Failed to set local description: {}", e))
            })?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            NegotiationError::PeerConnection(
                "No local description after setting offer".to_string(),
            )
        })?;

        debug!("Created receive-only offer on connection {}", self.connection_id);

        Ok(local_desc.sdp)
    }

    async fn local_description(&self) -> Option<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
    }

    fn gathering_state(&self) -> GatheringState {
        *self.gathering_state.lock()
    }

    fn subscribe_gathering(&self) -> Subscription<GatheringState> {
        self.gathering_observers.subscribe()
    }

    fn gathered_candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    async fn apply_answer(&self, sdp: &str) -> std::result::Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| NegotiationError::MalformedAnswer(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| {
                NegotiationError::MalformedAnswer(format!("Failed to set remote description: {}", e))
            })?;

        debug!("Applied remote answer on connection {}", self.connection_id);
        Ok(())
    }

    fn peer_state(&self) -> PeerState {
        *self.peer_state.lock()
    }

    fn subscribe_events(&self) -> Subscription<ResourceEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        info!("Closing WHEP peer connection {}", self.connection_id);

        self.gathering_observers.close();
        self.events.close();
        self.detach_handlers();
        *self.peer_state.lock() = PeerState::Closed;

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })?;

        Ok(())
    }
}

/// Factory producing [`WebRtcResource`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcResourceFactory;

#[async_trait]
impl ResourceFactory for WebRtcResourceFactory {
    async fn create(
        &self,
        config: &WhepConfig,
    ) -> std::result::Result<Arc<dyn ConnectionResource>, NegotiationError> {
        let resource = WebRtcResource::new(config)
            .await
            .map_err(|e| NegotiationError::PeerConnection(e.to_string()))?;
        Ok(Arc::new(resource))
    }
}

fn ice_servers(config: &WhepConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

fn map_gathering_state(state: RTCIceGathererState) -> Option<GatheringState> {
    match state {
        RTCIceGathererState::New => Some(GatheringState::New),
        RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
        RTCIceGathererState::Complete => Some(GatheringState::Complete),
        _ => None,
    }
}

fn map_peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_ice_servers_from_config() {
        let config = WhepConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "pass");
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_gathering_state(RTCIceGathererState::Complete),
            Some(GatheringState::Complete)
        );
        assert_eq!(map_gathering_state(RTCIceGathererState::Unspecified), None);
        assert_eq!(
            map_peer_state(RTCPeerConnectionState::Disconnected),
            Some(PeerState::Disconnected)
        );
        assert_eq!(map_peer_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn test_resource_creation() {
        let resource = WebRtcResource::new(&WhepConfig::lan_preset()).await.unwrap();

        assert!(!resource.connection_id().is_empty());
        assert_eq!(resource.gathering_state(), GatheringState::New);
        assert_eq!(resource.peer_state(), PeerState::New);
        assert!(resource.gathered_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_receive_only_offer() {
        let resource = WebRtcResource::new(&WhepConfig::lan_preset()).await.unwrap();

        let sdp = resource.create_receive_offer().await.unwrap();
        assert!(sdp.contains("m=video"));
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("a=recvonly"));
        assert!(!sdp.contains("a=sendrecv"));

        resource.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_video_only_offer() {
        let config = WhepConfig {
            receive_audio: false,
            ..WhepConfig::lan_preset()
        };
        let resource = WebRtcResource::new(&config).await.unwrap();

        let sdp = resource.create_receive_offer().await.unwrap();
        assert!(sdp.contains("m=video"));
        assert!(!sdp.contains("m=audio"));

        resource.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_detaches_observers() {
        let resource = WebRtcResource::new(&WhepConfig::lan_preset()).await.unwrap();
        let mut events = resource.subscribe_events();
        let _gathering = resource.subscribe_gathering();

        resource.close().await.unwrap();

        assert!(resource.gathering_observers.is_empty());
        assert!(resource.events.is_closed());
        assert_eq!(resource.peer_state(), PeerState::Closed);
        assert!(events.recv().await.is_none());
    }
}
