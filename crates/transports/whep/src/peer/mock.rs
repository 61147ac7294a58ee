//! In-process connection resource for tests
//!
//! Scripted through [`MockBehavior`]: how long gathering takes, which
//! candidates appear, whether and when a track arrives. The factory keeps
//! every resource it created together with live/closed counters so tests can
//! assert release and ordering guarantees without a network.

use crate::config::WhepConfig;
use crate::error::NegotiationError;
use crate::media::{MediaKind, MediaTrack};
use crate::observer::{ObserverRegistry, Subscription};
use crate::peer::resource::{
    ConnectionResource, GatheringState, PeerState, ResourceEvent, ResourceFactory,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Script for a [`MockResource`]
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Delay before gathering completes; `None` never completes
    pub gathering_delay: Option<Duration>,
    /// Candidates available as soon as gathering starts
    pub candidates: Vec<String>,
    /// Delay after the answer before the tracks arrive; `None` never
    pub track_delay: Option<Duration>,
    /// Kinds of the tracks delivered after `track_delay`, in order
    pub track_kinds: Vec<MediaKind>,
    /// Time the factory spends building the resource
    pub create_delay: Option<Duration>,
    pub fail_offer: bool,
    pub reject_answer: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            gathering_delay: Some(Duration::from_millis(10)),
            candidates: vec!["candidate:1 1 udp 2130706431 192.168.1.20 50000 typ host".to_string()],
            track_delay: Some(Duration::from_millis(10)),
            track_kinds: vec![MediaKind::Video],
            create_delay: None,
            fail_offer: false,
            reject_answer: false,
        }
    }
}

#[derive(Debug, Default)]
struct MockStats {
    created: AtomicUsize,
    closed: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Scripted [`ConnectionResource`]
pub struct MockResource {
    id: String,
    behavior: MockBehavior,
    receive_video: bool,
    receive_audio: bool,
    gathering_state: Arc<Mutex<GatheringState>>,
    peer_state: Arc<Mutex<PeerState>>,
    candidates: Arc<Mutex<Vec<String>>>,
    gathering_observers: ObserverRegistry<GatheringState>,
    events: ObserverRegistry<ResourceEvent>,
    offer: Mutex<Option<String>>,
    offered_at: Mutex<Option<Instant>>,
    answer: Mutex<Option<String>>,
    closed: Arc<AtomicBool>,
    close_count: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Option<Arc<MockStats>>,
}

impl MockResource {
    pub fn new(config: &WhepConfig, behavior: MockBehavior) -> Self {
        Self::build(config, behavior, None)
    }

    fn build(config: &WhepConfig, behavior: MockBehavior, stats: Option<Arc<MockStats>>) -> Self {
        Self {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            behavior,
            receive_video: config.receive_video,
            receive_audio: config.receive_audio,
            gathering_state: Arc::new(Mutex::new(GatheringState::New)),
            peer_state: Arc::new(Mutex::new(PeerState::New)),
            candidates: Arc::new(Mutex::new(Vec::new())),
            gathering_observers: ObserverRegistry::new(),
            events: ObserverRegistry::new(),
            offer: Mutex::new(None),
            offered_at: Mutex::new(None),
            answer: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            close_count: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
            stats,
        }
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// When the offer was created (gathering started)
    pub fn offered_at(&self) -> Option<Instant> {
        *self.offered_at.lock()
    }

    /// Answer SDP applied to this resource
    pub fn applied_answer(&self) -> Option<String> {
        self.answer.lock().clone()
    }

    pub fn gathering_observer_count(&self) -> usize {
        self.gathering_observers.len()
    }

    pub fn event_observer_count(&self) -> usize {
        self.events.len()
    }

    /// Force gathering to complete now
    pub fn finish_gathering(&self) {
        if self.is_closed() {
            return;
        }
        *self.gathering_state.lock() = GatheringState::Complete;
        self.gathering_observers.notify(GatheringState::Complete);
    }

    /// Inject a transport state change
    pub fn emit_peer_state(&self, state: PeerState) {
        if self.is_closed() {
            return;
        }
        *self.peer_state.lock() = state;
        self.events.notify(ResourceEvent::PeerStateChanged(state));
    }

    /// Inject an inbound video track
    pub fn deliver_track(&self) {
        self.deliver_track_of(MediaKind::Video);
    }

    /// Inject an inbound track of `kind`
    pub fn deliver_track_of(&self, kind: MediaKind) {
        if self.is_closed() {
            return;
        }
        self.events.notify(ResourceEvent::Track(mock_track(kind)));
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(task));
    }

    fn offer_sdp(&self) -> String {
        let mut sdp = String::from(
            "v=0\r\no=- 4215 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0 1\r\n",
        );
        let mut mid = 0;
        if self.receive_video {
            sdp.push_str(&format!(
                "m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=mid:{}\r\na=recvonly\r\na=rtpmap:96 H264/90000\r\n",
                mid
            ));
            mid += 1;
        }
        if self.receive_audio {
            sdp.push_str(&format!(
                "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=mid:{}\r\na=recvonly\r\na=rtpmap:111 opus/48000/2\r\n",
                mid
            ));
        }
        sdp
    }
}

fn mock_track(kind: MediaKind) -> MediaTrack {
    match kind {
        MediaKind::Video => MediaTrack::detached("video0", "mock-stream", kind, "video/H264"),
        MediaKind::Audio => MediaTrack::detached("audio0", "mock-stream", kind, "audio/opus"),
    }
}

#[async_trait]
impl ConnectionResource for MockResource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_receive_offer(&self) -> Result<String, NegotiationError> {
        if self.behavior.fail_offer {
            return Err(NegotiationError::PeerConnection(
                "mock offer failure".to_string(),
            ));
        }

        let offer = self.offer_sdp();
        *self.offer.lock() = Some(offer.clone());
        *self.offered_at.lock() = Some(Instant::now());

        self.candidates
            .lock()
            .extend(self.behavior.candidates.iter().cloned());
        *self.gathering_state.lock() = GatheringState::Gathering;
        self.gathering_observers.notify(GatheringState::Gathering);

        if let Some(delay) = self.behavior.gathering_delay {
            let state = Arc::clone(&self.gathering_state);
            let observers = self.gathering_observers.clone();
            let closed = Arc::clone(&self.closed);
            self.spawn(async move {
                tokio::time::sleep(delay).await;
                if !closed.load(Ordering::SeqCst) {
                    *state.lock() = GatheringState::Complete;
                    observers.notify(GatheringState::Complete);
                }
            });
        }

        Ok(offer)
    }

    async fn local_description(&self) -> Option<String> {
        let mut sdp = self.offer.lock().clone()?;
        for candidate in self.candidates.lock().iter() {
            sdp.push_str(&format!("a={}\r\n", candidate));
        }
        if *self.gathering_state.lock() == GatheringState::Complete {
            sdp.push_str("a=end-of-candidates\r\n");
        }
        Some(sdp)
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

    async fn apply_answer(&self, sdp: &str) -> Result<(), NegotiationError> {
        if self.behavior.reject_answer {
            return Err(NegotiationError::MalformedAnswer(
                "mock rejected answer".to_string(),
            ));
        }

        *self.answer.lock() = Some(sdp.to_string());
        self.emit_peer_state(PeerState::Connecting);

        if let Some(delay) = self.behavior.track_delay {
            let peer_state = Arc::clone(&self.peer_state);
            let events = self.events.clone();
            let closed = Arc::clone(&self.closed);
            let kinds = self.behavior.track_kinds.clone();
            self.spawn(async move {
                tokio::time::sleep(delay).await;
                if !closed.load(Ordering::SeqCst) {
                    *peer_state.lock() = PeerState::Connected;
                    events.notify(ResourceEvent::PeerStateChanged(PeerState::Connected));
                    for kind in kinds {
                        events.notify(ResourceEvent::Track(mock_track(kind)));
                    }
                }
            });
        }

        Ok(())
    }

    fn peer_state(&self) -> PeerState {
        *self.peer_state.lock()
    }

    fn subscribe_events(&self) -> Subscription<ResourceEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> crate::Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.gathering_observers.close();
        self.events.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.peer_state.lock() = PeerState::Closed;

        if let Some(stats) = &self.stats {
            stats.closed.fetch_add(1, Ordering::SeqCst);
            stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// [`ResourceFactory`] producing [`MockResource`]s
#[derive(Default)]
pub struct MockResourceFactory {
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    resources: Mutex<Vec<Arc<MockResource>>>,
}

impl MockResourceFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    /// Every resource created so far, oldest first
    pub fn resources(&self) -> Vec<Arc<MockResource>> {
        self.resources.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockResource>> {
        self.resources.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Resources created and not yet closed
    pub fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live resources observed
    pub fn max_live(&self) -> usize {
        self.stats.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for MockResourceFactory {
    async fn create(
        &self,
        config: &WhepConfig,
    ) -> Result<Arc<dyn ConnectionResource>, NegotiationError> {
        if let Some(delay) = self.behavior.create_delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.clone();
        let resource = Arc::new(MockResource::build(
            config,
            behavior,
            Some(Arc::clone(&self.stats)),
        ));

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);
        self.resources.lock().push(Arc::clone(&resource));

        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_respects_media_kinds() {
        let config = WhepConfig {
            receive_audio: false,
            ..Default::default()
        };
        let resource = MockResource::new(&config, MockBehavior::default());
        let offer = resource.create_receive_offer().await.unwrap();

        assert!(offer.contains("m=video"));
        assert!(!offer.contains("m=audio"));
        assert!(offer.contains("a=recvonly"));
    }

    #[tokio::test]
    async fn test_local_description_carries_candidates() {
        let resource = MockResource::new(&WhepConfig::default(), MockBehavior::default());
        assert!(resource.local_description().await.is_none());

        resource.create_receive_offer().await.unwrap();
        resource.finish_gathering();

        let sdp = resource.local_description().await.unwrap();
        assert!(sdp.contains("a=candidate:1 1 udp"));
        assert!(sdp.ends_with("a=end-of-candidates\r\n"));
    }

    #[tokio::test]
    async fn test_close_is_counted_once_in_stats() {
        let factory = MockResourceFactory::new(MockBehavior::default());
        let resource = factory.create(&WhepConfig::default()).await.unwrap();
        assert_eq!(factory.live(), 1);

        resource.close().await.unwrap();
        resource.close().await.unwrap();

        let mock = factory.last().unwrap();
        assert_eq!(mock.close_count(), 2);
        assert_eq!(factory.closed(), 1);
        assert_eq!(factory.live(), 0);
        assert_eq!(factory.max_live(), 1);
    }

    #[tokio::test]
    async fn test_no_events_after_close() {
        let resource = MockResource::new(&WhepConfig::default(), MockBehavior::default());
        let mut events = resource.subscribe_events();

        resource.close().await.unwrap();
        resource.emit_peer_state(PeerState::Failed);
        resource.deliver_track();

        assert!(events.recv().await.is_none());
        assert_eq!(resource.event_observer_count(), 0);
    }
}
