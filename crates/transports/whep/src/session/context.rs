//! Per-session data and the exactly-once release slot

use crate::error::NegotiationError;
use crate::media::{MediaHandle, MediaTrack};
use crate::peer::ConnectionResource;
use crate::session::state::{ConnectionState, SessionId};
use crate::signaling::WhepClient;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use url::Url;

enum SlotState {
    Empty,
    Held(Arc<dyn ConnectionResource>),
    Released,
}

/// Owner of a session's connection resource
///
/// The slot moves `Empty -> Held -> Released` (or straight to `Released`).
/// `release` closes the held resource at most once; concurrent callers wait
/// until that close has finished.
pub struct ResourceSlot {
    inner: tokio::sync::Mutex<SlotState>,
}

impl ResourceSlot {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(SlotState::Empty),
        }
    }

    /// Hand ownership of `resource` to the slot
    ///
    /// If the slot was already released the resource is closed at once and
    /// the attempt resolves `Cancelled`.
    pub async fn install(
        &self,
        resource: Arc<dyn ConnectionResource>,
    ) -> Result<(), NegotiationError> {
        let mut guard = self.inner.lock().await;
        if matches!(*guard, SlotState::Empty) {
            *guard = SlotState::Held(resource);
            return Ok(());
        }

        let existing = match &*guard {
            SlotState::Held(existing) => Some(existing.id().to_string()),
            _ => None,
        };
        drop(guard);

        debug!("Slot cannot take resource {}, closing it", resource.id());
        if let Err(e) = resource.close().await {
            warn!("Failed to close rejected resource {}: {}", resource.id(), e);
        }

        match existing {
            Some(existing) => Err(NegotiationError::PeerConnection(format!(
                "session already owns resource {}",
                existing
            ))),
            None => Err(NegotiationError::Cancelled),
        }
    }

    /// Currently held resource, if any
    pub async fn resource(&self) -> Option<Arc<dyn ConnectionResource>> {
        match &*self.inner.lock().await {
            SlotState::Held(resource) => Some(Arc::clone(resource)),
            _ => None,
        }
    }

    /// Close the held resource; returns `true` only for the call that did it
    pub async fn release(&self) -> bool {
        let mut guard = self.inner.lock().await;
        match std::mem::replace(&mut *guard, SlotState::Released) {
            SlotState::Held(resource) => {
                if let Err(e) = resource.close().await {
                    warn!("Failed to close resource {}: {}", resource.id(), e);
                }
                true
            }
            SlotState::Empty | SlotState::Released => false,
        }
    }

    pub async fn is_released(&self) -> bool {
        matches!(&*self.inner.lock().await, SlotState::Released)
    }
}

impl Default for ResourceSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One session: endpoint, owned resource and negotiated descriptions
pub struct SessionContext {
    id: SessionId,
    endpoint: Url,
    created_at: SystemTime,
    slot: ResourceSlot,
    local_sdp: Mutex<Option<String>>,
    remote_sdp: Mutex<Option<String>>,
    location: Mutex<Option<Url>>,
    media: Mutex<Option<MediaHandle>>,
    signaling: WhepClient,
    delete_on_close: bool,
}

impl SessionContext {
    pub fn new(endpoint: Url, signaling: WhepClient, delete_on_close: bool) -> Self {
        Self {
            id: SessionId::new(),
            endpoint,
            created_at: SystemTime::now(),
            slot: ResourceSlot::new(),
            local_sdp: Mutex::new(None),
            remote_sdp: Mutex::new(None),
            location: Mutex::new(None),
            media: Mutex::new(None),
            signaling,
            delete_on_close,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn slot(&self) -> &ResourceSlot {
        &self.slot
    }

    pub fn local_sdp(&self) -> Option<String> {
        self.local_sdp.lock().clone()
    }

    pub fn set_local_sdp(&self, sdp: String) {
        *self.local_sdp.lock() = Some(sdp);
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.remote_sdp.lock().clone()
    }

    pub fn set_remote_sdp(&self, sdp: String) {
        *self.remote_sdp.lock() = Some(sdp);
    }

    /// WHEP session resource URL from the `Location` header
    pub fn location(&self) -> Option<Url> {
        self.location.lock().clone()
    }

    pub fn set_location(&self, location: Option<Url>) {
        *self.location.lock() = location;
    }

    pub fn media(&self) -> Option<MediaHandle> {
        self.media.lock().clone()
    }

    pub fn set_media(&self, media: MediaHandle) {
        *self.media.lock() = Some(media);
    }

    /// Add a track that arrived after the session went live
    ///
    /// Returns `false` for a track already in the stream.
    pub fn add_track(&self, track: MediaTrack) -> bool {
        let mut media = self.media.lock();
        match media.as_mut() {
            Some(handle) => handle.add_track(track),
            None => {
                *media = Some(MediaHandle::new(track));
                true
            }
        }
    }

    /// Release the connection resource (at most once) and, if the server
    /// named a session resource, delete it in the background
    pub async fn release(&self) -> bool {
        if !self.slot.release().await {
            return false;
        }

        info!("Session {} released its connection resource", self.id);

        if self.delete_on_close {
            if let Some(location) = self.location() {
                let signaling = self.signaling.clone();
                let session_id = self.id;
                tokio::spawn(async move {
                    if let Err(e) = signaling.delete_session(&location).await {
                        warn!("Session {} WHEP DELETE failed: {}", session_id, e);
                    }
                });
            }
        }

        true
    }

    /// Snapshot for display and diagnostics
    pub fn info(&self, state: ConnectionState) -> SessionInfo {
        SessionInfo {
            id: self.id,
            endpoint: self.endpoint.clone(),
            created_at: self.created_at,
            state,
            local_sdp: self.local_sdp(),
            remote_sdp: self.remote_sdp(),
            location: self.location(),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub endpoint: Url,
    pub created_at: SystemTime,
    pub state: ConnectionState,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    pub location: Option<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhepConfig;
    use crate::peer::mock::{MockBehavior, MockResourceFactory};
    use crate::peer::ResourceFactory;
    use std::time::Duration;

    fn context() -> SessionContext {
        let signaling = WhepClient::new(Duration::from_secs(1), None).unwrap();
        SessionContext::new(
            Url::parse("http://127.0.0.1:9/cam01/whep").unwrap(),
            signaling,
            false,
        )
    }

    #[tokio::test]
    async fn test_release_exactly_once() {
        let factory = MockResourceFactory::new(MockBehavior::default());
        let context = context();
        let resource = factory.create(&WhepConfig::default()).await.unwrap();
        context.slot().install(resource).await.unwrap();

        let (a, b, c) = tokio::join!(context.release(), context.release(), context.release());
        assert_eq!([a, b, c].iter().filter(|released| **released).count(), 1);

        let mock = factory.last().unwrap();
        assert_eq!(mock.close_count(), 1);
        assert!(context.slot().is_released().await);
        assert!(context.slot().resource().await.is_none());
    }

    #[tokio::test]
    async fn test_install_after_release_closes_resource() {
        let factory = MockResourceFactory::new(MockBehavior::default());
        let context = context();
        assert!(!context.release().await);

        let resource = factory.create(&WhepConfig::default()).await.unwrap();
        let err = context.slot().install(resource).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(factory.last().unwrap().is_closed());
        assert_eq!(factory.live(), 0);
    }

    #[tokio::test]
    async fn test_second_install_rejected() {
        let factory = MockResourceFactory::new(MockBehavior::default());
        let context = context();

        let first = factory.create(&WhepConfig::default()).await.unwrap();
        let second = factory.create(&WhepConfig::default()).await.unwrap();
        context.slot().install(first).await.unwrap();

        let err = context.slot().install(second).await.unwrap_err();
        assert!(matches!(err, NegotiationError::PeerConnection(_)));
        assert_eq!(factory.live(), 1);
    }

    #[test]
    fn test_info_snapshot() {
        let context = context();
        context.set_local_sdp("v=0".to_string());
        context.set_location(Some(Url::parse("http://127.0.0.1:9/s/1").unwrap()));

        let info = context.info(ConnectionState::Negotiating);
        assert_eq!(info.id, context.id());
        assert_eq!(info.state, ConnectionState::Negotiating);
        assert_eq!(info.local_sdp.as_deref(), Some("v=0"));
        assert!(info.remote_sdp.is_none());
        assert_eq!(info.location.unwrap().path(), "/s/1");
    }
}
