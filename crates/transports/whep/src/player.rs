//! Player-facing facade
//!
//! A [`WhepPlayer`] is what one camera tile uses: give it an endpoint, read
//! back `"connecting"`, `"live"` or `"error"` and, once live, the media
//! handle to render.

use crate::config::WhepConfig;
use crate::media::MediaHandle;
use crate::observer::Subscription;
use crate::peer::{ResourceFactory, WebRtcResourceFactory};
use crate::session::{
    ConnectionState, PlayerStatus, ResourceLifecycleManager, SessionId, SessionInfo, StateChange,
};
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Live-view player for one WHEP endpoint at a time
pub struct WhepPlayer {
    manager: ResourceLifecycleManager,
    status: watch::Receiver<PlayerStatus>,
    forwarder: JoinHandle<()>,
}

impl WhepPlayer {
    /// Create a player backed by webrtc-rs peer connections
    ///
    /// Must be called from within a tokio runtime: the status forwarder is
    /// spawned here.
    pub fn new(config: WhepConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(WebRtcResourceFactory))
    }

    /// Create a player with a custom connection resource factory
    pub fn with_factory(
        config: WhepConfig,
        factory: Arc<dyn ResourceFactory>,
    ) -> Result<Self> {
        let manager = ResourceLifecycleManager::with_factory(config, factory)?;
        let (tx, status) = watch::channel(manager.status());

        let mut changes = manager.subscribe();
        let forwarder = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                tx.send_replace(PlayerStatus::from(change.to));
            }
        });

        Ok(Self {
            manager,
            status,
            forwarder,
        })
    }

    /// Start playing `endpoint`, replacing any other endpoint
    pub async fn start(&self, endpoint: &str) -> Result<SessionId> {
        self.manager.start(endpoint).await
    }

    pub async fn stop(&self) {
        self.manager.stop().await
    }

    pub fn status(&self) -> PlayerStatus {
        self.manager.status()
    }

    /// Status stream for display
    pub fn watch_status(&self) -> watch::Receiver<PlayerStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn media(&self) -> Option<MediaHandle> {
        self.manager.media()
    }

    pub fn subscribe(&self) -> Subscription<StateChange> {
        self.manager.subscribe()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.manager.session_info()
    }
}

impl Drop for WhepPlayer {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockBehavior, MockResourceFactory};

    #[tokio::test]
    async fn test_initial_status_is_connecting() {
        let factory: Arc<dyn ResourceFactory> =
            Arc::new(MockResourceFactory::new(MockBehavior::default()));
        let player = WhepPlayer::with_factory(WhepConfig::lan_preset(), factory).unwrap();

        assert_eq!(player.status(), PlayerStatus::Connecting);
        assert_eq!(*player.watch_status().borrow(), PlayerStatus::Connecting);
        assert!(player.media().is_none());
        assert!(player.session_info().is_none());
    }

    #[tokio::test]
    async fn test_stop_reports_error_status() {
        let factory: Arc<dyn ResourceFactory> = Arc::new(MockResourceFactory::new(MockBehavior {
            gathering_delay: None,
            ..Default::default()
        }));
        let player = WhepPlayer::with_factory(WhepConfig::lan_preset(), factory).unwrap();
        let mut status = player.watch_status();

        player.start("http://127.0.0.1:9/cam01/whep").await.unwrap();
        player.stop().await;

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            status.wait_for(|s| *s == PlayerStatus::Error),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(player.state(), ConnectionState::Closed);
    }
}
