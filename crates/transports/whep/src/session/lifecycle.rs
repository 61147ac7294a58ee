//! Session ownership, replacement and teardown
//!
//! The [`ResourceLifecycleManager`] keeps at most one active session. Starting
//! on a new endpoint tears the previous session down (awaiting the release of
//! its connection resource) before the new session emits `Negotiating`, so
//! one manager never holds two live resources.

use crate::config::WhepConfig;
use crate::media::MediaHandle;
use crate::observer::{ObserverRegistry, Subscription};
use crate::peer::{PeerState, ResourceEvent, ResourceFactory, WebRtcResourceFactory};
use crate::session::context::{SessionContext, SessionInfo};
use crate::session::negotiator::{Negotiated, SessionNegotiator};
use crate::session::state::{
    ConnectionState, ConnectionStateMachine, PlayerStatus, SessionId, StateChange, StateEvent,
};
use crate::signaling::{parse_endpoint, WhepClient};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long `stop` waits for the session task to wind down
const DRIVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles shared between the manager and a session's background task
#[derive(Clone)]
struct SessionHandles {
    context: Arc<SessionContext>,
    machine: Arc<ConnectionStateMachine>,
}

struct ActiveSession {
    handles: SessionHandles,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    finished: bool,
}

impl ActiveSession {
    /// Cancel negotiation, close the state machine and release the resource
    async fn shutdown(&mut self) {
        self.finished = true;
        self.cancel.cancel();

        let SessionHandles { context, machine } = &self.handles;
        let event = match machine.state() {
            ConnectionState::Disconnected | ConnectionState::Failed => StateEvent::Teardown,
            _ => StateEvent::Stop,
        };
        machine.apply(event);
        context.release().await;

        if let Some(driver) = self.driver.take() {
            if tokio::time::timeout(DRIVER_SHUTDOWN_TIMEOUT, driver)
                .await
                .is_err()
            {
                warn!("Session {} task did not stop in time", context.id());
            }
        }

        info!("Session {} closed", context.id());
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        self.cancel.cancel();
        self.handles.machine.apply(StateEvent::Stop);

        let context = Arc::clone(&self.handles.context);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    context.release().await;
                });
            }
            Err(_) => warn!(
                "Session {} dropped outside a runtime; resource released on drop only",
                context.id()
            ),
        }
    }
}

/// Owns the session for one logical player
pub struct ResourceLifecycleManager {
    config: WhepConfig,
    negotiator: Arc<SessionNegotiator>,
    signaling: WhepClient,
    observers: ObserverRegistry<StateChange>,
    /// Serializes start/stop
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    /// Latest session, readable without awaiting
    current: parking_lot::Mutex<Option<SessionHandles>>,
}

impl ResourceLifecycleManager {
    /// Create a manager backed by webrtc-rs peer connections
    pub fn new(config: WhepConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(WebRtcResourceFactory))
    }

    /// Create a manager with a custom connection resource factory
    pub fn with_factory(config: WhepConfig, factory: Arc<dyn ResourceFactory>) -> Result<Self> {
        config.validate()?;

        let signaling = WhepClient::new(config.request_timeout(), config.auth_token.clone())?;
        let negotiator = Arc::new(SessionNegotiator::new(
            config.clone(),
            factory,
            signaling.clone(),
        ));

        Ok(Self {
            config,
            negotiator,
            signaling,
            observers: ObserverRegistry::new(),
            active: tokio::sync::Mutex::new(None),
            current: parking_lot::Mutex::new(None),
        })
    }

    /// Start (or keep) a session for `endpoint`
    ///
    /// A session already negotiating or live on the same endpoint is kept and
    /// its id returned. Otherwise any existing session is closed and its
    /// resource released before the new session starts negotiating.
    pub async fn start(&self, endpoint: &str) -> Result<SessionId> {
        let endpoint = parse_endpoint(endpoint)?;
        let mut active = self.active.lock().await;

        if let Some(session) = active.as_ref() {
            let state = session.handles.machine.state();
            if session.handles.context.endpoint() == &endpoint
                && matches!(state, ConnectionState::Negotiating | ConnectionState::Live)
            {
                debug!(
                    "Session {} already {:?} on {}",
                    session.handles.context.id(),
                    state,
                    endpoint
                );
                return Ok(session.handles.context.id());
            }
        }

        if let Some(mut previous) = active.take() {
            previous.shutdown().await;
        }

        let context = Arc::new(SessionContext::new(
            endpoint,
            self.signaling.clone(),
            self.config.delete_on_close,
        ));
        let machine = Arc::new(ConnectionStateMachine::new(
            context.id(),
            self.observers.clone(),
        ));
        let handles = SessionHandles {
            context: Arc::clone(&context),
            machine: Arc::clone(&machine),
        };
        *self.current.lock() = Some(handles.clone());

        info!("Starting session {} for {}", context.id(), context.endpoint());
        machine.apply(StateEvent::Negotiate);

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive_session(
            Arc::clone(&self.negotiator),
            handles.clone(),
            cancel.clone(),
        ));

        let id = context.id();
        *active = Some(ActiveSession {
            handles,
            cancel,
            driver: Some(driver),
            finished: false,
        });

        Ok(id)
    }

    /// Close the active session, if any
    ///
    /// Idempotent: safe from any state and after a previous stop.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(mut session) => session.shutdown().await,
            None => debug!("stop() with no active session"),
        }
    }

    /// Observe state changes of every session this manager runs
    pub fn subscribe(&self) -> Subscription<StateChange> {
        self.observers.subscribe()
    }

    /// State of the latest session (`Idle` before the first start)
    pub fn state(&self) -> ConnectionState {
        self.current
            .lock()
            .as_ref()
            .map(|handles| handles.machine.state())
            .unwrap_or(ConnectionState::Idle)
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus::from(self.state())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.current
            .lock()
            .as_ref()
            .map(|handles| handles.context.id())
    }

    /// Negotiated media of the latest session, once live
    pub fn media(&self) -> Option<MediaHandle> {
        self.current
            .lock()
            .as_ref()
            .and_then(|handles| handles.context.media())
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.current
            .lock()
            .as_ref()
            .map(|handles| handles.context.info(handles.machine.state()))
    }
}

async fn drive_session(
    negotiator: Arc<SessionNegotiator>,
    handles: SessionHandles,
    cancel: CancellationToken,
) {
    let SessionHandles { context, machine } = handles;

    match negotiator.negotiate(&context, &cancel).await {
        Ok(Negotiated { media, events }) => {
            context.set_media(media);
            if machine.apply(StateEvent::TrackReceived).is_none() {
                return;
            }
            info!("Session {} is live", context.id());
            watch_transport(&context, &machine, events, &cancel).await;
        }
        Err(e) if e.is_cancelled() => {
            debug!("Session {} negotiation cancelled", context.id());
            context.release().await;
        }
        Err(e) => {
            warn!("Session {} negotiation failed: {}", context.id(), e);
            context.release().await;
            machine.apply(StateEvent::NegotiationFailed(e));
        }
    }
}

/// Feed post-live resource events into the session until it is cancelled or
/// the transport is gone: later tracks join the session's media, transport
/// changes drive the state machine
async fn watch_transport(
    context: &SessionContext,
    machine: &ConnectionStateMachine,
    mut events: Subscription<ResourceEvent>,
    cancel: &CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        let state = match event {
            Some(ResourceEvent::PeerStateChanged(state)) => state,
            Some(ResourceEvent::Track(track)) => {
                if context.add_track(track.clone()) {
                    info!(
                        "Session {} added {} track {}",
                        context.id(),
                        track.kind(),
                        track.track_id()
                    );
                }
                continue;
            }
            None => PeerState::Closed,
        };

        if on_peer_state(state, context, machine).await {
            return;
        }
    }
}

/// Returns `true` once the transport is finished
async fn on_peer_state(
    state: PeerState,
    context: &SessionContext,
    machine: &ConnectionStateMachine,
) -> bool {
    match state {
        PeerState::Disconnected => {
            warn!("Session {} transport disconnected", context.id());
            machine.apply(StateEvent::TransportDisconnected);
            false
        }
        PeerState::Failed | PeerState::Closed => {
            warn!("Session {} transport {:?}", context.id(), state);
            context.release().await;
            machine.apply(StateEvent::TransportFailed);
            true
        }
        _ => false,
    }
}

impl std::fmt::Debug for ResourceLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLifecycleManager")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}
