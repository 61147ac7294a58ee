//! Session connection state machine

use crate::error::{NegotiationError, SessionError, TransportError};
use crate::observer::ObserverRegistry;
use parking_lot::Mutex;
use std::time::SystemTime;
use tracing::debug;

/// Unique session identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, negotiation not started
    Idle,
    /// Offer/answer exchange in progress
    Negotiating,
    /// First inbound track received
    Live,
    /// Transport lost connectivity after going live
    Disconnected,
    /// Negotiation failed or transport failed permanently
    Failed,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Transition request fed to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Negotiate,
    TrackReceived,
    NegotiationFailed(NegotiationError),
    TransportDisconnected,
    TransportFailed,
    Teardown,
    Stop,
}

impl StateEvent {
    fn error(&self) -> Option<SessionError> {
        match self {
            StateEvent::NegotiationFailed(e) => Some(SessionError::Negotiation(e.clone())),
            StateEvent::TransportFailed => Some(SessionError::Transport(TransportError::Failed)),
            _ => None,
        }
    }
}

/// Target state for `event` in state `from`, or `None` if the event is not
/// an outgoing edge of `from`
pub fn next_state(from: ConnectionState, event: &StateEvent) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (from, event) {
        (Closed, _) => None,
        (_, StateEvent::Stop) => Some(Closed),
        (Idle, StateEvent::Negotiate) => Some(Negotiating),
        (Negotiating, StateEvent::TrackReceived) => Some(Live),
        (Negotiating, StateEvent::NegotiationFailed(_)) => Some(Failed),
        (Live, StateEvent::TransportDisconnected) => Some(Disconnected),
        (Live, StateEvent::TransportFailed) => Some(Failed),
        (Disconnected | Failed, StateEvent::Teardown) => Some(Closed),
        _ => None,
    }
}

/// Accepted transition, delivered to state observers
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub session_id: SessionId,
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Cause of a transition into `Failed`
    pub error: Option<SessionError>,
    pub at: SystemTime,
}

/// Single source of truth for one session's state
///
/// Transition and notification happen under one lock, so observers see
/// changes in exactly the order they were accepted.
pub struct ConnectionStateMachine {
    session_id: SessionId,
    state: Mutex<ConnectionState>,
    observers: ObserverRegistry<StateChange>,
}

impl ConnectionStateMachine {
    pub fn new(session_id: SessionId, observers: ObserverRegistry<StateChange>) -> Self {
        Self {
            session_id,
            state: Mutex::new(ConnectionState::Idle),
            observers,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Apply `event`; returns the accepted change, or `None` if ignored
    pub fn apply(&self, event: StateEvent) -> Option<StateChange> {
        let mut state = self.state.lock();
        let from = *state;

        let Some(to) = next_state(from, &event) else {
            debug!(
                "Session {} ignored {:?} in state {:?}",
                self.session_id, event, from
            );
            return None;
        };

        *state = to;
        let change = StateChange {
            session_id: self.session_id,
            from,
            to,
            error: event.error(),
            at: SystemTime::now(),
        };

        debug!("Session {} state: {:?} -> {:?}", self.session_id, from, to);
        self.observers.notify(change.clone());

        Some(change)
    }
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Status shown to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Connecting,
    Live,
    Error,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Connecting => "connecting",
            PlayerStatus::Live => "live",
            PlayerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConnectionState> for PlayerStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle | ConnectionState::Negotiating => PlayerStatus::Connecting,
            ConnectionState::Live => PlayerStatus::Live,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed => {
                PlayerStatus::Error
            }
        }
    }
}
