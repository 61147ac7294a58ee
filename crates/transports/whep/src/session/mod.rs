//! Sessions: negotiation, state machine and resource lifecycle

pub mod context;
pub mod lifecycle;
pub mod negotiator;
pub mod state;

pub use context::{ResourceSlot, SessionContext, SessionInfo};
pub use lifecycle::ResourceLifecycleManager;
pub use negotiator::{Negotiated, SessionNegotiator};
pub use state::{
    next_state, ConnectionState, ConnectionStateMachine, PlayerStatus, SessionId, StateChange,
    StateEvent,
};
