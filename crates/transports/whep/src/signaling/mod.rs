//! WHEP signaling: HTTP offer/answer exchange and answer validation

pub mod sdp;
pub mod whep;

pub use whep::{parse_endpoint, WhepAnswer, WhepClient, SDP_CONTENT_TYPE};
