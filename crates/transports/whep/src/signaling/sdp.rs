//! SDP answer checks

use crate::error::NegotiationError;
use std::io::Cursor;
use webrtc::sdp::description::session::SessionDescription;

/// Validate a WHEP answer body and return it as text
///
/// Rejects bodies that are not UTF-8, are empty or whitespace-only, do not
/// parse as SDP, or carry no media section.
pub fn validate_answer(body: &[u8]) -> Result<String, NegotiationError> {
    let text = std::str::from_utf8(body).map_err(|e| {
        NegotiationError::MalformedAnswer(format!("answer is not UTF-8 text: {}", e))
    })?;

    if text.trim().is_empty() {
        return Err(NegotiationError::MalformedAnswer(
            "empty answer body".to_string(),
        ));
    }

    let mut reader = Cursor::new(text.as_bytes());
    let parsed = SessionDescription::unmarshal(&mut reader)
        .map_err(|e| NegotiationError::MalformedAnswer(format!("invalid SDP: {}", e)))?;

    if parsed.media_descriptions.is_empty() {
        return Err(NegotiationError::MalformedAnswer(
            "answer has no media sections".to_string(),
        ));
    }

    Ok(text.to_string())
}

/// Number of `a=candidate:` lines in an SDP blob
pub fn candidate_count(sdp: &str) -> usize {
    sdp.lines()
        .filter(|line| line.trim_start().starts_with("a=candidate:"))
        .count()
}
