//! Error types for the WHEP client

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public API (configuration, endpoint validation,
/// resource management)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint URL is not an http(s) URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Negotiation failed
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::InvalidEndpoint(_))
    }
}

/// Why a negotiation attempt did not reach `Live`
///
/// Every variant is terminal for the attempt it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// DNS, connect or TLS failure talking to the WHEP endpoint
    #[error("WHEP endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    /// Endpoint answered with a non-2xx status
    #[error("WHEP endpoint rejected offer with HTTP {status}: {message}")]
    EndpointRejected { status: u16, message: String },

    /// Answer body empty, not text, or not a usable SDP answer
    #[error("Malformed SDP answer: {0}")]
    MalformedAnswer(String),

    /// HTTP request or overall negotiation deadline elapsed
    #[error("Negotiation timed out: {0}")]
    Timeout(String),

    /// Attempt was cancelled by the caller
    #[error("Negotiation cancelled")]
    Cancelled,

    /// Local connection resource failed (creation, offer, or transport
    /// failure before the first inbound track)
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
}

/// Discriminant of a [`NegotiationError`], convenient for matching and
/// assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationErrorKind {
    EndpointUnreachable,
    EndpointRejected(u16),
    MalformedAnswer,
    Timeout,
    Cancelled,
    PeerConnection,
}

impl NegotiationError {
    pub fn kind(&self) -> NegotiationErrorKind {
        match self {
            NegotiationError::EndpointUnreachable(_) => NegotiationErrorKind::EndpointUnreachable,
            NegotiationError::EndpointRejected { status, .. } => {
                NegotiationErrorKind::EndpointRejected(*status)
            }
            NegotiationError::MalformedAnswer(_) => NegotiationErrorKind::MalformedAnswer,
            NegotiationError::Timeout(_) => NegotiationErrorKind::Timeout,
            NegotiationError::Cancelled => NegotiationErrorKind::Cancelled,
            NegotiationError::PeerConnection(_) => NegotiationErrorKind::PeerConnection,
        }
    }

    /// HTTP status for rejected offers
    pub fn status(&self) -> Option<u16> {
        match self {
            NegotiationError::EndpointRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if a caller-level retry has a chance of succeeding
    ///
    /// Client errors (4xx), malformed answers and cancellation are not
    /// retryable; server errors and network conditions are.
    pub fn is_retryable(&self) -> bool {
        match self {
            NegotiationError::EndpointUnreachable(_)
            | NegotiationError::Timeout(_)
            | NegotiationError::PeerConnection(_) => true,
            NegotiationError::EndpointRejected { status, .. } => *status >= 500 || *status == 429,
            NegotiationError::MalformedAnswer(_) | NegotiationError::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NegotiationError::Cancelled)
    }
}

/// Transport-level failure reported after the session went live
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connectivity lost; the transport may or may not recover on its own
    #[error("Transport disconnected")]
    Disconnected,

    /// Connectivity failed permanently
    #[error("Transport failed")]
    Failed,
}

/// Error attached to a transition into `Failed`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = NegotiationError::EndpointRejected {
            status: 404,
            message: "no such stream".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "WHEP endpoint rejected offer with HTTP 404: no such stream"
        );
    }

    #[test]
    fn test_negotiation_error_kind() {
        let err = NegotiationError::EndpointRejected {
            status: 500,
            message: String::new(),
        };
        assert_eq!(err.kind(), NegotiationErrorKind::EndpointRejected(500));
        assert_eq!(err.status(), Some(500));
        assert_eq!(
            NegotiationError::Cancelled.kind(),
            NegotiationErrorKind::Cancelled
        );
        assert_eq!(NegotiationError::Timeout("x".into()).status(), None);
    }

    #[test]
    fn test_negotiation_error_is_retryable() {
        assert!(NegotiationError::EndpointUnreachable("dns".into()).is_retryable());
        assert!(NegotiationError::Timeout("slow".into()).is_retryable());
        assert!(NegotiationError::EndpointRejected {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!NegotiationError::EndpointRejected {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!NegotiationError::MalformedAnswer("empty".into()).is_retryable());
        assert!(!NegotiationError::Cancelled.is_retryable());
    }

    #[test]
    fn test_negotiation_error_conversion() {
        let err = Error::from(NegotiationError::Cancelled);
        assert!(matches!(err, Error::Negotiation(NegotiationError::Cancelled)));
        assert!(!err.is_config_error());
        assert!(Error::InvalidEndpoint("ftp://x".into()).is_config_error());
    }

    #[test]
    fn test_session_error_wraps_both_layers() {
        let err = SessionError::from(TransportError::Failed);
        assert_eq!(err.to_string(), "Transport failed");

        let err = SessionError::from(NegotiationError::MalformedAnswer("empty body".into()));
        assert_eq!(err.to_string(), "Malformed SDP answer: empty body");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
