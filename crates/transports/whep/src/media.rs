//! Handle to negotiated inbound media

use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of an inbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound track
///
/// Cloning is cheap. For real peer connections the underlying webrtc-rs
/// [`TrackRemote`] is available through [`MediaTrack::remote_track`] so the
/// renderer can read RTP from it.
#[derive(Clone)]
pub struct MediaTrack {
    track_id: String,
    stream_id: String,
    kind: MediaKind,
    mime_type: String,
    remote: Option<Arc<TrackRemote>>,
}

impl MediaTrack {
    /// Wrap a webrtc-rs remote track
    pub fn from_remote(track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        };

        Self {
            track_id: track.id(),
            stream_id: track.stream_id(),
            kind,
            mime_type: track.codec().capability.mime_type.clone(),
            remote: Some(track),
        }
    }

    /// Handle without a backing transport track (mock resources, tests)
    pub fn detached(
        track_id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: MediaKind,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            kind,
            mime_type: mime_type.into(),
            remote: None,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn remote_track(&self) -> Option<&Arc<TrackRemote>> {
        self.remote.as_ref()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("mime_type", &self.mime_type)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// Negotiated inbound stream handed to the renderer
///
/// Starts with the track that made the session live and grows as the remote
/// side adds the other kinds it was offered (typically audio next to video).
#[derive(Debug, Clone)]
pub struct MediaHandle {
    stream_id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaHandle {
    pub fn new(first: MediaTrack) -> Self {
        Self {
            stream_id: first.stream_id.clone(),
            tracks: vec![first],
        }
    }

    /// Add a track; returns `false` if a track with the same id is present
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if self.tracks.iter().any(|t| t.track_id == track.track_id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// Stream id of the first track
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Tracks in arrival order
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First track of `kind`
    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn video(&self) -> Option<&MediaTrack> {
        self.track(MediaKind::Video)
    }

    pub fn audio(&self) -> Option<&MediaTrack> {
        self.track(MediaKind::Audio)
    }
}
