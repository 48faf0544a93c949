//! Media track handles and capability seams
//!
//! Capture itself is a collaborator concern; the signaling core only moves
//! track handles into and out of the negotiation. A [`LocalTrack`] is a
//! cheap cloneable handle naming one outgoing track, with the mute flag and
//! the end-of-capture hook the controller needs. The UI is reached only
//! through the injected [`PreviewSink`] capability.

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone or other audio source
    Audio,
    /// Camera or screen-capture video source
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

type EndedCallback = Box<dyn Fn() + Send + Sync>;

struct TrackInner {
    id: String,
    kind: TrackKind,
    stream_id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    on_ended: Mutex<Vec<EndedCallback>>,
}

/// Handle to one locally acquired media track
///
/// Clones share state: disabling or stopping through any clone is visible
/// through all of them.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl LocalTrack {
    /// Create a track handle
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                stream_id: stream_id.into(),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                on_ended: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Id of the stream this track belongs to
    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    /// Whether the track is currently producing media
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute the track without renegotiation
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop the track; idempotent
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    /// Register a callback fired when the capture source itself ends
    ///
    /// Screen capture ends this way when the user stops sharing from the
    /// system UI; stopping the track locally does not fire it.
    pub fn on_ended(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.on_ended.lock().push(Box::new(callback));
    }

    /// Signal that the capture source ended
    ///
    /// Marks the track stopped and fires every registered end-of-capture
    /// callback. Called by the media collaborator.
    pub fn end_capture(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for callback in self.inner.on_ended.lock().iter() {
            callback();
        }
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("stream_id", &self.inner.stream_id)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Handle to one track received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track id as announced by the transport
    pub id: String,
    /// Track kind
    pub kind: TrackKind,
}

/// Sink collecting the remote peer's tracks for playback
///
/// Owned by one controller session; the transport's incoming-track callback
/// appends here and the preview capability renders from it.
#[derive(Clone, Default)]
pub struct RemoteStream {
    tracks: Arc<Mutex<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    /// Empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a remote track
    pub fn add_track(&self, track: RemoteTrack) {
        self.tracks.lock().push(track);
    }

    /// Snapshot of the current tracks
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.lock().clone()
    }

    /// Number of tracks currently attached
    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Whether no tracks are attached
    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    /// Drop all tracks; playback of them stops
    pub fn clear(&self) {
        self.tracks.lock().clear();
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("tracks", &self.tracks.lock().len())
            .finish()
    }
}

/// Source of local media tracks
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire camera and microphone tracks
    async fn acquire_camera(&self) -> Result<Vec<LocalTrack>>;

    /// Acquire screen-capture tracks
    async fn acquire_screen(&self) -> Result<Vec<LocalTrack>>;
}

/// Presentation capability for local and remote previews
///
/// Implemented by the UI collaborator; the core never reaches into
/// presentation state directly.
pub trait PreviewSink: Send + Sync {
    /// Show the local capture (camera or screen) to the user
    fn attach_local(&self, tracks: &[LocalTrack]);

    /// Show the remote stream to the user
    fn attach_remote(&self, stream: &RemoteStream);

    /// Detach the remote stream, e.g. after the peer disconnects
    fn clear_remote(&self);
}

/// Preview sink that renders nothing
///
/// Default for headless use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn attach_local(&self, _tracks: &[LocalTrack]) {}
    fn attach_remote(&self, _stream: &RemoteStream) {}
    fn clear_remote(&self) {}
}
