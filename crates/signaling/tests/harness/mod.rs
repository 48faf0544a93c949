//! Controller integration test harness
//!
//! Provides infrastructure for exercising the signaling state machine
//! end to end against the in-memory store:
//! - A mock negotiation transport with a faithful offer/answer sub-state
//!   machine and hooks for emitting candidates, tracks and state changes
//! - A scripted media source handing out labelled track handles
//! - A recording preview sink
//!
//! Basic usage pattern:
//!
//! 1. Create a `Peer` per participant sharing one `MemoryStore`
//! 2. Join and drive the exchange through the store
//! 3. Emit transport events through `MockTransport` handles
//! 4. Assert on store records and recorded transport operations

#![allow(dead_code)]

use async_trait::async_trait;
use paircall_signaling::{
    CandidateCallback, CandidateEntry, ConnectionState, ConnectionStateCallback, Error,
    LocalTrack, MediaSource, NegotiationState, NegotiationTransport, PreviewSink, RemoteStream,
    RemoteTrack, RemoteTrackCallback, Result, RoomId, SdpKind, SessionDescription,
    SignalingController, SignalingStore, TrackKind, TransportFactory,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Let spawned notification handlers drain
pub async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

/// Build a candidate entry with a distinguishable payload
pub fn candidate(label: &str) -> CandidateEntry {
    CandidateEntry {
        candidate: format!("candidate:{} 1 udp 2130706431 10.0.0.1 54321 typ host", label),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Mock negotiation transport
///
/// Implements the browser signaling sub-state machine over plain mutexes
/// and records every operation the controller performs.
pub struct MockTransport {
    state: Mutex<NegotiationState>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    added_tracks: Mutex<Vec<LocalTrack>>,
    replaced_tracks: Mutex<Vec<(TrackKind, LocalTrack)>>,
    added_candidates: Mutex<Vec<CandidateEntry>>,
    candidate_callback: Mutex<Option<CandidateCallback>>,
    remote_track_callback: Mutex<Option<RemoteTrackCallback>>,
    connection_callback: Mutex<Option<ConnectionStateCallback>>,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

/// Distinguishes every description issued across all mock transports
static DESCRIPTIONS_ISSUED: AtomicUsize = AtomicUsize::new(0);

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NegotiationState::Stable),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            added_tracks: Mutex::new(Vec::new()),
            replaced_tracks: Mutex::new(Vec::new()),
            added_candidates: Mutex::new(Vec::new()),
            candidate_callback: Mutex::new(None),
            remote_track_callback: Mutex::new(None),
            connection_callback: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Fire the candidate-emission callback, as gathering would
    pub fn emit_candidate(&self, entry: CandidateEntry) {
        if let Some(callback) = self.candidate_callback.lock().as_ref() {
            callback(entry);
        }
    }

    /// Fire the incoming-track callback
    pub fn emit_remote_track(&self, track: RemoteTrack) {
        if let Some(callback) = self.remote_track_callback.lock().as_ref() {
            callback(track);
        }
    }

    /// Fire the connection state callback
    pub fn emit_connection_state(&self, state: ConnectionState) {
        if let Some(callback) = self.connection_callback.lock().as_ref() {
            callback(state);
        }
    }

    pub fn added_tracks(&self) -> Vec<LocalTrack> {
        self.added_tracks.lock().clone()
    }

    pub fn replaced_tracks(&self) -> Vec<(TrackKind, LocalTrack)> {
        self.replaced_tracks.lock().clone()
    }

    pub fn added_candidates(&self) -> Vec<CandidateEntry> {
        self.added_candidates.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SignalingState("transport is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NegotiationTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.check_open()?;
        let n = DESCRIPTIONS_ISSUED.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("v=0 mock-offer-{}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.check_open()?;
        let n = DESCRIPTIONS_ISSUED.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("v=0 mock-answer-{}", n)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        let next = match (desc.kind, *state) {
            (SdpKind::Offer, NegotiationState::Stable)
            | (SdpKind::Offer, NegotiationState::HaveLocalOffer) => {
                NegotiationState::HaveLocalOffer
            }
            (SdpKind::Answer, NegotiationState::HaveRemoteOffer) => NegotiationState::Stable,
            (kind, current) => {
                return Err(Error::SignalingState(format!(
                    "cannot set local {:?} in {:?}",
                    kind, current
                )));
            }
        };
        *state = next;
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        let next = match (desc.kind, *state) {
            (SdpKind::Offer, NegotiationState::Stable) => NegotiationState::HaveRemoteOffer,
            (SdpKind::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (kind, current) => {
                return Err(Error::SignalingState(format!(
                    "cannot set remote {:?} in {:?}",
                    kind, current
                )));
            }
        };
        *state = next;
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: CandidateEntry) -> Result<()> {
        self.check_open()?;
        self.added_candidates.lock().push(candidate);
        Ok(())
    }

    async fn negotiation_state(&self) -> NegotiationState {
        if self.closed.load(Ordering::SeqCst) {
            return NegotiationState::Closed;
        }
        *self.state.lock()
    }

    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        self.check_open()?;
        self.added_tracks.lock().push(track);
        Ok(())
    }

    async fn sender_kinds(&self) -> Vec<TrackKind> {
        let mut kinds: Vec<TrackKind> = self
            .added_tracks
            .lock()
            .iter()
            .map(|track| track.kind())
            .collect();
        kinds.dedup();
        kinds
    }

    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<()> {
        self.check_open()?;
        self.replaced_tracks.lock().push((kind, track));
        Ok(())
    }

    fn on_ice_candidate(&self, callback: CandidateCallback) {
        *self.candidate_callback.lock() = Some(callback);
    }

    fn on_remote_track(&self, callback: RemoteTrackCallback) {
        *self.remote_track_callback.lock() = Some(callback);
    }

    fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        *self.connection_callback.lock() = Some(callback);
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = NegotiationState::Closed;
        Ok(())
    }
}

/// Factory handing out mock transports and retaining handles to them
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created.lock().last().expect("no transport created").clone()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn NegotiationTransport>> {
        let transport = Arc::new(MockTransport::new());
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

/// Media source handing out labelled camera and screen tracks
#[derive(Default)]
pub struct ScriptedMedia {
    acquisitions: AtomicUsize,
    cameras: Mutex<Vec<LocalTrack>>,
    screens: Mutex<Vec<LocalTrack>>,
}

impl ScriptedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// All camera tracks handed out so far
    pub fn cameras(&self) -> Vec<LocalTrack> {
        self.cameras.lock().clone()
    }

    /// All screen tracks handed out so far
    pub fn screens(&self) -> Vec<LocalTrack> {
        self.screens.lock().clone()
    }
}

#[async_trait]
impl MediaSource for ScriptedMedia {
    async fn acquire_camera(&self) -> Result<Vec<LocalTrack>> {
        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let tracks = vec![
            LocalTrack::new(format!("mic-{}", n), TrackKind::Audio, format!("cam-{}", n)),
            LocalTrack::new(format!("cam-{}", n), TrackKind::Video, format!("cam-{}", n)),
        ];
        self.cameras.lock().extend(tracks.iter().cloned());
        Ok(tracks)
    }

    async fn acquire_screen(&self) -> Result<Vec<LocalTrack>> {
        let n = self.screens.lock().len();
        let tracks = vec![LocalTrack::new(
            format!("screen-{}", n),
            TrackKind::Video,
            format!("screen-{}", n),
        )];
        self.screens.lock().extend(tracks.iter().cloned());
        Ok(tracks)
    }
}

/// Preview sink recording what was attached
#[derive(Default)]
pub struct RecordingPreview {
    local_attachments: Mutex<Vec<Vec<String>>>,
    remote_attachments: AtomicUsize,
    remote_clears: AtomicUsize,
}

impl RecordingPreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track ids of each local attachment, in order
    pub fn local_attachments(&self) -> Vec<Vec<String>> {
        self.local_attachments.lock().clone()
    }

    pub fn remote_attachments(&self) -> usize {
        self.remote_attachments.load(Ordering::SeqCst)
    }

    pub fn remote_clears(&self) -> usize {
        self.remote_clears.load(Ordering::SeqCst)
    }
}

impl PreviewSink for RecordingPreview {
    fn attach_local(&self, tracks: &[LocalTrack]) {
        self.local_attachments
            .lock()
            .push(tracks.iter().map(|track| track.id().to_string()).collect());
    }

    fn attach_remote(&self, _stream: &RemoteStream) {
        self.remote_attachments.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_remote(&self) {
        self.remote_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// One test participant: a controller plus handles to its collaborators
pub struct Peer {
    pub controller: SignalingController,
    pub media: Arc<ScriptedMedia>,
    pub factory: Arc<MockFactory>,
    pub preview: Arc<RecordingPreview>,
}

impl Peer {
    /// Build a participant against a shared store and room
    pub fn new(store: Arc<dyn SignalingStore>, room_id: RoomId) -> Self {
        Self::build(store, room_id, false)
    }

    /// Build a participant with the chat side-channel enabled
    pub fn with_chat(store: Arc<dyn SignalingStore>, room_id: RoomId) -> Self {
        Self::build(store, room_id, true)
    }

    fn build(store: Arc<dyn SignalingStore>, room_id: RoomId, chat: bool) -> Self {
        let media = Arc::new(ScriptedMedia::new());
        let factory = Arc::new(MockFactory::new());
        let preview = Arc::new(RecordingPreview::new());
        let mut builder =
            SignalingController::builder(store, room_id, media.clone(), factory.clone())
                .preview(preview.clone());
        if chat {
            builder = builder.chat(Some("tester".to_string()));
        }
        Self {
            controller: builder.build(),
            media,
            factory,
            preview,
        }
    }

    /// The transport backing the current negotiation cycle
    pub fn transport(&self) -> Arc<MockTransport> {
        self.factory.latest()
    }
}
