//! Signaling controller
//!
//! Drives one party's side of a two-party call coordinated through the
//! shared room record. The controller decides its negotiation role from a
//! single read of the record, performs that role's half of the
//! offer/answer/candidate exchange, and reacts to record changes for the
//! rest of the session: a departing peer triggers a full reset and a fresh
//! offer, a joining peer triggers an answer.
//!
//! The store only guarantees eventual consistency with at-least-once,
//! unordered delivery, so every handler is guarded: participant counts are
//! compared against the last observed value, remote descriptions are only
//! committed in a compatible negotiation sub-state, and candidate entries
//! are deduplicated by id.

use crate::chat::ChatChannel;
use crate::media::{LocalTrack, MediaSource, NullPreview, PreviewSink, RemoteStream, TrackKind};
use crate::room::{
    require_room, EntryId, RoomId, RoomPatch, RoomRecord, RoomStatus, Role, SessionDescription,
    StoredCandidate,
};
use crate::store::{MessageHandler, SignalingStore, Subscription};
use crate::transport::{
    ConnectionState, NegotiationState, NegotiationTransport, TransportFactory,
};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-call in-memory state, owned by one controller
///
/// Created empty, populated by the offer or answer path, emptied again by
/// `cleanup()`. The `has_offered` flag outlives `cleanup()` and is only
/// reset by an explicit renegotiation.
#[derive(Default)]
struct ControllerSession {
    transport: Option<Arc<dyn NegotiationTransport>>,
    role: Option<Role>,
    local_tracks: Vec<LocalTrack>,
    screen_tracks: Vec<LocalTrack>,
    screen_sharing: bool,
    remote_stream: RemoteStream,
    has_offered: bool,
    last_participants: u32,
    applied_candidates: HashSet<EntryId>,
    subscriptions: Vec<Subscription>,
}

/// One party's signaling state machine for one room
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SignalingController {
    inner: Arc<ControllerInner>,
}

/// Builder for [`SignalingController`]
pub struct ControllerBuilder {
    store: Arc<dyn SignalingStore>,
    room_id: RoomId,
    media: Arc<dyn MediaSource>,
    factory: Arc<dyn TransportFactory>,
    preview: Arc<dyn PreviewSink>,
    chat_sender: Option<Option<String>>,
}

impl ControllerBuilder {
    /// Use the given preview capability instead of the null sink
    pub fn preview(mut self, preview: Arc<dyn PreviewSink>) -> Self {
        self.preview = preview;
        self
    }

    /// Enable the chat side-channel, with an optional sender display name
    pub fn chat(mut self, sender: Option<String>) -> Self {
        self.chat_sender = Some(sender);
        self
    }

    /// Build the controller
    pub fn build(self) -> SignalingController {
        let chat = self.chat_sender.map(|sender| {
            ChatChannel::new(self.store.clone(), self.room_id.clone(), sender)
        });
        SignalingController {
            inner: Arc::new(ControllerInner {
                store: self.store,
                room_id: self.room_id,
                media: self.media,
                factory: self.factory,
                preview: self.preview,
                chat,
                session: Mutex::new(ControllerSession::default()),
            }),
        }
    }
}

impl SignalingController {
    /// Start building a controller for a room
    ///
    /// The controller does nothing until [`join`](Self::join) is called.
    pub fn builder(
        store: Arc<dyn SignalingStore>,
        room_id: RoomId,
        media: Arc<dyn MediaSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> ControllerBuilder {
        ControllerBuilder {
            store,
            room_id,
            media,
            factory,
            preview: Arc::new(NullPreview),
            chat_sender: None,
        }
    }

    /// Create a controller with default collaborators
    pub fn new(
        store: Arc<dyn SignalingStore>,
        room_id: RoomId,
        media: Arc<dyn MediaSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self::builder(store, room_id, media, factory).build()
    }

    /// Room this controller is attached to
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    /// The chat side-channel, if enabled
    pub fn chat(&self) -> Option<&ChatChannel> {
        self.inner.chat.as_ref()
    }

    /// Current negotiation role, if a session is active
    pub async fn role(&self) -> Option<Role> {
        self.inner.session.lock().await.role
    }

    /// Handle to the remote playback sink
    pub async fn remote_stream(&self) -> RemoteStream {
        self.inner.session.lock().await.remote_stream.clone()
    }

    /// Whether the outgoing video currently comes from screen capture
    pub async fn is_screen_sharing(&self) -> bool {
        self.inner.session.lock().await.screen_sharing
    }

    /// Join the room and run the assigned role's half of the exchange
    ///
    /// The role is derived from a single read of the room record: an empty
    /// room makes this peer the offerer, a room with one participant makes
    /// it the answerer, a full room refuses the join.
    ///
    /// # Errors
    ///
    /// Returns `Error::RoomFull` when two participants are already
    /// attached; no transport is created and no media is acquired.
    pub async fn join(&self) -> Result<Role> {
        self.inner.clone().join().await
    }

    /// Leave the call, marking the record cancelled for the peer
    pub async fn cancel(&self) -> Result<()> {
        self.inner.cancel().await
    }

    /// Tear down all local call state
    ///
    /// The single exit path for cancellation, peer loss, renegotiation and
    /// navigation away. Safe to invoke repeatedly and from concurrent
    /// trigger paths.
    pub async fn cleanup(&self) {
        self.inner.cleanup().await;
    }

    /// Reset the room to a one-offerer state and negotiate from scratch
    pub async fn reset_and_reoffer(&self) -> Result<()> {
        self.inner.clone().reset_and_reoffer().await
    }

    /// Switch the outgoing video to screen capture
    pub async fn start_screen_share(&self) -> Result<()> {
        self.inner.clone().start_screen_share().await
    }

    /// Restore the camera as the outgoing video track
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.inner.stop_screen_share().await
    }

    /// Mute or unmute the outgoing video tracks
    pub async fn set_camera_enabled(&self, enabled: bool) {
        self.inner.set_track_enabled(TrackKind::Video, enabled).await;
    }

    /// Mute or unmute the outgoing audio tracks
    pub async fn set_microphone_enabled(&self, enabled: bool) {
        self.inner.set_track_enabled(TrackKind::Audio, enabled).await;
    }

    /// Subscribe to chat messages, tying the subscription to this session
    ///
    /// The handle registers in the session's subscription set, so the same
    /// `cleanup()` that ends the call stops chat delivery too.
    pub async fn subscribe_chat(&self, handler: MessageHandler) -> Result<()> {
        self.inner.subscribe_chat(handler).await
    }
}

impl std::fmt::Debug for SignalingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingController")
            .field("room_id", &self.inner.room_id)
            .field("chat", &self.inner.chat.is_some())
            .finish()
    }
}

struct ControllerInner {
    store: Arc<dyn SignalingStore>,
    room_id: RoomId,
    media: Arc<dyn MediaSource>,
    factory: Arc<dyn TransportFactory>,
    preview: Arc<dyn PreviewSink>,
    chat: Option<ChatChannel>,
    session: Mutex<ControllerSession>,
}

impl ControllerInner {
    async fn join(self: Arc<Self>) -> Result<Role> {
        let record = require_room(&*self.store, &self.room_id).await?;

        let role = match record.active_participants {
            0 => Role::Offerer,
            1 => Role::Answerer,
            _ => return Err(Error::RoomFull(self.room_id.to_string())),
        };
        info!("Joining room {} as {}", self.room_id, role);

        match role {
            Role::Offerer => self.clone().run_offer_path().await?,
            Role::Answerer => self.clone().run_answer_path().await?,
        }

        self.watch_participants().await?;

        Ok(role)
    }

    /// The participant decrement is read-then-write; a concurrent peer
    /// update can race it, which the watcher tolerates because it only
    /// compares counts qualitatively.
    async fn cancel(&self) -> Result<()> {
        let record = require_room(&*self.store, &self.room_id).await?;
        let role = self.session.lock().await.role;

        let mut patch = RoomPatch::new()
            .status(RoomStatus::Cancelled)
            .participants(record.active_participants.saturating_sub(1));
        if let Some(role) = role {
            patch = patch.cancelled_by(role);
        }
        self.store.update_room(&self.room_id, patch).await?;
        info!("Cancelled call in room {}", self.room_id);

        self.cleanup().await;
        Ok(())
    }

    /// Closing an already-closed transport and cancelling an
    /// already-cancelled subscription are both no-ops, so concurrent and
    /// repeated invocations are safe. Does not reset the offered flag;
    /// only renegotiation does.
    async fn cleanup(&self) {
        let (transport, local_tracks, screen_tracks, remote_stream, mut subscriptions) = {
            let mut session = self.session.lock().await;
            session.screen_sharing = false;
            session.role = None;
            (
                session.transport.take(),
                std::mem::take(&mut session.local_tracks),
                std::mem::take(&mut session.screen_tracks),
                std::mem::replace(&mut session.remote_stream, RemoteStream::new()),
                std::mem::take(&mut session.subscriptions),
            )
        };

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!("Error closing transport: {}", e);
            }
        }
        for track in local_tracks.iter().chain(screen_tracks.iter()) {
            track.stop();
        }
        remote_stream.clear();
        self.preview.clear_remote();
        for subscription in subscriptions.iter_mut() {
            subscription.cancel();
        }

        debug!("Session state cleared for room {}", self.room_id);
    }

    /// Tear down, clear the record payloads and both candidate logs, then
    /// offer again and re-arm the participant watch.
    async fn reset_and_reoffer(self: Arc<Self>) -> Result<()> {
        info!("Renegotiating room {}", self.room_id);
        self.cleanup().await;

        {
            let mut session = self.session.lock().await;
            session.has_offered = false;
            session.applied_candidates.clear();
        }

        self.store
            .update_room(
                &self.room_id,
                RoomPatch::new()
                    .status(RoomStatus::Active)
                    .participants(1)
                    .clear_offer()
                    .clear_answer(),
            )
            .await?;

        // A candidate appended concurrently with the purge may be lost;
        // tolerated, the new offer regathers from nothing.
        for role in [Role::Offerer, Role::Answerer] {
            let entries = self.store.list_candidates(&self.room_id, role).await?;
            if !entries.is_empty() {
                let ids = entries.into_iter().map(|stored| stored.id).collect();
                self.store
                    .delete_candidates(&self.room_id, role, ids)
                    .await?;
            }
        }

        self.clone().run_offer_path().await?;
        self.watch_participants().await?;
        Ok(())
    }

    /// Replaces the active video sender's track in place when one exists,
    /// otherwise adds the capture as a new track; either way no
    /// renegotiation message is produced.
    async fn start_screen_share(self: Arc<Self>) -> Result<()> {
        if self.session.lock().await.screen_sharing {
            return Ok(());
        }

        let tracks = self.media.acquire_screen().await?;
        let video = tracks
            .iter()
            .find(|track| track.kind() == TrackKind::Video)
            .cloned()
            .ok_or_else(|| Error::Media("screen capture produced no video track".to_string()))?;

        let transport = self.session.lock().await.transport.clone();
        if let Some(transport) = &transport {
            if transport.sender_kinds().await.contains(&TrackKind::Video) {
                transport
                    .replace_track(TrackKind::Video, video.clone())
                    .await?;
            } else {
                transport.add_track(video.clone()).await?;
            }
        }

        // Revert to the camera when the user ends capture from the
        // system UI.
        let controller = self.clone();
        video.on_ended(move || {
            let controller = controller.clone();
            tokio::spawn(async move {
                if let Err(e) = controller.stop_screen_share().await {
                    warn!("Failed to revert after screen capture ended: {}", e);
                }
            });
        });

        self.preview.attach_local(&tracks);
        let mut session = self.session.lock().await;
        session.screen_tracks = tracks;
        session.screen_sharing = true;
        info!("Screen share started in room {}", self.room_id);
        Ok(())
    }

    async fn stop_screen_share(&self) -> Result<()> {
        let (screen_tracks, camera_video, transport) = {
            let mut session = self.session.lock().await;
            if !session.screen_sharing {
                return Ok(());
            }
            session.screen_sharing = false;
            (
                std::mem::take(&mut session.screen_tracks),
                session
                    .local_tracks
                    .iter()
                    .find(|track| track.kind() == TrackKind::Video)
                    .cloned(),
                session.transport.clone(),
            )
        };

        for track in &screen_tracks {
            track.stop();
        }

        if let (Some(transport), Some(camera)) = (transport, camera_video) {
            if transport.sender_kinds().await.contains(&TrackKind::Video) {
                transport.replace_track(TrackKind::Video, camera).await?;
            }
        }

        let local_tracks = self.session.lock().await.local_tracks.clone();
        self.preview.attach_local(&local_tracks);
        info!("Screen share stopped in room {}", self.room_id);
        Ok(())
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let session = self.session.lock().await;
        for track in session
            .local_tracks
            .iter()
            .filter(|track| track.kind() == kind)
        {
            track.set_enabled(enabled);
        }
    }

    async fn subscribe_chat(&self, handler: MessageHandler) -> Result<()> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("chat channel not enabled".to_string()))?;
        let subscription = chat.subscribe(handler).await?;
        self.session.lock().await.subscriptions.push(subscription);
        Ok(())
    }

    // ---- offer path ----

    /// Acquire media, create the transport, write the offer, subscribe
    async fn run_offer_path(self: Arc<Self>) -> Result<()> {
        {
            // Claimed up front: the offer write below notifies the
            // participant watcher, which must already see this session as
            // the offerer. Only renegotiation releases the claim.
            let mut session = self.session.lock().await;
            if session.has_offered {
                debug!("Offer already created this session, skipping");
                return Ok(());
            }
            session.has_offered = true;
        }
        debug!("Running offer path for room {}", self.room_id);

        let tracks = self.media.acquire_camera().await?;
        self.preview.attach_local(&tracks);

        let transport = self.factory.create().await?;
        for track in &tracks {
            transport.add_track(track.clone()).await?;
        }

        let remote_stream = RemoteStream::new();
        self.wire_transport(&transport, Role::Offerer, &remote_stream);
        self.install_session(transport.clone(), Role::Offerer, tracks, remote_stream)
            .await;

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;

        self.store
            .update_room(
                &self.room_id,
                RoomPatch::new()
                    .offer(offer)
                    .status(RoomStatus::Active)
                    .participants(1),
            )
            .await?;
        info!("Offer written for room {}", self.room_id);

        let controller = self.clone();
        let answer_subscription = self
            .store
            .subscribe_room(
                &self.room_id,
                Arc::new(move |record: RoomRecord| {
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        if let Some(answer) = record.answer {
                            if let Err(e) = controller.apply_remote_answer(answer).await {
                                warn!("Failed to apply remote answer: {}", e);
                            }
                        }
                    });
                }),
            )
            .await?;
        let candidate_subscription = self
            .clone()
            .subscribe_remote_candidates(Role::Answerer)
            .await?;

        let mut session = self.session.lock().await;
        session.subscriptions.push(answer_subscription);
        session.subscriptions.push(candidate_subscription);
        Ok(())
    }

    /// Commit a remote answer, guarded by the negotiation sub-state
    ///
    /// An answer observed in the stable sub-state is a stale or duplicate
    /// notification: the local offer is re-committed first, then the
    /// answer applied, which lands the transport back in a consistent
    /// stable state. Any other sub-state ignores the notification.
    async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        let transport = self.session.lock().await.transport.clone();
        let Some(transport) = transport else {
            return Ok(());
        };

        match transport.negotiation_state().await {
            NegotiationState::HaveLocalOffer => {
                if transport.remote_description().await.is_none() {
                    debug!("Applying remote answer in room {}", self.room_id);
                    transport.set_remote_description(answer).await?;
                }
            }
            NegotiationState::Stable => {
                let Some(local) = transport.local_description().await else {
                    return Ok(());
                };
                warn!(
                    "Answer notification while stable in room {}, re-applying local offer",
                    self.room_id
                );
                transport.set_local_description(local).await?;
                transport.set_remote_description(answer).await?;
            }
            other => {
                debug!("Ignoring answer notification in state {:?}", other);
            }
        }
        Ok(())
    }

    // ---- answer path ----

    /// Acquire media, answer the stored offer, write it, subscribe
    async fn run_answer_path(self: Arc<Self>) -> Result<()> {
        if self.session.lock().await.has_offered {
            debug!("Controller already offered this session, not answering");
            return Ok(());
        }
        debug!("Running answer path for room {}", self.room_id);

        let tracks = self.media.acquire_camera().await?;
        self.preview.attach_local(&tracks);

        let transport = self.factory.create().await?;
        for track in &tracks {
            transport.add_track(track.clone()).await?;
        }

        let remote_stream = RemoteStream::new();
        self.wire_transport(&transport, Role::Answerer, &remote_stream);
        self.install_session(transport.clone(), Role::Answerer, tracks, remote_stream)
            .await;

        let record = require_room(&*self.store, &self.room_id).await?;
        let offer = record
            .offer
            .ok_or_else(|| Error::MissingOffer(self.room_id.to_string()))?;

        transport.set_remote_description(offer).await?;
        let answer = transport.create_answer().await?;
        match transport.negotiation_state().await {
            NegotiationState::HaveRemoteOffer => {
                transport.set_local_description(answer.clone()).await?;
            }
            other => {
                return Err(Error::SignalingState(format!(
                    "cannot commit answer in state {:?}",
                    other
                )));
            }
        }

        self.store
            .update_room(
                &self.room_id,
                RoomPatch::new()
                    .answer(answer)
                    .status(RoomStatus::Active)
                    .participants(2),
            )
            .await?;
        info!("Answer written for room {}", self.room_id);

        let candidate_subscription = self
            .clone()
            .subscribe_remote_candidates(Role::Offerer)
            .await?;
        self.session
            .lock()
            .await
            .subscriptions
            .push(candidate_subscription);
        Ok(())
    }

    // ---- shared plumbing ----

    /// Register the transport callbacks for one negotiation cycle
    fn wire_transport(
        &self,
        transport: &Arc<dyn NegotiationTransport>,
        role: Role,
        remote_stream: &RemoteStream,
    ) {
        // Locally discovered candidates go to this side's own log.
        let store = self.store.clone();
        let room_id = self.room_id.clone();
        transport.on_ice_candidate(Box::new(move |entry| {
            let store = store.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                if let Err(e) = store.append_candidate(&room_id, role, entry).await {
                    warn!("Failed to append local candidate: {}", e);
                }
            });
        }));

        let stream = remote_stream.clone();
        let preview = self.preview.clone();
        transport.on_remote_track(Box::new(move |track| {
            debug!("Remote {} track {} received", track.kind, track.id);
            stream.add_track(track);
            preview.attach_remote(&stream);
        }));

        // Local playback recovery only; the record-driven watcher stays
        // the authoritative renegotiation trigger.
        let stream = remote_stream.clone();
        let preview = self.preview.clone();
        transport.on_connection_state_change(Box::new(move |state| {
            if state == ConnectionState::Disconnected {
                warn!("Peer connection disconnected, clearing remote playback");
                stream.clear();
                preview.clear_remote();
            }
        }));
    }

    /// Move the negotiation cycle's resources into the session
    async fn install_session(
        &self,
        transport: Arc<dyn NegotiationTransport>,
        role: Role,
        tracks: Vec<LocalTrack>,
        remote_stream: RemoteStream,
    ) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.transport.replace(transport) {
            debug!("Replacing live transport in room {}", self.room_id);
            tokio::spawn(async move {
                let _ = previous.close().await;
            });
        }
        session.role = Some(role);
        session.local_tracks = tracks;
        session.remote_stream = remote_stream;
    }

    /// Subscribe to the peer's candidate log
    async fn subscribe_remote_candidates(
        self: Arc<Self>,
        remote_role: Role,
    ) -> Result<Subscription> {
        let controller = self.clone();
        self.store
            .subscribe_candidates(
                &self.room_id,
                remote_role,
                Arc::new(move |stored: StoredCandidate| {
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        controller.apply_remote_candidate(stored).await;
                    });
                }),
            )
            .await
    }

    /// Register one remote candidate with the transport
    ///
    /// Entries are claimed by id so redelivery applies each at most once.
    /// A candidate arriving before the remote description is dropped, not
    /// buffered.
    async fn apply_remote_candidate(&self, stored: StoredCandidate) {
        let transport = {
            let mut session = self.session.lock().await;
            if !session.applied_candidates.insert(stored.id.clone()) {
                return;
            }
            session.transport.clone()
        };
        let Some(transport) = transport else {
            return;
        };

        if transport.remote_description().await.is_none() {
            debug!("Dropping candidate {} before remote description", stored.id);
            self.session
                .lock()
                .await
                .applied_candidates
                .remove(&stored.id);
            return;
        }

        if let Err(e) = transport.add_ice_candidate(stored.entry).await {
            warn!("Failed to add remote candidate {}: {}", stored.id, e);
        }
    }

    // ---- participant watch ----

    /// Arm the room subscription driving answers and renegotiation
    //
    // Returns a boxed future to break the `Send` auto-trait inference cycle
    // formed by `on_room_change` -> `reset_and_reoffer` -> `watch_participants`
    // spawning `on_room_change` again; the explicit `+ Send` return type gives
    // the recursion a concrete fixpoint.
    fn watch_participants(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let record = require_room(&*self.store, &self.room_id).await?;
            self.session.lock().await.last_participants = record.active_participants;

            let controller = self.clone();
            let subscription = self
                .store
                .subscribe_room(
                    &self.room_id,
                    Arc::new(move |record: RoomRecord| {
                        let controller = controller.clone();
                        tokio::spawn(async move {
                            controller.on_room_change(record).await;
                        });
                    }),
                )
                .await?;
            self.session.lock().await.subscriptions.push(subscription);
            Ok(())
        })
    }

    /// React to one room record change
    async fn on_room_change(self: Arc<Self>, record: RoomRecord) {
        enum Reaction {
            Renegotiate,
            Answer,
            Offer,
            Nothing,
        }

        let reaction = {
            let mut session = self.session.lock().await;
            let previous = session.last_participants;
            let current = record.active_participants;
            // Redelivered notification
            if current == previous {
                return;
            }
            debug!(
                "Participants changed {} -> {} in room {}",
                previous, current, self.room_id
            );

            let reaction = if record.status == RoomStatus::Cancelled {
                // Only an attached session reacts, and only to the peer's
                // cancellation, never its own.
                match session.role {
                    Some(role) if record.cancelled_by != Some(role) => Reaction::Renegotiate,
                    _ => Reaction::Nothing,
                }
            } else if current == 1 {
                if previous == 2 {
                    // The peer left normally
                    Reaction::Renegotiate
                } else if !session.has_offered {
                    // A peer is joining and this side holds the room
                    Reaction::Answer
                } else {
                    Reaction::Nothing
                }
            } else if current == 0 {
                Reaction::Offer
            } else {
                Reaction::Nothing
            };

            // Updated even when nothing is done, to keep the comparison
            // monotonic under redelivery.
            session.last_participants = current;
            reaction
        };

        let outcome = match reaction {
            Reaction::Renegotiate => self.clone().reset_and_reoffer().await,
            Reaction::Answer => self.clone().run_answer_path().await,
            Reaction::Offer => self.clone().run_offer_path().await,
            Reaction::Nothing => Ok(()),
        };
        if let Err(e) = outcome {
            // Transient; the next notification re-drives the state machine.
            warn!("Room change handling failed in {}: {}", self.room_id, e);
        }
    }
}
