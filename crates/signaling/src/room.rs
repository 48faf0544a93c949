//! Room record data model
//!
//! The room record is the shared call document: authoritative but
//! eventually-consistent state of participant count, negotiation payloads,
//! and lifecycle status. Both peers mutate it through partial updates; no
//! field here is protected by locking, so every consumer must tolerate
//! stale and duplicated reads.

use crate::store::SignalingStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Opaque identifier of one call room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    /// Generate a fresh random room id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one entry in an append-only sub-collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    /// Generate a fresh random entry id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Room lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Call is live or awaiting a peer
    Active,
    /// One side cancelled; the remaining peer clears this during renegotiation
    Cancelled,
}

/// Negotiation role of one controller session
///
/// Exactly one offerer and one answerer exist per successful session. The
/// serialized tags double as the `cancelled_by` marker and name the
/// candidate logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// First peer in the room; creates the offer
    #[serde(rename = "offer")]
    Offerer,
    /// Second peer; answers the stored offer
    #[serde(rename = "answer")]
    Answerer,
}

impl Role {
    /// The peer's counterpart role
    pub fn opposite(&self) -> Role {
        match self {
            Role::Offerer => Role::Answerer,
            Role::Answerer => Role::Offerer,
        }
    }

    /// Name of the candidate log owned by this role
    pub fn candidate_log(&self) -> &'static str {
        match self {
            Role::Offerer => "offerCandidates",
            Role::Answerer => "answerCandidates",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Offerer => write!(f, "offer"),
            Role::Answerer => write!(f, "answer"),
        }
    }
}

/// Kind of a session description payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Local half of the exchange initiated by the first peer
    Offer,
    /// Response committed by the second peer
    Answer,
}

/// Opaque negotiation payload stored in the room record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Payload kind
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Session description body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer payload
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer payload
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path descriptor, one per locally gathered candidate
///
/// Entries are appended to the owning role's log and never mutated; the
/// renegotiation path purges both logs wholesale before a new offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntry {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// A candidate entry as stored: payload plus its assigned entry id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCandidate {
    /// Store-assigned id, used for batch deletion and duplicate suppression
    pub id: EntryId,
    /// The candidate payload
    pub entry: CandidateEntry,
}

/// The shared call document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Lifecycle status
    pub status: RoomStatus,
    /// Count of peers currently attached (0, 1, or 2)
    #[serde(rename = "activeParticipants")]
    pub active_participants: u32,
    /// Offer payload, set once the offering peer completes local setup
    pub offer: Option<SessionDescription>,
    /// Answer payload, set once the answering peer completes its half
    pub answer: Option<SessionDescription>,
    /// Which side issued a cancellation; breaks the symmetric-cancel race
    #[serde(rename = "cancelledBy")]
    pub cancelled_by: Option<Role>,
}

impl RoomRecord {
    /// The room-creation state: active, empty, nobody attached
    pub fn new() -> Self {
        Self {
            status: RoomStatus::Active,
            active_participants: 0,
            offer: None,
            answer: None,
            cancelled_by: None,
        }
    }

    /// Merge a partial update into this record
    pub fn apply(&mut self, patch: RoomPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(count) = patch.active_participants {
            self.active_participants = count;
        }
        if let Some(offer) = patch.offer {
            self.offer = offer;
        }
        if let Some(answer) = patch.answer {
            self.answer = answer;
        }
        if let Some(cancelled_by) = patch.cancelled_by {
            self.cancelled_by = cancelled_by;
        }
    }
}

impl Default for RoomRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update of a room record
///
/// Fields left `None` are untouched by the merge. The payload fields are
/// two-level options so a patch can clear a stored value (`Some(None)`)
/// without a dedicated delete operation.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    /// New lifecycle status
    pub status: Option<RoomStatus>,
    /// New participant count
    pub active_participants: Option<u32>,
    /// Offer payload update (`Some(None)` clears)
    pub offer: Option<Option<SessionDescription>>,
    /// Answer payload update (`Some(None)` clears)
    pub answer: Option<Option<SessionDescription>>,
    /// Cancellation marker update (`Some(None)` clears)
    pub cancelled_by: Option<Option<Role>>,
}

impl RoomPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifecycle status
    pub fn status(mut self, status: RoomStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the participant count
    pub fn participants(mut self, count: u32) -> Self {
        self.active_participants = Some(count);
        self
    }

    /// Store an offer payload
    pub fn offer(mut self, offer: SessionDescription) -> Self {
        self.offer = Some(Some(offer));
        self
    }

    /// Clear the offer payload
    pub fn clear_offer(mut self) -> Self {
        self.offer = Some(None);
        self
    }

    /// Store an answer payload
    pub fn answer(mut self, answer: SessionDescription) -> Self {
        self.answer = Some(Some(answer));
        self
    }

    /// Clear the answer payload
    pub fn clear_answer(mut self) -> Self {
        self.answer = Some(None);
        self
    }

    /// Record which side cancelled
    pub fn cancelled_by(mut self, role: Role) -> Self {
        self.cancelled_by = Some(Some(role));
        self
    }
}

/// Create a fresh room in the store and return its id
///
/// Seeds the record with the creation state (`active`, zero participants,
/// no payloads). Joining peers derive their role from a read of this
/// record.
pub async fn create_room(store: &dyn SignalingStore) -> Result<RoomId> {
    store.create_room(RoomRecord::new()).await
}

/// Read a room record, failing if it is absent
pub(crate) async fn require_room(store: &dyn SignalingStore, id: &RoomId) -> Result<RoomRecord> {
    store
        .room(id)
        .await?
        .ok_or_else(|| Error::RoomNotFound(id.to_string()))
}
