//! Signaling store abstraction
//!
//! A document-oriented store carrying the shared room record, the two
//! append-only candidate logs, and the chat log. Delivery on subscriptions
//! is at-least-once, possibly duplicated, with no ordering guarantee across
//! collections; every consumer must be idempotent against redelivery.

mod memory;

pub use memory::MemoryStore;

use crate::chat::ChatMessage;
use crate::room::{CandidateEntry, EntryId, RoomId, RoomPatch, RoomRecord, Role, StoredCandidate};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handler invoked with the full room record on every change
///
/// Also invoked once with the current record immediately after
/// registration.
pub type RoomHandler = Arc<dyn Fn(RoomRecord) + Send + Sync>;

/// Handler invoked for each appended candidate entry
///
/// Entries already present at registration time are delivered first.
pub type CandidateHandler = Arc<dyn Fn(StoredCandidate) + Send + Sync>;

/// Handler invoked for each appended chat message
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

/// The shared document store consumed by the signaling controller
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create a new room document, returning its id
    async fn create_room(&self, record: RoomRecord) -> Result<RoomId>;

    /// Read a room record once; `None` if absent
    async fn room(&self, id: &RoomId) -> Result<Option<RoomRecord>>;

    /// Merge a partial update into a room record
    async fn update_room(&self, id: &RoomId, patch: RoomPatch) -> Result<()>;

    /// Subscribe to room record changes
    async fn subscribe_room(&self, id: &RoomId, handler: RoomHandler) -> Result<Subscription>;

    /// Append a candidate to the log owned by `role`
    async fn append_candidate(
        &self,
        id: &RoomId,
        role: Role,
        entry: CandidateEntry,
    ) -> Result<EntryId>;

    /// Subscribe to additions to the candidate log owned by `role`
    async fn subscribe_candidates(
        &self,
        id: &RoomId,
        role: Role,
        handler: CandidateHandler,
    ) -> Result<Subscription>;

    /// List all entries of the candidate log owned by `role`
    async fn list_candidates(&self, id: &RoomId, role: Role) -> Result<Vec<StoredCandidate>>;

    /// Delete the given entries from the candidate log owned by `role`
    async fn delete_candidates(&self, id: &RoomId, role: Role, ids: Vec<EntryId>) -> Result<()>;

    /// Append a chat message under the room
    async fn append_message(&self, id: &RoomId, message: ChatMessage) -> Result<()>;

    /// List all chat messages under the room
    async fn list_messages(&self, id: &RoomId) -> Result<Vec<ChatMessage>>;

    /// Subscribe to chat message additions
    async fn subscribe_messages(&self, id: &RoomId, handler: MessageHandler)
        -> Result<Subscription>;
}

/// Handle to one active store subscription
///
/// Cancelling stops delivery; cancelling twice is a no-op. Dropping the
/// handle cancels it as well.
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    /// Build a subscription around a forwarder task
    pub fn new(cancelled: Arc<AtomicBool>, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Stop delivery; safe to call more than once
    pub fn cancel(&mut self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("Store subscription cancelled");
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
