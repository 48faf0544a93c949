//! In-memory signaling store
//!
//! Reference implementation of [`SignalingStore`] and the backend used by
//! the integration tests. Fan-out uses one broadcast channel per
//! collection; every subscription gets the current state first, then the
//! live stream, reproducing the snapshot-plus-diff delivery of a real
//! document store.

use super::{CandidateHandler, MessageHandler, RoomHandler, SignalingStore, Subscription};
use crate::chat::ChatMessage;
use crate::room::{CandidateEntry, EntryId, RoomId, RoomPatch, RoomRecord, Role, StoredCandidate};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

struct RoomSlot {
    record: RoomRecord,
    offer_candidates: Vec<StoredCandidate>,
    answer_candidates: Vec<StoredCandidate>,
    messages: Vec<ChatMessage>,
    room_events: broadcast::Sender<RoomRecord>,
    offer_candidate_events: broadcast::Sender<StoredCandidate>,
    answer_candidate_events: broadcast::Sender<StoredCandidate>,
    message_events: broadcast::Sender<ChatMessage>,
}

impl RoomSlot {
    fn new(record: RoomRecord) -> Self {
        Self {
            record,
            offer_candidates: Vec::new(),
            answer_candidates: Vec::new(),
            messages: Vec::new(),
            room_events: broadcast::channel(CHANNEL_CAPACITY).0,
            offer_candidate_events: broadcast::channel(CHANNEL_CAPACITY).0,
            answer_candidate_events: broadcast::channel(CHANNEL_CAPACITY).0,
            message_events: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    fn candidates(&self, role: Role) -> &Vec<StoredCandidate> {
        match role {
            Role::Offerer => &self.offer_candidates,
            Role::Answerer => &self.answer_candidates,
        }
    }

    fn candidates_mut(&mut self, role: Role) -> &mut Vec<StoredCandidate> {
        match role {
            Role::Offerer => &mut self.offer_candidates,
            Role::Answerer => &mut self.answer_candidates,
        }
    }

    fn candidate_events(&self, role: Role) -> &broadcast::Sender<StoredCandidate> {
        match role {
            Role::Offerer => &self.offer_candidate_events,
            Role::Answerer => &self.answer_candidate_events,
        }
    }
}

/// In-memory [`SignalingStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    rooms: Arc<RwLock<HashMap<RoomId, RoomSlot>>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<T>(&self, id: &RoomId, f: impl FnOnce(&RoomSlot) -> T) -> Result<T> {
        let rooms = self.rooms.read();
        let slot = rooms
            .get(id)
            .ok_or_else(|| Error::RoomNotFound(id.to_string()))?;
        Ok(f(slot))
    }

    fn with_slot_mut<T>(&self, id: &RoomId, f: impl FnOnce(&mut RoomSlot) -> T) -> Result<T> {
        let mut rooms = self.rooms.write();
        let slot = rooms
            .get_mut(id)
            .ok_or_else(|| Error::RoomNotFound(id.to_string()))?;
        Ok(f(slot))
    }
}

/// Spawn a forwarder delivering `initial` then the live stream to `handler`
fn forward<T: Clone + Send + 'static>(
    initial: Vec<T>,
    mut rx: broadcast::Receiver<T>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
) -> Subscription {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_task = cancelled.clone();
    let task = tokio::spawn(async move {
        for item in initial {
            if cancelled_task.load(Ordering::SeqCst) {
                return;
            }
            handler(item);
        }
        loop {
            match rx.recv().await {
                Ok(item) => {
                    if cancelled_task.load(Ordering::SeqCst) {
                        return;
                    }
                    handler(item);
                }
                // Skipped notifications are tolerated: consumers only rely
                // on the latest state plus at-least-once entry delivery.
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Store subscription lagged, skipped {} notifications", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
    Subscription::new(cancelled, task)
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_room(&self, record: RoomRecord) -> Result<RoomId> {
        let id = RoomId::generate();
        self.rooms.write().insert(id.clone(), RoomSlot::new(record));
        debug!("Created room {}", id);
        Ok(id)
    }

    async fn room(&self, id: &RoomId) -> Result<Option<RoomRecord>> {
        Ok(self.rooms.read().get(id).map(|slot| slot.record.clone()))
    }

    async fn update_room(&self, id: &RoomId, patch: RoomPatch) -> Result<()> {
        let (record, events) = self.with_slot_mut(id, |slot| {
            slot.record.apply(patch);
            (slot.record.clone(), slot.room_events.clone())
        })?;
        let _ = events.send(record);
        Ok(())
    }

    async fn subscribe_room(&self, id: &RoomId, handler: RoomHandler) -> Result<Subscription> {
        let (snapshot, rx) = self.with_slot(id, |slot| {
            (slot.record.clone(), slot.room_events.subscribe())
        })?;
        Ok(forward(vec![snapshot], rx, handler))
    }

    async fn append_candidate(
        &self,
        id: &RoomId,
        role: Role,
        entry: CandidateEntry,
    ) -> Result<EntryId> {
        let stored = StoredCandidate {
            id: EntryId::generate(),
            entry,
        };
        let entry_id = stored.id.clone();
        let events = self.with_slot_mut(id, |slot| {
            slot.candidates_mut(role).push(stored.clone());
            slot.candidate_events(role).clone()
        })?;
        let _ = events.send(stored);
        Ok(entry_id)
    }

    async fn subscribe_candidates(
        &self,
        id: &RoomId,
        role: Role,
        handler: CandidateHandler,
    ) -> Result<Subscription> {
        let (existing, rx) = self.with_slot(id, |slot| {
            (
                slot.candidates(role).clone(),
                slot.candidate_events(role).subscribe(),
            )
        })?;
        Ok(forward(existing, rx, handler))
    }

    async fn list_candidates(&self, id: &RoomId, role: Role) -> Result<Vec<StoredCandidate>> {
        self.with_slot(id, |slot| slot.candidates(role).clone())
    }

    async fn delete_candidates(&self, id: &RoomId, role: Role, ids: Vec<EntryId>) -> Result<()> {
        self.with_slot_mut(id, |slot| {
            slot.candidates_mut(role)
                .retain(|stored| !ids.contains(&stored.id));
        })
    }

    async fn append_message(&self, id: &RoomId, message: ChatMessage) -> Result<()> {
        let events = self.with_slot_mut(id, |slot| {
            slot.messages.push(message.clone());
            slot.message_events.clone()
        })?;
        let _ = events.send(message);
        Ok(())
    }

    async fn list_messages(&self, id: &RoomId) -> Result<Vec<ChatMessage>> {
        self.with_slot(id, |slot| slot.messages.clone())
    }

    async fn subscribe_messages(
        &self,
        id: &RoomId,
        handler: MessageHandler,
    ) -> Result<Subscription> {
        let (existing, rx) = self.with_slot(id, |slot| {
            (slot.messages.clone(), slot.message_events.subscribe())
        })?;
        Ok(forward(existing, rx, handler))
    }
}
