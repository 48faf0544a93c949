//! Chat side-channel
//!
//! A parallel append-only message log keyed to the same room id,
//! deliberately decoupled from the negotiation state machine. The only
//! lifecycle it shares with the controller is listener teardown: a channel
//! subscription registered with the controller is torn down by the same
//! `cleanup()` that closes the call.

use crate::room::RoomId;
use crate::store::{MessageHandler, SignalingStore, Subscription};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Reference to a file shared alongside a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Display name
    pub name: String,
    /// Download location
    pub url: String,
}

/// One chat message under a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id
    pub id: String,
    /// Display name of the sender, if known
    pub sender: Option<String>,
    /// Message text
    pub body: String,
    /// Shared file, if any
    pub attachment: Option<FileAttachment>,
    /// Send time
    #[serde(rename = "sentAt")]
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a text message stamped now
    pub fn text(sender: Option<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            body: body.into(),
            attachment: None,
            sent_at: Utc::now(),
        }
    }

    /// Attach a file reference
    pub fn with_attachment(mut self, attachment: FileAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Append/list/subscribe access to a room's message log
#[derive(Clone)]
pub struct ChatChannel {
    store: Arc<dyn SignalingStore>,
    room_id: RoomId,
    sender: Option<String>,
}

impl ChatChannel {
    /// Open the channel for a room
    pub fn new(store: Arc<dyn SignalingStore>, room_id: RoomId, sender: Option<String>) -> Self {
        Self {
            store,
            room_id,
            sender,
        }
    }

    /// Room this channel is keyed to
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Append a text message
    pub async fn send(&self, body: impl Into<String>) -> Result<ChatMessage> {
        let message = ChatMessage::text(self.sender.clone(), body);
        self.store
            .append_message(&self.room_id, message.clone())
            .await?;
        debug!("Chat message appended to room {}", self.room_id);
        Ok(message)
    }

    /// Append a message carrying a file reference
    pub async fn send_with_attachment(
        &self,
        body: impl Into<String>,
        attachment: FileAttachment,
    ) -> Result<ChatMessage> {
        let message = ChatMessage::text(self.sender.clone(), body).with_attachment(attachment);
        self.store
            .append_message(&self.room_id, message.clone())
            .await?;
        Ok(message)
    }

    /// List every message appended so far
    pub async fn list(&self) -> Result<Vec<ChatMessage>> {
        self.store.list_messages(&self.room_id).await
    }

    /// Subscribe to message additions
    ///
    /// Existing messages are delivered first. The returned handle should be
    /// registered with the controller session so the shared `cleanup()`
    /// tears it down.
    pub async fn subscribe(&self, handler: MessageHandler) -> Result<Subscription> {
        self.store.subscribe_messages(&self.room_id, handler).await
    }
}

impl std::fmt::Debug for ChatChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatChannel")
            .field("room_id", &self.room_id)
            .field("sender", &self.sender)
            .finish()
    }
}
