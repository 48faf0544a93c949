//! Two-party call signaling over a shared document store
//!
//! This crate establishes direct peer-to-peer audio/video sessions by
//! exchanging negotiation state through a shared, eventually-consistent
//! document store instead of a dedicated signaling server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SignalingController (per participant)                   │
//! │  ├─ role assignment (read-once on the room record)       │
//! │  ├─ offer / answer exchange via RoomRecord               │
//! │  ├─ candidate exchange via per-role append-only logs     │
//! │  ├─ participant watch (renegotiation on peer departure)  │
//! │  └─ ChatChannel (optional side-channel, shared teardown) │
//! │     ↓                         ↓                          │
//! │  SignalingStore trait      NegotiationTransport trait    │
//! │  (document store)          (WebRTC-like peer connection) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Both peers mutate the room record independently with no locking; the
//! controller stays correct under reordered and duplicated notifications
//! through sub-state guards and last-observed-value comparison.
//!
//! # Example
//!
//! ```no_run
//! use paircall_signaling::{create_room, MemoryStore, SignalingController};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     media: Arc<dyn paircall_signaling::MediaSource>,
//! #     factory: Arc<dyn paircall_signaling::TransportFactory>,
//! # ) -> paircall_signaling::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let room_id = create_room(&*store).await?;
//!
//! let controller = SignalingController::new(store.clone(), room_id, media, factory);
//! let role = controller.join().await?;
//! println!("joined as {}", role);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod chat;
pub mod controller;
pub mod error;
pub mod media;
pub mod room;
pub mod store;
pub mod transport;

// Re-exports for public API
pub use chat::{ChatChannel, ChatMessage, FileAttachment};
pub use controller::{ControllerBuilder, SignalingController};
pub use error::{Error, Result};
pub use media::{
    LocalTrack, MediaSource, NullPreview, PreviewSink, RemoteStream, RemoteTrack, TrackKind,
};
pub use room::{
    create_room, CandidateEntry, EntryId, RoomId, RoomPatch, RoomRecord, RoomStatus, Role,
    SdpKind, SessionDescription, StoredCandidate,
};
pub use store::{
    CandidateHandler, MemoryStore, MessageHandler, RoomHandler, SignalingStore, Subscription,
};
pub use transport::{
    CandidateCallback, ConnectionState, ConnectionStateCallback, NegotiationState,
    NegotiationTransport, RemoteTrackCallback, TransportFactory,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
