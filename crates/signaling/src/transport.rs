//! Negotiation transport abstraction
//!
//! A WebRTC-like peer connection, specified at its interface boundary. One
//! transport instance exists per controller session; renegotiation creates
//! a fresh one through the [`TransportFactory`].

use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::room::{CandidateEntry, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Negotiation sub-state of a transport
///
/// Checked before every remote-description mutation instead of relying on
/// call-order assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Fully negotiated, or nothing committed yet
    Stable,
    /// Local offer committed, awaiting the remote answer
    HaveLocalOffer,
    /// Remote offer applied, local answer not yet committed
    HaveRemoteOffer,
    /// No usable session: the transport is closed or was never opened
    Closed,
}

/// Network-level connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, connection not yet started
    New,
    /// Connection negotiation in progress
    Connecting,
    /// Connection established successfully
    Connected,
    /// Network path lost; may still recover
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

/// Callback invoked for each locally discovered candidate
pub type CandidateCallback = Box<dyn Fn(CandidateEntry) + Send + Sync>;

/// Callback invoked for each incoming remote track
pub type RemoteTrackCallback = Box<dyn Fn(RemoteTrack) + Send + Sync>;

/// Callback invoked on connection state transitions
pub type ConnectionStateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// A peer connection as consumed by the signaling controller
#[async_trait]
pub trait NegotiationTransport: Send + Sync {
    /// Generate a local offer payload
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate a local answer payload
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Commit a payload as the local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply the peer's payload as the remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Currently committed local description, if any
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Currently applied remote description, if any
    async fn remote_description(&self) -> Option<SessionDescription>;

    /// Register a remote network path candidate
    async fn add_ice_candidate(&self, candidate: CandidateEntry) -> Result<()>;

    /// Current negotiation sub-state
    async fn negotiation_state(&self) -> NegotiationState;

    /// Attach a local media track as a new outgoing sender
    async fn add_track(&self, track: LocalTrack) -> Result<()>;

    /// Kinds of the currently active outgoing senders
    async fn sender_kinds(&self) -> Vec<TrackKind>;

    /// Replace the outgoing track of the given kind in place
    ///
    /// Relies on the transport's in-band track-replacement capability; no
    /// renegotiation message is produced.
    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<()>;

    /// Register the local candidate-emission callback
    fn on_ice_candidate(&self, callback: CandidateCallback);

    /// Register the incoming-track callback
    fn on_remote_track(&self, callback: RemoteTrackCallback);

    /// Register the connection state change callback
    fn on_connection_state_change(&self, callback: ConnectionStateCallback);

    /// Close the transport; idempotent
    async fn close(&self) -> Result<()>;
}

/// Creates one transport per controller session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a fresh, unconnected transport
    async fn create(&self) -> Result<Arc<dyn NegotiationTransport>>;
}
