//! webrtc-rs backed negotiation transport for paircall
//!
//! Provides the concrete [`NegotiationTransport`] the signaling
//! controller drives: an `RTCPeerConnection` configured from
//! [`RtcConfig`], with outgoing tracks mapped to static sample tracks
//! and in-place track replacement for screen sharing.
//!
//! # Example
//!
//! ```no_run
//! use paircall_webrtc::{RtcConfig, RtcFactory};
//! use std::sync::Arc;
//!
//! # fn example() -> paircall_signaling::Result<()> {
//! let factory = Arc::new(RtcFactory::new(RtcConfig::default())?);
//! // Hand the factory to a SignalingController.
//! # let _ = factory;
//! # Ok(())
//! # }
//! ```
//!
//! [`NegotiationTransport`]: paircall_signaling::NegotiationTransport

#![warn(clippy::all)]

pub mod config;
mod peer;

// Re-exports for public API
pub use config::{RtcConfig, TurnServerConfig};
pub use peer::{RtcFactory, RtcTransport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
