//! ICE configuration for the webrtc-rs transport

use paircall_signaling::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for [`RtcTransport`](crate::RtcTransport)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Number of candidates pre-gathered before negotiation starts
    pub ice_candidate_pool_size: u8,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            ice_candidate_pool_size: 10,
        }
    }
}

impl RtcConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if no STUN server is configured, a
    /// server URL has an unexpected scheme, or a TURN entry is missing
    /// credentials.
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN server is required".to_string(),
            ));
        }
        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must use stun: or stuns: scheme, got {}",
                    url
                )));
            }
        }
        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must use turn: or turns: scheme, got {}",
                    turn.url
                )));
            }
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    turn.url
                )));
            }
        }
        Ok(())
    }
}
