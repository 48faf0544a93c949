//! Error types for call signaling

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or maintaining a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Room already has two active participants at join time
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Room record does not exist in the store
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Answer path invoked against a record with no offer payload
    #[error("No offer in room record: {0}")]
    MissingOffer(String),

    /// Transport negotiation sub-state does not permit the operation
    #[error("Unexpected signaling state: {0}")]
    SignalingState(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling store operation error
    #[error("Store error: {0}")]
    Store(String),

    /// Negotiation transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Media acquisition error
    #[error("Media error: {0}")]
    Media(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a join refusal surfaced to the user
    ///
    /// Join refusals abort the join with no transport created and no
    /// partial writes; everything else is logged and re-driven by the
    /// next store notification.
    pub fn is_join_refusal(&self) -> bool {
        matches!(
            self,
            Error::RoomFull(_) | Error::RoomNotFound(_) | Error::MissingOffer(_)
        )
    }

    /// Check if this error is transient and retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Transport(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
