//! Error types for the matchmaking client.

use thiserror::Error;

use crate::reason::StaleReason;
use crate::session::Mode;

/// Errors that can occur when driving a matchmaking session.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// A local command is not allowed in the current session mode.
    #[error("cannot {command} while {mode}")]
    InvalidTransition {
        /// The rejected command.
        command: &'static str,
        /// Mode the session was in when the command arrived.
        mode: Mode,
    },

    /// A server event no longer matches local state and was discarded.
    #[error("stale event: {0}")]
    StaleEvent(StaleReason),

    /// The platform socket is not open, so nothing could be sent.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// An inbound envelope could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatchmakingError {
    /// `true` for errors that describe a discarded server event rather than
    /// a failed local operation.
    pub fn is_discard(&self) -> bool {
        matches!(self, Self::StaleEvent(_) | Self::MalformedEnvelope(_))
    }
}

impl From<StaleReason> for MatchmakingError {
    fn from(reason: StaleReason) -> Self {
        Self::StaleEvent(reason)
    }
}

/// A specialized [`Result`] type for matchmaking operations.
pub type Result<T> = std::result::Result<T, MatchmakingError>;
