//! Reasons a server event is discarded as stale.
//!
//! Server pushes race with local commands: a friend may answer an invite
//! the local user already cancelled, or a game confirmation may arrive
//! after the local user left the queue. Such events are dropped without
//! touching state and reported with one of these reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a server event no longer applies to local state.
///
/// Serializes as `"SCREAMING_SNAKE_CASE"` strings (e.g. `"PEER_MISMATCH"`)
/// so hosts can log or forward them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaleReason {
    /// The event names a friend other than the current negotiation peer.
    PeerMismatch,
    /// No pending invitation exists for that friend in that direction.
    NoPendingInvite,
    /// A game confirmation for a different game than the one in progress.
    GameMismatch,
    /// A game confirmation arrived while nothing was waiting for one.
    NotAwaitingGame,
    /// A cancel arrived while a game is already running.
    GameInProgress,
    /// A cancel arrived while there is nothing to cancel.
    NothingToCancel,
    /// The envelope header is addressed to another user.
    NotAddressedToUs,
    /// A negotiation update arrived outside any negotiation.
    NotNegotiating,
}

impl StaleReason {
    /// Returns a human-readable description of this reason.
    pub fn description(&self) -> &'static str {
        match self {
            Self::PeerMismatch => "the event concerns a friend other than the current peer",
            Self::NoPendingInvite => "no pending invitation matches the event",
            Self::GameMismatch => "the event names a different game than the one in progress",
            Self::NotAwaitingGame => "no negotiation or queue is waiting for a game",
            Self::GameInProgress => "a game is already in progress",
            Self::NothingToCancel => "there is no negotiation or queue entry to cancel",
            Self::NotAddressedToUs => "the envelope is addressed to another user",
            Self::NotNegotiating => "the session is not negotiating a game",
        }
    }
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&StaleReason::PeerMismatch).unwrap(),
            "\"PEER_MISMATCH\""
        );
        let parsed: StaleReason = serde_json::from_str("\"NOT_ADDRESSED_TO_US\"").unwrap();
        assert_eq!(parsed, StaleReason::NotAddressedToUs);
    }

    #[test]
    fn display_uses_description() {
        assert_eq!(
            StaleReason::GameMismatch.to_string(),
            StaleReason::GameMismatch.description()
        );
    }
}
