//! What the local user is currently doing.
//!
//! [`SessionState`] encodes the mode together with the data only that mode
//! carries: a peer exists only while negotiating and a game id only in
//! game, so the "set if and only if" rules hold by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{FriendId, GameId, QueueKind};

/// The flat mode of a session, as reported to presentation and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Idle,
    Hosting,
    GuestNegotiating,
    InQueueRandom,
    InQueueTournament,
    InGame,
}

impl Mode {
    /// `true` while a direct invitation is being negotiated.
    pub fn is_negotiating(self) -> bool {
        matches!(self, Self::Hosting | Self::GuestNegotiating)
    }

    /// `true` while queued for random or tournament matching.
    pub fn is_queued(self) -> bool {
        matches!(self, Self::InQueueRandom | Self::InQueueTournament)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Hosting => "hosting",
            Self::GuestNegotiating => "negotiating as guest",
            Self::InQueueRandom => "queued for random",
            Self::InQueueTournament => "queued for tournament",
            Self::InGame => "in game",
        })
    }
}

/// Session state owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// The local user invited `peer`.
    Hosting { peer: FriendId },
    /// The local user accepted an invitation from `peer`.
    GuestNegotiating {
        peer: FriendId,
        /// The host acknowledged the acceptance.
        host_ready: bool,
    },
    InQueue(QueueKind),
    InGame { game_id: GameId },
}

impl SessionState {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Idle => Mode::Idle,
            Self::Hosting { .. } => Mode::Hosting,
            Self::GuestNegotiating { .. } => Mode::GuestNegotiating,
            Self::InQueue(QueueKind::Random) => Mode::InQueueRandom,
            Self::InQueue(QueueKind::Tournament) => Mode::InQueueTournament,
            Self::InGame { .. } => Mode::InGame,
        }
    }

    /// Counterpart of the current negotiation, if any.
    pub fn peer_friend_id(&self) -> Option<FriendId> {
        match self {
            Self::Hosting { peer } | Self::GuestNegotiating { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    pub fn game_id(&self) -> Option<GameId> {
        match self {
            Self::InGame { game_id } => Some(*game_id),
            _ => None,
        }
    }

    pub fn queue_kind(&self) -> Option<QueueKind> {
        match self {
            Self::InQueue(kind) => Some(*kind),
            _ => None,
        }
    }

    /// `true` once both parties of the negotiation are ready to start.
    ///
    /// A host is never ready by state alone; readiness on that side is the
    /// ledger's `outgoing == Accepted`.
    pub fn peer_ready(&self) -> bool {
        matches!(
            self,
            Self::GuestNegotiating {
                host_ready: true,
                ..
            }
        )
    }
}

/// Immutable view of the session handed to presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub peer_friend_id: Option<FriendId>,
    pub game_id: Option<GameId>,
    /// Host side: the guest accepted. Guest side: the host acknowledged.
    pub peer_ready: bool,
    /// Local counter of negotiations and queue entries, `0` before the first.
    pub negotiation_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_and_game_follow_mode() {
        let states = [
            SessionState::Idle,
            SessionState::Hosting { peer: 4 },
            SessionState::GuestNegotiating {
                peer: 4,
                host_ready: false,
            },
            SessionState::InQueue(QueueKind::Random),
            SessionState::InQueue(QueueKind::Tournament),
            SessionState::InGame { game_id: 9 },
        ];
        for state in states {
            let mode = state.mode();
            assert_eq!(state.peer_friend_id().is_some(), mode.is_negotiating());
            assert_eq!(state.game_id().is_some(), mode == Mode::InGame);
            assert_eq!(state.queue_kind().is_some(), mode.is_queued());
        }
    }

    #[test]
    fn only_acknowledged_guest_is_peer_ready() {
        assert!(!SessionState::Hosting { peer: 1 }.peer_ready());
        assert!(SessionState::GuestNegotiating {
            peer: 1,
            host_ready: true
        }
        .peer_ready());
    }

    #[test]
    fn mode_display_reads_in_error_messages() {
        assert_eq!(Mode::InQueueTournament.to_string(), "queued for tournament");
    }
}
