//! Queue membership and tournament bracket tracking.
//!
//! The session mode already says whether the local user is queued; the
//! [`QueueTracker`] holds what outlives a single queue entry: the latest
//! bracket snapshot and whether a tournament is still running between
//! rounds.

use serde::{Deserialize, Serialize};

use crate::protocol::UserId;

/// A player in a bracket match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub score: Option<u32>,
}

/// One match of a round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    pub home: Participant,
    pub away: Participant,
    /// Set once both scores are known and differ.
    pub winner: Option<UserId>,
}

impl Match {
    pub fn new(home: Participant, away: Participant) -> Self {
        let winner = match (home.score, away.score) {
            (Some(h), Some(a)) if h > a => Some(home.user_id),
            (Some(h), Some(a)) if a > h => Some(away.user_id),
            _ => None,
        };
        Self { home, away, winner }
    }

    /// The other player of the match, if `user` plays in it.
    pub fn opponent_of(&self, user: UserId) -> Option<&Participant> {
        if self.home.user_id == user {
            Some(&self.away)
        } else if self.away.user_id == user {
            Some(&self.home)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Round {
    pub number: u32,
    pub matches: Vec<Match>,
}

/// Round and match structure of a tournament.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bracket {
    /// Ordered by round number.
    pub rounds: Vec<Round>,
    /// Set only once the tournament resolved.
    pub winner_id: Option<UserId>,
}

impl Bracket {
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn latest_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// Opponents of `user` in the latest round they play in.
    pub fn opponents_of(&self, user: UserId) -> Vec<Participant> {
        self.rounds
            .iter()
            .rev()
            .find_map(|round| {
                round
                    .matches
                    .iter()
                    .find_map(|game| game.opponent_of(user))
            })
            .cloned()
            .into_iter()
            .collect()
    }
}

/// Result of applying a winner announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinnerOutcome {
    /// The stored bracket changed.
    pub bracket_changed: bool,
    /// This was the first announcement of the tournament's winner.
    pub newly_concluded: bool,
}

/// Bracket snapshot and tournament lifetime.
#[derive(Debug, Clone, Default)]
pub struct QueueTracker {
    bracket: Bracket,
    tournament_live: bool,
    announced_winner: Option<UserId>,
}

impl QueueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bracket(&self) -> &Bracket {
        &self.bracket
    }

    /// `true` between the first tournament game and the winner announcement.
    pub fn tournament_live(&self) -> bool {
        self.tournament_live
    }

    /// Start tracking a fresh tournament entry with an empty bracket.
    ///
    /// Returns `true` if a previous bracket was discarded.
    pub fn begin_tournament(&mut self) -> bool {
        self.tournament_live = false;
        self.announced_winner = None;
        self.replace(Bracket::default())
    }

    /// Replace the stored bracket with `snapshot`.
    ///
    /// Returns `false` when the snapshot equals what is already stored.
    pub fn apply_bracket(&mut self, snapshot: Bracket) -> bool {
        self.replace(snapshot)
    }

    /// A tournament game was confirmed; later rounds may start from idle.
    pub fn mark_live(&mut self) {
        if self.announced_winner.is_none() {
            self.tournament_live = true;
        }
    }

    /// Record the tournament winner.
    pub fn apply_winner(&mut self, winner: UserId) -> WinnerOutcome {
        let bracket_changed = self.bracket.winner_id != Some(winner);
        self.bracket.winner_id = Some(winner);
        self.tournament_live = false;
        let newly_concluded = self.announced_winner.is_none();
        self.announced_winner.get_or_insert(winner);
        WinnerOutcome {
            bracket_changed,
            newly_concluded,
        }
    }

    /// Forget the tournament. Returns `true` if a bracket was discarded.
    pub fn abandon(&mut self) -> bool {
        self.tournament_live = false;
        self.announced_winner = None;
        self.replace(Bracket::default())
    }

    fn replace(&mut self, snapshot: Bracket) -> bool {
        if self.bracket == snapshot {
            return false;
        }
        self.bracket = snapshot;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn player(user_id: UserId, score: Option<u32>) -> Participant {
        Participant {
            user_id,
            username: format!("p{user_id}"),
            score,
        }
    }

    fn two_round_bracket() -> Bracket {
        Bracket {
            rounds: vec![
                Round {
                    number: 1,
                    matches: vec![
                        Match::new(player(1, Some(5)), player(2, Some(3))),
                        Match::new(player(3, Some(1)), player(4, Some(5))),
                    ],
                },
                Round {
                    number: 2,
                    matches: vec![Match::new(player(1, None), player(4, None))],
                },
            ],
            winner_id: None,
        }
    }

    #[test]
    fn match_winner_needs_two_differing_scores() {
        assert_eq!(Match::new(player(1, Some(2)), player(2, Some(4))).winner, Some(2));
        assert_eq!(Match::new(player(1, Some(2)), player(2, Some(2))).winner, None);
        assert_eq!(Match::new(player(1, Some(2)), player(2, None)).winner, None);
    }

    #[test]
    fn opponents_come_from_latest_round_played() {
        let bracket = two_round_bracket();
        assert_eq!(bracket.opponents_of(1)[0].user_id, 4);
        assert_eq!(bracket.opponents_of(2)[0].user_id, 1);
        assert!(bracket.opponents_of(99).is_empty());
    }

    #[test]
    fn applying_same_snapshot_twice_is_a_no_op() {
        let mut tracker = QueueTracker::new();
        assert!(tracker.apply_bracket(two_round_bracket()));
        let first = tracker.bracket().clone();
        assert!(!tracker.apply_bracket(two_round_bracket()));
        assert_eq!(tracker.bracket(), &first);
    }

    #[test]
    fn winner_concludes_once() {
        let mut tracker = QueueTracker::new();
        tracker.apply_bracket(two_round_bracket());
        tracker.mark_live();
        let first = tracker.apply_winner(4);
        assert!(first.bracket_changed && first.newly_concluded);
        assert!(!tracker.tournament_live());

        let again = tracker.apply_winner(4);
        assert!(!again.bracket_changed);
        assert!(!again.newly_concluded);

        tracker.mark_live();
        assert!(!tracker.tournament_live());
    }

    #[test]
    fn begin_tournament_resets_previous_outcome() {
        let mut tracker = QueueTracker::new();
        tracker.apply_bracket(two_round_bracket());
        tracker.apply_winner(1);
        assert!(tracker.begin_tournament());
        assert!(tracker.bracket().is_empty());
        tracker.mark_live();
        assert!(tracker.tournament_live());
        assert!(!tracker.begin_tournament());
    }
}
