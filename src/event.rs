//! Notifications from the coordinator to the presentation layer.
//!
//! The coordinator never touches UI state. It reports every observable
//! change as a [`MatchmakingEvent`] through a [`Presenter`]; the async
//! client forwards those on a bounded channel via [`ChannelPresenter`].

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ledger::InvitationRecord;
use crate::protocol::{FriendId, GameId, UserId};
use crate::queue::{Bracket, Participant};
use crate::session::SessionSnapshot;

/// Observable changes of the matchmaking state.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchmakingEvent {
    /// The transport loop started.
    Connected,
    /// The session moved to a new mode, peer, or readiness.
    SessionChanged(SessionSnapshot),
    /// The invitation record with `friend` changed.
    InvitationChanged {
        friend: FriendId,
        record: InvitationRecord,
    },
    /// A new bracket snapshot was stored.
    BracketChanged(Bracket),
    /// The server confirmed a game; the game view should open.
    LaunchGame {
        game_id: GameId,
        opponents: Vec<Participant>,
    },
    /// The tournament resolved. Sent once per tournament.
    TournamentConcluded { winner: UserId },
    /// The transport loop stopped.
    Disconnected { reason: Option<String> },
}

/// Receiver of coordinator notifications.
///
/// Only [`publish`](Presenter::publish) is required; the `on_*` methods
/// wrap their arguments into a [`MatchmakingEvent`] and publish it.
pub trait Presenter {
    fn publish(&mut self, event: MatchmakingEvent);

    fn on_session_changed(&mut self, snapshot: SessionSnapshot) {
        self.publish(MatchmakingEvent::SessionChanged(snapshot));
    }

    fn on_invitation_changed(&mut self, friend: FriendId, record: InvitationRecord) {
        self.publish(MatchmakingEvent::InvitationChanged { friend, record });
    }

    fn on_bracket_changed(&mut self, bracket: Bracket) {
        self.publish(MatchmakingEvent::BracketChanged(bracket));
    }

    fn on_launch_game(&mut self, game_id: GameId, opponents: Vec<Participant>) {
        self.publish(MatchmakingEvent::LaunchGame { game_id, opponents });
    }

    fn on_tournament_concluded(&mut self, winner: UserId) {
        self.publish(MatchmakingEvent::TournamentConcluded { winner });
    }
}

/// Collects events in order. Useful for driving a coordinator synchronously.
impl Presenter for Vec<MatchmakingEvent> {
    fn publish(&mut self, event: MatchmakingEvent) {
        self.push(event);
    }
}

impl<P: Presenter + ?Sized> Presenter for &mut P {
    fn publish(&mut self, event: MatchmakingEvent) {
        (**self).publish(event);
    }
}

/// Forwards events on a bounded channel without blocking.
///
/// When the receiver cannot keep up the event is dropped with a warning so
/// the transport loop never stalls on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::Sender<MatchmakingEvent>,
}

impl ChannelPresenter {
    pub fn new(tx: mpsc::Sender<MatchmakingEvent>) -> Self {
        Self { tx }
    }

    /// The underlying sender, for events that must not be dropped.
    pub fn sender(&self) -> &mpsc::Sender<MatchmakingEvent> {
        &self.tx
    }
}

impl Presenter for ChannelPresenter {
    fn publish(&mut self, event: MatchmakingEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}
