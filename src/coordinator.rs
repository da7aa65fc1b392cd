//! The session coordinator: single owner of all matchmaking state.
//!
//! [`Coordinator`] receives two unordered streams: local commands from the
//! user and inbound envelopes from the server. Both are applied one at a
//! time through `&mut self`, so there is never overlapping mutation.
//!
//! Commands are validated against the current mode first, then the
//! envelope is handed to the sink, and only then is local state changed.
//! A sink that reports [`MatchmakingError::TransportUnavailable`] therefore
//! leaves the coordinator exactly as it was.
//!
//! Inbound events are checked against current state before they apply.
//! An event naming a friend or game that is no longer the active one is
//! discarded with a [`StaleReason`], never queued or retried. The one
//! exception in the server's favour is game confirmation: an `ingame` push
//! that races a local cancel still moves the session into the game.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::adapter::{route, EnvelopeSink, Routed};
use crate::error::{MatchmakingError, Result};
use crate::event::Presenter;
use crate::ledger::{InvitationLedger, InvitationRecord, InviteState, Side};
use crate::protocol::{
    ClientPayload, Counterpart, Envelope, FriendId, GameConfirmation, GameKind, InboundEnvelope,
    QueueKind, ServerEvent, UserId,
};
use crate::queue::{Bracket, QueueTracker};
use crate::reason::StaleReason;
use crate::session::{Mode, SessionSnapshot, SessionState};

/// Default lifetime of a pending invitation.
pub const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(60);

/// A command issued by the local user (or the game component).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    SendInvite(FriendId),
    AcceptIncoming(FriendId),
    DeclineIncoming(FriendId),
    RequestStart(FriendId),
    Cancel(FriendId),
    JoinQueue(QueueKind),
    LeaveQueue,
    /// The game component reports the match finished or was forfeited.
    GameEnded,
    /// The friend was removed from the friend list.
    ForgetFriend(FriendId),
    /// Whether the game socket for the confirmed game opened.
    ReportGameSocket { online: bool },
    /// Leave whatever negotiation or queue is active.
    Withdraw,
}

/// What became of an inbound envelope.
#[derive(Debug)]
pub enum Dispatch {
    /// State changed.
    Applied,
    /// The event repeated something already applied.
    Duplicate,
    /// The event was valid but carried nothing to apply, or was not
    /// matchmaking traffic.
    Ignored,
    /// The event was stale or malformed and was dropped.
    Discarded(MatchmakingError),
}

impl Dispatch {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded(_))
    }

    /// Reason the event was dropped as stale, if it was.
    pub fn stale_reason(&self) -> Option<StaleReason> {
        match self {
            Self::Discarded(MatchmakingError::StaleEvent(reason)) => Some(*reason),
            _ => None,
        }
    }
}

/// Owner of the session, the invitation ledger, and the queue tracker.
///
/// `S` receives serialized outbound envelopes; `P` receives notifications.
#[derive(Debug)]
pub struct Coordinator<S, P> {
    user_id: UserId,
    session: SessionState,
    ledger: InvitationLedger,
    tracker: QueueTracker,
    sink: S,
    presenter: P,
    invite_ttl: Option<Duration>,
    negotiation_id: u64,
    /// Kind of the last negotiation or queue entry left locally, until the
    /// server settles it. A confirmation racing that cancel still applies.
    withdrawn: Option<GameKind>,
}

impl<S: EnvelopeSink, P: Presenter> Coordinator<S, P> {
    pub fn new(user_id: UserId, sink: S, presenter: P) -> Self {
        Self {
            user_id,
            session: SessionState::Idle,
            ledger: InvitationLedger::new(),
            tracker: QueueTracker::new(),
            sink,
            presenter,
            invite_ttl: Some(DEFAULT_INVITE_TTL),
            negotiation_id: 0,
            withdrawn: None,
        }
    }

    /// Set how long an invitation may stay pending. `None` disables expiry.
    #[must_use]
    pub fn with_invite_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.invite_ttl = ttl;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn mode(&self) -> Mode {
        self.session.mode()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let peer_ready = match self.session {
            SessionState::Hosting { peer } => self.ledger.outgoing(peer) == InviteState::Accepted,
            _ => self.session.peer_ready(),
        };
        SessionSnapshot {
            mode: self.session.mode(),
            peer_friend_id: self.session.peer_friend_id(),
            game_id: self.session.game_id(),
            peer_ready,
            negotiation_id: self.negotiation_id,
        }
    }

    pub fn ledger(&self) -> &InvitationLedger {
        &self.ledger
    }

    pub fn record(&self, friend: FriendId) -> InvitationRecord {
        self.ledger.record(friend)
    }

    pub fn bracket(&self) -> &Bracket {
        self.tracker.bracket()
    }

    pub fn tracker(&self) -> &QueueTracker {
        &self.tracker
    }

    pub fn invite_ttl(&self) -> Option<Duration> {
        self.invite_ttl
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    // ── Local commands ──────────────────────────────────────────────

    /// Run one local command.
    ///
    /// # Errors
    ///
    /// See the individual command methods.
    pub fn execute(&mut self, command: LocalCommand) -> Result<()> {
        match command {
            LocalCommand::SendInvite(friend) => self.send_invite(friend),
            LocalCommand::AcceptIncoming(friend) => self.accept_incoming(friend),
            LocalCommand::DeclineIncoming(friend) => self.decline_incoming(friend),
            LocalCommand::RequestStart(friend) => self.request_start(friend),
            LocalCommand::Cancel(friend) => self.cancel(friend),
            LocalCommand::JoinQueue(kind) => self.join_queue(kind),
            LocalCommand::LeaveQueue => self.leave_queue(),
            LocalCommand::GameEnded => self.on_game_ended(),
            LocalCommand::ForgetFriend(friend) => self.forget_friend(friend),
            LocalCommand::ReportGameSocket { online } => self.report_game_socket(online),
            LocalCommand::Withdraw => self.withdraw(),
        }
    }

    /// Invite `friend` to a game hosted by the local user.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless idle with no invite
    /// already out to `friend`; [`MatchmakingError::TransportUnavailable`]
    /// if the envelope could not be sent.
    pub fn send_invite(&mut self, friend: FriendId) -> Result<()> {
        self.require(self.mode() == Mode::Idle, "send an invite")?;
        self.require(
            self.ledger.outgoing(friend).is_none(),
            "re-invite a friend with an open invite",
        )?;
        self.emit(ClientPayload::invite(friend))?;

        self.observe(&[friend], |this| {
            this.ledger.open_outgoing(friend, Instant::now());
            this.session = SessionState::Hosting { peer: friend };
            this.begin_negotiation();
        });
        debug!(friend, negotiation = self.negotiation_id, "invite sent");
        Ok(())
    }

    /// Accept the pending offer from `friend` and negotiate as guest.
    ///
    /// Allowed from idle, or while hosting that same friend (crossed
    /// invitations), in which case the outgoing invite is dropped.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] without a pending offer or
    /// while busy with someone else; [`MatchmakingError::TransportUnavailable`]
    /// if the envelope could not be sent.
    pub fn accept_incoming(&mut self, friend: FriendId) -> Result<()> {
        self.require(
            self.ledger.incoming(friend) == InviteState::Pending,
            "accept an invite that is not pending",
        )?;
        let allowed = match self.session {
            SessionState::Idle => true,
            SessionState::Hosting { peer } => peer == friend,
            _ => false,
        };
        self.require(allowed, "accept an invite")?;
        self.emit(ClientPayload::respond(friend, true))?;

        self.observe(&[friend], |this| {
            this.ledger.accept_incoming(friend);
            this.session = SessionState::GuestNegotiating {
                peer: friend,
                host_ready: false,
            };
            this.begin_negotiation();
        });
        debug!(friend, negotiation = self.negotiation_id, "invite accepted");
        Ok(())
    }

    /// Refuse the pending offer from `friend`. The session mode is unchanged.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] without a pending offer;
    /// [`MatchmakingError::TransportUnavailable`] if the envelope could not
    /// be sent.
    pub fn decline_incoming(&mut self, friend: FriendId) -> Result<()> {
        self.require(
            self.ledger.incoming(friend) == InviteState::Pending,
            "decline an invite that is not pending",
        )?;
        self.emit(ClientPayload::respond(friend, false))?;

        self.observe(&[friend], |this| {
            this.ledger.clear_incoming(friend);
        });
        debug!(friend, "invite declined");
        Ok(())
    }

    /// Ask the server to start the game with `friend`, who accepted.
    ///
    /// The session stays in `Hosting` until the server confirms the game.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless hosting `friend` with
    /// an accepted invite; [`MatchmakingError::TransportUnavailable`] if the
    /// envelope could not be sent.
    pub fn request_start(&mut self, friend: FriendId) -> Result<()> {
        let ready = self.session == SessionState::Hosting { peer: friend }
            && self.ledger.outgoing(friend) == InviteState::Accepted;
        self.require(ready, "start the game")?;
        self.emit(ClientPayload::start_game(friend))?;
        debug!(friend, negotiation = self.negotiation_id, "start requested");
        Ok(())
    }

    /// Abandon the negotiation with `friend`.
    ///
    /// Both ledger sides for `friend` are cleared and the session returns to
    /// idle at once; the reset is not rolled back if the server never
    /// acknowledges it.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless negotiating with
    /// `friend`; [`MatchmakingError::TransportUnavailable`] if the envelope
    /// could not be sent.
    pub fn cancel(&mut self, friend: FriendId) -> Result<()> {
        self.require(
            self.session.peer_friend_id() == Some(friend),
            "cancel a negotiation that is not active",
        )?;
        self.emit(ClientPayload::cancel(GameKind::Invite))?;

        self.observe(&[friend], |this| {
            this.ledger.reset(friend);
            this.session = SessionState::Idle;
            this.withdrawn = Some(GameKind::Invite);
        });
        debug!(friend, "negotiation cancelled");
        Ok(())
    }

    /// Enter the random or tournament queue.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless idle;
    /// [`MatchmakingError::TransportUnavailable`] if the envelope could not
    /// be sent.
    pub fn join_queue(&mut self, kind: QueueKind) -> Result<()> {
        self.require(self.mode() == Mode::Idle, "join a queue")?;
        self.emit(ClientPayload::join_queue(kind))?;

        if kind == QueueKind::Tournament && self.tracker.begin_tournament() {
            self.presenter.on_bracket_changed(self.tracker.bracket().clone());
        }
        self.observe(&[], |this| {
            this.session = SessionState::InQueue(kind);
            this.begin_negotiation();
        });
        debug!(%kind, negotiation = self.negotiation_id, "joined queue");
        Ok(())
    }

    /// Leave the queue the local user is in.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless queued;
    /// [`MatchmakingError::TransportUnavailable`] if the envelope could not
    /// be sent.
    pub fn leave_queue(&mut self) -> Result<()> {
        let Some(kind) = self.session.queue_kind() else {
            return Err(self.invalid("leave a queue"));
        };
        self.emit(ClientPayload::cancel(kind.into()))?;

        if kind == QueueKind::Tournament && self.tracker.abandon() {
            self.presenter.on_bracket_changed(self.tracker.bracket().clone());
        }
        self.observe(&[], |this| {
            this.session = SessionState::Idle;
            this.withdrawn = Some(kind.into());
        });
        debug!(%kind, "left queue");
        Ok(())
    }

    /// The game finished or was forfeited; return to idle.
    ///
    /// A live tournament stays tracked so the next round can start.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless in a game.
    pub fn on_game_ended(&mut self) -> Result<()> {
        self.require(self.mode() == Mode::InGame, "end a game")?;
        self.observe(&[], |this| {
            this.session = SessionState::Idle;
            this.withdrawn = None;
        });
        debug!("game ended");
        Ok(())
    }

    /// Drop everything known about `friend`, cancelling an active
    /// negotiation with them first.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::TransportUnavailable`] if the cancel could not be
    /// sent; nothing is dropped in that case.
    pub fn forget_friend(&mut self, friend: FriendId) -> Result<()> {
        if self.session.peer_friend_id() == Some(friend) {
            self.cancel(friend)?;
        }
        self.observe(&[friend], |this| {
            this.ledger.reset(friend);
        });
        debug!(friend, "friend forgotten");
        Ok(())
    }

    /// Tell the server whether the game socket for the current game opened.
    ///
    /// A failed socket ends the game locally.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::InvalidTransition`] unless in a game;
    /// [`MatchmakingError::TransportUnavailable`] if the envelope could not
    /// be sent.
    pub fn report_game_socket(&mut self, online: bool) -> Result<()> {
        let Some(game_id) = self.session.game_id() else {
            return Err(self.invalid("report the game socket"));
        };
        self.emit(ClientPayload::game_socket(online, game_id))?;

        if !online {
            warn!(game_id, "game socket failed to open, leaving game");
            self.observe(&[], |this| {
                this.session = SessionState::Idle;
            });
        }
        Ok(())
    }

    /// Leave the active negotiation or queue, if any.
    ///
    /// Idle and in-game sessions are left alone.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::TransportUnavailable`] if the cancel could not be
    /// sent.
    pub fn withdraw(&mut self) -> Result<()> {
        match self.session {
            SessionState::Hosting { peer } | SessionState::GuestNegotiating { peer, .. } => {
                self.cancel(peer)
            }
            SessionState::InQueue(_) => self.leave_queue(),
            SessionState::Idle | SessionState::InGame { .. } => Ok(()),
        }
    }

    /// Close every invitation that stayed pending longer than the TTL.
    ///
    /// Outgoing invites are cancelled, incoming offers declined. Returns how
    /// many were closed; ones whose envelope could not be sent stay pending
    /// for the next sweep.
    pub fn expire_invitations(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.invite_ttl else {
            return 0;
        };
        let mut closed = 0;
        for (friend, side) in self.ledger.expired(now, ttl) {
            let result = match side {
                Side::Outgoing if self.session == (SessionState::Hosting { peer: friend }) => {
                    self.cancel(friend)
                }
                Side::Outgoing => {
                    self.observe(&[friend], |this| {
                        this.ledger.clear_outgoing(friend);
                    });
                    Ok(())
                }
                Side::Incoming => self.decline_incoming(friend),
            };
            match result {
                Ok(()) => {
                    info!(friend, ?side, "pending invitation expired");
                    closed += 1;
                }
                Err(e) => warn!(friend, ?side, "could not expire invitation: {e}"),
            }
        }
        closed
    }

    // ── Inbound events ──────────────────────────────────────────────

    /// Route and apply one raw frame from the shared socket.
    ///
    /// Frames for other services are [`Dispatch::Ignored`].
    pub fn dispatch_text(&mut self, text: &str) -> Dispatch {
        match route(text) {
            Ok(Routed::Matchmaking(envelope)) => self.dispatch(envelope),
            Ok(Routed::Foreign { service, .. }) => {
                debug!(service = %service, "ignoring foreign envelope");
                Dispatch::Ignored
            }
            Err(e) => discard(e),
        }
    }

    /// Validate and apply one matchmaking envelope.
    pub fn dispatch(&mut self, envelope: InboundEnvelope) -> Dispatch {
        if let Some(header) = &envelope.header {
            if header.id != self.user_id {
                return discard(StaleReason::NotAddressedToUs.into());
            }
        }
        match envelope.body.decode(self.user_id) {
            Ok(event) => self.apply(event),
            Err(e) => discard(e),
        }
    }

    /// Apply one decoded server event.
    pub fn apply(&mut self, event: ServerEvent) -> Dispatch {
        let outcome = match event {
            ServerEvent::GameConfirmed(confirmation) => self.on_game_confirmed(confirmation),
            ServerEvent::GameAborted => self.on_game_aborted(),
            ServerEvent::InviteOffer { host } => Ok(self.receive_invite_offer(host)),
            ServerEvent::HostReady { host } => self.on_host_ready(host),
            ServerEvent::HostWithdrew { host } => self.on_host_withdrew(host),
            ServerEvent::InviteResponse { guest, accepted } => {
                self.receive_response(guest, accepted)
            }
            ServerEvent::InviteDelivered { guest } => self.on_invite_delivered(guest),
            ServerEvent::InviteCancelled(counterpart) => self.receive_cancel(counterpart),
            ServerEvent::MatchCancelled { abandon_tournament } => {
                self.on_match_cancelled(abandon_tournament)
            }
            ServerEvent::BracketUpdated(bracket) => {
                Ok(self.apply_tournament_result(Some(bracket), None))
            }
            ServerEvent::TournamentWinner { winner, bracket } => {
                Ok(self.apply_tournament_result(bracket, Some(winner)))
            }
        };
        match outcome {
            Ok(dispatch) => dispatch,
            Err(reason) => discard(reason.into()),
        }
    }

    /// The only way into `InGame`.
    fn on_game_confirmed(
        &mut self,
        confirmation: GameConfirmation,
    ) -> std::result::Result<Dispatch, StaleReason> {
        let GameConfirmation {
            game_id,
            tournament,
            bracket,
            opponents,
            winner,
        } = confirmation;

        // Bracket data applies in every mode.
        let bracket_outcome = self.apply_tournament_result(bracket, winner);

        let accept = match self.session {
            SessionState::InGame { game_id: current } if current == game_id => {
                debug!(game_id, "duplicate game confirmation");
                return Ok(match bracket_outcome {
                    Dispatch::Applied => Dispatch::Applied,
                    _ => Dispatch::Duplicate,
                });
            }
            SessionState::InGame { .. } => return Err(StaleReason::GameMismatch),
            SessionState::Idle => {
                (tournament && self.tracker.tournament_live()) || self.withdrawn.is_some()
            }
            SessionState::Hosting { .. }
            | SessionState::GuestNegotiating { .. }
            | SessionState::InQueue(_) => true,
        };
        if !accept {
            return Err(StaleReason::NotAwaitingGame);
        }

        let peer = self.session.peer_friend_id();
        self.observe(peer.as_slice(), |this| {
            if let Some(peer) = peer {
                this.ledger.reset(peer);
            }
            this.session = SessionState::InGame { game_id };
            this.withdrawn = None;
            if tournament {
                this.tracker.mark_live();
            }
        });
        info!(game_id, tournament, "game confirmed");
        self.presenter.on_launch_game(game_id, opponents);
        Ok(Dispatch::Applied)
    }

    fn on_game_aborted(&mut self) -> std::result::Result<Dispatch, StaleReason> {
        let mode = self.mode();
        if mode == Mode::InGame {
            return Err(StaleReason::GameInProgress);
        }
        if !(mode.is_negotiating() || mode.is_queued()) {
            return Err(StaleReason::NotAwaitingGame);
        }
        let peer = self.session.peer_friend_id();
        self.observe(peer.as_slice(), |this| {
            if let Some(peer) = peer {
                this.ledger.reset(peer);
            }
            this.session = SessionState::Idle;
            this.withdrawn = None;
        });
        warn!("server could not create the game");
        Ok(Dispatch::Applied)
    }

    /// Record an offer. Never changes the session mode.
    fn receive_invite_offer(&mut self, host: FriendId) -> Dispatch {
        let opened = self.observe(&[host], |this| {
            this.ledger.open_incoming(host, Instant::now())
        });
        if opened {
            debug!(host, "invite offer received");
            Dispatch::Applied
        } else {
            Dispatch::Duplicate
        }
    }

    fn on_host_ready(&mut self, host: FriendId) -> std::result::Result<Dispatch, StaleReason> {
        match self.session {
            SessionState::GuestNegotiating { peer, host_ready } if peer == host => {
                if host_ready {
                    return Ok(Dispatch::Duplicate);
                }
                self.observe(&[], |this| {
                    this.session = SessionState::GuestNegotiating {
                        peer,
                        host_ready: true,
                    };
                });
                debug!(host, "host acknowledged acceptance");
                Ok(Dispatch::Applied)
            }
            _ => Err(self.peer_mismatch_or(StaleReason::NotNegotiating)),
        }
    }

    fn on_host_withdrew(&mut self, host: FriendId) -> std::result::Result<Dispatch, StaleReason> {
        if matches!(self.session, SessionState::GuestNegotiating { peer, .. } if peer == host) {
            self.observe(&[host], |this| {
                this.ledger.reset(host);
                this.session = SessionState::Idle;
            });
            debug!(host, "host withdrew");
            return Ok(Dispatch::Applied);
        }
        if self.ledger.incoming(host) == InviteState::Pending {
            self.observe(&[host], |this| {
                this.ledger.clear_incoming(host);
            });
            return Ok(Dispatch::Applied);
        }
        Err(StaleReason::NoPendingInvite)
    }

    /// A guest answered the local user's invite.
    fn receive_response(
        &mut self,
        guest: FriendId,
        accepted: bool,
    ) -> std::result::Result<Dispatch, StaleReason> {
        if self.session != (SessionState::Hosting { peer: guest }) {
            return Err(self.peer_mismatch_or(StaleReason::NotNegotiating));
        }
        match (self.ledger.outgoing(guest), accepted) {
            (InviteState::Pending, true) => {
                self.observe(&[guest], |this| this.ledger.confirm_outgoing(guest));
                debug!(guest, "invite accepted by guest");
                Ok(Dispatch::Applied)
            }
            (InviteState::Accepted, true) => Ok(Dispatch::Duplicate),
            (InviteState::Pending | InviteState::Accepted, false) => {
                self.observe(&[guest], |this| {
                    this.ledger.clear_outgoing(guest);
                    this.session = SessionState::Idle;
                });
                debug!(guest, "invite refused by guest");
                Ok(Dispatch::Applied)
            }
            (InviteState::None, _) => Err(StaleReason::NoPendingInvite),
        }
    }

    fn on_invite_delivered(&mut self, guest: FriendId) -> std::result::Result<Dispatch, StaleReason> {
        if self.session == (SessionState::Hosting { peer: guest })
            && self.ledger.outgoing(guest) == InviteState::Pending
        {
            debug!(guest, "invite delivered");
            return Ok(Dispatch::Ignored);
        }
        Err(StaleReason::NoPendingInvite)
    }

    /// The counterpart cancelled; only the matching side is reset.
    fn receive_cancel(
        &mut self,
        counterpart: Counterpart,
    ) -> std::result::Result<Dispatch, StaleReason> {
        let (friend, active, side_open) = match counterpart {
            Counterpart::Host(host) => (
                host,
                matches!(self.session, SessionState::GuestNegotiating { peer, .. } if peer == host),
                !self.ledger.incoming(host).is_none(),
            ),
            Counterpart::Guest(guest) => (
                guest,
                self.session == (SessionState::Hosting { peer: guest }),
                !self.ledger.outgoing(guest).is_none(),
            ),
        };

        if active {
            self.observe(&[friend], |this| {
                this.ledger.reset(friend);
                this.session = SessionState::Idle;
            });
        } else if side_open {
            self.observe(&[friend], |this| match counterpart {
                Counterpart::Host(_) => {
                    this.ledger.clear_incoming(friend);
                }
                Counterpart::Guest(_) => {
                    this.ledger.clear_outgoing(friend);
                }
            });
        } else {
            return Err(StaleReason::NoPendingInvite);
        }
        debug!(friend, ?counterpart, "negotiation cancelled by counterpart");
        Ok(Dispatch::Applied)
    }

    fn on_match_cancelled(
        &mut self,
        abandon_tournament: bool,
    ) -> std::result::Result<Dispatch, StaleReason> {
        // Tournament elimination applies in every mode.
        let mut changed = false;
        if abandon_tournament {
            let was_live = self.tracker.tournament_live();
            if self.tracker.abandon() {
                self.presenter.on_bracket_changed(self.tracker.bracket().clone());
                changed = true;
            }
            if was_live {
                debug!("eliminated from tournament");
                changed = true;
            }
        }

        if self.mode() == Mode::InGame {
            return if changed {
                Ok(Dispatch::Applied)
            } else {
                Err(StaleReason::GameInProgress)
            };
        }

        match self.session {
            SessionState::Idle => {
                if self.withdrawn.take().is_some() {
                    debug!("server settled local withdrawal");
                    return Ok(if changed {
                        Dispatch::Applied
                    } else {
                        Dispatch::Ignored
                    });
                }
                if changed {
                    Ok(Dispatch::Applied)
                } else {
                    Err(StaleReason::NothingToCancel)
                }
            }
            _ => {
                let peer = self.session.peer_friend_id();
                self.observe(peer.as_slice(), |this| {
                    if let Some(peer) = peer {
                        this.ledger.reset(peer);
                    }
                    this.session = SessionState::Idle;
                    this.withdrawn = None;
                });
                debug!("server cancelled matchmaking");
                Ok(Dispatch::Applied)
            }
        }
    }

    /// Replace the bracket and record a winner, announcing the conclusion
    /// once per tournament.
    fn apply_tournament_result(
        &mut self,
        bracket: Option<Bracket>,
        winner: Option<UserId>,
    ) -> Dispatch {
        let mut changed = bracket.is_some_and(|bracket| self.tracker.apply_bracket(bracket));
        let mut concluded = None;
        if let Some(winner) = winner {
            let outcome = self.tracker.apply_winner(winner);
            changed |= outcome.bracket_changed;
            if outcome.newly_concluded {
                concluded = Some(winner);
            }
        }
        if changed {
            let bracket = self.tracker.bracket();
            debug!(
                round = bracket.latest_round().map(|round| round.number),
                "bracket updated"
            );
            self.presenter.on_bracket_changed(bracket.clone());
        }
        if let Some(winner) = concluded {
            info!(winner, "tournament concluded");
            self.presenter.on_tournament_concluded(winner);
        }
        if changed || concluded.is_some() {
            Dispatch::Applied
        } else {
            Dispatch::Duplicate
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn require(&self, allowed: bool, command: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(self.invalid(command))
        }
    }

    fn invalid(&self, command: &'static str) -> MatchmakingError {
        MatchmakingError::InvalidTransition {
            command,
            mode: self.mode(),
        }
    }

    fn emit(&mut self, payload: ClientPayload) -> Result<()> {
        let json = Envelope::outbound(self.user_id, payload).to_json()?;
        debug!("sending matchmaking envelope: {json}");
        self.sink.send(json)
    }

    fn begin_negotiation(&mut self) {
        self.negotiation_id += 1;
        self.withdrawn = None;
    }

    fn peer_mismatch_or(&self, otherwise: StaleReason) -> StaleReason {
        if self.session.peer_friend_id().is_some() {
            StaleReason::PeerMismatch
        } else {
            otherwise
        }
    }

    /// Run `apply`, then notify presentation of every change it made to the
    /// records of `friends` and to the session snapshot.
    fn observe<R>(&mut self, friends: &[FriendId], apply: impl FnOnce(&mut Self) -> R) -> R {
        let session_before = self.snapshot();
        let records_before: Vec<(FriendId, InvitationRecord)> = friends
            .iter()
            .map(|friend| (*friend, self.ledger.record(*friend)))
            .collect();

        let out = apply(self);

        for (friend, before) in records_before {
            let after = self.ledger.record(friend);
            if after != before {
                self.presenter.on_invitation_changed(friend, after);
            }
        }
        let session_after = self.snapshot();
        if session_after != session_before {
            self.presenter.on_session_changed(session_after);
        }
        out
    }
}

fn discard(error: MatchmakingError) -> Dispatch {
    match &error {
        MatchmakingError::StaleEvent(reason) => warn!("discarding stale event: {reason}"),
        other => warn!("discarding inbound envelope: {other}"),
    }
    Dispatch::Discarded(error)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::MatchmakingEvent;
    use crate::protocol::ServerBody;
    use serde_json::json;

    type TestCoordinator = Coordinator<Vec<String>, Vec<MatchmakingEvent>>;

    fn coordinator(user_id: UserId) -> TestCoordinator {
        Coordinator::new(user_id, Vec::new(), Vec::new())
    }

    fn push(c: &mut TestCoordinator, body: serde_json::Value) -> Dispatch {
        let body: ServerBody = serde_json::from_value(body).unwrap();
        c.dispatch(InboundEnvelope { header: None, body })
    }

    fn sent_bodies(c: &TestCoordinator) -> Vec<serde_json::Value> {
        c.sink()
            .iter()
            .map(|text| serde_json::from_str::<serde_json::Value>(text).unwrap()["body"].clone())
            .collect()
    }

    #[test]
    fn send_invite_requires_idle() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        let err = c.send_invite(42).unwrap_err();
        assert!(matches!(
            err,
            MatchmakingError::InvalidTransition {
                mode: Mode::InQueueRandom,
                ..
            }
        ));
        assert_eq!(c.sink().len(), 1);
    }

    #[test]
    fn failed_send_leaves_state_untouched() {
        let mut c = Coordinator::new(7, crate::adapter::Outbox::new(), Vec::<MatchmakingEvent>::new());
        c.sink_mut().set_open(false);
        let err = c.send_invite(42).unwrap_err();
        assert!(matches!(err, MatchmakingError::TransportUnavailable));
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.record(42).is_empty());
        assert!(c.presenter().is_empty());
        assert_eq!(c.snapshot().negotiation_id, 0);
    }

    #[test]
    fn offer_while_hosting_someone_else_is_recorded_without_mode_change() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        assert!(push(&mut c, json!({"invite": {"host_id": 5, "accept": null}})).is_applied());
        assert_eq!(c.session(), &SessionState::Hosting { peer: 42 });
        assert_eq!(c.record(5).incoming, InviteState::Pending);
        assert_eq!(c.record(42).outgoing, InviteState::Pending);
    }

    #[test]
    fn crossed_invitation_accept_clears_outgoing() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        push(&mut c, json!({"invite": {"host_id": 42, "accept": null}}));
        c.accept_incoming(42).unwrap();
        assert_eq!(
            c.record(42),
            InvitationRecord {
                outgoing: InviteState::None,
                incoming: InviteState::Accepted
            }
        );
        assert_eq!(c.mode(), Mode::GuestNegotiating);
        assert_eq!(c.snapshot().negotiation_id, 2);
    }

    #[test]
    fn decline_keeps_mode_and_clears_incoming() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        push(&mut c, json!({"invite": {"host_id": 5}}));
        c.decline_incoming(5).unwrap();
        assert_eq!(c.mode(), Mode::InQueueRandom);
        assert!(c.record(5).is_empty());
        assert_eq!(
            sent_bodies(&c).last().unwrap(),
            &json!({"type_game": {"invite": {"host_id": 5, "accept": false}}})
        );
    }

    #[test]
    fn request_start_needs_accepted_invite() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        assert!(c.request_start(42).is_err());
        push(&mut c, json!({"invite": {"guest_id": 42, "accept": true}}));
        c.request_start(42).unwrap();
        assert_eq!(c.mode(), Mode::Hosting);
        assert!(c.snapshot().peer_ready);
    }

    #[test]
    fn refused_invite_returns_to_idle() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        assert!(push(&mut c, json!({"invite": {"guest_id": 42, "accept": false}})).is_applied());
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.record(42).is_empty());
    }

    #[test]
    fn host_ready_marks_guest_session() {
        let mut c = coordinator(7);
        push(&mut c, json!({"invite": {"host_id": 3, "username": "kim", "accept": null}}));
        c.accept_incoming(3).unwrap();
        assert!(!c.snapshot().peer_ready);
        assert!(push(&mut c, json!({"invite": {"host_id": 3, "accept": true}})).is_applied());
        assert!(c.snapshot().peer_ready);
        assert!(matches!(
            push(&mut c, json!({"invite": {"host_id": 3, "accept": true}})),
            Dispatch::Duplicate
        ));
    }

    #[test]
    fn host_withdrew_resets_guest_negotiation() {
        let mut c = coordinator(7);
        push(&mut c, json!({"invite": {"host_id": 3}}));
        c.accept_incoming(3).unwrap();
        push(&mut c, json!({"invite": {"host_id": 3, "accept": false}}));
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.record(3).is_empty());
    }

    #[test]
    fn unrelated_cancel_is_ignored() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        let outcome = push(&mut c, json!({"cancel": true, "invite": {"guest_id": 8}}));
        assert_eq!(outcome.stale_reason(), Some(StaleReason::NoPendingInvite));
        assert_eq!(c.session(), &SessionState::Hosting { peer: 42 });
    }

    #[test]
    fn guest_cancel_returns_host_to_idle() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        assert!(push(&mut c, json!({"cancel": true, "invite": {"guest_id": 42, "salon": false}}))
            .is_applied());
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.record(42).is_empty());
    }

    #[test]
    fn confirmation_racing_local_cancel_still_wins() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        push(&mut c, json!({"invite": {"guest_id": 42, "accept": true}}));
        c.request_start(42).unwrap();
        c.cancel(42).unwrap();
        assert!(push(&mut c, json!({"status": "ingame", "id_game": 77})).is_applied());
        assert_eq!(c.session(), &SessionState::InGame { game_id: 77 });
    }

    #[test]
    fn unsolicited_confirmation_in_idle_is_stale() {
        let mut c = coordinator(7);
        let outcome = push(&mut c, json!({"status": "ingame", "id_game": 77}));
        assert_eq!(outcome.stale_reason(), Some(StaleReason::NotAwaitingGame));
        assert_eq!(c.mode(), Mode::Idle);
    }

    #[test]
    fn confirmation_for_other_game_is_stale() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        push(&mut c, json!({"status": "ingame", "id_game": 1}));
        let outcome = push(&mut c, json!({"status": "ingame", "id_game": 2}));
        assert_eq!(outcome.stale_reason(), Some(StaleReason::GameMismatch));
        assert_eq!(c.session().game_id(), Some(1));
    }

    #[test]
    fn server_cancel_during_game_is_stale() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        push(&mut c, json!({"status": "ingame", "id_game": 1}));
        let outcome = push(&mut c, json!({"cancel": true}));
        assert_eq!(outcome.stale_reason(), Some(StaleReason::GameInProgress));
        assert_eq!(c.mode(), Mode::InGame);
    }

    #[test]
    fn elimination_during_game_drops_tournament_but_keeps_game() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Tournament).unwrap();
        push(&mut c, json!({"status": "ingame", "id_game": 80, "tournament": true}));
        assert!(c.tracker().tournament_live());

        let outcome = push(&mut c, json!({"tournament": false, "cancel": true}));
        assert!(outcome.is_applied());
        assert_eq!(c.mode(), Mode::InGame);
        assert!(!c.tracker().tournament_live());
    }

    #[test]
    fn server_cancel_drops_queue_entry() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Tournament).unwrap();
        assert!(push(&mut c, json!({"tournament": false, "cancel": true})).is_applied());
        assert_eq!(c.mode(), Mode::Idle);
    }

    #[test]
    fn aborted_game_returns_to_idle() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        assert!(push(&mut c, json!({"status": "ingame", "id_game": null})).is_applied());
        assert_eq!(c.mode(), Mode::Idle);
    }

    #[test]
    fn envelope_for_another_user_is_discarded() {
        let mut c = coordinator(7);
        let outcome = c.dispatch_text(
            r#"{"header":{"service":"mmaking","dest":"front","id":8},"body":{"invite":{"host_id":3}}}"#,
        );
        assert_eq!(outcome.stale_reason(), Some(StaleReason::NotAddressedToUs));
        assert!(c.record(3).is_empty());
    }

    #[test]
    fn foreign_envelope_is_ignored() {
        let mut c = coordinator(7);
        let outcome = c.dispatch_text(
            r#"{"header":{"service":"chat","dest":"front","id":7},"body":{"invite":{"host_id":3}}}"#,
        );
        assert!(matches!(outcome, Dispatch::Ignored));
        assert!(c.record(3).is_empty());
    }

    #[test]
    fn forget_friend_cancels_active_negotiation() {
        let mut c = coordinator(7);
        c.send_invite(42).unwrap();
        c.forget_friend(42).unwrap();
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.ledger().is_empty());
        assert_eq!(
            sent_bodies(&c).last().unwrap(),
            &json!({"type_game": "invite", "cancel": true})
        );
    }

    #[test]
    fn failed_game_socket_leaves_game() {
        let mut c = coordinator(7);
        c.join_queue(QueueKind::Random).unwrap();
        push(&mut c, json!({"status": "ingame", "id_game": 12}));
        c.report_game_socket(false).unwrap();
        assert_eq!(c.mode(), Mode::Idle);
        assert_eq!(
            sent_bodies(&c).last().unwrap(),
            &json!({"GameSocket": false, "gameId": 12})
        );
        assert!(c.report_game_socket(true).is_err());
    }

    #[test]
    fn withdraw_is_noop_when_idle() {
        let mut c = coordinator(7);
        c.withdraw().unwrap();
        assert!(c.sink().is_empty());
    }

    #[test]
    fn expiry_cancels_outgoing_and_declines_incoming() {
        let mut c = coordinator(7).with_invite_ttl(Some(Duration::from_secs(60)));
        c.send_invite(42).unwrap();
        push(&mut c, json!({"invite": {"host_id": 5}}));

        assert_eq!(c.expire_invitations(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(c.expire_invitations(later), 2);
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.ledger().is_empty());

        let bodies = sent_bodies(&c);
        assert_eq!(
            bodies[1],
            json!({"type_game": {"invite": {"host_id": 5, "accept": false}}})
        );
        assert_eq!(bodies[2], json!({"type_game": "invite", "cancel": true}));
    }

    #[test]
    fn expiry_disabled_without_ttl() {
        let mut c = coordinator(7).with_invite_ttl(None);
        c.send_invite(42).unwrap();
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(c.expire_invitations(later), 0);
        assert_eq!(c.mode(), Mode::Hosting);
    }

    #[test]
    fn execute_dispatches_commands() {
        let mut c = coordinator(7);
        c.execute(LocalCommand::JoinQueue(QueueKind::Random)).unwrap();
        assert_eq!(c.mode(), Mode::InQueueRandom);
        c.execute(LocalCommand::Withdraw).unwrap();
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.execute(LocalCommand::GameEnded).is_err());
    }
}
