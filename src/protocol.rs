//! Wire types for the `mmaking` service on the shared platform socket.
//!
//! Every frame on the platform socket is a JSON envelope of the form
//! `{"header": {"service", "dest", "id"}, "body": {...}}`. Chat and presence
//! traffic travel on the same socket under other `service` names, so every
//! outbound envelope built here is tagged with [`SERVICE`].
//!
//! Outbound bodies ([`ClientPayload`]) serialize to exactly the shapes the
//! matchmaking service expects. Inbound bodies ([`ServerBody`]) are decoded
//! leniently: the service attaches `"cancel": false` to most pushes, sends
//! `null` for unset fields and sometimes uses `"invite": true` as a plain
//! game-kind marker. [`ServerBody::decode`] turns the raw body into a typed
//! [`ServerEvent`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{MatchmakingError, Result};
use crate::queue::{Bracket, Match, Participant, Round};

// ── Type aliases ────────────────────────────────────────────────────

/// Platform-wide user identifier.
pub type UserId = u64;

/// Identifier of a user on the local user's friend list.
pub type FriendId = UserId;

/// Identifier of a game created by the matchmaking service.
pub type GameId = u64;

/// Routing key of the matchmaking service on the shared socket.
pub const SERVICE: &str = "mmaking";

/// Destination tag for envelopes sent to the backend.
pub const DEST_BACK: &str = "back";

// ── Enums ───────────────────────────────────────────────────────────

/// Kind of game a negotiation or queue entry is for.
///
/// Serialized as the `type_game` strings the service understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GameKind {
    /// Direct invitation between two friends.
    #[serde(rename = "invite")]
    Invite,
    /// Random 1-vs-1 matching.
    #[serde(rename = "1vs1R")]
    Random,
    /// Tournament bracket.
    #[serde(rename = "tournament")]
    Tournament,
}

impl GameKind {
    /// The wire string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::Random => "1vs1R",
            Self::Tournament => "tournament",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool a user can queue for without naming an opponent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Random 1-vs-1 matching.
    #[serde(rename = "1vs1R")]
    Random,
    /// Tournament bracket.
    #[serde(rename = "tournament")]
    Tournament,
}

impl From<QueueKind> for GameKind {
    fn from(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Random => GameKind::Random,
            QueueKind::Tournament => GameKind::Tournament,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        GameKind::from(*self).fmt(f)
    }
}

/// Presence status announced when joining a queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
}

// ── Envelope ────────────────────────────────────────────────────────

/// Routing header present on every envelope of the shared socket.
///
/// On outbound envelopes `id` is the sender; on inbound ones the service
/// sets it to the recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub service: String,
    #[serde(default)]
    pub dest: String,
    pub id: UserId,
}

impl Header {
    /// Header for an envelope the local user sends to the matchmaking backend.
    pub fn outbound(user_id: UserId) -> Self {
        Self {
            service: SERVICE.to_string(),
            dest: DEST_BACK.to_string(),
            id: user_id,
        }
    }
}

/// An outbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<B> {
    pub header: Header,
    pub body: B,
}

impl Envelope<ClientPayload> {
    /// Wrap `body` in a matchmaking header stamped with `user_id`.
    pub fn outbound(user_id: UserId, body: ClientPayload) -> Self {
        Self {
            header: Header::outbound(user_id),
            body,
        }
    }
}

impl<B: Serialize> Envelope<B> {
    /// Serialize to the JSON text sent over the socket.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::Serialization`] if the body cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// An inbound matchmaking envelope.
///
/// The header is optional: bare `{"body": ...}` frames are accepted as
/// matchmaking traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    pub body: ServerBody,
}

// ── Outbound payloads ───────────────────────────────────────────────

/// Invitation fields inside an outbound `type_game` object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<FriendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<FriendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startgame: Option<bool>,
}

/// The `{"invite": {...}}` object carried in `type_game`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteSelector {
    pub invite: InviteRequest,
}

/// Bodies the client sends to the matchmaking service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ClientPayload {
    /// Invitation traffic: offer, response, or start request.
    Invite { type_game: InviteSelector },
    /// Join the random or tournament queue.
    JoinQueue {
        status: PresenceStatus,
        type_game: QueueKind,
    },
    /// Withdraw from a negotiation or queue.
    Cancel { type_game: GameKind, cancel: bool },
    /// Report whether the game socket for a confirmed game opened.
    GameSocket {
        #[serde(rename = "GameSocket")]
        online: bool,
        #[serde(rename = "gameId")]
        game_id: GameId,
    },
}

impl ClientPayload {
    /// Invite `guest` to a game hosted by the local user.
    pub fn invite(guest: FriendId) -> Self {
        Self::invite_body(InviteRequest {
            guest_id: Some(guest),
            ..InviteRequest::default()
        })
    }

    /// Answer an invitation received from `host`.
    pub fn respond(host: FriendId, accept: bool) -> Self {
        Self::invite_body(InviteRequest {
            host_id: Some(host),
            accept: Some(accept),
            ..InviteRequest::default()
        })
    }

    /// Ask the service to start the game with `guest`, who already accepted.
    pub fn start_game(guest: FriendId) -> Self {
        Self::invite_body(InviteRequest {
            guest_id: Some(guest),
            accept: Some(true),
            startgame: Some(true),
            ..InviteRequest::default()
        })
    }

    pub fn join_queue(kind: QueueKind) -> Self {
        Self::JoinQueue {
            status: PresenceStatus::Online,
            type_game: kind,
        }
    }

    pub fn cancel(kind: GameKind) -> Self {
        Self::Cancel {
            type_game: kind,
            cancel: true,
        }
    }

    pub fn game_socket(online: bool, game_id: GameId) -> Self {
        Self::GameSocket { online, game_id }
    }

    fn invite_body(invite: InviteRequest) -> Self {
        Self::Invite {
            type_game: InviteSelector { invite },
        }
    }
}

// ── Inbound bodies ──────────────────────────────────────────────────

/// Negotiation fields of an inbound `invite` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteDetails {
    /// Set when the counterpart acted as host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<FriendId>,
    /// Set when the counterpart acted as guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<FriendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<bool>,
    /// Delivery acknowledgement of an outgoing invite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<bool>,
    /// `false` when the host's salon was torn down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The inbound `invite` field: either negotiation details or a bare flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum InviteField {
    Details(InviteDetails),
    Marker(bool),
}

/// Raw body of an inbound matchmaking envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_game: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament: Option<bool>,
    /// Bracket (tournament) or opposing players (other games).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponents: Option<Value>,
    #[serde(
        default,
        rename = "winnerId",
        skip_serializing_if = "Option::is_none"
    )]
    pub winner_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<InviteField>,
}

/// Which role the counterpart held in a cancelled negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counterpart {
    /// The counterpart invited the local user.
    Host(FriendId),
    /// The local user invited the counterpart.
    Guest(FriendId),
}

/// Contents of an `ingame` push.
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfirmation {
    pub game_id: GameId,
    pub tournament: bool,
    /// Full bracket snapshot, tournament pushes only.
    pub bracket: Option<Bracket>,
    /// Opposing players, local user excluded.
    pub opponents: Vec<Participant>,
    pub winner: Option<UserId>,
}

/// A decoded inbound matchmaking event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The server started a game for the local user.
    GameConfirmed(GameConfirmation),
    /// The server could not create the game it announced.
    GameAborted,
    /// `host` invited the local user.
    InviteOffer { host: FriendId },
    /// `host` acknowledged the local user's acceptance.
    HostReady { host: FriendId },
    /// The negotiation with `host` fell apart on the host's side.
    HostWithdrew { host: FriendId },
    /// `guest` answered the local user's invite.
    InviteResponse { guest: FriendId, accepted: bool },
    /// The service delivered the local user's invite to `guest`.
    InviteDelivered { guest: FriendId },
    /// The counterpart of a negotiation cancelled it.
    InviteCancelled(Counterpart),
    /// The server dropped the local user's queue entry or tournament.
    MatchCancelled { abandon_tournament: bool },
    /// A bracket snapshot outside any game confirmation.
    BracketUpdated(Bracket),
    /// The tournament resolved.
    TournamentWinner {
        winner: UserId,
        bracket: Option<Bracket>,
    },
}

impl ServerBody {
    /// Decode the body into a typed event.
    ///
    /// `local` is the local user's id; it is excluded from opponent lists.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::MalformedEnvelope`] when the body carries
    /// none of the fields a matchmaking push is recognised by, or an `invite`
    /// object names neither party.
    pub fn decode(mut self, local: UserId) -> Result<ServerEvent> {
        if self.status.as_deref() == Some("ingame") {
            return Ok(self.into_game_event(local));
        }

        let details = match self.invite.take() {
            Some(InviteField::Details(details)) => Some(details),
            Some(InviteField::Marker(_)) | None => None,
        };

        if self.cancel == Some(true) {
            return match details {
                Some(details) => details.cancelled_counterpart(),
                None => Ok(ServerEvent::MatchCancelled {
                    abandon_tournament: self.tournament == Some(false),
                }),
            };
        }

        if let Some(details) = details {
            return details.into_negotiation_event();
        }

        if let Some(winner) = self.winner_id {
            let bracket = self.bracket_snapshot();
            return Ok(ServerEvent::TournamentWinner { winner, bracket });
        }

        Err(malformed(match self.status {
            Some(status) => format!("unrecognised status {status:?}"),
            None => "no recognised matchmaking fields".to_string(),
        }))
    }

    fn into_game_event(self, local: UserId) -> ServerEvent {
        let Some(game_id) = self.id_game else {
            return self.into_tournament_end();
        };
        let tournament = self.tournament == Some(true);
        let bracket = if tournament {
            self.bracket_snapshot()
        } else {
            None
        };
        let opponents = match &bracket {
            Some(bracket) => bracket.opponents_of(local),
            None => self
                .opponents
                .as_ref()
                .map(|value| collect_participants(value, local))
                .unwrap_or_default(),
        };
        ServerEvent::GameConfirmed(GameConfirmation {
            game_id,
            tournament,
            bracket,
            opponents,
            winner: self.winner_id,
        })
    }

    /// An `ingame` push without a game id. Tournament pushes of this shape
    /// close the tournament; anything else means the game was not created.
    fn into_tournament_end(self) -> ServerEvent {
        let bracket = self.bracket_snapshot();
        match (self.winner_id, bracket) {
            (Some(winner), bracket) => ServerEvent::TournamentWinner { winner, bracket },
            (None, Some(bracket)) if self.tournament == Some(true) => {
                ServerEvent::BracketUpdated(bracket)
            }
            (None, _) => ServerEvent::GameAborted,
        }
    }

    /// The `opponents` salon map as a bracket, stamped with `winnerId`.
    fn bracket_snapshot(&self) -> Option<Bracket> {
        self.opponents
            .as_ref()
            .and_then(lenient_bracket)
            .map(|mut bracket| {
                bracket.winner_id = self.winner_id;
                bracket
            })
    }
}

impl InviteDetails {
    fn cancelled_counterpart(self) -> Result<ServerEvent> {
        match (self.host_id, self.guest_id) {
            (Some(host), _) => Ok(ServerEvent::InviteCancelled(Counterpart::Host(host))),
            (None, Some(guest)) => Ok(ServerEvent::InviteCancelled(Counterpart::Guest(guest))),
            (None, None) => Err(malformed("cancelled invite names no party")),
        }
    }

    fn into_negotiation_event(self) -> Result<ServerEvent> {
        if let Some(host) = self.host_id {
            return Ok(match self.accept {
                None => ServerEvent::InviteOffer { host },
                Some(true) => ServerEvent::HostReady { host },
                Some(false) => ServerEvent::HostWithdrew { host },
            });
        }
        if let Some(guest) = self.guest_id {
            return match (self.accept, self.send) {
                (Some(accepted), _) => Ok(ServerEvent::InviteResponse { guest, accepted }),
                (None, Some(true)) => Ok(ServerEvent::InviteDelivered { guest }),
                (None, _) => Err(malformed(format!("invite for guest {guest} carries no answer"))),
            };
        }
        Err(malformed("invite names neither host_id nor guest_id"))
    }
}

// ── Bracket decoding ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ParticipantWire {
    user_id: UserId,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    score: Option<u32>,
}

impl From<ParticipantWire> for Participant {
    fn from(wire: ParticipantWire) -> Self {
        Participant {
            user_id: wire.user_id,
            username: wire.username.unwrap_or_default(),
            score: wire.score,
        }
    }
}

/// Decode a tournament `opponents` map into a [`Bracket`].
///
/// The map is keyed by salon number; each salon holds two player objects
/// keyed by user id and a `round` number (round 1 when absent or null).
/// Rounds come out ordered by number, matches by salon number.
///
/// # Errors
///
/// Returns [`MatchmakingError::MalformedEnvelope`] if the value does not have
/// that shape or a salon does not hold exactly two players.
pub fn parse_bracket(opponents: &Value) -> Result<Bracket> {
    let salons = opponents
        .as_object()
        .ok_or_else(|| malformed("bracket is not an object"))?;

    let mut rounds: BTreeMap<u32, Vec<(u64, Match)>> = BTreeMap::new();
    for (salon_key, salon) in salons {
        let salon_no: u64 = salon_key
            .parse()
            .map_err(|_| malformed(format!("salon key {salon_key:?} is not a number")))?;
        let fields = salon
            .as_object()
            .ok_or_else(|| malformed(format!("salon {salon_no} is not an object")))?;

        let mut round = 1;
        let mut players = Vec::with_capacity(2);
        for (key, entry) in fields {
            if key == "round" {
                if !entry.is_null() {
                    round = entry
                        .as_u64()
                        .and_then(|r| u32::try_from(r).ok())
                        .ok_or_else(|| malformed(format!("salon {salon_no} has a bad round")))?;
                }
                continue;
            }
            let wire: ParticipantWire = serde_json::from_value(entry.clone())
                .map_err(|e| malformed(format!("salon {salon_no} player {key}: {e}")))?;
            players.push(Participant::from(wire));
        }

        let [home, away] = <[Participant; 2]>::try_from(players).map_err(|players| {
            malformed(format!(
                "salon {salon_no} holds {} players, expected 2",
                players.len()
            ))
        })?;
        rounds
            .entry(round)
            .or_default()
            .push((salon_no, Match::new(home, away)));
    }

    let rounds = rounds
        .into_iter()
        .map(|(number, mut matches)| {
            matches.sort_by_key(|(salon_no, _)| *salon_no);
            Round {
                number,
                matches: matches.into_iter().map(|(_, game)| game).collect(),
            }
        })
        .collect();

    Ok(Bracket {
        rounds,
        winner_id: None,
    })
}

/// A bracket that fails to decode is dropped; the rest of the push still applies.
fn lenient_bracket(opponents: &Value) -> Option<Bracket> {
    match parse_bracket(opponents) {
        Ok(bracket) => Some(bracket),
        Err(e) => {
            warn!("ignoring undecodable bracket: {e}");
            None
        }
    }
}

/// Collect opposing players from a non-tournament `opponents` value.
///
/// The service sends either a flat `{user_id: player}` map or the same map
/// nested one level under a salon number.
fn collect_participants(value: &Value, local: UserId) -> Vec<Participant> {
    let mut found: Vec<Participant> = Vec::new();
    let mut visit = |entry: &Value| {
        let Ok(wire) = serde_json::from_value::<ParticipantWire>(entry.clone()) else {
            return false;
        };
        if wire.user_id != local && !found.iter().any(|p| p.user_id == wire.user_id) {
            found.push(wire.into());
        }
        true
    };

    if let Some(map) = value.as_object() {
        for entry in map.values() {
            if visit(entry) {
                continue;
            }
            if let Some(nested) = entry.as_object() {
                for inner in nested.values() {
                    visit(inner);
                }
            }
        }
    }
    found
}

fn malformed(reason: impl Into<String>) -> MatchmakingError {
    MatchmakingError::MalformedEnvelope(reason.into())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> ServerBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn invite_envelope_matches_wire_literal() {
        let json = Envelope::outbound(7, ClientPayload::invite(42))
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"header":{"service":"mmaking","dest":"back","id":7},"body":{"type_game":{"invite":{"guest_id":42}}}}"#
        );
    }

    #[test]
    fn start_game_payload_shape() {
        let value = serde_json::to_value(ClientPayload::start_game(42)).unwrap();
        assert_eq!(
            value,
            json!({"type_game": {"invite": {"guest_id": 42, "accept": true, "startgame": true}}})
        );
    }

    #[test]
    fn queue_and_cancel_payload_shapes() {
        assert_eq!(
            serde_json::to_value(ClientPayload::join_queue(QueueKind::Random)).unwrap(),
            json!({"status": "online", "type_game": "1vs1R"})
        );
        assert_eq!(
            serde_json::to_value(ClientPayload::cancel(GameKind::Invite)).unwrap(),
            json!({"type_game": "invite", "cancel": true})
        );
        assert_eq!(
            serde_json::to_value(ClientPayload::game_socket(false, 9)).unwrap(),
            json!({"GameSocket": false, "gameId": 9})
        );
    }

    #[test]
    fn offer_with_null_accept_decodes_as_offer() {
        let event = body(json!({
            "invite": {"host_id": 5, "username": "ana", "accept": null},
            "cancel": false
        }))
        .decode(1)
        .unwrap();
        assert_eq!(event, ServerEvent::InviteOffer { host: 5 });
    }

    #[test]
    fn host_answers_decode_by_accept_flag() {
        let ready = body(json!({"invite": {"host_id": 5, "accept": true}}));
        assert_eq!(ready.decode(1).unwrap(), ServerEvent::HostReady { host: 5 });
        let gone = body(json!({"invite": {"host_id": 5, "accept": false}}));
        assert_eq!(gone.decode(1).unwrap(), ServerEvent::HostWithdrew { host: 5 });
    }

    #[test]
    fn guest_answer_and_delivery_ack() {
        let answer = body(json!({"invite": {"guest_id": 42, "accept": true}}));
        assert_eq!(
            answer.decode(7).unwrap(),
            ServerEvent::InviteResponse {
                guest: 42,
                accepted: true
            }
        );
        let ack = body(json!({"invite": {"guest_id": 42, "accept": null, "send": true}}));
        assert_eq!(ack.decode(7).unwrap(), ServerEvent::InviteDelivered { guest: 42 });
        let bare = body(json!({"invite": {"guest_id": 42}}));
        assert!(matches!(
            bare.decode(7),
            Err(MatchmakingError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn cancel_without_invite_object_is_match_cancel() {
        let ended = body(json!({"cancel": true, "invite": false, "tournament": true}));
        assert_eq!(
            ended.decode(1).unwrap(),
            ServerEvent::MatchCancelled {
                abandon_tournament: false
            }
        );
        let dropped = body(json!({"tournament": false, "cancel": true}));
        assert_eq!(
            dropped.decode(1).unwrap(),
            ServerEvent::MatchCancelled {
                abandon_tournament: true
            }
        );
    }

    #[test]
    fn cancelled_invite_names_counterpart_role() {
        let host = body(json!({"invite": {"host_id": 3}, "cancel": true}));
        assert_eq!(
            host.decode(1).unwrap(),
            ServerEvent::InviteCancelled(Counterpart::Host(3))
        );
        let guest = body(json!({"invite": {"guest_id": 4, "salon": false}, "cancel": true}));
        assert_eq!(
            guest.decode(1).unwrap(),
            ServerEvent::InviteCancelled(Counterpart::Guest(4))
        );
    }

    #[test]
    fn ingame_without_game_id_is_aborted() {
        let event = body(json!({"status": "ingame", "id_game": null})).decode(1);
        assert_eq!(event.unwrap(), ServerEvent::GameAborted);
    }

    #[test]
    fn ingame_without_game_id_ends_tournament() {
        let event = body(json!({
            "status": "ingame",
            "id_game": null,
            "tournament": true,
            "cancel": false,
            "opponents": {"1": {
                "1": {"user_id": 1, "username": "ana", "score": 5},
                "2": {"user_id": 2, "username": "bo", "score": 2},
                "round": 1
            }},
            "winnerId": 1
        }))
        .decode(2)
        .unwrap();
        let ServerEvent::TournamentWinner { winner, bracket } = event else {
            panic!("expected TournamentWinner");
        };
        assert_eq!(winner, 1);
        let bracket = bracket.unwrap();
        assert_eq!(bracket.winner_id, Some(1));
        assert_eq!(bracket.rounds.len(), 1);
    }

    #[test]
    fn tournament_push_without_game_or_winner_is_bracket_only() {
        let event = body(json!({
            "status": "ingame",
            "id_game": null,
            "tournament": true,
            "opponents": {"1": {
                "1": {"user_id": 1, "score": 0},
                "2": {"user_id": 2, "score": 0},
                "round": 1
            }}
        }))
        .decode(1)
        .unwrap();
        assert!(matches!(event, ServerEvent::BracketUpdated(b) if b.rounds.len() == 1));
    }

    #[test]
    fn ingame_invite_marker_is_not_negotiation() {
        let event = body(json!({
            "status": "ingame",
            "id_game": 555,
            "invite": true,
            "cancel": false,
            "opponents": {"1": {
                "7": {"user_id": 7, "username": "me", "score": null},
                "42": {"user_id": 42, "username": "bob", "score": null}
            }}
        }))
        .decode(7)
        .unwrap();
        let ServerEvent::GameConfirmed(confirmation) = event else {
            panic!("expected GameConfirmed");
        };
        assert_eq!(confirmation.game_id, 555);
        assert!(!confirmation.tournament);
        assert!(confirmation.bracket.is_none());
        assert_eq!(confirmation.opponents.len(), 1);
        assert_eq!(confirmation.opponents[0].user_id, 42);
        assert_eq!(confirmation.opponents[0].username, "bob");
    }

    #[test]
    fn tournament_bracket_orders_rounds_and_salons() {
        let bracket = parse_bracket(&json!({
            "10": {
                "1": {"user_id": 1, "username": "a", "score": 3},
                "2": {"user_id": 2, "username": "b", "score": 1},
                "round": 2
            },
            "2": {
                "3": {"user_id": 3, "username": "c", "score": null},
                "4": {"user_id": 4, "username": "d", "score": null},
                "round": 1
            },
            "1": {
                "1": {"user_id": 1, "username": "a", "score": 5},
                "2": {"user_id": 2, "username": "b", "score": 2},
                "round": 1
            }
        }))
        .unwrap();

        assert_eq!(bracket.rounds.len(), 2);
        assert_eq!(bracket.rounds[0].number, 1);
        assert_eq!(bracket.rounds[0].matches.len(), 2);
        assert_eq!(bracket.rounds[0].matches[0].home.user_id, 1);
        assert_eq!(bracket.rounds[0].matches[0].winner, Some(1));
        assert_eq!(bracket.rounds[0].matches[1].winner, None);
        assert_eq!(bracket.rounds[1].number, 2);
        assert_eq!(bracket.rounds[1].matches[0].winner, Some(1));
        assert!(bracket.winner_id.is_none());
    }

    #[test]
    fn salon_with_one_player_is_malformed() {
        let err = parse_bracket(&json!({"1": {"5": {"user_id": 5}, "round": 1}})).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn undecodable_bracket_keeps_game_confirmation() {
        let event = body(json!({
            "status": "ingame",
            "id_game": 9,
            "tournament": true,
            "opponents": {"1": {"5": {"user_id": 5}, "round": 1}}
        }))
        .decode(5)
        .unwrap();
        let ServerEvent::GameConfirmed(confirmation) = event else {
            panic!("expected GameConfirmed");
        };
        assert_eq!(confirmation.game_id, 9);
        assert!(confirmation.tournament);
        assert!(confirmation.bracket.is_none());
    }

    #[test]
    fn winner_push_carries_winner_into_bracket() {
        let event = body(json!({
            "cancel": false,
            "tournament": true,
            "winnerId": 2,
            "opponents": {"1": {
                "1": {"user_id": 1, "score": 1},
                "2": {"user_id": 2, "score": 5},
                "round": 2
            }}
        }))
        .decode(1)
        .unwrap();
        let ServerEvent::TournamentWinner { winner, bracket } = event else {
            panic!("expected TournamentWinner");
        };
        assert_eq!(winner, 2);
        assert_eq!(bracket.unwrap().winner_id, Some(2));
    }

    #[test]
    fn empty_body_is_malformed() {
        let err = ServerBody::default().decode(1).unwrap_err();
        assert!(matches!(err, MatchmakingError::MalformedEnvelope(_)));
    }

    #[test]
    fn unknown_status_is_malformed() {
        let err = body(json!({"status": "online", "cancel": false}))
            .decode(1)
            .unwrap_err();
        assert!(err.to_string().contains("online"));
    }
}
