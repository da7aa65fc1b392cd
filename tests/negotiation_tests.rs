#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Scenario tests for the coordinator state machine, driven synchronously
//! with JSON pushes shaped like the service's.

mod common;

use std::time::{Duration, Instant};

use common::*;
use mmaking_client::{
    Coordinator, Dispatch, InvitationRecord, InviteState, MatchmakingError,
    MatchmakingEvent, Mode, Outbox, QueueKind, StaleReason,
};
use serde_json::json;

// ════════════════════════════════════════════════════════════════════
// Invitations
// ════════════════════════════════════════════════════════════════════

#[test]
fn invite_accept_start_launches_once() {
    let mut c = coordinator(7);

    c.send_invite(42).unwrap();
    assert_eq!(
        c.sink()[0],
        r#"{"header":{"service":"mmaking","dest":"back","id":7},"body":{"type_game":{"invite":{"guest_id":42}}}}"#
    );
    assert_eq!(c.mode(), Mode::Hosting);
    assert_eq!(c.record(42).outgoing, InviteState::Pending);

    assert!(push(&mut c, response_body(42, true)).is_applied());
    assert_eq!(c.record(42).outgoing, InviteState::Accepted);
    assert_eq!(c.mode(), Mode::Hosting);
    assert!(c.snapshot().peer_ready);

    c.request_start(42).unwrap();
    assert_eq!(
        sent_bodies(&c)[1],
        json!({"type_game": {"invite": {"guest_id": 42, "accept": true, "startgame": true}}})
    );
    assert_eq!(c.mode(), Mode::Hosting);

    assert!(push(&mut c, ingame_body(555)).is_applied());
    assert_eq!(c.mode(), Mode::InGame);
    assert_eq!(c.snapshot().game_id, Some(555));
    assert!(c.record(42).is_empty());

    assert!(matches!(push(&mut c, ingame_body(555)), Dispatch::Duplicate));
    assert_eq!(launch_count(c.presenter()), 1);
}

#[test]
fn session_events_follow_each_transition() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    push(&mut c, response_body(42, true));

    let events = take_events(&mut c);
    let modes: Vec<(Mode, bool)> = events
        .iter()
        .filter_map(|event| match event {
            MatchmakingEvent::SessionChanged(snapshot) => {
                Some((snapshot.mode, snapshot.peer_ready))
            }
            _ => None,
        })
        .collect();
    assert_eq!(modes, vec![(Mode::Hosting, false), (Mode::Hosting, true)]);

    let records: Vec<InvitationRecord> = events
        .iter()
        .filter_map(|event| match event {
            MatchmakingEvent::InvitationChanged { friend: 42, record } => Some(*record),
            _ => None,
        })
        .collect();
    assert_eq!(
        records,
        vec![
            InvitationRecord {
                outgoing: InviteState::Pending,
                incoming: InviteState::None,
            },
            InvitationRecord {
                outgoing: InviteState::Accepted,
                incoming: InviteState::None,
            },
        ]
    );
}

#[test]
fn refusal_returns_host_to_idle() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    assert!(push(&mut c, response_body(42, false)).is_applied());
    assert_eq!(c.mode(), Mode::Idle);
    assert!(c.ledger().is_empty());
}

#[test]
fn guest_accepts_and_waits_for_host() {
    let mut c = coordinator(7);
    assert!(push(&mut c, offer_body(9, "nina")).is_applied());
    assert_eq!(c.mode(), Mode::Idle);
    assert_eq!(c.record(9).incoming, InviteState::Pending);

    c.accept_incoming(9).unwrap();
    assert_eq!(
        sent_bodies(&c)[0],
        json!({"type_game": {"invite": {"host_id": 9, "accept": true}}})
    );
    assert_eq!(c.mode(), Mode::GuestNegotiating);
    assert!(!c.snapshot().peer_ready);

    assert!(push(&mut c, host_ready_body(9)).is_applied());
    assert!(c.snapshot().peer_ready);
    assert!(matches!(push(&mut c, host_ready_body(9)), Dispatch::Duplicate));

    assert!(push(&mut c, ingame_body(601)).is_applied());
    assert_eq!(c.mode(), Mode::InGame);
}

#[test]
fn offers_from_several_friends_coexist() {
    let mut c = coordinator(7);
    push(&mut c, offer_body(9, "nina"));
    push(&mut c, offer_body(11, "omar"));
    assert!(matches!(push(&mut c, offer_body(9, "nina")), Dispatch::Duplicate));
    assert_eq!(c.ledger().len(), 2);

    c.decline_incoming(11).unwrap();
    assert_eq!(
        sent_bodies(&c)[0],
        json!({"type_game": {"invite": {"host_id": 11, "accept": false}}})
    );
    assert_eq!(c.record(11), InvitationRecord::default());
    assert_eq!(c.record(9).incoming, InviteState::Pending);
    assert_eq!(c.mode(), Mode::Idle);
}

#[test]
fn crossed_invitations_resolve_to_guest() {
    let mut c = coordinator(7);
    c.send_invite(9).unwrap();
    push(&mut c, offer_body(9, "nina"));
    assert_eq!(
        c.record(9),
        InvitationRecord {
            outgoing: InviteState::Pending,
            incoming: InviteState::Pending,
        }
    );

    c.accept_incoming(9).unwrap();
    assert_eq!(c.mode(), Mode::GuestNegotiating);
    assert_eq!(
        c.record(9),
        InvitationRecord {
            outgoing: InviteState::None,
            incoming: InviteState::Accepted,
        }
    );
}

#[test]
fn host_withdrawing_pending_offer_clears_it() {
    let mut c = coordinator(7);
    push(&mut c, offer_body(9, "nina"));
    assert!(push(&mut c, cancel_from_host_body(9)).is_applied());
    assert!(c.ledger().is_empty());
    assert_eq!(
        push(&mut c, cancel_from_host_body(9)).stale_reason(),
        Some(StaleReason::NoPendingInvite)
    );
}

// ════════════════════════════════════════════════════════════════════
// Cancellation
// ════════════════════════════════════════════════════════════════════

#[test]
fn local_cancel_works_from_both_negotiating_modes() {
    let mut host = coordinator(7);
    host.send_invite(42).unwrap();
    host.cancel(42).unwrap();
    assert_eq!(host.mode(), Mode::Idle);
    assert!(host.ledger().is_empty());
    assert_eq!(
        sent_bodies(&host)[1],
        json!({"type_game": "invite", "cancel": true})
    );

    let mut guest = coordinator(7);
    push(&mut guest, offer_body(9, "nina"));
    guest.accept_incoming(9).unwrap();
    guest.cancel(9).unwrap();
    assert_eq!(guest.mode(), Mode::Idle);
    assert!(guest.ledger().is_empty());
}

#[test]
fn cancelling_someone_else_is_rejected_without_sending() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    let err = c.cancel(5).unwrap_err();
    assert!(matches!(
        err,
        MatchmakingError::InvalidTransition {
            mode: Mode::Hosting,
            ..
        }
    ));
    assert_eq!(c.sink().len(), 1);
    assert_eq!(c.mode(), Mode::Hosting);
}

#[test]
fn guest_cancel_push_returns_host_to_idle() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    push(&mut c, response_body(42, true));
    assert!(push(&mut c, cancel_from_guest_body(42)).is_applied());
    assert_eq!(c.mode(), Mode::Idle);
    assert!(c.ledger().is_empty());
}

#[test]
fn confirmation_racing_a_local_cancel_still_launches() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    push(&mut c, response_body(42, true));
    c.request_start(42).unwrap();
    c.cancel(42).unwrap();

    assert!(push(&mut c, ingame_body(555)).is_applied());
    assert_eq!(c.mode(), Mode::InGame);
    assert_eq!(launch_count(c.presenter()), 1);
}

#[test]
fn server_cancel_during_game_is_stale() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    push(&mut c, ingame_body(31));
    assert_eq!(
        push(&mut c, json!({"cancel": true})).stale_reason(),
        Some(StaleReason::GameInProgress)
    );
    assert_eq!(c.mode(), Mode::InGame);
}

// ════════════════════════════════════════════════════════════════════
// Stale events
// ════════════════════════════════════════════════════════════════════

#[test]
fn response_from_wrong_friend_is_discarded() {
    let mut c = coordinator(7);
    push(&mut c, offer_body(9, "nina"));
    c.accept_incoming(9).unwrap();
    let before = c.snapshot();
    let events_before = c.presenter().len();

    let dispatch = push(&mut c, response_body(3, true));
    assert_eq!(dispatch.stale_reason(), Some(StaleReason::PeerMismatch));
    assert_eq!(c.snapshot(), before);
    assert_eq!(c.presenter().len(), events_before);
}

#[test]
fn confirmation_while_idle_is_discarded() {
    let mut c = coordinator(7);
    assert_eq!(
        push(&mut c, ingame_body(1)).stale_reason(),
        Some(StaleReason::NotAwaitingGame)
    );
    assert_eq!(c.mode(), Mode::Idle);
    assert_eq!(launch_count(c.presenter()), 0);
}

#[test]
fn confirmation_for_another_game_is_discarded() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    push(&mut c, ingame_body(31));
    assert_eq!(
        push(&mut c, ingame_body(32)).stale_reason(),
        Some(StaleReason::GameMismatch)
    );
    assert_eq!(c.snapshot().game_id, Some(31));
}

#[test]
fn frame_for_another_user_is_discarded() {
    let mut c = coordinator(7);
    let dispatch = c.dispatch_text(&mmaking_frame(8, offer_body(9, "nina")));
    assert_eq!(dispatch.stale_reason(), Some(StaleReason::NotAddressedToUs));
    assert!(c.ledger().is_empty());
}

#[test]
fn foreign_and_garbage_frames_do_not_touch_state() {
    let mut c = coordinator(7);
    assert!(matches!(
        c.dispatch_text(&chat_frame(7, "hi")),
        Dispatch::Ignored
    ));
    assert!(c.dispatch_text("not json").is_discarded());
    assert!(c.presenter().is_empty());
}

#[test]
fn commands_are_validated_against_mode() {
    let mut c = coordinator(7);
    assert!(c.request_start(42).is_err());
    assert!(c.leave_queue().is_err());
    assert!(c.on_game_ended().is_err());
    assert!(c.accept_incoming(9).is_err());
    c.join_queue(QueueKind::Random).unwrap();
    assert!(matches!(
        c.send_invite(42),
        Err(MatchmakingError::InvalidTransition {
            mode: Mode::InQueueRandom,
            ..
        })
    ));
    assert_eq!(c.sink().len(), 1);
}

#[test]
fn closed_sink_leaves_state_untouched() {
    let mut outbox = Outbox::new();
    outbox.set_open(false);
    let mut c = Coordinator::new(7, outbox, Vec::<MatchmakingEvent>::new());

    assert!(matches!(
        c.send_invite(42),
        Err(MatchmakingError::TransportUnavailable)
    ));
    assert_eq!(c.mode(), Mode::Idle);
    assert!(c.ledger().is_empty());
    assert!(c.presenter().is_empty());

    c.sink_mut().set_open(true);
    c.send_invite(42).unwrap();
    assert_eq!(c.sink().len(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Queues and tournaments
// ════════════════════════════════════════════════════════════════════

#[test]
fn random_queue_round_trip() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    assert_eq!(c.mode(), Mode::InQueueRandom);
    c.leave_queue().unwrap();
    assert_eq!(c.mode(), Mode::Idle);
    assert_eq!(
        sent_bodies(&c),
        vec![
            json!({"status": "online", "type_game": "1vs1R"}),
            json!({"type_game": "1vs1R", "cancel": true}),
        ]
    );
    // The server settling the withdrawal is not an error.
    assert!(matches!(push(&mut c, json!({"cancel": true})), Dispatch::Ignored));
}

#[test]
fn random_match_launches_with_opponent() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    push(
        &mut c,
        json!({
            "status": "ingame",
            "id_game": 31,
            "opponents": {"12": {"user_id": 12, "username": "rival"}}
        }),
    );
    let launch = c
        .presenter()
        .iter()
        .find_map(|event| match event {
            MatchmakingEvent::LaunchGame { game_id, opponents } => Some((*game_id, opponents)),
            _ => None,
        })
        .unwrap();
    assert_eq!(launch.0, 31);
    assert_eq!(launch.1[0].user_id, 12);
}

#[test]
fn tournament_continues_between_rounds() {
    let mut c = coordinator(1);
    c.join_queue(QueueKind::Tournament).unwrap();
    let first_round = json!({
        "1": salon(1, (1, None), (2, None)),
        "2": salon(1, (3, None), (4, None)),
    });
    assert!(push(&mut c, tournament_ingame_body(80, first_round)).is_applied());
    assert_eq!(c.mode(), Mode::InGame);
    assert!(c.tracker().tournament_live());

    c.on_game_ended().unwrap();
    assert_eq!(c.mode(), Mode::Idle);

    assert!(push(&mut c, tournament_ingame_body(81, four_player_bracket())).is_applied());
    assert_eq!(c.snapshot().game_id, Some(81));
    assert_eq!(c.bracket().rounds.len(), 2);
    assert_eq!(launch_count(c.presenter()), 2);
}

#[test]
fn identical_bracket_snapshots_apply_once() {
    let mut c = coordinator(1);
    c.join_queue(QueueKind::Tournament).unwrap();
    push(&mut c, tournament_ingame_body(80, four_player_bracket()));
    take_events(&mut c);

    assert!(matches!(
        push(&mut c, tournament_ingame_body(80, four_player_bracket())),
        Dispatch::Duplicate
    ));
    assert!(c.presenter().is_empty());
    assert_eq!(c.bracket().rounds.len(), 2);
}

#[test]
fn tournament_winner_is_announced_once() {
    let mut c = coordinator(1);
    c.join_queue(QueueKind::Tournament).unwrap();
    push(&mut c, tournament_ingame_body(81, four_player_bracket()));
    c.on_game_ended().unwrap();

    assert!(push(&mut c, winner_body(4, four_player_bracket())).is_applied());
    assert!(matches!(
        push(&mut c, winner_body(4, four_player_bracket())),
        Dispatch::Duplicate
    ));

    let concluded: Vec<_> = c
        .presenter()
        .iter()
        .filter(|event| matches!(event, MatchmakingEvent::TournamentConcluded { winner: 4 }))
        .collect();
    assert_eq!(concluded.len(), 1);
    assert_eq!(c.bracket().winner_id, Some(4));
    assert!(!c.tracker().tournament_live());

    // No further rounds start from idle once the tournament resolved.
    assert_eq!(
        push(&mut c, tournament_ingame_body(82, four_player_bracket())).stale_reason(),
        Some(StaleReason::NotAwaitingGame)
    );
}

#[test]
fn end_of_tournament_push_records_winner() {
    let mut c = coordinator(1);
    c.join_queue(QueueKind::Tournament).unwrap();
    push(&mut c, tournament_ingame_body(80, four_player_bracket()));
    c.on_game_ended().unwrap();
    take_events(&mut c);

    let finished = json!({
        "1": salon(1, (1, Some(5)), (2, Some(2))),
        "2": salon(1, (3, Some(1)), (4, Some(5))),
        "3": salon(2, (1, Some(5)), (4, Some(3))),
    });
    assert!(push(&mut c, end_tournament_body(1, finished.clone())).is_applied());

    assert_eq!(c.bracket().winner_id, Some(1));
    assert_eq!(c.bracket().rounds.len(), 2);
    assert!(!c.tracker().tournament_live());
    assert_eq!(c.mode(), Mode::Idle);
    let events = take_events(&mut c);
    assert!(events.contains(&MatchmakingEvent::TournamentConcluded { winner: 1 }));
    assert_eq!(launch_count(&events), 0);

    assert!(matches!(
        push(&mut c, end_tournament_body(1, finished)),
        Dispatch::Duplicate
    ));
}

#[test]
fn elimination_notice_mid_game_ends_tournament() {
    let mut c = coordinator(2);
    c.join_queue(QueueKind::Tournament).unwrap();
    push(&mut c, tournament_ingame_body(80, four_player_bracket()));
    assert_eq!(c.mode(), Mode::InGame);

    assert!(push(&mut c, eliminated_body()).is_applied());
    assert_eq!(c.mode(), Mode::InGame);
    assert!(c.bracket().is_empty());
    assert!(!c.tracker().tournament_live());

    c.on_game_ended().unwrap();
    take_events(&mut c);
    assert_eq!(
        push(&mut c, tournament_ingame_body(99, four_player_bracket())).stale_reason(),
        Some(StaleReason::NotAwaitingGame)
    );
    assert_eq!(c.mode(), Mode::Idle);
    assert_eq!(launch_count(&take_events(&mut c)), 0);
}

#[test]
fn leaving_tournament_queue_discards_bracket() {
    let mut c = coordinator(1);
    c.join_queue(QueueKind::Tournament).unwrap();
    push(&mut c, winner_body(4, four_player_bracket()));
    assert!(!c.bracket().is_empty());

    c.leave_queue().unwrap();
    assert!(c.bracket().is_empty());
    assert_eq!(
        sent_bodies(&c)[1],
        json!({"type_game": "tournament", "cancel": true})
    );
}

// ════════════════════════════════════════════════════════════════════
// Game lifecycle and expiry
// ════════════════════════════════════════════════════════════════════

#[test]
fn failed_game_socket_leaves_game() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    push(&mut c, ingame_body(31));

    c.report_game_socket(true).unwrap();
    assert_eq!(c.mode(), Mode::InGame);
    c.report_game_socket(false).unwrap();
    assert_eq!(c.mode(), Mode::Idle);
    let bodies = sent_bodies(&c);
    assert_eq!(bodies[1], json!({"GameSocket": true, "gameId": 31}));
    assert_eq!(bodies[2], json!({"GameSocket": false, "gameId": 31}));
}

#[test]
fn aborted_game_returns_to_idle() {
    let mut c = coordinator(7);
    c.join_queue(QueueKind::Random).unwrap();
    assert!(push(&mut c, json!({"status": "ingame"})).is_applied());
    assert_eq!(c.mode(), Mode::Idle);
}

#[test]
fn forgetting_active_peer_cancels_first() {
    let mut c = coordinator(7);
    c.send_invite(42).unwrap();
    push(&mut c, offer_body(5, "eve"));
    c.forget_friend(42).unwrap();
    assert_eq!(c.mode(), Mode::Idle);
    assert_eq!(c.record(42), InvitationRecord::default());
    assert_eq!(c.record(5).incoming, InviteState::Pending);
    assert_eq!(c.sink().len(), 2);
}

#[test]
fn stale_invitations_expire_after_ttl() {
    let mut c = coordinator(7).with_invite_ttl(Some(Duration::from_secs(60)));
    c.send_invite(42).unwrap();
    push(&mut c, offer_body(5, "eve"));

    assert_eq!(c.expire_invitations(Instant::now()), 0);
    let closed = c.expire_invitations(Instant::now() + Duration::from_secs(61));
    assert_eq!(closed, 2);
    assert_eq!(c.mode(), Mode::Idle);
    assert!(c.ledger().is_empty());
}

#[test]
fn disabled_ttl_never_expires() {
    let mut c = coordinator(7).with_invite_ttl(None);
    c.send_invite(42).unwrap();
    assert_eq!(
        c.expire_invitations(Instant::now() + Duration::from_secs(3600)),
        0
    );
    assert_eq!(c.mode(), Mode::Hosting);
}
