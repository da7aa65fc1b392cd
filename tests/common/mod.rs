#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for matchmaking integration tests.
//!
//! Provides a [`MockTransport`] fed either from a script or live from the
//! test, a synchronous coordinator harness, and builders for the JSON
//! frames the matchmaking service pushes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use mmaking_client::protocol::{InboundEnvelope, ServerBody};
use mmaking_client::{
    Coordinator, Dispatch, MatchmakingError, MatchmakingEvent, Transport, UserId,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

type Incoming = Option<Result<String, MatchmakingError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// Mock transport for driving a `MatchmakingClient`.
///
/// Scripted frames are delivered first, in order; after that `recv` waits
/// on frames pushed through a [`ServerHandle`]. A `None` entry closes the
/// connection cleanly.
pub struct MockTransport {
    scripted: VecDeque<Incoming>,
    live: mpsc::UnboundedReceiver<Incoming>,
    /// Frames written by the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

/// Test-side handle feeding a [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Incoming>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport that replays `scripted`, then waits on the handle.
    pub fn new(scripted: Vec<Incoming>) -> (Self, ServerHandle) {
        let (tx, live) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            scripted: VecDeque::from(scripted),
            live,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { tx, sent, closed })
    }
}

impl ServerHandle {
    /// Deliver one frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.tx.send(Some(Ok(frame.into()))).unwrap();
    }

    /// Fail the next receive.
    pub fn fail(&self, error: MatchmakingError) {
        self.tx.send(Some(Err(error))).unwrap();
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        self.tx.send(None).unwrap();
    }

    /// Bodies of every frame the client sent so far.
    pub fn sent_bodies(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| body_of(frame))
            .collect()
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), MatchmakingError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, MatchmakingError>> {
        if let Some(item) = self.scripted.pop_front() {
            return item;
        }
        match self.live.recv().await {
            Some(item) => item,
            // Handle dropped: stay open until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), MatchmakingError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for(
    events: &mut mpsc::Receiver<MatchmakingEvent>,
    pred: impl Fn(&MatchmakingEvent) -> bool,
) -> MatchmakingEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ── Coordinator harness ─────────────────────────────────────────────

pub type TestCoordinator = Coordinator<Vec<String>, Vec<MatchmakingEvent>>;

/// A coordinator recording frames and events in vectors.
pub fn coordinator(user_id: UserId) -> TestCoordinator {
    Coordinator::new(user_id, Vec::new(), Vec::new())
}

/// Dispatch a headerless matchmaking body.
pub fn push(coordinator: &mut TestCoordinator, body: Value) -> Dispatch {
    let body: ServerBody = serde_json::from_value(body).expect("server body");
    coordinator.dispatch(InboundEnvelope { header: None, body })
}

/// Bodies of every frame the coordinator sent so far.
pub fn sent_bodies(coordinator: &TestCoordinator) -> Vec<Value> {
    coordinator.sink().iter().map(|frame| body_of(frame)).collect()
}

/// Take the recorded events, leaving the recorder empty.
pub fn take_events(coordinator: &mut TestCoordinator) -> Vec<MatchmakingEvent> {
    std::mem::take(coordinator.presenter_mut())
}

pub fn launch_count(events: &[MatchmakingEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, MatchmakingEvent::LaunchGame { .. }))
        .count()
}

// ── JSON builders ───────────────────────────────────────────────────

/// Parse a frame and return its body.
pub fn body_of(frame: &str) -> Value {
    let value: Value = serde_json::from_str(frame).expect("frame is JSON");
    value["body"].clone()
}

/// A matchmaking push addressed to `to`.
pub fn mmaking_frame(to: UserId, body: Value) -> String {
    json!({
        "header": {"service": "mmaking", "dest": "front", "id": to},
        "body": body,
    })
    .to_string()
}

/// A chat frame, which shares the socket with matchmaking.
pub fn chat_frame(to: UserId, message: &str) -> String {
    json!({
        "header": {"service": "chat", "dest": "front", "id": to},
        "body": {"message": message, "sender": 3},
    })
    .to_string()
}

pub fn offer_body(host: UserId, username: &str) -> Value {
    json!({"invite": {"host_id": host, "username": username, "accept": null}, "cancel": false})
}

pub fn response_body(guest: UserId, accept: bool) -> Value {
    json!({"invite": {"guest_id": guest, "accept": accept}, "cancel": false})
}

pub fn host_ready_body(host: UserId) -> Value {
    json!({"invite": {"host_id": host, "accept": true}, "cancel": false})
}

pub fn cancel_from_host_body(host: UserId) -> Value {
    json!({"invite": {"host_id": host}, "cancel": true})
}

pub fn cancel_from_guest_body(guest: UserId) -> Value {
    json!({"invite": {"guest_id": guest, "salon": false}, "cancel": true})
}

pub fn ingame_body(game_id: u64) -> Value {
    json!({"status": "ingame", "id_game": game_id})
}

pub fn tournament_ingame_body(game_id: u64, opponents: Value) -> Value {
    json!({
        "status": "ingame",
        "id_game": game_id,
        "tournament": true,
        "cancel": false,
        "opponents": opponents,
    })
}

pub fn winner_body(winner: UserId, opponents: Value) -> Value {
    json!({"cancel": false, "tournament": true, "winnerId": winner, "opponents": opponents})
}

/// End-of-tournament push: an `ingame` status with no game, the final
/// bracket and the winner.
pub fn end_tournament_body(winner: UserId, opponents: Value) -> Value {
    json!({
        "status": "ingame",
        "id_game": null,
        "tournament": true,
        "cancel": false,
        "opponents": opponents,
        "winnerId": winner,
    })
}

/// Sent to a player knocked out of the tournament.
pub fn eliminated_body() -> Value {
    json!({"tournament": false, "cancel": true})
}

/// A one-salon bracket: `a` against `b` in `round`.
pub fn salon(round: u32, a: (UserId, Option<u32>), b: (UserId, Option<u32>)) -> Value {
    let player = |(id, score): (UserId, Option<u32>)| {
        json!({"user_id": id, "username": format!("user{id}"), "type_game": "tournament", "score": score})
    };
    let mut salon = serde_json::Map::new();
    salon.insert(a.0.to_string(), player(a));
    salon.insert(b.0.to_string(), player(b));
    salon.insert("round".into(), json!(round));
    Value::Object(salon)
}

/// Four-player bracket after round one: 1 beat 2, 4 beat 3; 1 meets 4.
pub fn four_player_bracket() -> Value {
    json!({
        "1": salon(1, (1, Some(5)), (2, Some(2))),
        "2": salon(1, (3, Some(1)), (4, Some(5))),
        "3": salon(2, (1, None), (4, None)),
    })
}
