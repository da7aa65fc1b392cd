//! # Loopback Invitation
//!
//! Two clients negotiate a game through a small in-process relay that
//! plays the matchmaking service:
//!
//! 1. user 7 invites user 42
//! 2. user 42 accepts the offer
//! 3. user 7 asks to start, and the relay confirms game 555 to both
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example loopback_invite
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use mmaking_client::{
    InviteState, MatchmakingClient, MatchmakingConfig, MatchmakingError, MatchmakingEvent,
    Transport, UserId,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const HOST: UserId = 7;
const GUEST: UserId = 42;
const GAME_ID: u64 = 555;

// ── Loopback transport ──────────────────────────────────────────────

/// One client's end of the relay.
struct LoopbackTransport {
    user_id: UserId,
    to_relay: mpsc::UnboundedSender<(UserId, String)>,
    from_relay: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), MatchmakingError> {
        self.to_relay
            .send((self.user_id, message))
            .map_err(|e| MatchmakingError::TransportSend(e.to_string()))
    }

    /// Cancel-safe: `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, MatchmakingError>> {
        self.from_relay.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), MatchmakingError> {
        Ok(())
    }
}

// ── Relay ───────────────────────────────────────────────────────────

struct Relay {
    inbox: mpsc::UnboundedReceiver<(UserId, String)>,
    clients: HashMap<UserId, mpsc::UnboundedSender<String>>,
}

impl Relay {
    fn push(&self, to: UserId, body: Value) {
        let frame = json!({
            "header": {"service": "mmaking", "dest": "front", "id": to},
            "body": body,
        });
        if let Some(client) = self.clients.get(&to) {
            let _ = client.send(frame.to_string());
        }
    }

    async fn run(mut self) {
        while let Some((from, frame)) = self.inbox.recv().await {
            tracing::info!(from, "relay received {frame}");
            let Ok(envelope) = serde_json::from_str::<Value>(&frame) else {
                continue;
            };
            let Some(invite) = envelope.pointer("/body/type_game/invite") else {
                continue;
            };
            let field = |name: &str| invite.get(name);
            let accept = field("accept").and_then(Value::as_bool);

            if let Some(guest) = field("guest_id").and_then(Value::as_u64) {
                if field("startgame").and_then(Value::as_bool) == Some(true) {
                    for user in [from, guest] {
                        self.push(user, json!({"status": "ingame", "id_game": GAME_ID}));
                    }
                } else {
                    self.push(
                        guest,
                        json!({"invite": {"host_id": from, "username": format!("user{from}"), "accept": null}, "cancel": false}),
                    );
                    self.push(from, json!({"invite": {"guest_id": guest, "send": true}}));
                }
            } else if let (Some(host), Some(accept)) =
                (field("host_id").and_then(Value::as_u64), accept)
            {
                self.push(host, json!({"invite": {"guest_id": from, "accept": accept}}));
                if accept {
                    self.push(from, json!({"invite": {"host_id": host, "accept": true}}));
                }
            }
        }
    }
}

fn connect(
    user_id: UserId,
    to_relay: &mpsc::UnboundedSender<(UserId, String)>,
    clients: &mut HashMap<UserId, mpsc::UnboundedSender<String>>,
) -> LoopbackTransport {
    let (tx, from_relay) = mpsc::unbounded_channel();
    clients.insert(user_id, tx);
    LoopbackTransport {
        user_id,
        to_relay: to_relay.clone(),
        from_relay,
    }
}

/// Wait for the first event matching `pred`.
async fn wait_for(
    events: &mut mpsc::Receiver<MatchmakingEvent>,
    pred: impl Fn(&MatchmakingEvent) -> bool,
) -> Result<MatchmakingEvent, Box<dyn std::error::Error>> {
    while let Some(event) = events.recv().await {
        if pred(&event) {
            return Ok(event);
        }
    }
    Err("event channel closed".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (to_relay, inbox) = mpsc::unbounded_channel();
    let mut clients = HashMap::new();
    let host_transport = connect(HOST, &to_relay, &mut clients);
    let guest_transport = connect(GUEST, &to_relay, &mut clients);
    drop(to_relay);
    tokio::spawn(Relay { inbox, clients }.run());

    let (mut host, mut host_events, _) =
        MatchmakingClient::start(host_transport, MatchmakingConfig::new(HOST));
    let (mut guest, mut guest_events, _) =
        MatchmakingClient::start(guest_transport, MatchmakingConfig::new(GUEST));

    host.send_invite(GUEST).await?;

    wait_for(&mut guest_events, |event| {
        matches!(event, MatchmakingEvent::InvitationChanged { friend: HOST, record }
            if record.incoming == InviteState::Pending)
    })
    .await?;
    tracing::info!("guest received the offer, accepting");
    guest.accept_invite(HOST).await?;

    wait_for(&mut host_events, |event| {
        matches!(event, MatchmakingEvent::InvitationChanged { friend: GUEST, record }
            if record.outgoing == InviteState::Accepted)
    })
    .await?;
    tracing::info!("guest accepted, starting the game");
    host.request_start(GUEST).await?;

    for (name, events) in [("host", &mut host_events), ("guest", &mut guest_events)] {
        let launch = wait_for(events, |event| {
            matches!(event, MatchmakingEvent::LaunchGame { .. })
        })
        .await?;
        tracing::info!("{name}: {launch:?}");
    }

    host.shutdown().await;
    guest.shutdown().await;
    Ok(())
}
