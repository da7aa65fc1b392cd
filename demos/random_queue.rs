//! # Random Queue
//!
//! Connects to the platform socket, joins the random 1v1 queue, and waits
//! for a match. Ctrl+C leaves the queue before exiting.
//!
//! ## Running
//!
//! ```sh
//! MMAKING_URL=wss://localhost:8443/ws/main/ MMAKING_USER_ID=7 \
//!     cargo run --example random_queue
//! ```

use mmaking_client::{
    MatchmakingClient, MatchmakingConfig, MatchmakingEvent, QueueKind, WebSocketTransport,
};

/// Default socket URL when `MMAKING_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8000/ws/main/";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set `RUST_LOG=debug` for every frame.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("MMAKING_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let user_id: u64 = std::env::var("MMAKING_USER_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()?;
    tracing::info!(user_id, "connecting to {url}");

    let transport = WebSocketTransport::connect(&url).await?;
    let (mut client, mut events, mut foreign) =
        MatchmakingClient::start(transport, MatchmakingConfig::new(user_id));

    client.join_queue(QueueKind::Random).await?;
    tracing::info!("waiting for an opponent, Ctrl+C to leave the queue");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    MatchmakingEvent::LaunchGame { game_id, opponents } => {
                        let names: Vec<&str> =
                            opponents.iter().map(|p| p.username.as_str()).collect();
                        tracing::info!(game_id, "matched against {names:?}");
                        client.report_game_socket(true).await?;
                        break;
                    }
                    MatchmakingEvent::Disconnected { reason } => {
                        tracing::warn!("disconnected: {}", reason.as_deref().unwrap_or("clean"));
                        break;
                    }
                    other => tracing::debug!("{other:?}"),
                }
            }

            frame = foreign.recv() => {
                if let Some(frame) = frame {
                    tracing::debug!("other service: {frame}");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("leaving the queue");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
