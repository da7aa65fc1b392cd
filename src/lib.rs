//! # mmaking-client
//!
//! Client-side matchmaking for a real-time two-player game platform:
//! direct invitations between friends, random and tournament queues, and
//! the tournament bracket, kept consistent with an authoritative server over
//! a socket shared with chat and presence traffic.
//!
//! ## Layers
//!
//! - [`Coordinator`] is a synchronous state machine. It validates local
//!   commands, writes outbound envelopes to an [`EnvelopeSink`], discards
//!   stale server events, and reports every change to a [`Presenter`].
//! - [`MatchmakingClient`] (feature `tokio-runtime`) runs a coordinator on a
//!   background task over any [`Transport`], sweeping expired invitations
//!   and forwarding other services' frames untouched.
//! - [`WebSocketTransport`] (feature `transport-websocket`, default) is the
//!   stock transport.
//!
//! ## Driving the coordinator directly
//!
//! ```
//! use mmaking_client::{Coordinator, MatchmakingEvent, Mode};
//!
//! let mut coordinator = Coordinator::new(7, Vec::<String>::new(), Vec::<MatchmakingEvent>::new());
//! coordinator.send_invite(42)?;
//! assert_eq!(
//!     coordinator.sink()[0],
//!     r#"{"header":{"service":"mmaking","dest":"back","id":7},"body":{"type_game":{"invite":{"guest_id":42}}}}"#
//! );
//!
//! coordinator.dispatch_text(r#"{"body":{"invite":{"guest_id":42,"accept":true}}}"#);
//! coordinator.request_start(42)?;
//! coordinator.dispatch_text(r#"{"body":{"status":"ingame","id_game":555}}"#);
//! assert_eq!(coordinator.mode(), Mode::InGame);
//! # Ok::<(), mmaking_client::MatchmakingError>(())
//! ```

pub mod adapter;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod ledger;
pub mod protocol;
pub mod queue;
pub mod reason;
pub mod session;
pub mod transport;

#[cfg(feature = "tokio-runtime")]
pub mod client;

pub mod transports;

pub use adapter::{EnvelopeSink, Outbox, Routed};
pub use coordinator::{Coordinator, Dispatch, LocalCommand};
pub use error::{MatchmakingError, Result};
pub use event::{ChannelPresenter, MatchmakingEvent, Presenter};
pub use ledger::{InvitationLedger, InvitationRecord, InviteState};
pub use protocol::{FriendId, GameId, GameKind, QueueKind, UserId};
pub use queue::{Bracket, Match, Participant, QueueTracker, Round};
pub use reason::StaleReason;
pub use session::{Mode, SessionSnapshot, SessionState};
pub use transport::Transport;

#[cfg(feature = "tokio-runtime")]
pub use client::{MatchmakingClient, MatchmakingConfig};

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
