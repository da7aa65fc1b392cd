//! Concrete [`Transport`](crate::Transport) implementations, each behind a
//! Cargo feature.
//!
//! | Feature               | Transport              |
//! |-----------------------|------------------------|
//! | `transport-websocket` | [`WebSocketTransport`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
