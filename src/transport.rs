//! Transport abstraction for the shared platform socket.
//!
//! The [`Transport`] trait is a bidirectional text channel carrying JSON
//! envelopes. The same channel also carries chat and presence traffic, so
//! the client never assumes it owns it: it tags every envelope it sends
//! with the `mmaking` service key and hands every frame for another
//! service back to the caller.
//!
//! # Connection Setup
//!
//! Opening the socket (URL, authentication cookies, ...) is not part of the
//! trait. Connect a transport externally, then pass it to
//! `MatchmakingClient::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use mmaking_client::error::MatchmakingError;
//! use mmaking_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), MatchmakingError> {
//!         // Write one JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, MatchmakingError>> {
//!         // Read the next JSON text frame, None once the socket closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), MatchmakingError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::MatchmakingError;

/// A bidirectional text frame transport.
///
/// Each call to [`send`](Transport::send) writes one complete JSON envelope
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the client polls it
/// inside `tokio::select!` next to local commands and the expiry timer.
/// Channel-based implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::TransportSend`] if the frame could not be
    /// written.
    async fn send(&mut self, message: String) -> Result<(), MatchmakingError>;

    /// Receive the next JSON text frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame arrived
    /// - `Some(Err(e))`: the transport failed
    /// - `None`: the peer closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, MatchmakingError>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// either way.
    async fn close(&mut self) -> Result<(), MatchmakingError>;
}
