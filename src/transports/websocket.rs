//! WebSocket transport over `tokio-tungstenite`.
//!
//! The platform socket is a plain WebSocket carrying one JSON envelope per
//! text frame. `ws://` and `wss://` URLs both work; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), mmaking_client::MatchmakingError> {
//! use mmaking_client::{Transport, WebSocketTransport};
//!
//! let mut socket = WebSocketTransport::connect("ws://localhost:8000/ws/main/").await?;
//! socket
//!     .send(r#"{"header":{"service":"mmaking","dest":"back","id":7},"body":{"type_game":"1vs1R","status":"online"}}"#.to_string())
//!     .await?;
//! socket.close().await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::error::MatchmakingError;
use crate::transport::Transport;

/// The underlying WebSocket stream, for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// Control frames are answered by tungstenite itself and never surface;
/// binary frames are skipped since the platform only speaks text.
///
/// [`recv`](Transport::recv) is cancel-safe.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to the platform socket at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::Io`] if the URL is invalid or the
    /// handshake fails. I/O error kinds are preserved; anything else maps
    /// to [`io::ErrorKind::Other`].
    pub async fn connect(url: &str) -> Result<Self, MatchmakingError> {
        debug!(url = %url, "connecting platform socket");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(handshake_error)?;
        info!(url = %url, "platform socket connected");
        Ok(Self::from_stream(stream))
    }

    /// Like [`connect`](Self::connect), failing with
    /// [`MatchmakingError::Timeout`] after `timeout`.
    ///
    /// # Errors
    ///
    /// [`MatchmakingError::Timeout`] or any error of [`connect`](Self::connect).
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, MatchmakingError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| MatchmakingError::Timeout)?
    }

    /// Wrap a stream connected by the caller (custom TLS, headers, proxy).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

fn handshake_error(e: WsError) -> MatchmakingError {
    let kind = match &e {
        WsError::Io(io) => io.kind(),
        _ => io::ErrorKind::Other,
    };
    MatchmakingError::Io(io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), MatchmakingError> {
        if self.closed {
            return Err(MatchmakingError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| MatchmakingError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, MatchmakingError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(close)) => {
                    debug!(?close, "platform socket closed by peer");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    warn!(len = bytes.len(), "skipping binary frame on platform socket");
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(MatchmakingError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), MatchmakingError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(MatchmakingError::TransportSend(e.to_string())),
        }
    }
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
    use tokio::net::TcpListener;

    type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Serve one connection with `handler` and return its URL.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}")
    }

    #[test]
    fn transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn invalid_url_is_io_error() {
        let err = WebSocketTransport::connect("not a url").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::Io(_)));
    }

    #[tokio::test]
    async fn unroutable_host_times_out() {
        let err =
            WebSocketTransport::connect_with_timeout("ws://192.0.2.1:1", Duration::from_millis(50))
                .await
                .unwrap_err();
        assert!(matches!(err, MatchmakingError::Timeout));
    }

    #[tokio::test]
    async fn text_frames_pass_and_binary_frames_are_skipped() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"header":{"service":"chat","dest":"front","id":7},"body":{}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert!(frame.contains("\"chat\""));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn sent_envelope_reaches_server() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = tx.send(text.to_string());
            }
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"body":{"type_game":"1vs1R"}}"#.to_string())
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"body":{"type_game":"1vs1R"}}"#);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected_and_close_is_idempotent() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, MatchmakingError::TransportClosed));
    }
}
