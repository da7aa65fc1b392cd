//! Glue between the coordinator and the shared platform socket.
//!
//! Outbound, the coordinator writes serialized envelopes into an
//! [`EnvelopeSink`]. Inbound, [`route`] separates matchmaking envelopes
//! from the chat and presence traffic that shares the socket.

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::error::{MatchmakingError, Result};
use crate::protocol::{InboundEnvelope, SERVICE};

/// Destination for serialized outbound envelopes.
///
/// A send must not wait for any reply. Sinks that cannot deliver return
/// [`MatchmakingError::TransportUnavailable`]; the coordinator then leaves
/// its state untouched.
pub trait EnvelopeSink {
    /// Queue one JSON text frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::TransportUnavailable`] if the channel is
    /// not open.
    fn send(&mut self, text: String) -> Result<()>;
}

/// Records frames in order. Always open.
impl EnvelopeSink for Vec<String> {
    fn send(&mut self, text: String) -> Result<()> {
        self.push(text);
        Ok(())
    }
}

impl<S: EnvelopeSink + ?Sized> EnvelopeSink for &mut S {
    fn send(&mut self, text: String) -> Result<()> {
        (**self).send(text)
    }
}

/// A buffering sink that can be closed.
///
/// The transport loop drains it into the real transport after each step;
/// once the transport is gone it is closed so commands fail instead of
/// queueing frames nobody will send.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<String>,
    closed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn set_open(&mut self, open: bool) {
        self.closed = !open;
        if self.closed {
            self.queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take every queued frame in send order.
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.queue.drain(..)
    }
}

impl EnvelopeSink for Outbox {
    fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(MatchmakingError::TransportUnavailable);
        }
        self.queue.push_back(text);
        Ok(())
    }
}

/// An inbound frame after routing.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Traffic for this subsystem.
    Matchmaking(InboundEnvelope),
    /// Traffic for another service, handed back verbatim.
    Foreign { service: String, raw: String },
}

#[derive(Deserialize)]
struct RoutingProbe {
    #[serde(default)]
    header: Option<Value>,
}

/// Classify one inbound text frame.
///
/// Frames without a header are taken as matchmaking traffic. Frames whose
/// `header.service` is anything other than `"mmaking"` are foreign and are
/// returned untouched.
///
/// # Errors
///
/// Returns [`MatchmakingError::MalformedEnvelope`] when the frame is not a
/// JSON object, its header has no `service` string, or a matchmaking
/// envelope has no decodable body.
pub fn route(text: &str) -> Result<Routed> {
    let probe: RoutingProbe = serde_json::from_str(text)
        .map_err(|e| MatchmakingError::MalformedEnvelope(format!("not an envelope: {e}")))?;

    if let Some(header) = &probe.header {
        let service = header
            .get("service")
            .and_then(Value::as_str)
            .ok_or_else(|| MatchmakingError::MalformedEnvelope("header has no service".into()))?;
        if service != SERVICE {
            trace!(service = %service, "routing foreign envelope");
            return Ok(Routed::Foreign {
                service: service.to_string(),
                raw: text.to_string(),
            });
        }
    }

    let envelope: InboundEnvelope = serde_json::from_str(text)
        .map_err(|e| MatchmakingError::MalformedEnvelope(format!("bad matchmaking body: {e}")))?;
    Ok(Routed::Matchmaking(envelope))
}
