//! The transport seam
//!
//! The client does not own a socket. It talks to whatever carries its named
//! events through two narrow interfaces:
//!
//! - outgoing: [`Transport::emit`] hands one named event to the transport
//! - incoming: the transport produces [`TransportSignal`]s which are fed, in
//!   order, to [`Client::handle_signal`](crate::Client::handle_signal)
//!
//! The transport is expected to deliver each event at least once while
//! connected. Nothing is promised across a reconnection; the lifecycle
//! controller deals with that.
//!
//! [`ChannelTransport`] is the in-process implementation: outgoing envelopes
//! land on an mpsc channel. It backs the tests and suits embedding the client
//! behind a transport the application already runs.
//! [`WebSocketTransport`](crate::WebSocketTransport) is the networked one.

use cnxlink_core::{Envelope, Error, Result};
use tokio::sync::mpsc;

/// Outgoing side of a transport
pub trait Transport: Send + Sync {
    /// Queue one named event for delivery
    ///
    /// Must not block. An error means the event will not be delivered.
    fn emit(&self, envelope: Envelope) -> Result<()>;
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// A named event arrived
    Inbound(Envelope),
    /// The underlying connection dropped
    Disconnected {
        /// Human-readable cause, informational only
        reason: String,
    },
}

impl TransportSignal {
    /// Shorthand for [`TransportSignal::Disconnected`]
    pub fn disconnected(reason: impl Into<String>) -> Self {
        TransportSignal::Disconnected { reason: reason.into() }
    }
}

/// In-process transport over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    /// Transport plus the receiver its emitted envelopes arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        (Self { outgoing }, rx)
    }
}

impl Transport for ChannelTransport {
    fn emit(&self, envelope: Envelope) -> Result<()> {
        self.outgoing.send(envelope).map_err(|_| Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_transport_delivers() {
        let (transport, mut rx) = ChannelTransport::new();
        transport
            .emit(Envelope::new("client-request", &json!({"uid": "a"})).unwrap())
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, "client-request");
        assert_eq!(envelope.data, json!({"uid": "a"}));
    }

    #[test]
    fn test_channel_transport_closed() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);

        let result = transport.emit(Envelope::new("x", &json!(null)).unwrap());
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
