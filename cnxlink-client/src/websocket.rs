//! WebSocket transport
//!
//! Carries named events as JSON text frames `{"event": ..., "data": ...}`
//! over tokio-tungstenite. One background task owns the socket: it writes
//! whatever [`Transport::emit`] queued and turns incoming frames into
//! [`TransportSignal::Inbound`].
//!
//! When the socket drops the task reports [`TransportSignal::Disconnected`],
//! discards frames queued for the dead socket, and redials according to its
//! [`BackoffStrategy`]. A fresh socket brings a fresh `connected` event from
//! the server, which the lifecycle controller reconciles. When the strategy
//! gives up the task ends, the signal stream closes, and further emits fail
//! with [`Error::ConnectionClosed`].

use crate::backoff::BackoffStrategy;
use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::transport::{Transport, TransportSignal};
use cnxlink_core::{codec, Envelope, Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a self-healing WebSocket
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Envelope>,
    manager: Arc<ConnectionManager>,
}

impl WebSocketTransport {
    /// Dial `url`; returns the transport and its signal stream
    ///
    /// The first dial is not retried: failing to reach the server at all is
    /// reported as [`Error::WebSocket`].
    #[tracing::instrument(skip(redial))]
    pub async fn connect(
        url: &str,
        redial: Arc<dyn BackoffStrategy>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportSignal>)> {
        let manager = Arc::new(ConnectionManager::new(url, redial));
        manager.connecting().await;

        tracing::info!("Connecting to server");
        let ws = match connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                manager.disconnected().await;
                return Err(Error::WebSocket(e.to_string()));
            }
        };
        manager.connected().await;
        tracing::info!("Connected successfully");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(ws, outgoing_rx, signals, Arc::clone(&manager)));

        Ok((Self { outgoing, manager }, signals_rx))
    }

    /// Current socket state
    pub async fn state(&self) -> ConnectionState {
        self.manager.state().await
    }

    /// Endpoint this transport dials
    pub fn url(&self) -> &str {
        self.manager.url()
    }
}

impl Transport for WebSocketTransport {
    fn emit(&self, envelope: Envelope) -> Result<()> {
        self.outgoing.send(envelope).map_err(|_| Error::ConnectionClosed)
    }
}

enum SessionEnd {
    /// The socket failed or the server closed it
    Dropped(String),
    /// Our side went away
    Shutdown,
}

async fn run(
    mut ws: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Envelope>,
    signals: mpsc::UnboundedSender<TransportSignal>,
    manager: Arc<ConnectionManager>,
) {
    loop {
        let reason = match drive(ws, &mut outgoing, &signals).await {
            SessionEnd::Shutdown => {
                manager.disconnected().await;
                tracing::debug!("WebSocket transport shut down");
                return;
            }
            SessionEnd::Dropped(reason) => reason,
        };

        manager.disconnected().await;
        tracing::info!(reason = %reason, "Connection lost");
        if signals.send(TransportSignal::disconnected(reason)).is_err() {
            return;
        }
        discard_queued(&mut outgoing);

        manager.start_reconnecting().await;
        ws = match redial(&manager).await {
            Some(ws) => ws,
            None => return,
        };
        discard_queued(&mut outgoing);
    }
}

async fn drive(
    ws: WsStream,
    outgoing: &mut mpsc::UnboundedReceiver<Envelope>,
    signals: &mpsc::UnboundedSender<TransportSignal>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            envelope = outgoing.recv() => {
                let Some(envelope) = envelope else {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                };
                let text = match codec::encode_envelope(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(event = %envelope.event, error = %e, "Failed to encode outgoing event");
                        continue;
                    }
                };
                tracing::trace!(event = %envelope.event, "Sending frame");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    return SessionEnd::Dropped(e.to_string());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_envelope(&text) {
                    Ok(envelope) => {
                        tracing::trace!(event = %envelope.event, "Frame received");
                        if signals.send(TransportSignal::Inbound(envelope)).is_err() {
                            let _ = sink.close().await;
                            return SessionEnd::Shutdown;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Undecodable frame dropped"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".to_string()),
            }
        }
    }
}

async fn redial(manager: &ConnectionManager) -> Option<WsStream> {
    while let Some(delay) = manager.next_reconnect_delay().await {
        tracing::info!(delay_secs = delay.as_secs_f64(), "Reconnecting");
        tokio::time::sleep(delay).await;

        match connect_async(manager.url()).await {
            Ok((ws, _)) => {
                manager.connected().await;
                tracing::info!("Reconnected successfully");
                return Some(ws);
            }
            Err(e) => tracing::warn!(error = %e, "Reconnection failed"),
        }
    }

    tracing::error!("Reconnection abandoned (max attempts reached)");
    None
}

fn discard_queued(outgoing: &mut mpsc::UnboundedReceiver<Envelope>) {
    let mut dropped = 0usize;
    while outgoing.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "Discarded frames queued for a dead socket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::NoRetry;

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketTransport::connect(&format!("ws://{}", addr), Arc::new(NoRetry)).await;
        assert!(matches!(result, Err(Error::WebSocket(_))));
    }
}
