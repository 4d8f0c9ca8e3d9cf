//! Common test utilities for cnxlink-client integration tests
//!
//! Two ways to put a client under test:
//!
//! - [`Harness`]: in-process. The client emits into a channel the test reads,
//!   and the test feeds signals straight into `handle_signal`. Deterministic,
//!   works with a paused clock.
//! - [`MockWsServer`]: a real WebSocket server speaking the envelope format.
//!   It greets every connection with `connected <n>` and can drop all
//!   connections on demand to exercise the reconnect path.

#![allow(dead_code)]

use cnxlink_client::{
    ChannelTransport, Client, ClientBuilder, MemoryIdentityStore, ReconcileMode, TransportSignal,
};
use cnxlink_core::{codec, ConnectionId, Envelope};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub fn id(raw: i64) -> ConnectionId {
    ConnectionId::new(raw).unwrap()
}

/// In-process client plus the envelopes it emits
pub struct Harness {
    pub client: Client,
    pub store: Arc<MemoryIdentityStore>,
    outgoing: mpsc::UnboundedReceiver<Envelope>,
}

impl Harness {
    /// Client with an empty identity store
    pub fn new() -> Self {
        Self::with_builder(None, ClientBuilder::new())
    }

    /// Client whose store already holds `stored`
    pub fn with_stored(stored: i64, mode: ReconcileMode) -> Self {
        Self::with_builder(Some(stored), ClientBuilder::new().reconcile(mode))
    }

    /// Client from a customized builder
    pub fn with_builder(stored: Option<i64>, builder: ClientBuilder) -> Self {
        let store = Arc::new(match stored {
            Some(raw) => MemoryIdentityStore::with_identity(id(raw)),
            None => MemoryIdentityStore::new(),
        });
        let (transport, outgoing) = ChannelTransport::new();
        let client = builder
            .with_identity_store(store.clone())
            .build(Arc::new(transport))
            .unwrap();

        Self { client, store, outgoing }
    }

    /// Feed one named event to the client
    pub async fn deliver(&self, event: &str, data: Value) {
        self.client
            .handle_signal(TransportSignal::Inbound(Envelope {
                event: event.to_string(),
                data,
            }))
            .await;
    }

    pub async fn connect(&self, raw: i64) {
        self.deliver("connected", json!(raw)).await;
    }

    pub async fn disconnect(&self) {
        self.client
            .handle_signal(TransportSignal::disconnected("transport close"))
            .await;
    }

    /// Answer a request with a result
    pub async fn respond(&self, uid: &str, result: Value) {
        self.deliver("client-response", json!({"uid": uid, "result": result}))
            .await;
    }

    /// Answer a request with an error
    pub async fn reject(&self, uid: &str, error: Value) {
        self.deliver("client-response", json!({"uid": uid, "error": error}))
            .await;
    }

    /// Next envelope the client emitted
    pub async fn next_outgoing(&mut self) -> Envelope {
        self.outgoing.recv().await.expect("transport channel closed")
    }

    /// An envelope emitted so far, if any
    pub fn try_outgoing(&mut self) -> Option<Envelope> {
        self.outgoing.try_recv().ok()
    }

    /// Stop accepting emits, as a dead transport would
    pub fn close_transport(&mut self) {
        self.outgoing.close();
    }

    pub fn stored(&self) -> Option<ConnectionId> {
        use cnxlink_client::IdentityStore;
        self.store.get().unwrap()
    }
}

/// Client fed by its own dispatch task, as a real transport would drive it
///
/// Returns the client, the sender for its signal stream, and the envelopes it
/// emits.
pub fn attached() -> (
    Client,
    mpsc::UnboundedSender<TransportSignal>,
    mpsc::UnboundedReceiver<Envelope>,
) {
    let (transport, outgoing) = ChannelTransport::new();
    let (signals, rx) = mpsc::unbounded_channel();
    let client = ClientBuilder::new().attach(Arc::new(transport), rx).unwrap();
    (client, signals, outgoing)
}

/// An inbound named event
pub fn inbound(event: &str, data: Value) -> TransportSignal {
    TransportSignal::Inbound(Envelope {
        event: event.to_string(),
        data,
    })
}

/// Uid of an emitted `client-request`
pub fn uid_of(envelope: &Envelope) -> String {
    envelope.data["uid"].as_str().unwrap().to_string()
}

/// Builds a server reply to a received envelope
pub type ReplyFn = Arc<dyn Fn(Envelope) -> Option<Envelope> + Send + Sync>;

/// Mock WebSocket server speaking the envelope format
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    received: mpsc::UnboundedReceiver<Envelope>,
}

impl MockWsServer {
    /// Server answering every `client-request` by echoing its first argument
    pub async fn new() -> Self {
        Self::with_handler(Arc::new(|envelope: Envelope| {
            (envelope.event == "client-request").then(|| echo_first_arg(&envelope))
        }))
        .await
    }

    /// Server replying through `handler`; connections get ids 1, 2, 3, ...
    pub async fn with_handler(handler: ReplyFn) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(4);
        let (received_tx, received) = mpsc::unbounded_channel();
        let next_id = Arc::new(AtomicI64::new(1));

        let kick = kick_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let handler = Arc::clone(&handler);
                        let received_tx = received_tx.clone();
                        let mut kick_rx = kick.subscribe();
                        let connection_id = next_id.fetch_add(1, Ordering::SeqCst);

                        tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws_stream.split();

                            let greeting = codec::encode("connected", &connection_id).unwrap();
                            if write.send(Message::Text(greeting)).await.is_err() {
                                return;
                            }

                            loop {
                                tokio::select! {
                                    _ = kick_rx.recv() => {
                                        let _ = write.send(Message::Close(None)).await;
                                        break;
                                    }
                                    message = read.next() => match message {
                                        Some(Ok(Message::Text(text))) => {
                                            let Ok(envelope) = codec::decode_envelope(&text) else { continue };
                                            let _ = received_tx.send(envelope.clone());
                                            if let Some(reply) = handler(envelope) {
                                                let frame = codec::encode_envelope(&reply).unwrap();
                                                if write.send(Message::Text(frame)).await.is_err() {
                                                    break;
                                                }
                                            }
                                        }
                                        Some(Ok(_)) => {}
                                        _ => break,
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            received,
        }
    }

    /// WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next envelope any connection sent, within five seconds
    pub async fn wait_for_message(&mut self) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next envelope named `event`, skipping others
    pub async fn wait_for_event(&mut self, event: &str) -> Option<Envelope> {
        loop {
            let envelope = self.wait_for_message().await?;
            if envelope.event == event {
                return Some(envelope);
            }
        }
    }

    /// Close every open connection from the server side
    pub fn kick_all(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// `client-response` resolving a request with its first argument
pub fn echo_first_arg(request: &Envelope) -> Envelope {
    let uid = request.data["uid"].clone();
    let first = request.data["args"][0].clone();
    Envelope::new("client-response", &json!({"uid": uid, "result": first})).unwrap()
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
