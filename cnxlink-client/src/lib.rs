//! Connection-continuity RPC and pub/sub client
//!
//! Call named actions on remote services as async functions, receive pushed
//! events, and keep one logical session alive across transport reconnects.
//!
//! # Core Features
//!
//! - **Remote calls**: `client.service("User").call("create", args)`, matched
//!   to responses by a random correlation token, bounded by a deadline
//! - **Pushed events**: per-service events and application-wide events, one
//!   handler per key
//! - **Connection continuity**: the signed connection identity is persisted;
//!   after a reconnect the client asks the server to transfer session state
//!   from the old identity to the new one
//! - **Gating**: calls made while the link is down wait for it to come back,
//!   or fail with [`cnxlink_core::Error::ReconnectionTimeout`] without being
//!   sent
//! - **Transports**: a reconnecting WebSocket transport, or any transport
//!   behind the [`Transport`] seam
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cnxlink_client::ClientBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new().connect("ws://localhost:8080").await?;
//!
//!     let user = client.service("User");
//!     let created = user.call("create", vec![json!({"data": {"name": "chris"}})]).await?;
//!     println!("Created: {}", created);
//!
//!     user.on("created", |value| async move {
//!         println!("User created elsewhere: {}", value);
//!     })
//!     .await;
//!
//!     client.on("maintenance", |value| async move {
//!         println!("Maintenance: {}", value);
//!     })
//!     .await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Custom Transport
//!
//! ```rust
//! use cnxlink_client::{ChannelTransport, ClientBuilder, TransportSignal};
//! use cnxlink_core::Envelope;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cnxlink_core::Result<()> {
//! let (transport, _outgoing) = ChannelTransport::new();
//! let client = ClientBuilder::new().build(Arc::new(transport))?;
//!
//! client
//!     .handle_signal(TransportSignal::Inbound(Envelope::new("connected", &json!(7))?))
//!     .await;
//! assert!(client.link_state()?.is_live());
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod client_builder;
mod connection_state;
mod identity;
mod lifecycle;
mod metrics;
mod request;
mod router;
mod service;
mod transport;
mod websocket;

pub use backoff::{BackoffStrategy, ExponentialBackoff, FixedDelay, NoRetry};
pub use client::Client;
pub use client_builder::{default_gate, ClientBuilder, ClientOptions, DEFAULT_TIMEOUT_MS};
pub use connection_state::{ConnectionManager, ConnectionState};
pub use identity::{IdentityStore, MemoryIdentityStore, SledIdentityStore, IDENTITY_SLOT};
pub use lifecycle::{LifecycleController, LinkCallback, LinkState, ReconcileMode};
pub use metrics::ClientMetrics;
pub use request::{generate_token, CorrelationTable, TOKEN_LEN};
pub use router::{EventHandlerFn, EventRouter};
pub use service::{to_arg, RemoteAction, ServiceProxy};
pub use transport::{ChannelTransport, Transport, TransportSignal};
pub use websocket::WebSocketTransport;

pub use cnxlink_core::{Error, Result};
