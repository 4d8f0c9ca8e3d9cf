//! Client builder and options
//!
//! The `ClientBuilder` gathers everything a [`Client`] is constructed with:
//! - [`ClientOptions`]: debug tracing, default call timeout, reconcile mode
//! - the identity store (in-memory by default)
//! - the reconnection gate strategy (200 ms × 10 by default)
//! - the WebSocket redial strategy
//! - observability (OpenTelemetry)
//!
//! It then attaches the client to a transport: [`ClientBuilder::connect`]
//! dials a WebSocket, [`ClientBuilder::attach`] takes any transport plus its
//! signal stream, and [`ClientBuilder::build`] leaves feeding signals to the
//! caller.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cnxlink_client::{ClientBuilder, ReconcileMode, SledIdentityStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> cnxlink_core::Result<()> {
//! let client = ClientBuilder::new()
//!     .timeout(Duration::from_secs(10))
//!     .reconcile(ReconcileMode::AwaitAck)
//!     .with_identity_store(Arc::new(SledIdentityStore::open("./cnx-state")?))
//!     .connect("ws://localhost:8080")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::backoff::{BackoffStrategy, ExponentialBackoff, FixedDelay};
use crate::client::{Client, ClientInner};
use crate::identity::{IdentityStore, MemoryIdentityStore};
use crate::lifecycle::{LifecycleController, ReconcileMode};
use crate::metrics::ClientMetrics;
use crate::request::CorrelationTable;
use crate::router::EventRouter;
use crate::transport::{Transport, TransportSignal};
use crate::websocket::WebSocketTransport;
use cnxlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default deadline for a remote call, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Client options
///
/// Deserializable so they can live in the application's own config file:
///
/// ```rust
/// use cnxlink_client::{ClientOptions, ReconcileMode};
///
/// let options: ClientOptions = serde_json::from_str(r#"{"reconcile": "await_ack"}"#).unwrap();
/// assert_eq!(options.reconcile, ReconcileMode::AwaitAck);
/// assert_eq!(options.timeout_ms, 5000);
/// assert!(!options.debug);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Trace every signal and call at `info` instead of `debug`
    pub debug: bool,
    /// Default deadline for a remote call
    pub timeout_ms: u64,
    /// When a reconnect's identity is committed
    pub reconcile: ReconcileMode,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            debug: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reconcile: ReconcileMode::Immediate,
        }
    }
}

impl ClientOptions {
    /// Default call deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Default reconnection gate: poll every 200 ms, give up after 10 polls
pub fn default_gate() -> FixedDelay {
    FixedDelay::new(Duration::from_millis(200)).with_max_attempts(10)
}

/// Builder for configuring and creating a [`Client`]
pub struct ClientBuilder {
    options: ClientOptions,
    identity_store: Option<Arc<dyn IdentityStore>>,
    gate: Option<Arc<dyn BackoffStrategy>>,
    redial: Option<Arc<dyn BackoffStrategy>>,
    observability_config: Option<cnxlink_core::ObservabilityConfig>,
    service_name: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Builder with default options
    pub fn new() -> Self {
        Self {
            options: ClientOptions::default(),
            identity_store: None,
            gate: None,
            redial: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Replace all options at once
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Trace every signal and call at `info`
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Default deadline for remote calls
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// How a reconnect's new identity is committed
    pub fn reconcile(mut self, mode: ReconcileMode) -> Self {
        self.options.reconcile = mode;
        self
    }

    /// Where the connection identity is persisted
    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    /// How long calls wait for a downed link to come back
    pub fn with_gate(mut self, strategy: Arc<dyn BackoffStrategy>) -> Self {
        self.gate = Some(strategy);
        self
    }

    /// How the WebSocket transport redials after a drop
    pub fn with_reconnect(mut self, strategy: Arc<dyn BackoffStrategy>) -> Self {
        self.redial = Some(strategy);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: cnxlink_core::ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(cnxlink_core::ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build a client that emits through `transport`
    ///
    /// Nothing feeds it inbound signals; the caller drives
    /// [`Client::handle_signal`].
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Client> {
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            cnxlink_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;

            Some(Arc::new(ClientMetrics::new(config.service_name)))
        } else {
            None
        };

        let store = self
            .identity_store
            .unwrap_or_else(|| Arc::new(MemoryIdentityStore::new()));
        let mut lifecycle = LifecycleController::new(store, self.options.reconcile);
        lifecycle.recover_stale()?;
        if let Some(ref m) = metrics {
            lifecycle = lifecycle.with_metrics(Arc::clone(m));
            if let Ok(state) = lifecycle.state() {
                m.update_link_state(state.as_gauge());
            }
        }

        let gate = self.gate.unwrap_or_else(|| Arc::new(default_gate()));

        tracing::debug!(
            timeout_ms = self.options.timeout_ms,
            reconcile = ?self.options.reconcile,
            debug = self.options.debug,
            "Client built"
        );

        Ok(Client::from_inner(ClientInner {
            transport,
            table: CorrelationTable::new(),
            router: EventRouter::new(),
            lifecycle,
            gate,
            options: self.options,
            services: Mutex::new(HashMap::new()),
            metrics,
        }))
    }

    /// Build a client and spawn the task feeding it `signals`
    ///
    /// The task holds only a weak handle: it stops once every `Client` clone
    /// is dropped or the signal stream ends.
    pub fn attach(
        self,
        transport: Arc<dyn Transport>,
        signals: mpsc::UnboundedReceiver<TransportSignal>,
    ) -> Result<Client> {
        let client = self.build(transport)?;
        spawn_dispatch(&client, signals);
        Ok(client)
    }

    /// Dial `url` and attach a client to the WebSocket transport
    pub async fn connect(mut self, url: &str) -> Result<Client> {
        let redial = self
            .redial
            .take()
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::default()));

        let (transport, signals) = WebSocketTransport::connect(url, redial).await?;
        self.attach(Arc::new(transport), signals)
    }
}

fn spawn_dispatch(client: &Client, mut signals: mpsc::UnboundedReceiver<TransportSignal>) {
    let weak = client.downgrade();
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            let Some(client) = weak.upgrade() else {
                break;
            };
            client.handle_signal(signal).await;
        }
        if let Some(client) = weak.upgrade() {
            client.fail_pending(Error::ConnectionClosed);
        }
        tracing::debug!("Signal dispatch stopped");
    });
}
