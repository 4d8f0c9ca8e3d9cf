//! The client instance
//!
//! A [`Client`] owns everything one logical session needs: the correlation
//! table, the event router, the lifecycle controller over the identity store,
//! and the memoized service proxies. It never touches a socket itself; it
//! emits through a [`Transport`] and is fed [`TransportSignal`]s, in order, by
//! a single dispatch task.
//!
//! # Cloning
//!
//! `Client` is cheaply cloneable using `Arc` internally. All clones share the
//! same state, so calls can be made from any task.
//!
//! # Dispatch
//!
//! Inbound signals are handled one at a time, so lifecycle transitions and
//! response completion never interleave. Event handlers are invoked in arrival
//! order but run on their own tasks: a handler can await a call on this same
//! client, and a handler that panics does not stop dispatch.

use crate::backoff::BackoffStrategy;
use crate::client_builder::ClientOptions;
use crate::lifecycle::{LifecycleController, LinkState};
use crate::metrics::ClientMetrics;
use crate::request::CorrelationTable;
use crate::router::EventRouter;
use crate::service::{ServiceProxy, ServiceState};
use crate::transport::{Transport, TransportSignal};
use cnxlink_core::{codec, ConnectionId, Envelope, Error, InboundMessage, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Per-signal and per-call tracing: `info` with `debug` on, `debug` otherwise
macro_rules! chatty {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Connection-continuity RPC and pub/sub client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) table: CorrelationTable,
    pub(crate) router: EventRouter,
    pub(crate) lifecycle: LifecycleController,
    pub(crate) gate: Arc<dyn BackoffStrategy>,
    pub(crate) options: ClientOptions,
    pub(crate) services: Mutex<HashMap<String, Arc<ServiceState>>>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

/// Non-owning handle held by the dispatch task
#[derive(Clone)]
pub(crate) struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl Client {
    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Options this client was built with
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Proxy for the remote service `name`
    pub fn service(&self, name: &str) -> ServiceProxy {
        let state = {
            let mut services = self
                .inner
                .services
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(
                services
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(ServiceState::new(name))),
            )
        };
        ServiceProxy::new(self.clone(), state)
    }

    /// Set the handler for application events of type `kind`
    ///
    /// Replaces any previous handler for the same type.
    pub async fn on<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.router.on_app_event(kind, handler).await;
    }

    /// Run `callback` every time the link becomes live
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.inner.lifecycle.set_connection_callback(Arc::new(callback));
    }

    /// Run `callback` every time the link goes down
    pub fn set_disconnection_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.inner.lifecycle.set_disconnection_callback(Arc::new(callback));
    }

    /// The host is about to terminate: mark the stored identity as down
    pub fn unload(&self) -> Result<()> {
        self.inner.lifecycle.on_unload()
    }

    /// Current link state, from the identity store
    pub fn link_state(&self) -> Result<LinkState> {
        self.inner.lifecycle.state()
    }

    /// Wait, within the gate's budget, for the link to be live
    pub async fn wait_until_live(&self) -> Result<ConnectionId> {
        self.inner.lifecycle.wait_until_live(self.inner.gate.as_ref()).await
    }

    /// Number of calls waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.table.pending_count()
    }

    /// Fail every call still waiting for a response
    pub(crate) fn fail_pending(&self, error: Error) {
        let count = self.inner.table.pending_count();
        if count > 0 {
            tracing::warn!(count, error = %error, "Failing pending requests");
        }
        self.inner.table.fail_all(error);
    }

    /// Gate, send and await one remote call
    #[tracing::instrument(skip_all, fields(service = %service, action = %action))]
    pub(crate) async fn issue(
        &self,
        service: &str,
        action: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let inner = &self.inner;
        let start = Instant::now();

        let connection_id = inner.lifecycle.wait_until_live(inner.gate.as_ref()).await?;
        chatty!(
            inner.options.debug,
            connection_id = %connection_id,
            arg_count = args.len(),
            "Sending request"
        );

        let deadline = timeout.unwrap_or_else(|| inner.options.timeout());
        let outcome = inner
            .table
            .issue(inner.transport.as_ref(), service, action, args, deadline)
            .await;

        let duration = start.elapsed().as_secs_f64();
        let status = match &outcome {
            Ok(_) => "success",
            Err(Error::Remote(_)) => "remote_error",
            Err(Error::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        if let Some(ref m) = inner.metrics {
            m.record_request(service, action, status, duration);
            if outcome.is_err() {
                m.record_error(status);
            }
        }

        match &outcome {
            Ok(_) => chatty!(inner.options.debug, duration_secs = duration, "Request completed"),
            Err(e) => tracing::debug!(error = %e, duration_secs = duration, "Request failed"),
        }
        outcome
    }

    /// Process one signal from the transport
    ///
    /// Called by the dispatch task the builder spawns. Custom transports that
    /// run their own loop call it directly, one signal at a time.
    pub async fn handle_signal(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Inbound(envelope) => self.handle_envelope(envelope).await,
            TransportSignal::Disconnected { reason } => {
                chatty!(self.inner.options.debug, reason = %reason, "Transport disconnected");
                if let Err(e) = self.inner.lifecycle.on_disconnect(&reason) {
                    tracing::error!(error = %e, "Failed to record disconnect");
                    self.record_error("storage");
                }
            }
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        let inner = &self.inner;

        let message = match codec::interpret(envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed inbound event dropped");
                self.record_error("invalid_message");
                return;
            }
        };
        chatty!(inner.options.debug, event = message.event_name(), "Signal received");

        match message {
            InboundMessage::Connected(id) => {
                if let Err(e) = inner.lifecycle.on_connected(id, inner.transport.as_ref()) {
                    tracing::error!(connection_id = %id, error = %e, "Failed to reconcile connection");
                    self.record_error("lifecycle");
                }
            }
            InboundMessage::TransferAck(id) => {
                if let Err(e) = inner.lifecycle.on_transfer_ack(id) {
                    tracing::error!(connection_id = %id, error = %e, "Failed to record transfer ack");
                    self.record_error("lifecycle");
                }
            }
            InboundMessage::Response(response) => {
                let token = response.token.clone();
                if !inner.table.complete(response) {
                    tracing::debug!(token = %token, "Response for unknown or expired request dropped");
                    if let Some(ref m) = inner.metrics {
                        m.record_dropped_response();
                    }
                }
            }
            InboundMessage::ServiceEvent(event) => {
                let key = format!("{}/{}", event.name, event.action);
                if let Some(ref m) = inner.metrics {
                    m.record_event("service", &key);
                }
                if !inner.router.route_service_event(event).await {
                    tracing::debug!(key = %key, "No handler for service event, dropped");
                }
            }
            InboundMessage::AppEvent(event) => {
                let kind = event.kind.clone();
                if let Some(ref m) = inner.metrics {
                    m.record_event("app", &kind);
                }
                if !inner.router.route_app_event(event).await {
                    tracing::debug!(kind = %kind, "No handler for app event, dropped");
                }
            }
            InboundMessage::Other(envelope) => {
                tracing::debug!(event = %envelope.event, "Unknown event ignored");
            }
        }
    }

    fn record_error(&self, error_type: &str) {
        if let Some(ref m) = self.inner.metrics {
            m.record_error(error_type);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("pending_requests", &self.inner.table.pending_count())
            .finish()
    }
}
