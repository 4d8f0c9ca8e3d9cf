//! Routing of pushed events to their handler
//!
//! Two independent namespaces:
//!
//! - **Service events** (`service-event {name, action, result}`): keyed by
//!   event name, then service name. Registered through
//!   [`ServiceProxy::on`](crate::ServiceProxy::on).
//! - **Application events** (`app-event {type, value}`): keyed by event type.
//!   Registered through [`Client::on`](crate::Client::on).
//!
//! Each key has at most one handler. Registering again replaces the previous
//! handler; there is no unsubscribe. An event without a handler is dropped,
//! never buffered.
//!
//! Handlers are invoked on the dispatch task in arrival order, and the future
//! each returns is spawned. A handler may therefore await remote calls on the
//! same client. A handler that panics loses that one event; dispatch goes on.

use cnxlink_core::{AppEvent, ServiceEvent};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Type-erased event handler
pub type EventHandlerFn = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Event name → service name → handler
type ServiceHandlers = HashMap<String, HashMap<String, EventHandlerFn>>;

fn erase<F, Fut>(handler: F) -> EventHandlerFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |value| Box::pin(handler(value)))
}

/// Invoke `handler` now and run its future on its own task
fn start(handler: EventHandlerFn, value: Value, key: String) {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(value))) {
        Ok(future) => future,
        Err(_) => {
            tracing::warn!(handler = %key, "Event handler panicked; event dropped");
            return;
        }
    };

    tokio::spawn(async move {
        if AssertUnwindSafe(future).catch_unwind().await.is_err() {
            tracing::warn!(handler = %key, "Event handler panicked; event dropped");
        }
    });
}

/// Handler tables for service and application events
#[derive(Clone, Default)]
pub struct EventRouter {
    service_handlers: Arc<Mutex<ServiceHandlers>>,
    app_handlers: Arc<Mutex<HashMap<String, EventHandlerFn>>>,
}

impl EventRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler for `action` events from `service`
    pub async fn on_service_event<F, Fut>(&self, service: impl Into<String>, action: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.service_handlers
            .lock()
            .await
            .entry(action.into())
            .or_default()
            .insert(service.into(), erase(handler));
    }

    /// Set the handler for application events of type `kind`
    pub async fn on_app_event<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.app_handlers.lock().await.insert(kind.into(), erase(handler));
    }

    /// Deliver a service event; returns whether a handler was started
    pub async fn route_service_event(&self, event: ServiceEvent) -> bool {
        let handler = self
            .service_handlers
            .lock()
            .await
            .get(&event.action)
            .and_then(|by_service| by_service.get(&event.name))
            .cloned();

        match handler {
            Some(handler) => {
                start(handler, event.result, format!("{}.{}", event.name, event.action));
                true
            }
            None => false,
        }
    }

    /// Deliver an application event; returns whether a handler was started
    pub async fn route_app_event(&self, event: AppEvent) -> bool {
        let handler = self.app_handlers.lock().await.get(&event.kind).cloned();

        match handler {
            Some(handler) => {
                start(handler, event.value, event.kind);
                true
            }
            None => false,
        }
    }

    /// Whether a handler is set for `action` events from `service`
    pub async fn has_service_handler(&self, service: &str, action: &str) -> bool {
        self.service_handlers
            .lock()
            .await
            .get(action)
            .is_some_and(|by_service| by_service.contains_key(service))
    }

    /// Whether a handler is set for application events of type `kind`
    pub async fn has_app_handler(&self, kind: &str) -> bool {
        self.app_handlers.lock().await.contains_key(kind)
    }
}
