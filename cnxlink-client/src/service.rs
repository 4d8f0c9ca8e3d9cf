//! Per-service façades
//!
//! [`Client::service`](crate::Client::service) hands out a [`ServiceProxy`]
//! for a remote service name. Any action name becomes a [`RemoteAction`], a
//! trampoline that sends `client-request {uid, name, action, args}` through
//! the client and resolves with the matching response.
//!
//! Trampolines are created on first use and memoized per action. Proxies are
//! memoized per service on the client, so `client.service("User")` always
//! sees the actions discovered through earlier handles.
//!
//! ```rust,no_run
//! # async fn example(client: cnxlink_client::Client) -> cnxlink_core::Result<()> {
//! use serde_json::json;
//!
//! let user = client.service("User");
//! let created = user.call("create", vec![json!({"data": {"name": "chris"}})]).await?;
//!
//! user.on("created", |value| async move {
//!     println!("someone else created {value}");
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

use crate::client::Client;
use cnxlink_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serialize one positional argument
pub fn to_arg<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Service name plus the actions resolved on it so far
#[derive(Debug)]
pub(crate) struct ServiceState {
    name: String,
    actions: Mutex<BTreeMap<String, Arc<ActionBinding>>>,
}

impl ServiceState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Mutex::new(BTreeMap::new()),
        }
    }

    fn binding(&self, action: &str) -> Arc<ActionBinding> {
        let mut actions = self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(actions.entry(action.to_string()).or_insert_with(|| {
            Arc::new(ActionBinding {
                service: self.name.clone(),
                action: action.to_string(),
            })
        }))
    }

    fn action_names(&self) -> Vec<String> {
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct ActionBinding {
    service: String,
    action: String,
}

/// Handle on one remote service
#[derive(Clone)]
pub struct ServiceProxy {
    client: Client,
    state: Arc<ServiceState>,
    timeout: Option<Duration>,
}

impl ServiceProxy {
    pub(crate) fn new(client: Client, state: Arc<ServiceState>) -> Self {
        Self {
            client,
            state,
            timeout: None,
        }
    }

    /// Remote service name
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Deadline applied to calls made through this proxy
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.client.options().timeout())
    }

    /// Same service with its own deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
            timeout: Some(timeout),
        }
    }

    /// Trampoline for `action`
    pub fn action(&self, action: &str) -> RemoteAction {
        RemoteAction {
            client: self.client.clone(),
            binding: self.state.binding(action),
            timeout: self.timeout,
        }
    }

    /// Actions resolved on this service so far, sorted
    pub fn actions(&self) -> Vec<String> {
        self.state.action_names()
    }

    /// Call `action` with positional `args`
    pub async fn call(&self, action: &str, args: Vec<Value>) -> Result<Value> {
        self.action(action).call(args).await
    }

    /// Call `action` and deserialize the result
    pub async fn call_as<T: DeserializeOwned>(&self, action: &str, args: Vec<Value>) -> Result<T> {
        self.action(action).call_as(args).await
    }

    /// Set the handler for `action` events pushed by this service
    ///
    /// Replaces any previous handler for the same action.
    pub async fn on<F, Fut>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.client
            .router()
            .on_service_event(self.state.name.clone(), action, handler)
            .await;
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.state.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A remote action bound to its service
#[derive(Clone)]
pub struct RemoteAction {
    client: Client,
    binding: Arc<ActionBinding>,
    timeout: Option<Duration>,
}

impl RemoteAction {
    /// Service this action belongs to
    pub fn service(&self) -> &str {
        &self.binding.service
    }

    /// Action name as sent on the wire
    pub fn name(&self) -> &str {
        &self.binding.action
    }

    /// Whether two handles are the same memoized trampoline
    pub fn same_as(&self, other: &RemoteAction) -> bool {
        Arc::ptr_eq(&self.binding, &other.binding)
    }

    /// Send the call and wait for its outcome
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.client
            .issue(&self.binding.service, &self.binding.action, args, self.timeout)
            .await
    }

    /// Send the call and deserialize its result
    pub async fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T> {
        let value = self.call(args).await?;
        serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl std::fmt::Debug for RemoteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAction")
            .field("service", &self.binding.service)
            .field("action", &self.binding.action)
            .finish()
    }
}
