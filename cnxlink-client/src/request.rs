//! Correlation of requests and responses
//!
//! Every remote call gets a random token and an entry in the
//! [`CorrelationTable`]. The entry holds a oneshot sender; the caller awaits
//! the matching receiver. Responses arrive in any order and are matched by
//! token.
//!
//! # At-most-once resolution
//!
//! Two things can end a pending call: its response, or its deadline. Whichever
//! removes the table entry first wins. A response whose entry is already gone
//! (it timed out) is dropped; a deadline whose entry is already gone (the
//! response landed) falls through to the delivered outcome. The table entry is
//! the only arbiter, so neither race can resolve a call twice.
//!
//! Dropping the call future removes its entry as well.

use crate::transport::Transport;
use cnxlink_core::{events, ClientRequest, ClientResponse, Envelope, Error, Result};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

/// Length of generated correlation tokens
pub const TOKEN_LEN: usize = 20;

/// Generate a correlation token: 20 symbols from `[A-Za-z0-9]`
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Pending call waiting for its response
struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
}

/// Table of in-flight calls keyed by correlation token
#[derive(Clone, Default)]
pub struct CorrelationTable {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl CorrelationTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new pending call under a fresh token
    pub fn register(&self) -> (String, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();

        let mut token = generate_token();
        while pending.contains_key(&token) {
            token = generate_token();
        }
        pending.insert(token.clone(), PendingRequest { tx });

        (token, rx)
    }

    /// Resolve the call a response belongs to
    ///
    /// Returns `false` when no call is waiting for this token, which is the
    /// normal outcome for a response that lost the race against its deadline.
    pub fn complete(&self, response: ClientResponse) -> bool {
        let Some(pending) = self.lock().remove(&response.token) else {
            return false;
        };
        let _ = pending.tx.send(response.into_result());
        true
    }

    /// Remove a pending call without resolving it
    ///
    /// Returns `true` if the entry was still present.
    pub fn remove(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Fail every pending call with the same error
    pub fn fail_all(&self, error: Error) {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, req)| req).collect();
        for req in drained {
            let _ = req.tx.send(Err(error.clone()));
        }
    }

    /// Whether a call is waiting for `token`
    pub fn contains(&self, token: &str) -> bool {
        self.lock().contains_key(token)
    }

    /// Number of calls in flight
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Register, emit and await one remote call
    ///
    /// Emits exactly one `client-request` and resolves exactly once: with the
    /// server's result, with its error payload as [`Error::Remote`], or with
    /// [`Error::Timeout`] once `deadline` elapses.
    pub async fn issue(
        &self,
        transport: &dyn Transport,
        service: &str,
        action: &str,
        args: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value> {
        let (token, mut rx) = self.register();
        let _guard = PendingGuard { table: self, token: &token };

        let request = ClientRequest {
            token: token.clone(),
            service: service.to_string(),
            action: action.to_string(),
            args,
        };
        Envelope::new(events::CLIENT_REQUEST, &request).and_then(|envelope| transport.emit(envelope))?;

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(outcome) => outcome.unwrap_or_else(|_| Err(Error::Internal("completion channel closed".to_string()))),
            Err(_) if self.remove(&token) => Err(Error::timeout(service, action, &request.args)),
            // The response removed the entry between the deadline firing and
            // our removal attempt; its outcome is already in the channel.
            Err(_) => rx
                .await
                .unwrap_or_else(|_| Err(Error::Internal("completion channel closed".to_string()))),
        }
    }
}

/// Removes a call's entry when the awaiting future goes away
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    token: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.token);
    }
}
