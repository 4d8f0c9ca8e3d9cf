//! Connection lifecycle controller
//!
//! Owns the identity slot and reacts to what the transport reports. The
//! stored value is the whole state machine:
//!
//! ```text
//!  (empty)  ──connected(id)──▶  +id  ──disconnect/unload──▶  -id
//!                               ▲                             │
//!                               └──── connected(new) ─────────┘
//!                                     emits cnx-transfer {from: id, to: new}
//! ```
//!
//! Reconciliation after a reconnect depends on [`ReconcileMode`]. In
//! `Immediate` mode the new identity is stored as soon as the transfer is
//! emitted. In `AwaitAck` mode it is recorded as the pending target and stored
//! only once the server acknowledges that exact identity; acks for anything
//! else are stale and ignored.
//!
//! Remote calls pass through [`LifecycleController::wait_until_live`] first,
//! which holds them until the stored identity is positive or the retry budget
//! runs out.

use crate::backoff::BackoffStrategy;
use crate::identity::IdentityStore;
use crate::metrics::ClientMetrics;
use crate::transport::Transport;
use cnxlink_core::{events, ConnectionId, Envelope, Error, Result, TransferRequest};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

/// Callback run on link transitions, with the identity involved
pub type LinkCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Link state as derived from the stored identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing stored
    NeverConnected,
    /// Positive identity stored
    Connected(ConnectionId),
    /// Negative identity stored; carries the positive form
    Disconnected(ConnectionId),
}

impl LinkState {
    /// Interpret a stored value
    pub fn from_stored(stored: Option<ConnectionId>) -> Self {
        match stored {
            None => LinkState::NeverConnected,
            Some(id) if id.is_live() => LinkState::Connected(id),
            Some(id) => LinkState::Disconnected(id.live()),
        }
    }

    /// Whether remote calls may be sent
    pub fn is_live(&self) -> bool {
        matches!(self, LinkState::Connected(_))
    }

    /// Metric encoding: 0 never connected, 1 connected, 2 disconnected
    pub(crate) fn as_gauge(&self) -> i64 {
        match self {
            LinkState::NeverConnected => 0,
            LinkState::Connected(_) => 1,
            LinkState::Disconnected(_) => 2,
        }
    }
}

/// When a reconnect's new identity is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Store the new identity right after emitting `cnx-transfer`
    #[default]
    Immediate,
    /// Store it when `cnx-transfer-ack` confirms it
    AwaitAck,
}

/// State machine over the identity store
pub struct LifecycleController {
    store: Arc<dyn IdentityStore>,
    mode: ReconcileMode,
    pending_transfer: Mutex<Option<ConnectionId>>,
    on_connect: RwLock<Option<LinkCallback>>,
    on_disconnect: RwLock<Option<LinkCallback>>,
    became_live: Notify,
    metrics: Option<Arc<ClientMetrics>>,
}

impl LifecycleController {
    /// Controller over `store`
    pub fn new(store: Arc<dyn IdentityStore>, mode: ReconcileMode) -> Self {
        Self {
            store,
            mode,
            pending_transfer: Mutex::new(None),
            on_connect: RwLock::new(None),
            on_disconnect: RwLock::new(None),
            became_live: Notify::new(),
            metrics: None,
        }
    }

    /// Record transitions and transfers into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reconciliation mode in effect
    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Current state, read from the store
    pub fn state(&self) -> Result<LinkState> {
        Ok(LinkState::from_stored(self.store.get()?))
    }

    /// Identity a transfer is waiting to have acknowledged, if any
    pub fn pending_transfer(&self) -> Option<ConnectionId> {
        *self.pending_lock()
    }

    /// Set the callback run on every transition to connected
    pub fn set_connection_callback(&self, callback: LinkCallback) {
        if let Ok(mut slot) = self.on_connect.write() {
            *slot = Some(callback);
        }
    }

    /// Set the callback run on every transition to disconnected
    pub fn set_disconnection_callback(&self, callback: LinkCallback) {
        if let Ok(mut slot) = self.on_disconnect.write() {
            *slot = Some(callback);
        }
    }

    /// Mark down an identity left live by a previous process
    ///
    /// No transport has connected yet, so a positive stored identity belongs to
    /// a session that ended without unload. Marking it down keeps calls gated
    /// until `connected` arrives and lets that event transfer from it.
    pub fn recover_stale(&self) -> Result<()> {
        if let Some(stale) = self.store.get()?.filter(|id| id.is_live()) {
            tracing::warn!(connection_id = %stale, "Previous session ended without unload; marking identity down");
            self.store.set(stale.marked_down())?;
        }
        Ok(())
    }

    /// The server issued a connection identity
    pub fn on_connected(&self, id: ConnectionId, transport: &dyn Transport) -> Result<()> {
        let id = id.live();

        match self.store.get()? {
            None => {
                tracing::info!(connection_id = %id, "Connected");
                self.commit(id)
            }
            Some(stored) if stored == id => {
                tracing::debug!(connection_id = %id, "Duplicate connected event ignored");
                Ok(())
            }
            Some(stored) if stored.is_live() => {
                tracing::warn!(
                    stored = %stored,
                    connection_id = %id,
                    "Connected while another identity was live; disconnect was missed"
                );
                self.transfer(stored, id, transport)
            }
            Some(stored) => self.transfer(stored.live(), id, transport),
        }
    }

    fn transfer(&self, from: ConnectionId, to: ConnectionId, transport: &dyn Transport) -> Result<()> {
        let request = TransferRequest { from, to };
        if let Err(e) = Envelope::new(events::TRANSFER, &request).and_then(|envelope| transport.emit(envelope)) {
            tracing::warn!(from = %from, to = %to, error = %e, "Failed to emit transfer");
            return Err(e);
        }
        tracing::info!(from = %from, to = %to, mode = ?self.mode, "Transfer emitted");
        if let Some(ref m) = self.metrics {
            m.record_transfer();
        }

        match self.mode {
            ReconcileMode::Immediate => {
                *self.pending_lock() = None;
                self.commit(to)
            }
            ReconcileMode::AwaitAck => {
                if let Some(previous) = self.pending_lock().replace(to) {
                    tracing::debug!(superseded = %previous, target = %to, "Pending transfer replaced");
                }
                Ok(())
            }
        }
    }

    /// The server confirmed a transfer to `id`
    pub fn on_transfer_ack(&self, id: ConnectionId) -> Result<()> {
        let id = id.live();
        let pending = self.pending_transfer();

        if pending == Some(id) {
            *self.pending_lock() = None;
            tracing::info!(connection_id = %id, "Transfer acknowledged");
            return self.commit(id);
        }

        if self.store.get()? == Some(id) {
            tracing::debug!(connection_id = %id, "Transfer re-acknowledged");
            return self.store.set(id);
        }

        tracing::debug!(
            acked = %id,
            pending = ?pending.map(|p| p.raw()),
            "Stale transfer ack ignored"
        );
        Ok(())
    }

    /// The transport dropped
    pub fn on_disconnect(&self, reason: &str) -> Result<()> {
        self.mark_down(reason)
    }

    /// The host is about to terminate
    pub fn on_unload(&self) -> Result<()> {
        self.mark_down("unload")
    }

    fn mark_down(&self, reason: &str) -> Result<()> {
        if let Some(abandoned) = self.pending_lock().take() {
            tracing::debug!(target_id = %abandoned, reason, "Pending transfer abandoned");
            return Ok(());
        }

        match self.store.get()? {
            Some(id) if id.is_live() => {
                self.store.set(id.marked_down())?;
                tracing::info!(connection_id = %id, reason, "Disconnected");
                self.record_state();
                self.fire(&self.on_disconnect, id);
                Ok(())
            }
            stored => {
                tracing::warn!(
                    stored = ?stored.map(|s| s.raw()),
                    reason,
                    "Disconnect without a live identity; store left unchanged"
                );
                Ok(())
            }
        }
    }

    fn commit(&self, id: ConnectionId) -> Result<()> {
        self.store.set(id)?;
        self.became_live.notify_waiters();
        self.record_state();
        self.fire(&self.on_connect, id);
        Ok(())
    }

    /// Hold until the stored identity is positive
    ///
    /// Checks immediately, then waits between checks as `strategy` dictates.
    /// A transition to connected cuts the current wait short. Fails with
    /// [`Error::ReconnectionTimeout`] once the strategy gives up.
    pub async fn wait_until_live(&self, strategy: &dyn BackoffStrategy) -> Result<ConnectionId> {
        let mut attempt = 0;
        loop {
            let notified = self.became_live.notified();

            if let Some(id) = self.store.get()?.filter(|id| id.is_live()) {
                if attempt > 0 {
                    tracing::debug!(connection_id = %id, attempts = attempt, "Link live again, releasing call");
                }
                return Ok(id);
            }

            let Some(delay) = strategy.next_delay(attempt) else {
                tracing::warn!(attempts = attempt, "Link did not come back in time");
                if let Some(ref m) = self.metrics {
                    m.record_gate_failure();
                }
                return Err(Error::ReconnectionTimeout { attempts: attempt });
            };
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = notified => {}
            }
        }
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, Option<ConnectionId>> {
        self.pending_transfer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(&self, slot: &RwLock<Option<LinkCallback>>, id: ConnectionId) {
        let callback = slot.read().ok().and_then(|guard| guard.clone());
        if let Some(callback) = callback {
            callback(id);
        }
    }

    fn record_state(&self) {
        if let (Some(m), Ok(state)) = (&self.metrics, self.state()) {
            m.update_link_state(state.as_gauge());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedDelay;
    use crate::identity::MemoryIdentityStore;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    fn id(raw: i64) -> ConnectionId {
        ConnectionId::new(raw).unwrap()
    }

    fn controller_with(stored: Option<i64>, mode: ReconcileMode) -> (LifecycleController, Arc<MemoryIdentityStore>) {
        let store = Arc::new(match stored {
            Some(raw) => MemoryIdentityStore::with_identity(id(raw)),
            None => MemoryIdentityStore::new(),
        });
        (LifecycleController::new(store.clone(), mode), store)
    }

    #[test]
    fn test_first_connection_persists() {
        let (controller, store) = controller_with(None, ReconcileMode::Immediate);
        let (transport, mut rx) = ChannelTransport::new();

        assert_eq!(controller.state().unwrap(), LinkState::NeverConnected);
        controller.on_connected(id(7), &transport).unwrap();

        assert_eq!(store.get().unwrap(), Some(id(7)));
        assert_eq!(controller.state().unwrap(), LinkState::Connected(id(7)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_marks_down() {
        let (controller, store) = controller_with(Some(7), ReconcileMode::Immediate);

        controller.on_disconnect("transport close").unwrap();

        assert_eq!(store.get().unwrap(), Some(id(-7)));
        assert_eq!(controller.state().unwrap(), LinkState::Disconnected(id(7)));
    }

    #[test]
    fn test_disconnect_without_live_identity_leaves_store() {
        let (controller, store) = controller_with(Some(-7), ReconcileMode::Immediate);
        controller.on_disconnect("again").unwrap();
        assert_eq!(store.get().unwrap(), Some(id(-7)));

        let (controller, store) = controller_with(None, ReconcileMode::Immediate);
        controller.on_unload().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_reconnect_transfers_immediately() {
        let (controller, store) = controller_with(Some(-7), ReconcileMode::Immediate);
        let (transport, mut rx) = ChannelTransport::new();

        controller.on_connected(id(9), &transport).unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event, "cnx-transfer");
        assert_eq!(envelope.data, json!({"from": 7, "to": 9}));
        assert_eq!(store.get().unwrap(), Some(id(9)));
    }

    #[test]
    fn test_await_ack_commits_on_matching_ack() {
        let (controller, store) = controller_with(Some(-7), ReconcileMode::AwaitAck);
        let (transport, mut rx) = ChannelTransport::new();

        controller.on_connected(id(9), &transport).unwrap();
        assert_eq!(rx.try_recv().unwrap().data, json!({"from": 7, "to": 9}));
        assert_eq!(store.get().unwrap(), Some(id(-7)));
        assert_eq!(controller.pending_transfer(), Some(id(9)));

        controller.on_transfer_ack(id(9)).unwrap();
        assert_eq!(store.get().unwrap(), Some(id(9)));
        assert_eq!(controller.pending_transfer(), None);
    }

    #[test]
    fn test_await_ack_ignores_stale_ack() {
        let (controller, store) = controller_with(Some(-7), ReconcileMode::AwaitAck);
        let (transport, _rx) = ChannelTransport::new();

        controller.on_connected(id(9), &transport).unwrap();
        // Link flaps before the ack; the next session supersedes 9.
        controller.on_disconnect("flap").unwrap();
        controller.on_connected(id(11), &transport).unwrap();
        assert_eq!(controller.pending_transfer(), Some(id(11)));

        controller.on_transfer_ack(id(9)).unwrap();
        assert_eq!(store.get().unwrap(), Some(id(-7)));

        controller.on_transfer_ack(id(11)).unwrap();
        assert_eq!(store.get().unwrap(), Some(id(11)));
    }

    #[test]
    fn test_connect_over_live_identity_transfers() {
        let (controller, store) = controller_with(Some(7), ReconcileMode::Immediate);
        let (transport, mut rx) = ChannelTransport::new();

        controller.on_connected(id(9), &transport).unwrap();

        assert_eq!(rx.try_recv().unwrap().data, json!({"from": 7, "to": 9}));
        assert_eq!(store.get().unwrap(), Some(id(9)));
    }

    #[test]
    fn test_recover_stale_marks_live_identity_down() {
        let (controller, store) = controller_with(Some(7), ReconcileMode::Immediate);
        controller.recover_stale().unwrap();
        assert_eq!(store.get().unwrap(), Some(id(-7)));

        // Already down or empty: untouched.
        controller.recover_stale().unwrap();
        assert_eq!(store.get().unwrap(), Some(id(-7)));
        let (controller, store) = controller_with(None, ReconcileMode::Immediate);
        controller.recover_stale().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_callbacks_fire_after_store_mutation() {
        let (controller, store) = controller_with(None, ReconcileMode::Immediate);
        let (transport, _rx) = ChannelTransport::new();
        let connected = Arc::new(AtomicI64::new(0));
        let disconnected = Arc::new(AtomicI64::new(0));

        let seen = Arc::clone(&connected);
        let observed_store = Arc::clone(&store);
        controller.set_connection_callback(Arc::new(move |id| {
            assert_eq!(observed_store.get().unwrap(), Some(id));
            seen.store(id.raw(), Ordering::SeqCst);
        }));
        let seen = Arc::clone(&disconnected);
        controller.set_disconnection_callback(Arc::new(move |id| {
            seen.store(id.raw(), Ordering::SeqCst);
        }));

        controller.on_connected(id(7), &transport).unwrap();
        assert_eq!(connected.load(Ordering::SeqCst), 7);

        controller.on_disconnect("gone").unwrap();
        assert_eq!(disconnected.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_passes_when_live() {
        let (controller, _store) = controller_with(Some(7), ReconcileMode::Immediate);
        let gate = FixedDelay::new(Duration::from_millis(200)).with_max_attempts(10);

        let start = tokio::time::Instant::now();
        assert_eq!(controller.wait_until_live(&gate).await.unwrap(), id(7));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_times_out() {
        let (controller, _store) = controller_with(Some(-7), ReconcileMode::Immediate);
        let gate = FixedDelay::new(Duration::from_millis(200)).with_max_attempts(10);

        let start = tokio::time::Instant::now();
        let error = controller.wait_until_live(&gate).await.unwrap_err();

        assert!(matches!(error, Error::ReconnectionTimeout { attempts: 10 }));
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_released_by_connect() {
        let (controller, _store) = controller_with(Some(-7), ReconcileMode::Immediate);
        let controller = Arc::new(controller);
        let gate = FixedDelay::new(Duration::from_millis(200)).with_max_attempts(10);

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_until_live(&gate).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        let (transport, _rx) = ChannelTransport::new();
        controller.on_connected(id(9), &transport).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), id(9));
    }
}
