//! Socket state of the WebSocket transport
//!
//! Tracks the physical link only. The logical session (identity, transfer,
//! gating) lives in [`lifecycle`](crate::lifecycle) and survives redials.
//!
//! # Connection States
//!
//! - **Disconnected**: not connected, not trying
//! - **Connecting**: first dial in progress
//! - **Connected**: socket open
//! - **Reconnecting**: socket lost, redialing
//! - **Failed**: redial budget exhausted, gave up
//!
//! ```text
//! Disconnected → Connecting → Connected
//!                      ↓           ↓
//!                   Failed ← Reconnecting
//! ```

use crate::backoff::BackoffStrategy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Socket state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Socket open
    Connected,
    /// Redialing after a drop
    Reconnecting {
        /// Attempts made so far
        attempt: u32,
    },
    /// Gave up redialing
    Failed,
}

/// Socket state plus the redial schedule
pub struct ConnectionManager {
    state: RwLock<ConnectionState>,
    strategy: Arc<dyn BackoffStrategy>,
    url: String,
}

impl ConnectionManager {
    /// Manager for `url`, redialing per `strategy`
    pub fn new(url: impl Into<String>, strategy: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            strategy,
            url: url.into(),
        }
    }

    /// Current state
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, new_state: ConnectionState) {
        *self.state.write().await = new_state;
    }

    /// Endpoint being dialed
    pub fn url(&self) -> &str {
        &self.url
    }

    /// First dial started
    pub async fn connecting(&self) {
        self.set_state(ConnectionState::Connecting).await;
    }

    /// Socket open
    pub async fn connected(&self) {
        self.set_state(ConnectionState::Connected).await;
    }

    /// Socket lost
    pub async fn disconnected(&self) {
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Begin redialing from attempt zero
    pub async fn start_reconnecting(&self) {
        self.set_state(ConnectionState::Reconnecting { attempt: 0 }).await;
    }

    /// Delay before the next redial, advancing the attempt count
    ///
    /// `None` means the strategy gave up; the state is then `Failed`.
    pub async fn next_reconnect_delay(&self) -> Option<Duration> {
        let mut state = self.state.write().await;
        let attempt = match *state {
            ConnectionState::Reconnecting { attempt } => attempt,
            _ => 0,
        };

        match self.strategy.next_delay(attempt) {
            Some(delay) => {
                *state = ConnectionState::Reconnecting { attempt: attempt + 1 };
                Some(delay)
            }
            None => {
                *state = ConnectionState::Failed;
                None
            }
        }
    }

    /// Whether the socket is open
    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, ConnectionState::Connected)
    }
}
