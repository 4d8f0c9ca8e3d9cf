//! Error types for cnxlink
//!
//! Every failure a caller can observe from a remote call surfaces as an
//! [`Error`] through the call's `Result`. The variants map one-to-one to the
//! ways a call can end badly:
//!
//! - **Remote**: the server answered with an error payload
//! - **Timeout**: no answer arrived before the per-call deadline
//! - **ReconnectionTimeout**: the link stayed down for the whole gate budget,
//!   so the call was never sent
//!
//! The remaining variants cover local plumbing (serialization, transport,
//! identity storage).
//!
//! Protocol invariant violations observed on disconnect (the stored identity
//! was not live when a disconnect arrived) are *not* errors. They are logged
//! with `tracing::warn!` and processing continues.
//!
//! # Examples
//!
//! ```rust
//! use cnxlink_core::Error;
//! use serde_json::json;
//!
//! let err = Error::timeout("User", "create", &[json!({"data": {"name": "chris"}})]);
//! assert!(err.to_string().contains("service 'User', action 'create'"));
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result type for cnxlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cnxlink operations
///
/// The enum is `Clone` so a single failure can be fanned out to several
/// waiters (for example when a transport shuts down).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The server rejected the request
    ///
    /// Holds the server's `error` payload verbatim; nothing is wrapped or
    /// reinterpreted.
    #[error("Remote error: {0}")]
    Remote(Value),

    /// No response arrived within the per-call deadline
    ///
    /// `args` holds the JSON-serialized argument list so the failing call can
    /// be identified from logs alone.
    #[error("timeout on service '{service}', action '{action}', args: {args}")]
    Timeout {
        /// Service the call targeted
        service: String,
        /// Action the call targeted
        action: String,
        /// Serialized arguments
        args: String,
    },

    /// The connection stayed down for the whole reconnection gate budget
    ///
    /// The request was never emitted.
    #[error("connection not re-established after {attempts} attempts")]
    ReconnectionTimeout {
        /// Number of identity checks performed before giving up
        attempts: u32,
    },

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An inbound frame could not be interpreted
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Identity store read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The transport is gone and cannot accept frames
    #[error("Connection closed")]
    ConnectionClosed,

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::Timeout`] from the call's coordinates
    pub fn timeout(service: impl Into<String>, action: impl Into<String>, args: &[Value]) -> Self {
        let args = serde_json::to_string(args).unwrap_or_else(|_| "<unserializable>".to_string());
        Error::Timeout {
            service: service.into(),
            action: action.into(),
            args,
        }
    }

    /// Whether this error carries a server-provided payload
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_))
    }

    /// Whether the call failed because no response arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether the call was refused because the link never came back
    pub fn is_reconnection_timeout(&self) -> bool {
        matches!(self, Error::ReconnectionTimeout { .. })
    }

    /// The remote error payload, if any
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            Error::Remote(payload) => Some(payload),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
