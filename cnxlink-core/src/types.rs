//! Wire model for the cnxlink protocol
//!
//! The protocol is a set of named events exchanged over a bidirectional
//! transport. Every event carries one JSON payload; this module defines the
//! typed form of each payload plus the connection identity the lifecycle
//! controller persists.
//!
//! # Events
//!
//! | Event              | Direction | Payload                      |
//! |--------------------|-----------|------------------------------|
//! | `connected`        | in        | [`ConnectionId`]             |
//! | `cnx-transfer-ack` | in        | [`ConnectionId`]             |
//! | `client-response`  | in        | [`ClientResponse`]           |
//! | `service-event`    | in        | [`ServiceEvent`]             |
//! | `app-event`        | in        | [`AppEvent`]                 |
//! | `client-request`   | out       | [`ClientRequest`]            |
//! | `cnx-transfer`     | out       | [`TransferRequest`]          |
//!
//! Field names on the wire are the server's (`uid`, `name`, `action`), the
//! Rust side uses descriptive names and `serde(rename)` bridges the two.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Event names used on the wire
pub mod events {
    /// Server announces the identity of a fresh connection
    pub const CONNECTED: &str = "connected";
    /// Server confirms a transfer to the given identity
    pub const TRANSFER_ACK: &str = "cnx-transfer-ack";
    /// Client asks the server to move session state between identities
    pub const TRANSFER: &str = "cnx-transfer";
    /// Client invokes a service action
    pub const CLIENT_REQUEST: &str = "client-request";
    /// Server answers a service action
    pub const CLIENT_RESPONSE: &str = "client-response";
    /// Server pushes a service-scoped event
    pub const SERVICE_EVENT: &str = "service-event";
    /// Server pushes an application event
    pub const APP_EVENT: &str = "app-event";
}

/// Server-issued identity of a logical client session
///
/// The identity outlives any single transport session: after a reconnect the
/// server migrates state from the previous identity to the new one.
///
/// The value is signed. A positive value means the link is live; the
/// lifecycle controller stores the negation while the link is down so the
/// last-known identity survives for reconciliation. Zero is never valid.
///
/// On the wire an identity may arrive as a JSON number or a numeric string.
///
/// ```rust
/// use cnxlink_core::ConnectionId;
///
/// let id = ConnectionId::new(7).unwrap();
/// assert!(id.is_live());
/// assert_eq!(id.marked_down().raw(), -7);
/// assert_eq!(id.marked_down().live(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(i64);

impl ConnectionId {
    /// Wrap a raw signed value; zero is rejected
    pub fn new(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// The raw signed value, as persisted
    pub fn raw(self) -> i64 {
        self.0
    }

    /// Whether this value marks a live link
    pub fn is_live(self) -> bool {
        self.0 > 0
    }

    /// The positive form of this identity
    pub fn live(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// The negative form of this identity
    pub fn marked_down(self) -> Self {
        Self(-self.0.saturating_abs())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        let raw = match RawId::deserialize(deserializer)? {
            RawId::Number(n) => n,
            RawId::Text(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom)?,
        };
        ConnectionId::new(raw).ok_or_else(|| serde::de::Error::custom("connection id must be non-zero"))
    }
}

/// Outgoing remote call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Correlation token echoed back in the response
    #[serde(rename = "uid")]
    pub token: String,
    /// Target service
    #[serde(rename = "name")]
    pub service: String,
    /// Target action on the service
    pub action: String,
    /// Positional arguments
    pub args: Vec<Value>,
}

/// Answer to a [`ClientRequest`]
///
/// A truthy `error` means failure. Null, `false`, `0` and `""` do not count as
/// errors; the call then succeeded with `result` (JSON null when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Token of the request being answered
    #[serde(rename = "uid")]
    pub token: String,
    /// Server error payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Successful result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ClientResponse {
    /// Successful response
    pub fn success(token: impl Into<String>, result: Value) -> Self {
        Self {
            token: token.into(),
            error: None,
            result: Some(result),
        }
    }

    /// Failed response
    pub fn failure(token: impl Into<String>, error: Value) -> Self {
        Self {
            token: token.into(),
            error: Some(error),
            result: None,
        }
    }

    /// Turn the response into the caller-facing outcome
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) if is_truthy(&error) => Err(Error::Remote(error)),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Service-scoped push notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// Originating service
    pub name: String,
    /// Event name within the service
    pub action: String,
    /// Event payload
    #[serde(default)]
    pub result: Value,
}

/// Application-level push notification, not tied to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload
    #[serde(default)]
    pub value: Value,
}

/// Request to migrate session-bound state between identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Previous identity (positive form)
    pub from: ConnectionId,
    /// Identity of the new transport session
    pub to: ConnectionId,
}

/// A named event as it travels over a framed transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload
    pub fn new<T: Serialize>(event: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(payload)?,
        })
    }
}

/// An inbound event, interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `connected`
    Connected(ConnectionId),
    /// `cnx-transfer-ack`
    TransferAck(ConnectionId),
    /// `client-response`
    Response(ClientResponse),
    /// `service-event`
    ServiceEvent(ServiceEvent),
    /// `app-event`
    AppEvent(AppEvent),
    /// Any event this client does not know about
    Other(Envelope),
}

impl InboundMessage {
    /// Wire name of the event this message came from
    pub fn event_name(&self) -> &str {
        match self {
            InboundMessage::Connected(_) => events::CONNECTED,
            InboundMessage::TransferAck(_) => events::TRANSFER_ACK,
            InboundMessage::Response(_) => events::CLIENT_RESPONSE,
            InboundMessage::ServiceEvent(_) => events::SERVICE_EVENT,
            InboundMessage::AppEvent(_) => events::APP_EVENT,
            InboundMessage::Other(envelope) => &envelope.event,
        }
    }
}
