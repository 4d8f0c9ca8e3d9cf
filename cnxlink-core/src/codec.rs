//! Codec for framed transports
//!
//! Transports that move text frames (the bundled WebSocket transport, for
//! instance) carry each named event as a JSON envelope:
//!
//! ```json
//! {"event": "client-request", "data": {"uid": "...", "name": "User", "action": "create", "args": []}}
//! ```
//!
//! Decoding is two-step. [`decode_envelope`] parses the frame, then
//! [`interpret`] turns the envelope into an [`InboundMessage`] by event name.
//! Unknown event names are not an error; they come back as
//! [`InboundMessage::Other`] so the caller can log and drop them.
//!
//! # Examples
//!
//! ```rust
//! use cnxlink_core::{codec, InboundMessage};
//!
//! let msg = codec::decode(r#"{"event":"connected","data":7}"#).unwrap();
//! assert!(matches!(msg, InboundMessage::Connected(id) if id.raw() == 7));
//! ```

use crate::error::{Error, Result};
use crate::types::{events, ClientRequest, Envelope, InboundMessage, TransferRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode a named event with its payload into a text frame
pub fn encode<T: Serialize>(event: &str, payload: &T) -> Result<String> {
    encode_envelope(&Envelope::new(event, payload)?)
}

/// Encode an already-built envelope
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a `client-request`
pub fn encode_request(request: &ClientRequest) -> Result<String> {
    encode(events::CLIENT_REQUEST, request)
}

/// Encode a `cnx-transfer`
pub fn encode_transfer(transfer: &TransferRequest) -> Result<String> {
    encode(events::TRANSFER, transfer)
}

/// Parse a text frame into an envelope
pub fn decode_envelope(frame: &str) -> Result<Envelope> {
    serde_json::from_str(frame).map_err(|e| Error::InvalidMessage(e.to_string()))
}

/// Parse and interpret a text frame
pub fn decode(frame: &str) -> Result<InboundMessage> {
    interpret(decode_envelope(frame)?)
}

/// Interpret an envelope by its event name
pub fn interpret(envelope: Envelope) -> Result<InboundMessage> {
    let message = match envelope.event.as_str() {
        events::CONNECTED => InboundMessage::Connected(payload(&envelope.event, envelope.data)?),
        events::TRANSFER_ACK => InboundMessage::TransferAck(payload(&envelope.event, envelope.data)?),
        events::CLIENT_RESPONSE => InboundMessage::Response(payload(&envelope.event, envelope.data)?),
        events::SERVICE_EVENT => InboundMessage::ServiceEvent(payload(&envelope.event, envelope.data)?),
        events::APP_EVENT => InboundMessage::AppEvent(payload(&envelope.event, envelope.data)?),
        _ => InboundMessage::Other(envelope),
    };
    Ok(message)
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::InvalidMessage(format!("{}: {}", event, e)))
}
