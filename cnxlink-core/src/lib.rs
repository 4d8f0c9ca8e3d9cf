//! Core types for cnxlink
//!
//! This crate holds everything the client and any transport share:
//!
//! - **Types**: the typed payload of every named event, and [`ConnectionId`]
//! - **Codec**: the JSON envelope used by framed transports
//! - **Error handling**: the [`Error`] enum every call surfaces
//! - **Observability**: tracing subscriber and OpenTelemetry setup
//!
//! # Example
//!
//! ```rust
//! use cnxlink_core::{codec, ClientRequest};
//! use serde_json::json;
//!
//! let request = ClientRequest {
//!     token: "Zk3v9QpL0aBcDeFgHiJk".into(),
//!     service: "User".into(),
//!     action: "create".into(),
//!     args: vec![json!({"data": {"name": "chris"}})],
//! };
//! let frame = codec::encode_request(&request).unwrap();
//! assert!(frame.contains("\"event\":\"client-request\""));
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    events, AppEvent, ClientRequest, ClientResponse, ConnectionId, Envelope, InboundMessage,
    ServiceEvent, TransferRequest,
};
