//! cnxlink - RPC and pub/sub over a reconnecting transport
//!
//! This is the convenience crate that re-exports the cnxlink sub-crates.
//!
//! # Architecture
//!
//! - **cnxlink-core**: wire model, envelope codec, errors, observability
//! - **cnxlink-client**: the client: correlation, routing, lifecycle, transports
//! - **cnxlink-macros**: `#[remote_service]` typed wrappers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cnxlink::ClientBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new().connect("ws://localhost:8080").await?;
//!
//!     let result = client
//!         .service("User")
//!         .call("create", vec![json!({"data": {"name": "chris"}})])
//!         .await?;
//!     println!("Result: {}", result);
//!
//!     Ok(())
//! }
//! ```
//!
//! Typed wrappers generate `::cnxlink_client` paths, so crates using
//! `#[remote_service]` depend on `cnxlink-client` directly.

pub use cnxlink_client as client;
pub use cnxlink_core as core;
pub use cnxlink_macros as macros;

pub use cnxlink_client::{Client, ClientBuilder, ClientOptions, ReconcileMode, ServiceProxy};
pub use cnxlink_core::{ConnectionId, Error, Result};
pub use cnxlink_macros::remote_service;
