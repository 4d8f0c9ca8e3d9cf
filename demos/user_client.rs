//! User service client example
//!
//! Connects to a cnxlink server, creates a user through a typed wrapper,
//! listens for pushed events and keeps its session across reconnects.
//!
//! Run with: cargo run --example user_client -- ws://127.0.0.1:8080

use cnxlink::client::{ExponentialBackoff, SledIdentityStore};
use cnxlink::{remote_service, ClientBuilder, ReconcileMode, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize)]
struct NewUser {
    data: UserData,
}

#[derive(Serialize)]
struct UserData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    name: String,
}

#[remote_service("User")]
pub trait User {
    async fn create(&self, payload: NewUser) -> Result<UserRecord>;

    #[action("findByName")]
    async fn find(&self, name: String) -> Result<Vec<UserRecord>>;
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080".to_string());

    let client = ClientBuilder::new()
        .debug(true)
        .timeout(Duration::from_secs(10))
        .reconcile(ReconcileMode::AwaitAck)
        .with_identity_store(Arc::new(SledIdentityStore::open("./cnx-state")?))
        .with_reconnect(Arc::new(
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30))
                .with_max_attempts(20)
                .with_jitter(),
        ))
        .connect(&url)
        .await?;

    client.set_connection_callback(|id| println!("Link up as {}", id));
    client.set_disconnection_callback(|id| println!("Link down (was {})", id));

    client
        .on("maintenance", |value| async move {
            println!("Maintenance notice: {}", value);
        })
        .await;

    let users = User::new(&client);
    users
        .proxy()
        .on("created", |value| async move {
            println!("User created elsewhere: {}", value);
        })
        .await;

    let id = client.wait_until_live().await?;
    println!("Connected as {}", id);

    let created = users
        .create(NewUser {
            data: UserData {
                name: "chris".to_string(),
            },
        })
        .await?;
    println!("Created: {:?}", created);

    let found = users.find("chris".to_string()).await?;
    println!("Found {} matching user(s)", found.len());

    println!("Listening for events, Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;

    client.unload()?;
    Ok(())
}
