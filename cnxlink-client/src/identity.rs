//! Persistence of the connection identity
//!
//! The client keeps exactly one value across restarts: the signed
//! [`ConnectionId`] of its logical session. Positive means the link is live,
//! negative means it is down and the absolute value is the identity to
//! reconcile on the next connection. No value means the client never
//! connected.
//!
//! Storage is a capability injected at construction:
//!
//! - [`MemoryIdentityStore`]: in-process slot, lost with the process (default)
//! - [`SledIdentityStore`]: durable slot in a sled database, keyed by
//!   [`IDENTITY_SLOT`]
//!
//! Only the lifecycle controller writes to the store.

use cnxlink_core::{ConnectionId, Error, Result};
use std::path::Path;
use std::sync::RwLock;

/// Name of the persisted slot
pub const IDENTITY_SLOT: &str = "cnx-id";

/// One named slot holding the signed connection identity
pub trait IdentityStore: Send + Sync {
    /// Current value of the slot
    fn get(&self) -> Result<Option<ConnectionId>>;

    /// Overwrite the slot
    fn set(&self, id: ConnectionId) -> Result<()>;
}

/// In-process identity slot
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: RwLock<Option<ConnectionId>>,
}

impl MemoryIdentityStore {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot pre-seeded with a value, as if left behind by an earlier run
    pub fn with_identity(id: ConnectionId) -> Self {
        Self {
            slot: RwLock::new(Some(id)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self) -> Result<Option<ConnectionId>> {
        self.slot
            .read()
            .map(|slot| *slot)
            .map_err(|_| Error::Storage("identity slot lock poisoned".to_string()))
    }

    fn set(&self, id: ConnectionId) -> Result<()> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| Error::Storage("identity slot lock poisoned".to_string()))?;
        *slot = Some(id);
        Ok(())
    }
}

/// Durable identity slot backed by sled
///
/// The value is bincode-encoded under the [`IDENTITY_SLOT`] key and flushed on
/// every write, so a restarted process sees the last state even after a crash.
pub struct SledIdentityStore {
    tree: sled::Tree,
}

impl SledIdentityStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::Storage(format!("Failed to open sled database: {}", e)))?;
        let tree = db
            .open_tree("identity")
            .map_err(|e| Error::Storage(format!("Failed to open identity tree: {}", e)))?;
        Ok(Self { tree })
    }
}

impl IdentityStore for SledIdentityStore {
    fn get(&self) -> Result<Option<ConnectionId>> {
        let Some(bytes) = self
            .tree
            .get(IDENTITY_SLOT)
            .map_err(|e| Error::Storage(e.to_string()))?
        else {
            return Ok(None);
        };

        let raw: i64 = bincode::deserialize(&bytes).map_err(|e| Error::Storage(e.to_string()))?;
        match ConnectionId::new(raw) {
            Some(id) => Ok(Some(id)),
            None => {
                tracing::warn!(slot = IDENTITY_SLOT, "Ignoring zero identity in store");
                Ok(None)
            }
        }
    }

    fn set(&self, id: ConnectionId) -> Result<()> {
        let bytes = bincode::serialize(&id.raw()).map_err(|e| Error::Storage(e.to_string()))?;
        self.tree
            .insert(IDENTITY_SLOT, bytes)
            .map_err(|e| Error::Storage(e.to_string()))?;
        self.tree.flush().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}
