//! Durable storage backend.
//!
//! A data directory holds two files:
//!
//! ```text
//! <dir>/.lock      exclusive advisory lock (one process per directory)
//! <dir>/truth.wal  append-only, CRC-checked log of every mutation
//! ```
//!
//! State lives in memory and is rebuilt by replaying the WAL on open.
//! Snapshots are derived data and are never written to disk.

mod codec;
mod file_lock;
mod stores;
mod wal;

pub use file_lock::{FileLock, LOCK_FILE};
pub use stores::{
    Journal, PersistentEntityStore, PersistentObservationStore, PersistentRelationshipStore,
    PersistentSourceStore, PersistentStores, PersistentTimelineStore, WAL_FILE,
};
pub use wal::{WalEntry, WalEntryKind, WalRecovery, WriteAheadLog};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// fsync after every WAL append.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}
