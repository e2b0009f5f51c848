//! Storage traits and backends.
//!
//! [`TruthStores`] bundles one handle per store kind. Use
//! [`TruthStores::in_memory`] for tests and embedding, or
//! [`TruthStores::open_persistent`] (feature `persistent`) for a durable
//! data directory.

pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

use std::sync::Arc;

pub use memory::{
    InMemoryEntityStore, InMemoryObservationStore, InMemoryRelationshipStore,
    InMemorySnapshotStore, InMemorySourceStore, InMemoryTimelineStore, MERGE_HOP_LIMIT,
};
pub use traits::{
    EntityStore, ObservationStore, RelationshipStore, SnapshotStore, SourceStore, StorageError,
    TimelineStore,
};

/// One handle per store kind.
#[derive(Clone)]
pub struct TruthStores {
    /// Raw source material.
    pub sources: Arc<dyn SourceStore>,
    /// Observations.
    pub observations: Arc<dyn ObservationStore>,
    /// Entities, merged ones included.
    pub entities: Arc<dyn EntityStore>,
    /// Derived snapshots; always in memory.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Typed edges.
    pub relationships: Arc<dyn RelationshipStore>,
    /// Timeline events.
    pub timeline: Arc<dyn TimelineStore>,
}

impl std::fmt::Debug for TruthStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TruthStores").finish_non_exhaustive()
    }
}

impl TruthStores {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sources: Arc::new(InMemorySourceStore::new()),
            observations: Arc::new(InMemoryObservationStore::new()),
            entities: Arc::new(InMemoryEntityStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            relationships: Arc::new(InMemoryRelationshipStore::new()),
            timeline: Arc::new(InMemoryTimelineStore::new()),
        }
    }

    /// Opens a durable data directory. Snapshots stay in memory.
    ///
    /// The directory lock is held until every returned handle is dropped.
    ///
    /// # Errors
    /// See [`persistent::PersistentStores::open`].
    #[cfg(feature = "persistent")]
    pub fn open_persistent(
        dir: impl AsRef<std::path::Path>,
        config: &persistent::PersistentConfig,
    ) -> Result<Self, StorageError> {
        let stores = persistent::PersistentStores::open(dir.as_ref(), config)?;
        Ok(Self {
            sources: stores.sources,
            observations: stores.observations,
            entities: stores.entities,
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            relationships: stores.relationships,
            timeline: stores.timeline,
        })
    }
}
