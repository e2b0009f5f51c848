//! Abstract storage traits.
//!
//! Every store is `Send + Sync` and object-safe so the engine can hold
//! `Arc<dyn …>` handles regardless of backend.

use thiserror::Error;

use crate::entity::Entity;
use crate::ids::{EntityId, ObservationId, RelationshipId, SourceId};
use crate::observation::Observation;
use crate::relationship::{Relationship, RelationshipType};
use crate::snapshot::EntitySnapshot;
use crate::source::SourceMaterial;
use crate::timeline::{TimelineEvent, TimelineFilter};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record with that ID.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with that ID already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The write is well-formed but contradicts stored state.
    #[error("Storage conflict: {0}")]
    Conflict(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The backend cannot serve requests right now (lock held, poisoned, I/O down).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if the backend itself is unavailable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Raw source materials, keyed by content hash.
pub trait SourceStore: Send + Sync {
    /// Inserts a source. Fails with `DuplicateKey` if the ID exists.
    fn insert(&self, source: SourceMaterial) -> Result<(), StorageError>;

    /// Looks up a source by ID.
    fn get(&self, id: &SourceId) -> Result<Option<SourceMaterial>, StorageError>;

    /// All sources ordered by `(created_at, id)`.
    fn list(&self) -> Result<Vec<SourceMaterial>, StorageError>;
}

/// Immutable observations. Only their entity assignment changes (on merge).
pub trait ObservationStore: Send + Sync {
    /// Inserts an observation. Fails with `DuplicateKey` if the ID exists.
    fn insert(&self, observation: Observation) -> Result<(), StorageError>;

    /// Looks up an observation by ID.
    fn get(&self, id: &ObservationId) -> Result<Option<Observation>, StorageError>;

    /// Observations of one entity in ascending recency.
    fn list_for_entity(&self, entity_id: &EntityId) -> Result<Vec<Observation>, StorageError>;

    /// Observations derived from one source, ordered by ordinal.
    fn list_for_source(&self, source_id: &SourceId) -> Result<Vec<Observation>, StorageError>;

    /// Every observation, ordered by ID.
    fn list_all(&self) -> Result<Vec<Observation>, StorageError>;

    /// Re-points all observations of `from` to `to`. Returns how many moved.
    fn reassign(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError>;
}

/// Entities, including merged ones (kept so their IDs keep resolving).
pub trait EntityStore: Send + Sync {
    /// Inserts an entity. Fails with `DuplicateKey` if the ID exists.
    fn insert(&self, entity: Entity) -> Result<(), StorageError>;

    /// Returns the stored entity without following merges.
    fn get(&self, id: &EntityId) -> Result<Option<Entity>, StorageError>;

    /// Follows `merged_into` links to the surviving entity.
    ///
    /// # Errors
    /// `Backend` if the merge chain loops or exceeds the hop limit.
    fn resolve(&self, id: &EntityId) -> Result<Option<Entity>, StorageError>;

    /// Replaces an existing, unmerged entity.
    fn update(&self, entity: Entity) -> Result<(), StorageError>;

    /// Marks `from` as merged into `to` and moves its names onto `to` as
    /// aliases. Returns the updated target.
    fn merge(
        &self,
        from: &EntityId,
        to: &EntityId,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Entity, StorageError>;

    /// Every entity, merged ones included, ordered by ID.
    fn list(&self) -> Result<Vec<Entity>, StorageError>;
}

/// Derived snapshots. Never durable: they are recomputed from observations.
pub trait SnapshotStore: Send + Sync {
    /// Stores a snapshot, replacing any previous one.
    fn put(&self, snapshot: EntitySnapshot) -> Result<(), StorageError>;

    /// The snapshot of an entity, if computed.
    fn get(&self, entity_id: &EntityId) -> Result<Option<EntitySnapshot>, StorageError>;

    /// Drops the snapshot of an entity.
    fn remove(&self, entity_id: &EntityId) -> Result<(), StorageError>;

    /// Drops every snapshot.
    fn clear(&self) -> Result<(), StorageError>;

    /// Number of stored snapshots.
    fn len(&self) -> Result<usize, StorageError>;
}

/// Typed, directed edges between entities.
pub trait RelationshipStore: Send + Sync {
    /// Inserts an edge. Fails with `DuplicateKey` if the ID exists.
    fn insert(&self, relationship: Relationship) -> Result<(), StorageError>;

    /// Looks up an edge by ID.
    fn get(&self, id: &RelationshipId) -> Result<Option<Relationship>, StorageError>;

    /// Edges touching an entity in either direction, ordered by ID.
    fn list_for_entity(&self, entity_id: &EntityId) -> Result<Vec<Relationship>, StorageError>;

    /// Edges of one type, ordered by ID.
    fn list_by_type(
        &self,
        relationship_type: &RelationshipType,
    ) -> Result<Vec<Relationship>, StorageError>;

    /// Every edge, ordered by ID.
    fn list_all(&self) -> Result<Vec<Relationship>, StorageError>;

    /// Moves every edge endpoint from `from` to `to`.
    ///
    /// Edges that would become self-loops, or that duplicate an existing
    /// edge, are dropped. Returns how many edges were rewritten or dropped.
    fn redirect(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError>;
}

/// Timeline events extracted from observations.
pub trait TimelineStore: Send + Sync {
    /// Inserts an event. Re-inserting an identical event is a no-op.
    fn insert(&self, event: TimelineEvent) -> Result<(), StorageError>;

    /// Filtered, ordered and paged events.
    fn list(&self, filter: &TimelineFilter) -> Result<Vec<TimelineEvent>, StorageError>;

    /// Re-points all events of `from` to `to`. Returns how many moved.
    fn reassign(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_source_store_object_safe(_: &dyn SourceStore) {}
    fn _assert_observation_store_object_safe(_: &dyn ObservationStore) {}
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_snapshot_store_object_safe(_: &dyn SnapshotStore) {}
    fn _assert_relationship_store_object_safe(_: &dyn RelationshipStore) {}
    fn _assert_timeline_store_object_safe(_: &dyn TimelineStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::not_found("entity", EntityId::for_key("person", "ada"));
        assert!(err.to_string().starts_with("entity not found: ent_"));

        let err = StorageError::Unavailable("poisoned lock: entity.insert".to_string());
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("poisoned lock"));

        assert!(!StorageError::Backend("x".to_string()).is_unavailable());
    }
}
