//! Persistent store implementations.
//!
//! Each store keeps the same in-memory state as its in-memory counterpart
//! and shares one [`Journal`]: the directory lock plus the WAL. A mutation
//! is validated against memory, appended to the WAL, then applied.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::ids::{EntityId, ObservationId, RelationshipId, SourceId};
use crate::observation::Observation;
use crate::relationship::{Relationship, RelationshipType};
use crate::source::SourceMaterial;
use crate::storage::memory::{
    lock_err, EntityState, ObservationState, RelationshipState, SourceState, TimelineState,
};
use crate::storage::traits::{
    EntityStore, ObservationStore, RelationshipStore, SourceStore, StorageError, TimelineStore,
};
use crate::timeline::{TimelineEvent, TimelineFilter};

use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WalRecovery, WriteAheadLog};
use super::PersistentConfig;

/// File name of the WAL inside the data directory.
pub const WAL_FILE: &str = "truth.wal";

/// The directory lock and WAL shared by all persistent stores.
#[derive(Debug)]
pub struct Journal {
    wal: WriteAheadLog,
    _lock: FileLock,
}

impl Journal {
    fn append(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| StorageError::Backend(format!("WAL write failed: {e}")))
    }
}

/// All persistent stores over one data directory.
#[derive(Debug)]
pub struct PersistentStores {
    /// The data directory.
    pub dir: PathBuf,
    journal: Arc<Journal>,
    /// Source store.
    pub sources: Arc<PersistentSourceStore>,
    /// Observation store.
    pub observations: Arc<PersistentObservationStore>,
    /// Entity store.
    pub entities: Arc<PersistentEntityStore>,
    /// Relationship store.
    pub relationships: Arc<PersistentRelationshipStore>,
    /// Timeline store.
    pub timeline: Arc<PersistentTimelineStore>,
}

impl PersistentStores {
    /// Opens or creates a data directory and replays its WAL.
    ///
    /// # Errors
    /// `Unavailable` if the directory cannot be created or is locked by
    /// another process; `Backend` if the WAL cannot be opened.
    pub fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::Unavailable(format!(
                "failed to create data directory {}: {e}",
                dir.display()
            ))
        })?;

        let lock = FileLock::acquire(dir).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock => StorageError::Unavailable(e.to_string()),
            _ => StorageError::Unavailable(format!("failed to acquire lock: {e}")),
        })?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| StorageError::Backend(format!("failed to open WAL: {e}")))?;

        let journal = Arc::new(Journal { wal, _lock: lock });
        let stores = Self {
            dir: dir.to_path_buf(),
            sources: Arc::new(PersistentSourceStore::new(journal.clone())),
            observations: Arc::new(PersistentObservationStore::new(journal.clone())),
            entities: Arc::new(PersistentEntityStore::new(journal.clone())),
            relationships: Arc::new(PersistentRelationshipStore::new(journal.clone())),
            timeline: Arc::new(PersistentTimelineStore::new(journal.clone())),
            journal,
        };
        stores.replay()?;
        Ok(stores)
    }

    fn replay(&self) -> Result<(), StorageError> {
        let iter = self
            .journal
            .wal
            .iter()
            .map_err(|e| StorageError::Backend(format!("failed to iterate WAL: {e}")))?;

        let mut applied = 0u64;
        for entry in iter {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, applied, "stopping WAL replay at unreadable entry");
                    break;
                }
            };
            if let Err(e) = self.apply(entry.kind) {
                tracing::warn!(sequence = entry.sequence, error = %e, "skipping WAL entry");
                continue;
            }
            applied += 1;
        }
        self.complete_merges()?;

        let recovery = self.journal.wal.recovery();
        tracing::info!(
            dir = %self.dir.display(),
            applied,
            truncated_bytes = recovery.truncated_bytes,
            "replayed WAL"
        );
        Ok(())
    }

    fn apply(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        match kind {
            WalEntryKind::SourceInsert(source) => {
                let mut state = self.sources.state.write().map_err(|_| lock_err("source.replay"))?;
                state.apply_insert(source);
            }
            WalEntryKind::ObservationInsert(observation) => {
                let mut state =
                    self.observations.state.write().map_err(|_| lock_err("observation.replay"))?;
                state.apply_insert(observation);
            }
            WalEntryKind::ObservationReassign { from, to } => {
                let mut state =
                    self.observations.state.write().map_err(|_| lock_err("observation.replay"))?;
                state.apply_reassign(&from, &to);
            }
            WalEntryKind::EntityInsert(entity) => {
                let mut state = self.entities.state.write().map_err(|_| lock_err("entity.replay"))?;
                state.apply_insert(entity);
            }
            WalEntryKind::EntityUpdate(entity) => {
                let mut state = self.entities.state.write().map_err(|_| lock_err("entity.replay"))?;
                state.apply_update(entity);
            }
            WalEntryKind::EntityMerge { from, to, at } => {
                let mut state = self.entities.state.write().map_err(|_| lock_err("entity.replay"))?;
                state.apply_merge(&from, &to, at)?;
            }
            WalEntryKind::RelationshipInsert(relationship) => {
                let mut state =
                    self.relationships.state.write().map_err(|_| lock_err("relationship.replay"))?;
                state.apply_insert(relationship);
            }
            WalEntryKind::RelationshipRedirect { from, to } => {
                let mut state =
                    self.relationships.state.write().map_err(|_| lock_err("relationship.replay"))?;
                state.apply_redirect(&from, &to);
            }
            WalEntryKind::TimelineInsert(event) => {
                let mut state = self.timeline.state.write().map_err(|_| lock_err("timeline.replay"))?;
                state.apply_insert(event);
            }
            WalEntryKind::TimelineReassign { from, to } => {
                let mut state = self.timeline.state.write().map_err(|_| lock_err("timeline.replay"))?;
                state.apply_reassign(&from, &to);
            }
        }
        Ok(())
    }

    /// Finishes merges whose follow-up entries never reached the WAL.
    ///
    /// A merge is journaled as the entity entry followed by the observation,
    /// relationship and timeline moves. A crash between them leaves rows on
    /// the merged entity; moving them to its final target again is a no-op
    /// for merges that completed.
    fn complete_merges(&self) -> Result<(), StorageError> {
        let pairs: Vec<(EntityId, EntityId)> = {
            let state = self.entities.state.read().map_err(|_| lock_err("entity.replay"))?;
            state
                .list()
                .into_iter()
                .filter(|e| e.is_merged())
                .filter_map(|e| match state.resolve(&e.id) {
                    Ok(Some(target)) => Some((e.id, target.id)),
                    Ok(None) | Err(_) => None,
                })
                .collect()
        };
        if pairs.is_empty() {
            return Ok(());
        }

        let mut observations =
            self.observations.state.write().map_err(|_| lock_err("observation.replay"))?;
        let mut relationships =
            self.relationships.state.write().map_err(|_| lock_err("relationship.replay"))?;
        let mut timeline = self.timeline.state.write().map_err(|_| lock_err("timeline.replay"))?;
        for (from, to) in &pairs {
            let moved = observations.apply_reassign(from, to)
                + relationships.apply_redirect(from, to)
                + timeline.apply_reassign(from, to);
            if moved > 0 {
                tracing::warn!(%from, %to, moved, "completed interrupted merge");
            }
        }
        Ok(())
    }

    /// What the WAL scan found on open.
    #[must_use]
    pub fn recovery(&self) -> WalRecovery {
        self.journal.wal.recovery()
    }

    /// Current WAL size in bytes.
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.journal.wal.size_bytes().unwrap_or(0)
    }
}

// --- Sources ---

/// WAL-backed [`SourceStore`].
#[derive(Debug)]
pub struct PersistentSourceStore {
    journal: Arc<Journal>,
    state: RwLock<SourceState>,
}

impl PersistentSourceStore {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            state: RwLock::new(SourceState::default()),
        }
    }
}

impl SourceStore for PersistentSourceStore {
    fn insert(&self, source: SourceMaterial) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.insert"))?;
        state.check_insert(&source)?;
        self.journal.append(WalEntryKind::SourceInsert(source.clone()))?;
        state.apply_insert(source);
        Ok(())
    }

    fn get(&self, id: &SourceId) -> Result<Option<SourceMaterial>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("source.get"))?;
        Ok(state.get(id))
    }

    fn list(&self) -> Result<Vec<SourceMaterial>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("source.list"))?;
        Ok(state.list())
    }
}

// --- Observations ---

/// WAL-backed [`ObservationStore`].
#[derive(Debug)]
pub struct PersistentObservationStore {
    journal: Arc<Journal>,
    state: RwLock<ObservationState>,
}

impl PersistentObservationStore {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            state: RwLock::new(ObservationState::default()),
        }
    }
}

impl ObservationStore for PersistentObservationStore {
    fn insert(&self, observation: Observation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("observation.insert"))?;
        state.check_insert(&observation)?;
        self.journal
            .append(WalEntryKind::ObservationInsert(observation.clone()))?;
        state.apply_insert(observation);
        Ok(())
    }

    fn get(&self, id: &ObservationId) -> Result<Option<Observation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("observation.get"))?;
        Ok(state.get(id))
    }

    fn list_for_entity(&self, entity_id: &EntityId) -> Result<Vec<Observation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("observation.list_for_entity"))?;
        Ok(state.list_for_entity(entity_id))
    }

    fn list_for_source(&self, source_id: &SourceId) -> Result<Vec<Observation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("observation.list_for_source"))?;
        Ok(state.list_for_source(source_id))
    }

    fn list_all(&self) -> Result<Vec<Observation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("observation.list_all"))?;
        Ok(state.list_all())
    }

    fn reassign(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("observation.reassign"))?;
        self.journal.append(WalEntryKind::ObservationReassign {
            from: from.clone(),
            to: to.clone(),
        })?;
        Ok(state.apply_reassign(from, to))
    }
}

// --- Entities ---

/// WAL-backed [`EntityStore`].
#[derive(Debug)]
pub struct PersistentEntityStore {
    journal: Arc<Journal>,
    state: RwLock<EntityState>,
}

impl PersistentEntityStore {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            state: RwLock::new(EntityState::default()),
        }
    }
}

impl EntityStore for PersistentEntityStore {
    fn insert(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        state.check_insert(&entity)?;
        self.journal.append(WalEntryKind::EntityInsert(entity.clone()))?;
        state.apply_insert(entity);
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.get(id))
    }

    fn resolve(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.resolve"))?;
        state.resolve(id)
    }

    fn update(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.update"))?;
        state.check_update(&entity)?;
        self.journal.append(WalEntryKind::EntityUpdate(entity.clone()))?;
        state.apply_update(entity);
        Ok(())
    }

    fn merge(&self, from: &EntityId, to: &EntityId, at: DateTime<Utc>) -> Result<Entity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.merge"))?;
        state.check_merge(from, to)?;
        self.journal.append(WalEntryKind::EntityMerge {
            from: from.clone(),
            to: to.clone(),
            at,
        })?;
        state.apply_merge(from, to, at)
    }

    fn list(&self) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list"))?;
        Ok(state.list())
    }
}

// --- Relationships ---

/// WAL-backed [`RelationshipStore`].
#[derive(Debug)]
pub struct PersistentRelationshipStore {
    journal: Arc<Journal>,
    state: RwLock<RelationshipState>,
}

impl PersistentRelationshipStore {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            state: RwLock::new(RelationshipState::default()),
        }
    }
}

impl RelationshipStore for PersistentRelationshipStore {
    fn insert(&self, relationship: Relationship) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.insert"))?;
        state.check_insert(&relationship)?;
        self.journal
            .append(WalEntryKind::RelationshipInsert(relationship.clone()))?;
        state.apply_insert(relationship);
        Ok(())
    }

    fn get(&self, id: &RelationshipId) -> Result<Option<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.get"))?;
        Ok(state.get(id))
    }

    fn list_for_entity(&self, entity_id: &EntityId) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.list_for_entity"))?;
        Ok(state.list_matching(|r| r.touches(entity_id)))
    }

    fn list_by_type(
        &self,
        relationship_type: &RelationshipType,
    ) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.list_by_type"))?;
        Ok(state.list_matching(|r| &r.relationship_type == relationship_type))
    }

    fn list_all(&self) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.list_all"))?;
        Ok(state.list_matching(|_| true))
    }

    fn redirect(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.redirect"))?;
        self.journal.append(WalEntryKind::RelationshipRedirect {
            from: from.clone(),
            to: to.clone(),
        })?;
        Ok(state.apply_redirect(from, to))
    }
}

// --- Timeline ---

/// WAL-backed [`TimelineStore`].
#[derive(Debug)]
pub struct PersistentTimelineStore {
    journal: Arc<Journal>,
    state: RwLock<TimelineState>,
}

impl PersistentTimelineStore {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            state: RwLock::new(TimelineState::default()),
        }
    }
}

impl TimelineStore for PersistentTimelineStore {
    fn insert(&self, event: TimelineEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("timeline.insert"))?;
        if !state.is_new(&event) {
            return Ok(());
        }
        self.journal.append(WalEntryKind::TimelineInsert(event.clone()))?;
        state.apply_insert(event);
        Ok(())
    }

    fn list(&self, filter: &TimelineFilter) -> Result<Vec<TimelineEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("timeline.list"))?;
        Ok(state.list(filter))
    }

    fn reassign(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("timeline.reassign"))?;
        self.journal.append(WalEntryKind::TimelineReassign {
            from: from.clone(),
            to: to.clone(),
        })?;
        Ok(state.apply_reassign(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::source::SourceKind;
    use crate::timeline::extract_events;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn config() -> PersistentConfig {
        PersistentConfig { sync_on_write: false }
    }

    fn person(name: &str) -> Entity {
        Entity::new(EntityType::new("person").unwrap(), name, name.to_lowercase(), Utc::now())
    }

    fn observation(entity: &Entity, source: &SourceMaterial) -> Observation {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!(entity.canonical_name));
        fields.insert("birth_date".to_string(), json!("1815-12-10"));
        Observation::new(
            entity.id.clone(),
            entity.entity_type.clone(),
            source.id.clone(),
            0,
            fields,
            100,
            Utc::now(),
        )
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let ada = person("Ada");
        let source = SourceMaterial::new(SourceKind::StructuredPayload, "application/json", "{}", Utc::now());
        let obs = observation(&ada, &source);
        {
            let stores = PersistentStores::open(dir.path(), &config()).unwrap();
            stores.entities.insert(ada.clone()).unwrap();
            stores.sources.insert(source.clone()).unwrap();
            stores.observations.insert(obs.clone()).unwrap();
            for event in extract_events(&obs) {
                stores.timeline.insert(event).unwrap();
            }
        }

        let stores = PersistentStores::open(dir.path(), &config()).unwrap();
        assert_eq!(stores.entities.get(&ada.id).unwrap().unwrap().canonical_name, "Ada");
        assert_eq!(stores.sources.get(&source.id).unwrap(), Some(source));
        assert_eq!(stores.observations.list_for_entity(&ada.id).unwrap(), vec![obs]);
        assert_eq!(stores.timeline.list(&TimelineFilter::default()).unwrap().len(), 1);
        assert_eq!(stores.recovery().entries, 4);
    }

    #[test]
    fn test_merge_replays() {
        let dir = tempdir().unwrap();
        let (a, b) = (person("Ada"), person("Ada Lovelace"));
        let c = person("Charles");
        {
            let stores = PersistentStores::open(dir.path(), &config()).unwrap();
            for e in [&a, &b, &c] {
                stores.entities.insert(e.clone()).unwrap();
            }
            let rel = Relationship::new(
                RelationshipType::new("KNOWS").unwrap(),
                a.id.clone(),
                c.id.clone(),
                Utc::now(),
            );
            stores.relationships.insert(rel).unwrap();
            stores.entities.merge(&a.id, &b.id, Utc::now()).unwrap();
            stores.relationships.redirect(&a.id, &b.id).unwrap();
        }

        let stores = PersistentStores::open(dir.path(), &config()).unwrap();
        let resolved = stores.entities.resolve(&a.id).unwrap().unwrap();
        assert_eq!(resolved.id, b.id);
        assert!(resolved.aliases.contains(&"Ada".to_string()));
        let edges = stores.relationships.list_for_entity(&b.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_entity_id, c.id);
    }

    #[test]
    fn test_merge_cut_after_entity_entry_is_completed() {
        let dir = tempdir().unwrap();
        let (a, b) = (person("Ada"), person("Ada Lovelace"));
        let c = person("Charles");
        let source = SourceMaterial::new(SourceKind::StructuredPayload, "application/json", "{}", Utc::now());
        let obs = observation(&a, &source);
        {
            let stores = PersistentStores::open(dir.path(), &config()).unwrap();
            for e in [&a, &b, &c] {
                stores.entities.insert(e.clone()).unwrap();
            }
            stores.observations.insert(obs.clone()).unwrap();
            for event in extract_events(&obs) {
                stores.timeline.insert(event).unwrap();
            }
            stores
                .relationships
                .insert(Relationship::new(
                    RelationshipType::new("KNOWS").unwrap(),
                    a.id.clone(),
                    c.id.clone(),
                    Utc::now(),
                ))
                .unwrap();
            // Only the first entry of the merge reaches the log.
            stores.entities.merge(&a.id, &b.id, Utc::now()).unwrap();
        }

        let stores = PersistentStores::open(dir.path(), &config()).unwrap();
        assert!(stores.observations.list_for_entity(&a.id).unwrap().is_empty());
        assert_eq!(stores.observations.list_for_entity(&b.id).unwrap().len(), 1);
        assert!(stores.relationships.list_for_entity(&a.id).unwrap().is_empty());
        let edges = stores.relationships.list_for_entity(&b.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_entity_id, c.id);
        let events = stores.timeline.list(&TimelineFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, b.id);
    }

    #[test]
    fn test_rejected_write_is_not_logged() {
        let dir = tempdir().unwrap();
        let ada = person("Ada");
        let stores = PersistentStores::open(dir.path(), &config()).unwrap();
        stores.entities.insert(ada.clone()).unwrap();
        let size = stores.wal_size();
        assert!(matches!(stores.entities.insert(ada), Err(StorageError::DuplicateKey(_))));
        assert_eq!(stores.wal_size(), size);
    }

    #[test]
    fn test_second_open_is_unavailable() {
        let dir = tempdir().unwrap();
        let _held = PersistentStores::open(dir.path(), &config()).unwrap();
        let err = PersistentStores::open(dir.path(), &config()).unwrap_err();
        assert!(err.is_unavailable());
    }
}
