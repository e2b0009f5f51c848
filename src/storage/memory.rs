//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits for embedded use and
//! tests. The `*State` types hold the indexes and the validation and apply
//! logic; the persistent backend wraps the same state types and logs each
//! mutation to its WAL between validation and apply.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::ids::{EntityId, EventId, ObservationId, RelationshipId, SourceId};
use crate::observation::Observation;
use crate::relationship::{Relationship, RelationshipType};
use crate::snapshot::EntitySnapshot;
use crate::source::SourceMaterial;
use crate::storage::traits::{
    EntityStore, ObservationStore, RelationshipStore, SnapshotStore, SourceStore, StorageError,
    TimelineStore,
};
use crate::timeline::{TimelineEvent, TimelineFilter};

/// Maximum length of a `merged_into` chain.
pub const MERGE_HOP_LIMIT: usize = 128;

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::Unavailable(format!("poisoned lock: {context}"))
}

// --- Sources ---

#[derive(Debug, Default)]
pub(crate) struct SourceState {
    by_id: BTreeMap<SourceId, SourceMaterial>,
}

impl SourceState {
    pub(crate) fn check_insert(&self, source: &SourceMaterial) -> Result<(), StorageError> {
        if self.by_id.contains_key(&source.id) {
            return Err(StorageError::DuplicateKey(source.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn apply_insert(&mut self, source: SourceMaterial) {
        self.by_id.insert(source.id.clone(), source);
    }

    pub(crate) fn get(&self, id: &SourceId) -> Option<SourceMaterial> {
        self.by_id.get(id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<SourceMaterial> {
        let mut all: Vec<SourceMaterial> = self.by_id.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }
}

/// Thread-safe in-memory source store.
#[derive(Debug, Default)]
pub struct InMemorySourceStore {
    state: RwLock<SourceState>,
}

impl InMemorySourceStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceStore for InMemorySourceStore {
    fn insert(&self, source: SourceMaterial) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.insert"))?;
        state.check_insert(&source)?;
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

#[derive(Debug, Default)]
pub(crate) struct ObservationState {
    by_id: BTreeMap<ObservationId, Observation>,
    by_entity: HashMap<EntityId, BTreeSet<ObservationId>>,
    by_source: HashMap<SourceId, BTreeSet<ObservationId>>,
}

impl ObservationState {
    pub(crate) fn check_insert(&self, observation: &Observation) -> Result<(), StorageError> {
        if self.by_id.contains_key(&observation.id) {
            return Err(StorageError::DuplicateKey(observation.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn apply_insert(&mut self, observation: Observation) {
        self.by_entity
            .entry(observation.entity_id.clone())
            .or_default()
            .insert(observation.id.clone());
        self.by_source
            .entry(observation.source_id.clone())
            .or_default()
            .insert(observation.id.clone());
        self.by_id.insert(observation.id.clone(), observation);
    }

    pub(crate) fn get(&self, id: &ObservationId) -> Option<Observation> {
        self.by_id.get(id).cloned()
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a ObservationId>) -> Vec<Observation> {
        ids.filter_map(|id| self.by_id.get(id).cloned()).collect()
    }

    pub(crate) fn list_for_entity(&self, entity_id: &EntityId) -> Vec<Observation> {
        let mut out = self
            .by_entity
            .get(entity_id)
            .map(|ids| self.collect(ids.iter()))
            .unwrap_or_default();
        out.sort_by(Observation::cmp_recency);
        out
    }

    pub(crate) fn list_for_source(&self, source_id: &SourceId) -> Vec<Observation> {
        let mut out = self
            .by_source
            .get(source_id)
            .map(|ids| self.collect(ids.iter()))
            .unwrap_or_default();
        out.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(crate) fn list_all(&self) -> Vec<Observation> {
        self.by_id.values().cloned().collect()
    }

    pub(crate) fn apply_reassign(&mut self, from: &EntityId, to: &EntityId) -> usize {
        if from == to {
            return 0;
        }
        let Some(ids) = self.by_entity.remove(from) else {
            return 0;
        };
        for id in &ids {
            if let Some(obs) = self.by_id.get_mut(id) {
                obs.entity_id = to.clone();
            }
        }
        let moved = ids.len();
        self.by_entity.entry(to.clone()).or_default().extend(ids);
        moved
    }
}

/// Thread-safe in-memory observation store.
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    state: RwLock<ObservationState>,
}

impl InMemoryObservationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservationStore for InMemoryObservationStore {
    fn insert(&self, observation: Observation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("observation.insert"))?;
        state.check_insert(&observation)?;
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
        Ok(state.apply_reassign(from, to))
    }
}

// --- Entities ---

#[derive(Debug, Default)]
pub(crate) struct EntityState {
    by_id: BTreeMap<EntityId, Entity>,
}

impl EntityState {
    pub(crate) fn check_insert(&self, entity: &Entity) -> Result<(), StorageError> {
        if self.by_id.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn apply_insert(&mut self, entity: Entity) {
        self.by_id.insert(entity.id.clone(), entity);
    }

    pub(crate) fn check_update(&self, entity: &Entity) -> Result<(), StorageError> {
        let prev = self
            .by_id
            .get(&entity.id)
            .ok_or_else(|| StorageError::not_found("entity", &entity.id))?;
        if prev.is_merged() {
            return Err(StorageError::Conflict(format!(
                "cannot update merged entity {}",
                entity.id
            )));
        }
        Ok(())
    }

    pub(crate) fn apply_update(&mut self, entity: Entity) {
        self.by_id.insert(entity.id.clone(), entity);
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<Entity> {
        self.by_id.get(id).cloned()
    }

    pub(crate) fn resolve(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let mut current = id;
        for _ in 0..=MERGE_HOP_LIMIT {
            let Some(entity) = self.by_id.get(current) else {
                return Ok(None);
            };
            match &entity.merged_into {
                None => return Ok(Some(entity.clone())),
                Some(next) if next == current => {
                    return Err(StorageError::Backend(
                        "entity merge map contains a self-cycle".to_string(),
                    ));
                }
                Some(next) => current = next,
            }
        }
        Err(StorageError::Backend(
            "entity merge map resolution exceeded hop limit".to_string(),
        ))
    }

    pub(crate) fn check_merge(&self, from: &EntityId, to: &EntityId) -> Result<(), StorageError> {
        if from == to {
            return Err(StorageError::Conflict(format!("cannot merge {from} into itself")));
        }
        for id in [from, to] {
            let entity = self
                .by_id
                .get(id)
                .ok_or_else(|| StorageError::not_found("entity", id))?;
            if entity.is_merged() {
                return Err(StorageError::Conflict(format!("entity {id} is already merged")));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_merge(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        at: DateTime<Utc>,
    ) -> Result<Entity, StorageError> {
        let names: Vec<String> = self
            .by_id
            .get(from)
            .ok_or_else(|| StorageError::not_found("entity", from))?
            .names()
            .map(str::to_string)
            .collect();

        let target = self
            .by_id
            .get_mut(to)
            .ok_or_else(|| StorageError::not_found("entity", to))?;
        for name in names {
            target.add_alias(name, at);
        }
        let merged = target.clone();

        if let Some(source) = self.by_id.get_mut(from) {
            source.mark_merged(to.clone(), at);
        }
        Ok(merged)
    }

    pub(crate) fn list(&self) -> Vec<Entity> {
        self.by_id.values().cloned().collect()
    }
}

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityState>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn insert(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        state.check_insert(&entity)?;
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
        state.apply_update(entity);
        Ok(())
    }

    fn merge(&self, from: &EntityId, to: &EntityId, at: DateTime<Utc>) -> Result<Entity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.merge"))?;
        state.check_merge(from, to)?;
        state.apply_merge(from, to, at)
    }

    fn list(&self) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list"))?;
        Ok(state.list())
    }
}

// --- Snapshots ---

/// Thread-safe in-memory snapshot store. Used by every backend.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    by_entity: RwLock<HashMap<EntityId, EntitySnapshot>>,
}

impl InMemorySnapshotStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put(&self, snapshot: EntitySnapshot) -> Result<(), StorageError> {
        let mut map = self.by_entity.write().map_err(|_| lock_err("snapshot.put"))?;
        map.insert(snapshot.entity_id.clone(), snapshot);
        Ok(())
    }

    fn get(&self, entity_id: &EntityId) -> Result<Option<EntitySnapshot>, StorageError> {
        let map = self.by_entity.read().map_err(|_| lock_err("snapshot.get"))?;
        Ok(map.get(entity_id).cloned())
    }

    fn remove(&self, entity_id: &EntityId) -> Result<(), StorageError> {
        let mut map = self.by_entity.write().map_err(|_| lock_err("snapshot.remove"))?;
        map.remove(entity_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut map = self.by_entity.write().map_err(|_| lock_err("snapshot.clear"))?;
        map.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let map = self.by_entity.read().map_err(|_| lock_err("snapshot.len"))?;
        Ok(map.len())
    }
}

// --- Relationships ---

#[derive(Debug, Default)]
pub(crate) struct RelationshipState {
    by_id: BTreeMap<RelationshipId, Relationship>,
}

impl RelationshipState {
    pub(crate) fn check_insert(&self, relationship: &Relationship) -> Result<(), StorageError> {
        if self.by_id.contains_key(&relationship.id) {
            return Err(StorageError::DuplicateKey(relationship.id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn apply_insert(&mut self, relationship: Relationship) {
        self.by_id.insert(relationship.id.clone(), relationship);
    }

    pub(crate) fn get(&self, id: &RelationshipId) -> Option<Relationship> {
        self.by_id.get(id).cloned()
    }

    pub(crate) fn list_matching(&self, pred: impl Fn(&Relationship) -> bool) -> Vec<Relationship> {
        self.by_id.values().filter(|r| pred(r)).cloned().collect()
    }

    pub(crate) fn apply_redirect(&mut self, from: &EntityId, to: &EntityId) -> usize {
        let touching: Vec<RelationshipId> = self
            .by_id
            .values()
            .filter(|r| r.touches(from))
            .map(|r| r.id.clone())
            .collect();

        for id in &touching {
            let Some(old) = self.by_id.remove(id) else {
                continue;
            };
            if let Some(moved) = old.redirected(from, to) {
                self.by_id.entry(moved.id.clone()).or_insert(moved);
            }
        }
        touching.len()
    }
}

/// Thread-safe in-memory relationship store.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    state: RwLock<RelationshipState>,
}

impl InMemoryRelationshipStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn insert(&self, relationship: Relationship) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.insert"))?;
        state.check_insert(&relationship)?;
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
        Ok(state.apply_redirect(from, to))
    }
}

// --- Timeline ---

#[derive(Debug, Default)]
pub(crate) struct TimelineState {
    by_id: BTreeMap<EventId, TimelineEvent>,
}

impl TimelineState {
    /// Returns false if the event is already stored.
    pub(crate) fn is_new(&self, event: &TimelineEvent) -> bool {
        !self.by_id.contains_key(&event.id)
    }

    pub(crate) fn apply_insert(&mut self, event: TimelineEvent) {
        self.by_id.insert(event.id.clone(), event);
    }

    pub(crate) fn list(&self, filter: &TimelineFilter) -> Vec<TimelineEvent> {
        let matching = self
            .by_id
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        filter.apply(matching)
    }

    pub(crate) fn apply_reassign(&mut self, from: &EntityId, to: &EntityId) -> usize {
        let mut moved = 0;
        for event in self.by_id.values_mut().filter(|e| &e.entity_id == from) {
            event.entity_id = to.clone();
            moved += 1;
        }
        moved
    }
}

/// Thread-safe in-memory timeline store.
#[derive(Debug, Default)]
pub struct InMemoryTimelineStore {
    state: RwLock<TimelineState>,
}

impl InMemoryTimelineStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimelineStore for InMemoryTimelineStore {
    fn insert(&self, event: TimelineEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("timeline.insert"))?;
        if state.is_new(&event) {
            state.apply_insert(event);
        }
        Ok(())
    }

    fn list(&self, filter: &TimelineFilter) -> Result<Vec<TimelineEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("timeline.list"))?;
        Ok(state.list(filter))
    }

    fn reassign(&self, from: &EntityId, to: &EntityId) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("timeline.reassign"))?;
        Ok(state.apply_reassign(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::source::SourceKind;
    use crate::timeline::extract_events;
    use chrono::Duration;
    use serde_json::json;

    fn company(name: &str) -> Entity {
        Entity::new(EntityType::new("company").unwrap(), name, name.to_lowercase(), Utc::now())
    }

    fn observation(entity: &Entity, source: &str, ordinal: u32, at: DateTime<Utc>) -> Observation {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!(entity.canonical_name));
        fields.insert("founded_date".to_string(), json!("2001-02-03"));
        Observation::new(
            entity.id.clone(),
            entity.entity_type.clone(),
            SourceId::for_content(source.as_bytes()),
            ordinal,
            fields,
            100,
            at,
        )
    }

    fn edge(ty: &str, a: &Entity, b: &Entity) -> Relationship {
        Relationship::new(RelationshipType::new(ty).unwrap(), a.id.clone(), b.id.clone(), Utc::now())
    }

    #[test]
    fn test_source_insert_rejects_duplicate() {
        let store = InMemorySourceStore::new();
        let source = SourceMaterial::new(SourceKind::File, "text/plain", "hello", Utc::now());
        store.insert(source.clone()).unwrap();
        assert!(matches!(store.insert(source.clone()), Err(StorageError::DuplicateKey(_))));
        assert_eq!(store.get(&source.id).unwrap(), Some(source));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_observations_listed_by_recency_and_source() {
        let store = InMemoryObservationStore::new();
        let acme = company("Acme");
        let now = Utc::now();
        let late = observation(&acme, "a", 1, now);
        let early = observation(&acme, "a", 0, now - Duration::seconds(10));
        store.insert(late.clone()).unwrap();
        store.insert(early.clone()).unwrap();
        assert!(store.insert(early.clone()).is_err());

        let ids: Vec<_> = store.list_for_entity(&acme.id).unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![early.id.clone(), late.id.clone()]);

        let by_source = store.list_for_source(&early.source_id).unwrap();
        assert_eq!(by_source[0].ordinal, 0);
        assert_eq!(by_source[1].ordinal, 1);
    }

    #[test]
    fn test_observation_reassign() {
        let store = InMemoryObservationStore::new();
        let (a, b) = (company("A"), company("B"));
        store.insert(observation(&a, "a", 0, Utc::now())).unwrap();
        store.insert(observation(&b, "b", 0, Utc::now())).unwrap();

        assert_eq!(store.reassign(&a.id, &b.id).unwrap(), 1);
        assert!(store.list_for_entity(&a.id).unwrap().is_empty());
        let moved = store.list_for_entity(&b.id).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|o| o.entity_id == b.id));
        assert_eq!(store.reassign(&a.id, &b.id).unwrap(), 0);
    }

    #[test]
    fn test_entity_merge_and_resolve() {
        let store = InMemoryEntityStore::new();
        let (a, b, c) = (company("Acme"), company("Acme Holdings"), company("Globex"));
        for e in [&a, &b, &c] {
            store.insert(e.clone()).unwrap();
        }

        let merged = store.merge(&a.id, &b.id, Utc::now()).unwrap();
        assert!(merged.aliases.contains(&"Acme".to_string()));
        assert_eq!(store.resolve(&a.id).unwrap().unwrap().id, b.id);

        store.merge(&b.id, &c.id, Utc::now()).unwrap();
        assert_eq!(store.resolve(&a.id).unwrap().unwrap().id, c.id);
        assert!(store.get(&a.id).unwrap().unwrap().is_merged());

        assert!(matches!(store.merge(&a.id, &c.id, Utc::now()), Err(StorageError::Conflict(_))));
        assert!(matches!(store.merge(&c.id, &c.id, Utc::now()), Err(StorageError::Conflict(_))));
        let ghost = EntityId::for_key("company", "ghost");
        assert!(matches!(
            store.merge(&ghost, &c.id, Utc::now()),
            Err(StorageError::NotFound { .. })
        ));
        assert!(store.resolve(&ghost).unwrap().is_none());
    }

    #[test]
    fn test_update_rejects_merged_entity() {
        let store = InMemoryEntityStore::new();
        let (a, b) = (company("A"), company("B"));
        store.insert(a.clone()).unwrap();
        store.insert(b.clone()).unwrap();
        store.merge(&a.id, &b.id, Utc::now()).unwrap();
        assert!(store.update(a).is_err());
        assert!(store.update(b).is_ok());
    }

    #[test]
    fn test_resolve_hop_limit() {
        let mut state = EntityState::default();
        let mut a = company("loop-a");
        let mut b = company("loop-b");
        a.merged_into = Some(b.id.clone());
        b.merged_into = Some(a.id.clone());
        state.apply_insert(a.clone());
        state.apply_insert(b);
        assert!(matches!(state.resolve(&a.id), Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_relationship_redirect_drops_self_loops_and_duplicates() {
        let store = InMemoryRelationshipStore::new();
        let (a, b, c) = (company("A"), company("B"), company("C"));
        store.insert(edge("OWNS", &a, &c)).unwrap();
        store.insert(edge("OWNS", &b, &c)).unwrap();
        store.insert(edge("PART_OF", &a, &b)).unwrap();

        assert_eq!(store.redirect(&a.id, &b.id).unwrap(), 2);
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, edge("OWNS", &b, &c).id);
        assert!(store.list_for_entity(&a.id).unwrap().is_empty());
    }

    #[test]
    fn test_relationship_listing() {
        let store = InMemoryRelationshipStore::new();
        let (a, b, c) = (company("A"), company("B"), company("C"));
        store.insert(edge("OWNS", &a, &b)).unwrap();
        store.insert(edge("PART_OF", &b, &c)).unwrap();
        assert_eq!(store.list_for_entity(&b.id).unwrap().len(), 2);
        let part_of = RelationshipType::new("PART_OF").unwrap();
        assert_eq!(store.list_by_type(&part_of).unwrap().len(), 1);
        let rel = edge("OWNS", &a, &b);
        assert!(matches!(store.insert(rel), Err(StorageError::DuplicateKey(_))));
    }

    #[test]
    fn test_timeline_insert_idempotent_and_reassign() {
        let store = InMemoryTimelineStore::new();
        let (a, b) = (company("A"), company("B"));
        let obs = observation(&a, "a", 0, Utc::now());
        for event in extract_events(&obs) {
            store.insert(event.clone()).unwrap();
            store.insert(event).unwrap();
        }
        assert_eq!(store.list(&TimelineFilter::default()).unwrap().len(), 1);

        assert_eq!(store.reassign(&a.id, &b.id).unwrap(), 1);
        let filter = TimelineFilter {
            entity_id: Some(b.id.clone()),
            ..TimelineFilter::default()
        };
        assert_eq!(store.list(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_store() {
        let store = InMemorySnapshotStore::new();
        let a = company("A");
        let snapshot = EntitySnapshot {
            entity_id: a.id.clone(),
            entity_type: a.entity_type.clone(),
            schema_version: "1.0".to_string(),
            canonical_name: a.canonical_name.clone(),
            fields: BTreeMap::new(),
            provenance: BTreeMap::new(),
            observation_count: 0,
            computed_at: None,
        };
        store.put(snapshot.clone()).unwrap();
        assert_eq!(store.get(&a.id).unwrap(), Some(snapshot));
        assert_eq!(store.len().unwrap(), 1);
        store.remove(&a.id).unwrap();
        assert!(store.get(&a.id).unwrap().is_none());
        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}
