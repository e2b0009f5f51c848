//! Truth-layer engine.
//!
//! [`TruthEngine`] owns the stores, the schema registry and the search
//! index. All writes go through one writer lock, so every store sees
//! mutations in the same order and reads under the lock observe committed
//! state. Search is the exception: the index is maintained by a background
//! worker and lags writes by at most the queued updates.
//!
//! Ingest writes the source record last. If the process dies halfway through
//! an ingest, the source is absent and re-submitting the same content redoes
//! the work; observation and timeline writes skip what already exists.

mod indexer;
mod interpret;
pub mod types;

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::entity::Entity;
use crate::error::{ExecutionError, NeotomaError, NeotomaResult, ValidationError};
use crate::graph::{self, IntegrityReport};
use crate::ids::{EntityId, SourceId};
use crate::observation::{
    Observation, CORRECTION_PRIORITY, FILE_PRIORITY, MAX_PAYLOAD_PRIORITY, PAYLOAD_PRIORITY,
};
use crate::reducer::Reducer;
use crate::relationship::{Relationship, RelationshipType, ACYCLIC_TYPES};
use crate::schema::SchemaRegistry;
use crate::search::{SearchDocument, SearchIndex, SearchRequest, SearchResults};
use crate::snapshot::EntitySnapshot;
use crate::source::{InterpretationStatus, SourceKind, SourceMaterial};
use crate::storage::memory::lock_err;
use crate::storage::{StorageError, TruthStores};
use crate::timeline::{extract_events, TimelineFilter};

use indexer::{IndexCommand, IndexWorker};
use interpret::InterpretedRecord;

pub use types::{
    CorrectRequest, CorrectionResponse, CreateRelationshipRequest, EngineStats,
    EntitySnapshotResponse, EntityTypeList, FieldProvenanceRequest, FieldProvenanceResponse,
    GetEntityRequest, GetSourceRequest, IngestResponse, IngestedRecord, ListObservationsRequest,
    ListRelationshipsRequest, MergeEntitiesRequest, MergeResponse, NoArguments, ObservationPage,
    RelationshipList, RelationshipResponse, SourceSummary, SubmitPayloadRequest,
    TimelineResponse, UploadSourceRequest, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};

const JSON_MIME: &str = "application/json";

/// Tunables of a [`TruthEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the queue between writers and the search indexer.
    pub index_queue_capacity: usize,
    /// Longest wait in [`TruthEngine::sync_index`].
    pub index_sync_timeout: Duration,
    /// Page size when a search gives none.
    pub search_default_limit: usize,
    /// Largest search page size.
    pub search_max_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_queue_capacity: 1024,
            index_sync_timeout: Duration::from_millis(2000),
            search_default_limit: 20,
            search_max_limit: 100,
        }
    }
}

/// The truth layer: ingest, resolution, reduction, graph, timeline, search.
pub struct TruthEngine {
    stores: TruthStores,
    schemas: Arc<SchemaRegistry>,
    index: Arc<SearchIndex>,
    indexer: IndexWorker,
    writer: RwLock<()>,
    config: EngineConfig,
}

impl std::fmt::Debug for TruthEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TruthEngine")
            .field("stores", &self.stores)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn write_err(err: StorageError) -> NeotomaError {
    ExecutionError::StorageWrite(err).into()
}

fn read_err(err: StorageError) -> NeotomaError {
    ExecutionError::StorageRead(err).into()
}

fn entity_not_found(id: &EntityId) -> NeotomaError {
    ExecutionError::EntityNotFound { id: id.clone() }.into()
}

/// Page sizes above the maximum are clamped; zero is rejected.
fn check_limit(limit: Option<usize>) -> NeotomaResult<()> {
    if limit == Some(0) {
        return Err(ValidationError::InvalidRequest {
            message: "limit must be at least 1".to_string(),
        }
        .into());
    }
    Ok(())
}

fn to_json_string(value: &Value) -> NeotomaResult<String> {
    serde_json::to_string(value)
        .map_err(|e| NeotomaError::internal(format!("failed to serialize source content: {e}")))
}

impl TruthEngine {
    /// Creates an engine with the built-in schemas.
    ///
    /// Snapshots are recomputed from the stored observations before this
    /// returns.
    ///
    /// # Errors
    /// Fails if the indexer cannot start or the stores cannot be read.
    pub fn new(stores: TruthStores, config: EngineConfig) -> NeotomaResult<Self> {
        Self::with_schemas(stores, SchemaRegistry::new(), config)
    }

    /// Creates an engine with a caller-supplied schema registry.
    ///
    /// # Errors
    /// See [`TruthEngine::new`].
    pub fn with_schemas(
        stores: TruthStores,
        schemas: SchemaRegistry,
        config: EngineConfig,
    ) -> NeotomaResult<Self> {
        let index = Arc::new(SearchIndex::new());
        let indexer = IndexWorker::start(index.clone(), config.index_queue_capacity)?;
        let engine = Self {
            stores,
            schemas: Arc::new(schemas),
            index,
            indexer,
            writer: RwLock::new(()),
            config,
        };
        let rebuilt = engine.rebuild_snapshots()?;
        tracing::info!(snapshots = rebuilt, "truth engine ready");
        Ok(engine)
    }

    /// An engine over fresh in-memory stores with default settings.
    ///
    /// # Errors
    /// See [`TruthEngine::new`].
    pub fn in_memory() -> NeotomaResult<Self> {
        Self::new(TruthStores::in_memory(), EngineConfig::default())
    }

    /// The underlying stores.
    pub fn stores(&self) -> &TruthStores {
        &self.stores
    }

    /// The schema registry in use.
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn write_guard(&self) -> NeotomaResult<RwLockWriteGuard<'_, ()>> {
        self.writer.write().map_err(|_| write_err(lock_err("writer")))
    }

    fn read_guard(&self) -> NeotomaResult<RwLockReadGuard<'_, ()>> {
        self.writer.read().map_err(|_| read_err(lock_err("writer")))
    }

    // --- Ingest ---

    /// Stores a structured payload and turns each record into an observation.
    ///
    /// The whole payload is validated before anything is written. Submitting
    /// the same records again returns the first result with
    /// `deduplicated = true`.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for an empty payload, a bad record or an
    /// out-of-range priority; storage errors otherwise.
    pub fn submit_payload(&self, request: SubmitPayloadRequest) -> NeotomaResult<IngestResponse> {
        let priority = match request.source_priority {
            Some(p) if !(0..=MAX_PAYLOAD_PRIORITY).contains(&p) => {
                return Err(ValidationError::PriorityOutOfRange {
                    value: p,
                    max: MAX_PAYLOAD_PRIORITY,
                }
                .into());
            }
            Some(p) => p,
            None => PAYLOAD_PRIORITY,
        };
        if request.records.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }

        let refs: Vec<&Value> = request.records.iter().collect();
        let records = interpret::interpret_records(&self.schemas, &refs)?;

        let content = to_json_string(&json!({
            "records": request.records,
            "source_priority": priority,
        }))?;
        let at = request.observed_at.unwrap_or_else(Utc::now);
        let source = SourceMaterial::new(SourceKind::StructuredPayload, JSON_MIME, content, at)
            .with_agent(request.agent_id);

        let _guard = self.write_guard()?;
        if let Some(existing) = self.stores.sources.get(&source.id).map_err(read_err)? {
            tracing::debug!(source_id = %existing.id, "payload already ingested");
            return self.replay_ingest(&existing);
        }
        self.ingest(source, records, priority, at)
    }

    /// Stores raw content as a file source, interpreting JSON content.
    ///
    /// Non-JSON content is stored with status `stored` and produces no
    /// observations. Uploading identical bytes again returns the first
    /// result with `deduplicated = true`.
    ///
    /// # Errors
    /// `INTERPRETATION_FAILED` for malformed JSON or bad records; nothing is
    /// written in that case.
    pub fn upload_source(&self, request: UploadSourceRequest) -> NeotomaResult<IngestResponse> {
        if request.mime_type.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "mime_type".to_string(),
            }
            .into());
        }
        let at = request.observed_at.unwrap_or_else(Utc::now);
        let source = SourceMaterial::new(SourceKind::File, request.mime_type, request.content, at)
            .with_file_name(request.file_name)
            .with_agent(request.agent_id);

        let _guard = self.write_guard()?;
        if let Some(existing) = self.stores.sources.get(&source.id).map_err(read_err)? {
            tracing::debug!(source_id = %existing.id, "source already uploaded");
            return self.replay_ingest(&existing);
        }

        if !source.is_json() {
            let response = IngestResponse {
                source_id: source.id.clone(),
                deduplicated: false,
                interpretation: InterpretationStatus::Stored,
                records: Vec::new(),
            };
            tracing::info!(
                source_id = %source.id,
                mime_type = %source.mime_type,
                bytes = source.byte_size,
                "stored source without interpretation"
            );
            self.stores.sources.insert(source).map_err(write_err)?;
            return Ok(response);
        }

        let records = self.interpret_source(&source)?;
        self.ingest(source, records, FILE_PRIORITY, at)
    }

    fn interpret_source(&self, source: &SourceMaterial) -> NeotomaResult<Vec<InterpretedRecord>> {
        let failed = |reason: String| {
            tracing::warn!(source_id = %source.id, %reason, "interpretation failed");
            NeotomaError::from(ExecutionError::InterpretationFailed {
                source_id: source.id.clone(),
                reason,
            })
        };
        let document: Value = serde_json::from_str(&source.content)
            .map_err(|e| failed(format!("malformed JSON: {e}")))?;
        let records =
            interpret::records_from_document(&document).map_err(|e| failed(e.to_string()))?;
        interpret::interpret_records(&self.schemas, &records).map_err(|e| failed(e.to_string()))
    }

    fn ingest(
        &self,
        mut source: SourceMaterial,
        records: Vec<InterpretedRecord>,
        priority: i32,
        at: DateTime<Utc>,
    ) -> NeotomaResult<IngestResponse> {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut touched = BTreeSet::new();

        for (ordinal, record) in records.into_iter().enumerate() {
            let ordinal = u32::try_from(ordinal).map_err(|_| ValidationError::InvalidRequest {
                message: "too many records in one source".to_string(),
            })?;
            let entity = self.resolve_or_create(&record, at)?;
            let observation = Observation::new(
                entity.id.clone(),
                record.entity_type,
                source.id.clone(),
                ordinal,
                record.fields,
                priority,
                at,
            );
            outcomes.push(IngestedRecord {
                ordinal,
                observation_id: observation.id.clone(),
                entity_id: entity.id.clone(),
                entity_type: entity.entity_type.clone(),
            });
            self.store_observation(observation)?;
            touched.insert(entity.id);
        }

        for entity_id in &touched {
            let entity = self.resolve_entity(entity_id)?;
            self.refresh_snapshot(&entity)?;
        }

        source.interpretation = InterpretationStatus::Interpreted {
            observation_count: outcomes.len(),
        };
        let response = IngestResponse {
            source_id: source.id.clone(),
            deduplicated: false,
            interpretation: source.interpretation.clone(),
            records: outcomes,
        };
        self.stores.sources.insert(source).map_err(write_err)?;

        tracing::info!(
            source_id = %response.source_id,
            observations = response.records.len(),
            entities = touched.len(),
            "ingested source"
        );
        Ok(response)
    }

    /// Rebuilds the response of an earlier ingest from what it stored.
    fn replay_ingest(&self, source: &SourceMaterial) -> NeotomaResult<IngestResponse> {
        let mut records: Vec<IngestedRecord> = self
            .stores
            .observations
            .list_for_source(&source.id)
            .map_err(read_err)?
            .into_iter()
            .map(|o| IngestedRecord {
                ordinal: o.ordinal,
                observation_id: o.id,
                entity_id: o.entity_id,
                entity_type: o.entity_type,
            })
            .collect();
        records.sort_by_key(|r| r.ordinal);
        Ok(IngestResponse {
            source_id: source.id.clone(),
            deduplicated: true,
            interpretation: source.interpretation.clone(),
            records,
        })
    }

    fn resolve_or_create(
        &self,
        record: &InterpretedRecord,
        at: DateTime<Utc>,
    ) -> NeotomaResult<Entity> {
        match self
            .stores
            .entities
            .resolve(&record.key.entity_id)
            .map_err(read_err)?
        {
            Some(mut entity) => {
                if entity.add_alias(record.identifier.as_str(), at) {
                    self.stores.entities.update(entity.clone()).map_err(write_err)?;
                    tracing::debug!(entity_id = %entity.id, alias = %record.identifier, "recorded alias");
                }
                Ok(entity)
            }
            None => {
                let entity = Entity::new(
                    record.entity_type.clone(),
                    record.identifier.clone(),
                    record.key.normalized_key.clone(),
                    at,
                );
                self.stores.entities.insert(entity.clone()).map_err(write_err)?;
                tracing::info!(
                    entity_id = %entity.id,
                    entity_type = %entity.entity_type,
                    "created entity"
                );
                Ok(entity)
            }
        }
    }

    /// Writes an observation and its timeline events unless already stored.
    fn store_observation(&self, observation: Observation) -> NeotomaResult<()> {
        if self
            .stores
            .observations
            .get(&observation.id)
            .map_err(read_err)?
            .is_some()
        {
            return Ok(());
        }
        let events = extract_events(&observation);
        self.stores
            .observations
            .insert(observation)
            .map_err(write_err)?;
        for event in events {
            self.stores.timeline.insert(event).map_err(write_err)?;
        }
        Ok(())
    }

    // --- Snapshots ---

    fn compute_snapshot(&self, entity: &Entity) -> NeotomaResult<EntitySnapshot> {
        let schema = self.schemas.get(&entity.entity_type)?;
        let observations = self
            .stores
            .observations
            .list_for_entity(&entity.id)
            .map_err(read_err)?;
        Ok(Reducer::reduce(entity, &schema, &observations))
    }

    /// Recomputes, stores and queues for indexing the snapshot of `entity`.
    fn refresh_snapshot(&self, entity: &Entity) -> NeotomaResult<EntitySnapshot> {
        let snapshot = self.compute_snapshot(entity)?;
        self.stores
            .snapshots
            .put(snapshot.clone())
            .map_err(write_err)?;
        self.indexer.submit(IndexCommand::Upsert(Box::new(SearchDocument::new(
            entity,
            snapshot.clone(),
        ))))?;
        tracing::debug!(
            entity_id = %entity.id,
            observations = snapshot.observation_count,
            fields = snapshot.fields.len(),
            "reduced snapshot"
        );
        Ok(snapshot)
    }

    /// Recomputes every snapshot from scratch and re-indexes it.
    ///
    /// Returns the number of live entities reduced.
    ///
    /// # Errors
    /// Storage errors.
    pub fn rebuild_snapshots(&self) -> NeotomaResult<usize> {
        let _guard = self.write_guard()?;
        self.stores.snapshots.clear().map_err(write_err)?;
        let mut rebuilt = 0;
        for entity in self.stores.entities.list().map_err(read_err)? {
            if entity.is_merged() {
                self.indexer.submit(IndexCommand::Remove(entity.id))?;
                continue;
            }
            self.refresh_snapshot(&entity)?;
            rebuilt += 1;
        }
        tracing::info!(snapshots = rebuilt, "rebuilt snapshots");
        Ok(rebuilt)
    }

    // --- Reads ---

    fn resolve_entity(&self, id: &EntityId) -> NeotomaResult<Entity> {
        self.stores
            .entities
            .resolve(id)
            .map_err(read_err)?
            .ok_or_else(|| entity_not_found(id))
    }

    /// An entity that exists and has not been merged away.
    fn live_entity(&self, id: &EntityId) -> NeotomaResult<Entity> {
        let entity = self
            .stores
            .entities
            .get(id)
            .map_err(read_err)?
            .ok_or_else(|| entity_not_found(id))?;
        if let Some(merged_into) = entity.merged_into.clone() {
            return Err(ExecutionError::EntityAlreadyMerged {
                id: id.clone(),
                merged_into,
            }
            .into());
        }
        Ok(entity)
    }

    fn snapshot_of(&self, entity: &Entity) -> NeotomaResult<EntitySnapshot> {
        match self.stores.snapshots.get(&entity.id).map_err(read_err)? {
            Some(snapshot) => Ok(snapshot),
            None => self.compute_snapshot(entity),
        }
    }

    /// Returns stored source material.
    ///
    /// # Errors
    /// `SOURCE_NOT_FOUND` if no source has that ID.
    pub fn get_source(&self, source_id: &SourceId) -> NeotomaResult<SourceMaterial> {
        let _guard = self.read_guard()?;
        self.stores
            .sources
            .get(source_id)
            .map_err(read_err)?
            .ok_or_else(|| {
                ExecutionError::SourceNotFound {
                    id: source_id.clone(),
                }
                .into()
            })
    }

    /// Returns the current snapshot of an entity, following merges.
    ///
    /// # Errors
    /// `ENTITY_NOT_FOUND` if the ID is unknown.
    pub fn get_entity_snapshot(&self, entity_id: &EntityId) -> NeotomaResult<EntitySnapshotResponse> {
        let _guard = self.read_guard()?;
        let entity = self.resolve_entity(entity_id)?;
        let snapshot = self.snapshot_of(&entity)?;
        Ok(EntitySnapshotResponse {
            requested_id: entity_id.clone(),
            entity,
            snapshot,
        })
    }

    /// Lists an entity's observations in ascending recency.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for a zero limit; `ENTITY_NOT_FOUND` if the ID is
    /// unknown.
    pub fn list_observations(&self, request: &ListObservationsRequest) -> NeotomaResult<ObservationPage> {
        check_limit(request.limit)?;
        let _guard = self.read_guard()?;
        let entity = self.resolve_entity(&request.entity_id)?;
        let mut observations = self
            .stores
            .observations
            .list_for_entity(&entity.id)
            .map_err(read_err)?;
        observations.sort_by(Observation::cmp_recency);

        let limit = request
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let total = observations.len();
        let observations = observations
            .into_iter()
            .skip(request.offset)
            .take(limit)
            .collect();
        Ok(ObservationPage {
            entity_id: entity.id,
            total,
            limit,
            offset: request.offset,
            observations,
        })
    }

    /// Explains where a snapshot field's value came from.
    ///
    /// # Errors
    /// `ENTITY_NOT_FOUND`, or `FIELD_NOT_FOUND` if the snapshot has no such field.
    pub fn get_field_provenance(
        &self,
        request: &FieldProvenanceRequest,
    ) -> NeotomaResult<FieldProvenanceResponse> {
        let _guard = self.read_guard()?;
        let entity = self.resolve_entity(&request.entity_id)?;
        let snapshot = self.snapshot_of(&entity)?;

        let field_not_found = || {
            NeotomaError::from(ExecutionError::FieldNotFound {
                entity_id: entity.id.clone(),
                field: request.field.clone(),
            })
        };
        let value = snapshot
            .fields
            .get(&request.field)
            .cloned()
            .ok_or_else(field_not_found)?;
        let provenance = snapshot
            .provenance
            .get(&request.field)
            .ok_or_else(field_not_found)?;

        let mut observations = Vec::with_capacity(provenance.observation_ids.len());
        for id in &provenance.observation_ids {
            if let Some(o) = self.stores.observations.get(id).map_err(read_err)? {
                observations.push(o);
            }
        }
        let source_ids: BTreeSet<&SourceId> = provenance.source_ids.iter().collect();
        let mut sources = Vec::with_capacity(source_ids.len());
        for id in source_ids {
            if let Some(s) = self.stores.sources.get(id).map_err(read_err)? {
                sources.push(SourceSummary::from(&s));
            }
        }

        Ok(FieldProvenanceResponse {
            entity_id: entity.id.clone(),
            field: request.field.clone(),
            value,
            policy: provenance.policy,
            observations,
            sources,
        })
    }

    // --- Corrections, merges, relationships ---

    /// Overrides a field with a correction observation at priority 1000.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for an empty field name or a null value,
    /// `ENTITY_NOT_FOUND` if the entity is unknown.
    pub fn correct(&self, request: CorrectRequest) -> NeotomaResult<CorrectionResponse> {
        let field = request.field.trim().to_string();
        if field.is_empty() {
            return Err(ValidationError::MissingField {
                field: "field".to_string(),
            }
            .into());
        }
        if request.value.is_null() {
            return Err(ValidationError::InvalidRequest {
                message: "correction value must not be null".to_string(),
            }
            .into());
        }

        let _guard = self.write_guard()?;
        let entity = self.resolve_entity(&request.entity_id)?;
        let at = Utc::now();

        let content = to_json_string(&json!({
            "correction": {
                "entity_id": entity.id,
                "field": field,
                "value": request.value,
                "reason": request.reason,
                "corrected_at": at,
            }
        }))?;
        let mut source = SourceMaterial::new(SourceKind::Correction, JSON_MIME, content, at)
            .with_agent(request.agent_id);

        let mut fields = types::FieldMap::new();
        fields.insert(field.clone(), request.value);
        let observation = Observation::new(
            entity.id.clone(),
            entity.entity_type.clone(),
            source.id.clone(),
            0,
            fields,
            CORRECTION_PRIORITY,
            at,
        )
        .with_reason(request.reason);
        let observation_id = observation.id.clone();

        self.store_observation(observation)?;
        let snapshot = self.refresh_snapshot(&entity)?;

        source.interpretation = InterpretationStatus::Interpreted {
            observation_count: 1,
        };
        let source_id = source.id.clone();
        if self.stores.sources.get(&source_id).map_err(read_err)?.is_none() {
            self.stores.sources.insert(source).map_err(write_err)?;
        }

        tracing::info!(entity_id = %entity.id, %field, %source_id, "applied correction");
        Ok(CorrectionResponse {
            entity_id: entity.id,
            field,
            source_id,
            observation_id,
            snapshot,
        })
    }

    /// Folds `from` into `to`.
    ///
    /// Observations, relationships and timeline events move to `to`; `from`
    /// keeps resolving to `to` afterwards.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for a self-merge or a type mismatch,
    /// `ENTITY_NOT_FOUND`, `ENTITY_ALREADY_MERGED`, and `CYCLE_DETECTED` if
    /// the merge would close a cycle in an acyclic relationship type.
    pub fn merge_entities(&self, request: &MergeEntitiesRequest) -> NeotomaResult<MergeResponse> {
        let (from, to) = (&request.from_entity_id, &request.to_entity_id);
        if from == to {
            return Err(ValidationError::SelfMerge {
                entity_id: from.clone(),
            }
            .into());
        }

        let _guard = self.write_guard()?;
        let from_entity = self.live_entity(from)?;
        let to_entity = self.live_entity(to)?;
        if from_entity.entity_type != to_entity.entity_type {
            return Err(ValidationError::EntityTypeMismatch {
                from: from_entity.entity_type.to_string(),
                to: to_entity.entity_type.to_string(),
            }
            .into());
        }

        for name in ACYCLIC_TYPES {
            let ty = RelationshipType::new(*name)?;
            let edges = self.stores.relationships.list_by_type(&ty).map_err(read_err)?;
            if let Some(cycle) = graph::cycle_created_by_merge(&edges, from, to) {
                return Err(ExecutionError::CycleDetected {
                    relationship_type: ty.to_string(),
                    path: cycle.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
        }

        let at = Utc::now();
        let target = self
            .stores
            .entities
            .merge(from, to, at)
            .map_err(write_err)?;
        let observations_moved = self
            .stores
            .observations
            .reassign(from, to)
            .map_err(write_err)?;
        let relationships_rewritten = self
            .stores
            .relationships
            .redirect(from, to)
            .map_err(write_err)?;
        let timeline_events_moved = self.stores.timeline.reassign(from, to).map_err(write_err)?;

        self.stores.snapshots.remove(from).map_err(write_err)?;
        self.indexer.submit(IndexCommand::Remove(from.clone()))?;
        let snapshot = self.refresh_snapshot(&target)?;

        tracing::info!(
            %from,
            %to,
            observations_moved,
            relationships_rewritten,
            timeline_events_moved,
            "merged entities"
        );
        Ok(MergeResponse {
            from_entity_id: from.clone(),
            to_entity_id: to.clone(),
            observations_moved,
            relationships_rewritten,
            timeline_events_moved,
            snapshot,
        })
    }

    /// Creates a typed edge between two entities. Idempotent by ID.
    ///
    /// # Errors
    /// `ENTITY_NOT_FOUND`, `SOURCE_NOT_FOUND`, `VALIDATION_ERROR` for a
    /// self-loop, or `CYCLE_DETECTED` for an acyclic type.
    pub fn create_relationship(
        &self,
        request: CreateRelationshipRequest,
    ) -> NeotomaResult<RelationshipResponse> {
        let _guard = self.write_guard()?;
        let source_entity = self.resolve_entity(&request.source_entity_id)?;
        let target_entity = self.resolve_entity(&request.target_entity_id)?;
        if source_entity.id == target_entity.id {
            return Err(ValidationError::SelfRelationship {
                entity_id: source_entity.id,
            }
            .into());
        }
        if let Some(source_id) = &request.source_id {
            if self.stores.sources.get(source_id).map_err(read_err)?.is_none() {
                return Err(ExecutionError::SourceNotFound {
                    id: source_id.clone(),
                }
                .into());
            }
        }

        let relationship = Relationship::new(
            request.relationship_type,
            source_entity.id,
            target_entity.id,
            Utc::now(),
        )
        .with_source(request.source_id)
        .with_metadata(request.metadata.unwrap_or(Value::Null));

        if let Some(existing) = self
            .stores
            .relationships
            .get(&relationship.id)
            .map_err(read_err)?
        {
            return Ok(RelationshipResponse {
                relationship: existing,
                created: false,
            });
        }

        if relationship.relationship_type.is_acyclic() {
            let edges = self
                .stores
                .relationships
                .list_by_type(&relationship.relationship_type)
                .map_err(read_err)?;
            if let Some(path) = graph::cycle_closed_by(
                &edges,
                &relationship.source_entity_id,
                &relationship.target_entity_id,
            ) {
                return Err(ExecutionError::CycleDetected {
                    relationship_type: relationship.relationship_type.to_string(),
                    path: path.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
        }

        self.stores
            .relationships
            .insert(relationship.clone())
            .map_err(write_err)?;
        tracing::info!(
            relationship_id = %relationship.id,
            relationship_type = %relationship.relationship_type,
            source = %relationship.source_entity_id,
            target = %relationship.target_entity_id,
            "created relationship"
        );
        Ok(RelationshipResponse {
            relationship,
            created: true,
        })
    }

    /// Lists edges around an entity, ordered by relationship ID.
    ///
    /// # Errors
    /// `ENTITY_NOT_FOUND` if the entity is unknown.
    pub fn list_relationships(
        &self,
        request: &ListRelationshipsRequest,
    ) -> NeotomaResult<RelationshipList> {
        let _guard = self.read_guard()?;
        let entity = self.resolve_entity(&request.entity_id)?;
        let mut relationships: Vec<Relationship> = self
            .stores
            .relationships
            .list_for_entity(&entity.id)
            .map_err(read_err)?
            .into_iter()
            .filter(|r| r.matches_direction(&entity.id, request.direction))
            .filter(|r| {
                request
                    .relationship_type
                    .as_ref()
                    .map_or(true, |ty| &r.relationship_type == ty)
            })
            .collect();
        relationships.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(RelationshipList {
            entity_id: entity.id,
            relationships,
        })
    }

    /// Lists timeline events; an `entity_id` filter follows merges.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for a zero limit; `ENTITY_NOT_FOUND` if the
    /// filtered entity is unknown.
    pub fn list_timeline_events(&self, mut filter: TimelineFilter) -> NeotomaResult<TimelineResponse> {
        check_limit(filter.limit)?;
        let _guard = self.read_guard()?;
        if let Some(id) = filter.entity_id.take() {
            filter.entity_id = Some(self.resolve_entity(&id)?.id);
        }
        let events = self.stores.timeline.list(&filter).map_err(read_err)?;
        Ok(TimelineResponse {
            limit: filter.effective_limit(),
            offset: filter.offset,
            events,
        })
    }

    /// Ranked search over snapshots.
    ///
    /// Reads the index as it is; call [`TruthEngine::sync_index`] first to
    /// see every completed write.
    ///
    /// # Errors
    /// `VALIDATION_ERROR` for a zero limit; internal errors from the index.
    pub fn retrieve_entities(&self, request: &SearchRequest) -> NeotomaResult<SearchResults> {
        check_limit(request.limit)?;
        self.index.search(
            request,
            self.config.search_default_limit,
            self.config.search_max_limit,
        )
    }

    /// Checks for orphans and cycles.
    ///
    /// # Errors
    /// Storage errors.
    pub fn check_graph_integrity(&self) -> NeotomaResult<IntegrityReport> {
        let _guard = self.read_guard()?;
        let entities = self.stores.entities.list().map_err(read_err)?;
        let observations = self.stores.observations.list_all().map_err(read_err)?;
        let relationships = self.stores.relationships.list_all().map_err(read_err)?;
        let report = graph::check_integrity(&entities, &observations, &relationships);
        if !report.healthy() {
            tracing::warn!(
                orphan_relationships = report.orphan_relationships.len(),
                orphan_observations = report.orphan_observations.len(),
                orphan_entities = report.orphan_entities.len(),
                cycles = report.cycles.len(),
                "graph integrity check failed"
            );
        }
        Ok(report)
    }

    /// Registered entity schemas, ordered by type.
    ///
    /// # Errors
    /// Internal errors from the registry.
    pub fn list_entity_types(&self) -> NeotomaResult<EntityTypeList> {
        Ok(EntityTypeList {
            entity_types: self.schemas.list()?,
        })
    }

    // --- Index ---

    /// Waits until the search index has applied every queued update.
    ///
    /// # Errors
    /// `INDEX_TIMEOUT` if that takes longer than `timeout`.
    pub fn await_index(&self, timeout: Duration) -> NeotomaResult<()> {
        self.indexer.barrier(timeout)
    }

    /// [`TruthEngine::await_index`] with the configured timeout.
    ///
    /// # Errors
    /// `INDEX_TIMEOUT`.
    pub fn sync_index(&self) -> NeotomaResult<()> {
        self.await_index(self.config.index_sync_timeout)
    }

    /// Current store and index sizes.
    ///
    /// # Errors
    /// Storage errors.
    pub fn stats(&self) -> NeotomaResult<EngineStats> {
        let _guard = self.read_guard()?;
        let entities = self
            .stores
            .entities
            .list()
            .map_err(read_err)?
            .iter()
            .filter(|e| !e.is_merged())
            .count();
        Ok(EngineStats {
            entities,
            snapshots: self.stores.snapshots.len().map_err(read_err)?,
            indexed: self.index.len()?,
            index_queue_depth: self.indexer.queue_depth(),
        })
    }
}
