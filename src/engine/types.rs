//! Request and response types of the engine operations.
//!
//! Requests deserialize with unknown fields rejected so that typos in agent
//! calls surface as validation errors instead of silently doing less.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, EntityType};
use crate::ids::{EntityId, ObservationId, SourceId};
use crate::observation::Observation;
use crate::relationship::{Direction, Relationship, RelationshipType};
use crate::schema::{EntitySchema, MergePolicy};
use crate::snapshot::EntitySnapshot;
use crate::source::{InterpretationStatus, SourceKind, SourceMaterial};
use crate::timeline::TimelineEvent;

/// Default page size for observation listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Largest page size for observation listings.
pub const MAX_PAGE_LIMIT: usize = 500;

/// Structured records submitted directly by an agent.
///
/// Each record is a JSON object holding `entity_type` plus the observed
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitPayloadRequest {
    /// Non-empty list of record objects.
    pub records: Vec<Value>,

    /// Overrides the default payload priority; `0..=999`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_priority: Option<i32>,

    /// Caller recorded on the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// When the facts were observed; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Raw content uploaded as a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadSourceRequest {
    /// File content as text.
    pub content: String,

    /// JSON content (`application/json` or `+json`) is interpreted.
    pub mime_type: String,

    /// Original file name, kept as metadata only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Caller recorded on the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// When the facts were observed; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// One record turned into an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedRecord {
    /// Position of the record in its source.
    pub ordinal: u32,
    /// Observation written for the record.
    pub observation_id: ObservationId,
    /// Entity the record resolved to.
    pub entity_id: EntityId,
    /// Type of that entity.
    pub entity_type: EntityType,
}

/// Result of `submit_payload` and `upload_source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Content-derived ID of the source.
    pub source_id: SourceId,
    /// True if the source already existed and nothing was written.
    pub deduplicated: bool,
    /// How the source was interpreted.
    pub interpretation: InterpretationStatus,
    /// Records in source order.
    pub records: Vec<IngestedRecord>,
}

/// Source metadata without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source ID.
    pub id: SourceId,
    /// Payload or file.
    pub kind: SourceKind,
    /// MIME type given at upload.
    pub mime_type: String,
    /// Original file name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Content length in bytes.
    pub byte_size: usize,
    /// Agent that submitted the source, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// When the source was stored.
    pub created_at: DateTime<Utc>,
}

impl From<&SourceMaterial> for SourceSummary {
    fn from(source: &SourceMaterial) -> Self {
        Self {
            id: source.id.clone(),
            kind: source.kind,
            mime_type: source.mime_type.clone(),
            file_name: source.file_name.clone(),
            byte_size: source.byte_size,
            agent_id: source.agent_id.clone(),
            created_at: source.created_at,
        }
    }
}

/// Looks up one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetSourceRequest {
    /// Source to fetch.
    pub source_id: SourceId,
}

/// Looks up one entity; merged IDs resolve to their target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetEntityRequest {
    /// Entity to fetch.
    pub entity_id: EntityId,
}

/// An entity together with its current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshotResponse {
    /// The ID the caller asked for; differs from `entity.id` after a merge.
    pub requested_id: EntityId,
    /// The live entity.
    pub entity: Entity,
    /// Its current snapshot.
    pub snapshot: EntitySnapshot,
}

/// Pages through the observations of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListObservationsRequest {
    /// Entity whose observations to list.
    pub entity_id: EntityId,
    /// Page size; at least 1, clamped to [`MAX_PAGE_LIMIT`].
    #[serde(default)]
    pub limit: Option<usize>,
    /// Observations to skip.
    #[serde(default)]
    pub offset: usize,
}

/// A page of observations in ascending recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationPage {
    /// The resolved entity.
    pub entity_id: EntityId,
    /// Observations before paging.
    pub total: usize,
    /// Page size applied.
    pub limit: usize,
    /// Observations skipped.
    pub offset: usize,
    /// The page.
    pub observations: Vec<Observation>,
}

/// Asks where one snapshot field came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldProvenanceRequest {
    /// Entity to inspect.
    pub entity_id: EntityId,
    /// Snapshot field name.
    pub field: String,
}

/// Where a snapshot field's value came from, with the full records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenanceResponse {
    /// The resolved entity.
    pub entity_id: EntityId,
    /// Field name.
    pub field: String,
    /// Current snapshot value.
    pub value: Value,
    /// Merge policy that chose the value.
    pub policy: MergePolicy,
    /// Observations that contributed the value.
    pub observations: Vec<Observation>,
    /// Sources of those observations.
    pub sources: Vec<SourceSummary>,
}

/// Overrides one field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrectRequest {
    /// Entity to correct.
    pub entity_id: EntityId,
    /// Field to override.
    pub field: String,
    /// New value.
    pub value: Value,
    /// Free-text reason stored with the correction source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Caller recorded on the correction source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Result of `correct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResponse {
    /// The resolved entity.
    pub entity_id: EntityId,
    /// Corrected field.
    pub field: String,
    /// Correction source.
    pub source_id: SourceId,
    /// Correction observation.
    pub observation_id: ObservationId,
    /// Snapshot after the correction.
    pub snapshot: EntitySnapshot,
}

/// Folds one entity into another of the same type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeEntitiesRequest {
    /// Entity that stops being live.
    pub from_entity_id: EntityId,
    /// Entity that receives everything.
    pub to_entity_id: EntityId,
}

/// Result of `merge_entities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    /// Merged entity.
    pub from_entity_id: EntityId,
    /// Surviving entity.
    pub to_entity_id: EntityId,
    /// Observations moved to the target.
    pub observations_moved: usize,
    /// Edges redirected or dropped as self-loops.
    pub relationships_rewritten: usize,
    /// Timeline events moved to the target.
    pub timeline_events_moved: usize,
    /// Target snapshot after the merge.
    pub snapshot: EntitySnapshot,
}

/// Creates a typed edge between two live entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRelationshipRequest {
    /// UPPER_SNAKE_CASE edge type.
    pub relationship_type: RelationshipType,
    /// Edge start.
    pub source_entity_id: EntityId,
    /// Edge end.
    pub target_entity_id: EntityId,
    /// Source material the edge was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    /// Opaque JSON kept with the edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Result of `create_relationship`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipResponse {
    /// The stored edge.
    pub relationship: Relationship,
    /// False if an identical edge already existed.
    pub created: bool,
}

/// Lists the edges touching an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListRelationshipsRequest {
    /// Entity whose edges to list.
    pub entity_id: EntityId,
    /// Which end the entity must be on.
    #[serde(default)]
    pub direction: Direction,
    /// Only edges of this type.
    #[serde(default)]
    pub relationship_type: Option<RelationshipType>,
}

/// Result of `list_relationships`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipList {
    /// The resolved entity.
    pub entity_id: EntityId,
    /// Matching edges.
    pub relationships: Vec<Relationship>,
}

/// Result of `list_timeline_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineResponse {
    /// Page size applied.
    pub limit: usize,
    /// Events skipped.
    pub offset: usize,
    /// Events in timestamp order.
    pub events: Vec<TimelineEvent>,
}

/// Result of `list_entity_types`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeList {
    /// Registered schemas ordered by type.
    pub entity_types: Vec<EntitySchema>,
}

/// Counts reported by [`super::TruthEngine::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Live entities.
    pub entities: usize,
    /// Stored snapshots.
    pub snapshots: usize,
    /// Documents in the search index.
    pub indexed: usize,
    /// Index commands not yet applied.
    pub index_queue_depth: usize,
}

/// Empty argument object for actions that take none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArguments {}

/// Extra fields of a record beyond `entity_type`, in a stable order.
pub(crate) type FieldMap = BTreeMap<String, Value>;
