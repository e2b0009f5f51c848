//! Entity snapshots: the reducer's current-truth view of an entity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::ids::{EntityId, ObservationId, SourceId};
use crate::schema::MergePolicy;

/// Where a snapshot field's value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    /// Policy that picked the value.
    pub policy: MergePolicy,

    /// Winning observation(s); all contributors for `merge_array`.
    pub observation_ids: Vec<ObservationId>,

    /// Sources of those observations.
    pub source_ids: Vec<SourceId>,
}

/// Merged view of an entity, computed from all of its observations.
///
/// Snapshots are a pure function of the observation set: they are never
/// persisted and can always be recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity.
    pub entity_id: EntityId,

    /// Its type.
    pub entity_type: EntityType,

    /// Version of the schema used to reduce.
    pub schema_version: String,

    /// Copied from the entity.
    pub canonical_name: String,

    /// Reduced field values.
    pub fields: BTreeMap<String, serde_json::Value>,

    /// One entry per key in `fields`.
    pub provenance: BTreeMap<String, FieldProvenance>,

    /// Observations the snapshot was reduced from.
    pub observation_count: usize,

    /// Latest `observed_at` among the reduced observations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<DateTime<Utc>>,
}

impl EntitySnapshot {
    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Returns true if no observation contributed a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
