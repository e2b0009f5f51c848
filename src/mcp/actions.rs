//! The MCP action catalog.
//!
//! Every engine operation exposed to agents is one [`Action`]. The catalog
//! is static: names, descriptions, input schemas and consistency tiers do
//! not depend on runtime state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ExecutionError;

/// Freshness guarantee of an action's reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyTier {
    /// Serialized by the writer lock; reads see every completed write.
    Strong,
    /// Served from the search index, which trails writes by the indexer queue.
    BoundedEventual,
}

impl ConsistencyTier {
    /// Wire name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::BoundedEventual => "bounded_eventual",
        }
    }
}

impl fmt::Display for ConsistencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One callable action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Ingest structured records.
    SubmitPayload,
    /// Ingest raw file content.
    UploadSource,
    /// Fetch one source.
    GetSource,
    /// Ranked search over snapshots.
    RetrieveEntities,
    /// Fetch an entity and its snapshot.
    GetEntitySnapshot,
    /// Page through an entity's observations.
    ListObservations,
    /// Explain one snapshot field.
    GetFieldProvenance,
    /// Override one field.
    Correct,
    /// Fold one entity into another.
    MergeEntities,
    /// Add a typed edge.
    CreateRelationship,
    /// List the edges of an entity.
    ListRelationships,
    /// Query dated events.
    ListTimelineEvents,
    /// Report orphans and cycles.
    CheckGraphIntegrity,
    /// List registered schemas.
    ListEntityTypes,
}

impl Action {
    /// The full catalog, in listing order.
    pub const ALL: [Self; 14] = [
        Self::SubmitPayload,
        Self::UploadSource,
        Self::GetSource,
        Self::RetrieveEntities,
        Self::GetEntitySnapshot,
        Self::ListObservations,
        Self::GetFieldProvenance,
        Self::Correct,
        Self::MergeEntities,
        Self::CreateRelationship,
        Self::ListRelationships,
        Self::ListTimelineEvents,
        Self::CheckGraphIntegrity,
        Self::ListEntityTypes,
    ];

    /// Wire name of the action.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SubmitPayload => "submit_payload",
            Self::UploadSource => "upload_source",
            Self::GetSource => "get_source",
            Self::RetrieveEntities => "retrieve_entities",
            Self::GetEntitySnapshot => "get_entity_snapshot",
            Self::ListObservations => "list_observations",
            Self::GetFieldProvenance => "get_field_provenance",
            Self::Correct => "correct",
            Self::MergeEntities => "merge_entities",
            Self::CreateRelationship => "create_relationship",
            Self::ListRelationships => "list_relationships",
            Self::ListTimelineEvents => "list_timeline_events",
            Self::CheckGraphIntegrity => "check_graph_integrity",
            Self::ListEntityTypes => "list_entity_types",
        }
    }

    /// How fresh the data an action reads is.
    #[must_use]
    pub const fn consistency(self) -> ConsistencyTier {
        match self {
            Self::RetrieveEntities => ConsistencyTier::BoundedEventual,
            _ => ConsistencyTier::Strong,
        }
    }

    /// Returns true if the action never writes.
    #[must_use]
    pub const fn read_only(self) -> bool {
        !matches!(
            self,
            Self::SubmitPayload
                | Self::UploadSource
                | Self::Correct
                | Self::MergeEntities
                | Self::CreateRelationship
        )
    }

    /// Tool description shown to agents.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::SubmitPayload => {
                "Submit structured records. Each record is an object with entity_type plus observed fields. Identical payloads are deduplicated."
            }
            Self::UploadSource => {
                "Upload raw content as a file source. JSON content is interpreted into observations; other content is stored as-is."
            }
            Self::GetSource => "Fetch stored source material by source ID.",
            Self::RetrieveEntities => {
                "Search entity snapshots by name and field text. Results are deterministically ranked."
            }
            Self::GetEntitySnapshot => {
                "Get the current merged snapshot of an entity. Merged entity IDs resolve to their target."
            }
            Self::ListObservations => "List an entity's observations, oldest first.",
            Self::GetFieldProvenance => {
                "Explain a snapshot field: its value, merge policy, and contributing observations and sources."
            }
            Self::Correct => {
                "Override an entity field. Corrections carry the highest source priority."
            }
            Self::MergeEntities => {
                "Merge one entity into another of the same type. Observations, relationships and timeline events move to the target."
            }
            Self::CreateRelationship => {
                "Create a typed, directed relationship between two entities. Idempotent; acyclic types reject cycles."
            }
            Self::ListRelationships => "List relationships of an entity, filtered by direction and type.",
            Self::ListTimelineEvents => {
                "List dated events extracted from observations, ordered by timestamp."
            }
            Self::CheckGraphIntegrity => {
                "Report orphan relationships, observations and entities, and cycles in acyclic relationship types."
            }
            Self::ListEntityTypes => "List registered entity types with their merge policies.",
        }
    }

    /// JSON Schema of the action's arguments.
    #[must_use]
    pub fn input_schema(self) -> Value {
        let entity_id = json!({"type": "string", "description": "Entity ID (ent_...)"});
        match self {
            Self::SubmitPayload => json!({
                "type": "object",
                "properties": {
                    "records": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {"entity_type": {"type": "string"}},
                            "required": ["entity_type"]
                        }
                    },
                    "source_priority": {"type": "integer", "minimum": 0, "maximum": 999},
                    "agent_id": {"type": "string"},
                    "observed_at": {"type": "string", "format": "date-time"}
                },
                "required": ["records"],
                "additionalProperties": false
            }),
            Self::UploadSource => json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                    "mime_type": {"type": "string"},
                    "file_name": {"type": "string"},
                    "agent_id": {"type": "string"},
                    "observed_at": {"type": "string", "format": "date-time"}
                },
                "required": ["content", "mime_type"],
                "additionalProperties": false
            }),
            Self::GetSource => json!({
                "type": "object",
                "properties": {"source_id": {"type": "string"}},
                "required": ["source_id"],
                "additionalProperties": false
            }),
            Self::RetrieveEntities => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "entity_type": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1},
                    "offset": {"type": "integer", "minimum": 0}
                },
                "additionalProperties": false
            }),
            Self::GetEntitySnapshot => json!({
                "type": "object",
                "properties": {"entity_id": entity_id},
                "required": ["entity_id"],
                "additionalProperties": false
            }),
            Self::ListObservations => json!({
                "type": "object",
                "properties": {
                    "entity_id": entity_id,
                    "limit": {"type": "integer", "minimum": 1, "maximum": 500},
                    "offset": {"type": "integer", "minimum": 0}
                },
                "required": ["entity_id"],
                "additionalProperties": false
            }),
            Self::GetFieldProvenance => json!({
                "type": "object",
                "properties": {"entity_id": entity_id, "field": {"type": "string"}},
                "required": ["entity_id", "field"],
                "additionalProperties": false
            }),
            Self::Correct => json!({
                "type": "object",
                "properties": {
                    "entity_id": entity_id,
                    "field": {"type": "string"},
                    "value": {},
                    "reason": {"type": "string"},
                    "agent_id": {"type": "string"}
                },
                "required": ["entity_id", "field", "value"],
                "additionalProperties": false
            }),
            Self::MergeEntities => json!({
                "type": "object",
                "properties": {"from_entity_id": entity_id, "to_entity_id": entity_id},
                "required": ["from_entity_id", "to_entity_id"],
                "additionalProperties": false
            }),
            Self::CreateRelationship => json!({
                "type": "object",
                "properties": {
                    "relationship_type": {"type": "string", "pattern": "^[A-Z][A-Z0-9_]{0,63}$"},
                    "source_entity_id": entity_id,
                    "target_entity_id": entity_id,
                    "source_id": {"type": "string"},
                    "metadata": {}
                },
                "required": ["relationship_type", "source_entity_id", "target_entity_id"],
                "additionalProperties": false
            }),
            Self::ListRelationships => json!({
                "type": "object",
                "properties": {
                    "entity_id": entity_id,
                    "direction": {"type": "string", "enum": ["outgoing", "incoming", "both"]},
                    "relationship_type": {"type": "string"}
                },
                "required": ["entity_id"],
                "additionalProperties": false
            }),
            Self::ListTimelineEvents => json!({
                "type": "object",
                "properties": {
                    "start": {"type": "string", "format": "date-time"},
                    "end": {"type": "string", "format": "date-time"},
                    "entity_id": entity_id,
                    "event_type": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 500},
                    "offset": {"type": "integer", "minimum": 0}
                },
                "additionalProperties": false
            }),
            Self::CheckGraphIntegrity | Self::ListEntityTypes => json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| ExecutionError::UnknownAction {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_round_trip() {
        let names: HashSet<&str> = Action::ALL.iter().map(|a| a.name()).collect();
        assert_eq!(names.len(), Action::ALL.len());
        for action in Action::ALL {
            assert_eq!(action.name().parse::<Action>().unwrap(), action);
            assert_eq!(
                serde_json::to_value(action).unwrap(),
                Value::String(action.name().to_string())
            );
        }
        assert!("drop_everything".parse::<Action>().is_err());
    }

    #[test]
    fn only_search_is_bounded_eventual() {
        let eventual: Vec<Action> = Action::ALL
            .into_iter()
            .filter(|a| a.consistency() == ConsistencyTier::BoundedEventual)
            .collect();
        assert_eq!(eventual, vec![Action::RetrieveEntities]);
    }

    #[test]
    fn writes_are_not_read_only() {
        assert!(!Action::SubmitPayload.read_only());
        assert!(!Action::MergeEntities.read_only());
        assert!(Action::GetEntitySnapshot.read_only());
        assert!(Action::CheckGraphIntegrity.read_only());
    }

    #[test]
    fn schemas_are_objects() {
        for action in Action::ALL {
            let schema = action.input_schema();
            assert_eq!(schema["type"], "object", "{action}");
            assert!(!action.description().is_empty());
        }
    }
}
