//! Observations: single source-derived facts about an entity.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::ids::{EntityId, ObservationId, SourceId};

/// Priority of observations interpreted from uploaded files.
pub const FILE_PRIORITY: i32 = 50;
/// Priority of observations from structured payloads.
pub const PAYLOAD_PRIORITY: i32 = 100;
/// Priority of corrections. Always above any caller-supplied priority.
pub const CORRECTION_PRIORITY: i32 = 1000;
/// Highest priority a caller may request for a payload.
pub const MAX_PAYLOAD_PRIORITY: i32 = 999;

/// A set of field values one source asserted about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Derived from the source ID and ordinal.
    pub id: ObservationId,

    /// Entity the fields describe; moves on merge.
    pub entity_id: EntityId,

    /// Type the record declared.
    pub entity_type: EntityType,

    /// Source the record came from.
    pub source_id: SourceId,

    /// Position of the record inside its source.
    pub ordinal: u32,

    /// Field values, `entity_type` excluded.
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Higher wins under `highest_priority`.
    pub source_priority: i32,

    /// When the facts were observed.
    pub observed_at: DateTime<Utc>,

    /// Why a correction was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Observation {
    /// Creates an observation with a derived ID.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        entity_type: EntityType,
        source_id: SourceId,
        ordinal: u32,
        fields: BTreeMap<String, serde_json::Value>,
        source_priority: i32,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObservationId::for_record(&source_id, &entity_id, ordinal),
            entity_id,
            entity_type,
            source_id,
            ordinal,
            fields,
            source_priority,
            observed_at,
            reason: None,
        }
    }

    /// Attaches a free-form reason (used by corrections).
    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Returns the non-null value of a field, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Orders by `(observed_at, source_priority, id)`.
    #[must_use]
    pub fn cmp_recency(&self, other: &Self) -> Ordering {
        self.observed_at
            .cmp(&other.observed_at)
            .then_with(|| self.source_priority.cmp(&other.source_priority))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Orders by `(source_priority, observed_at, id)`.
    #[must_use]
    pub fn cmp_priority(&self, other: &Self) -> Ordering {
        self.source_priority
            .cmp(&other.source_priority)
            .then_with(|| self.observed_at.cmp(&other.observed_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn obs(ordinal: u32, priority: i32, at: DateTime<Utc>) -> Observation {
        let ty = EntityType::new("person").unwrap();
        let entity = EntityId::for_key("person", "ada");
        let source = SourceId::for_content(b"src");
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        fields.insert("phone".to_string(), serde_json::Value::Null);
        Observation::new(entity, ty, source, ordinal, fields, priority, at)
    }

    #[test]
    fn test_field_skips_null() {
        let o = obs(0, 100, Utc::now());
        assert_eq!(o.field("name"), Some(&json!("Ada")));
        assert_eq!(o.field("phone"), None);
        assert_eq!(o.field("missing"), None);
    }

    #[test]
    fn test_recency_order() {
        let now = Utc::now();
        let older = obs(0, 500, now - Duration::seconds(1));
        let newer = obs(1, 1, now);
        assert_eq!(older.cmp_recency(&newer), Ordering::Less);
        assert_eq!(older.cmp_priority(&newer), Ordering::Greater);
    }

    #[test]
    fn test_ties_break_on_id() {
        let now = Utc::now();
        let a = obs(0, 100, now);
        let b = obs(1, 100, now);
        assert_ne!(a.cmp_recency(&b), Ordering::Equal);
        assert_eq!(a.cmp_recency(&b), a.id.cmp(&b.id));
    }
}
