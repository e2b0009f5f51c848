//! Typed, directed relationships between entities.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{EntityId, RelationshipId, SourceId};

fn relationship_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]{0,63}$").expect("valid regex literal"))
}

/// Relationship types whose edges must never form a cycle.
pub const ACYCLIC_TYPES: &[&str] = &["PART_OF", "SUPERSEDES", "DEPENDS_ON", "CORRECTS"];

/// Validated relationship type (UPPER_SNAKE_CASE).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationshipType(String);

impl RelationshipType {
    /// Validates and wraps a relationship type.
    ///
    /// # Errors
    /// Returns `InvalidRelationshipType` unless the name is UPPER_SNAKE_CASE.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let trimmed = name.trim();
        if !relationship_type_re().is_match(trimmed) {
            return Err(ValidationError::InvalidRelationshipType { value: name });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if edges of this type must stay acyclic.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        ACYCLIC_TYPES.contains(&self.0.as_str())
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelationshipType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelationshipType> for String {
    fn from(ty: RelationshipType) -> Self {
        ty.0
    }
}

/// Which edges of an entity to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges starting at the entity.
    Outgoing,
    /// Edges ending at the entity.
    Incoming,
    /// Either end.
    #[default]
    Both,
}

/// A directed edge `source_entity_id -[relationship_type]-> target_entity_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Derived from the type and both endpoints.
    pub id: RelationshipId,

    /// Edge type.
    pub relationship_type: RelationshipType,

    /// Edge start.
    pub source_entity_id: EntityId,

    /// Edge end.
    pub target_entity_id: EntityId,

    /// Source material that asserted the relationship, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,

    /// Opaque caller data; `null` when absent.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,

    /// When the edge was first created.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Creates a relationship with a derived ID.
    #[must_use]
    pub fn new(
        relationship_type: RelationshipType,
        source_entity_id: EntityId,
        target_entity_id: EntityId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RelationshipId::for_edge(
                relationship_type.as_str(),
                &source_entity_id,
                &target_entity_id,
            ),
            relationship_type,
            source_entity_id,
            target_entity_id,
            source_id: None,
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    /// Sets the asserting source.
    #[must_use]
    pub fn with_source(mut self, source_id: Option<SourceId>) -> Self {
        self.source_id = source_id;
        self
    }

    /// Sets free-form metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns true if either endpoint is `entity_id`.
    #[must_use]
    pub fn touches(&self, entity_id: &EntityId) -> bool {
        &self.source_entity_id == entity_id || &self.target_entity_id == entity_id
    }

    /// Returns true if this edge matches a direction filter relative to `entity_id`.
    #[must_use]
    pub fn matches_direction(&self, entity_id: &EntityId, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => &self.source_entity_id == entity_id,
            Direction::Incoming => &self.target_entity_id == entity_id,
            Direction::Both => self.touches(entity_id),
        }
    }

    /// Re-points endpoints from `from` to `to`.
    ///
    /// Returns `None` if the edge would become a self-loop. The returned
    /// relationship carries the ID of its new endpoints.
    #[must_use]
    pub fn redirected(&self, from: &EntityId, to: &EntityId) -> Option<Self> {
        let swap = |id: &EntityId| if id == from { to.clone() } else { id.clone() };
        let source = swap(&self.source_entity_id);
        let target = swap(&self.target_entity_id);
        if source == target {
            return None;
        }
        Some(
            Self::new(self.relationship_type.clone(), source, target, self.created_at)
                .with_source(self.source_id.clone())
                .with_metadata(self.metadata.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> EntityId {
        EntityId::for_key("company", name)
    }

    #[test]
    fn test_relationship_type_validation() {
        assert!(RelationshipType::new("PART_OF").is_ok());
        assert!(RelationshipType::new("REFERS_TO2").is_ok());
        assert!(RelationshipType::new("part_of").is_err());
        assert!(RelationshipType::new("_X").is_err());
        assert!(RelationshipType::new("").is_err());
    }

    #[test]
    fn test_acyclic_types() {
        assert!(RelationshipType::new("PART_OF").unwrap().is_acyclic());
        assert!(!RelationshipType::new("REFERS_TO").unwrap().is_acyclic());
    }

    #[test]
    fn test_id_is_derived_from_edge() {
        let ty = RelationshipType::new("PART_OF").unwrap();
        let now = Utc::now();
        let a = Relationship::new(ty.clone(), id("a"), id("b"), now);
        let b = Relationship::new(ty.clone(), id("a"), id("b"), now);
        let c = Relationship::new(ty, id("b"), id("a"), now);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_direction_filter() {
        let rel = Relationship::new(RelationshipType::new("OWNS").unwrap(), id("a"), id("b"), Utc::now());
        assert!(rel.matches_direction(&id("a"), Direction::Outgoing));
        assert!(!rel.matches_direction(&id("a"), Direction::Incoming));
        assert!(rel.matches_direction(&id("b"), Direction::Incoming));
        assert!(rel.matches_direction(&id("b"), Direction::Both));
        assert!(!rel.matches_direction(&id("c"), Direction::Both));
    }

    #[test]
    fn test_redirect() {
        let rel = Relationship::new(RelationshipType::new("OWNS").unwrap(), id("a"), id("b"), Utc::now());
        let moved = rel.redirected(&id("b"), &id("c")).unwrap();
        assert_eq!(moved.target_entity_id, id("c"));
        assert_ne!(moved.id, rel.id);
        assert_eq!(moved.created_at, rel.created_at);

        assert!(rel.redirected(&id("b"), &id("a")).is_none());
    }
}
