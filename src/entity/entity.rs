//! Entity types and identity management.
//!
//! An entity is a deduplicated real-world object. Its ID is derived from the
//! entity type and the normalized identifier, so every spelling that
//! normalizes the same way lands on the same entity.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::EntityId;

fn entity_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex literal"))
}

/// Validated entity type name (lowercase snake_case).
///
/// # Examples
///
/// ```
/// use neotoma::EntityType;
///
/// let ty = EntityType::new("invoice").unwrap();
/// assert_eq!(ty.as_str(), "invoice");
/// assert!(EntityType::new("Not A Type").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Validates and wraps an entity type name.
    ///
    /// # Errors
    /// Returns `InvalidEntityType` unless the name is lowercase snake_case.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let trimmed = name.trim();
        if !entity_type_re().is_match(trimmed) {
            return Err(ValidationError::InvalidEntityType { value: name });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityType> for String {
    fn from(ty: EntityType) -> Self {
        ty.0
    }
}

/// The anchor of identity in Neotoma.
///
/// Observations attach to entities via [`EntityId`]. A merged entity keeps
/// its record with `merged_into` set so that old IDs keep resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Derived from the type and normalized key.
    pub id: EntityId,

    /// Schema the entity belongs to.
    pub entity_type: EntityType,

    /// First spelling of the identifier seen for this entity.
    pub canonical_name: String,

    /// Identifier after normalization; the input to the ID.
    pub normalized_key: String,

    /// Other spellings seen, in first-seen order.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// When the entity was first resolved.
    pub created_at: DateTime<Utc>,
    /// Last alias, version or merge change.
    pub updated_at: DateTime<Utc>,

    /// Bumped on every change to the record.
    pub version: u64,

    /// Set once the entity has been merged into another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<EntityId>,
}

impl Entity {
    /// Creates a new entity; the ID is derived from type and key.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        canonical_name: impl Into<String>,
        normalized_key: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let normalized_key = normalized_key.into();
        Self {
            id: EntityId::for_key(entity_type.as_str(), &normalized_key),
            entity_type,
            canonical_name: canonical_name.into(),
            normalized_key,
            aliases: Vec::new(),
            created_at: at,
            updated_at: at,
            version: 1,
            merged_into: None,
        }
    }

    /// Adds an alias, returning true if the entity changed.
    pub fn add_alias(&mut self, alias: impl Into<String>, at: DateTime<Utc>) -> bool {
        let alias = alias.into();
        let alias = alias.trim();
        if alias.is_empty() || alias == self.canonical_name || self.aliases.iter().any(|a| a == alias)
        {
            return false;
        }
        self.aliases.push(alias.to_string());
        self.touch(at);
        true
    }

    /// Marks this entity as merged into `target`.
    pub fn mark_merged(&mut self, target: EntityId, at: DateTime<Utc>) {
        self.merged_into = Some(target);
        self.touch(at);
    }

    /// Returns true if this entity was merged into another.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    /// Every name this entity is known by, canonical name first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
        self.version += 1;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityType {
        EntityType::new("person").unwrap()
    }

    #[test]
    fn test_entity_type_validation() {
        assert!(EntityType::new("person").is_ok());
        assert!(EntityType::new("bank_account2").is_ok());
        assert!(EntityType::new(" invoice ").is_ok());
        assert!(EntityType::new("").is_err());
        assert!(EntityType::new("Person").is_err());
        assert!(EntityType::new("2fa").is_err());
        assert!(EntityType::new("a-b").is_err());
        assert!(EntityType::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_entity_type_serde_validates() {
        let ty: EntityType = serde_json::from_str("\"company\"").unwrap();
        assert_eq!(ty.as_str(), "company");
        assert!(serde_json::from_str::<EntityType>("\"Company Inc\"").is_err());
    }

    #[test]
    fn test_entity_id_is_derived() {
        let now = Utc::now();
        let a = Entity::new(person(), "Ada Lovelace", "ada lovelace", now);
        let b = Entity::new(person(), "ADA LOVELACE", "ada lovelace", now);
        assert_eq!(a.id, b.id);
        assert_eq!(a.version, 1);
    }

    #[test]
    fn test_add_alias() {
        let now = Utc::now();
        let mut entity = Entity::new(person(), "Ada Lovelace", "ada lovelace", now);
        assert!(entity.add_alias("ada lovelace", now));
        assert!(!entity.add_alias("ada lovelace", now));
        assert!(!entity.add_alias("Ada Lovelace", now));
        assert!(!entity.add_alias("  ", now));
        assert_eq!(entity.aliases, vec!["ada lovelace".to_string()]);
        assert_eq!(entity.version, 2);
        assert_eq!(entity.names().count(), 2);
    }

    #[test]
    fn test_mark_merged() {
        let now = Utc::now();
        let target = Entity::new(person(), "Ada", "ada", now);
        let mut entity = Entity::new(person(), "A. Lovelace", "a lovelace", now);
        entity.mark_merged(target.id.clone(), now);
        assert!(entity.is_merged());
        assert_eq!(entity.merged_into, Some(target.id));
    }

    #[test]
    fn test_entity_serialization() {
        let entity = Entity::new(person(), "Ada", "ada", Utc::now());
        let json = serde_json::to_string(&entity).unwrap();
        assert!(!json.contains("merged_into"));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, entity.id);
        assert_eq!(back.canonical_name, "Ada");
    }
}
