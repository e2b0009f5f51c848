//! Content-derived identifiers.
//!
//! Every stored record in Neotoma is addressed by an ID derived from its
//! content, so replaying the same input always lands on the same IDs.
//! IDs render as `<prefix>_<32 hex chars>`, the hex being the first 128 bits
//! of a BLAKE3 digest over length-prefixed parts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

const HEX_LEN: usize = 32;

/// Hashes length-prefixed parts and renders `<prefix>_<hex>`.
fn derive(prefix: &str, parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix.as_bytes());
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let hex = hasher.finalize().to_hex();
    format!("{prefix}_{}", &hex.as_str()[..HEX_LEN])
}

fn validate(kind: &'static str, prefix: &str, raw: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidId {
        kind,
        value: raw.to_string(),
    };
    let rest = raw
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('_'))
        .ok_or_else(invalid)?;
    if rest.len() != HEX_LEN || !rest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(invalid());
    }
    Ok(())
}

macro_rules! content_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// ID prefix used on the wire.
            pub const PREFIX: &'static str = $prefix;

            /// Parses and validates an ID string.
            ///
            /// # Errors
            /// Returns `InvalidId` if the prefix or digest shape is wrong.
            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                let raw = raw.trim();
                validate($kind, $prefix, raw)?;
                Ok(Self(raw.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

content_id!(
    /// Content-addressed identifier of a source material.
    SourceId,
    "src",
    "source"
);
content_id!(
    /// Identifier of an observation: source, entity and ordinal within the source.
    ObservationId,
    "obs",
    "observation"
);
content_id!(
    /// Hash-based entity identifier: entity type plus normalized identifier.
    EntityId,
    "ent",
    "entity"
);
content_id!(
    /// Identifier of a typed, directed relationship between two entities.
    RelationshipId,
    "rel",
    "relationship"
);
content_id!(
    /// Identifier of a timeline event extracted from an observation field.
    EventId,
    "evt",
    "event"
);

impl SourceId {
    /// Derives the ID of a source from its raw bytes.
    #[must_use]
    pub fn for_content(content: &[u8]) -> Self {
        Self(derive(Self::PREFIX, &[content]))
    }
}

impl EntityId {
    /// Derives the ID of an entity from its type and normalized identifier.
    #[must_use]
    pub fn for_key(entity_type: &str, normalized_key: &str) -> Self {
        Self(derive(
            Self::PREFIX,
            &[entity_type.as_bytes(), normalized_key.as_bytes()],
        ))
    }
}

impl ObservationId {
    /// Derives the ID of the `ordinal`-th observation a source made about an entity.
    #[must_use]
    pub fn for_record(source: &SourceId, entity: &EntityId, ordinal: u32) -> Self {
        Self(derive(
            Self::PREFIX,
            &[
                source.as_str().as_bytes(),
                entity.as_str().as_bytes(),
                &ordinal.to_le_bytes(),
            ],
        ))
    }
}

impl RelationshipId {
    /// Derives the ID of a relationship from its type and endpoints.
    #[must_use]
    pub fn for_edge(relationship_type: &str, source: &EntityId, target: &EntityId) -> Self {
        Self(derive(
            Self::PREFIX,
            &[
                relationship_type.as_bytes(),
                source.as_str().as_bytes(),
                target.as_str().as_bytes(),
            ],
        ))
    }
}

impl EventId {
    /// Derives the ID of the event an observation field produced.
    #[must_use]
    pub fn for_field(observation: &ObservationId, field: &str) -> Self {
        Self(derive(
            Self::PREFIX,
            &[observation.as_str().as_bytes(), field.as_bytes()],
        ))
    }
}

/// Per-request correlation ID. Never feeds into content hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(Uuid);

impl TraceId {
    /// Creates a new random trace ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_is_content_addressed() {
        let a = SourceId::for_content(b"hello");
        let b = SourceId::for_content(b"hello");
        let c = SourceId::for_content(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("src_"));
        assert_eq!(a.as_str().len(), 4 + HEX_LEN);
    }

    #[test]
    fn test_length_prefix_prevents_part_ambiguity() {
        let a = EntityId::for_key("ab", "c");
        let b = EntityId::for_key("a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = EntityId::for_key("person", "ada lovelace");
        let parsed = EntityId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_wrong_prefix() {
        let id = SourceId::for_content(b"x");
        let err = EntityId::parse(id.as_str()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidId { kind: "entity", .. }));
    }

    #[test]
    fn test_parse_rejects_bad_digest() {
        assert!(EntityId::parse("ent_xyz").is_err());
        assert!(EntityId::parse("ent_0123456789ABCDEF0123456789ABCDEF").is_err());
        assert!(EntityId::parse("").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok = serde_json::to_string(&EntityId::for_key("company", "acme")).unwrap();
        let back: EntityId = serde_json::from_str(&ok).unwrap();
        assert_eq!(back, EntityId::for_key("company", "acme"));

        let bad: Result<EntityId, _> = serde_json::from_str("\"ent_nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_observation_id_depends_on_ordinal() {
        let src = SourceId::for_content(b"payload");
        let ent = EntityId::for_key("person", "ada");
        assert_ne!(
            ObservationId::for_record(&src, &ent, 0),
            ObservationId::for_record(&src, &ent, 1)
        );
    }

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(TraceId::new(), TraceId::new());
    }
}
