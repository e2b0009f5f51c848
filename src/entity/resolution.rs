//! Identifier normalization for entity resolution.
//!
//! Resolution keys are lowercase, trimmed, punctuation-free and stripped of
//! trailing type-specific suffixes ("Inc", "LLC", "Jr", ...). Email-like
//! identifiers are only trimmed and lowercased.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::ids::EntityId;

use super::EntityType;

const ORGANIZATION_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "ltd",
    "limited",
    "corp",
    "corporation",
    "co",
    "company",
    "gmbh",
    "plc",
    "ag",
    "sa",
    "bv",
];

const PERSON_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "phd", "md", "esq"];

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex literal"))
}

fn suffixes_for(entity_type: &EntityType) -> &'static [&'static str] {
    match entity_type.as_str() {
        "company" | "organization" => ORGANIZATION_SUFFIXES,
        "person" => PERSON_SUFFIXES,
        _ => &[],
    }
}

/// Normalizes a raw identifier into a resolution key.
///
/// # Errors
/// Returns `EmptyIdentifier` if nothing is left after normalization.
///
/// # Examples
///
/// ```
/// use neotoma::EntityType;
/// use neotoma::entity::normalize_identifier;
///
/// let company = EntityType::new("company").unwrap();
/// assert_eq!(normalize_identifier(&company, "  Acme, Inc. ").unwrap(), "acme");
/// ```
pub fn normalize_identifier(entity_type: &EntityType, raw: &str) -> Result<String, ValidationError> {
    let lowered = raw.trim().to_lowercase();

    if lowered.contains('@') {
        return Ok(lowered);
    }

    let spaced = separator_re().replace_all(&lowered, " ");
    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();

    let suffixes = suffixes_for(entity_type);
    while tokens.len() > 1 {
        match tokens.last() {
            Some(last) if suffixes.contains(last) => {
                tokens.pop();
            }
            _ => break,
        }
    }

    if tokens.is_empty() {
        return Err(ValidationError::EmptyIdentifier {
            entity_type: entity_type.to_string(),
        });
    }
    Ok(tokens.join(" "))
}

/// The resolution key of an identifier: its normalized form and derived ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionKey {
    /// ID derived from the type and normalized key.
    pub entity_id: EntityId,
    /// Identifier after normalization.
    pub normalized_key: String,
}

impl ResolutionKey {
    /// Computes the key for a raw identifier.
    ///
    /// # Errors
    /// Propagates normalization failures.
    pub fn compute(entity_type: &EntityType, raw: &str) -> Result<Self, ValidationError> {
        let normalized_key = normalize_identifier(entity_type, raw)?;
        Ok(Self {
            entity_id: EntityId::for_key(entity_type.as_str(), &normalized_key),
            normalized_key,
        })
    }
}
