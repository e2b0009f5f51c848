//! Per-type field merge policies.
//!
//! A schema tells the reducer how to combine competing observations of the
//! same field, and tells resolution which fields identify an entity.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::error::{NeotomaError, NeotomaResult};

/// How competing values for one field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Most recently observed value wins.
    LastWrite,
    /// Value from the highest-priority source wins.
    HighestPriority,
    /// Value with the highest specificity score wins.
    MostSpecific,
    /// Union of all observed values, first-seen order.
    MergeArray,
}

impl MergePolicy {
    /// Wire name of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWrite => "last_write",
            Self::HighestPriority => "highest_priority",
            Self::MostSpecific => "most_specific",
            Self::MergeArray => "merge_array",
        }
    }
}

/// Schema of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Type this schema applies to.
    pub entity_type: EntityType,

    /// Copied into every snapshot.
    pub schema_version: String,

    /// Fields tried in order to find an identifier.
    pub identifier_fields: Vec<String>,

    /// Per-field merge policies.
    pub fields: BTreeMap<String, MergePolicy>,

    /// Policy for fields not listed in `fields`.
    pub default_policy: MergePolicy,
}

impl EntitySchema {
    /// Version stamped on built-in schemas.
    pub const DEFAULT_VERSION: &'static str = "1.0";

    /// Creates an empty schema with `LastWrite` as the default policy.
    #[must_use]
    pub fn new(entity_type: EntityType, identifier_fields: &[&str]) -> Self {
        Self {
            entity_type,
            schema_version: Self::DEFAULT_VERSION.to_string(),
            identifier_fields: identifier_fields.iter().map(|f| (*f).to_string()).collect(),
            fields: BTreeMap::new(),
            default_policy: MergePolicy::LastWrite,
        }
    }

    /// Binds a policy to a field.
    #[must_use]
    pub fn field(mut self, name: &str, policy: MergePolicy) -> Self {
        self.fields.insert(name.to_string(), policy);
        self
    }

    /// Policy for a field, falling back to the default.
    #[must_use]
    pub fn policy_for(&self, field: &str) -> MergePolicy {
        self.fields.get(field).copied().unwrap_or(self.default_policy)
    }

    /// First identifier field holding a usable value, rendered as a string.
    #[must_use]
    pub fn identifier_for(
        &self,
        fields: &BTreeMap<String, serde_json::Value>,
    ) -> Option<(String, String)> {
        self.identifier_fields.iter().find_map(|name| {
            let value = match fields.get(name)? {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((name.clone(), value))
        })
    }
}

const GENERIC_IDENTIFIERS: &[&str] = &["name", "id", "title"];

fn builtin(name: &str) -> Option<EntitySchema> {
    use MergePolicy::{HighestPriority, LastWrite, MergeArray, MostSpecific};

    let ty = EntityType::new(name).ok()?;
    let schema = match name {
        "person" => EntitySchema::new(ty, &["email", "name"])
            .field("name", MostSpecific)
            .field("email", LastWrite)
            .field("phone", LastWrite)
            .field("birth_date", HighestPriority)
            .field("aliases", MergeArray)
            .field("tags", MergeArray),
        "company" => EntitySchema::new(ty, &["name", "domain"])
            .field("name", MostSpecific)
            .field("domain", LastWrite)
            .field("address", MostSpecific)
            .field("industry", LastWrite)
            .field("tags", MergeArray),
        "invoice" => EntitySchema::new(ty, &["invoice_number"])
            .field("amount", HighestPriority)
            .field("currency", LastWrite)
            .field("status", LastWrite)
            .field("vendor", MostSpecific)
            .field("issue_date", HighestPriority)
            .field("due_date", HighestPriority)
            .field("line_items", MergeArray),
        "transaction" => EntitySchema::new(ty, &["transaction_id"])
            .field("amount", HighestPriority)
            .field("date", HighestPriority)
            .field("merchant", MostSpecific)
            .field("category", LastWrite)
            .field("tags", MergeArray),
        _ => return None,
    };
    Some(schema)
}

/// Registry of entity schemas.
///
/// Unknown (but valid) entity types get a generic schema: identifiers
/// `name`, `id`, `title` and `LastWrite` for every field.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: RwLock<BTreeMap<EntityType, EntitySchema>>,
}

impl SchemaRegistry {
    /// Creates a registry holding the built-in schemas.
    #[must_use]
    pub fn new() -> Self {
        let schemas = ["person", "company", "invoice", "transaction"]
            .into_iter()
            .filter_map(builtin)
            .map(|s| (s.entity_type.clone(), s))
            .collect();
        Self {
            schemas: RwLock::new(schemas),
        }
    }

    /// Adds or replaces a schema.
    ///
    /// # Errors
    /// Returns an internal error if the registry lock is poisoned.
    pub fn register(&self, schema: EntitySchema) -> NeotomaResult<()> {
        let mut guard = self
            .schemas
            .write()
            .map_err(|_| NeotomaError::internal("schema registry lock poisoned"))?;
        guard.insert(schema.entity_type.clone(), schema);
        Ok(())
    }

    /// Schema for a type; generic if none is registered.
    ///
    /// # Errors
    /// Returns an internal error if the registry lock is poisoned.
    pub fn get(&self, entity_type: &EntityType) -> NeotomaResult<EntitySchema> {
        let guard = self
            .schemas
            .read()
            .map_err(|_| NeotomaError::internal("schema registry lock poisoned"))?;
        Ok(guard
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| EntitySchema::new(entity_type.clone(), GENERIC_IDENTIFIERS)))
    }

    /// All registered schemas, ordered by type name.
    ///
    /// # Errors
    /// Returns an internal error if the registry lock is poisoned.
    pub fn list(&self) -> NeotomaResult<Vec<EntitySchema>> {
        let guard = self
            .schemas
            .read()
            .map_err(|_| NeotomaError::internal("schema registry lock poisoned"))?;
        Ok(guard.values().cloned().collect())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ty(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    #[test]
    fn test_builtins_registered() {
        let registry = SchemaRegistry::new();
        let names: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.entity_type.to_string())
            .collect();
        assert_eq!(names, vec!["company", "invoice", "person", "transaction"]);
    }

    #[test]
    fn test_policy_lookup() {
        let registry = SchemaRegistry::new();
        let invoice = registry.get(&ty("invoice")).unwrap();
        assert_eq!(invoice.policy_for("amount"), MergePolicy::HighestPriority);
        assert_eq!(invoice.policy_for("line_items"), MergePolicy::MergeArray);
        assert_eq!(invoice.policy_for("notes"), MergePolicy::LastWrite);
    }

    #[test]
    fn test_generic_schema_for_unknown_type() {
        let registry = SchemaRegistry::new();
        let schema = registry.get(&ty("recipe")).unwrap();
        assert_eq!(schema.identifier_fields, vec!["name", "id", "title"]);
        assert_eq!(schema.policy_for("anything"), MergePolicy::LastWrite);
    }

    #[test]
    fn test_identifier_order() {
        let registry = SchemaRegistry::new();
        let person = registry.get(&ty("person")).unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        assert_eq!(
            person.identifier_for(&fields),
            Some(("name".to_string(), "Ada".to_string()))
        );

        fields.insert("email".to_string(), json!("ada@example.com"));
        assert_eq!(
            person.identifier_for(&fields),
            Some(("email".to_string(), "ada@example.com".to_string()))
        );

        fields.insert("email".to_string(), json!("   "));
        assert_eq!(person.identifier_for(&fields).unwrap().0, "name");
    }

    #[test]
    fn test_numeric_identifier() {
        let schema = EntitySchema::new(ty("ticket"), &["id"]);
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), json!(4711));
        assert_eq!(schema.identifier_for(&fields).unwrap().1, "4711");
    }

    #[test]
    fn test_register_overrides() {
        let registry = SchemaRegistry::new();
        let custom = EntitySchema::new(ty("person"), &["handle"]).field("handle", MergePolicy::LastWrite);
        registry.register(custom).unwrap();
        assert_eq!(registry.get(&ty("person")).unwrap().identifier_fields, vec!["handle"]);
    }

    #[test]
    fn test_policy_serialization() {
        assert_eq!(serde_json::to_string(&MergePolicy::MergeArray).unwrap(), "\"merge_array\"");
        for p in [
            MergePolicy::LastWrite,
            MergePolicy::HighestPriority,
            MergePolicy::MostSpecific,
            MergePolicy::MergeArray,
        ] {
            assert_eq!(serde_json::to_string(&p).unwrap(), format!("\"{}\"", p.as_str()));
        }
    }
}
