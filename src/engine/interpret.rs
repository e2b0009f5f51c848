//! Turns JSON records into observation candidates.
//!
//! A record is a JSON object with an `entity_type` key; every other key is an
//! observed field. Interpretation is pure: it validates and normalizes but
//! writes nothing, so a bad record rejects the whole source up front.

use serde_json::Value;

use crate::entity::{EntityType, ResolutionKey};
use crate::error::{NeotomaResult, ValidationError};
use crate::schema::SchemaRegistry;

use super::types::FieldMap;

const ENTITY_TYPE_KEY: &str = "entity_type";
const RECORDS_KEY: &str = "records";

/// A validated record, ready to be resolved and stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InterpretedRecord {
    pub entity_type: EntityType,
    /// Identifier as written in the record.
    pub identifier: String,
    pub key: ResolutionKey,
    pub fields: FieldMap,
}

/// Extracts the record list from a JSON document.
///
/// Accepts a single record, an array of records, or `{"records": [...]}`.
pub(crate) fn records_from_document(document: &Value) -> Result<Vec<&Value>, ValidationError> {
    let records: Vec<&Value> = match document {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if map.contains_key(ENTITY_TYPE_KEY) => vec![document],
        Value::Object(map) => match map.get(RECORDS_KEY) {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => {
                return Err(ValidationError::InvalidRequest {
                    message: "expected a record, an array of records or {\"records\": [...]}"
                        .to_string(),
                })
            }
        },
        _ => {
            return Err(ValidationError::InvalidRequest {
                message: "JSON document must be an object or an array".to_string(),
            })
        }
    };
    if records.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    Ok(records)
}

/// Validates one record against its schema.
pub(crate) fn interpret_record(
    schemas: &SchemaRegistry,
    ordinal: usize,
    record: &Value,
) -> NeotomaResult<InterpretedRecord> {
    let Value::Object(map) = record else {
        return Err(ValidationError::InvalidRequest {
            message: format!("record {ordinal} is not a JSON object"),
        }
        .into());
    };

    let entity_type = match map.get(ENTITY_TYPE_KEY) {
        Some(Value::String(name)) => EntityType::new(name.as_str())?,
        Some(other) => {
            return Err(ValidationError::InvalidEntityType {
                value: other.to_string(),
            }
            .into())
        }
        None => {
            return Err(ValidationError::MissingField {
                field: format!("records[{ordinal}].{ENTITY_TYPE_KEY}"),
            }
            .into())
        }
    };

    let fields: FieldMap = map
        .iter()
        .filter(|(name, _)| name.as_str() != ENTITY_TYPE_KEY)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let schema = schemas.get(&entity_type)?;
    let (_, identifier) =
        schema
            .identifier_for(&fields)
            .ok_or_else(|| ValidationError::MissingIdentifier {
                entity_type: entity_type.to_string(),
                candidates: schema.identifier_fields.clone(),
            })?;
    let key = ResolutionKey::compute(&entity_type, &identifier)?;

    Ok(InterpretedRecord {
        entity_type,
        identifier,
        key,
        fields,
    })
}

/// Validates every record, failing on the first bad one.
pub(crate) fn interpret_records(
    schemas: &SchemaRegistry,
    records: &[&Value],
) -> NeotomaResult<Vec<InterpretedRecord>> {
    records
        .iter()
        .enumerate()
        .map(|(ordinal, record)| interpret_record(schemas, ordinal, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn accepts_three_document_shapes() {
        let single = json!({"entity_type": "company", "name": "Acme"});
        let array = json!([single.clone(), single.clone()]);
        let wrapped = json!({"records": [single.clone()]});
        assert_eq!(records_from_document(&single).unwrap().len(), 1);
        assert_eq!(records_from_document(&array).unwrap().len(), 2);
        assert_eq!(records_from_document(&wrapped).unwrap().len(), 1);
        assert!(records_from_document(&json!({"name": "Acme"})).is_err());
        assert!(records_from_document(&json!("text")).is_err());
        assert!(matches!(
            records_from_document(&json!([])),
            Err(ValidationError::EmptyPayload)
        ));
    }

    #[test]
    fn interprets_record_with_identifier() {
        let schemas = SchemaRegistry::new();
        let record = json!({"entity_type": "company", "name": "Acme, Inc.", "industry": "tools"});
        let interpreted = interpret_record(&schemas, 0, &record).unwrap();
        assert_eq!(interpreted.entity_type.as_str(), "company");
        assert_eq!(interpreted.identifier, "Acme, Inc.");
        assert_eq!(interpreted.key.normalized_key, "acme");
        assert!(!interpreted.fields.contains_key("entity_type"));
        assert_eq!(interpreted.fields["industry"], json!("tools"));
    }

    #[test]
    fn rejects_bad_records() {
        let schemas = SchemaRegistry::new();
        let missing_type = interpret_record(&schemas, 3, &json!({"name": "Acme"})).unwrap_err();
        assert_eq!(missing_type.code(), ErrorCode::ValidationError);
        assert!(missing_type.to_string().contains("records[3].entity_type"));

        let bad_type =
            interpret_record(&schemas, 0, &json!({"entity_type": "Company", "name": "x"}))
                .unwrap_err();
        assert_eq!(bad_type.code(), ErrorCode::InvalidEntityType);

        let no_identifier =
            interpret_record(&schemas, 0, &json!({"entity_type": "invoice", "amount": 10}))
                .unwrap_err();
        assert!(no_identifier.to_string().contains("invoice_number"));

        let empty_key =
            interpret_record(&schemas, 0, &json!({"entity_type": "company", "name": "!!!"}))
                .unwrap_err();
        assert_eq!(empty_key.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn interpret_records_fails_on_first_error() {
        let schemas = SchemaRegistry::new();
        let good = json!({"entity_type": "person", "name": "Ada"});
        let bad = json!({"entity_type": "person"});
        assert!(interpret_records(&schemas, &[&good, &bad]).is_err());
        assert_eq!(interpret_records(&schemas, &[&good, &good]).unwrap().len(), 2);
    }
}
