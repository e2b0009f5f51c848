//! The reducer: observations in, snapshot out.
//!
//! Reduction is deterministic. Observations are first sorted by recency
//! (`observed_at`, `source_priority`, `id`) so that any permutation of the
//! same observation set produces an identical snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::Value;

use crate::entity::Entity;
use crate::observation::Observation;
use crate::schema::{EntitySchema, MergePolicy};
use crate::snapshot::{EntitySnapshot, FieldProvenance};

/// Scores how much information a value carries.
///
/// - null: 0, bool: 1
/// - number: count of decimal digits
/// - string: non-whitespace characters plus whitespace-separated tokens
/// - array: sum of element scores
/// - object: sum of `score + 1` over non-null members
#[must_use]
pub fn specificity_score(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(n) => n.to_string().bytes().filter(u8::is_ascii_digit).count() as u64,
        Value::String(s) => {
            let chars = s.chars().filter(|c| !c.is_whitespace()).count() as u64;
            let tokens = s.split_whitespace().count() as u64;
            chars + tokens
        }
        Value::Array(items) => items.iter().map(specificity_score).sum(),
        Value::Object(map) => map
            .values()
            .filter(|v| !v.is_null())
            .map(|v| specificity_score(v) + 1)
            .sum(),
    }
}

/// Stateless merge engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reducer;

impl Reducer {
    /// Reduces the observations of one entity into a snapshot.
    ///
    /// Observations about other entities must be filtered out by the caller.
    #[must_use]
    pub fn reduce(
        entity: &Entity,
        schema: &EntitySchema,
        observations: &[Observation],
    ) -> EntitySnapshot {
        let mut ordered: Vec<&Observation> = observations.iter().collect();
        ordered.sort_by(|a, b| a.cmp_recency(b));

        let field_names: BTreeSet<&str> = ordered
            .iter()
            .flat_map(|o| o.fields.iter())
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
            .collect();

        let mut fields = BTreeMap::new();
        let mut provenance = BTreeMap::new();

        for name in field_names {
            let policy = schema.policy_for(name);
            let candidates: Vec<&Observation> = ordered
                .iter()
                .copied()
                .filter(|o| o.field(name).is_some())
                .collect();

            let (value, contributors) = match policy {
                MergePolicy::LastWrite => pick(&candidates, name, |a, b| a.cmp_recency(b)),
                MergePolicy::HighestPriority => pick(&candidates, name, |a, b| a.cmp_priority(b)),
                MergePolicy::MostSpecific => pick(&candidates, name, |a, b| {
                    let sa = a.field(name).map_or(0, specificity_score);
                    let sb = b.field(name).map_or(0, specificity_score);
                    sa.cmp(&sb).then_with(|| a.cmp_priority(b))
                }),
                MergePolicy::MergeArray => union(&candidates, name),
            };

            let Some(value) = value else { continue };

            let mut source_ids = Vec::new();
            for obs in &contributors {
                if !source_ids.contains(&obs.source_id) {
                    source_ids.push(obs.source_id.clone());
                }
            }
            provenance.insert(
                name.to_string(),
                FieldProvenance {
                    policy,
                    observation_ids: contributors.iter().map(|o| o.id.clone()).collect(),
                    source_ids,
                },
            );
            fields.insert(name.to_string(), value);
        }

        tracing::debug!(
            entity_id = %entity.id,
            observations = observations.len(),
            fields = fields.len(),
            "reduced entity snapshot"
        );

        EntitySnapshot {
            entity_id: entity.id.clone(),
            entity_type: entity.entity_type.clone(),
            schema_version: schema.schema_version.clone(),
            canonical_name: entity.canonical_name.clone(),
            fields,
            provenance,
            observation_count: observations.len(),
            computed_at: ordered.last().map(|o| o.observed_at),
        }
    }
}

fn pick<'a>(
    candidates: &[&'a Observation],
    field: &str,
    cmp: impl Fn(&Observation, &Observation) -> Ordering,
) -> (Option<Value>, Vec<&'a Observation>) {
    let winner = candidates.iter().copied().max_by(|a, b| cmp(a, b));
    match winner {
        Some(w) => (w.field(field).cloned(), vec![w]),
        None => (None, Vec::new()),
    }
}

fn union<'a>(candidates: &[&'a Observation], field: &str) -> (Option<Value>, Vec<&'a Observation>) {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for obs in candidates {
        let Some(value) = obs.field(field) else { continue };
        let elements: Vec<&Value> = match value {
            Value::Array(arr) => arr.iter().collect(),
            other => vec![other],
        };
        for element in elements.into_iter().filter(|v| !v.is_null()) {
            // serde_json maps are key-ordered, so this is canonical.
            let key = element.to_string();
            if seen.insert(key) {
                items.push(element.clone());
            }
        }
    }
    if candidates.is_empty() {
        return (None, Vec::new());
    }
    (Some(Value::Array(items)), candidates.to_vec())
}
