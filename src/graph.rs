//! Graph integrity: orphans and cycles.
//!
//! Integrity holds when every relationship and observation points at a live
//! entity, every live entity has at least one observation, and no acyclic
//! relationship type contains a cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::algo::{astar, tarjan_scc};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::ids::{EntityId, ObservationId, RelationshipId};
use crate::observation::Observation;
use crate::relationship::{Relationship, RelationshipType};

/// A strongly connected component found inside an acyclic relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Acyclic type the cycle was found in.
    pub relationship_type: RelationshipType,
    /// Members of the component, sorted.
    pub entity_ids: Vec<EntityId>,
}

/// Result of a full integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Live entities.
    pub entity_count: usize,
    /// All observations.
    pub observation_count: usize,
    /// All relationships.
    pub relationship_count: usize,
    /// Edges with an endpoint that is missing or merged.
    pub orphan_relationships: Vec<RelationshipId>,
    /// Observations whose entity is missing or merged.
    pub orphan_observations: Vec<ObservationId>,
    /// Live entities without any observation.
    pub orphan_entities: Vec<EntityId>,
    /// Cycles inside acyclic relationship types.
    pub cycles: Vec<CycleReport>,
}

impl IntegrityReport {
    /// Returns true if no orphans and no cycles were found.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.orphan_relationships.is_empty()
            && self.orphan_observations.is_empty()
            && self.orphan_entities.is_empty()
            && self.cycles.is_empty()
    }
}

/// Checks the whole graph. Entities include merged ones; they count as not live.
#[must_use]
pub fn check_integrity(
    entities: &[Entity],
    observations: &[Observation],
    relationships: &[Relationship],
) -> IntegrityReport {
    let live: HashSet<&EntityId> = entities
        .iter()
        .filter(|e| !e.is_merged())
        .map(|e| &e.id)
        .collect();

    let observed: HashSet<&EntityId> = observations.iter().map(|o| &o.entity_id).collect();

    let mut orphan_relationships: Vec<RelationshipId> = relationships
        .iter()
        .filter(|r| !live.contains(&r.source_entity_id) || !live.contains(&r.target_entity_id))
        .map(|r| r.id.clone())
        .collect();
    orphan_relationships.sort();

    let mut orphan_observations: Vec<ObservationId> = observations
        .iter()
        .filter(|o| !live.contains(&o.entity_id))
        .map(|o| o.id.clone())
        .collect();
    orphan_observations.sort();

    let mut orphan_entities: Vec<EntityId> = live
        .iter()
        .filter(|id| !observed.contains(*id))
        .map(|id| (*id).clone())
        .collect();
    orphan_entities.sort();

    let mut by_type: BTreeMap<&RelationshipType, Vec<&Relationship>> = BTreeMap::new();
    for rel in relationships.iter().filter(|r| r.relationship_type.is_acyclic()) {
        by_type.entry(&rel.relationship_type).or_default().push(rel);
    }

    let mut cycles = Vec::new();
    for (ty, edges) in by_type {
        let pairs = edges
            .iter()
            .map(|r| (r.source_entity_id.as_str(), r.target_entity_id.as_str()));
        for entity_ids in cyclic_components(pairs) {
            cycles.push(CycleReport {
                relationship_type: ty.clone(),
                entity_ids,
            });
        }
    }
    cycles.sort_by(|a, b| {
        a.relationship_type
            .cmp(&b.relationship_type)
            .then_with(|| a.entity_ids.cmp(&b.entity_ids))
    });

    IntegrityReport {
        entity_count: live.len(),
        observation_count: observations.len(),
        relationship_count: relationships.len(),
        orphan_relationships,
        orphan_observations,
        orphan_entities,
        cycles,
    }
}

/// Strongly connected components with more than one member, each sorted.
fn cyclic_components<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<Vec<EntityId>> {
    let graph: DiGraphMap<&str, ()> = pairs.collect();
    tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let members: BTreeSet<&str> = component.into_iter().collect();
            members
                .into_iter()
                .filter_map(|s| EntityId::parse(s).ok())
                .collect()
        })
        .collect()
}

/// Returns a cycle that merging `from` into `to` would create, if any.
///
/// `edges` must all be of the same (acyclic) relationship type. Edges that
/// would become self-loops are ignored, matching what the merge does.
#[must_use]
pub fn cycle_created_by_merge(
    edges: &[Relationship],
    from: &EntityId,
    to: &EntityId,
) -> Option<Vec<EntityId>> {
    let swap = |id: &EntityId| if id == from { to.clone() } else { id.clone() };
    let redirected: Vec<(EntityId, EntityId)> = edges
        .iter()
        .map(|r| (swap(&r.source_entity_id), swap(&r.target_entity_id)))
        .filter(|(s, t)| s != t)
        .collect();
    let pairs = redirected.iter().map(|(s, t)| (s.as_str(), t.as_str()));
    let mut components = cyclic_components(pairs);
    components.sort();
    components.into_iter().next()
}

/// Returns the path that adding `source -> target` would close, if any.
///
/// `edges` must all be of the same (acyclic) relationship type. The path
/// starts at `target`, follows existing edges to `source`, and ends with
/// `target` again.
#[must_use]
pub fn cycle_closed_by(
    edges: &[Relationship],
    source: &EntityId,
    target: &EntityId,
) -> Option<Vec<EntityId>> {
    let graph: DiGraphMap<&str, ()> = edges
        .iter()
        .map(|r| (r.source_entity_id.as_str(), r.target_entity_id.as_str()))
        .collect();
    if !graph.contains_node(target.as_str()) || !graph.contains_node(source.as_str()) {
        return None;
    }
    let (_, path) = astar(
        &graph,
        target.as_str(),
        |n| n == source.as_str(),
        |_| 1u32,
        |_| 0u32,
    )?;

    let lookup: HashMap<&str, &EntityId> = edges
        .iter()
        .flat_map(|r| [&r.source_entity_id, &r.target_entity_id])
        .map(|id| (id.as_str(), id))
        .collect();
    let mut ids: Vec<EntityId> = path
        .into_iter()
        .filter_map(|n| lookup.get(n).map(|id| (*id).clone()))
        .collect();
    ids.push(target.clone());
    Some(ids)
}
