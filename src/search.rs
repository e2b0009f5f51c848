//! Deterministic entity search over snapshots.
//!
//! Ranking is lexical: exact and prefix name matches dominate, then token
//! hits in names, then token hits in field values. Ties fall back to the
//! cosine similarity of lexical embeddings, then to name and ID, so the same
//! index and query always produce the same order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine, embed_tokens, tokenize};
use crate::entity::{Entity, EntityType};
use crate::error::{NeotomaError, NeotomaResult};
use crate::ids::EntityId;
use crate::snapshot::EntitySnapshot;

const EXACT_NAME_SCORE: u32 = 1000;
const NAME_PREFIX_SCORE: u32 = 500;
const NAME_TOKEN_SCORE: u32 = 100;
const FIELD_TOKEN_SCORE: u32 = 10;

/// One indexed entity.
#[derive(Debug, Clone)]
pub struct SearchDocument {
    /// Snapshot the document was built from.
    pub snapshot: EntitySnapshot,
    names: Vec<String>,
    name_tokens: BTreeSet<String>,
    field_tokens: BTreeSet<String>,
    embedding: Vec<f32>,
}

impl SearchDocument {
    /// Builds a document from an entity and its current snapshot.
    #[must_use]
    pub fn new(entity: &Entity, snapshot: EntitySnapshot) -> Self {
        let names: Vec<String> = entity
            .names()
            .map(|n| tokenize(n).join(" "))
            .filter(|n| !n.is_empty())
            .collect();
        let name_tokens: BTreeSet<String> = entity.names().flat_map(tokenize).collect();

        let mut field_tokens = BTreeSet::new();
        for value in snapshot.fields.values() {
            collect_tokens(value, &mut field_tokens);
        }

        let all: Vec<String> = name_tokens.iter().chain(field_tokens.iter()).cloned().collect();
        Self {
            embedding: embed_tokens(&all),
            snapshot,
            names,
            name_tokens,
            field_tokens,
        }
    }

    fn score(&self, normalized_query: &str, query_tokens: &[String]) -> u32 {
        if query_tokens.is_empty() {
            return 0;
        }
        let mut score = 0;
        if self.names.iter().any(|n| n == normalized_query) {
            score += EXACT_NAME_SCORE;
        } else if self.names.iter().any(|n| n.starts_with(normalized_query)) {
            score += NAME_PREFIX_SCORE;
        }
        for token in query_tokens {
            if self.name_tokens.contains(token) {
                score += NAME_TOKEN_SCORE;
            }
            if self.field_tokens.contains(token) {
                score += FIELD_TOKEN_SCORE;
            }
        }
        score
    }
}

fn collect_tokens(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => out.extend(tokenize(s)),
        serde_json::Value::Number(n) => out.extend(tokenize(&n.to_string())),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        serde_json::Value::Null | serde_json::Value::Bool(_) => {}
    }
}

/// Search query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchRequest {
    /// Free text; empty matches every entity.
    pub query: String,
    /// Only entities of this type.
    pub entity_type: Option<EntityType>,
    /// Page size; at least 1, clamped to the engine maximum.
    pub limit: Option<usize>,
    /// Hits to skip.
    pub offset: usize,
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matched entity.
    pub entity_id: EntityId,
    /// Its type.
    pub entity_type: EntityType,
    /// Its canonical name.
    pub canonical_name: String,
    /// Higher ranks first.
    pub score: u32,
    /// Cosine similarity of the query and document embeddings.
    pub similarity: f32,
    /// Current snapshot.
    pub snapshot: EntitySnapshot,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matches before paging.
    pub total: usize,
    /// Page size applied.
    pub limit: usize,
    /// Hits skipped.
    pub offset: usize,
    /// The page.
    pub results: Vec<SearchHit>,
}

/// In-memory search index keyed by entity ID.
#[derive(Debug, Default)]
pub struct SearchIndex {
    documents: RwLock<BTreeMap<EntityId, SearchDocument>>,
}

impl SearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document.
    ///
    /// # Errors
    /// Returns an internal error if the index lock is poisoned.
    pub fn upsert(&self, document: SearchDocument) -> NeotomaResult<()> {
        let mut docs = self
            .documents
            .write()
            .map_err(|_| NeotomaError::internal("search index lock poisoned"))?;
        docs.insert(document.snapshot.entity_id.clone(), document);
        Ok(())
    }

    /// Removes a document; missing IDs are ignored.
    ///
    /// # Errors
    /// Returns an internal error if the index lock is poisoned.
    pub fn remove(&self, entity_id: &EntityId) -> NeotomaResult<()> {
        let mut docs = self
            .documents
            .write()
            .map_err(|_| NeotomaError::internal("search index lock poisoned"))?;
        docs.remove(entity_id);
        Ok(())
    }

    /// Number of indexed documents.
    ///
    /// # Errors
    /// Returns an internal error if the index lock is poisoned.
    pub fn len(&self) -> NeotomaResult<usize> {
        let docs = self
            .documents
            .read()
            .map_err(|_| NeotomaError::internal("search index lock poisoned"))?;
        Ok(docs.len())
    }

    /// Returns true if nothing is indexed.
    ///
    /// # Errors
    /// Returns an internal error if the index lock is poisoned.
    pub fn is_empty(&self) -> NeotomaResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Ranks, filters and pages.
    ///
    /// # Errors
    /// Returns an internal error if the index lock is poisoned.
    pub fn search(
        &self,
        request: &SearchRequest,
        default_limit: usize,
        max_limit: usize,
    ) -> NeotomaResult<SearchResults> {
        let docs = self
            .documents
            .read()
            .map_err(|_| NeotomaError::internal("search index lock poisoned"))?;

        let query_tokens = tokenize(&request.query);
        let normalized_query = query_tokens.join(" ");
        let query_embedding = embed_tokens(&query_tokens);
        let match_all = query_tokens.is_empty();

        let mut ranked: Vec<(u32, f32, &SearchDocument)> = docs
            .values()
            .filter_map(|doc| {
                let score = doc.score(&normalized_query, &query_tokens);
                (match_all || score > 0)
                    .then(|| (score, cosine(&query_embedding, &doc.embedding), doc))
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.total_cmp(&a.1))
                .then_with(|| a.2.snapshot.canonical_name.cmp(&b.2.snapshot.canonical_name))
                .then_with(|| a.2.snapshot.entity_id.cmp(&b.2.snapshot.entity_id))
        });

        if let Some(ty) = &request.entity_type {
            ranked.retain(|(_, _, doc)| &doc.snapshot.entity_type == ty);
        }

        let limit = request.limit.unwrap_or(default_limit).clamp(1, max_limit.max(1));
        let total = ranked.len();
        let results = ranked
            .into_iter()
            .skip(request.offset)
            .take(limit)
            .map(|(score, similarity, doc)| SearchHit {
                entity_id: doc.snapshot.entity_id.clone(),
                entity_type: doc.snapshot.entity_type.clone(),
                canonical_name: doc.snapshot.canonical_name.clone(),
                score,
                similarity,
                snapshot: doc.snapshot.clone(),
            })
            .collect();

        Ok(SearchResults {
            total,
            limit,
            offset: request.offset,
            results,
        })
    }
}
