//! # Neotoma - a deterministic truth layer for AI agents
//!
//! Neotoma turns raw source material (structured payloads and uploaded
//! files) into observations, resolves them onto canonical entities, and
//! reduces them into per-entity snapshots whose every field carries
//! provenance back to the observation and source that produced it.
//!
//! ## Core Concepts
//!
//! - **Source**: immutable, content-addressed input material
//! - **Observation**: one field set extracted from a source about one entity
//! - **Entity**: a canonical identity, resolved deterministically from identifiers
//! - **Snapshot**: the reducer's current view of an entity, with field provenance
//! - **Relationship** / **Timeline event**: typed edges and dated facts
//!
//! The same inputs always produce the same IDs and the same snapshots.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use neotoma::engine::{SubmitPayloadRequest, TruthEngine};
//! use serde_json::json;
//!
//! let engine = TruthEngine::in_memory()?;
//! let ingested = engine.submit_payload(SubmitPayloadRequest {
//!     records: vec![json!({"entity_type": "person", "email": "ada@example.com", "name": "Ada"})],
//!     ..Default::default()
//! })?;
//! let snapshot = engine.get_entity_snapshot(&ingested.records[0].entity_id)?;
//! ```
//!
//! Agents talk to the engine through the MCP action surface in [`mcp`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod entity;
pub mod error;
pub mod ids;
pub mod observation;
pub mod relationship;
pub mod snapshot;
pub mod source;
pub mod timeline;

// Derivation
pub mod embedding;
pub mod graph;
pub mod reducer;
pub mod schema;
pub mod search;

// Storage, engine and the agent surface
pub mod config;
pub mod engine;
pub mod mcp;
pub mod storage;

pub use config::{CliArgs, ConfigError, ServerConfig};
pub use engine::{EngineConfig, TruthEngine};
pub use entity::{Entity, EntityType, ResolutionKey};
pub use error::{ErrorCode, ErrorEnvelope, ExecutionError, NeotomaError, NeotomaResult, ValidationError};
pub use graph::IntegrityReport;
pub use ids::{EntityId, EventId, ObservationId, RelationshipId, SourceId, TraceId};
pub use mcp::{Action, ActionHandler, ConsistencyTier, McpProtocol};
pub use observation::Observation;
pub use reducer::Reducer;
pub use relationship::{Direction, Relationship, RelationshipType};
pub use schema::{EntitySchema, MergePolicy, SchemaRegistry};
pub use search::{SearchIndex, SearchRequest, SearchResults};
pub use snapshot::{EntitySnapshot, FieldProvenance};
pub use source::{InterpretationStatus, SourceKind, SourceMaterial};
pub use storage::{StorageError, TruthStores};
pub use timeline::{TimelineEvent, TimelineFilter};
