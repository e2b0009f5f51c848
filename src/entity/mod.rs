//! Entity layer modules.
//!
//! This module groups entity identity and resolution.

#[allow(clippy::module_inception)]
pub mod entity;
pub mod resolution;

pub use entity::{Entity, EntityType};
pub use resolution::{normalize_identifier, ResolutionKey};
