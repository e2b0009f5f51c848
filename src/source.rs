//! Source material and provenance types.
//!
//! Every observation points back at the source it was derived from. Sources
//! are content-addressed: storing the same bytes twice yields the same
//! [`SourceId`] and the second store is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SourceId;

/// How a source entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A raw file uploaded by an agent or user.
    File,
    /// A structured payload submitted through the API.
    StructuredPayload,
    /// A field correction.
    Correction,
}

impl SourceKind {
    /// Default priority of observations derived from this kind of source.
    #[must_use]
    pub const fn default_priority(self) -> i32 {
        match self {
            Self::File => crate::observation::FILE_PRIORITY,
            Self::StructuredPayload => crate::observation::PAYLOAD_PRIORITY,
            Self::Correction => crate::observation::CORRECTION_PRIORITY,
        }
    }
}

/// What happened when the source was interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InterpretationStatus {
    /// The source produced observations.
    Interpreted { observation_count: usize },
    /// The source was stored without interpretation.
    Stored,
}

/// Raw ingested input before interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMaterial {
    /// Content hash of the material.
    pub id: SourceId,

    /// How the material arrived.
    pub kind: SourceKind,

    /// Declared MIME type.
    pub mime_type: String,

    /// Original file name of an upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// The raw material, stored verbatim.
    pub content: String,

    /// Length of `content` in bytes.
    pub byte_size: usize,

    /// Agent that submitted the material.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// When the material was stored.
    pub created_at: DateTime<Utc>,

    /// Outcome of turning the material into observations.
    pub interpretation: InterpretationStatus,
}

impl SourceMaterial {
    /// Creates a source; its ID is derived from `content`.
    #[must_use]
    pub fn new(
        kind: SourceKind,
        mime_type: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            id: SourceId::for_content(content.as_bytes()),
            kind,
            mime_type: mime_type.into(),
            file_name: None,
            byte_size: content.len(),
            content,
            agent_id: None,
            created_at,
            interpretation: InterpretationStatus::Stored,
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }

    /// Sets the submitting agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Returns true if the mime type announces JSON content.
    #[must_use]
    pub fn is_json(&self) -> bool {
        let essence = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/json" || essence.ends_with("+json")
    }
}
