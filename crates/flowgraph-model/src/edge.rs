//! `Edge`: a directed connection between a source port and a target port.
//! Edges are first-class values (not keyed implicitly by position in a
//! per-node adjacency map) so the scheduler can track satisfied/cancelled
//! state per edge directly.

use serde::{Deserialize, Serialize};

/// Either endpoint of an edge is a step or a block group (exactly one of
/// each pair is set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_block_group_id: Option<String>,

    /// Null means the source's default output port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,

    /// Optional guard expression evaluated against the flowing value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source_step_id: impl Into<String>,
        target_step_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_step_id: Some(source_step_id.into()),
            source_block_group_id: None,
            target_step_id: Some(target_step_id.into()),
            target_block_group_id: None,
            source_port: None,
            target_port: None,
            condition: None,
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_step_id
            .as_deref()
            .or(self.source_block_group_id.as_deref())
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_step_id
            .as_deref()
            .or(self.target_block_group_id.as_deref())
    }

    pub fn is_valid(&self) -> bool {
        (self.source_step_id.is_some() ^ self.source_block_group_id.is_some())
            && (self.target_step_id.is_some() ^ self.target_block_group_id.is_some())
    }
}
