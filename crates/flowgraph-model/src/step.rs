//! `Step`: an instance of a block inside a workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role a step plays inside its enclosing `BlockGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Body,
    OnError,
    OnSuccess,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A graph node: an instance of a block (`type`) with its own config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Block slug this step instantiates.
    #[serde(rename = "type")]
    pub block_slug: String,
    pub name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_role: Option<GroupRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_config: Option<Value>,
}

impl Step {
    pub fn new(id: impl Into<String>, block_slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_slug: block_slug.into(),
            name: name.into(),
            config: Value::Object(Default::default()),
            position: Position::default(),
            block_group_id: None,
            group_role: None,
            trigger_type: None,
            trigger_config: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>, role: GroupRole) -> Self {
        self.block_group_id = Some(group_id.into());
        self.group_role = Some(role);
        self
    }

    pub fn is_group_member(&self) -> bool {
        self.block_group_id.is_some()
    }
}
