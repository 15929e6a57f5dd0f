//! `BlockGroup`: a container step whose member steps are driven by a
//! `GroupExecutor` state machine.

use crate::block::BlockGroupKind;
use crate::step::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BlockGroupKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
}

impl BlockGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: BlockGroupKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            config: Value::Object(Default::default()),
            position: Position::default(),
            size: Size::default(),
        }
    }
}
