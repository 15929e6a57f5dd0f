//! `WorkflowEntity` — id, name, JSON body, version counter, timestamps.
//! Stores the whole `flowgraph_model::Workflow` (steps/edges/groups/
//! variables) as a single JSONB `definition` column, since Workflow is one
//! owned aggregate rather than separate node/connection tables.

use chrono::{DateTime, Utc};
use flowgraph_model::{ModelError, Workflow};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::generate_nano_id;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowEntity {
    /// Primary key — nano ID (21 chars), independent of `definition.id`
    /// so a workflow can be re-saved under the same row across edits.
    pub id: String,

    pub name: String,

    pub is_archived: bool,

    /// The full `Workflow` (steps, edges, groups, variables, status) as
    /// JSON — one aggregate owned by the workflow.
    #[sqlx(json)]
    pub definition: serde_json::Value,

    /// Optimistic-locking counter, bumped on every update.
    pub version_counter: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowEntity {
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            is_archived: false,
            definition: serde_json::to_value(workflow)?,
            version_counter: workflow.version as i32,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn to_workflow(&self) -> Result<Workflow, ModelError> {
        serde_json::from_value(self.definition.clone())
            .map_err(|e| ModelError::SerializationError(e.to_string()))
    }

    pub fn new_id() -> String {
        generate_nano_id()
    }
}

/// Insert parameters for creating a workflow row.
#[derive(Debug, Clone)]
pub struct InsertWorkflow {
    pub id: String,
    pub name: String,
    pub definition: serde_json::Value,
    pub version_counter: i32,
}

impl From<&WorkflowEntity> for InsertWorkflow {
    fn from(w: &WorkflowEntity) -> Self {
        Self {
            id: w.id.clone(),
            name: w.name.clone(),
            definition: w.definition.clone(),
            version_counter: w.version_counter,
        }
    }
}
