//! Database entities backing the Run Store: `Workflow` definitions and
//! the append-only `Run`/`StepRun` audit trail. Users, projects, tags,
//! credentials, settings, variables and webhooks are out of scope — this
//! crate persists only the three tables the engine actually needs.

pub mod run;
pub mod workflow;

pub use run::*;
pub use workflow::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a nano ID (21 characters) for new entity primary keys.
pub fn generate_nano_id() -> String {
    nanoid::nanoid!(21)
}

/// Common timestamp pair used by both entities.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Timestamps {
    fn default() -> Self {
        let now = Utc::now();
        Self { created_at: now, updated_at: now }
    }
}
