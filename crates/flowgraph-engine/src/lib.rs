//! # flowgraph-engine
//!
//! Block catalog, inheritance resolver, script sandbox, expression engine,
//! scheduler, group executors and agent engine for FlowGraph — the core
//! workflow execution components (C1-C8 of the design).

pub mod agent;
pub mod catalog;
pub mod credentials;
pub mod error;
pub mod expr;
pub mod groups;
pub mod inherit;
pub mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod store;

pub use catalog::BlockCatalog;
pub use credentials::{CredentialError, CredentialService, DecryptedCredentialData};
pub use error::EngineError;
pub use expr::{evaluate_expr, render_template, resolve_value};
pub use groups::GroupExecutor;
pub use inherit::EffectiveBlock;
pub use runtime::{RuntimeConfig, RuntimeContext};
pub use sandbox::{CapabilityHost, Sandbox};
pub use scheduler::{ExecutionEvent, EventSink, NodeOutcome, WorkflowEngine};
pub use store::{MemoryRunStore, MemoryWorkflowStore, RunStore, WorkflowStore};
