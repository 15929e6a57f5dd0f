//! Group Executors: `Parallel`, `TryCatch`, `Foreach`, `While`.
//!
//! Conceptually each group is a state machine with three entry points —
//! start, on-child-complete, cancel — but this engine drives groups by
//! direct async recursion instead, one driver task per run: the
//! on-child-complete and cancel transitions collapse into a single
//! `run()` future's await points and cancellation-token checks. Each
//! implementation below exposes one `run` that plays all three roles.

use crate::error::EngineError;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use async_trait::async_trait;
use flowgraph_model::{BlockGroup, BlockGroupKind, Workflow};
use serde_json::Value;
use std::sync::Arc;

mod foreach;
mod parallel;
mod try_catch;
mod while_loop;

#[async_trait]
pub trait GroupExecutor: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        engine: &WorkflowEngine,
        workflow: &Workflow,
        group: &BlockGroup,
        input: Value,
        ctx: &RuntimeContext,
        sandbox: &Arc<Sandbox>,
        run_id: &str,
        store: &dyn RunStore,
        events: &Option<EventSink>,
    ) -> Result<NodeOutcome, EngineError>;
}

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    engine: &WorkflowEngine,
    workflow: &Workflow,
    group: &BlockGroup,
    input: Value,
    ctx: &RuntimeContext,
    sandbox: &Arc<Sandbox>,
    run_id: &str,
    store: &dyn RunStore,
    events: &Option<EventSink>,
) -> Result<NodeOutcome, EngineError> {
    match group.kind {
        BlockGroupKind::Parallel => {
            parallel::Parallel
                .run(engine, workflow, group, input, ctx, sandbox, run_id, store, events)
                .await
        }
        BlockGroupKind::TryCatch => {
            try_catch::TryCatch
                .run(engine, workflow, group, input, ctx, sandbox, run_id, store, events)
                .await
        }
        BlockGroupKind::Foreach => {
            foreach::Foreach
                .run(engine, workflow, group, input, ctx, sandbox, run_id, store, events)
                .await
        }
        BlockGroupKind::While => {
            while_loop::While
                .run(engine, workflow, group, input, ctx, sandbox, run_id, store, events)
                .await
        }
        BlockGroupKind::Agent => {
            crate::agent::run_group(engine, workflow, group, input, ctx, sandbox, run_id, store, events).await
        }
    }
}

/// Members of `group` that have no internal incoming edge — the root of
/// each declared "flow" inside a `Parallel`/`TryCatch` body, in
/// declaration order.
pub(crate) fn flow_roots<'a>(workflow: &'a Workflow, group_id: &str) -> Vec<&'a flowgraph_model::Step> {
    let members = workflow.members_of(group_id);
    let internal = workflow.internal_edges_of(group_id);
    let has_incoming = |id: &str| internal.iter().any(|e| e.target_id() == Some(id));
    members.into_iter().filter(|s| !has_incoming(&s.id)).collect()
}
