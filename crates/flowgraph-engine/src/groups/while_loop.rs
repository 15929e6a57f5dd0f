//! `While` group: repeats its member sub-graph while `condition`
//! evaluates truthy against the loop's current value, up to
//! `max_iterations`. `do_while: true` evaluates the condition after the
//! first iteration instead of before. Raises `WHL_001 MAX_ITERATIONS` /
//! `WHL_002 CONDITION_ERROR`.

use super::GroupExecutor;
use crate::error::EngineError;
use crate::expr::evaluate_expr;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{merge_terminal_outputs, EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use async_trait::async_trait;
use flowgraph_model::{BlockGroup, StepError, Workflow};
use serde_json::Value;
use std::sync::Arc;

pub struct While;

#[async_trait]
impl GroupExecutor for While {
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
    ) -> Result<NodeOutcome, EngineError> {
        let condition = group
            .config
            .get("condition")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::Script(
                    StepError::new("WHL_002", "while group has no 'condition' configured").with_step_run_id(group.id.clone()),
                )
            })?;
        let max_iterations = group.config.get("max_iterations").and_then(|v| v.as_u64()).unwrap_or(1_000);
        let do_while = group.config.get("do_while").and_then(|v| v.as_bool()).unwrap_or(false);

        let members = workflow.members_of(&group.id).into_iter().cloned().collect::<Vec<_>>();
        let internal_edges = workflow.internal_edges_of(&group.id).into_iter().cloned().collect::<Vec<_>>();
        let Some(root) = super::flow_roots(workflow, &group.id).into_iter().next().map(|s| s.id.clone()) else {
            return Ok(NodeOutcome::plain(input));
        };

        let mut current = input;
        let mut iterations: u64 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if !do_while && !evaluate_expr(condition, &current) {
                break;
            }

            if iterations >= max_iterations {
                return Err(EngineError::Script(
                    StepError::new("WHL_001", format!("while group exceeded {max_iterations} iterations"))
                        .with_step_run_id(group.id.clone()),
                ));
            }

            let outcomes = engine
                .run_graph(workflow, &members, &internal_edges, &root, current.clone(), ctx, sandbox, run_id, store, events)
                .await?;
            current = merge_terminal_outputs(&outcomes);
            iterations += 1;

            if do_while && !evaluate_expr(condition, &current) {
                break;
            }
        }

        Ok(NodeOutcome::plain(current))
    }
}
