//! `Foreach` group: resolves an array at `input_path` and runs the
//! group's member sub-graph once per item, sequentially or concurrently up
//! to `max_workers`. Raises `FOR_002 EMPTY_INPUT` on an empty array.

use super::GroupExecutor;
use crate::error::EngineError;
use crate::expr::resolve_value;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{merge_terminal_outputs, EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use async_trait::async_trait;
use flowgraph_model::{BlockGroup, StepError, Workflow};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;

pub struct Foreach;

#[async_trait]
impl GroupExecutor for Foreach {
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
        let input_path = group.config.get("input_path").and_then(|v| v.as_str()).unwrap_or("$.items");
        let parallel = group.config.get("parallel").and_then(|v| v.as_bool()).unwrap_or(false);
        let max_workers = group.config.get("max_workers").and_then(|v| v.as_u64()).map(|n| n as usize).unwrap_or(1);

        let items = match resolve_value(input_path, &input) {
            Value::Array(items) => items,
            other if other.is_null() => Vec::new(),
            other => vec![other],
        };

        if items.is_empty() {
            return Err(EngineError::Script(
                StepError::new("FOR_002", format!("foreach input at '{input_path}' is empty")).retryable()
                    .with_step_run_id(group.id.clone()),
            ));
        }

        let members = workflow.members_of(&group.id).into_iter().cloned().collect::<Vec<_>>();
        let internal_edges = workflow.internal_edges_of(&group.id).into_iter().cloned().collect::<Vec<_>>();
        let Some(root) = super::flow_roots(workflow, &group.id).into_iter().next().map(|s| s.id.clone()) else {
            return Ok(NodeOutcome::plain(Value::Array(items)));
        };

        let concurrency = if parallel { max_workers.max(1) } else { 1 };

        let results: Vec<Result<Value, StepError>> = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| {
                let members = members.clone();
                let internal_edges = internal_edges.clone();
                let root = root.clone();
                let item_input = serde_json::json!({ "item": item, "index": idx, "context": input.clone() });
                async move {
                    let outcomes = engine
                        .run_graph(workflow, &members, &internal_edges, &root, item_input, ctx, sandbox, run_id, store, events)
                        .await
                        .map_err(|e| e.to_step_error())?;
                    Ok(merge_terminal_outputs(&outcomes))
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut body_outputs = Vec::with_capacity(results.len());
        let mut success_count = 0u64;
        let mut error_count = 0u64;
        for result in results {
            match result {
                Ok(value) => {
                    success_count += 1;
                    body_outputs.push(value);
                }
                Err(err) => {
                    error_count += 1;
                    body_outputs.push(serde_json::json!({ "error": err }));
                }
            }
        }

        let count = body_outputs.len() as u64;
        Ok(NodeOutcome::plain(serde_json::json!({
            "items": body_outputs,
            "count": count,
            "success_count": success_count,
            "error_count": error_count,
        })))
    }
}
