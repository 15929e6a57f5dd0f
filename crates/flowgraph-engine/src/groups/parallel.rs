//! `Parallel` group: runs each declared flow (a member sub-chain
//! rooted at a step with no internal incoming edge) concurrently up to
//! `max_concurrent`, in declaration order when fan-out is unlimited.

use super::{flow_roots, GroupExecutor};
use crate::error::EngineError;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use async_trait::async_trait;
use flowgraph_model::{BlockGroup, Step, Workflow};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Parallel;

#[async_trait]
impl GroupExecutor for Parallel {
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
        let max_concurrent = group
            .config
            .get("max_concurrent")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(0);
        let fail_fast = group
            .config
            .get("fail_fast")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let members: Vec<Step> = workflow.members_of(&group.id).into_iter().cloned().collect();
        let internal_edges = workflow.internal_edges_of(&group.id).into_iter().cloned().collect::<Vec<_>>();
        let roots: Vec<Step> = flow_roots(workflow, &group.id).into_iter().cloned().collect();

        if roots.is_empty() {
            return Ok(NodeOutcome::plain(input));
        }

        let concurrency = if max_concurrent == 0 { roots.len() } else { max_concurrent };
        let failed = Arc::new(AtomicBool::new(false));

        // `buffered` (not `buffer_unordered`) preserves declaration order in
        // the collected `Vec` even though flows race each other internally.
        let results: Vec<(String, Result<Value, EngineError>)> = stream::iter(roots.into_iter())
            .map(|root| {
                let input = input.clone();
                let members = members.clone();
                let internal_edges = internal_edges.clone();
                let failed = failed.clone();
                async move {
                    if fail_fast && failed.load(Ordering::Relaxed) {
                        return (root.id.clone(), Err(EngineError::Cancelled));
                    }
                    let outcomes = engine
                        .run_graph(workflow, &members, &internal_edges, &root.id, input, ctx, sandbox, run_id, store, events)
                        .await;
                    match outcomes {
                        Ok(map) => (root.id.clone(), Ok(crate::scheduler::merge_terminal_outputs(&map))),
                        Err(e) => {
                            failed.store(true, Ordering::Relaxed);
                            (root.id.clone(), Err(e))
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        if fail_fast {
            if let Some((flow_id, Err(e))) = results.iter().find(|(_, r)| r.is_err()) {
                let step_error = e.to_step_error();
                return Ok(NodeOutcome {
                    value: serde_json::json!({ "failed_flow": flow_id, "error": step_error }),
                    port: Some("error".to_string()),
                    branch: None,
                    is_error: true,
                });
            }
        }

        let results: Vec<Value> = results
            .into_iter()
            .map(|(flow_id, r)| match r {
                Ok(value) => value,
                Err(e) => serde_json::json!({ "failed_flow": flow_id, "error": e.to_step_error() }),
            })
            .collect();

        Ok(NodeOutcome::plain(serde_json::json!({ "results": results })))
    }
}
