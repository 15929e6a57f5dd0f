//! `TryCatch` group: runs its `Body` member steps, retrying up to
//! `retry_count` times with `retry_delay_ms` between attempts, then routes
//! to `OnError` or `OnSuccess` members. State machine: `idle -> attempting(n)
//! -> success | retry_wait | exhausted`.

use super::GroupExecutor;
use crate::error::EngineError;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{merge_terminal_outputs, EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use async_trait::async_trait;
use flowgraph_model::{BlockGroup, GroupRole, Step, Workflow};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Duration;

pub struct TryCatch;

#[async_trait]
impl GroupExecutor for TryCatch {
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
        let retry_count = group.config.get("retry_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let retry_delay_ms = group.config.get("retry_delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);

        let members = workflow.members_of(&group.id);
        let body: Vec<Step> = members
            .iter()
            .filter(|s| matches!(s.group_role, Some(GroupRole::Body) | None))
            .map(|s| (*s).clone())
            .collect();
        let body_edges = workflow
            .internal_edges_of(&group.id)
            .into_iter()
            .filter(|e| {
                e.source_id().map(|id| body.iter().any(|s| s.id == id)).unwrap_or(false)
                    && e.target_id().map(|id| body.iter().any(|s| s.id == id)).unwrap_or(false)
            })
            .cloned()
            .collect::<Vec<_>>();

        let Some(body_root) = super::flow_roots(workflow, &group.id)
            .into_iter()
            .find(|s| matches!(s.group_role, Some(GroupRole::Body) | None))
            .map(|s| s.id.clone())
        else {
            return Ok(NodeOutcome::plain(input));
        };

        let mut attempt = 0u64;
        let body_result = loop {
            let result = engine
                .run_graph(workflow, &body, &body_edges, &body_root, input.clone(), ctx, sandbox, run_id, store, events)
                .await;

            match result {
                Ok(map) => break Ok(merge_terminal_outputs(&map)),
                Err(e) => {
                    if attempt < retry_count {
                        attempt += 1;
                        if retry_delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                        }
                        continue;
                    }
                    break Err((e, attempt + 1));
                }
            }
        };

        match body_result {
            Ok(output) => {
                let mut outcome =
                    run_role(engine, workflow, group, GroupRole::OnSuccess, output, ctx, sandbox, run_id, store, events).await?;
                outcome.port = Some("out".to_string());
                Ok(outcome)
            }
            Err((e, attempts)) => {
                let step_error = e.to_step_error();
                let err_input = serde_json::json!({
                    "error": step_error,
                    "code": step_error.code,
                    "attempts": attempts,
                });
                let has_on_error = workflow
                    .members_of(&group.id)
                    .iter()
                    .any(|s| s.group_role == Some(GroupRole::OnError));
                if !has_on_error {
                    return Err(e);
                }
                let mut outcome =
                    run_role(engine, workflow, group, GroupRole::OnError, err_input, ctx, sandbox, run_id, store, events).await?;
                outcome.port = Some("error".to_string());
                Ok(outcome)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_role(
    engine: &WorkflowEngine,
    workflow: &Workflow,
    group: &BlockGroup,
    role: GroupRole,
    input: Value,
    ctx: &RuntimeContext,
    sandbox: &Arc<Sandbox>,
    run_id: &str,
    store: &dyn RunStore,
    events: &Option<EventSink>,
) -> Result<NodeOutcome, EngineError> {
    let members = workflow.members_of(&group.id);
    let role_steps: Vec<Step> = members.iter().filter(|s| s.group_role == Some(role.clone())).map(|s| (*s).clone()).collect();

    if role_steps.is_empty() {
        return Ok(NodeOutcome::plain(input));
    }

    let role_edges = workflow
        .internal_edges_of(&group.id)
        .into_iter()
        .filter(|e| {
            e.source_id().map(|id| role_steps.iter().any(|s| s.id == id)).unwrap_or(false)
                && e.target_id().map(|id| role_steps.iter().any(|s| s.id == id)).unwrap_or(false)
        })
        .cloned()
        .collect::<Vec<_>>();

    let Some(root) = role_steps
        .iter()
        .find(|s| !role_edges.iter().any(|e| e.target_id() == Some(s.id.as_str())))
        .map(|s| s.id.clone())
    else {
        return Ok(NodeOutcome::plain(input));
    };

    let outcomes = engine
        .run_graph(workflow, &role_steps, &role_edges, &root, input, ctx, sandbox, run_id, store, events)
        .await?;
    Ok(NodeOutcome::plain(merge_terminal_outputs(&outcomes)))
}
