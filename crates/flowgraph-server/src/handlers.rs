//! HTTP handlers: workflow registration, `StartRun`, and run/step_run
//! lookup, plus stub webhook/approval callback endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use flowgraph_engine::{BlockCatalog, RuntimeContext, WorkflowEngine};
use flowgraph_model::{Run, StepRun, TriggeredBy, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    catalog_size: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        catalog_size: state.catalog.len(),
    })
}

pub async fn register_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Result<Json<Workflow>, ApiError> {
    workflow.validate()?;
    state.workflows.save_workflow(&workflow).await?;
    Ok(Json(workflow))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .workflows
        .get_workflow(&workflow_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("workflow '{workflow_id}' not found")))
}

pub async fn list_workflows(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.workflows.list_workflows().await?))
}

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub start_step_id: Option<String>,
    #[serde(default)]
    pub triggered_by: TriggeredByWire,
    #[serde(default)]
    pub input: Value,
}

/// Wire-level mirror of `flowgraph_model::TriggeredBy` so a missing field
/// defaults to `manual`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredByWire {
    #[default]
    Manual,
    Schedule,
    Webhook,
}

impl From<TriggeredByWire> for TriggeredBy {
    fn from(value: TriggeredByWire) -> Self {
        match value {
            TriggeredByWire::Manual => TriggeredBy::Manual,
            TriggeredByWire::Schedule => TriggeredBy::Schedule,
            TriggeredByWire::Webhook => TriggeredBy::Webhook,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: String,
}

/// `StartRun(workflow_id, start_step_id, triggered_by, input) -> run_id`.
/// Runs the workflow to completion in-process before returning —
/// long-suspend human-approval waits surface as a failed terminal run per
/// `DefaultHost::request_approval`'s stub behavior, since resuming a
/// suspended run from a callback is an external collaborator concern this
/// crate only stubs.
pub async fn start_run(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<StartRunResponse>, ApiError> {
    let workflow = state
        .workflows
        .get_workflow(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("workflow '{workflow_id}' not found")))?;

    let start_step_id = match request.start_step_id {
        Some(id) => id,
        None => workflow
            .source_steps()
            .first()
            .map(|s| s.id.clone())
            .ok_or_else(|| ApiError::bad_request("workflow has no source step to start from"))?,
    };

    let run_id = nanoid::nanoid!();
    let mut run = Run::new(
        run_id.clone(),
        workflow_id,
        start_step_id,
        request.triggered_by.into(),
        request.input,
    );
    state.runs.create_run(&run).await?;

    let catalog: Arc<BlockCatalog> = state.catalog.clone();
    let engine = WorkflowEngine::new(catalog);
    let ctx = RuntimeContext::new(run_id.clone(), state.config.runtime.clone(), state.credentials.clone());

    engine
        .execute(&workflow, &mut run, &ctx, state.host.clone(), state.runs.as_ref(), None)
        .await?;

    Ok(Json(StartRunResponse { run_id }))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    state
        .runs
        .get_run(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run '{run_id}' not found")))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<Run>>, ApiError> {
    Ok(Json(state.runs.list_runs(&workflow_id).await?))
}

pub async fn list_step_runs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<StepRun>>, ApiError> {
    Ok(Json(state.runs.list_step_runs(&run_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(flatten)]
    pub body: Value,
}

/// Stub webhook ingress: signature verification is an external
/// collaborator concern. Accepts the raw payload and reports it
/// was received without dispatching a run — a real deployment validates
/// the signature, resolves the bound workflow, and calls `start_run`.
pub async fn webhook_stub(Json(payload): Json<WebhookPayload>) -> Json<Value> {
    Json(serde_json::json!({ "received": true, "body": payload.body }))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Stub human-approval callback: long-suspend human-in-loop resumption is
/// out of scope for this interface layer. A real deployment looks up the
/// waiting `step_run` by
/// `run_id`/`step_id`, records the decision, and re-enqueues the
/// successor; this endpoint only acknowledges receipt.
pub async fn approval_stub(
    Path((run_id, step_id)): Path<(String, String)>,
    Json(decision): Json<ApprovalDecision>,
) -> Json<Value> {
    Json(serde_json::json!({
        "run_id": run_id,
        "step_id": step_id,
        "approved": decision.approved,
        "note": decision.note,
    }))
}
