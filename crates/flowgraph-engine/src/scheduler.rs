//! Scheduler: the ready-set execution algorithm driving one run.
//!
//! Tracks per-edge satisfaction, resolves chosen-port routing, merges joins,
//! propagates cancelled edges, skips unreachable steps, and retries failed
//! steps with exponential backoff.

use crate::credentials::CredentialService;
use crate::error::EngineError;
use crate::groups;
use crate::inherit::{self, EffectiveBlock};
use crate::runtime::RuntimeContext;
use crate::sandbox::{CapabilityHost, Sandbox};
use crate::store::RunStore;
use crate::BlockCatalog;
use flowgraph_model::{Edge, Run, RunStatus, Step, StepRun, StepRunStatus, Workflow};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Narration of a run's progress, emitted as the scheduler drives steps.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Started { run_id: String },
    StepStarted { step_id: String },
    StepFinished { step_id: String, status: String },
    GroupStarted { group_id: String },
    GroupFinished { group_id: String, status: String },
    Finished { status: String },
    Error { message: String },
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<ExecutionEvent>;

/// Output of running one node (step or group): the produced value plus
/// whatever port/branch hint it carried.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub value: Value,
    pub port: Option<String>,
    pub branch: Option<String>,
    /// Set when this outcome carries a failure payload routed onto an
    /// `error` port (per-block `enable_error_port` or a group's own error
    /// exit) rather than an ordinary value. Per §7, such an outcome only
    /// counts as "handled" if an outgoing edge actually consumes it —
    /// otherwise it still bubbles up and fails the run.
    pub is_error: bool,
}

impl NodeOutcome {
    pub fn plain(value: Value) -> Self {
        Self { value, port: None, branch: None, is_error: false }
    }
}

struct EdgeState {
    satisfied: bool,
    cancelled: bool,
    value: Value,
}

/// Drives one run (or one group's internal member graph) to completion.
pub struct WorkflowEngine {
    pub catalog: Arc<BlockCatalog>,
}

impl WorkflowEngine {
    pub fn new(catalog: Arc<BlockCatalog>) -> Self {
        Self { catalog }
    }

    /// Runs an entire workflow starting at `run.start_step_id`, persisting
    /// run/step_run records as it goes, and leaves `run` in a terminal
    /// status on return.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        run: &mut Run,
        ctx: &RuntimeContext,
        host: Arc<dyn CapabilityHost>,
        store: &dyn RunStore,
        events: Option<EventSink>,
    ) -> Result<(), EngineError> {
        if workflow.get_step(&run.start_step_id).is_none() {
            return Err(EngineError::NoStartStep);
        }

        run.start();
        store.update_run(run).await?;
        emit(&events, ExecutionEvent::Started { run_id: run.id.clone() });

        let sandbox = Arc::new(Sandbox::new(host));
        let top_level_steps: Vec<Step> = workflow
            .steps
            .iter()
            .filter(|s| s.block_group_id.is_none())
            .cloned()
            .collect();

        let run_id = run.id.clone();
        let result = self
            .run_graph(
                workflow,
                &top_level_steps,
                &workflow.edges,
                &run.start_step_id,
                run.input.clone(),
                ctx,
                &sandbox,
                &run_id,
                store,
                &events,
            )
            .await;

        match result {
            Ok(outcomes) => {
                let output = merge_terminal_outputs(&outcomes);
                run.finish(RunStatus::Completed, Some(output));
                store.update_run(run).await?;
                emit(&events, ExecutionEvent::Finished { status: "completed".into() });
                Ok(())
            }
            Err(EngineError::Cancelled) => {
                run.finish(RunStatus::Cancelled, None);
                store.update_run(run).await?;
                emit(&events, ExecutionEvent::Finished { status: "cancelled".into() });
                Ok(())
            }
            Err(e) => {
                run.finish(RunStatus::Failed, None);
                store.update_run(run).await?;
                emit(&events, ExecutionEvent::Error { message: e.to_string() });
                emit(&events, ExecutionEvent::Finished { status: "failed".into() });
                Err(e)
            }
        }
    }

    /// Runs the ready-set algorithm over a node set (`steps` plus any
    /// `BlockGroup`s referenced by `edges`) starting from `start_id`.
    /// Returns the terminal nodes' outcomes (nodes with no outgoing edge,
    /// or whose outgoing edges all point outside this scope).
    #[allow(clippy::too_many_arguments)]
    pub async fn run_graph(
        &self,
        workflow: &Workflow,
        steps: &[Step],
        edges: &[Edge],
        start_id: &str,
        start_input: Value,
        ctx: &RuntimeContext,
        sandbox: &Arc<Sandbox>,
        run_id: &str,
        store: &dyn RunStore,
        events: &Option<EventSink>,
    ) -> Result<HashMap<String, NodeOutcome>, EngineError> {
        let node_ids: HashSet<String> = steps
            .iter()
            .map(|s| s.id.clone())
            .chain(edges.iter().filter_map(|e| e.source_block_group_id.clone()))
            .chain(edges.iter().filter_map(|e| e.target_block_group_id.clone()))
            .collect();

        let mut in_deg: HashMap<String, usize> = node_ids.iter().map(|id| (id.clone(), 0)).collect();
        let mut incoming: HashMap<String, Vec<usize>> = node_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        let mut outgoing: HashMap<String, Vec<usize>> = node_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        for (idx, edge) in edges.iter().enumerate() {
            if let (Some(src), Some(dst)) = (edge.source_id(), edge.target_id()) {
                if node_ids.contains(src) && node_ids.contains(dst) {
                    *in_deg.get_mut(dst).unwrap() += 1;
                    incoming.get_mut(dst).unwrap().push(idx);
                    outgoing.get_mut(src).unwrap().push(idx);
                }
            }
        }

        let mut edge_state: Vec<EdgeState> = edges
            .iter()
            .map(|_| EdgeState { satisfied: false, cancelled: false, value: Value::Null })
            .collect();

        let mut outcomes: HashMap<String, NodeOutcome> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        ready.push_back(start_id.to_string());
        visited.insert(start_id.to_string());

        while let Some(node_id) = pop_deterministic(&mut ready) {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let input = if node_id == start_id {
                start_input.clone()
            } else {
                merge_incoming(&incoming[&node_id], &edge_state)
            };

            let outcome = self
                .execute_node(workflow, &node_id, input, ctx, sandbox, run_id, store, events)
                .await?;

            let chosen_port = outcome
                .port
                .clone()
                .or_else(|| outcome.branch.clone().filter(|b| self.port_exists(workflow, &node_id, b)));

            outcomes.insert(node_id.clone(), outcome.clone());

            let mut port_routed = false;

            for &idx in &outgoing[&node_id] {
                let edge = &edges[idx];
                let port_matches = match (&edge.source_port, &chosen_port) {
                    (None, _) => true,
                    (Some(p), Some(chosen)) => p == chosen,
                    (Some(_), None) => false,
                };

                let condition_ok = match &edge.condition {
                    Some(cond) => crate::expr::evaluate_expr(cond, &outcome.value),
                    None => true,
                };

                let target = edge.target_id().unwrap().to_string();
                if port_matches && condition_ok {
                    edge_state[idx].satisfied = true;
                    edge_state[idx].value = outcome.value.clone();
                    port_routed = port_routed || port_matches;
                } else {
                    edge_state[idx].cancelled = true;
                }

                let deg = in_deg.get_mut(&target).unwrap();
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    let has_satisfied_incoming =
                        incoming[&target].iter().any(|&i| edge_state[i].satisfied);
                    if has_satisfied_incoming && visited.insert(target.clone()) {
                        ready.push_back(target);
                    }
                }
            }

            // An error-port outcome with no edge actually wired to consume it
            // is not "handled" per §7 — it still bubbles and fails the run.
            if outcome.is_error && !port_routed {
                let step_error = outcome
                    .value
                    .get("error")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<flowgraph_model::StepError>(v).ok())
                    .unwrap_or_else(|| {
                        flowgraph_model::StepError::new("UNROUTED_ERROR", "error port output had no consuming edge")
                    });
                return Err(EngineError::Script(step_error));
            }
        }

        // Any node never visited (unreachable given the chosen ports) is
        // recorded as skipped.
        for node_id in &node_ids {
            if !visited.contains(node_id) {
                self.mark_skipped(workflow, node_id, run_id, store, events).await?;
            }
        }

        Ok(outcomes)
    }

    fn port_exists(&self, workflow: &Workflow, node_id: &str, port: &str) -> bool {
        workflow
            .get_step(node_id)
            .and_then(|s| self.catalog.get(&s.block_slug))
            .map(|b| b.output_ports.iter().any(|p| p.name == port))
            .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn execute_node(
        &self,
        workflow: &Workflow,
        node_id: &str,
        input: Value,
        ctx: &RuntimeContext,
        sandbox: &Arc<Sandbox>,
        run_id: &str,
        store: &dyn RunStore,
        events: &Option<EventSink>,
    ) -> Result<NodeOutcome, EngineError> {
        if let Some(step) = workflow.get_step(node_id) {
            self.execute_step(step, input, ctx, sandbox, run_id, store, events).await
        } else if let Some(group) = workflow.get_group(node_id) {
            emit(events, ExecutionEvent::GroupStarted { group_id: group.id.clone() });
            let result = groups::dispatch(self, workflow, group, input, ctx, sandbox, run_id, store, events).await;
            let status = if result.is_ok() { "completed" } else { "failed" };
            emit(events, ExecutionEvent::GroupFinished { group_id: group.id.clone(), status: status.into() });
            result
        } else {
            Err(EngineError::InvalidState(format!("unknown node id {node_id}")))
        }
    }

    /// Executes a single (non-group) step with retry/backoff, persisting a
    /// fresh `StepRun` attempt record per retry.
    pub(crate) async fn execute_step(
        &self,
        step: &Step,
        input: Value,
        ctx: &RuntimeContext,
        sandbox: &Arc<Sandbox>,
        run_id: &str,
        store: &dyn RunStore,
        events: &Option<EventSink>,
    ) -> Result<NodeOutcome, EngineError> {
        let effective = inherit::resolve(&self.catalog, &step.block_slug)?;
        emit(events, ExecutionEvent::StepStarted { step_id: step.id.clone() });

        let mut attempt: u32 = 1;
        let mut delay = ctx.config.default_retry_delay_ms;

        loop {
            let mut step_run = StepRun::new(
                nanoid::nanoid!(),
                run_id.to_string(),
                step.id.clone(),
                input.clone(),
                attempt,
            );
            step_run.status = StepRunStatus::Running;
            store.append_step_run(&step_run).await?;

            let secrets = self.resolve_secrets(&effective, ctx).await?;
            let config = effective.effective_config(&step.config);

            let outcome = sandbox
                .run_pipeline(
                    effective.pre_process.as_deref(),
                    effective.code.as_deref().unwrap_or("return input;"),
                    effective.post_process.as_deref(),
                    input.clone(),
                    config,
                    secrets,
                    ctx.config.default_timeout_ms,
                )
                .await;

            match outcome {
                Ok(script_out) => {
                    step_run.complete(script_out.value.clone(), script_out.port.clone(), script_out.branch.clone());
                    store.update_step_run(&step_run).await?;
                    emit(events, ExecutionEvent::StepFinished { step_id: step.id.clone(), status: "completed".into() });
                    return Ok(NodeOutcome {
                        value: script_out.value,
                        port: script_out.port,
                        branch: script_out.branch,
                        is_error: false,
                    });
                }
                Err(engine_err) => {
                    let step_error = engine_err.to_step_error().with_step_run_id(step_run.id.clone());
                    let retryable = step_error.retryable || effective.is_retryable(&step_error.code);

                    step_run.fail(step_error.clone());
                    store.update_step_run(&step_run).await?;

                    if retryable && attempt < max_attempts(&step.config) {
                        warn!(step = %step.id, attempt, "step failed, retrying after {delay}ms: {step_error}");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        delay = (delay * 2).min(ctx.config.max_retry_delay_ms);
                        attempt += 1;
                        continue;
                    }

                    emit(events, ExecutionEvent::StepFinished { step_id: step.id.clone(), status: "failed".into() });

                    if effective.enable_error_port && effective.has_port("error") {
                        return Ok(NodeOutcome {
                            value: serde_json::json!({ "error": step_error }),
                            port: Some("error".to_string()),
                            branch: None,
                            is_error: true,
                        });
                    }

                    return Err(EngineError::Script(step_error));
                }
            }
        }
    }

    async fn resolve_secrets(&self, effective: &EffectiveBlock, ctx: &RuntimeContext) -> Result<Value, EngineError> {
        let mut map = serde_json::Map::new();
        for name in &effective.required_credentials {
            if let Some(value) = ctx.get_state(&format!("__credential:{name}")).await {
                map.insert(name.clone(), value);
            }
        }
        Ok(Value::Object(map))
    }

    async fn mark_skipped(
        &self,
        workflow: &Workflow,
        node_id: &str,
        run_id: &str,
        store: &dyn RunStore,
        events: &Option<EventSink>,
    ) -> Result<(), EngineError> {
        if let Some(step) = workflow.get_step(node_id) {
            let mut step_run = StepRun::new(nanoid::nanoid!(), run_id.to_string(), step.id.clone(), Value::Null, 1);
            step_run.skip();
            store.append_step_run(&step_run).await?;
            emit(events, ExecutionEvent::StepFinished { step_id: step.id.clone(), status: "skipped".into() });
        }
        Ok(())
    }
}

/// Reads `config.max_attempts` (default 1 — no retry) from a step's config,
/// independent of the block's declared `error_codes[].retryable` flag.
fn max_attempts(step_config: &Value) -> u32 {
    step_config
        .get("max_attempts")
        .and_then(|v| v.as_u64())
        .map(|n| n.max(1) as u32)
        .unwrap_or(1)
}

fn pop_deterministic(ready: &mut VecDeque<String>) -> Option<String> {
    if ready.is_empty() {
        return None;
    }
    let mut items: Vec<String> = ready.drain(..).collect();
    items.sort();
    let first = items.remove(0);
    ready.extend(items);
    Some(first)
}

/// Merges all satisfied incoming edges' values, shallow-spread, later edge
/// (by index, i.e. declaration order) wins. Cancelled edges contribute
/// nothing.
fn merge_incoming(edge_indices: &[usize], edge_state: &[EdgeState]) -> Value {
    let mut merged = serde_json::Map::new();
    let mut last_scalar = Value::Null;

    for &idx in edge_indices {
        let state = &edge_state[idx];
        if !state.satisfied {
            continue;
        }
        match &state.value {
            Value::Object(map) => {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
            other => last_scalar = other.clone(),
        }
    }

    if merged.is_empty() {
        last_scalar
    } else {
        Value::Object(merged)
    }
}

pub(crate) fn merge_terminal_outputs(outcomes: &HashMap<String, NodeOutcome>) -> Value {
    let mut merged = serde_json::Map::new();
    for (id, outcome) in outcomes {
        merged.insert(id.clone(), outcome.value.clone());
    }
    Value::Object(merged)
}

fn emit(sink: &Option<EventSink>, event: ExecutionEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event.clone());
    }
    match &event {
        ExecutionEvent::Error { message } => warn!("{message}"),
        other => info!(?other, "execution event"),
    }
}

/// Resolves a credential by name through the run's `CredentialService`,
/// decrypting into `ctx` state under `__credential:<name>` so the sandbox's
/// `ctx.secrets` can be bound without re-touching the store per step.
pub async fn preload_credential(
    ctx: &RuntimeContext,
    credentials: &Arc<CredentialService>,
    name: &str,
    encrypted: &str,
) -> Result<(), EngineError> {
    let decrypted = credentials
        .decrypt_string(encrypted)
        .map_err(|e| EngineError::Credential(e.to_string()))?;
    ctx.set_state(format!("__credential:{name}"), Value::String(decrypted)).await;
    Ok(())
}
