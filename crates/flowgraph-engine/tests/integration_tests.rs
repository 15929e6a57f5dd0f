//! Integration tests for the workflow execution engine: end-to-end runs
//! covering linear chains, port-based branching, `foreach`/`try_catch`/
//! `parallel` groups, and the agent ReAct loop.

use std::sync::Arc;

use async_trait::async_trait;
use flowgraph_engine::{
    BlockCatalog, CapabilityHost, CredentialService, MemoryRunStore, RunStore, RuntimeConfig,
    RuntimeContext, WorkflowEngine,
};
use flowgraph_model::{
    BlockDefinition, BlockGroup, BlockGroupKind, Edge, GroupRole, OutputPort, Run, StepError,
    TriggeredBy, Workflow,
};
use serde_json::{json, Value};

// ============================================================================
// Catalog fixtures
// ============================================================================

/// A catalog with the handful of test-only blocks every scenario below
/// composes: `noop` (identity), `set` (merges `config.fields`), `if`
/// (routes via `__port` on a configured field's truthiness), `throw`
/// (always raises a configured error code), `double` (multiplies
/// `input.item` by 2, for `foreach`), and `echo_tool` (an agent tool).
fn test_catalog() -> Arc<BlockCatalog> {
    let catalog = BlockCatalog::new();

    let mut noop = BlockDefinition::new("test.noop");
    noop.code = Some("return input;".to_string());
    catalog.register(noop).unwrap();

    let mut set = BlockDefinition::new("test.set");
    set.code = Some("return Object.assign({}, input, config.fields || {});".to_string());
    catalog.register(set).unwrap();

    let mut if_block = BlockDefinition::new("test.if");
    if_block.output_ports = vec![
        OutputPort::new("true", true),
        OutputPort::new("false", false),
    ];
    if_block.code = Some(
        "var v = input[config.field]; return Object.assign({}, input, { __port: v ? 'true' : 'false' });"
            .to_string(),
    );
    catalog.register(if_block).unwrap();

    let mut throw_block = BlockDefinition::new("test.throw");
    throw_block.code = Some("throw new Error('[' + config.code + '] boom');".to_string());
    catalog.register(throw_block).unwrap();

    let mut double = BlockDefinition::new("test.double");
    double.code = Some("return { item: input.item * 2 };".to_string());
    catalog.register(double).unwrap();

    let mut echo_tool = BlockDefinition::new("test.echo_tool");
    echo_tool.config_schema = json!({ "type": "object" });
    echo_tool.code = Some("return { echoed: input };".to_string());
    catalog.register(echo_tool).unwrap();

    Arc::new(catalog)
}

// ============================================================================
// Capability host fixtures
// ============================================================================

/// A `CapabilityHost` whose capabilities all fail — sufficient for the
/// scenarios below, none of which touch `ctx.http`/`ctx.vector`/etc.
struct NullHost;

#[async_trait]
impl CapabilityHost for NullHost {
    async fn llm_chat(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "llm not configured in this test"))
    }
    async fn http_call(&self, _method: &str, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "http not configured in this test"))
    }
    async fn memory_call(&self, _method: &str, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "memory not configured in this test"))
    }
    async fn vector_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "vector not configured in this test"))
    }
    async fn embedding_embed(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "embedding not configured in this test"))
    }
    async fn adapter_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "adapter not configured in this test"))
    }
    async fn workflow_run(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "workflow.run not configured in this test"))
    }
    async fn workflow_execute_step(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "workflow.executeStep not configured in this test"))
    }
    async fn request_approval(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "approval not configured in this test"))
    }
}

/// A scripted LLM: returns one queued `tool_calls`/`content` response per
/// call. Lets the agent ReAct test drive a deterministic multi-turn loop
/// without a real provider.
struct ScriptedAgentHost {
    turns: std::sync::Mutex<Vec<Value>>,
}

impl ScriptedAgentHost {
    fn new(turns: Vec<Value>) -> Self {
        Self { turns: std::sync::Mutex::new(turns) }
    }
}

#[async_trait]
impl CapabilityHost for ScriptedAgentHost {
    async fn llm_chat(&self, _args: Value) -> Result<Value, StepError> {
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err(StepError::new("AGENT_002", "scripted host ran out of turns"));
        }
        Ok(turns.remove(0))
    }
    async fn http_call(&self, _method: &str, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn memory_call(&self, _method: &str, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn vector_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn embedding_embed(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn adapter_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn workflow_run(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn workflow_execute_step(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
    async fn request_approval(&self, _args: Value) -> Result<Value, StepError> {
        Err(StepError::new("NOT_CONFIGURED", "unused"))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: WorkflowEngine,
    store: MemoryRunStore,
    ctx: RuntimeContext,
}

impl Harness {
    fn new() -> Self {
        let catalog = test_catalog();
        let credentials = Arc::new(CredentialService::new("test-key"));
        Self {
            engine: WorkflowEngine::new(catalog),
            store: MemoryRunStore::new(),
            ctx: RuntimeContext::new("test-run", RuntimeConfig::default(), credentials),
        }
    }

    async fn execute(
        &self,
        workflow: &Workflow,
        input: Value,
        host: Arc<dyn CapabilityHost>,
    ) -> (Run, Result<(), flowgraph_engine::EngineError>) {
        let start = workflow
            .source_steps()
            .first()
            .expect("workflow needs a source step")
            .id
            .clone();
        let mut run = Run::new("run-1", workflow.id.clone(), start, TriggeredBy::Manual, input);
        let result = self
            .engine
            .execute(workflow, &mut run, &self.ctx, host, &self.store, None)
            .await;
        (run, result)
    }

    fn null_host(&self) -> Arc<dyn CapabilityHost> {
        Arc::new(NullHost)
    }
}

fn step(id: &str, block_slug: &str, name: &str) -> flowgraph_model::Step {
    flowgraph_model::Step::new(id, block_slug, name)
}

/// Builds a `BlockGroup` with its config pre-set, since `BlockGroup::new`
/// starts with an empty object and group executors are entirely
/// config-driven (retry counts, concurrency, loop bounds, agent settings).
fn group(id: &str, name: &str, kind: BlockGroupKind, config: Value) -> BlockGroup {
    let mut g = BlockGroup::new(id, name, kind);
    g.config = config;
    g
}

/// An edge from a step into a block group (the group's own internal edges
/// route among its members separately via `in_group`/`GroupRole`).
fn edge_into_group(id: &str, source_step_id: &str, target_group_id: &str) -> Edge {
    let mut e = Edge::new(id, source_step_id, "__placeholder__");
    e.target_step_id = None;
    e.target_block_group_id = Some(target_group_id.to_string());
    e
}

// ============================================================================
// 1. Linear chain, manual trigger
// ============================================================================

#[tokio::test]
async fn test_linear_chain_manual_trigger() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-linear", "linear chain");
    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(step("set1", "test.set", "Set1").with_config(json!({ "fields": { "a": 1 } })))
        .add_step(step("set2", "test.set", "Set2").with_config(json!({ "fields": { "b": 2 } })))
        .add_edge(Edge::new("e1", "trigger", "set1"))
        .add_edge(Edge::new("e2", "set1", "set2"));

    let host = harness.null_host();
    let (run, result) = harness.execute(&workflow, json!({}), host).await;

    result.expect("linear chain should succeed");
    assert_eq!(run.status, flowgraph_model::RunStatus::Completed);

    let step_runs = harness.store.list_step_runs(&run.id).await.unwrap();
    let set2_run = step_runs.iter().find(|sr| sr.step_id == "set2").expect("set2 should have run");
    assert_eq!(set2_run.output, Some(json!({ "a": 1, "b": 2 })));
}

// ============================================================================
// 2. Condition branch (port-based routing)
// ============================================================================

#[tokio::test]
async fn test_condition_branch_routes_true_only() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-if", "condition branch");
    let mut true_edge = Edge::new("e2", "decide", "on_true");
    true_edge.source_port = Some("true".to_string());
    let mut false_edge = Edge::new("e3", "decide", "on_false");
    false_edge.source_port = Some("false".to_string());

    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(step("decide", "test.if", "Decide").with_config(json!({ "field": "active" })))
        .add_step(step("on_true", "test.set", "OnTrue").with_config(json!({ "fields": { "branch": "true" } })))
        .add_step(step("on_false", "test.set", "OnFalse").with_config(json!({ "fields": { "branch": "false" } })))
        .add_edge(Edge::new("e1", "trigger", "decide"))
        .add_edge(true_edge)
        .add_edge(false_edge);

    let host = harness.null_host();
    let (run, result) = harness.execute(&workflow, json!({ "active": true }), host).await;

    result.expect("branching workflow should succeed");
    assert_eq!(run.status, flowgraph_model::RunStatus::Completed);

    let step_runs = harness.store.list_step_runs(&run.id).await.unwrap();
    assert!(step_runs
        .iter()
        .any(|sr| sr.step_id == "on_true" && sr.status == flowgraph_model::StepRunStatus::Completed));
    assert!(
        step_runs
            .iter()
            .any(|sr| sr.step_id == "on_false" && sr.status == flowgraph_model::StepRunStatus::Skipped),
        "false branch should be skipped, not executed"
    );
}

// ============================================================================
// 3. Foreach, sequential
// ============================================================================

#[tokio::test]
async fn test_foreach_sequential_doubles_each_item() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-foreach", "foreach sequential");
    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(step("double", "test.double", "Double").in_group("loop", GroupRole::Body))
        .add_edge(edge_into_group("e1", "trigger", "loop"));
    workflow.groups.push(group(
        "loop",
        "Loop",
        BlockGroupKind::Foreach,
        json!({ "input_path": "$.items", "parallel": false }),
    ));

    let host = harness.null_host();
    let (run, result) = harness.execute(&workflow, json!({ "items": [1, 2, 3] }), host).await;

    result.expect("foreach workflow should succeed");
    assert_eq!(run.status, flowgraph_model::RunStatus::Completed);

    let step_runs = harness.store.list_step_runs(&run.id).await.unwrap();
    let double_runs: Vec<_> = step_runs.iter().filter(|sr| sr.step_id == "double").collect();
    assert_eq!(double_runs.len(), 3, "double should run once per item");
    let mut outputs: Vec<i64> = double_runs
        .iter()
        .map(|sr| sr.output.as_ref().unwrap().get("item").unwrap().as_i64().unwrap())
        .collect();
    outputs.sort();
    assert_eq!(outputs, vec![2, 4, 6]);
}

// ============================================================================
// 4. Try/catch with retry, routes to on_error after exhausting retries
// ============================================================================

#[tokio::test]
async fn test_try_catch_retries_then_routes_to_on_error() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-trycatch", "try/catch with retry");
    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(
            step("body", "test.throw", "Body")
                .with_config(json!({ "code": "BOOM" }))
                .in_group("tc", GroupRole::Body),
        )
        .add_step(
            step("handler", "test.set", "Handler")
                .with_config(json!({ "fields": { "handled": true } }))
                .in_group("tc", GroupRole::OnError),
        )
        .add_edge(edge_into_group("e1", "trigger", "tc"));
    workflow.groups.push(group(
        "tc",
        "TryCatch",
        BlockGroupKind::TryCatch,
        json!({ "retry_count": 2, "retry_delay_ms": 0 }),
    ));

    let host = harness.null_host();
    let (run, result) = harness.execute(&workflow, json!({}), host).await;

    result.expect("try/catch should recover via on_error");
    assert_eq!(run.status, flowgraph_model::RunStatus::Completed);

    let step_runs = harness.store.list_step_runs(&run.id).await.unwrap();
    let body_attempts = step_runs.iter().filter(|sr| sr.step_id == "body").count();
    assert_eq!(body_attempts, 3, "initial attempt plus 2 retries");
    assert!(step_runs
        .iter()
        .any(|sr| sr.step_id == "handler" && sr.status == flowgraph_model::StepRunStatus::Completed));
}

// ============================================================================
// 5. Parallel, fail-fast
// ============================================================================

#[tokio::test]
async fn test_parallel_fail_fast_propagates_error() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-parallel", "parallel fail-fast");
    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(step("ok_flow", "test.noop", "OkFlow").in_group("par", GroupRole::Body))
        .add_step(
            step("bad_flow", "test.throw", "BadFlow")
                .with_config(json!({ "code": "BOOM" }))
                .in_group("par", GroupRole::Body),
        )
        .add_edge(edge_into_group("e1", "trigger", "par"));
    workflow.groups.push(group(
        "par",
        "Parallel",
        BlockGroupKind::Parallel,
        json!({ "fail_fast": true }),
    ));

    let host = harness.null_host();
    let (run, result) = harness.execute(&workflow, json!({}), host).await;

    assert!(result.is_err(), "a failing flow should fail the whole parallel group");
    assert_eq!(run.status, flowgraph_model::RunStatus::Failed);
}

// ============================================================================
// 6. Agent ReAct loop
// ============================================================================

#[tokio::test]
async fn test_agent_react_loop_invokes_tool_then_answers() {
    let harness = Harness::new();

    let mut workflow = Workflow::new("wf-agent", "agent react loop");
    workflow
        .add_step(step("trigger", "test.noop", "Trigger"))
        .add_step(step("Echo", "test.echo_tool", "Echo").in_group("agent", GroupRole::Body))
        .add_edge(edge_into_group("e1", "trigger", "agent"));
    workflow.groups.push(group(
        "agent",
        "Agent",
        BlockGroupKind::Agent,
        json!({
            "provider": "test",
            "model": "test-model",
            "max_iterations": 4,
            "enable_memory": true,
        }),
    ));

    let host: Arc<dyn CapabilityHost> = Arc::new(ScriptedAgentHost::new(vec![
        json!({
            "tool_calls": [{ "name": "Echo", "arguments": { "q": "hi" } }]
        }),
        json!({ "content": "final answer" }),
    ]));

    let (run, result) = harness.execute(&workflow, json!({ "q": "hi" }), host).await;

    result.expect("agent loop should finish with a final answer");
    assert_eq!(run.status, flowgraph_model::RunStatus::Completed);

    let step_runs = harness.store.list_step_runs(&run.id).await.unwrap();
    assert!(step_runs.iter().any(|sr| sr.step_id == "Echo"));

    let output = run.output.expect("completed run should carry an output");
    let agent_output = &output["agent"];
    assert_eq!(agent_output["response"], json!("final answer"));
    assert_eq!(agent_output["iterations"], json!(1), "one completed tool-call round before the final answer");
    assert_eq!(agent_output["memory_count"], json!(4), "user, assistant tool-call, tool result, assistant final turns");
}
