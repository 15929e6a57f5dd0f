//! Agent Engine: a ReAct loop over an `Agent` block group's child
//! steps, used as its tool manifest.
//!
//! Reuses the sandbox's `CapabilityHost::llm_chat`
//! (the same surface `ctx.llm.chat` calls into from script code) rather
//! than introducing a parallel LLM client abstraction, and `RuntimeContext`
//! .memory for conversation history — both already built for C3.

use crate::error::EngineError;
use crate::inherit;
use crate::runtime::RuntimeContext;
use crate::sandbox::Sandbox;
use crate::scheduler::{EventSink, NodeOutcome, WorkflowEngine};
use crate::store::RunStore;
use flowgraph_model::{BlockGroup, StepError, Workflow};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct ToolSpec {
    name: String,
    description: String,
    parameters_schema: Value,
}

/// Runs the `Agent` group's ReAct loop: child steps are the tool manifest,
/// each iteration asks the LLM for either a final answer or tool calls,
/// invokes the matching child step(s), and feeds the observation back.
#[allow(clippy::too_many_arguments)]
pub async fn run_group(
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
    let config = &group.config;
    let provider = config.get("provider").and_then(|v| v.as_str()).unwrap_or("openai").to_string();
    let model = config.get("model").and_then(|v| v.as_str()).unwrap_or("gpt-4o-mini").to_string();
    let system_prompt = config.get("system_prompt").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let max_iterations = config.get("max_iterations").and_then(|v| v.as_u64()).unwrap_or(10);
    let temperature = config.get("temperature").and_then(|v| v.as_f64()).unwrap_or(0.7);
    let tool_choice = config.get("tool_choice").and_then(|v| v.as_str()).unwrap_or("auto").to_string();
    let enable_memory = config.get("enable_memory").and_then(|v| v.as_bool()).unwrap_or(true);
    let memory_window = config.get("memory_window").and_then(|v| v.as_u64()).unwrap_or(20) as usize;

    let memory_key = format!("{run_id}:{}", group.id);

    let members = workflow.members_of(&group.id);
    let tools: Vec<ToolSpec> = members
        .iter()
        .map(|step| {
            let effective = inherit::resolve(&engine.catalog, &step.block_slug);
            let schema = effective.map(|e| e.config_schema).unwrap_or(Value::Object(Default::default()));
            ToolSpec {
                name: step.name.clone(),
                description: format!("Invokes step '{}' ({})", step.name, step.block_slug),
                parameters_schema: schema,
            }
        })
        .collect();

    if enable_memory {
        ctx.memory.add_user(&memory_key, input.clone());
    }

    let mut current_input = input;

    for iteration in 0..max_iterations {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let history = if enable_memory {
            ctx.memory
                .get_last_n(&memory_key, memory_window)
                .into_iter()
                .map(|t| serde_json::json!({ "role": t.role, "content": t.content }))
                .collect::<Vec<_>>()
        } else {
            vec![serde_json::json!({ "role": "user", "content": current_input.clone() })]
        };

        let request = serde_json::json!({
            "provider": provider,
            "model": model,
            "system_prompt": system_prompt,
            "messages": history,
            "temperature": temperature,
            "tool_choice": tool_choice,
            "tools": tools.iter().map(|t| serde_json::json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters_schema,
            })).collect::<Vec<_>>(),
        });

        let response = sandbox
            .host()
            .llm_chat(request)
            .await
            .map_err(EngineError::Script)?;

        let tool_calls = response.get("tool_calls").and_then(|v| v.as_array()).cloned().unwrap_or_default();

        if tool_calls.is_empty() {
            let content = response.get("content").cloned().unwrap_or(Value::Null);
            if enable_memory {
                ctx.memory.add_assistant(&memory_key, content.clone());
            }
            let memory_count = ctx.memory.count(&memory_key);
            return Ok(NodeOutcome::plain(serde_json::json!({
                "response": content,
                "iterations": iteration,
                "memory_count": memory_count,
            })));
        }

        if enable_memory {
            ctx.memory.add_assistant(&memory_key, response.clone());
        }

        for call in &tool_calls {
            let tool_name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let arguments = call.get("arguments").cloned().unwrap_or(Value::Null);

            let Some(step) = members.iter().find(|s| s.name == tool_name) else {
                let err = StepError::new("AGENT_002", format!("agent requested unknown tool '{tool_name}'"));
                if enable_memory {
                    ctx.memory.add_tool(&memory_key, serde_json::json!({ "tool": tool_name, "error": err.message }));
                }
                return Err(EngineError::Script(err));
            };

            let observation = engine
                .execute_step(step, arguments, ctx, sandbox, run_id, store, events)
                .await;

            match observation {
                Ok(outcome) => {
                    current_input = outcome.value.clone();
                    if enable_memory {
                        ctx.memory.add_tool(&memory_key, serde_json::json!({ "tool": tool_name, "result": outcome.value }));
                    }
                }
                Err(e) => {
                    let step_error = e.to_step_error();
                    if enable_memory {
                        ctx.memory.add_tool(&memory_key, serde_json::json!({ "tool": tool_name, "error": step_error.message }));
                    }
                    if !step_error.retryable {
                        return Err(EngineError::Script(StepError::new(
                            "AGENT_002",
                            format!("tool '{tool_name}' failed: {}", step_error.message),
                        )));
                    }
                }
            }
        }
    }

    Err(EngineError::MaxIterations(format!(
        "agent exceeded {max_iterations} iterations"
    )))
}
