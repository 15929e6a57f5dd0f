//! Script Sandbox: runs block `code`/`pre_process`/`post_process` and
//! condition expressions as JS snippets with a restricted `ctx` capability
//! bag, a wall-clock timeout, and a soft memory/iteration cap.
//!
//! Built on `boa_engine`, a pure-Rust ECMAScript interpreter, for the
//! run-untrusted-script need. Credentials are resolved host-side before the
//! script runs and bound as plain values under `ctx.secrets` — the
//! capability bag's other
//! surfaces (`llm`, `http`, `memory`, `vector`, `embedding`, `adapter`,
//! `workflow`, `human`) round-trip through a single native `__host_call`
//! that bridges into the async `CapabilityHost` via `block_in_place`.

use crate::error::EngineError;
use async_trait::async_trait;
use boa_engine::{
    js_string, native_function::NativeFunction, property::Attribute, Context, JsResult, JsValue,
    Source,
};
use flowgraph_model::StepError;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

/// Host-side implementations of the `ctx` capability bag. All methods are
/// async because they cross back into the engine (LLM calls, HTTP, run
/// storage, etc); the sandbox bridges to them synchronously from inside Boa
/// via `tokio::task::block_in_place`.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    async fn llm_chat(&self, args: Value) -> Result<Value, StepError>;
    async fn http_call(&self, method: &str, args: Value) -> Result<Value, StepError>;
    async fn memory_call(&self, method: &str, args: Value) -> Result<Value, StepError>;
    async fn vector_call(&self, method: &str, args: Value) -> Result<Value, StepError>;
    async fn embedding_embed(&self, args: Value) -> Result<Value, StepError>;
    async fn adapter_call(&self, args: Value) -> Result<Value, StepError>;
    async fn workflow_run(&self, args: Value) -> Result<Value, StepError>;
    async fn workflow_execute_step(&self, args: Value) -> Result<Value, StepError>;
    async fn request_approval(&self, args: Value) -> Result<Value, StepError>;
}

/// Output of running a script pipeline: the returned value, plus any
/// `__port`/`__branch` routing hint it carried.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub value: Value,
    pub port: Option<String>,
    pub branch: Option<String>,
}

impl ScriptOutput {
    fn from_value(mut value: Value) -> Self {
        let (port, branch) = if let Value::Object(map) = &mut value {
            let port = map.remove("__port").and_then(|v| v.as_str().map(String::from));
            let branch = map.remove("__branch").and_then(|v| v.as_str().map(String::from));
            (port, branch)
        } else {
            (None, None)
        };
        Self { value, port, branch }
    }
}

const CTX_BOOTSTRAP_JS: &str = r#"
(function() {
    function call(capability, method, args) {
        const raw = __host_call(capability, method, JSON.stringify(args === undefined ? [] : args));
        return JSON.parse(raw);
    }
    globalThis.ctx.llm = { chat: (provider, model, opts) => call("llm", "chat", [provider, model, opts]) };
    globalThis.ctx.http = {
        request: (opts) => call("http", "request", [opts]),
        get: (url, opts) => call("http", "get", [url, opts]),
        post: (url, body, opts) => call("http", "post", [url, body, opts]),
    };
    globalThis.ctx.memory = {
        add: (turn) => call("memory", "add", [turn]),
        getLastN: (n) => call("memory", "getLastN", [n]),
        addUser: (content) => call("memory", "addUser", [content]),
        addAssistant: (content) => call("memory", "addAssistant", [content]),
        addTool: (content) => call("memory", "addTool", [content]),
        clear: () => call("memory", "clear", []),
    };
    globalThis.ctx.vector = {
        upsert: (args) => call("vector", "upsert", [args]),
        query: (args) => call("vector", "query", [args]),
        delete: (args) => call("vector", "delete", [args]),
    };
    globalThis.ctx.embedding = { embed: (args) => call("embedding", "embed", [args]) };
    globalThis.ctx.adapter = { call: (args) => call("adapter", "call", [args]) };
    globalThis.ctx.workflow = {
        run: (args) => call("workflow", "run", [args]),
        executeStep: (args) => call("workflow", "executeStep", [args]),
    };
    globalThis.ctx.crypto = { hmacSha256: (key, msg) => __host_hmac_sha256(key, msg) };
    globalThis.ctx.log = (level, msg, data) => __host_log(level, msg, JSON.stringify(data === undefined ? null : data));
    globalThis.ctx.human = { requestApproval: (args) => call("human", "requestApproval", [args]) };
})();
"#;

pub struct Sandbox {
    host: Arc<dyn CapabilityHost>,
}

impl Sandbox {
    pub fn new(host: Arc<dyn CapabilityHost>) -> Self {
        Self { host }
    }

    /// The capability host backing this sandbox — the agent loop
    /// reuses `llm_chat` directly rather than duplicating an LLM client.
    pub fn host(&self) -> &Arc<dyn CapabilityHost> {
        &self.host
    }

    /// Runs `pre_process` + `code` + `post_process` as a pipeline:
    /// `out = post(code(pre(input)))`. `pre_process` may mutate `config`
    /// and stash data under `__preserved_for_postprocess` in its returned
    /// input for `post_process` to observe.
    pub async fn run_pipeline(
        &self,
        pre_process: Option<&str>,
        code: &str,
        post_process: Option<&str>,
        input: Value,
        config: Value,
        secrets: Value,
        timeout_ms: u64,
    ) -> Result<ScriptOutput, EngineError> {
        let mut current_input = input;
        let mut current_config = config;

        if let Some(pre) = pre_process {
            let result = self
                .run_one(pre, current_input.clone(), current_config.clone(), secrets.clone(), timeout_ms)
                .await?;
            if let Value::Object(cfg_updates) = &result.value {
                if let Some(Value::Object(updated_config)) = cfg_updates.get("__config").cloned() {
                    if let Value::Object(cfg) = &mut current_config {
                        for (k, v) in updated_config {
                            cfg.insert(k, v);
                        }
                    }
                }
            }
            current_input = result.value;
        }

        // §9 open question: a block's script (e.g. `wait`) may construct a
        // `new Promise(resolve => setTimeout(resolve, ...))` without awaiting
        // it — Boa has no timer/job queue to honour that itself. The engine
        // honours `config.duration_ms` natively instead, regardless of what
        // the script does with it.
        if let Some(duration_ms) = current_config.get("duration_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }

        let mut result = self
            .run_one(code, current_input.clone(), current_config.clone(), secrets.clone(), timeout_ms)
            .await?;

        if let Some(post) = post_process {
            result = self
                .run_one(post, result.value, current_config, secrets, timeout_ms)
                .await?;
        }

        Ok(result)
    }

    async fn run_one(
        &self,
        script: &str,
        input: Value,
        config: Value,
        secrets: Value,
        timeout_ms: u64,
    ) -> Result<ScriptOutput, EngineError> {
        let host = self.host.clone();
        let script = script.to_string();

        let handle = tokio::task::spawn_blocking(move || {
            tokio::task::block_in_place(|| run_in_boa(&script, input, config, secrets, host))
        });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::Internal(format!("sandbox task panicked: {join_err}"))),
            Err(_) => Err(EngineError::Timeout(timeout_ms)),
        }
    }
}

fn run_in_boa(
    script: &str,
    input: Value,
    config: Value,
    secrets: Value,
    host: Arc<dyn CapabilityHost>,
) -> Result<ScriptOutput, EngineError> {
    let mut context = Context::default();

    // Soft CPU/recursion guard complementing the wall-clock timeout — Boa
    // has no hard memory ceiling, so this only bounds runaway loops.
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(10_000_000);
    context.runtime_limits_mut().set_recursion_limit(1_024);

    bind_json(&mut context, "input", &input)?;
    bind_json(&mut context, "config", &config)?;

    let ctx_obj = boa_engine::object::ObjectInitializer::new(&mut context)
        .property(js_string!("secrets"), JsValue::undefined(), Attribute::all())
        .build();
    context
        .global_object()
        .set(js_string!("ctx"), ctx_obj, false, &mut context)
        .map_err(boa_to_engine_err)?;
    bind_json(&mut context, "__secrets_raw", &secrets)?;
    context
        .eval(Source::from_bytes(
            "ctx.secrets = __secrets_raw; delete globalThis.__secrets_raw;",
        ))
        .map_err(boa_to_engine_err)?;

    register_host_call(&mut context, host.clone());
    register_hmac(&mut context);
    register_log(&mut context);

    context
        .eval(Source::from_bytes(CTX_BOOTSTRAP_JS))
        .map_err(boa_to_engine_err)?;

    let result = context
        .eval(Source::from_bytes(script))
        .map_err(|e| EngineError::Script(StepError::from_thrown(&e.to_string())))?;

    let json = result
        .to_json(&mut context)
        .map_err(boa_to_engine_err)?
        .unwrap_or(Value::Null);

    Ok(ScriptOutput::from_value(json))
}

fn bind_json(context: &mut Context, name: &str, value: &Value) -> Result<(), EngineError> {
    let js_value = JsValue::from_json(value, context).map_err(boa_to_engine_err)?;
    context
        .global_object()
        .set(js_string!(name), js_value, false, context)
        .map_err(boa_to_engine_err)?;
    Ok(())
}

fn boa_to_engine_err(e: boa_engine::JsError) -> EngineError {
    EngineError::Script(StepError::from_thrown(&e.to_string()))
}

fn register_host_call(context: &mut Context, host: Arc<dyn CapabilityHost>) {
    let callback = move |_this: &JsValue, args: &[JsValue], ctx: &mut Context| -> JsResult<JsValue> {
        let capability = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped());
        let method = args.get(1).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped());
        let args_json = args.get(2).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped());

        let (capability, method, args_json) = match (capability, method, args_json) {
            (Some(c), Some(m), Some(a)) => (c, m, a),
            _ => return Err(boa_engine::JsNativeError::typ().with_message("invalid __host_call arguments").into()),
        };

        let parsed: Value = serde_json::from_str(&args_json).unwrap_or(Value::Null);
        let host = host.clone();

        let result: Result<Value, StepError> = tokio::runtime::Handle::current().block_on(async move {
            dispatch_capability(&host, &capability, &method, parsed).await
        });

        match result {
            Ok(value) => {
                let text = serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string());
                Ok(JsValue::from(js_string!(text)))
            }
            Err(e) => Err(boa_engine::JsNativeError::error().with_message(e.to_string()).into()),
        }
    };

    context
        .register_global_callable(
            js_string!("__host_call"),
            3,
            NativeFunction::from_copy_closure(callback),
        )
        .expect("registering __host_call");
}

async fn dispatch_capability(
    host: &Arc<dyn CapabilityHost>,
    capability: &str,
    method: &str,
    args: Value,
) -> Result<Value, StepError> {
    match capability {
        "llm" => host.llm_chat(args).await,
        "http" => host.http_call(method, args).await,
        "memory" => host.memory_call(method, args).await,
        "vector" => host.vector_call(method, args).await,
        "embedding" => host.embedding_embed(args).await,
        "adapter" => host.adapter_call(args).await,
        "workflow" => match method {
            "run" => host.workflow_run(args).await,
            _ => host.workflow_execute_step(args).await,
        },
        "human" => host.request_approval(args).await,
        other => Err(StepError::new("CAPABILITY_NOT_FOUND", format!("unknown capability {other}"))),
    }
}

fn register_hmac(context: &mut Context) {
    let callback = |_this: &JsValue, args: &[JsValue], context: &mut Context| -> JsResult<JsValue> {
        let key = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
        let msg = args.get(1).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();

        let _ = context;
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
            .map_err(|e| boa_engine::JsNativeError::error().with_message(e.to_string()))?;
        mac.update(msg.as_bytes());
        let digest = mac.finalize().into_bytes();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Ok(JsValue::from(js_string!(hex)))
    };

    context
        .register_global_callable(js_string!("__host_hmac_sha256"), 2, NativeFunction::from_copy_closure(callback))
        .expect("registering __host_hmac_sha256");
}

fn register_log(context: &mut Context) {
    let callback = |_this: &JsValue, args: &[JsValue], _context: &mut Context| -> JsResult<JsValue> {
        let level = args.first().and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_else(|| "info".into());
        let msg = args.get(1).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
        let data = args.get(2).and_then(|v| v.as_string()).map(|s| s.to_std_string_escaped()).unwrap_or_default();
        match level.as_str() {
            "error" => tracing::error!(target: "flowgraph::script", data = %data, "{msg}"),
            "warn" => tracing::warn!(target: "flowgraph::script", data = %data, "{msg}"),
            "debug" => tracing::debug!(target: "flowgraph::script", data = %data, "{msg}"),
            _ => tracing::info!(target: "flowgraph::script", data = %data, "{msg}"),
        }
        Ok(JsValue::undefined())
    };

    context
        .register_global_callable(js_string!("__host_log"), 3, NativeFunction::from_copy_closure(callback))
        .expect("registering __host_log");
}
