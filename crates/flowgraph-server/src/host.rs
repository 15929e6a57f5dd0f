//! `DefaultHost`: the production `CapabilityHost` wired to the real HTTP
//! client and a generic LLM passthrough.
//!
//! `http_call` is the one capability with a generic implementation: a
//! plain `reqwest` request under the hood, shared via `AppState`.
//! `llm_chat` proxies to a single configurable OpenAI-compatible
//! endpoint — specific LLM provider clients are out of scope, so no
//! per-vendor request shaping lives here. The remaining capabilities
//! (vector store, embeddings, generic adapters, nested-workflow
//! invocation, human approval) name external collaborators a real
//! deployment wires up itself, and are stubbed accordingly.

use std::sync::Arc;

use async_trait::async_trait;
use flowgraph_engine::CapabilityHost;
use flowgraph_model::StepError;
use serde_json::{json, Value};

pub struct DefaultHost {
    client: reqwest::Client,
    llm_api_url: Option<String>,
    llm_api_key: Option<String>,
    memory: dashmap::DashMap<String, Vec<Value>>,
}

impl DefaultHost {
    pub fn new(client: reqwest::Client, llm_api_url: Option<String>, llm_api_key: Option<String>) -> Self {
        Self {
            client,
            llm_api_url,
            llm_api_key,
            memory: dashmap::DashMap::new(),
        }
    }

    fn not_configured(capability: &str) -> StepError {
        StepError::new(
            "CAPABILITY_UNAVAILABLE",
            format!("'{capability}' has no external backend configured for this deployment"),
        )
    }
}

#[async_trait]
impl CapabilityHost for DefaultHost {
    async fn llm_chat(&self, args: Value) -> Result<Value, StepError> {
        let url = self
            .llm_api_url
            .as_ref()
            .ok_or_else(|| Self::not_configured("llm"))?;

        let mut request = self.client.post(url).json(&args);
        if let Some(key) = &self.llm_api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::new("LLM_REQUEST_FAILED", e.to_string()))?;

        if !response.status().is_success() {
            return Err(StepError::new(
                "LLM_REQUEST_FAILED",
                format!("llm endpoint returned {}", response.status()),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StepError::new("LLM_REQUEST_FAILED", format!("invalid JSON response: {e}")))
    }

    async fn http_call(&self, method: &str, args: Value) -> Result<Value, StepError> {
        let opts = args.as_array().and_then(|a| a.first()).cloned().unwrap_or(args);
        let url = opts
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::new("HTTP_BAD_REQUEST", "missing 'url'"))?;

        let method = opts
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or(method)
            .to_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| StepError::new("HTTP_BAD_REQUEST", e.to_string()))?;

        let mut builder = self.client.request(method, url);
        if let Some(headers) = opts.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(key, value);
                }
            }
        }
        if let Some(body) = opts.get("body") {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StepError::new("HTTP_REQUEST_FAILED", e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .json::<Value>()
            .await
            .unwrap_or(Value::Null);

        Ok(json!({ "status": status, "body": body }))
    }

    async fn memory_call(&self, method: &str, args: Value) -> Result<Value, StepError> {
        // `ctx.memory` has no per-call `memory_key` argument in the script
        // bootstrap, so every script-level call lands on one lane per run;
        // the agent loop's own `RuntimeContext::memory` (keyed by
        // `{run_id}:{group_id}`) is separate and backs ReAct conversation
        // history instead.
        let key = "default".to_string();
        let parts = args.as_array().cloned().unwrap_or_else(|| vec![args.clone()]);

        let turn = |role: &str, content: Value| json!({ "role": role, "content": content });

        match method {
            "add" => {
                let turn = parts.first().cloned().unwrap_or(Value::Null);
                self.memory.entry(key).or_default().push(turn);
                Ok(Value::Null)
            }
            "addUser" => {
                let content = parts.first().cloned().unwrap_or(Value::Null);
                self.memory.entry(key).or_default().push(turn("user", content));
                Ok(Value::Null)
            }
            "addAssistant" => {
                let content = parts.first().cloned().unwrap_or(Value::Null);
                self.memory.entry(key).or_default().push(turn("assistant", content));
                Ok(Value::Null)
            }
            "addTool" => {
                let content = parts.first().cloned().unwrap_or(Value::Null);
                self.memory.entry(key).or_default().push(turn("tool", content));
                Ok(Value::Null)
            }
            "getLastN" | "get" => {
                let n = parts.first().and_then(Value::as_u64).unwrap_or(u64::MAX) as usize;
                let turns = self.memory.get(&key).map(|v| v.clone()).unwrap_or_default();
                let start = turns.len().saturating_sub(n);
                Ok(json!(turns[start..]))
            }
            "clear" => {
                self.memory.remove(&key);
                Ok(Value::Null)
            }
            other => Err(StepError::new(
                "MEMORY_BAD_METHOD",
                format!("unknown memory method '{other}'"),
            )),
        }
    }

    async fn vector_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(Self::not_configured("vector"))
    }

    async fn embedding_embed(&self, _args: Value) -> Result<Value, StepError> {
        Err(Self::not_configured("embedding"))
    }

    async fn adapter_call(&self, _args: Value) -> Result<Value, StepError> {
        Err(Self::not_configured("adapter"))
    }

    async fn workflow_run(&self, _args: Value) -> Result<Value, StepError> {
        Err(Self::not_configured("workflow.run"))
    }

    async fn workflow_execute_step(&self, _args: Value) -> Result<Value, StepError> {
        Err(Self::not_configured("workflow.executeStep"))
    }

    async fn request_approval(&self, args: Value) -> Result<Value, StepError> {
        // A real deployment wires
        // this to an external approval UI/queue and resumes the run on
        // callback. Here the sandbox call itself can't suspend, so an
        // approval request without an external resumer simply fails the
        // step rather than hanging the run forever.
        Err(StepError::new(
            "APPROVAL_PENDING",
            format!("human approval required: {args}"),
        ))
    }
}

pub type SharedHost = Arc<DefaultHost>;
