//! Runtime context and configuration shared across a single run's step
//! executions: a cancellation token plus shared state (sandbox
//! timeout/memory caps, retry backoff cap, `ctx.memory` conversation lanes).

use crate::credentials::CredentialService;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Runtime configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Default sandbox wall-clock timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Default sandbox memory cap in bytes.
    pub default_memory_cap_bytes: u64,
    /// Initial retry backoff in milliseconds.
    pub default_retry_delay_ms: u64,
    /// Hard cap on exponential backoff.
    pub max_retry_delay_ms: u64,
    /// Run-level concurrency limit on concurrently in-flight steps (0 =
    /// unlimited).
    pub max_concurrency: usize,
    /// Grace period to let in-flight steps observe cancellation.
    pub cancel_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            default_memory_cap_bytes: 64 * 1024 * 1024,
            default_retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            max_concurrency: 0,
            cancel_grace_ms: 2_000,
        }
    }
}

/// One turn of agent conversation memory.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryTurn {
    pub role: String,
    pub content: Value,
}

/// Run-scoped conversation memory, optionally keyed by `memory_key` so
/// multiple parallel agents within one run don't share history.
#[derive(Default)]
pub struct MemoryStore {
    lanes: DashMap<String, Vec<MemoryTurn>>,
}

impl MemoryStore {
    pub fn add(&self, key: &str, turn: MemoryTurn) {
        self.lanes.entry(key.to_string()).or_default().push(turn);
    }

    pub fn add_user(&self, key: &str, content: Value) {
        self.add(key, MemoryTurn { role: "user".into(), content });
    }

    pub fn add_assistant(&self, key: &str, content: Value) {
        self.add(key, MemoryTurn { role: "assistant".into(), content });
    }

    pub fn add_tool(&self, key: &str, content: Value) {
        self.add(key, MemoryTurn { role: "tool".into(), content });
    }

    pub fn get_last_n(&self, key: &str, n: usize) -> Vec<MemoryTurn> {
        self.lanes
            .get(key)
            .map(|turns| {
                let len = turns.len();
                let start = len.saturating_sub(n);
                turns[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self, key: &str) {
        self.lanes.remove(key);
    }

    pub fn count(&self, key: &str) -> usize {
        self.lanes.get(key).map(|turns| turns.len()).unwrap_or(0)
    }
}

/// Run-scoped context threaded through scheduler, group executors, sandbox
/// and agent loop. Owned by a single driver task per run: cross-task
/// state lives behind `Arc`/channels, never shared mutably outside it.
#[derive(Clone)]
pub struct RuntimeContext {
    pub run_id: String,
    pub config: RuntimeConfig,
    pub credentials: Arc<CredentialService>,
    pub memory: Arc<MemoryStore>,
    state: Arc<RwLock<HashMap<String, Value>>>,
    cancel_token: tokio_util::sync::CancellationToken,
}

impl RuntimeContext {
    pub fn new(run_id: impl Into<String>, config: RuntimeConfig, credentials: Arc<CredentialService>) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            credentials,
            memory: Arc::new(MemoryStore::default()),
            state: Arc::new(RwLock::new(HashMap::new())),
            cancel_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub async fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().await.get(key).cloned()
    }

    pub async fn set_state(&self, key: String, value: Value) {
        self.state.write().await.insert(key, value);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn wait_for_cancellation(&self) {
        self.cancel_token.cancelled().await;
    }
}
