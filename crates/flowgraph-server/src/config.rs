//! Environment-based configuration and shared application state:
//! `Config::from_env` loads knobs from the environment, `AppState` bundles
//! an `Arc<Config>` with a shared `reqwest::Client` and the engine's
//! catalog/store handles.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use flowgraph_engine::{BlockCatalog, CredentialService, RunStore, RuntimeConfig, WorkflowStore};
use flowgraph_store::DbContext;

use crate::host::DefaultHost;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Path to a directory of block-definition YAML files, loaded on
    /// startup. Absent/empty means the catalog starts empty — callers must
    /// `POST /workflows` with self-describing steps or rely on whatever a
    /// future admin endpoint registers.
    pub catalog_dir: Option<PathBuf>,

    /// When set, runs and workflows persist to Postgres via
    /// `flowgraph-store`; otherwise the in-process memory stores back the
    /// server (suitable for local development and the test fixtures).
    pub database_url: Option<String>,

    /// Master key for `CredentialService`'s AES-256-GCM credential store.
    pub credential_key: String,

    /// Base URL for the generic LLM chat-completion proxy used by the
    /// agent engine's `ctx.llm.chat`. A single OpenAI-compatible
    /// passthrough, not a per-provider client.
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,

    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("FLOWGRAPH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("FLOWGRAPH_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8088);

        Self {
            host,
            port,
            catalog_dir: env::var("FLOWGRAPH_CATALOG_DIR").ok().map(PathBuf::from),
            database_url: env::var("DATABASE_URL")
                .or_else(|_| env::var("FLOWGRAPH_DATABASE_URL"))
                .ok(),
            credential_key: env::var("FLOWGRAPH_CREDENTIAL_KEY")
                .unwrap_or_else(|_| "flowgraph-dev-key-change-me".to_string()),
            llm_api_url: env::var("FLOWGRAPH_LLM_API_URL").ok(),
            llm_api_key: env::var("FLOWGRAPH_LLM_API_KEY").ok(),
            runtime: RuntimeConfig::default(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared application state, threaded through every handler via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<BlockCatalog>,
    pub credentials: Arc<CredentialService>,
    pub host: Arc<DefaultHost>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub runs: Arc<dyn RunStore>,
    /// Present only when `config.database_url` is set — kept around so
    /// handlers can run one-off repository queries (e.g. listing archived
    /// workflows) the `WorkflowStore`/`RunStore` traits don't expose.
    pub db: Option<Arc<DbContext>>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let catalog = Arc::new(BlockCatalog::new());
        if let Some(dir) = &config.catalog_dir {
            if dir.is_dir() {
                let loaded = catalog.load_yaml(dir)?;
                tracing::info!(count = loaded.len(), dir = %dir.display(), "loaded block catalog");
            } else {
                tracing::warn!(dir = %dir.display(), "FLOWGRAPH_CATALOG_DIR does not exist, starting with an empty catalog");
            }
        }

        let credentials = Arc::new(CredentialService::new(&config.credential_key));
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let host = Arc::new(DefaultHost::new(
            http_client,
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
        ));

        let (workflows, runs, db): (
            Arc<dyn WorkflowStore>,
            Arc<dyn RunStore>,
            Option<Arc<DbContext>>,
        ) = if let Some(database_url) = &config.database_url {
            let pool = flowgraph_store::connect(database_url).await?;
            let db = DbContext::new(pool);
            db.migrate().await?;
            let db = Arc::new(db);
            (
                Arc::new(db.workflows.clone()),
                Arc::new(db.runs.clone()),
                Some(db),
            )
        } else {
            use flowgraph_engine::{MemoryRunStore, MemoryWorkflowStore};
            (
                Arc::new(MemoryWorkflowStore::new()),
                Arc::new(MemoryRunStore::new()),
                None,
            )
        };

        Ok(Self {
            config: Arc::new(config),
            catalog,
            credentials,
            host,
            workflows,
            runs,
            db,
        })
    }
}
