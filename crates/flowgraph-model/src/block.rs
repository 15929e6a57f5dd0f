//! Block catalog data types (C1/C2): `BlockDefinition`, output ports, error
//! codes, and the container/group kinds a block may declare.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A localized or plain string label, accepting either form on the wire
/// (`name`, `description`, `label` fields per the on-disk YAML format).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    Localized(std::collections::HashMap<String, String>),
}

impl LocalizedText {
    /// Resolves to a single string, preferring `en`, falling back to any
    /// available locale.
    pub fn resolve(&self, locale: &str) -> String {
        match self {
            LocalizedText::Plain(s) => s.clone(),
            LocalizedText::Localized(map) => map
                .get(locale)
                .or_else(|| map.get("en"))
                .or_else(|| map.values().next())
                .cloned()
                .unwrap_or_default(),
        }
    }
}

impl Default for LocalizedText {
    fn default() -> Self {
        LocalizedText::Plain(String::new())
    }
}

/// Kind of container a block may be, driving which `GroupExecutor` runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockGroupKind {
    Parallel,
    TryCatch,
    Foreach,
    While,
    Agent,
}

impl BlockGroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockGroupKind::Parallel => "parallel",
            BlockGroupKind::TryCatch => "try_catch",
            BlockGroupKind::Foreach => "foreach",
            BlockGroupKind::While => "while",
            BlockGroupKind::Agent => "agent",
        }
    }
}

/// A named output port on a block. Exactly one port may be `is_default`,
/// or none (in which case the first declared port is used as default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl OutputPort {
    pub fn new(name: impl Into<String>, is_default: bool) -> Self {
        Self {
            name: name.into(),
            is_default,
            schema: None,
        }
    }
}

/// A declared error code a block may raise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCodeDef {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub retryable: bool,
}

/// A declarative HTTP request binding (alternative to `pre_process`/`code`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBinding {
    pub method: String,
    pub url_template: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<Value>,
}

/// A declarative HTTP response binding paired with `RequestBinding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
}

/// A sequential sub-step executed as part of one block's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalStep {
    pub name: String,
    pub block_slug: String,
    #[serde(default)]
    pub config: Value,
}

/// A block definition as loaded from the catalog (code-registered or YAML).
/// `slug` is globally unique within a catalog; `version` is a monotonic int
/// used as a cache key by the inheritance resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub slug: String,
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub label: LocalizedText,

    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_kind: Option<BlockGroupKind>,

    /// JSON Schema describing this block's `config`.
    #[serde(default)]
    pub config_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_defaults: Option<Value>,

    #[serde(default)]
    pub output_ports: Vec<OutputPort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_slug: Option<String>,

    #[serde(default)]
    pub error_codes: Vec<ErrorCodeDef>,
    #[serde(default)]
    pub required_credentials: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseBinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_steps: Option<Vec<InternalStep>>,

    #[serde(default)]
    pub enable_error_port: bool,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl BlockDefinition {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            version: 1,
            name: LocalizedText::default(),
            description: LocalizedText::default(),
            label: LocalizedText::default(),
            category: String::new(),
            subcategory: String::new(),
            icon: None,
            enabled: true,
            is_container: false,
            group_kind: None,
            config_schema: Value::Object(Default::default()),
            config_defaults: None,
            output_ports: Vec::new(),
            code: None,
            pre_process: None,
            post_process: None,
            parent_block_slug: None,
            error_codes: Vec::new(),
            required_credentials: Vec::new(),
            request: None,
            response: None,
            internal_steps: None,
            enable_error_port: false,
        }
    }

    /// The default output port's name, if any is marked, else the first
    /// declared port.
    pub fn default_port(&self) -> Option<&str> {
        self.output_ports
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.output_ports.first())
            .map(|p| p.name.as_str())
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.output_ports.iter().any(|p| p.name == name)
    }

    pub fn retryable_codes(&self) -> impl Iterator<Item = &str> {
        self.error_codes
            .iter()
            .filter(|e| e.retryable)
            .map(|e| e.code.as_str())
    }
}
