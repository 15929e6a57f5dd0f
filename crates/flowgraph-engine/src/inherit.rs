//! Inheritance Resolver: flattens `parent_block_slug` chains into an
//! `EffectiveBlock`.
//!
//! Each field's inheritance is data, not types: ancestors are collected into
//! a plain `Vec` by walking `parent_block_slug` upward, then folded top-down
//! through an explicit per-field rule table rather than via subclassing.

use crate::catalog::BlockCatalog;
use crate::error::EngineError;
use flowgraph_model::{BlockDefinition, ErrorCodeDef, OutputPort};
use serde_json::Value;
use std::collections::HashSet;

/// Result of folding a block with all of its ancestors.
#[derive(Debug, Clone)]
pub struct EffectiveBlock {
    pub slug: String,
    pub version: u32,
    pub code: Option<String>,
    pub pre_process: Option<String>,
    pub post_process: Option<String>,
    pub config_schema: Value,
    pub config_defaults: Option<Value>,
    pub output_ports: Vec<OutputPort>,
    pub error_codes: Vec<ErrorCodeDef>,
    pub required_credentials: Vec<String>,
    pub request: Option<flowgraph_model::RequestBinding>,
    pub response: Option<flowgraph_model::ResponseBinding>,
    pub group_kind: Option<flowgraph_model::BlockGroupKind>,
    pub is_container: bool,
    pub enable_error_port: bool,
}

impl EffectiveBlock {
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

    /// Error code declared as retryable, if any matches `code`.
    pub fn is_retryable(&self, code: &str) -> bool {
        self.error_codes.iter().any(|e| e.code == code && e.retryable)
    }

    /// Effective config fed to scripts: `merge(defaults_from_schema,
    /// config_defaults, step.config)`, later sources winning.
    pub fn effective_config(&self, step_config: &Value) -> Value {
        let schema_defaults = defaults_from_schema(&self.config_schema);
        let mut merged = schema_defaults;
        if let Some(Value::Object(cd)) = &self.config_defaults {
            merge_object_into(&mut merged, cd);
        }
        if let Value::Object(sc) = step_config {
            merge_object_into(&mut merged, sc);
        }
        merged
    }
}

fn defaults_from_schema(schema: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, prop) in props {
            if let Some(default) = prop.get("default") {
                out.insert(key.clone(), default.clone());
            }
        }
    }
    Value::Object(out)
}

fn merge_object_into(target: &mut Value, source: &serde_json::Map<String, Value>) {
    if let Value::Object(map) = target {
        for (k, v) in source {
            map.insert(k.clone(), v.clone());
        }
    }
}

/// Resolves `slug` to its effective definition, walking `parent_block_slug`
/// upward and folding top-down through the field-fold rule table.
pub fn resolve(catalog: &BlockCatalog, slug: &str) -> Result<EffectiveBlock, EngineError> {
    let chain = collect_ancestor_chain(catalog, slug)?;

    // chain[0] is the root ancestor, chain.last() is `slug` itself.
    let mut effective = chain[0].clone();
    for child in &chain[1..] {
        effective = fold(effective, child.clone());
    }

    Ok(EffectiveBlock {
        slug: effective.slug,
        version: effective.version,
        code: effective.code,
        pre_process: effective.pre_process,
        post_process: effective.post_process,
        config_schema: effective.config_schema,
        config_defaults: effective.config_defaults,
        output_ports: effective.output_ports,
        error_codes: effective.error_codes,
        required_credentials: effective.required_credentials,
        request: effective.request,
        response: effective.response,
        group_kind: effective.group_kind,
        is_container: effective.is_container,
        enable_error_port: effective.enable_error_port,
    })
}

/// Walks `parent_block_slug` from `slug` up to its root, returning the chain
/// root-first. Errors on a missing ancestor or a cycle.
fn collect_ancestor_chain(catalog: &BlockCatalog, slug: &str) -> Result<Vec<BlockDefinition>, EngineError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = slug.to_string();

    loop {
        if !visited.insert(current.clone()) {
            return Err(EngineError::InheritanceCycle(current));
        }
        let def = catalog
            .get(&current)
            .ok_or_else(|| EngineError::BlockNotFound(current.clone()))?;
        let parent = def.parent_block_slug.clone();
        chain.push(def);
        match parent {
            Some(p) => current = p,
            None => break,
        }
    }

    chain.reverse();
    Ok(chain)
}

/// Folds `child` atop `parent` per the field-fold table.
fn fold(parent: BlockDefinition, child: BlockDefinition) -> BlockDefinition {
    BlockDefinition {
        slug: child.slug.clone(),
        version: child.version,
        name: child.name,
        description: child.description,
        label: child.label,
        category: if child.category.is_empty() { parent.category } else { child.category },
        subcategory: if child.subcategory.is_empty() { parent.subcategory } else { child.subcategory },
        icon: child.icon.or(parent.icon),
        enabled: child.enabled,
        is_container: child.is_container || parent.is_container,
        group_kind: child.group_kind.or(parent.group_kind),

        // code: child overrides parent; child empty => inherit.
        code: if child.code.is_some() { child.code } else { parent.code },
        pre_process: if child.pre_process.is_some() { child.pre_process } else { parent.pre_process },
        post_process: if child.post_process.is_some() { child.post_process } else { parent.post_process },

        // config_schema: deep merge — child's properties/required extend parent's.
        config_schema: merge_config_schema(&parent.config_schema, &child.config_schema),

        // config_defaults: shallow merge, child wins per key.
        config_defaults: merge_config_defaults(parent.config_defaults, child.config_defaults),

        // output_ports: child overrides entirely if non-empty, else inherit.
        output_ports: if child.output_ports.is_empty() { parent.output_ports } else { child.output_ports },

        parent_block_slug: child.parent_block_slug,

        // error_codes: union by code, child overrides on collision.
        error_codes: merge_error_codes(parent.error_codes, child.error_codes),

        // required_credentials: union.
        required_credentials: {
            let mut creds = parent.required_credentials;
            for c in child.required_credentials {
                if !creds.contains(&c) {
                    creds.push(c);
                }
            }
            creds
        },

        // request/response: child overrides entirely if present.
        request: child.request.or(parent.request),
        response: child.response.or(parent.response),

        internal_steps: child.internal_steps.or(parent.internal_steps),
        enable_error_port: child.enable_error_port || parent.enable_error_port,
    }
}

fn merge_config_schema(parent: &Value, child: &Value) -> Value {
    let (Some(parent_obj), Some(child_obj)) = (parent.as_object(), child.as_object()) else {
        if child.is_null() || (child.is_object() && child.as_object().unwrap().is_empty()) {
            return parent.clone();
        }
        return child.clone();
    };

    let mut merged = parent_obj.clone();

    if let Some(child_props) = child_obj.get("properties").and_then(|p| p.as_object()) {
        let props = merged
            .entry("properties")
            .or_insert_with(|| Value::Object(Default::default()))
            .as_object_mut()
            .unwrap();
        for (k, v) in child_props {
            props.insert(k.clone(), v.clone());
        }
    }

    if let Some(child_required) = child_obj.get("required").and_then(|r| r.as_array()) {
        let required = merged
            .entry("required")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .unwrap();
        for r in child_required {
            if !required.contains(r) {
                required.push(r.clone());
            }
        }
    }

    for (k, v) in child_obj {
        if k == "properties" || k == "required" {
            continue;
        }
        merged.insert(k.clone(), v.clone());
    }

    Value::Object(merged)
}

fn merge_config_defaults(parent: Option<Value>, child: Option<Value>) -> Option<Value> {
    match (parent, child) {
        (None, None) => None,
        (Some(p), None) => Some(p),
        (None, Some(c)) => Some(c),
        (Some(Value::Object(mut p)), Some(Value::Object(c))) => {
            for (k, v) in c {
                p.insert(k, v);
            }
            Some(Value::Object(p))
        }
        (_, Some(c)) => Some(c),
    }
}

fn merge_error_codes(parent: Vec<ErrorCodeDef>, child: Vec<ErrorCodeDef>) -> Vec<ErrorCodeDef> {
    let mut merged = parent;
    for c in child {
        if let Some(existing) = merged.iter_mut().find(|e| e.code == c.code) {
            *existing = c;
        } else {
            merged.push(c);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_model::BlockDefinition;
    use serde_json::json;

    #[test]
    fn inherits_code_when_child_empty() {
        let catalog = BlockCatalog::new();
        let mut parent = BlockDefinition::new("base");
        parent.code = Some("return input;".into());
        catalog.register(parent).unwrap();

        let mut child = BlockDefinition::new("child");
        child.parent_block_slug = Some("base".into());
        catalog.register(child).unwrap();

        let effective = resolve(&catalog, "child").unwrap();
        assert_eq!(effective.code.as_deref(), Some("return input;"));
    }

    #[test]
    fn child_overrides_code() {
        let catalog = BlockCatalog::new();
        let mut parent = BlockDefinition::new("base");
        parent.code = Some("return 1;".into());
        catalog.register(parent).unwrap();

        let mut child = BlockDefinition::new("child");
        child.parent_block_slug = Some("base".into());
        child.code = Some("return 2;".into());
        catalog.register(child).unwrap();

        let effective = resolve(&catalog, "child").unwrap();
        assert_eq!(effective.code.as_deref(), Some("return 2;"));
    }

    #[test]
    fn detects_cycle() {
        let catalog = BlockCatalog::new();
        let mut a = BlockDefinition::new("a");
        a.parent_block_slug = Some("b".into());
        catalog.register(a).unwrap();
        let mut b = BlockDefinition::new("b");
        b.parent_block_slug = Some("a".into());
        catalog.register(b).unwrap();

        assert!(resolve(&catalog, "a").is_err());
    }

    #[test]
    fn detects_missing_ancestor() {
        let catalog = BlockCatalog::new();
        let mut child = BlockDefinition::new("child");
        child.parent_block_slug = Some("ghost".into());
        catalog.register(child).unwrap();

        assert!(resolve(&catalog, "child").is_err());
    }

    #[test]
    fn config_schema_deep_merge_extends_properties() {
        let catalog = BlockCatalog::new();
        let mut parent = BlockDefinition::new("base");
        parent.config_schema = json!({"properties": {"a": {"type": "string"}}, "required": ["a"]});
        catalog.register(parent).unwrap();

        let mut child = BlockDefinition::new("child");
        child.parent_block_slug = Some("base".into());
        child.config_schema = json!({"properties": {"b": {"type": "number"}}, "required": ["b"]});
        catalog.register(child).unwrap();

        let effective = resolve(&catalog, "child").unwrap();
        let props = effective.config_schema.get("properties").unwrap();
        assert!(props.get("a").is_some());
        assert!(props.get("b").is_some());
        let required = effective.config_schema.get("required").unwrap().as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn config_defaults_shallow_merge_child_wins() {
        let catalog = BlockCatalog::new();
        let mut parent = BlockDefinition::new("base");
        parent.config_defaults = Some(json!({"timeout_ms": 1000, "retries": 1}));
        catalog.register(parent).unwrap();

        let mut child = BlockDefinition::new("child");
        child.parent_block_slug = Some("base".into());
        child.config_defaults = Some(json!({"timeout_ms": 2000}));
        catalog.register(child).unwrap();

        let effective = resolve(&catalog, "child").unwrap();
        let defaults = effective.config_defaults.unwrap();
        assert_eq!(defaults["timeout_ms"], 2000);
        assert_eq!(defaults["retries"], 1);
    }
}
