//! Block Catalog: an in-memory, slug-keyed registry of block definitions,
//! plus a multi-document YAML loader.

use crate::error::EngineError;
use flowgraph_model::BlockDefinition;
use serde::Deserialize as _;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Process-wide, read-mostly registry of block definitions. Reloads swap an
/// immutable snapshot atomically — readers never observe a partially-updated
/// catalog.
pub struct BlockCatalog {
    defs: RwLock<HashMap<String, BlockDefinition>>,
}

impl BlockCatalog {
    pub fn new() -> Self {
        Self {
            defs: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or replaces a definition by slug. Rejects an empty slug or a
    /// version below 1.
    pub fn register(&self, def: BlockDefinition) -> Result<(), EngineError> {
        if def.slug.is_empty() {
            return Err(EngineError::InvalidState("block slug must not be empty".into()));
        }
        if def.version < 1 {
            return Err(EngineError::InvalidState(format!(
                "block '{}' has invalid version {}",
                def.slug, def.version
            )));
        }
        self.defs.write().unwrap().insert(def.slug.clone(), def);
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<BlockDefinition> {
        self.defs.read().unwrap().get(slug).cloned()
    }

    /// All definitions sorted by slug.
    pub fn all(&self) -> Vec<BlockDefinition> {
        let mut defs: Vec<_> = self.defs.read().unwrap().values().cloned().collect();
        defs.sort_by(|a, b| a.slug.cmp(&b.slug));
        defs
    }

    pub fn len(&self) -> usize {
        self.defs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks a directory for `.yaml`/`.yml` files, parsing multi-document
    /// files separated by `---`. YAML definitions override code-registered
    /// ones of the same slug. Empty documents (no `slug`) are skipped.
    /// Failure on a single file fails the whole load, naming the file.
    pub fn load_yaml(&self, dir: &Path) -> Result<Vec<String>, EngineError> {
        let mut loaded = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| EngineError::Storage(format!("reading catalog dir {}: {e}", dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| EngineError::Storage(format!("reading {}: {e}", path.display())))?;

            for doc in serde_yaml::Deserializer::from_str(&text) {
                let value = serde_yaml::Value::deserialize(doc).map_err(|e| {
                    EngineError::Storage(format!("parsing {}: {e}", path.display()))
                })?;
                if value.is_null() {
                    continue;
                }
                if value
                    .as_mapping()
                    .and_then(|m| m.get(serde_yaml::Value::String("slug".into())))
                    .is_none()
                {
                    continue;
                }
                let def: BlockDefinition = serde_yaml::from_value(value).map_err(|e| {
                    EngineError::Storage(format!("parsing block in {}: {e}", path.display()))
                })?;
                let slug = def.slug.clone();
                self.register(def)?;
                loaded.push(slug);
            }
        }

        Ok(loaded)
    }
}

impl Default for BlockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_empty_slug() {
        let catalog = BlockCatalog::new();
        let mut def = BlockDefinition::new("");
        def.version = 1;
        assert!(catalog.register(def).is_err());
    }

    #[test]
    fn register_and_get_roundtrips() {
        let catalog = BlockCatalog::new();
        catalog.register(BlockDefinition::new("noop")).unwrap();
        assert!(catalog.get("noop").is_some());
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn all_sorted_by_slug() {
        let catalog = BlockCatalog::new();
        catalog.register(BlockDefinition::new("zeta")).unwrap();
        catalog.register(BlockDefinition::new("alpha")).unwrap();
        let all = catalog.all();
        assert_eq!(all[0].slug, "alpha");
        assert_eq!(all[1].slug, "zeta");
    }
}
