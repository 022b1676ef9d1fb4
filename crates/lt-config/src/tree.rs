//! The ordered, dot-addressable configuration tree.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use lt_types::{ConfigError, LtResult};

use crate::directive::{ConfigValue, Directive};

/// Key written next to the entries of a `config::`-loaded subtree on save.
pub const CONFIG_PATH_KEY: &str = "config_path";

/// Nesting limit for `import::` / `config::` chains.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// A `type::` reference found somewhere in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeBinding {
    /// Leaf key the reference is stored under; this is the registry name.
    pub key: String,
    /// Full dotted location inside the tree.
    pub location: String,
    /// Dotted factory path after the `type::` prefix.
    pub target: String,
}

/// Where relative directive paths are resolved from while loading.
#[derive(Debug, Clone)]
struct LoadScope {
    base_dir: Option<PathBuf>,
    depth: usize,
}

impl LoadScope {
    fn root() -> Self {
        Self {
            base_dir: None,
            depth: 0,
        }
    }

    /// Relative paths are tried against the including file's directory first,
    /// then against the working directory.
    fn resolve(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            return path;
        }
        if let Some(base) = &self.base_dir {
            let candidate = base.join(&path);
            if candidate.exists() {
                return candidate;
            }
        }
        path
    }
}

/// Ordered mapping from key to [`ConfigValue`].
///
/// Dotted paths (`optimizer.lr`) address nested trees. Writes create missing
/// intermediates; reads through a missing intermediate return `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    entries: Vec<(String, ConfigValue)>,
    source: Option<PathBuf>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- loading ----

    /// Parse a JSON file, interpreting directives at every depth.
    pub fn load<P: AsRef<Path>>(path: P) -> LtResult<Self> {
        Self::load_scoped(path.as_ref(), 0)
    }

    fn load_scoped(path: &Path, depth: usize) -> LtResult<Self> {
        let shown = path.display().to_string();
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ConfigError::IncludeDepth {
                path: shown,
                depth,
            }
            .into());
        }
        if !path.exists() {
            return Err(ConfigError::NotFound { path: shown }.into());
        }

        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text).map_err(|e| ConfigError::Malformed {
            path: shown.clone(),
            message: e.to_string(),
        })?;
        let Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject { path: shown }.into());
        };

        let scope = LoadScope {
            base_dir: path.parent().map(Path::to_path_buf),
            depth,
        };
        let mut tree = Self::new();
        for (key, child) in map {
            tree.override_scoped(&key, child, &scope)?;
        }
        tree.source = Some(path.to_path_buf());
        debug!("Loaded config {} ({} keys)", shown, tree.len());
        Ok(tree)
    }

    /// Build a tree from an in-memory JSON object. Directive paths are
    /// resolved against the working directory.
    pub fn from_json(value: Value) -> LtResult<Self> {
        let Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject {
                path: "<inline>".to_string(),
            }
            .into());
        };
        let mut tree = Self::new();
        let scope = LoadScope::root();
        for (key, child) in map {
            tree.override_scoped(&key, child, &scope)?;
        }
        Ok(tree)
    }

    // ---- directive-aware writes ----

    /// Apply `value` under `key` of this level, interpreting directives:
    ///
    /// * `import::<file>` merges the file's top-level keys into this level;
    /// * `config::<file>` stores the file as a nested tree under `key`;
    /// * `type::<path>` stores a type reference under `key`;
    /// * objects are rebuilt recursively, so directives work at any depth;
    /// * `null` leaves the tree untouched.
    pub fn override_value(&mut self, key: &str, value: Value) -> LtResult<()> {
        self.override_scoped(key, value, &LoadScope::root())
    }

    /// [`override_value`](Self::override_value) at a dotted path; the last
    /// segment is the key, earlier segments are created as needed.
    pub fn apply(&mut self, path: &str, value: Value) -> LtResult<()> {
        let (parent, key) = self.parent_mut(path);
        parent.override_value(key, value)
    }

    fn override_scoped(&mut self, key: &str, value: Value, scope: &LoadScope) -> LtResult<()> {
        match value {
            Value::Null => {}
            Value::String(raw) => match Directive::parse(&raw) {
                Some(Directive::Import(file)) => {
                    let imported = Self::load_scoped(&scope.resolve(file), scope.depth + 1)?;
                    for (k, v) in imported.entries {
                        info!("Config: {}={}", k, v.to_json());
                        self.insert(k, v);
                    }
                }
                Some(Directive::Config(file)) => {
                    let nested = Self::load_scoped(&scope.resolve(file), scope.depth + 1)?;
                    info!("Config: {}=config::{}", key, file);
                    self.insert(key, ConfigValue::Tree(nested));
                }
                Some(Directive::Type(target)) => {
                    info!("Config: {}=type::{}", key, target);
                    self.insert(key, ConfigValue::TypeRef(target.to_string()));
                }
                None => {
                    info!("Config: {}={:?}", key, raw);
                    self.insert(key, ConfigValue::Scalar(Value::String(raw)));
                }
            },
            Value::Object(map) => {
                let mut nested = Self::new();
                for (k, v) in map {
                    nested.override_scoped(&k, v, scope)?;
                }
                self.insert(key, ConfigValue::Tree(nested));
            }
            other => {
                info!("Config: {}={}", key, other);
                self.insert(key, ConfigValue::Scalar(other));
            }
        }
        Ok(())
    }

    // ---- plain access ----

    /// Set a single key on this level, keeping its position when it exists.
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        let key = key.into();
        match self.position(&key) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Set `value` at a dotted path without interpreting file directives.
    pub fn set_value(&mut self, path: &str, value: impl Into<ConfigValue>) {
        let (parent, key) = self.parent_mut(path);
        parent.insert(key, value.into());
    }

    pub fn get_value(&self, path: &str) -> Option<&ConfigValue> {
        let (parent, key) = self.parent(path)?;
        parent.entry(key)
    }

    pub fn get_value_mut(&mut self, path: &str) -> Option<&mut ConfigValue> {
        match path.split_once('.') {
            None => {
                let idx = self.position(path)?;
                Some(&mut self.entries[idx].1)
            }
            Some((head, rest)) => {
                let idx = self.position(head)?;
                self.entries[idx].1.as_tree_mut()?.get_value_mut(rest)
            }
        }
    }

    /// Typed read; `None` when missing or not convertible.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get_value(path)?.decode()
    }

    /// Typed read with a fallback.
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    pub fn has_value(&self, path: &str) -> bool {
        self.get_value(path).is_some()
    }

    pub fn subtree(&self, path: &str) -> Option<&ConfigTree> {
        self.get_value(path)?.as_tree()
    }

    /// Nested tree at `path`, created (or replacing a scalar) when absent.
    pub fn subtree_mut(&mut self, path: &str) -> &mut ConfigTree {
        match path.split_once('.') {
            None => self.child_tree_mut(path),
            Some((head, rest)) => self.child_tree_mut(head).subtree_mut(rest),
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<ConfigValue> {
        match path.split_once('.') {
            None => {
                let idx = self.position(path)?;
                Some(self.entries.remove(idx).1)
            }
            Some((head, rest)) => {
                let idx = self.position(head)?;
                self.entries[idx].1.as_tree_mut()?.remove(rest)
            }
        }
    }

    /// Shallow merge: top-level keys of `other` replace ours, later wins.
    pub fn merge(&mut self, other: ConfigTree) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    /// Deep copy; resolved directives stay resolved.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File this tree was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Every `type::` reference in document order, depth first.
    pub fn type_refs(&self) -> Vec<TypeBinding> {
        let mut out = Vec::new();
        self.collect_type_refs("", &mut out);
        out
    }

    fn collect_type_refs(&self, prefix: &str, out: &mut Vec<TypeBinding>) {
        for (key, value) in &self.entries {
            let location = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                ConfigValue::TypeRef(target) => out.push(TypeBinding {
                    key: key.clone(),
                    location,
                    target: target.clone(),
                }),
                ConfigValue::Tree(tree) => tree.collect_type_refs(&location, out),
                ConfigValue::Scalar(_) => {}
            }
        }
    }

    // ---- serialization ----

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }

    /// JSON for a nested position: `config::` subtrees carry their origin.
    pub(crate) fn to_json_marked(&self) -> Value {
        let mut value = self.to_json();
        if let (Some(source), Value::Object(map)) = (&self.source, &mut value) {
            map.entry(CONFIG_PATH_KEY.to_string())
                .or_insert_with(|| Value::String(source.display().to_string()));
        }
        value
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> LtResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, text)?;
        debug!("Saved config {}", path.display());
        Ok(())
    }

    // ---- path helpers ----

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn entry(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn parent<'p>(&self, path: &'p str) -> Option<(&ConfigTree, &'p str)> {
        match path.split_once('.') {
            None => Some((self, path)),
            Some((head, rest)) => self.entry(head)?.as_tree()?.parent(rest),
        }
    }

    fn parent_mut<'p>(&mut self, path: &'p str) -> (&mut ConfigTree, &'p str) {
        match path.split_once('.') {
            None => (self, path),
            Some((head, rest)) => self.child_tree_mut(head).parent_mut(rest),
        }
    }

    fn child_tree_mut(&mut self, key: &str) -> &mut ConfigTree {
        let idx = match self.position(key) {
            Some(idx) => idx,
            None => {
                self.entries.push((key.to_string(), ConfigValue::Tree(Self::new())));
                self.entries.len() - 1
            }
        };
        let slot = &mut self.entries[idx].1;
        if !slot.is_tree() {
            *slot = ConfigValue::Tree(Self::new());
        }
        match slot {
            ConfigValue::Tree(tree) => tree,
            _ => unreachable!("slot was replaced by a tree above"),
        }
    }
}

impl Serialize for ConfigTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl TryFrom<Value> for ConfigTree {
    type Error = lt_types::LtError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lt_types::LtError;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_json(dir: &Path, name: &str, value: Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_set_then_get_creates_intermediate_trees() {
        let mut tree = ConfigTree::new();
        tree.set_value("model.backbone.depth", 50i64);

        assert_eq!(tree.get::<i64>("model.backbone.depth"), Some(50));
        assert!(tree.get_value("model").unwrap().is_tree());
        assert!(tree.get_value("model.backbone").unwrap().is_tree());
    }

    #[test]
    fn test_set_through_scalar_replaces_it_with_a_tree() {
        let mut tree = ConfigTree::new();
        tree.set_value("optimizer", "sgd");
        tree.set_value("optimizer.lr", 0.1);
        assert_eq!(tree.get::<f64>("optimizer.lr"), Some(0.1));
    }

    #[test]
    fn test_missing_reads_fall_back() {
        let tree = ConfigTree::new();
        assert!(!tree.has_value("a.b.c"));
        assert_eq!(tree.get_or("a.b.c", 7i64), 7);
        assert!(tree.get_value("a.b").is_none());
    }

    #[test]
    fn test_override_is_idempotent_for_scalars() {
        let mut once = ConfigTree::new();
        once.override_value("epochs", json!(50)).unwrap();

        let mut twice = ConfigTree::new();
        twice.override_value("epochs", json!(50)).unwrap();
        twice.override_value("epochs", json!(50)).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_override_with_object_replaces_subtree() {
        let mut tree = ConfigTree::from_json(json!({"optimizer": {"lr": 0.1, "momentum": 0.9}})).unwrap();
        tree.override_value("optimizer", json!({"lr": 0.5})).unwrap();
        assert_eq!(tree.get::<f64>("optimizer.lr"), Some(0.5));
        assert!(!tree.has_value("optimizer.momentum"));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let err = ConfigTree::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, LtError::Config(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_load_malformed_json_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"a\": ").unwrap();
        let err = ConfigTree::load(&path).unwrap_err();
        assert!(matches!(err, LtError::Config(ConfigError::Malformed { .. })));
    }

    #[test]
    fn test_import_merges_into_enclosing_level() {
        let dir = tempdir().unwrap();
        write_json(dir.path(), "modules.json", json!({"model": "type::models.alexnet.Model", "epochs": 10}));
        let root = write_json(
            dir.path(),
            "root.json",
            json!({"strategy": {"modules": "import::modules.json", "writer": "type::writers.Writer"}}),
        );

        let tree = ConfigTree::load(&root).unwrap();
        let strategy = tree.subtree("strategy").unwrap();
        assert!(!strategy.has_value("modules"));
        assert_eq!(strategy.get_value("model").and_then(ConfigValue::as_type_ref), Some("models.alexnet.Model"));
        assert_eq!(tree.get::<i64>("strategy.epochs"), Some(10));

        let keys: Vec<_> = tree.type_refs().into_iter().map(|b| b.key).collect();
        assert_eq!(keys, vec!["model", "writer"]);
    }

    #[test]
    fn test_config_directive_keeps_origin_on_save() {
        let dir = tempdir().unwrap();
        let optim = write_json(dir.path(), "optim.json", json!({"lr": 0.01}));
        let root = write_json(dir.path(), "root.json", json!({"optimizer": "config::optim.json"}));

        let tree = ConfigTree::load(&root).unwrap();
        assert_eq!(tree.get::<f64>("optimizer.lr"), Some(0.01));

        let out = dir.path().join("saved.json");
        tree.save(&out).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(saved["optimizer"][CONFIG_PATH_KEY], json!(optim.display().to_string()));
        assert_eq!(saved["optimizer"]["lr"], json!(0.01));
    }

    #[test]
    fn test_type_refs_serialize_back_as_directives() {
        let tree = ConfigTree::from_json(json!({"strategy": {"model": "type::models.resnet.Model"}})).unwrap();
        assert_eq!(tree.to_json(), json!({"strategy": {"model": "type::models.resnet.Model"}}));
    }

    #[test]
    fn test_self_import_hits_depth_guard() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.json");
        std::fs::write(&path, r#"{"again": "import::loop.json"}"#).unwrap();
        let err = ConfigTree::load(&path).unwrap_err();
        assert!(matches!(err, LtError::Config(ConfigError::IncludeDepth { .. })));
    }

    #[test]
    fn test_copy_is_independent() {
        let original = ConfigTree::from_json(json!({"model": {"hidden_units": 100}})).unwrap();
        let mut copy = original.copy();
        copy.set_value("model.hidden_units", 200i64);
        assert_eq!(original.get::<i64>("model.hidden_units"), Some(100));
        assert_eq!(copy.get::<i64>("model.hidden_units"), Some(200));
    }

    #[test]
    fn test_order_is_preserved() {
        let tree = ConfigTree::from_json(json!({"zeta": 1, "alpha": 2, "mid": 3})).unwrap();
        let keys: Vec<_> = tree.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }
}
