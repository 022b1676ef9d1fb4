//! Directive parsing and the tagged value stored in a [`ConfigTree`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tree::ConfigTree;

pub const TYPE_PREFIX: &str = "type::";
pub const CONFIG_PREFIX: &str = "config::";
pub const IMPORT_PREFIX: &str = "import::";

/// Older configuration files spell type references `class::`.
const LEGACY_TYPE_PREFIX: &str = "class::";

/// A reserved-prefix string found in a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'a> {
    /// `type::<dotted.path>`: a factory to register in the type registry.
    Type(&'a str),
    /// `config::<file>`: a nested tree loaded from another file.
    Config(&'a str),
    /// `import::<file>`: keys merged into the enclosing level.
    Import(&'a str),
}

impl<'a> Directive<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        if let Some(path) = raw.strip_prefix(TYPE_PREFIX) {
            Some(Self::Type(path.trim()))
        } else if let Some(path) = raw.strip_prefix(LEGACY_TYPE_PREFIX) {
            Some(Self::Type(path.trim()))
        } else if let Some(path) = raw.strip_prefix(CONFIG_PREFIX) {
            Some(Self::Config(path.trim()))
        } else {
            raw.strip_prefix(IMPORT_PREFIX).map(|path| Self::Import(path.trim()))
        }
    }
}

/// A value held by a [`ConfigTree`] entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Any JSON value that is not an object (arrays stay opaque).
    Scalar(Value),
    /// A nested tree, either inline or loaded through `config::`.
    Tree(ConfigTree),
    /// A resolved `type::` reference, kept so snapshots re-serialize it.
    TypeRef(String),
}

impl ConfigValue {
    pub fn as_tree(&self) -> Option<&ConfigTree> {
        match self {
            Self::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut ConfigTree> {
        match self {
            Self::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_type_ref(&self) -> Option<&str> {
        match self {
            Self::TypeRef(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Serialized form; type references come back as `type::<path>`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Tree(tree) => tree.to_json_marked(),
            Self::TypeRef(path) => Value::String(format!("{TYPE_PREFIX}{path}")),
        }
    }

    /// Deserialize the value into any serde type.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.to_json()).ok()
    }
}

/// In-memory conversion. Objects become trees and `type::` strings become
/// references; file directives (`config::`, `import::`) need the filesystem
/// and are only interpreted by [`ConfigTree::load`] and friends.
impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut tree = ConfigTree::new();
                for (key, child) in map {
                    if !child.is_null() {
                        tree.insert(key, Self::from(child));
                    }
                }
                Self::Tree(tree)
            }
            Value::String(s) => match Directive::parse(&s) {
                Some(Directive::Type(path)) => Self::TypeRef(path.to_string()),
                _ => Self::Scalar(Value::String(s)),
            },
            other => Self::Scalar(other),
        }
    }
}

impl From<ConfigTree> for ConfigValue {
    fn from(tree: ConfigTree) -> Self {
        Self::Tree(tree)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Scalar(Value::Bool(v))
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::from(Value::String(v.to_string()))
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::from(Value::String(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_every_prefix() {
        assert_eq!(Directive::parse("type::models.alexnet.Model"), Some(Directive::Type("models.alexnet.Model")));
        assert_eq!(Directive::parse("class::models.Model"), Some(Directive::Type("models.Model")));
        assert_eq!(Directive::parse("config::optim.json"), Some(Directive::Config("optim.json")));
        assert_eq!(Directive::parse("import::base.json"), Some(Directive::Import("base.json")));
        assert_eq!(Directive::parse("plain text with type:: inside"), None);
    }

    #[test]
    fn test_type_refs_round_trip_through_json() {
        let value = ConfigValue::from(json!("type::optimizers.adam.Optimizer"));
        assert_eq!(value.as_type_ref(), Some("optimizers.adam.Optimizer"));
        assert_eq!(value.to_json(), json!("type::optimizers.adam.Optimizer"));
    }

    #[test]
    fn test_objects_become_trees_and_nulls_are_dropped() {
        let value = ConfigValue::from(json!({"lr": 0.1, "momentum": null}));
        let tree = value.as_tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get_value("lr").and_then(ConfigValue::as_f64), Some(0.1));
    }
}
