//! `--dotted.key value` command-line overrides.

use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

use lt_types::{ConfigError, LtResult};

use crate::tree::ConfigTree;

/// `a.b.c` is the deepest override accepted (two dots).
pub const MAX_OVERRIDE_LEVELS: usize = 3;

/// Pair every `--name` with the argument after it, unless that argument is
/// itself an option; bare switches get `None`.
pub fn extract_named_args(args: &[String]) -> Vec<(String, Option<String>)> {
    let mut result = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if let Some(name) = arg.strip_prefix("--") {
            let value = args
                .get(i + 1)
                .filter(|next| !next.starts_with("--"))
                .cloned();
            result.push((name.to_string(), value));
        }
    }
    result
}

/// Integer, then float, then boolean; quoted text stays a string.
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return Value::String(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Value::from(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        if v.is_finite() {
            return Value::from(v);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Parsed process arguments: the two reserved options plus tree overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandLine {
    pub config: Option<PathBuf>,
    pub device: Option<String>,
    pub overrides: Vec<(String, Value)>,
}

impl CommandLine {
    pub fn parse(args: &[String]) -> Self {
        let mut parsed = Self::default();
        for (name, value) in extract_named_args(args) {
            match name.as_str() {
                "config" => parsed.config = value.map(PathBuf::from),
                "device" => parsed.device = value,
                _ => {
                    let value = value
                        .as_deref()
                        .map(coerce_value)
                        .unwrap_or(Value::Bool(true));
                    parsed.overrides.push((name, value));
                }
            }
        }
        parsed
    }

    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::parse(&args)
    }

    /// Re-apply every override through the directive-aware write path.
    pub fn apply(&self, tree: &mut ConfigTree) -> LtResult<usize> {
        for (name, _) in &self.overrides {
            if name.is_empty() || name.split('.').count() > MAX_OVERRIDE_LEVELS {
                return Err(ConfigError::UnsupportedOverride { key: name.clone() }.into());
            }
        }
        for (name, value) in &self.overrides {
            tree.apply(name, value.clone())?;
            info!("Config override: {}={}", name, value);
        }
        Ok(self.overrides.len())
    }
}
