use std::fmt;
use thiserror::Error;

/// Main error type for the lighter system
#[derive(Error, Debug)]
pub enum LtError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dependency injection error: {0}")]
    Injection(#[from] InjectionError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Type instantiation failed after {rounds} round(s), {} type(s) unresolved", .failures.len())]
    TypeInstantiation {
        rounds: usize,
        failures: Vec<TypeFailure>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl LtError {
    /// True when the error is an unmet dependency, i.e. the kind of failure a
    /// later instantiation round may still resolve.
    pub fn is_injection(&self) -> bool {
        matches!(self, Self::Injection(_))
    }
}

/// A single type that could not be constructed during fixpoint instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFailure {
    pub name: String,
    pub message: String,
}

impl fmt::Display for TypeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Configuration loading and override errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    #[error("Malformed configuration {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("Configuration root of {path} must be a JSON object")]
    NotAnObject { path: String },

    #[error("Include depth {depth} exceeded while loading {path}")]
    IncludeDepth { path: String, depth: usize },

    #[error("Unsupported command line option --{key} (can only override 1 or 2 nested levels)")]
    UnsupportedOverride { key: String },

    #[error("Invalid value at {path}: {message}")]
    InvalidValue { path: String, message: String },
}

/// Raised when a constructor cannot be served the values it asks for.
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("Unresolved instance dependency: {name}")]
    MissingInstance { name: String },

    #[error("Instance {name} is not of the requested type {expected}")]
    TypeMismatch { name: String, expected: String },

    #[error("Unresolved config dependency: {path}")]
    MissingConfig { path: String },

    #[error("Unknown experiment factory: {name}")]
    UnknownExperiment { name: String },
}

/// Parameter and search space errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid parameter {reference}: {message}")]
    InvalidParameter { reference: String, message: String },

    #[error("Search group not found: {group}")]
    UnknownGroup { group: String },

    #[error("Parameter {reference} has no options")]
    EmptyOptions { reference: String },
}

/// Scheduling and worker process errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Scheduler needs at least one worker")]
    NoWorkers,

    #[error("No experiment configurations found in {path}")]
    EmptyInput { path: String },

    #[error("Schedule manifest not found: {path}")]
    ManifestNotFound { path: String },

    #[error("Bucket {bucket} is not part of the schedule")]
    UnknownBucket { bucket: String },

    #[error("Failed to spawn worker {bucket}: {message}")]
    Spawn { bucket: String, message: String },
}

/// Result type alias for lighter operations
pub type LtResult<T> = Result<T, LtError>;

/// Helper trait for converting string errors
pub trait IntoLtError {
    fn into_lt_error(self) -> LtError;
}

impl IntoLtError for String {
    fn into_lt_error(self) -> LtError {
        LtError::Internal(self)
    }
}

impl IntoLtError for &str {
    fn into_lt_error(self) -> LtError {
        LtError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::LtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::LtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($path:expr, $($arg:tt)*) => {
        $crate::LtError::Config($crate::ConfigError::InvalidValue {
            path: $path.to_string(),
            message: format!($($arg)*),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::NotFound {
            path: "configs/missing.json".to_string(),
        };
        assert!(error.to_string().contains("not found"));
        assert!(error.to_string().contains("configs/missing.json"));
    }

    #[test]
    fn test_error_conversion() {
        let injection = InjectionError::MissingInstance {
            name: "model".to_string(),
        };
        let lt_error: LtError = injection.into();
        assert!(lt_error.is_injection());

        match lt_error {
            LtError::Injection(InjectionError::MissingInstance { name }) => assert_eq!(name, "model"),
            _ => panic!("Expected Injection error"),
        }
    }

    #[test]
    fn test_type_instantiation_counts_failures() {
        let error = LtError::TypeInstantiation {
            rounds: 3,
            failures: vec![
                TypeFailure { name: "model".into(), message: "missing dataset".into() },
                TypeFailure { name: "writer".into(), message: "missing model".into() },
            ],
        };
        let text = error.to_string();
        assert!(text.contains("3 round(s)"));
        assert!(text.contains("2 type(s)"));
    }

    #[test]
    fn test_macros() {
        let validation = validation_error!("step must be positive, got {}", -1);
        assert!(matches!(validation, LtError::Validation(_)));
        let internal = internal_error!("Something went wrong");
        assert!(matches!(internal, LtError::Internal(_)));
        let config = config_error!("model.lr", "expected a number");
        assert!(config.to_string().contains("model.lr"));
    }
}
