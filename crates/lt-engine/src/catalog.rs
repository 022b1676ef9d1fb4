//! Loader: resolves dotted `type::` paths against an allow-list of factories.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use lt_types::LtResult;

use crate::experiment::Experiment;
use crate::inject::Injector;
use crate::registry::Instance;

/// Builds one collaborator, pulling whatever it needs from the injector.
pub type Factory = Arc<dyn Fn(&mut Injector<'_>) -> LtResult<Instance> + Send + Sync>;

/// Builds a runnable experiment.
pub type ExperimentFactory = Arc<dyn Fn(&mut Injector<'_>) -> LtResult<Box<dyn Experiment>> + Send + Sync>;

/// Named factories available to configuration files.
///
/// Names are dotted (`models.alexnet.Model`): everything before the last dot
/// is the module, the remainder the symbol.
#[derive(Default, Clone)]
pub struct FactoryCatalog {
    factories: HashMap<String, Factory>,
    experiments: HashMap<String, ExperimentFactory>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed factory under `name`.
    pub fn register<T, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&mut Injector<'_>) -> LtResult<T> + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move |injector: &mut Injector<'_>| {
            factory(injector).map(|value| Arc::new(value) as Instance)
        });
        self.factories.insert(name.into(), erased);
        self
    }

    /// Register a zero-argument constructor.
    pub fn register_default<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: Any + Default + Send + Sync,
    {
        self.register(name, |_: &mut Injector<'_>| Ok(T::default()))
    }

    pub fn register_experiment<E, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        E: Experiment + 'static,
        F: Fn(&mut Injector<'_>) -> LtResult<E> + Send + Sync + 'static,
    {
        let erased: ExperimentFactory = Arc::new(move |injector: &mut Injector<'_>| {
            factory(injector).map(|experiment| Box::new(experiment) as Box<dyn Experiment>)
        });
        self.experiments.insert(name.into(), erased);
        self
    }

    /// Add every entry of `other`, replacing same-named ones.
    pub fn extend(&mut self, other: FactoryCatalog) -> &mut Self {
        self.factories.extend(other.factories);
        self.experiments.extend(other.experiments);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn contains_experiment(&self, name: &str) -> bool {
        self.experiments.contains_key(name)
    }

    /// Resolve a dotted path. An unknown module or symbol is logged and
    /// yields `None`; it is never an error.
    pub fn import_path(&self, name: &str) -> Option<Factory> {
        let Some((module, symbol)) = name.rsplit_once('.') else {
            warn!("Cannot import '{}': expected <module>.<symbol>", name);
            return None;
        };
        if let Some(factory) = self.factories.get(name) {
            debug!("Imported {}", name);
            return Some(factory.clone());
        }
        let prefix = format!("{module}.");
        if self.factories.keys().any(|key| key.starts_with(&prefix)) {
            warn!("Module '{}' has no symbol '{}'", module, symbol);
        } else {
            warn!("Module '{}' not found", module);
        }
        None
    }

    pub fn import_experiment(&self, name: &str) -> Option<ExperimentFactory> {
        let found = self.experiments.get(name).cloned();
        if found.is_none() {
            warn!("Experiment '{}' not found", name);
        }
        found
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn experiment_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.experiments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("factories", &self.names())
            .field("experiments", &self.experiment_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Model;

    fn catalog() -> FactoryCatalog {
        let mut catalog = FactoryCatalog::new();
        catalog.register_default::<Model>("models.alexnet.Model");
        catalog
    }

    #[test]
    fn test_resolves_registered_paths() {
        assert!(catalog().import_path("models.alexnet.Model").is_some());
    }

    #[test]
    fn test_missing_paths_are_none() {
        let catalog = catalog();
        assert!(catalog.import_path("models.alexnet.Missing").is_none());
        assert!(catalog.import_path("nowhere.Model").is_none());
        assert!(catalog.import_path("NoDots").is_none());
    }

    #[test]
    fn test_extend_merges_catalogs() {
        let mut base = catalog();
        let mut extra = FactoryCatalog::new();
        extra.register_default::<Model>("models.resnet.Model");
        base.extend(extra);
        assert_eq!(base.names(), vec!["models.alexnet.Model", "models.resnet.Model"]);
    }
}
