//! The context: one config tree, registry and search space per experiment.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use lt_config::{CommandLine, ConfigTree};
use lt_optimizer::SearchSpace;
use lt_types::{Device, InjectionError, LtResult};

use crate::catalog::FactoryCatalog;
use crate::experiment::Experiment;
use crate::inject::{register_type_refs, Injector, InstantiationReport};
use crate::registry::{Instance, Registry};

/// Where the initial configuration comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Start empty (a `--config` argument still wins).
    #[default]
    Empty,
    File(PathBuf),
    Json(Value),
}

/// How a [`Context`] is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextOptions {
    pub source: ConfigSource,
    /// Raw command-line arguments: `--config`, `--device` and overrides.
    pub args: Vec<String>,
    /// Default device; detected from the environment when unset.
    pub device: Option<Device>,
    pub auto_instantiate_types: bool,
    pub allow_context_changes: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            source: ConfigSource::Empty,
            args: Vec::new(),
            device: None,
            auto_instantiate_types: true,
            allow_context_changes: true,
        }
    }
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::default().with_source(ConfigSource::File(path.into()))
    }

    pub fn from_json(value: Value) -> Self {
        Self::default().with_source(ConfigSource::Json(value))
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_auto_instantiate(mut self, enabled: bool) -> Self {
        self.auto_instantiate_types = enabled;
        self
    }

    pub fn with_context_changes(mut self, allowed: bool) -> Self {
        self.allow_context_changes = allowed;
        self
    }
}

/// Config tree, registry and search space of one experiment.
#[derive(Debug)]
pub struct Context {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: ConfigTree,
    registry: Registry,
    search: SearchSpace,
    catalog: Arc<FactoryCatalog>,
    device: Device,
    process_id: Option<u32>,
    allow_context_changes: bool,
}

impl Context {
    /// Load the configuration, apply command-line overrides, register every
    /// resolvable `type::` reference and, unless disabled, build them.
    pub fn create(options: ContextOptions, catalog: Arc<FactoryCatalog>) -> LtResult<Self> {
        let cmd = CommandLine::parse(&options.args);

        let source = match (&options.source, &cmd.config) {
            (ConfigSource::Empty, Some(path)) => ConfigSource::File(path.clone()),
            (source, _) => source.clone(),
        };
        let mut config = match source {
            ConfigSource::Empty => ConfigTree::new(),
            ConfigSource::File(path) => ConfigTree::load(&path)?,
            ConfigSource::Json(value) => ConfigTree::from_json(value)?,
        };
        cmd.apply(&mut config)?;

        let device = match (cmd.device.as_deref(), options.device) {
            (Some(raw), _) => raw.parse()?,
            (None, Some(device)) => device,
            (None, None) => Device::detect(),
        };

        let search = SearchSpace::from_config(&config)?;
        let mut registry = Registry::new();
        let registered = register_type_refs(&mut registry, &catalog, &config);

        let mut context = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            registry,
            search,
            catalog,
            device,
            process_id: None,
            allow_context_changes: options.allow_context_changes,
        };
        info!(
            "Context {} created: {} type(s) registered, device {}",
            context.id,
            registered.len(),
            context.device
        );

        if options.auto_instantiate_types {
            context.instantiate_types()?;
        }
        Ok(context)
    }

    /// Context over an in-memory tree with nothing instantiated.
    pub fn from_tree(config: ConfigTree, catalog: Arc<FactoryCatalog>) -> Self {
        let mut registry = Registry::new();
        register_type_refs(&mut registry, &catalog, &config);
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            registry,
            search: SearchSpace::new(),
            catalog,
            device: Device::detect(),
            process_id: None,
            allow_context_changes: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigTree {
        &mut self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn search(&self) -> &SearchSpace {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut SearchSpace {
        &mut self.search
    }

    pub fn catalog(&self) -> &FactoryCatalog {
        &self.catalog
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn set_device(&mut self, device: Device) {
        debug!("Context {} device: {} -> {}", self.id, self.device, device);
        self.device = device;
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// Record the OS process this context now runs in.
    pub fn bind_process(&mut self, pid: u32) {
        self.process_id = Some(pid);
    }

    pub fn allow_context_changes(&self) -> bool {
        self.allow_context_changes
    }

    pub fn injector(&mut self) -> Injector<'_> {
        Injector {
            config: &mut self.config,
            registry: &mut self.registry,
            search: &mut self.search,
            catalog: &self.catalog,
            device: &self.device,
            allow_changes: self.allow_context_changes,
            context_id: self.id,
            process_id: self.process_id,
        }
    }

    /// Re-scan the config for `type::` references added since creation.
    pub fn register_types(&mut self) -> usize {
        register_type_refs(&mut self.registry, &self.catalog, &self.config).len()
    }

    /// Build every registered type that has no instance yet.
    pub fn instantiate_types(&mut self) -> LtResult<InstantiationReport> {
        let pending = self.registry.pending_types();
        if pending.is_empty() {
            return Ok(InstantiationReport::default());
        }
        debug!("Context {}: {} pending type(s)", self.id, pending.len());
        self.injector().instantiate(pending)
    }

    /// Typed access to a built instance.
    pub fn instance<T: Any + Send + Sync>(&mut self, name: &str) -> LtResult<Arc<T>> {
        self.injector().reference(name)
    }

    pub fn register_instance(&mut self, name: &str, instance: Instance) {
        self.registry.register_instance(name, instance);
    }

    /// Build the experiment registered in the catalog under `name`.
    pub fn construct_experiment(&mut self, name: &str) -> LtResult<Box<dyn Experiment>> {
        let factory = self.catalog.import_experiment(name).ok_or_else(|| InjectionError::UnknownExperiment {
            name: name.to_string(),
        })?;
        let experiment = factory(&mut self.injector())?;
        info!("Constructed experiment {} in context {}", name, self.id);
        Ok(experiment)
    }
}

/// A context behind one lock, for use across threads.
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<Context>>,
}

impl SharedContext {
    pub fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }

    pub fn create(options: ContextOptions, catalog: Arc<FactoryCatalog>) -> LtResult<Self> {
        Context::create(options, catalog).map(Self::new)
    }

    pub fn lock(&self) -> MutexGuard<'_, Context> {
        self.inner.lock()
    }

    /// Run `f` with the context locked for its whole duration.
    pub fn with<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn id(&self) -> Uuid {
        self.inner.lock().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_default_to_instantiating() {
        let options = ContextOptions::default();
        assert!(options.auto_instantiate_types);
        assert!(options.allow_context_changes);
        assert_eq!(options.source, ConfigSource::Empty);
    }

    #[test]
    fn test_args_override_loaded_config() {
        let options = ContextOptions::from_json(json!({"optimizer": {"lr": 0.1}}))
            .with_args(vec!["--optimizer.lr".into(), "0.5".into(), "--device".into(), "cuda:1".into()]);
        let context = Context::create(options, Arc::new(FactoryCatalog::new())).unwrap();
        assert_eq!(context.config().get::<f64>("optimizer.lr"), Some(0.5));
        assert_eq!(context.device(), &Device::cuda(1));
    }

    #[test]
    fn test_unknown_types_stay_in_the_tree() {
        let options = ContextOptions::from_json(json!({"model": "type::models.Missing"}));
        let context = Context::create(options, Arc::new(FactoryCatalog::new())).unwrap();
        assert!(!context.registry().contains_type("model"));
        assert_eq!(context.config().to_json(), json!({"model": "type::models.Missing"}));
    }

    #[test]
    fn test_shared_context_locks_around_closures() {
        let context = Context::from_tree(ConfigTree::new(), Arc::new(FactoryCatalog::new()));
        let shared = SharedContext::new(context);
        let other = shared.clone();
        std::thread::spawn(move || other.with(|ctx| ctx.config_mut().set_value("epochs", 3i64)))
            .join()
            .unwrap();
        assert_eq!(shared.lock().config().get::<i64>("epochs"), Some(3));
    }
}
