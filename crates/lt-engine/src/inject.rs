//! The handle factories receive while they are being constructed.

use serde::de::DeserializeOwned;
use std::any::{type_name, Any};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lt_config::{ConfigTree, ConfigValue};
use lt_optimizer::{Parameter, SearchSpace, SEARCH_KEY};
use lt_types::{Device, InjectionError, LtError, LtResult, TypeFailure};

use crate::catalog::FactoryCatalog;
use crate::registry::{Instance, Registry, TypeEntry};

/// The standard collaborator names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Model,
    Dataset,
    DataBuilder,
    Optimizer,
    Collectible,
    Criterion,
    Metric,
    Writer,
    Transform,
}

impl Slot {
    pub const ALL: [Slot; 9] = [
        Slot::Model,
        Slot::Dataset,
        Slot::DataBuilder,
        Slot::Optimizer,
        Slot::Collectible,
        Slot::Criterion,
        Slot::Metric,
        Slot::Writer,
        Slot::Transform,
    ];

    /// Slots every experiment is handed; transforms are pulled by datasets.
    pub const EXPERIMENT: [Slot; 8] = [
        Slot::Model,
        Slot::Dataset,
        Slot::DataBuilder,
        Slot::Optimizer,
        Slot::Collectible,
        Slot::Criterion,
        Slot::Metric,
        Slot::Writer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Slot::Model => "model",
            Slot::Dataset => "dataset",
            Slot::DataBuilder => "data_builder",
            Slot::Optimizer => "optimizer",
            Slot::Collectible => "collectible",
            Slot::Criterion => "criterion",
            Slot::Metric => "metric",
            Slot::Writer => "writer",
            Slot::Transform => "transform",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The eight experiment collaborators, already built.
#[derive(Clone)]
pub struct Collaborators {
    pub model: Instance,
    pub dataset: Instance,
    pub data_builder: Instance,
    pub optimizer: Instance,
    pub collectible: Instance,
    pub criterion: Instance,
    pub metric: Instance,
    pub writer: Instance,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Outcome of a successful fixpoint pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstantiationReport {
    pub built: usize,
    pub rounds: usize,
}

/// Register every `type::` reference of `tree` under its leaf key. Returns
/// the names that were registered; unresolved targets are skipped.
pub(crate) fn register_type_refs(registry: &mut Registry, catalog: &FactoryCatalog, tree: &ConfigTree) -> Vec<String> {
    let search_prefix = format!("{SEARCH_KEY}.");
    let mut registered = Vec::new();
    for binding in tree.type_refs() {
        if binding.location.starts_with(&search_prefix) {
            continue;
        }
        match catalog.import_path(&binding.target) {
            Some(factory) => {
                registry.register_type(&binding.key, TypeEntry::new(&binding.target, factory));
                debug!("Registered type {} -> {}", binding.key, binding.target);
                registered.push(binding.key);
            }
            None => warn!(
                "Type '{}' at {} left unset: {} could not be imported",
                binding.key, binding.location, binding.target
            ),
        }
    }
    registered
}

/// Borrowed view of a context handed to factories.
pub struct Injector<'a> {
    pub(crate) config: &'a mut ConfigTree,
    pub(crate) registry: &'a mut Registry,
    pub(crate) search: &'a mut SearchSpace,
    pub(crate) catalog: &'a FactoryCatalog,
    pub(crate) device: &'a Device,
    pub(crate) allow_changes: bool,
    pub(crate) context_id: Uuid,
    pub(crate) process_id: Option<u32>,
}

impl<'a> Injector<'a> {
    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    pub fn device(&self) -> &Device {
        self.device
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn allows_changes(&self) -> bool {
        self.allow_changes
    }

    // ---- config ----

    pub fn config(&self) -> &ConfigTree {
        &*self.config
    }

    /// Required typed value from the context config.
    pub fn value<T: DeserializeOwned>(&self, path: &str) -> LtResult<T> {
        self.config.get(path).ok_or_else(|| {
            InjectionError::MissingConfig {
                path: path.to_string(),
            }
            .into()
        })
    }

    pub fn value_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.config.get_or(path, default)
    }

    /// Load `path` and hand it back. When changes are allowed the loaded tree
    /// is also nested under `property` (or merged at the top level) and its
    /// `type::` entries are registered.
    pub fn config_file(&mut self, path: impl AsRef<Path>, property: Option<&str>) -> LtResult<ConfigTree> {
        let loaded = ConfigTree::load(path.as_ref())?;
        if !self.allow_changes {
            debug!("Context changes disabled; {} not merged", path.as_ref().display());
            return Ok(loaded);
        }
        match property {
            Some(property) => self.config.set_value(property, ConfigValue::Tree(loaded.clone())),
            None => self.config.merge(loaded.clone()),
        }
        register_type_refs(self.registry, self.catalog, &loaded);
        Ok(loaded)
    }

    // ---- instances ----

    pub fn instance(&self, name: &str) -> LtResult<Instance> {
        self.registry.instance(name).cloned().ok_or_else(|| {
            InjectionError::MissingInstance {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// A built instance of type `T`.
    pub fn reference<T: Any + Send + Sync>(&self, name: &str) -> LtResult<Arc<T>> {
        downcast(name, self.instance(name)?)
    }

    /// Like [`reference`](Self::reference) but absence is not an error.
    pub fn optional_reference<T: Any + Send + Sync>(&self, name: &str) -> LtResult<Option<Arc<T>>> {
        match self.registry.instance(name) {
            Some(instance) => downcast(name, instance.clone()).map(Some),
            None => Ok(None),
        }
    }

    pub fn references(&self, names: &[&str]) -> LtResult<Vec<Instance>> {
        names.iter().map(|name| self.instance(name)).collect()
    }

    pub fn slot(&self, slot: Slot) -> LtResult<Instance> {
        self.instance(slot.name())
    }

    /// The eight experiment slots; fails on the first one missing.
    pub fn collaborators(&self) -> LtResult<Collaborators> {
        Ok(Collaborators {
            model: self.slot(Slot::Model)?,
            dataset: self.slot(Slot::Dataset)?,
            data_builder: self.slot(Slot::DataBuilder)?,
            optimizer: self.slot(Slot::Optimizer)?,
            collectible: self.slot(Slot::Collectible)?,
            criterion: self.slot(Slot::Criterion)?,
            metric: self.slot(Slot::Metric)?,
            writer: self.slot(Slot::Writer)?,
        })
    }

    /// Load a strategy file under `group`, build every type it declares and
    /// return the instances named by `properties`.
    pub fn strategy(&mut self, path: impl AsRef<Path>, group: &str, properties: &[&str]) -> LtResult<Vec<Instance>> {
        if self.allow_changes {
            let loaded = ConfigTree::load(path.as_ref())?;
            self.config.set_value(group, ConfigValue::Tree(loaded.clone()));
            let registered = register_type_refs(self.registry, self.catalog, &loaded);
            let pending: Vec<String> = registered
                .into_iter()
                .filter(|name| !self.registry.contains_instance(name))
                .collect();
            if !pending.is_empty() {
                self.instantiate(pending)?;
            }
        } else {
            debug!("Context changes disabled; strategy {} not loaded", path.as_ref().display());
        }
        self.references(properties)
    }

    // ---- search ----

    /// Register axes under `group`. Nothing is enumerated here.
    pub fn search<I, S>(&mut self, group: &str, parameters: I)
    where
        I: IntoIterator<Item = (S, Parameter)>,
        S: Into<String>,
    {
        if self.allow_changes {
            self.search.register_all(group, parameters);
        } else {
            debug!("Context changes disabled; search group '{}' not registered", group);
        }
    }

    pub fn search_space(&self) -> &SearchSpace {
        &*self.search
    }

    // ---- construction ----

    /// Build `pending` types, retrying failures as a unit.
    ///
    /// Each round attempts every remaining type; successes are registered at
    /// once so later attempts in the same round can see them. The pass fails
    /// with [`LtError::TypeInstantiation`] once as many rounds as there were
    /// pending types have run without emptying the retry set.
    pub fn instantiate(&mut self, pending: Vec<String>) -> LtResult<InstantiationReport> {
        let budget = pending.len();
        let mut remaining = pending;
        let mut report = InstantiationReport::default();
        let mut failures: Vec<TypeFailure> = Vec::new();

        while !remaining.is_empty() {
            if report.rounds == budget {
                for failure in &failures {
                    error!("Could not instantiate {}: {}", failure.name, failure.message);
                }
                return Err(LtError::TypeInstantiation {
                    rounds: report.rounds,
                    failures,
                });
            }
            report.rounds += 1;
            failures.clear();

            let mut retry = Vec::new();
            for name in remaining {
                let Some(factory) = self.registry.type_entry(&name).map(|entry| entry.factory.clone()) else {
                    failures.push(TypeFailure {
                        name: name.clone(),
                        message: "type is not registered".to_string(),
                    });
                    retry.push(name);
                    continue;
                };
                match factory(self) {
                    Ok(instance) => {
                        self.registry.register_instance(&name, instance);
                        report.built += 1;
                        debug!("Instantiated {} in round {}", name, report.rounds);
                    }
                    Err(e) => {
                        debug!("Deferring {} (round {}): {}", name, report.rounds, e);
                        failures.push(TypeFailure {
                            name: name.clone(),
                            message: e.to_string(),
                        });
                        retry.push(name);
                    }
                }
            }
            remaining = retry;
        }

        if report.built > 0 {
            info!("Instantiated {} type(s) in {} round(s)", report.built, report.rounds);
        }
        Ok(report)
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, instance: Instance) -> LtResult<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        InjectionError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>().to_string(),
        }
        .into()
    })
}
