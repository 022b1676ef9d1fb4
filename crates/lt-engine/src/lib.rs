//! # lt-engine
//!
//! Assembles experiments from configuration. A [`Context`] owns the config
//! tree, the [`Registry`] of types and instances, and the search space.
//! Factories come from a [`FactoryCatalog`] and receive an [`Injector`] while
//! they are built; pending types are built by a retrying fixpoint so that
//! declaration order does not matter.

pub mod catalog;
pub mod context;
pub mod experiment;
pub mod inject;
pub mod registry;

pub use catalog::{ExperimentFactory, Factory, FactoryCatalog};
pub use context::{ConfigSource, Context, ContextOptions, SharedContext};
pub use experiment::{builtin_catalog, DryRun, Experiment, Placeholder, DRY_RUN_EXPERIMENT, PLACEHOLDER_COLLABORATOR};
pub use inject::{Collaborators, Injector, InstantiationReport, Slot};
pub use registry::{Instance, Registry, RegistryTree, TypeEntry};
