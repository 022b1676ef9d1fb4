//! # lt-optimizer
//!
//! Hyperparameter search for lighter.
//!
//! Provides typed search axes ([`Parameter`]: grid, list, set, binary, anneal,
//! strategy), JSON-declared axes ([`ParameterSpec`]), the grouped
//! [`SearchSpace`], and the compiler that expands axes into one concrete
//! configuration [`Snapshot`] per combination.

mod parameter;
mod search;
mod spec;
mod writer;

pub use parameter::{Parameter, ParameterIter, ParameterKind, Snapshot, StepFn, EXPERIMENT_ID_KEY};
pub use search::{compile, SearchGroup, SearchSpace, SEARCH_KEY};
pub use spec::ParameterSpec;
pub use writer::{generate_run_name, SnapshotWriter};
