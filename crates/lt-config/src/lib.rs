//! # lt-config
//!
//! Hierarchical, dot-addressable configuration trees loaded from JSON.
//!
//! String values carrying a `type::`, `config::` or `import::` prefix are
//! directives. They are parsed once into [`ConfigValue`] variants while a file
//! is read, so the rest of the system never sniffs strings again.

mod directive;
mod overrides;
mod tree;

pub use directive::{ConfigValue, Directive, CONFIG_PREFIX, IMPORT_PREFIX, TYPE_PREFIX};
pub use overrides::{coerce_value, extract_named_args, CommandLine, MAX_OVERRIDE_LEVELS};
pub use tree::{ConfigTree, TypeBinding, CONFIG_PATH_KEY, MAX_INCLUDE_DEPTH};
