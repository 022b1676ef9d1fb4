//! Dot-addressable registries of types and built instances.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::catalog::Factory;

/// A constructed collaborator.
pub type Instance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone)]
enum Node<T> {
    Entry(T),
    Group(RegistryTree<T>),
}

/// Ordered tree keyed by dotted names. Inserting `a.b.c` creates the `a` and
/// `a.b` groups when they are missing (or when they currently hold an entry).
#[derive(Debug, Clone)]
pub struct RegistryTree<T> {
    nodes: Vec<(String, Node<T>)>,
}

impl<T> Default for RegistryTree<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> RegistryTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.nodes.iter().position(|(k, _)| k == key)
    }

    fn group_mut(&mut self, key: &str) -> &mut RegistryTree<T> {
        let idx = match self.position(key) {
            Some(idx) => {
                if !matches!(self.nodes[idx].1, Node::Group(_)) {
                    self.nodes[idx].1 = Node::Group(RegistryTree::new());
                }
                idx
            }
            None => {
                self.nodes.push((key.to_string(), Node::Group(RegistryTree::new())));
                self.nodes.len() - 1
            }
        };
        match &mut self.nodes[idx].1 {
            Node::Group(tree) => tree,
            Node::Entry(_) => unreachable!("intermediate was just made a group"),
        }
    }

    /// Insert or replace; returns the previous entry at exactly `name`.
    pub fn insert(&mut self, name: &str, value: T) -> Option<T> {
        match name.split_once('.') {
            Some((head, rest)) => self.group_mut(head).insert(rest, value),
            None => match self.position(name) {
                Some(idx) => match std::mem::replace(&mut self.nodes[idx].1, Node::Entry(value)) {
                    Node::Entry(old) => Some(old),
                    Node::Group(_) => None,
                },
                None => {
                    self.nodes.push((name.to_string(), Node::Entry(value)));
                    None
                }
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        match name.split_once('.') {
            Some((head, rest)) => match &self.nodes[self.position(head)?].1 {
                Node::Group(tree) => tree.get(rest),
                Node::Entry(_) => None,
            },
            None => match &self.nodes[self.position(name)?].1 {
                Node::Entry(value) => Some(value),
                Node::Group(_) => None,
            },
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when `name` is an entry or a group.
    pub fn contains_path(&self, name: &str) -> bool {
        match name.split_once('.') {
            Some((head, rest)) => self
                .position(head)
                .is_some_and(|idx| matches!(&self.nodes[idx].1, Node::Group(tree) if tree.contains_path(rest))),
            None => self.position(name).is_some(),
        }
    }

    /// Remove an entry or a whole group. Returns the entry when `name` held one.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        match name.split_once('.') {
            Some((head, rest)) => {
                let idx = self.position(head)?;
                match &mut self.nodes[idx].1 {
                    Node::Group(tree) => tree.remove(rest),
                    Node::Entry(_) => None,
                }
            }
            None => {
                let idx = self.position(name)?;
                match self.nodes.remove(idx).1 {
                    Node::Entry(value) => Some(value),
                    Node::Group(_) => None,
                }
            }
        }
    }

    /// Every entry with its full dotted name, depth first.
    pub fn entries(&self) -> Vec<(String, &T)> {
        let mut out = Vec::new();
        self.collect("", &mut out);
        out
    }

    fn collect<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a T)>) {
        for (key, node) in &self.nodes {
            let name = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match node {
                Node::Entry(value) => out.push((name, value)),
                Node::Group(tree) => tree.collect(&name, out),
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().into_iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// A resolved `type::` target.
#[derive(Clone)]
pub struct TypeEntry {
    /// Dotted catalog path the factory was resolved from.
    pub target: String,
    pub factory: Factory,
}

impl TypeEntry {
    pub fn new(target: impl Into<String>, factory: Factory) -> Self {
        Self {
            target: target.into(),
            factory,
        }
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry").field("target", &self.target).finish_non_exhaustive()
    }
}

/// Types and instances of one context. No validation happens here: a name
/// may be registered as a type without ever being built.
#[derive(Default, Clone)]
pub struct Registry {
    types: RegistryTree<TypeEntry>,
    instances: RegistryTree<Instance>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- types ----

    pub fn register_type(&mut self, name: &str, entry: TypeEntry) {
        self.types.insert(name, entry);
    }

    pub fn contains_type(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    pub fn unregister_type(&mut self, name: &str) -> Option<TypeEntry> {
        self.types.remove(name)
    }

    pub fn type_entry(&self, name: &str) -> Option<&TypeEntry> {
        self.types.get(name)
    }

    pub fn types(&self) -> &RegistryTree<TypeEntry> {
        &self.types
    }

    // ---- instances ----

    pub fn register_instance(&mut self, name: &str, instance: Instance) {
        self.instances.insert(name, instance);
    }

    /// Wrap and register a plain value.
    pub fn register_value<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.register_instance(name, Arc::new(value));
    }

    pub fn contains_instance(&self, name: &str) -> bool {
        self.instances.contains(name)
    }

    pub fn unregister_instance(&mut self, name: &str) -> Option<Instance> {
        self.instances.remove(name)
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn instances(&self) -> &RegistryTree<Instance> {
        &self.instances
    }

    /// Registered types that have no instance yet, in registration order.
    pub fn pending_types(&self) -> Vec<String> {
        self.types
            .names()
            .into_iter()
            .filter(|name| !self.instances.contains(name))
            .collect()
    }

    pub fn clear(&mut self) {
        self.types.clear();
        self.instances.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types.names())
            .field("instances", &self.instances.names())
            .finish()
    }
}
