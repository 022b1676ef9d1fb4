//! Named groups of search axes and the Cartesian compiler.

use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use lt_config::ConfigTree;
use lt_types::{LtResult, SearchError};

use crate::parameter::{Parameter, Snapshot, StepFn};
use crate::spec::ParameterSpec;

/// Key under which a config file may declare its search groups.
pub const SEARCH_KEY: &str = "search";

/// Enumerate every combination of `parameters` over `base`.
///
/// The head axis is iterated over `base`; each of its snapshots becomes the
/// base for the tail. The result holds exactly the product of the axis
/// lengths, in declared order with the last axis varying fastest. With no
/// axes the result is a single copy of `base` with a fresh id.
pub fn compile(base: &ConfigTree, parameters: &[Parameter]) -> LtResult<Vec<Snapshot>> {
    let Some((head, tail)) = parameters.split_first() else {
        return Ok(vec![Snapshot::new(base.copy())]);
    };

    let mut out = Vec::new();
    for snapshot in head.iter(base)? {
        if tail.is_empty() {
            out.push(snapshot);
        } else {
            out.extend(compile(&snapshot.config, tail)?);
        }
    }
    Ok(out)
}

/// An ordered set of named axes compiled together.
#[derive(Debug, Clone, Default)]
pub struct SearchGroup {
    pub name: String,
    pub parameters: Vec<(String, Parameter)>,
}

impl SearchGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Add or replace an axis; a replaced axis keeps its position.
    pub fn add(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.insert(name, parameter);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, parameter: Parameter) {
        let name = name.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = parameter,
            None => self.parameters.push((name, parameter)),
        }
    }

    pub fn add_grid(self, name: impl Into<String>, reference: &str, min: f64, max: f64, step: f64) -> Self {
        self.add(name, Parameter::grid(reference, min, max, step))
    }

    /// Grid from `min` to `max` where `step` maps each value to the next.
    pub fn add_step_grid(self, name: impl Into<String>, reference: &str, min: f64, max: f64, step: StepFn) -> Self {
        self.add(name, Parameter::step_grid(reference, min, max, step))
    }

    pub fn add_list(self, name: impl Into<String>, reference: &str, options: Vec<Value>) -> Self {
        self.add(name, Parameter::list(reference, options))
    }

    pub fn add_binary(self, name: impl Into<String>, reference: &str) -> Self {
        self.add(name, Parameter::binary(reference))
    }

    pub fn add_anneal(self, name: impl Into<String>, reference: &str, start: f64, threshold: f64, decay: StepFn) -> Self {
        self.add(name, Parameter::anneal(reference, start, threshold, decay))
    }

    pub fn add_strategy(self, name: impl Into<String>, reference: &str, options: Vec<PathBuf>) -> Self {
        self.add(name, Parameter::strategy(reference, options))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Number of snapshots [`compile`] will produce; `None` on overflow.
    pub fn grid_size(&self) -> LtResult<Option<usize>> {
        let mut total: usize = 1;
        for (_, param) in &self.parameters {
            match total.checked_mul(param.len()?) {
                Some(next) => total = next,
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }

    pub fn compile(&self, base: &ConfigTree) -> LtResult<Vec<Snapshot>> {
        let axes: Vec<Parameter> = self.parameters.iter().map(|(_, p)| p.clone()).collect();
        let snapshots = compile(base, &axes)?;
        debug!("Compiled group '{}': {} snapshots", self.name, snapshots.len());
        Ok(snapshots)
    }
}

/// All search groups registered with one context.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    groups: Vec<SearchGroup>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add axes to `group`, creating it if needed. Registration is metadata
    /// only; nothing is enumerated until compile time.
    pub fn register(&mut self, group: &str, name: impl Into<String>, parameter: Parameter) {
        self.group_mut(group).insert(name, parameter);
    }

    pub fn register_all<I, S>(&mut self, group: &str, parameters: I)
    where
        I: IntoIterator<Item = (S, Parameter)>,
        S: Into<String>,
    {
        let target = self.group_mut(group);
        for (name, param) in parameters {
            target.insert(name, param);
        }
    }

    pub fn group(&self, name: &str) -> Option<&SearchGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn group_mut(&mut self, name: &str) -> &mut SearchGroup {
        let idx = match self.groups.iter().position(|g| g.name == name) {
            Some(idx) => idx,
            None => {
                self.groups.push(SearchGroup::new(name));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx]
    }

    pub fn groups(&self) -> &[SearchGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn compile_group(&self, group: &str, base: &ConfigTree) -> LtResult<Vec<Snapshot>> {
        let found = self.group(group).ok_or_else(|| SearchError::UnknownGroup {
            group: group.to_string(),
        })?;
        found.compile(base)
    }

    /// Compile every group in registration order and concatenate.
    pub fn compile_all(&self, base: &ConfigTree) -> LtResult<Vec<(String, Vec<Snapshot>)>> {
        let mut out = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            out.push((group.name.clone(), group.compile(base)?));
        }
        Ok(out)
    }

    /// Read `{group: {name: spec}}` declarations from the `search` subtree.
    pub fn from_config(config: &ConfigTree) -> LtResult<Self> {
        let mut space = Self::new();
        let Some(search) = config.subtree(SEARCH_KEY) else {
            return Ok(space);
        };
        for (group, value) in search.iter() {
            let Some(axes) = value.as_tree() else {
                return Err(SearchError::InvalidParameter {
                    reference: format!("{SEARCH_KEY}.{group}"),
                    message: "search group must be an object".to_string(),
                }
                .into());
            };
            for (name, declared) in axes.iter() {
                let spec: ParameterSpec = serde_json::from_value(declared.to_json()).map_err(|e| {
                    SearchError::InvalidParameter {
                        reference: format!("{SEARCH_KEY}.{group}.{name}"),
                        message: e.to_string(),
                    }
                })?;
                space.register(group, name, spec.into_parameter()?);
            }
        }
        info!("Read {} search group(s) from config", space.groups.len());
        Ok(space)
    }
}
