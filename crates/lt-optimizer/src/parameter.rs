//! Search axes and the snapshots they produce.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use lt_config::{ConfigTree, ConfigValue};
use lt_types::{LtResult, SearchError};

/// Key under which every snapshot records its own id.
pub const EXPERIMENT_ID_KEY: &str = "experiment_id";

/// Upper bound on the length of a single axis; guards against runaway
/// grids and slow anneals.
const MAX_AXIS_LEN: usize = 100_000;

/// Caller-supplied step from one value to the next, used by anneal and
/// step-grid axes.
#[derive(Clone)]
pub struct StepFn(Arc<dyn Fn(f64) -> f64 + Send + Sync>);

impl StepFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Multiply by `factor` each step.
    pub fn geometric(factor: f64) -> Self {
        Self::new(move |v| v * factor)
    }

    pub fn apply(&self, value: f64) -> f64 {
        (self.0)(value)
    }
}

impl fmt::Debug for StepFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepFn(<fn>)")
    }
}

/// How a parameter walks its values.
#[derive(Debug, Clone)]
pub enum ParameterKind {
    /// `min`, `min + step`, ... while the value stays `<= max`.
    Grid {
        min: f64,
        max: f64,
        step: f64,
        /// Emit JSON integers instead of floats.
        integral: bool,
    },
    /// `min`, `step(min)`, ... while the value stays `<= max`. `step` must
    /// strictly increase, e.g. doubling batch sizes.
    StepGrid {
        min: f64,
        max: f64,
        step: StepFn,
        integral: bool,
    },
    /// The given options, in order.
    List { options: Vec<Value> },
    /// Exactly one fixed value.
    Set { value: Value },
    /// `false`, then `true`.
    Binary,
    /// `start`, `decay(start)`, ... while the value stays `>= threshold`.
    Anneal {
        start: f64,
        threshold: f64,
        decay: StepFn,
    },
    /// Config files merged into the tree at the parameter's reference.
    Strategy { options: Vec<PathBuf> },
}

/// A single search axis bound to one config path.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Dotted path the axis writes (the group key for strategies).
    pub reference: String,
    pub kind: ParameterKind,
}

/// One step of an axis, before it is written into a tree.
#[derive(Debug, Clone)]
enum Step {
    Value(Value),
    Merge(ConfigTree),
}

impl Parameter {
    pub fn new(reference: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            reference: reference.into(),
            kind,
        }
    }

    pub fn grid(reference: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self::new(reference, ParameterKind::Grid { min, max, step, integral: false })
    }

    pub fn int_grid(reference: impl Into<String>, min: i64, max: i64, step: i64) -> Self {
        Self::new(
            reference,
            ParameterKind::Grid {
                min: min as f64,
                max: max as f64,
                step: step as f64,
                integral: true,
            },
        )
    }

    pub fn step_grid(reference: impl Into<String>, min: f64, max: f64, step: StepFn) -> Self {
        Self::new(reference, ParameterKind::StepGrid { min, max, step, integral: false })
    }

    pub fn int_step_grid(reference: impl Into<String>, min: i64, max: i64, step: StepFn) -> Self {
        Self::new(
            reference,
            ParameterKind::StepGrid {
                min: min as f64,
                max: max as f64,
                step,
                integral: true,
            },
        )
    }

    pub fn list(reference: impl Into<String>, options: Vec<Value>) -> Self {
        Self::new(reference, ParameterKind::List { options })
    }

    pub fn set(reference: impl Into<String>, value: Value) -> Self {
        Self::new(reference, ParameterKind::Set { value })
    }

    pub fn binary(reference: impl Into<String>) -> Self {
        Self::new(reference, ParameterKind::Binary)
    }

    pub fn anneal(reference: impl Into<String>, start: f64, threshold: f64, decay: StepFn) -> Self {
        Self::new(reference, ParameterKind::Anneal { start, threshold, decay })
    }

    pub fn strategy(reference: impl Into<String>, options: Vec<PathBuf>) -> Self {
        Self::new(reference, ParameterKind::Strategy { options })
    }

    /// The scalar values this axis emits. Strategy axes emit the option paths.
    pub fn values(&self) -> LtResult<Vec<Value>> {
        match &self.kind {
            ParameterKind::Grid { min, max, step, integral } => {
                self.grid_values(*min, *max, *step, *integral)
            }
            ParameterKind::StepGrid { min, max, step, integral } => {
                self.step_grid_values(*min, *max, step, *integral)
            }
            ParameterKind::List { options } => {
                if options.is_empty() {
                    return Err(SearchError::EmptyOptions {
                        reference: self.reference.clone(),
                    }
                    .into());
                }
                Ok(options.clone())
            }
            ParameterKind::Set { value } => Ok(vec![value.clone()]),
            ParameterKind::Binary => Ok(vec![Value::Bool(false), Value::Bool(true)]),
            ParameterKind::Anneal { start, threshold, decay } => {
                self.anneal_values(*start, *threshold, decay)
            }
            ParameterKind::Strategy { options } => {
                if options.is_empty() {
                    return Err(SearchError::EmptyOptions {
                        reference: self.reference.clone(),
                    }
                    .into());
                }
                Ok(options
                    .iter()
                    .map(|p| Value::String(p.display().to_string()))
                    .collect())
            }
        }
    }

    /// Number of snapshots one pass over this axis yields.
    pub fn len(&self) -> LtResult<usize> {
        Ok(self.values()?.len())
    }

    /// Start iterating over `base`. The caller's tree is never touched: every
    /// snapshot is built from a private copy taken here. Strategy files are
    /// read up front so a missing file fails before any snapshot exists.
    /// Relative strategy paths are tried next to `base`'s source file first,
    /// then against the working directory.
    pub fn iter(&self, base: &ConfigTree) -> LtResult<ParameterIter> {
        let steps = match &self.kind {
            ParameterKind::Strategy { options } => {
                self.values()?;
                let base_dir = base.source().and_then(Path::parent);
                options
                    .iter()
                    .map(|path| ConfigTree::load(resolve_option(path, base_dir)).map(Step::Merge))
                    .collect::<LtResult<Vec<_>>>()?
            }
            _ => self.values()?.into_iter().map(Step::Value).collect(),
        };
        Ok(ParameterIter {
            reference: self.reference.clone(),
            working: base.copy(),
            steps: steps.into_iter(),
        })
    }

    fn invalid(&self, message: impl Into<String>) -> lt_types::LtError {
        SearchError::InvalidParameter {
            reference: self.reference.clone(),
            message: message.into(),
        }
        .into()
    }

    fn empty(&self) -> lt_types::LtError {
        SearchError::EmptyOptions {
            reference: self.reference.clone(),
        }
        .into()
    }

    fn grid_values(&self, min: f64, max: f64, step: f64, integral: bool) -> LtResult<Vec<Value>> {
        if !(min.is_finite() && max.is_finite() && step.is_finite()) {
            return Err(self.invalid("grid bounds must be finite"));
        }
        if step <= 0.0 {
            return Err(self.invalid(format!("grid step must be positive, got {step}")));
        }
        if min > max {
            return Err(self.empty());
        }

        // Values are computed as min + k*step rather than accumulated, so
        // float drift cannot drop an exact upper bound.
        let tolerance = step * 1e-9;
        let mut values = Vec::new();
        for k in 0.. {
            let value = min + k as f64 * step;
            if value > max + tolerance {
                break;
            }
            if values.len() >= MAX_AXIS_LEN {
                return Err(self.invalid(format!("grid exceeds {MAX_AXIS_LEN} values")));
            }
            values.push(number(value, integral));
        }
        Ok(values)
    }

    fn step_grid_values(&self, min: f64, max: f64, step: &StepFn, integral: bool) -> LtResult<Vec<Value>> {
        if !(min.is_finite() && max.is_finite()) {
            return Err(self.invalid("grid bounds must be finite"));
        }
        if min > max {
            return Err(self.empty());
        }
        let tolerance = max.abs().max(1.0) * 1e-9;
        let mut values = Vec::new();
        let mut value = min;
        while value <= max + tolerance {
            if values.len() >= MAX_AXIS_LEN {
                return Err(self.invalid(format!("grid exceeds {MAX_AXIS_LEN} values")));
            }
            values.push(number(value, integral));
            let next = step.apply(value);
            if !(next > value) {
                return Err(self.invalid(format!("grid step must strictly increase ({value} -> {next})")));
            }
            value = next;
        }
        Ok(values)
    }

    fn anneal_values(&self, start: f64, threshold: f64, decay: &StepFn) -> LtResult<Vec<Value>> {
        if !(start.is_finite() && threshold.is_finite()) {
            return Err(self.invalid("anneal bounds must be finite"));
        }
        if start < threshold {
            return Err(self.empty());
        }
        let mut values = Vec::new();
        let mut value = start;
        while value >= threshold {
            if values.len() >= MAX_AXIS_LEN {
                return Err(self.invalid(format!("anneal exceeds {MAX_AXIS_LEN} values")));
            }
            values.push(Value::from(value));
            let next = decay.apply(value);
            if !(next < value) {
                return Err(self.invalid(format!("decay must strictly decrease ({value} -> {next})")));
            }
            value = next;
        }
        Ok(values)
    }
}

fn number(value: f64, integral: bool) -> Value {
    if integral {
        Value::from(value.round() as i64)
    } else {
        Value::from(value)
    }
}

fn resolve_option(path: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(dir) if path.is_relative() => {
            let local = dir.join(path);
            if local.exists() {
                local
            } else {
                path.to_path_buf()
            }
        }
        _ => path.to_path_buf(),
    }
}

/// Iterator over the snapshots of one axis.
#[derive(Debug)]
pub struct ParameterIter {
    reference: String,
    working: ConfigTree,
    steps: std::vec::IntoIter<Step>,
}

impl Iterator for ParameterIter {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        let mut config = self.working.copy();
        match self.steps.next()? {
            Step::Value(value) => config.set_value(&self.reference, ConfigValue::from(value)),
            Step::Merge(tree) => config.subtree_mut(&self.reference).merge(tree),
        }
        Some(Snapshot::new(config))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.steps.size_hint()
    }
}

/// A concrete configuration for one point of the search space.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub config: ConfigTree,
}

impl Snapshot {
    /// Tag `config` with a fresh id, also recorded under `experiment_id`.
    pub fn new(mut config: ConfigTree) -> Self {
        let id = Uuid::new_v4();
        config.set_value(EXPERIMENT_ID_KEY, id.to_string());
        Self { id, config }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }

    /// Write the snapshot as `<dir>/<id>.json`.
    pub fn save(&self, dir: &Path) -> LtResult<PathBuf> {
        let path = dir.join(self.file_name());
        self.config.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lt_types::LtError;
    use serde_json::json;
    use tempfile::tempdir;

    fn values_at(param: &Parameter, base: &ConfigTree) -> Vec<Value> {
        param
            .iter(base)
            .unwrap()
            .map(|snap| snap.config.get_value(&param.reference).unwrap().to_json())
            .collect()
    }

    #[test]
    fn test_grid_includes_max_on_exact_multiple() {
        let param = Parameter::int_grid("model.hidden_units", 1, 10, 3);
        let values = values_at(&param, &ConfigTree::new());
        assert_eq!(values, vec![json!(1), json!(4), json!(7), json!(10)]);
    }

    #[test]
    fn test_grid_stops_at_largest_step_below_max() {
        let param = Parameter::int_grid("x", 1, 9, 3);
        assert_eq!(param.values().unwrap(), vec![json!(1), json!(4), json!(7)]);
    }

    #[test]
    fn test_float_grid_keeps_upper_bound() {
        let param = Parameter::grid("optimizer.lr", 0.001, 0.005, 0.001);
        assert_eq!(param.len().unwrap(), 5);
    }

    #[test]
    fn test_grid_rejects_non_positive_step() {
        let err = Parameter::grid("x", 0.0, 1.0, 0.0).values().unwrap_err();
        assert!(matches!(err, LtError::Search(SearchError::InvalidParameter { .. })));
    }

    #[test]
    fn test_binary_goes_false_then_true() {
        let param = Parameter::binary("model.pretrained");
        let values = values_at(&param, &ConfigTree::new());
        assert_eq!(values, vec![json!(false), json!(true)]);
    }

    #[test]
    fn test_anneal_is_inclusive_of_threshold() {
        let param = Parameter::anneal("optimizer.lr", 1.0, 0.125, StepFn::geometric(0.5));
        assert_eq!(param.values().unwrap(), vec![json!(1.0), json!(0.5), json!(0.25), json!(0.125)]);
    }

    #[test]
    fn test_anneal_rejects_non_decreasing_decay() {
        let param = Parameter::anneal("x", 1.0, 0.1, StepFn::new(|v| v));
        assert!(param.values().is_err());
    }

    #[test]
    fn test_step_grid_doubles_up_to_max() {
        let param = Parameter::int_step_grid("data.batch_size", 16, 256, StepFn::geometric(2.0));
        assert_eq!(
            param.values().unwrap(),
            vec![json!(16), json!(32), json!(64), json!(128), json!(256)]
        );
    }

    #[test]
    fn test_float_step_grid_keeps_upper_bound() {
        let param = Parameter::step_grid("optimizer.lr", 0.001, 1.0, StepFn::geometric(10.0));
        assert_eq!(param.len().unwrap(), 4);
    }

    #[test]
    fn test_step_grid_rejects_non_increasing_step() {
        let param = Parameter::step_grid("x", 1.0, 8.0, StepFn::new(|v| v * 0.5));
        assert!(matches!(
            param.values().unwrap_err(),
            LtError::Search(SearchError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_inverted_numeric_axes_are_empty_errors() {
        let axes = [
            Parameter::grid("x", 5.0, 1.0, 1.0),
            Parameter::step_grid("x", 8.0, 1.0, StepFn::geometric(2.0)),
            Parameter::anneal("x", 0.01, 0.1, StepFn::geometric(0.5)),
        ];
        for param in &axes {
            assert!(matches!(
                param.values().unwrap_err(),
                LtError::Search(SearchError::EmptyOptions { .. })
            ));
        }
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let err = Parameter::list("x", vec![]).values().unwrap_err();
        assert!(matches!(err, LtError::Search(SearchError::EmptyOptions { .. })));
    }

    #[test]
    fn test_iteration_never_touches_the_callers_tree() {
        let base = ConfigTree::from_json(json!({"optimizer": {"lr": 0.1}})).unwrap();
        let before = base.clone();
        let param = Parameter::list("optimizer.lr", vec![json!(0.5), json!(0.9)]);
        let snaps: Vec<_> = param.iter(&base).unwrap().collect();
        assert_eq!(snaps.len(), 2);
        assert_eq!(base, before);
        assert_ne!(snaps[0].id, snaps[1].id);
    }

    #[test]
    fn test_list_of_type_directives_sets_references() {
        let param = Parameter::list(
            "strategy.model",
            vec![json!("type::models.alexnet.Model"), json!("type::models.resnet.Model")],
        );
        let snaps: Vec<_> = param.iter(&ConfigTree::new()).unwrap().collect();
        assert_eq!(
            snaps[1].config.get_value("strategy.model").and_then(ConfigValue::as_type_ref),
            Some("models.resnet.Model")
        );
    }

    #[test]
    fn test_strategy_merges_each_file_over_the_base() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("alexnet.json");
        let b = dir.path().join("resnet.json");
        std::fs::write(&a, r#"{"model": "type::models.alexnet.Model", "extra": 1}"#).unwrap();
        std::fs::write(&b, r#"{"model": "type::models.resnet.Model"}"#).unwrap();

        let base = ConfigTree::from_json(json!({"strategy": {"writer": "type::writers.Writer"}})).unwrap();
        let param = Parameter::strategy("strategy", vec![a, b]);
        let snaps: Vec<_> = param.iter(&base).unwrap().collect();

        assert_eq!(snaps.len(), 2);
        assert!(snaps[0].config.has_value("strategy.writer"));
        assert!(snaps[0].config.has_value("strategy.extra"));
        assert!(!snaps[1].config.has_value("strategy.extra"));
        assert_eq!(
            snaps[1].config.get_value("strategy.model").and_then(ConfigValue::as_type_ref),
            Some("models.resnet.Model")
        );
    }

    #[test]
    fn test_strategy_paths_resolve_next_to_the_declaring_config() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("strategies")).unwrap();
        std::fs::write(dir.path().join("strategies/resnet.json"), r#"{"depth": 50}"#).unwrap();
        let config = dir.path().join("experiment.json");
        std::fs::write(&config, r#"{"epochs": 1}"#).unwrap();

        let base = ConfigTree::load(&config).unwrap();
        let param = Parameter::strategy("strategy", vec![PathBuf::from("strategies/resnet.json")]);
        let snaps: Vec<_> = param.iter(&base).unwrap().collect();
        assert_eq!(snaps[0].config.get::<i64>("strategy.depth"), Some(50));
    }

    #[test]
    fn test_strategy_with_missing_file_fails_up_front() {
        let param = Parameter::strategy("strategy", vec![PathBuf::from("/nope/missing.json")]);
        assert!(param.iter(&ConfigTree::new()).is_err());
    }

    #[test]
    fn test_snapshot_saves_under_its_id() {
        let dir = tempdir().unwrap();
        let snap = Snapshot::new(ConfigTree::from_json(json!({"epochs": 3})).unwrap());
        let path = snap.save(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), snap.file_name());

        let loaded = ConfigTree::load(&path).unwrap();
        assert_eq!(loaded.get::<String>(EXPERIMENT_ID_KEY), Some(snap.id.to_string()));
    }
}
