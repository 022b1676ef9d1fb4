//! Search axes declared in JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::path::PathBuf;

use lt_types::{LtResult, SearchError};

use crate::parameter::{Parameter, StepFn};

fn default_step() -> Number {
    Number::from(1)
}

/// Serde form of a [`Parameter`], e.g. `{"grid": {"ref": "optimizer.lr", ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSpec {
    Grid {
        #[serde(rename = "ref")]
        reference: String,
        min: Number,
        max: Number,
        #[serde(default = "default_step")]
        step: Number,
    },
    /// Each value is the previous one times `factor`, e.g. doubling batch sizes.
    GeometricGrid {
        #[serde(rename = "ref")]
        reference: String,
        min: Number,
        max: Number,
        factor: f64,
    },
    List {
        #[serde(rename = "ref")]
        reference: String,
        options: Vec<Value>,
    },
    Set {
        #[serde(rename = "ref")]
        reference: String,
        value: Value,
    },
    Binary {
        #[serde(rename = "ref")]
        reference: String,
    },
    /// Geometric anneal: each value is the previous one times `factor`.
    Anneal {
        #[serde(rename = "ref")]
        reference: String,
        start: f64,
        threshold: f64,
        factor: f64,
    },
    Strategy {
        #[serde(rename = "ref")]
        reference: String,
        options: Vec<PathBuf>,
    },
}

impl ParameterSpec {
    pub fn reference(&self) -> &str {
        match self {
            Self::Grid { reference, .. }
            | Self::GeometricGrid { reference, .. }
            | Self::List { reference, .. }
            | Self::Set { reference, .. }
            | Self::Binary { reference }
            | Self::Anneal { reference, .. }
            | Self::Strategy { reference, .. } => reference,
        }
    }

    /// Grids whose `min` and `step` are both integers produce integers; so do
    /// geometric grids with integer bounds and a whole `factor`.
    pub fn into_parameter(self) -> LtResult<Parameter> {
        let param = match self {
            Self::Grid { reference, min, max, step } => {
                match (min.as_i64(), step.as_i64()) {
                    (Some(lo), Some(st)) => {
                        let hi = max.as_f64().unwrap_or(f64::NAN).floor();
                        if !hi.is_finite() {
                            return Err(invalid(&reference, "grid max must be a finite number"));
                        }
                        Parameter::int_grid(reference, lo, hi as i64, st)
                    }
                    _ => {
                        let (Some(lo), Some(hi), Some(st)) = (min.as_f64(), max.as_f64(), step.as_f64()) else {
                            return Err(invalid(&reference, "grid bounds must be numbers"));
                        };
                        Parameter::grid(reference, lo, hi, st)
                    }
                }
            }
            Self::GeometricGrid { reference, min, max, factor } => {
                if !(factor.is_finite() && factor > 1.0) {
                    return Err(invalid(&reference, format!("grid factor must be greater than 1, got {factor}")));
                }
                let step = StepFn::geometric(factor);
                match (min.as_i64(), max.as_i64()) {
                    (Some(lo), Some(hi)) if factor.fract() == 0.0 && lo > 0 => {
                        Parameter::int_step_grid(reference, lo, hi, step)
                    }
                    _ => {
                        let (Some(lo), Some(hi)) = (min.as_f64(), max.as_f64()) else {
                            return Err(invalid(&reference, "grid bounds must be numbers"));
                        };
                        if lo <= 0.0 {
                            return Err(invalid(&reference, format!("geometric grid min must be positive, got {lo}")));
                        }
                        Parameter::step_grid(reference, lo, hi, step)
                    }
                }
            }
            Self::List { reference, options } => Parameter::list(reference, options),
            Self::Set { reference, value } => Parameter::set(reference, value),
            Self::Binary { reference } => Parameter::binary(reference),
            Self::Anneal { reference, start, threshold, factor } => {
                if !(factor > 0.0 && factor < 1.0) {
                    return Err(invalid(&reference, format!("anneal factor must be in (0, 1), got {factor}")));
                }
                Parameter::anneal(reference, start, threshold, StepFn::geometric(factor))
            }
            Self::Strategy { reference, options } => Parameter::strategy(reference, options),
        };
        // Surface bad bounds at declaration time.
        param.len()?;
        Ok(param)
    }
}

fn invalid(reference: &str, message: impl Into<String>) -> lt_types::LtError {
    SearchError::InvalidParameter {
        reference: reference.to_string(),
        message: message.into(),
    }
    .into()
}
