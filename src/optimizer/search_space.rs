//! Search space definition for hyperparameters

use crate::error::{Result, TunerError};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type of parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterType {
    /// Continuous float parameter
    Float { low: f64, high: f64, log_scale: bool },
    /// Integer parameter on the grid low, low + step, ... <= high
    Int { low: i64, high: i64, step: i64 },
    /// One of a fixed list of values
    Choice { values: Vec<ParameterValue> },
    /// Boolean parameter
    Boolean,
}

/// Sampled parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int; floats only when they are whole numbers
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

/// A single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParameterType,
}

impl Parameter {
    pub fn float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Float {
                low,
                high,
                log_scale: false,
            },
        }
    }

    pub fn log_float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Float {
                low,
                high,
                log_scale: true,
            },
        }
    }

    pub fn int(name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Int { low, high, step },
        }
    }

    pub fn choice<V: Into<ParameterValue>>(name: impl Into<String>, values: Vec<V>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Choice {
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Boolean,
        }
    }

    fn invalid(&self, value: impl ToString, reason: &str) -> TunerError {
        TunerError::InvalidParameter {
            name: self.name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check that the definition describes a non-empty domain
    pub fn validate(&self) -> Result<()> {
        match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                if !(low <= high) {
                    return Err(self.invalid(format!("[{}, {}]", low, high), "low must not exceed high"));
                }
                if *log_scale && *low <= 0.0 {
                    return Err(self.invalid(low, "log scale needs a positive lower bound"));
                }
            }
            ParameterType::Int { low, high, step } => {
                if low > high {
                    return Err(self.invalid(format!("[{}, {}]", low, high), "low must not exceed high"));
                }
                if *step <= 0 {
                    return Err(self.invalid(step, "step must be positive"));
                }
            }
            ParameterType::Choice { values } => {
                if values.is_empty() {
                    return Err(self.invalid("[]", "needs at least one value"));
                }
            }
            ParameterType::Boolean => {}
        }
        Ok(())
    }

    /// Number of grid points for Int parameters
    fn int_points(low: i64, high: i64, step: i64) -> usize {
        ((high - low) / step) as usize + 1
    }

    /// Sample a random value
    pub fn sample(&self, rng: &mut impl Rng) -> ParameterValue {
        match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                let val = if *log_scale {
                    let log_low = low.ln();
                    let log_high = high.ln();
                    (rng.gen::<f64>() * (log_high - log_low) + log_low).exp()
                } else {
                    rng.gen::<f64>() * (high - low) + low
                };
                ParameterValue::Float(val)
            }
            ParameterType::Int { low, high, step } => {
                let idx = rng.gen_range(0..Self::int_points(*low, *high, *step));
                ParameterValue::Int(low + step * idx as i64)
            }
            ParameterType::Choice { values } => values[rng.gen_range(0..values.len())].clone(),
            ParameterType::Boolean => ParameterValue::Bool(rng.gen()),
        }
    }

    /// Whether `value` lies in this parameter's domain
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match &self.param_type {
            ParameterType::Float { low, high, .. } => value.as_float().map_or(false, |v| v >= *low && v <= *high),
            ParameterType::Int { low, high, step } => value
                .as_int()
                .map_or(false, |v| v >= *low && v <= *high && (v - low) % step == 0),
            ParameterType::Choice { values } => values.contains(value),
            ParameterType::Boolean => value.as_bool().is_some(),
        }
    }

    /// Number of values of a discrete parameter, `None` for floats
    pub fn n_values(&self) -> Option<usize> {
        match &self.param_type {
            ParameterType::Float { .. } => None,
            ParameterType::Int { low, high, step } => Some(Self::int_points(*low, *high, *step)),
            ParameterType::Choice { values } => Some(values.len()),
            ParameterType::Boolean => Some(2),
        }
    }

    /// All values of a discrete parameter, `None` for floats
    pub fn values(&self) -> Option<Vec<ParameterValue>> {
        match &self.param_type {
            ParameterType::Float { .. } => None,
            ParameterType::Int { low, high, step } => Some(
                (0..Self::int_points(*low, *high, *step))
                    .map(|i| ParameterValue::Int(low + step * i as i64))
                    .collect(),
            ),
            ParameterType::Choice { values } => Some(values.clone()),
            ParameterType::Boolean => Some(vec![ParameterValue::Bool(false), ParameterValue::Bool(true)]),
        }
    }

    /// Map a value to [0, 1]; discrete values map to the centre of their cell
    pub fn encode(&self, value: &ParameterValue) -> Result<f64> {
        if !self.contains(value) {
            return Err(self.invalid(value, "outside the search space"));
        }
        let cell = |idx: usize, n: usize| (idx as f64 + 0.5) / n as f64;
        let encoded = match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                let v = value.as_float().unwrap_or(*low);
                if high == low {
                    0.5
                } else if *log_scale {
                    (v.ln() - low.ln()) / (high.ln() - low.ln())
                } else {
                    (v - low) / (high - low)
                }
            }
            ParameterType::Int { low, high, step } => {
                let v = value.as_int().unwrap_or(*low);
                cell(((v - low) / step) as usize, Self::int_points(*low, *high, *step))
            }
            ParameterType::Choice { values } => {
                let idx = values.iter().position(|v| v == value).unwrap_or(0);
                cell(idx, values.len())
            }
            ParameterType::Boolean => cell(value.as_bool().map_or(0, usize::from), 2),
        };
        Ok(encoded)
    }

    /// Inverse of [`encode`](Self::encode); `u` is clamped to [0, 1]
    pub fn decode(&self, u: f64) -> ParameterValue {
        let u = u.clamp(0.0, 1.0);
        let cell = |n: usize| ((u * n as f64) as usize).min(n - 1);
        match &self.param_type {
            ParameterType::Float { low, high, log_scale } => {
                let v = if *log_scale {
                    (low.ln() + u * (high.ln() - low.ln())).exp()
                } else {
                    low + u * (high - low)
                };
                ParameterValue::Float(v.clamp(*low, *high))
            }
            ParameterType::Int { low, high, step } => {
                let idx = cell(Self::int_points(*low, *high, *step));
                ParameterValue::Int(low + step * idx as i64)
            }
            ParameterType::Choice { values } => values[cell(values.len())].clone(),
            ParameterType::Boolean => ParameterValue::Bool(cell(2) == 1),
        }
    }
}

/// Search space for hyperparameter optimization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; a later definition with the same name replaces the earlier one
    pub fn add(mut self, param: Parameter) -> Self {
        self.parameters.retain(|p| p.name != param.name);
        self.parameters.push(param);
        self
    }

    pub fn float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::float(name, low, high))
    }

    pub fn log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::log_float(name, low, high))
    }

    pub fn int(self, name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        self.add(Parameter::int(name, low, high, step))
    }

    pub fn choice<V: Into<ParameterValue>>(self, name: impl Into<String>, values: Vec<V>) -> Self {
        self.add(Parameter::choice(name, values))
    }

    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.add(Parameter::boolean(name))
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(TunerError::ConfigError("search space is empty".to_string()));
        }
        self.parameters.iter().try_for_each(Parameter::validate)
    }

    /// Sample a random configuration
    pub fn sample(&self, rng: &mut impl Rng) -> TrialParams {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }

    /// Encode a configuration as a point of the unit cube, in parameter order
    pub fn encode(&self, params: &TrialParams) -> Result<Vec<f64>> {
        self.parameters
            .iter()
            .map(|p| {
                let value = params
                    .get(&p.name)
                    .ok_or_else(|| TunerError::ParameterNotFound(p.name.clone()))?;
                p.encode(value)
            })
            .collect()
    }

    pub fn decode(&self, point: &[f64]) -> Result<TrialParams> {
        if point.len() != self.parameters.len() {
            return Err(TunerError::ShapeError {
                expected: format!("{} coordinates", self.parameters.len()),
                actual: point.len().to_string(),
            });
        }
        Ok(self
            .parameters
            .iter()
            .zip(point)
            .map(|(p, &u)| (p.name.clone(), p.decode(u)))
            .collect())
    }

    /// Number of distinct configurations, `None` when any parameter is continuous
    pub fn cardinality(&self) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |acc, p| p.n_values().map(|n| acc.saturating_mul(n)))
    }

    /// Every configuration of a fully discrete space, `None` otherwise
    pub fn enumerate(&self) -> Option<Vec<TrialParams>> {
        let mut grid = vec![TrialParams::new()];
        for param in &self.parameters {
            let values = param.values()?;
            grid = grid
                .into_iter()
                .flat_map(|partial| {
                    values.iter().map(move |v| {
                        let mut next = partial.clone();
                        next.insert(param.name.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        Some(grid)
    }
}

/// Sampled configuration, keyed by parameter name
pub type TrialParams = BTreeMap<String, ParameterValue>;

/// Canonical text form of a configuration, used to detect repeats
pub fn trial_key(params: &TrialParams) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Integer hyperparameter by name
pub fn param_int(params: &TrialParams, name: &str) -> Result<i64> {
    let value = params
        .get(name)
        .ok_or_else(|| TunerError::ParameterNotFound(name.to_string()))?;
    value.as_int().ok_or_else(|| TunerError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: "expected an integer".to_string(),
    })
}

/// Float hyperparameter by name
pub fn param_float(params: &TrialParams, name: &str) -> Result<f64> {
    let value = params
        .get(name)
        .ok_or_else(|| TunerError::ParameterNotFound(name.to_string()))?;
    value.as_float().ok_or_else(|| TunerError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: "expected a number".to_string(),
    })
}
