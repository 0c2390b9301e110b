//! Search space definition for hyperparameters

use crate::error::{ChurnError, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Domain of a single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterType {
    /// Explicit finite set of candidate values
    Choice { values: Vec<ParameterValue> },
    /// Continuous range, uniform or log-uniform
    Float {
        low: f64,
        high: f64,
        #[serde(default)]
        log_scale: bool,
    },
    /// Integer range (inclusive), uniform or log-uniform
    Int {
        low: i64,
        high: i64,
        #[serde(default)]
        log_scale: bool,
    },
}

/// A single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub param_type: ParameterType,
}

impl Parameter {
    pub fn choice(name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Choice { values },
        }
    }

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

    pub fn int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Int {
                low,
                high,
                log_scale: false,
            },
        }
    }

    pub fn log_int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            param_type: ParameterType::Int {
                low,
                high,
                log_scale: true,
            },
        }
    }

    /// Sample a random value
    pub fn sample(&self, rng: &mut impl Rng) -> ParameterValue {
        match &self.param_type {
            ParameterType::Choice { values } => values[rng.gen_range(0..values.len())].clone(),
            ParameterType::Float { low, high, log_scale } => {
                let val = if *log_scale {
                    let (log_low, log_high) = (low.ln(), high.ln());
                    (rng.gen::<f64>() * (log_high - log_low) + log_low).exp()
                } else {
                    rng.gen::<f64>() * (high - low) + low
                };
                ParameterValue::Float(val.clamp(*low, *high))
            }
            ParameterType::Int { low, high, log_scale } => {
                let val = if *log_scale {
                    let log_low = (*low as f64).ln();
                    let log_high = (*high as f64 + 1.0).ln();
                    ((rng.gen::<f64>() * (log_high - log_low) + log_low).exp().floor() as i64)
                        .clamp(*low, *high)
                } else {
                    rng.gen_range(*low..=*high)
                };
                ParameterValue::Int(val)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(ChurnError::ConfigError(format!("parameter `{}`: {}", self.name, msg)));
        match &self.param_type {
            ParameterType::Choice { values } if values.is_empty() => bad("empty choice list".into()),
            ParameterType::Float { low, high, log_scale } => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    bad(format!("invalid range [{}, {}]", low, high))
                } else if *log_scale && *low <= 0.0 {
                    bad("log scale requires a positive lower bound".into())
                } else {
                    Ok(())
                }
            }
            ParameterType::Int { low, high, log_scale } => {
                if low > high {
                    bad(format!("invalid range [{}, {}]", low, high))
                } else if *log_scale && *low <= 0 {
                    bad("log scale requires a positive lower bound".into())
                } else {
                    Ok(())
                }
            }
            ParameterType::Choice { .. } => Ok(()),
        }
    }
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
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view; floats qualify only when they hold a whole number
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
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
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
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

/// One sampled configuration, keyed by parameter name
pub type TrialParams = BTreeMap<String, ParameterValue>;

/// Search space for hyperparameter optimization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn choice(self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.add(Parameter::choice(name, values))
    }

    /// Choice over string values
    pub fn categorical(self, name: impl Into<String>, choices: &[&str]) -> Self {
        let values = choices.iter().map(|c| ParameterValue::from(*c)).collect();
        self.add(Parameter::choice(name, values))
    }

    pub fn float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::float(name, low, high))
    }

    pub fn log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Parameter::log_float(name, low, high))
    }

    pub fn int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(Parameter::int(name, low, high))
    }

    pub fn log_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(Parameter::log_int(name, low, high))
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

    pub fn sample(&self, rng: &mut impl Rng) -> TrialParams {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }

    /// Whether every parameter is an explicit choice list
    pub fn is_discrete(&self) -> bool {
        self.parameters
            .iter()
            .all(|p| matches!(p.param_type, ParameterType::Choice { .. }))
    }

    /// Number of grid points, `None` when the space is not discrete
    pub fn grid_size(&self) -> Option<usize> {
        self.parameters.iter().try_fold(1usize, |acc, p| match &p.param_type {
            ParameterType::Choice { values } => acc.checked_mul(values.len()),
            _ => None,
        })
    }

    /// Cartesian product of all choice lists, last parameter varying fastest
    pub fn grid(&self) -> Option<Vec<TrialParams>> {
        let mut points = vec![TrialParams::new()];
        for param in &self.parameters {
            let ParameterType::Choice { values } = &param.param_type else {
                return None;
            };
            points = points
                .into_iter()
                .flat_map(|point| {
                    values.iter().map(move |v| {
                        let mut next = point.clone();
                        next.insert(param.name.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        Some(points)
    }

    /// Structural checks: non-empty, unique names, sane ranges
    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(ChurnError::ConfigError("search space is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(ChurnError::ConfigError(format!(
                    "parameter `{}` declared twice",
                    param.name
                )));
            }
            param.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_search_space_builder() {
        let space = SearchSpace::new()
            .log_float("learning_rate", 0.001, 0.1)
            .int("n_estimators", 10, 1000)
            .categorical("model", &["logistic_regression", "gradient_boosting"]);

        assert_eq!(space.len(), 3);
        assert!(!space.is_discrete());
        assert!(space.grid().is_none());
        assert!(space.validate().is_ok());
    }

    #[test]
    fn test_sampling_stays_in_bounds() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let space = SearchSpace::new()
            .log_float("lr", 0.0001, 0.1)
            .log_int("depth", 1, 8)
            .int("leaves", 2, 4);

        for _ in 0..200 {
            let params = space.sample(&mut rng);
            let lr = params["lr"].as_float().unwrap();
            let depth = params["depth"].as_int().unwrap();
            let leaves = params["leaves"].as_int().unwrap();
            assert!((0.0001..=0.1).contains(&lr));
            assert!((1..=8).contains(&depth));
            assert!((2..=4).contains(&leaves));
        }
    }

    #[test]
    fn test_grid_enumeration() {
        let space = SearchSpace::new()
            .choice("l2", vec![0.0.into(), 1.0.into()])
            .categorical("model", &["a", "b", "c"]);

        assert_eq!(space.grid_size(), Some(6));
        let grid = space.grid().unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0]["l2"], ParameterValue::Float(0.0));
        assert_eq!(grid[1]["model"], ParameterValue::from("b"));
    }

    #[test]
    fn test_invalid_spaces_rejected() {
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().float("a", 1.0, 0.0).validate().is_err());
        assert!(SearchSpace::new().log_float("a", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().choice("a", vec![]).validate().is_err());
        assert!(SearchSpace::new().int("a", 1, 2).int("a", 1, 2).validate().is_err());
    }

    #[test]
    fn test_space_from_json() {
        let json = r#"{"parameters": [
            {"name": "l2", "type": "choice", "values": [0.0, 5.0]},
            {"name": "max_iter", "type": "int", "low": 100, "high": 500},
            {"name": "learning_rate", "type": "float", "low": 0.01, "high": 1.0, "log_scale": true}
        ]}"#;
        let space: SearchSpace = serde_json::from_str(json).unwrap();
        assert_eq!(space.len(), 3);
        assert_eq!(
            space.get("l2").unwrap().param_type,
            ParameterType::Choice { values: vec![0.0.into(), 5.0.into()] }
        );
    }
}
