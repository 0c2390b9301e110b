//! Hyperparameter configuration records
//!
//! Trials carry loose `name -> value` maps; they are turned into tagged
//! per-family records here, against a declared schema, before any fitting.

use crate::error::{ChurnError, Result};
use crate::optimizer::{ParameterType, ParameterValue, SearchSpace, TrialParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key selecting the model family
pub const MODEL_KEY: &str = "model";

/// Supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    LogisticRegression,
    GradientBoosting,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::LogisticRegression, ModelFamily::GradientBoosting];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "logistic_regression",
            ModelFamily::GradientBoosting => "gradient_boosting",
        }
    }

    /// Declared hyperparameters of the family
    pub fn schema(&self) -> &'static [ParamSchema] {
        match self {
            ModelFamily::LogisticRegression => LOGISTIC_SCHEMA,
            ModelFamily::GradientBoosting => BOOSTING_SCHEMA,
        }
    }

    fn param(&self, name: &str) -> Option<&'static ParamSchema> {
        self.schema().iter().find(|p| p.name == name)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        ModelFamily::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ChurnError::ConfigError(format!("unknown model family `{}`", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
}

/// Type and bounds of one hyperparameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSchema {
    pub name: &'static str,
    pub kind: ParamKind,
    pub min: f64,
    pub max: f64,
    /// Whether `min` itself is excluded
    pub min_exclusive: bool,
}

impl ParamSchema {
    const fn float(name: &'static str, min: f64, max: f64, min_exclusive: bool) -> Self {
        Self { name, kind: ParamKind::Float, min, max, min_exclusive }
    }

    const fn int(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, kind: ParamKind::Int, min, max, min_exclusive: false }
    }

    fn in_range(&self, v: f64) -> bool {
        let above = if self.min_exclusive { v > self.min } else { v >= self.min };
        above && v <= self.max
    }

    /// Check a value against type and bounds
    pub fn check(&self, value: &ParameterValue) -> Result<f64> {
        let v = match self.kind {
            ParamKind::Float => value.as_float(),
            ParamKind::Int => value.as_int().map(|v| v as f64),
        }
        .ok_or_else(|| {
            ChurnError::ConfigError(format!(
                "`{}` expects {}, got `{}`",
                self.name,
                if self.kind == ParamKind::Int { "an integer" } else { "a number" },
                value
            ))
        })?;

        if !v.is_finite() || !self.in_range(v) {
            return Err(ChurnError::ConfigError(format!(
                "`{}` = {} is outside {}{}, {}]",
                self.name,
                v,
                if self.min_exclusive { "(" } else { "[" },
                self.min,
                self.max
            )));
        }
        Ok(v)
    }
}

const LOGISTIC_SCHEMA: &[ParamSchema] = &[
    ParamSchema::float("learning_rate", 0.0, 10.0, true),
    ParamSchema::float("l2", 0.0, 1000.0, false),
    ParamSchema::int("max_iter", 1.0, 100_000.0),
    ParamSchema::float("tol", 0.0, 1.0, false),
];

const BOOSTING_SCHEMA: &[ParamSchema] = &[
    ParamSchema::int("n_estimators", 1.0, 5000.0),
    ParamSchema::float("learning_rate", 0.0, 1.0, true),
    ParamSchema::int("max_depth", 1.0, 16.0),
    ParamSchema::int("min_samples_leaf", 1.0, 10_000.0),
    ParamSchema::float("subsample", 0.0, 1.0, true),
];

/// Logistic regression fitted by batch gradient descent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub learning_rate: f64,
    /// L2 penalty strength
    pub l2: f64,
    pub max_iter: usize,
    /// Stop once the gradient norm falls below this
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            l2: 0.0,
            max_iter: 1000,
            tol: 1e-6,
        }
    }
}

/// Gradient boosted regression trees on the log-odds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Row fraction sampled per tree
    pub subsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_leaf: 1,
            subsample: 1.0,
        }
    }
}

/// Validated, family-tagged hyperparameter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum HyperparameterConfig {
    LogisticRegression(LogisticParams),
    GradientBoosting(BoostingParams),
}

impl Default for HyperparameterConfig {
    fn default() -> Self {
        HyperparameterConfig::GradientBoosting(BoostingParams::default())
    }
}

impl HyperparameterConfig {
    pub fn family(&self) -> ModelFamily {
        match self {
            HyperparameterConfig::LogisticRegression(_) => ModelFamily::LogisticRegression,
            HyperparameterConfig::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }

    fn family_of(params: &TrialParams) -> Result<ModelFamily> {
        match params.get(MODEL_KEY) {
            None => Ok(HyperparameterConfig::default().family()),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ChurnError::ConfigError(format!("`{}` must be a string, got `{}`", MODEL_KEY, value)))?
                .parse(),
        }
    }

    /// Strict conversion: unknown keys and out-of-range values are errors
    pub fn from_params(params: &TrialParams) -> Result<Self> {
        let family = Self::family_of(params)?;
        let mut config = match family {
            ModelFamily::LogisticRegression => HyperparameterConfig::LogisticRegression(LogisticParams::default()),
            ModelFamily::GradientBoosting => HyperparameterConfig::GradientBoosting(BoostingParams::default()),
        };

        for (name, value) in params {
            if name == MODEL_KEY {
                continue;
            }
            let schema = family.param(name).ok_or_else(|| {
                ChurnError::ConfigError(format!("unknown hyperparameter `{}` for {}", name, family))
            })?;
            let v = schema.check(value)?;
            config.set(name, v);
        }
        Ok(config)
    }

    /// Keep only the keys that apply to the family selected by `params`
    ///
    /// Lets one search space mix hyperparameters of several families.
    /// Keys unknown to every family are kept so that conversion rejects them.
    pub fn applicable(params: &TrialParams) -> TrialParams {
        let Ok(family) = Self::family_of(params) else {
            return params.clone();
        };
        params
            .iter()
            .filter(|(name, _)| {
                name.as_str() == MODEL_KEY
                    || family.param(name).is_some()
                    || !ModelFamily::ALL.iter().any(|f| f.param(name).is_some())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn set(&mut self, name: &str, v: f64) {
        match self {
            HyperparameterConfig::LogisticRegression(p) => match name {
                "learning_rate" => p.learning_rate = v,
                "l2" => p.l2 = v,
                "max_iter" => p.max_iter = v as usize,
                "tol" => p.tol = v,
                _ => {}
            },
            HyperparameterConfig::GradientBoosting(p) => match name {
                "n_estimators" => p.n_estimators = v as usize,
                "learning_rate" => p.learning_rate = v,
                "max_depth" => p.max_depth = v as usize,
                "min_samples_leaf" => p.min_samples_leaf = v as usize,
                "subsample" => p.subsample = v,
                _ => {}
            },
        }
    }

    /// Fully resolved parameters, including the `model` key
    pub fn to_params(&self) -> TrialParams {
        let mut out = TrialParams::new();
        out.insert(MODEL_KEY.to_string(), ParameterValue::from(self.family().as_str()));
        match self {
            HyperparameterConfig::LogisticRegression(p) => {
                out.insert("learning_rate".into(), p.learning_rate.into());
                out.insert("l2".into(), p.l2.into());
                out.insert("max_iter".into(), (p.max_iter as i64).into());
                out.insert("tol".into(), p.tol.into());
            }
            HyperparameterConfig::GradientBoosting(p) => {
                out.insert("n_estimators".into(), (p.n_estimators as i64).into());
                out.insert("learning_rate".into(), p.learning_rate.into());
                out.insert("max_depth".into(), (p.max_depth as i64).into());
                out.insert("min_samples_leaf".into(), (p.min_samples_leaf as i64).into());
                out.insert("subsample".into(), p.subsample.into());
            }
        }
        out
    }

    /// Re-check bounds of a directly constructed config
    pub fn validate(&self) -> Result<()> {
        Self::from_params(&self.to_params()).map(|_| ())
    }
}

/// Reject a search space that could produce invalid configurations
pub fn validate_search_space(space: &SearchSpace) -> Result<()> {
    space.validate()?;

    let families: Vec<ModelFamily> = match space.get(MODEL_KEY).map(|p| &p.param_type) {
        None => vec![HyperparameterConfig::default().family()],
        Some(ParameterType::Choice { values }) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| ChurnError::ConfigError(format!("`{}` choices must be strings", MODEL_KEY)))?
                    .parse()
            })
            .collect::<Result<_>>()?,
        Some(_) => {
            return Err(ChurnError::ConfigError(format!("`{}` must be a choice of families", MODEL_KEY)))
        }
    };

    for param in space.parameters().iter().filter(|p| p.name != MODEL_KEY) {
        let schemas: Vec<&ParamSchema> = families.iter().filter_map(|f| f.param(&param.name)).collect();
        if schemas.is_empty() {
            return Err(ChurnError::ConfigError(format!(
                "unknown hyperparameter `{}` for {}",
                param.name,
                families.iter().map(|f| f.as_str()).collect::<Vec<_>>().join("/")
            )));
        }
        for schema in schemas {
            match &param.param_type {
                ParameterType::Choice { values } => {
                    for v in values {
                        schema.check(v)?;
                    }
                }
                ParameterType::Float { low, high, .. } => {
                    if schema.kind == ParamKind::Int {
                        return Err(ChurnError::ConfigError(format!(
                            "`{}` is an integer hyperparameter, declare an int range",
                            param.name
                        )));
                    }
                    schema.check(&ParameterValue::Float(*low))?;
                    schema.check(&ParameterValue::Float(*high))?;
                }
                ParameterType::Int { low, high, .. } => {
                    schema.check(&ParameterValue::Int(*low))?;
                    schema.check(&ParameterValue::Int(*high))?;
                }
            }
        }
    }
    Ok(())
}
