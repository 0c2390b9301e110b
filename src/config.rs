//! Pipeline configuration and on-disk workspace layout

use crate::error::{ChurnError, Result};
use crate::evaluation::{Evaluator, Metric};
use crate::optimizer::{seconds_to_duration, SamplerType, SearchBudget, SearchSpace, TunerConfig};
use crate::tracking::{RankingKey, DEFAULT_TIE_EPSILON};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything a search-and-promote cycle needs, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search_space: SearchSpace,
    pub budget: SearchBudget,
    /// 1 means a stratified holdout split instead of k-fold
    pub cv_folds: usize,
    pub ranking_metric: Metric,
    /// Required gain over the incumbent before promotion
    pub min_improvement_margin: f64,
    pub classification_threshold: f64,
    pub concurrency: usize,
    /// Per-trial wall clock limit; trials past it fail with reason `timeout`
    pub trial_timeout_secs: Option<f64>,
    pub tie_epsilon: f64,
    pub seed: u64,
    pub holdout_fraction: f64,
    pub sampler: SamplerType,
    /// Label column in CSV inputs
    pub target_column: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search_space: SearchSpace::new()
                .categorical("model", &["logistic_regression", "gradient_boosting"])
                .log_float("learning_rate", 0.01, 0.3)
                .int("n_estimators", 50, 200)
                .int("max_depth", 2, 6),
            budget: SearchBudget::trials(20),
            cv_folds: 1,
            ranking_metric: Metric::F1,
            min_improvement_margin: 0.0,
            classification_threshold: 0.5,
            concurrency: 1,
            trial_timeout_secs: None,
            tie_epsilon: DEFAULT_TIE_EPSILON,
            seed: 42,
            holdout_fraction: 0.2,
            sampler: SamplerType::Auto,
            target_column: "Churn".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ChurnError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn with_search_space(mut self, space: SearchSpace) -> Self {
        self.search_space = space;
        self
    }

    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cv_folds(mut self, k: usize) -> Self {
        self.cv_folds = k;
        self
    }

    pub fn with_ranking_metric(mut self, metric: Metric) -> Self {
        self.ranking_metric = metric;
        self
    }

    pub fn with_min_improvement_margin(mut self, margin: f64) -> Self {
        self.min_improvement_margin = margin;
        self
    }

    pub fn with_classification_threshold(mut self, threshold: f64) -> Self {
        self.classification_threshold = threshold;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_trial_timeout_secs(mut self, secs: f64) -> Self {
        self.trial_timeout_secs = Some(secs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerType) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.budget.validate()?;
        self.tuner_config().validate()?;
        crate::training::validate_search_space(&self.search_space)?;

        if !(self.min_improvement_margin >= 0.0 && self.min_improvement_margin.is_finite()) {
            return Err(ChurnError::ConfigError(format!(
                "min_improvement_margin must be >= 0, got {}",
                self.min_improvement_margin
            )));
        }
        if !(0.0..=1.0).contains(&self.classification_threshold) {
            return Err(ChurnError::ConfigError(format!(
                "classification_threshold must be in [0, 1], got {}",
                self.classification_threshold
            )));
        }
        if !(self.tie_epsilon >= 0.0 && self.tie_epsilon.is_finite()) {
            return Err(ChurnError::ConfigError(format!("tie_epsilon must be >= 0, got {}", self.tie_epsilon)));
        }
        if let Some(secs) = self.trial_timeout_secs {
            seconds_to_duration("trial_timeout_secs", secs)?;
        }
        if self.target_column.is_empty() {
            return Err(ChurnError::ConfigError("target_column must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn ranking(&self) -> RankingKey {
        RankingKey::new(self.ranking_metric).with_epsilon(self.tie_epsilon)
    }

    pub fn tuner_config(&self) -> TunerConfig {
        TunerConfig::new()
            .with_concurrency(self.concurrency)
            .with_cv_folds(self.cv_folds)
            .with_holdout_fraction(self.holdout_fraction)
            .with_sampler(self.sampler)
            .with_seed(self.seed)
            .with_ranking(self.ranking())
    }

    pub fn evaluator(&self) -> Result<Evaluator> {
        Evaluator::new(self.classification_threshold)
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Layout of a pipeline home directory
///
/// ```text
/// <home>/ledger.jsonl   experiment ledger
/// <home>/artifacts/     model artifacts, one file per run
/// <home>/active.json    active model pointer
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    home: PathBuf,
}

impl Workspace {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.home.join("ledger.jsonl")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.home.join("artifacts")
    }

    pub fn active_path(&self) -> PathBuf {
        self.home.join("active.json")
    }

    /// Create the home directory if needed
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.home)?;
        Ok(())
    }
}
