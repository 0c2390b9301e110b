//! Search configuration

use super::SamplerType;
use crate::error::{ChurnError, Result};
use crate::tracking::RankingKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When to stop scheduling new trials; whichever limit is hit first wins
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchBudget {
    /// Maximum number of trials to start
    pub max_trials: Option<usize>,
    /// Maximum wall-clock seconds before scheduling stops
    pub max_seconds: Option<f64>,
}

impl SearchBudget {
    pub fn trials(n: usize) -> Self {
        Self {
            max_trials: Some(n),
            max_seconds: None,
        }
    }

    pub fn seconds(secs: f64) -> Self {
        Self {
            max_trials: None,
            max_seconds: Some(secs),
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = Some(n);
        self
    }

    pub fn with_max_seconds(mut self, secs: f64) -> Self {
        self.max_seconds = Some(secs);
        self
    }

    /// Wall-clock limit; `None` also for values `validate` rejects
    pub fn time_limit(&self) -> Option<Duration> {
        self.max_seconds.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_trials.is_none() && self.max_seconds.is_none() {
            return Err(ChurnError::ConfigError(
                "search budget needs max_trials or max_seconds".to_string(),
            ));
        }
        if self.max_trials == Some(0) {
            return Err(ChurnError::ConfigError("max_trials must be at least 1".to_string()));
        }
        if let Some(secs) = self.max_seconds {
            seconds_to_duration("max_seconds", secs)?;
        }
        Ok(())
    }
}

/// Positive, representable number of seconds as a [`Duration`]
pub(crate) fn seconds_to_duration(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ChurnError::ConfigError(format!("{} must be positive, got {}", name, secs)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ChurnError::ConfigError(format!("{} is out of range: {}", name, secs)))
}

/// Tuner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Trials run in parallel
    pub concurrency: usize,
    /// Stratified folds per trial; 1 means a single holdout split
    pub cv_folds: usize,
    /// Holdout share when `cv_folds == 1`
    pub holdout_fraction: f64,
    pub sampler: SamplerType,
    /// Seeds the sampler and the splits
    pub seed: u64,
    pub ranking: RankingKey,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cv_folds: 1,
            holdout_fraction: 0.2,
            sampler: SamplerType::Auto,
            seed: 42,
            ranking: RankingKey::default(),
        }
    }
}

impl TunerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_cv_folds(mut self, k: usize) -> Self {
        self.cv_folds = k;
        self
    }

    pub fn with_holdout_fraction(mut self, fraction: f64) -> Self {
        self.holdout_fraction = fraction;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerType) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingKey) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ChurnError::ConfigError("concurrency must be at least 1".to_string()));
        }
        if self.cv_folds == 0 {
            return Err(ChurnError::ConfigError("cv_folds must be at least 1".to_string()));
        }
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return Err(ChurnError::ConfigError(format!(
                "holdout_fraction must be in (0, 1), got {}",
                self.holdout_fraction
            )));
        }
        Ok(())
    }
}
