//! Trainer: fits one configuration and turns the outcome into a run

use super::artifact::ModelArtifact;
use super::config::HyperparameterConfig;
use super::cross_validation::CVSplit;
use super::models::{Deadline, FittedModel};
use crate::contract::{FeatureEncoder, FeatureMatrix, Labels};
use crate::error::{ChurnError, Result};
use crate::evaluation::{aggregate_folds, ensure_complete, Evaluator, Metrics};
use crate::optimizer::TrialParams;
use crate::tracking::{ArtifactRef, ArtifactStore, RunId, RunIdGenerator, TrainingRun};
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a trial's metrics are obtained
#[derive(Debug, Clone, Copy)]
pub enum Validation<'a> {
    /// Score on the training data itself
    InSample,
    /// Fit on the train side, score on the test side
    Holdout(&'a CVSplit),
    /// Mean over folds; the stored artifact is refit on all records
    KFold(&'a [CVSplit]),
}

/// Fits models and persists their artifacts
#[derive(Clone)]
pub struct Trainer {
    store: Arc<dyn ArtifactStore>,
    run_ids: Arc<RunIdGenerator>,
    evaluator: Evaluator,
    trial_timeout: Option<Duration>,
    seed: u64,
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("evaluator", &self.evaluator)
            .field("trial_timeout", &self.trial_timeout)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Trainer {
    pub fn new(store: Arc<dyn ArtifactStore>, run_ids: Arc<RunIdGenerator>) -> Self {
        Self {
            store,
            run_ids,
            evaluator: Evaluator::default(),
            trial_timeout: None,
            seed: 42,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Wall-clock limit per trial; expiry fails the trial with reason `timeout`
    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn run_ids(&self) -> &Arc<RunIdGenerator> {
        &self.run_ids
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Train one configuration on all records
    ///
    /// Configuration and shape problems are returned as errors before any
    /// fitting. Anything that goes wrong afterwards is reported through a
    /// failed run.
    pub fn train(&self, features: &FeatureMatrix, labels: &Labels, params: &TrialParams) -> Result<TrainingRun> {
        let config = HyperparameterConfig::from_params(params)?;
        check_aligned(features, labels)?;
        let run_id = self.run_ids.next_id();
        Ok(self.run_trial(run_id, None, features, labels, &config, Validation::InSample))
    }

    /// Fit the encoder and the estimator
    pub fn fit(
        &self,
        run_id: RunId,
        features: &FeatureMatrix,
        labels: &Labels,
        config: &HyperparameterConfig,
        deadline: &Deadline,
    ) -> Result<ModelArtifact> {
        check_aligned(features, labels)?;
        let start = Instant::now();

        let encoder = FeatureEncoder::fit(features)?;
        let x = encoder.transform_matrix(features)?;
        let y = labels.to_array();
        let model = FittedModel::fit(config, &x, &y, self.seed, deadline)?;
        let train_time_s = start.elapsed().as_secs_f64();

        debug!(
            run_id = %run_id,
            model = %config.family(),
            n_train = features.len(),
            n_inputs = encoder.n_outputs(),
            train_time_s,
            "Fitted model"
        );

        Ok(ModelArtifact {
            run_id,
            contract: features.contract().clone(),
            encoder,
            model,
            config: config.clone(),
            trained_at: Utc::now(),
            n_train: features.len(),
            train_time_s,
            threshold: self.evaluator.threshold(),
        })
    }

    /// Run a whole trial; the returned run is always terminal
    pub fn run_trial(
        &self,
        run_id: RunId,
        search_id: Option<&str>,
        features: &FeatureMatrix,
        labels: &Labels,
        config: &HyperparameterConfig,
        validation: Validation<'_>,
    ) -> TrainingRun {
        let mut run = TrainingRun::started(run_id, config.to_params());
        if let Some(search_id) = search_id {
            run = run.with_search_id(search_id);
        }

        let deadline = Deadline::from_timeout(self.trial_timeout);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.execute(run_id, features, labels, config, validation, &deadline)
        }));

        match outcome {
            Ok(Ok((artifact, metrics))) => {
                info!(
                    run_id = %run_id,
                    model = %config.family(),
                    f1 = metrics.get("f1").copied().unwrap_or_default(),
                    roc_auc = metrics.get("roc_auc").copied().unwrap_or_default(),
                    "Trial succeeded"
                );
                run.succeed(artifact, metrics)
            }
            Ok(Err(err)) => {
                let reason = failure_reason(&err);
                warn!(run_id = %run_id, model = %config.family(), reason = %reason, "Trial failed");
                run.fail(reason)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(run_id = %run_id, model = %config.family(), reason = %reason, "Trial panicked");
                run.fail(format!("panic: {}", reason))
            }
        }
    }

    fn execute(
        &self,
        run_id: RunId,
        features: &FeatureMatrix,
        labels: &Labels,
        config: &HyperparameterConfig,
        validation: Validation<'_>,
        deadline: &Deadline,
    ) -> Result<(ArtifactRef, Metrics)> {
        let (artifact, metrics) = match validation {
            Validation::InSample => {
                let artifact = self.fit(run_id, features, labels, config, deadline)?;
                let metrics = self.evaluator.evaluate(&artifact, features, labels)?;
                (artifact, metrics)
            }
            Validation::Holdout(split) => {
                let artifact = self.fit(
                    run_id,
                    &features.select(&split.train_indices),
                    &labels.select(&split.train_indices),
                    config,
                    deadline,
                )?;
                let metrics = self.evaluator.evaluate(
                    &artifact,
                    &features.select(&split.test_indices),
                    &labels.select(&split.test_indices),
                )?;
                (artifact, metrics)
            }
            Validation::KFold(splits) => {
                let mut folds = Vec::with_capacity(splits.len());
                for split in splits {
                    let fold_model = self.fit(
                        run_id,
                        &features.select(&split.train_indices),
                        &labels.select(&split.train_indices),
                        config,
                        deadline,
                    )?;
                    let fold_metrics = self.evaluator.evaluate(
                        &fold_model,
                        &features.select(&split.test_indices),
                        &labels.select(&split.test_indices),
                    )?;
                    debug!(run_id = %run_id, fold = split.fold_idx, "Scored fold");
                    folds.push(fold_metrics);
                }
                let metrics = aggregate_folds(&folds)?;
                let artifact = self.fit(run_id, features, labels, config, deadline)?;
                (artifact, metrics)
            }
        };
        ensure_complete(&metrics)?;

        let bytes = artifact.to_bytes()?;
        let reference = self.store.put(run_id, &bytes)?;
        Ok((reference, metrics))
    }
}

fn check_aligned(features: &FeatureMatrix, labels: &Labels) -> Result<()> {
    if features.len() != labels.len() {
        return Err(ChurnError::ShapeError {
            expected: format!("{} labels", features.len()),
            actual: format!("{} labels", labels.len()),
        });
    }
    Ok(())
}

fn failure_reason(err: &ChurnError) -> String {
    match err {
        ChurnError::TrainingFailure(reason) => reason.clone(),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
