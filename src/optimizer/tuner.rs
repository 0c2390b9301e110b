//! Tuner: schedules trials over a search space on a bounded worker pool
//!
//! Each trial samples a configuration, trains and scores it, and appends
//! the terminal run to the ledger. Results stream back in completion order
//! through [`TrialStream`]; dropping or cancelling the stream stops new
//! trials from being scheduled while in-flight ones run to completion.

use super::config::{SearchBudget, TunerConfig};
use super::samplers::{create_sampler, Sampler};
use super::search_space::{SearchSpace, TrialParams};
use crate::contract::{FeatureMatrix, Labels};
use crate::error::{ChurnError, Result};
use crate::tracking::{ExperimentLedger, RankingKey, RunId, TrainingRun};
use crate::training::{validate_search_space, CVSplit, CrossValidator, HyperparameterConfig, Trainer, Validation};
use crate::validation::{gate, DataValidator};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Drives a search strategy over the trainer
pub struct Tuner {
    trainer: Trainer,
    ledger: Arc<ExperimentLedger>,
    pool: Arc<ThreadPool>,
    validator: Option<Arc<dyn DataValidator>>,
    config: TunerConfig,
}

impl Tuner {
    pub fn new(trainer: Trainer, ledger: Arc<ExperimentLedger>, config: TunerConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .thread_name(|i| format!("churnflow-trial-{}", i))
            .build()
            .map_err(|e| ChurnError::ConfigError(format!("cannot build trial pool: {}", e)))?;

        Ok(Self {
            trainer,
            ledger,
            pool: Arc::new(pool),
            validator: None,
            config,
        })
    }

    /// Gate every search on this validator
    pub fn with_validator(mut self, validator: Arc<dyn DataValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ExperimentLedger> {
        &self.ledger
    }

    /// Start a search; trials are scheduled lazily as the stream is polled
    ///
    /// Invalid data, search spaces and budgets are refused here, before any
    /// trial runs.
    pub fn search(
        &self,
        features: &FeatureMatrix,
        labels: &Labels,
        space: &SearchSpace,
        budget: SearchBudget,
    ) -> Result<TrialStream> {
        budget.validate()?;
        validate_search_space(space)?;
        if features.len() != labels.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} labels", features.len()),
                actual: format!("{} labels", labels.len()),
            });
        }
        if let Some(validator) = &self.validator {
            gate(validator.as_ref(), features)?;
        }

        let splitter = CrossValidator::new().with_random_state(self.config.seed);
        let plan = if self.config.cv_folds > 1 {
            SplitPlan::KFold(splitter.k_fold(labels, self.config.cv_folds)?)
        } else {
            SplitPlan::Holdout(splitter.holdout(labels, self.config.holdout_fraction)?)
        };
        let sampler = create_sampler(self.config.sampler, space, self.config.seed)?;

        let search_id = Uuid::new_v4().to_string();
        info!(
            search_id = %search_id,
            sampler = sampler.name(),
            max_trials = ?budget.max_trials,
            max_seconds = ?budget.max_seconds,
            concurrency = self.config.concurrency,
            cv_folds = self.config.cv_folds,
            "Starting search"
        );

        let (tx, rx) = channel();
        Ok(TrialStream {
            shared: Arc::new(TrialContext {
                trainer: self.trainer.clone(),
                ledger: Arc::clone(&self.ledger),
                features: features.clone(),
                labels: labels.clone(),
                plan,
                search_id,
            }),
            pool: Arc::clone(&self.pool),
            sampler,
            space: space.clone(),
            budget,
            concurrency: self.config.concurrency,
            ranking: self.config.ranking,
            cancel: CancelHandle::default(),
            started: Instant::now(),
            scheduled: 0,
            in_flight: 0,
            tx,
            rx,
            history: Vec::new(),
            succeeded: 0,
            failed: 0,
            best: None,
        })
    }
}

enum SplitPlan {
    Holdout(CVSplit),
    KFold(Vec<CVSplit>),
}

impl SplitPlan {
    fn validation(&self) -> Validation<'_> {
        match self {
            SplitPlan::Holdout(split) => Validation::Holdout(split),
            SplitPlan::KFold(splits) => Validation::KFold(splits),
        }
    }
}

/// Read-only state shared by the trials of one search
struct TrialContext {
    trainer: Trainer,
    ledger: Arc<ExperimentLedger>,
    features: FeatureMatrix,
    labels: Labels,
    plan: SplitPlan,
    search_id: String,
}

impl TrialContext {
    fn run(&self, run_id: RunId, sampled: &TrialParams) -> TrainingRun {
        let params = HyperparameterConfig::applicable(sampled);
        match HyperparameterConfig::from_params(&params) {
            Ok(config) => self.trainer.run_trial(
                run_id,
                Some(&self.search_id),
                &self.features,
                &self.labels,
                &config,
                self.plan.validation(),
            ),
            Err(err) => TrainingRun::started(run_id, params)
                .with_search_id(self.search_id.as_str())
                .fail(err.to_string()),
        }
    }
}

struct TrialOutcome {
    sampled: TrialParams,
    run: TrainingRun,
    recorded: Result<()>,
}

/// Stops a running search from scheduling further trials
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome counts of a finished search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub search_id: String,
    pub trials_succeeded: usize,
    pub trials_failed: usize,
    pub best_run_id: Option<RunId>,
    /// Ranking metric of the best run
    pub best_score: Option<f64>,
    pub metric: String,
    pub elapsed_secs: f64,
    pub cancelled: bool,
}

/// Lazy sequence of terminal runs in completion order
///
/// An `Err` item means the ledger refused a run; no further trials are
/// scheduled after that.
pub struct TrialStream {
    shared: Arc<TrialContext>,
    pool: Arc<ThreadPool>,
    sampler: Box<dyn Sampler>,
    space: SearchSpace,
    budget: SearchBudget,
    concurrency: usize,
    ranking: RankingKey,
    cancel: CancelHandle,
    started: Instant,
    scheduled: usize,
    in_flight: usize,
    tx: Sender<TrialOutcome>,
    rx: Receiver<TrialOutcome>,
    history: Vec<(TrialParams, f64)>,
    succeeded: usize,
    failed: usize,
    best: Option<TrainingRun>,
}

impl TrialStream {
    pub fn search_id(&self) -> &str {
        &self.shared.search_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop scheduling; trials already running still complete
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn budget_left(&self) -> bool {
        let trials_left = self.budget.max_trials.map_or(true, |n| self.scheduled < n);
        let time_left = self
            .budget
            .time_limit()
            .map_or(true, |limit| self.started.elapsed() < limit);
        trials_left && time_left
    }

    fn schedule(&mut self) {
        while !self.cancel.is_cancelled() && self.in_flight < self.concurrency && self.budget_left() {
            let sampled = self.sampler.sample(&self.space, &self.history);
            let run_id = self.shared.ledger.run_ids().next_id();
            self.scheduled += 1;
            self.in_flight += 1;

            let shared = Arc::clone(&self.shared);
            let tx = self.tx.clone();
            self.pool.spawn(move || {
                let run = shared.run(run_id, &sampled);
                let recorded = shared.ledger.append(run.clone());
                // receiver gone means the caller stopped listening
                let _ = tx.send(TrialOutcome { sampled, run, recorded });
            });
        }
    }

    fn record(&mut self, outcome: TrialOutcome) -> Result<TrainingRun> {
        let TrialOutcome { sampled, run, recorded } = outcome;
        if let Err(err) = recorded {
            error!(run_id = %run.run_id, error = %err, "Ledger refused run, stopping search");
            self.cancel.cancel();
            return Err(err);
        }

        if run.is_succeeded() {
            self.succeeded += 1;
            if let Some(score) = self.ranking.score(&run) {
                self.history.push((sampled, score));
            }
            let better = match &self.best {
                Some(best) => self.ranking.compare(&run, best).is_gt(),
                None => true,
            };
            if better {
                self.best = Some(run.clone());
            }
        } else {
            self.failed += 1;
        }
        Ok(run)
    }

    /// Drain in-flight trials without scheduling new ones and summarize
    pub fn finish(mut self) -> Result<SearchSummary> {
        let cancelled = self.cancel.is_cancelled();
        self.cancel.cancel();
        let mut first_err = None;
        while let Some(item) = self.next() {
            if let Err(err) = item {
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let summary = self.build_summary(cancelled);
        info!(
            search_id = %summary.search_id,
            succeeded = summary.trials_succeeded,
            failed = summary.trials_failed,
            best_run_id = ?summary.best_run_id,
            best_score = ?summary.best_score,
            elapsed_secs = summary.elapsed_secs,
            "Search finished"
        );
        Ok(summary)
    }

    /// Counts so far
    pub fn summary(&self) -> SearchSummary {
        self.build_summary(self.cancel.is_cancelled())
    }

    fn build_summary(&self, cancelled: bool) -> SearchSummary {
        SearchSummary {
            search_id: self.shared.search_id.clone(),
            trials_succeeded: self.succeeded,
            trials_failed: self.failed,
            best_run_id: self.best.as_ref().map(|r| r.run_id),
            best_score: self.best.as_ref().and_then(|r| r.metric(self.ranking.metric.as_str())),
            metric: self.ranking.metric.as_str().to_string(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            cancelled,
        }
    }
}

impl Iterator for TrialStream {
    type Item = Result<TrainingRun>;

    fn next(&mut self) -> Option<Self::Item> {
        self.schedule();
        if self.in_flight == 0 {
            return None;
        }
        let outcome = self.rx.recv().ok()?;
        self.in_flight -= 1;
        Some(self.record(outcome))
    }
}
