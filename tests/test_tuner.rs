//! Integration test: search scheduling, budgets and cancellation

mod common;

use churnflow::error::ChurnError;
use churnflow::optimizer::{SamplerType, SearchBudget, SearchSpace, Tuner, TunerConfig};
use churnflow::tracking::{ExperimentLedger, JsonlStorage, LedgerStorage, MemoryArtifactStore, RunStatus};
use churnflow::training::Trainer;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn tuner(config: TunerConfig) -> Tuner {
    let ledger = Arc::new(ExperimentLedger::in_memory());
    let trainer = Trainer::new(Arc::new(MemoryArtifactStore::new()), ledger.run_ids());
    Tuner::new(trainer, ledger, config).unwrap()
}

#[test]
fn test_cancel_after_three_of_five() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let ledger = Arc::new(ExperimentLedger::open(&path).unwrap());
    let trainer = Trainer::new(Arc::new(MemoryArtifactStore::new()), ledger.run_ids());
    let tuner = Tuner::new(trainer, Arc::clone(&ledger), TunerConfig::new().with_concurrency(1)).unwrap();

    let (features, labels) = common::dataset();
    let mut stream = tuner
        .search(&features, &labels, &common::l2_space(&[0.0, 5.0]), SearchBudget::trials(5))
        .unwrap();
    let handle = stream.cancel_handle();

    let mut completed = 0;
    for run in stream.by_ref() {
        run.unwrap();
        completed += 1;
        if completed == 3 {
            handle.cancel();
        }
    }
    let summary = stream.finish().unwrap();

    assert_eq!(completed, 3);
    assert!(summary.cancelled);
    assert_eq!(summary.trials_succeeded + summary.trials_failed, 3);
    assert_eq!(ledger.len(), 3);

    // every line on disk is a whole entry
    let on_disk = JsonlStorage::open(&path).unwrap().load().unwrap();
    assert_eq!(on_disk.len(), 3);
}

#[test]
fn test_concurrent_trials_get_unique_ids() {
    let tuner = tuner(TunerConfig::new().with_concurrency(4).with_sampler(SamplerType::Random));
    let (features, labels) = common::dataset();
    let space = SearchSpace::new()
        .categorical("model", &["logistic_regression"])
        .float("l2", 0.0, 2.0);

    let runs: Vec<_> = tuner
        .search(&features, &labels, &space, SearchBudget::trials(12))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(runs.len(), 12);
    let ids: HashSet<_> = runs.iter().map(|r| r.run_id).collect();
    assert_eq!(ids.len(), 12);
    assert_eq!(tuner.ledger().len(), 12);
    assert_eq!(tuner.ledger().count(RunStatus::Succeeded), 12);
}

#[test]
fn test_cross_validation_reports_fold_variance() {
    let tuner = tuner(TunerConfig::new().with_cv_folds(3));
    let (features, labels) = common::dataset();

    let runs: Vec<_> = tuner
        .search(&features, &labels, &common::l2_space(&[0.0]), SearchBudget::trials(1))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    let run = &runs[0];
    assert!(run.is_succeeded());
    for metric in ["f1", "precision", "recall", "roc_auc"] {
        let var = run.metric(&format!("{}_var", metric)).unwrap();
        assert!(var >= 0.0, "{metric}_var = {var}");
    }
    assert!(run.metric("train_time_s_var").is_none());
    assert!(run.metric("f1").unwrap() > 0.5);
}

#[test]
fn test_time_budget_stops_scheduling() {
    let tuner = tuner(TunerConfig::new().with_sampler(SamplerType::Random));
    let (features, labels) = common::dataset();
    let space = SearchSpace::new()
        .categorical("model", &["gradient_boosting"])
        .int("n_estimators", 5, 10);

    let mut stream = tuner
        .search(&features, &labels, &space, SearchBudget::seconds(0.3))
        .unwrap();
    let count = stream.by_ref().count();
    let summary = stream.finish().unwrap();

    assert!(count >= 1);
    assert!(!summary.cancelled);
    assert_eq!(tuner.ledger().len(), count);
}

#[test]
fn test_zero_timeout_fails_every_trial() {
    let ledger = Arc::new(ExperimentLedger::in_memory());
    let trainer = Trainer::new(Arc::new(MemoryArtifactStore::new()), ledger.run_ids())
        .with_trial_timeout(Duration::ZERO);
    let tuner = Tuner::new(trainer, Arc::clone(&ledger), TunerConfig::new().with_concurrency(2)).unwrap();
    let (features, labels) = common::dataset();

    let mut stream = tuner
        .search(&features, &labels, &common::l2_space(&[0.0, 5.0]), SearchBudget::trials(3))
        .unwrap();
    let runs: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
    let summary = stream.finish().unwrap();

    assert_eq!(runs.len(), 3);
    assert_eq!(summary.trials_failed, 3);
    assert!(runs.iter().all(|r| r.failure_reason.as_deref() == Some("timeout")));
    assert!(matches!(ledger.best(&Default::default()), Err(ChurnError::NoSuccessfulRunError)));
}

#[test]
fn test_timeout_fails_only_the_slow_trial() {
    let ledger = Arc::new(ExperimentLedger::in_memory());
    let trainer = Trainer::new(Arc::new(MemoryArtifactStore::new()), ledger.run_ids())
        .with_trial_timeout(Duration::from_millis(300));
    let config = TunerConfig::new().with_concurrency(2).with_sampler(SamplerType::Grid);
    let tuner = Tuner::new(trainer, Arc::clone(&ledger), config).unwrap();
    let (features, labels) = common::dataset();

    // a cheap family next to a boosting setup far beyond the deadline
    let space = SearchSpace::new()
        .categorical("model", &["logistic_regression", "gradient_boosting"])
        .choice("n_estimators", vec![5000i64.into()])
        .choice("max_depth", vec![16i64.into()]);

    let mut stream = tuner
        .search(&features, &labels, &space, SearchBudget::trials(4))
        .unwrap();
    let runs: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
    let summary = stream.finish().unwrap();

    assert_eq!(runs.len(), 4);
    assert_eq!(summary.trials_succeeded, 2);
    assert_eq!(summary.trials_failed, 2);
    for run in &runs {
        let model = run.config["model"].as_str();
        if run.is_succeeded() {
            assert_eq!(model, Some("logistic_regression"));
        } else {
            assert_eq!(model, Some("gradient_boosting"));
            assert_eq!(run.failure_reason.as_deref(), Some("timeout"));
        }
    }

    assert_eq!(ledger.count(RunStatus::Succeeded), 2);
    assert_eq!(ledger.count(RunStatus::Failed), 2);
    let best = ledger.best(&Default::default()).unwrap();
    assert!(best.is_succeeded());
    assert_eq!(best.config["model"].as_str(), Some("logistic_regression"));
}

#[test]
fn test_budget_without_limits_is_rejected() {
    let tuner = tuner(TunerConfig::new());
    let (features, labels) = common::dataset();
    let err = tuner
        .search(&features, &labels, &common::l2_space(&[0.0]), SearchBudget::default())
        .err()
        .unwrap();
    assert!(matches!(err, ChurnError::ConfigError(_)));
    assert!(tuner.ledger().is_empty());
}
