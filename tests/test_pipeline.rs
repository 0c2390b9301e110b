//! Integration test: search → ledger → promote → serve

mod common;

use churnflow::error::ChurnError;
use churnflow::evaluation::{quality_only, Metric};
use churnflow::inference::{ChurnLabel, InferenceService, PredictionRequest, ServiceState};
use churnflow::optimizer::{ParameterValue, SearchBudget, TrialParams, Tuner, TunerConfig};
use churnflow::registry::{ModelPointer, Promoter};
use churnflow::tracking::{ExperimentLedger, FsArtifactStore, RankingKey, RunStatus};
use churnflow::training::Trainer;
use churnflow::Workspace;
use std::sync::Arc;

#[test]
fn test_search_promote_and_serve() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path());
    let ledger = Arc::new(ExperimentLedger::open(workspace.ledger_path()).unwrap());
    let store = Arc::new(FsArtifactStore::new(workspace.artifacts_dir()).unwrap());

    let trainer = Trainer::new(store.clone(), ledger.run_ids());
    let tuner = Tuner::new(trainer, Arc::clone(&ledger), TunerConfig::new().with_concurrency(2)).unwrap();

    let (features, labels) = common::dataset();
    let mut stream = tuner
        .search(&features, &labels, &common::l2_space(&[0.0, 5.0]), SearchBudget::trials(5))
        .unwrap();
    let runs: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
    let summary = stream.finish().unwrap();

    assert_eq!(runs.len(), 5);
    assert_eq!(ledger.len(), 5);
    assert_eq!(summary.trials_succeeded, 5);
    assert!(runs.iter().all(|r| r.status == RunStatus::Succeeded));

    // the unpenalized model wins on f1
    let ranking = RankingKey::new(Metric::F1);
    let best = ledger.best(&ranking).unwrap();
    assert_eq!(best.config.get("l2").and_then(ParameterValue::as_float), Some(0.0));
    assert_eq!(summary.best_run_id.map(|id| ledger.get(id).unwrap().config["l2"].clone()), Some(0.0.into()));
    let penalized_f1 = runs
        .iter()
        .filter(|r| r.config["l2"].as_float() == Some(5.0))
        .map(|r| r.metric("f1").unwrap())
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(best.metric("f1").unwrap() > penalized_f1);

    let pointer = Arc::new(ModelPointer::open(workspace.active_path()).unwrap());
    let promoter = Promoter::new(Arc::clone(&pointer), store.clone()).with_ranking(ranking);
    let outcome = promoter.promote(&ledger).unwrap();
    assert!(outcome.is_promoted());
    assert_eq!(outcome.active().run_id, best.run_id);
    assert_eq!(pointer.version(), 1);

    let service = InferenceService::new(pointer, store);
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Serving);

    let churner = service.predict_one(&common::record(3.0, "Month-to-month", Some(75.0))).unwrap();
    assert_eq!(churner.prediction, ChurnLabel::Churn);
    assert!(churner.probability > 0.5);
    assert_eq!(churner.model_version, 1);

    let loyal = service.predict_one(&common::record(64.0, "Two year", Some(30.0))).unwrap();
    assert_eq!(loyal.prediction, ChurnLabel::NoChurn);
    assert!(loyal.probability < 0.5);
}

#[test]
fn test_validation_error_keeps_serving() {
    let ledger = ExperimentLedger::in_memory();
    let store = Arc::new(churnflow::tracking::MemoryArtifactStore::new());
    let trainer = Trainer::new(store.clone(), ledger.run_ids());

    let (features, labels) = common::dataset();
    let mut params = TrialParams::new();
    params.insert("model".into(), "logistic_regression".into());
    let run = trainer.train(&features, &labels, &params).unwrap();
    assert!(run.is_succeeded());
    ledger.append(run).unwrap();

    let pointer = Arc::new(ModelPointer::in_memory());
    Promoter::new(Arc::clone(&pointer), store.clone()).promote(&ledger).unwrap();
    let service = InferenceService::new(pointer, store);
    service.start().unwrap();

    let mut missing = common::record(5.0, "One year", None);
    missing.remove("tenure");
    let err = service.predict(&PredictionRequest::Single(missing)).unwrap_err();
    assert!(matches!(err, ChurnError::ValidationError(ref v) if v.iter().any(|v| v.field == "tenure")));

    let wrong_type = common::record(5.0, "Three year", Some(10.0));
    let err = service
        .predict(&PredictionRequest::Batch(vec![common::record(5.0, "One year", None), wrong_type]))
        .unwrap_err();
    assert!(matches!(err, ChurnError::ValidationError(ref v) if v[0].field.starts_with("records[1].")));

    assert_eq!(service.state(), ServiceState::Serving);
    assert!(service.predict_one(&common::record(50.0, "Two year", Some(40.0))).is_ok());
    let stats = service.stats();
    assert_eq!(stats.validation_errors, 2);
    assert_eq!(stats.total_predictions, 1);
}

#[test]
fn test_evaluation_is_deterministic() {
    let ledger = ExperimentLedger::in_memory();
    let trainer = Trainer::new(Arc::new(churnflow::tracking::MemoryArtifactStore::new()), ledger.run_ids());
    let (features, labels) = common::dataset();

    let mut params = TrialParams::new();
    params.insert("model".into(), "gradient_boosting".into());
    params.insert("n_estimators".into(), 20i64.into());
    params.insert("max_depth".into(), 3i64.into());

    let a = trainer.train(&features, &labels, &params).unwrap();
    let b = trainer.train(&features, &labels, &params).unwrap();
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(quality_only(&a.metrics), quality_only(&b.metrics));
}

#[test]
fn test_bad_config_rejected_before_any_run() {
    let ledger = ExperimentLedger::in_memory();
    let trainer = Trainer::new(Arc::new(churnflow::tracking::MemoryArtifactStore::new()), ledger.run_ids());
    let (features, labels) = common::dataset();

    let mut params = TrialParams::new();
    params.insert("model".into(), "gradient_boosting".into());
    params.insert("learning_rate".into(), (-0.5).into());
    assert!(matches!(
        trainer.train(&features, &labels, &params),
        Err(ChurnError::ConfigError(_))
    ));

    params.insert("model".into(), "svm".into());
    assert!(trainer.train(&features, &labels, &params).is_err());
    assert!(ledger.is_empty());
}

#[test]
fn test_promotion_without_runs() {
    let ledger = ExperimentLedger::in_memory();
    let promoter = Promoter::new(
        Arc::new(ModelPointer::in_memory()),
        Arc::new(churnflow::tracking::MemoryArtifactStore::new()),
    );
    assert!(matches!(promoter.promote(&ledger), Err(ChurnError::NoSuccessfulRunError)));
    assert!(promoter.pointer().current().is_none());
}
