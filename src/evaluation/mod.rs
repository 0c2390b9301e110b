//! Model evaluation with the fixed metric suite
//!
//! Every succeeded run carries all six suite metrics. Quality metrics are
//! computed from probability scores, so classifiers that only emit hard
//! labels are rejected up front.

mod metrics;

pub use metrics::{roc_auc, ConfusionCounts};

use crate::contract::{FeatureMatrix, Labels};
use crate::error::{ChurnError, Result};
use crate::training::Classifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

/// Metric name to value
pub type Metrics = BTreeMap<String, f64>;

/// Metrics of the fixed suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    F1,
    Precision,
    Recall,
    RocAuc,
    TrainTimeS,
    PredictTimeS,
}

/// The metric suite, in reporting order
pub const METRIC_SUITE: [Metric; 6] = [
    Metric::F1,
    Metric::Precision,
    Metric::Recall,
    Metric::RocAuc,
    Metric::TrainTimeS,
    Metric::PredictTimeS,
];

/// Extra metric reported alongside the suite
pub const ACCURACY: &str = "accuracy";

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::F1 => "f1",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::RocAuc => "roc_auc",
            Metric::TrainTimeS => "train_time_s",
            Metric::PredictTimeS => "predict_time_s",
        }
    }

    /// Time-like metrics rank lower-is-better
    pub fn higher_is_better(&self) -> bool {
        !self.is_timing()
    }

    pub fn is_timing(&self) -> bool {
        matches!(self, Metric::TrainTimeS | Metric::PredictTimeS)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        METRIC_SUITE
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ChurnError::ConfigError(format!("unknown metric `{}`", s)))
    }
}

/// Fail unless every suite metric is present and finite
pub fn ensure_complete(metrics: &Metrics) -> Result<()> {
    for metric in METRIC_SUITE {
        match metrics.get(metric.as_str()) {
            Some(v) if v.is_finite() => {}
            Some(v) => {
                return Err(ChurnError::IncompleteMetricsError(format!(
                    "`{}` is not finite ({})",
                    metric, v
                )))
            }
            None => {
                return Err(ChurnError::IncompleteMetricsError(format!("`{}` is missing", metric)))
            }
        }
    }
    Ok(())
}

/// Metrics with timing entries removed; these are the deterministic part
pub fn quality_only(metrics: &Metrics) -> Metrics {
    metrics
        .iter()
        .filter(|(k, _)| {
            !k.starts_with(Metric::TrainTimeS.as_str()) && !k.starts_with(Metric::PredictTimeS.as_str())
        })
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

/// Fold mean for every metric, plus `<metric>_var` for quality metrics
pub fn aggregate_folds(folds: &[Metrics]) -> Result<Metrics> {
    let Some(first) = folds.first() else {
        return Err(ChurnError::IncompleteMetricsError("no folds to aggregate".to_string()));
    };

    let n = folds.len() as f64;
    let mut out = Metrics::new();
    for key in first.keys() {
        let values = folds
            .iter()
            .map(|m| {
                m.get(key)
                    .copied()
                    .ok_or_else(|| ChurnError::IncompleteMetricsError(format!("fold is missing `{}`", key)))
            })
            .collect::<Result<Vec<f64>>>()?;
        let mean = values.iter().sum::<f64>() / n;
        out.insert(key.clone(), mean);

        let timing = key == Metric::TrainTimeS.as_str() || key == Metric::PredictTimeS.as_str();
        if !timing {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            out.insert(format!("{}_var", key), var);
        }
    }
    Ok(out)
}

/// Scores a fitted classifier on held-out data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluator {
    threshold: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Evaluator {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ChurnError::ConfigError(format!(
                "classification threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Full metric suite for `model` on the holdout set
    pub fn evaluate(&self, model: &dyn Classifier, holdout: &FeatureMatrix, labels: &Labels) -> Result<Metrics> {
        if holdout.len() != labels.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} labels", holdout.len()),
                actual: format!("{} labels", labels.len()),
            });
        }
        if holdout.is_empty() {
            return Err(ChurnError::IncompleteMetricsError("holdout set is empty".to_string()));
        }

        let train_time = model.train_time_s().ok_or_else(|| {
            ChurnError::IncompleteMetricsError(format!("{} does not report its training time", model.name()))
        })?;

        let start = Instant::now();
        let proba = model.predict_proba(holdout)?;
        let predict_time = start.elapsed().as_secs_f64();

        if proba.len() != holdout.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} probabilities", holdout.len()),
                actual: format!("{} probabilities", proba.len()),
            });
        }
        let scores = proba.to_vec();

        let y_true = labels.values();
        let y_pred: Vec<bool> = scores.iter().map(|&p| p >= self.threshold).collect();
        let counts = ConfusionCounts::from_predictions(y_true, &y_pred);
        let auc = roc_auc(y_true, &scores).ok_or_else(|| {
            ChurnError::IncompleteMetricsError("roc_auc is undefined for a single-class holdout".to_string())
        })?;

        let mut metrics = Metrics::new();
        metrics.insert(Metric::F1.as_str().to_string(), counts.f1());
        metrics.insert(Metric::Precision.as_str().to_string(), counts.precision());
        metrics.insert(Metric::Recall.as_str().to_string(), counts.recall());
        metrics.insert(Metric::RocAuc.as_str().to_string(), auc);
        metrics.insert(Metric::TrainTimeS.as_str().to_string(), train_time);
        metrics.insert(Metric::PredictTimeS.as_str().to_string(), predict_time);
        metrics.insert(ACCURACY.to_string(), counts.accuracy());
        ensure_complete(&metrics)?;

        debug!(
            model = model.name(),
            n = holdout.len(),
            f1 = counts.f1(),
            roc_auc = auc,
            "Evaluated model"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FeatureContract, FeatureValue, Record};
    use ndarray::Array1;
    use std::sync::Arc;

    /// Returns the `score` feature as its probability
    struct Passthrough;

    impl Classifier for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn train_time_s(&self) -> Option<f64> {
            Some(0.25)
        }

        fn predict_proba(&self, features: &FeatureMatrix) -> Result<Array1<f64>> {
            Ok(features
                .records()
                .iter()
                .map(|r| r["score"].as_number().unwrap_or(0.0))
                .collect())
        }
    }

    struct HardLabels;

    impl Classifier for HardLabels {
        fn name(&self) -> &str {
            "hard_labels"
        }

        fn train_time_s(&self) -> Option<f64> {
            Some(0.0)
        }
    }

    fn holdout(scores: &[f64]) -> FeatureMatrix {
        let contract = Arc::new(FeatureContract::new("t", 1).numeric("score"));
        let records = scores
            .iter()
            .map(|s| {
                let mut r = Record::new();
                r.insert("score".to_string(), FeatureValue::Number(*s));
                r
            })
            .collect();
        FeatureMatrix::new(contract, records).unwrap()
    }

    #[test]
    fn test_full_suite_reported() {
        let x = holdout(&[0.9, 0.2, 0.7, 0.4]);
        let y = Labels::new(vec![true, false, false, true]);
        let metrics = Evaluator::default().evaluate(&Passthrough, &x, &y).unwrap();

        for metric in METRIC_SUITE {
            assert!(metrics.contains_key(metric.as_str()), "missing {metric}");
        }
        assert_eq!(metrics["precision"], 0.5);
        assert_eq!(metrics["recall"], 0.5);
        assert_eq!(metrics["roc_auc"], 0.75);
        assert_eq!(metrics["train_time_s"], 0.25);
        assert_eq!(metrics[ACCURACY], 0.5);
    }

    #[test]
    fn test_threshold_changes_labels_not_auc() {
        let x = holdout(&[0.9, 0.2, 0.7, 0.4]);
        let y = Labels::new(vec![true, false, false, true]);
        let strict = Evaluator::new(0.95).unwrap().evaluate(&Passthrough, &x, &y).unwrap();
        assert_eq!(strict["recall"], 0.0);
        assert_eq!(strict["roc_auc"], 0.75);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let x = holdout(&[0.9, 0.2, 0.7, 0.4, 0.6]);
        let y = Labels::new(vec![true, false, false, true, true]);
        let evaluator = Evaluator::default();
        let a = evaluator.evaluate(&Passthrough, &x, &y).unwrap();
        let b = evaluator.evaluate(&Passthrough, &x, &y).unwrap();
        assert_eq!(quality_only(&a), quality_only(&b));
    }

    #[test]
    fn test_hard_label_model_unsupported() {
        let x = holdout(&[0.9, 0.2]);
        let y = Labels::new(vec![true, false]);
        let err = Evaluator::default().evaluate(&HardLabels, &x, &y).unwrap_err();
        assert!(matches!(err, ChurnError::UnsupportedModelError(_)));
    }

    #[test]
    fn test_single_class_holdout_is_incomplete() {
        let x = holdout(&[0.9, 0.2]);
        let y = Labels::new(vec![true, true]);
        let err = Evaluator::default().evaluate(&Passthrough, &x, &y).unwrap_err();
        assert!(matches!(err, ChurnError::IncompleteMetricsError(_)));
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(Evaluator::new(1.5).is_err());
        assert!(Evaluator::new(-0.1).is_err());
        assert_eq!(Evaluator::new(0.3).unwrap().threshold(), 0.3);
    }

    #[test]
    fn test_aggregate_folds() {
        let fold = |f1: f64| -> Metrics {
            [("f1".to_string(), f1), ("train_time_s".to_string(), 1.0)].into_iter().collect()
        };
        let agg = aggregate_folds(&[fold(0.5), fold(0.7)]).unwrap();
        assert!((agg["f1"] - 0.6).abs() < 1e-12);
        assert!((agg["f1_var"] - 0.01).abs() < 1e-12);
        assert_eq!(agg["train_time_s"], 1.0);
        assert!(!agg.contains_key("train_time_s_var"));
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("roc_auc".parse::<Metric>().unwrap(), Metric::RocAuc);
        assert!("auc".parse::<Metric>().is_err());
        assert!(!Metric::PredictTimeS.higher_is_better());
    }
}
