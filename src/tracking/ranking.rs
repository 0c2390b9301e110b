//! Total order over runs used for best-run selection and promotion

use super::run::TrainingRun;
use crate::evaluation::Metric;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default width of the tie band on the primary metric
pub const DEFAULT_TIE_EPSILON: f64 = 1e-6;

/// Primary metric, then lower `predict_time_s` inside the epsilon band,
/// then lower run id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingKey {
    pub metric: Metric,
    pub epsilon: f64,
}

impl Default for RankingKey {
    fn default() -> Self {
        Self::new(Metric::F1)
    }
}

impl RankingKey {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            epsilon: DEFAULT_TIE_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon.max(0.0);
        self
    }

    /// Primary metric oriented so that higher is better
    pub fn score(&self, run: &TrainingRun) -> Option<f64> {
        let value = run.metric(self.metric.as_str())?;
        Some(if self.metric.higher_is_better() { value } else { -value })
    }

    /// `Greater` when `a` ranks ahead of `b`
    pub fn compare(&self, a: &TrainingRun, b: &TrainingRun) -> Ordering {
        let sa = self.score(a).unwrap_or(f64::NEG_INFINITY);
        let sb = self.score(b).unwrap_or(f64::NEG_INFINITY);
        let tied = sa == sb || (sa - sb).abs() <= self.epsilon;
        if !tied {
            return sa.total_cmp(&sb);
        }

        let pa = a.metric(Metric::PredictTimeS.as_str()).unwrap_or(f64::INFINITY);
        let pb = b.metric(Metric::PredictTimeS.as_str()).unwrap_or(f64::INFINITY);
        pb.total_cmp(&pa).then_with(|| b.run_id.cmp(&a.run_id))
    }

    /// Best of the given runs
    pub fn best<'a, I>(&self, runs: I) -> Option<&'a TrainingRun>
    where
        I: IntoIterator<Item = &'a TrainingRun>,
    {
        runs.into_iter().max_by(|a, b| self.compare(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::TrialParams;
    use crate::tracking::{RunId, RunStatus};

    fn run(id: u64, f1: f64, predict: f64) -> TrainingRun {
        let mut r = TrainingRun::started(RunId::new(id), TrialParams::new());
        r.status = RunStatus::Succeeded;
        r.metrics.insert("f1".into(), f1);
        r.metrics.insert("predict_time_s".into(), predict);
        r
    }

    #[test]
    fn test_primary_metric_decides() {
        let key = RankingKey::new(Metric::F1);
        let runs = [run(1, 0.7, 0.1), run(2, 0.9, 0.5), run(3, 0.8, 0.0)];
        assert_eq!(key.best(&runs).unwrap().run_id, RunId::new(2));
    }

    #[test]
    fn test_ties_broken_by_predict_time_then_run_id() {
        let key = RankingKey::new(Metric::F1).with_epsilon(0.01);
        let runs = [run(1, 0.800, 0.3), run(2, 0.805, 0.2), run(3, 0.79, 0.0)];
        assert_eq!(key.best(&runs).unwrap().run_id, RunId::new(2));

        let same = [run(5, 0.8, 0.2), run(4, 0.8, 0.2)];
        assert_eq!(key.best(&same).unwrap().run_id, RunId::new(4));
    }

    #[test]
    fn test_time_metrics_rank_lower_is_better() {
        let key = RankingKey::new(Metric::PredictTimeS);
        let runs = [run(1, 0.5, 0.3), run(2, 0.5, 0.1)];
        assert_eq!(key.best(&runs).unwrap().run_id, RunId::new(2));
        assert_eq!(key.score(&runs[1]), Some(-0.1));
    }
}
