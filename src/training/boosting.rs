//! Gradient boosted trees for binary classification
//!
//! Boosts second-order regression trees on the log-odds, in the style of
//! XGBoost's `binary:logistic` objective.

use super::config::BoostingParams;
use super::models::{sigmoid, Deadline};
use super::tree::{RegressionTree, TreeParams};
use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

const REG_LAMBDA: f64 = 1.0;

/// Fitted gradient boosting classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingModel {
    initial_log_odds: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl BoostingModel {
    pub fn fit(
        params: &BoostingParams,
        x: &Array2<f64>,
        y: &Array1<f64>,
        seed: u64,
        deadline: &Deadline,
    ) -> Result<Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(ChurnError::TrainingFailure("no training samples".to_string()));
        }

        let p = y.mean().unwrap_or(0.5).clamp(1e-6, 1.0 - 1e-6);
        let initial_log_odds = (p / (1.0 - p)).ln();
        let mut log_odds = Array1::from_elem(n_samples, initial_log_odds);

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            reg_lambda: REG_LAMBDA,
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            deadline.check()?;

            let probs = log_odds.mapv(sigmoid);
            let grad: Vec<f64> = y.iter().zip(probs.iter()).map(|(yi, pi)| yi - pi).collect();
            let hess: Vec<f64> = probs.iter().map(|pi| pi * (1.0 - pi)).collect();

            let rows = subsample_indices(n_samples, params.subsample, &mut rng);
            let tree = RegressionTree::fit(x, &grad, &hess, &rows, &tree_params);

            for (i, row) in x.rows().into_iter().enumerate() {
                log_odds[i] += params.learning_rate * tree.predict_row(row);
            }
            if log_odds.iter().any(|v| !v.is_finite()) {
                return Err(ChurnError::TrainingFailure(format!(
                    "boosting loss became NaN at round {}",
                    round
                )));
            }
            trees.push(tree);
        }

        debug!(n_trees = trees.len(), initial_log_odds, "Fitted gradient boosting");
        Ok(Self {
            initial_log_odds,
            learning_rate: params.learning_rate,
            n_features: x.ncols(),
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(ChurnError::ShapeError {
                expected: format!("{} columns", self.n_features),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let margin: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                sigmoid(self.initial_log_odds + self.learning_rate * margin)
            })
            .collect())
    }
}

fn subsample_indices(n: usize, fraction: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    if fraction >= 1.0 {
        return indices;
    }
    let sample_size = ((n as f64) * fraction).ceil().max(1.0) as usize;
    indices.shuffle(rng);
    indices.truncate(sample_size);
    indices.sort_unstable();
    indices
}
