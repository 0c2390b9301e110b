//! Logistic regression fitted by batch gradient descent

use super::config::LogisticParams;
use super::models::{sigmoid, Deadline};
use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fitted logistic regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
    /// Iterations actually run
    pub n_iter: usize,
    /// Whether the gradient norm dropped below `tol` before `max_iter`
    pub converged: bool,
}

impl LogisticModel {
    /// Minimise mean log-loss plus `l2 / 2 * |w|^2`; the intercept is not penalised
    pub fn fit(params: &LogisticParams, x: &Array2<f64>, y: &Array1<f64>, deadline: &Deadline) -> Result<Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }

        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        let lr = params.learning_rate;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 0..params.max_iter {
            if iter % 16 == 0 {
                deadline.check()?;
            }
            n_iter = iter + 1;

            let predictions = (x.dot(&weights) + bias).mapv(sigmoid);
            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n_samples as f64 + params.l2 * &weights;
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if !grad_norm.is_finite() {
                return Err(ChurnError::TrainingFailure(format!(
                    "logistic regression diverged at iteration {}",
                    iter
                )));
            }
            if grad_norm < params.tol {
                converged = true;
                break;
            }

            weights = weights - lr * dw;
            bias -= lr * db;
        }

        let loss = log_loss(&(x.dot(&weights) + bias).mapv(sigmoid), y);
        if !loss.is_finite() || !bias.is_finite() {
            return Err(ChurnError::TrainingFailure("logistic regression loss is NaN".to_string()));
        }
        debug!(n_iter, converged, loss, "Fitted logistic regression");

        Ok(Self {
            coefficients: weights,
            intercept: bias,
            n_iter,
            converged,
        })
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.coefficients.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} columns", self.coefficients.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok((x.dot(&self.coefficients) + self.intercept).mapv(sigmoid))
    }
}

fn log_loss(p: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    let total: f64 = p
        .iter()
        .zip(y.iter())
        .map(|(&pi, &yi)| {
            let pi = pi.clamp(eps, 1.0 - eps);
            -(yi * pi.ln() + (1.0 - yi) * (1.0 - pi).ln())
        })
        .sum();
    total / y.len().max(1) as f64
}
