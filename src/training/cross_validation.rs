//! Stratified splitting for holdout evaluation and cross-validation

use crate::contract::Labels;
use crate::error::{ChurnError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single train/test split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Stratified splitter; class proportions are preserved in every split
#[derive(Debug, Clone)]
pub struct CrossValidator {
    random_state: u64,
}

impl Default for CrossValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossValidator {
    pub fn new() -> Self {
        Self { random_state: 42 }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Shuffled indices of each class, negatives first
    fn class_indices(&self, labels: &Labels) -> [Vec<usize>; 2] {
        let mut classes: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for (idx, &label) in labels.values().iter().enumerate() {
            classes[usize::from(label)].push(idx);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        for indices in classes.iter_mut() {
            indices.shuffle(&mut rng);
        }
        classes
    }

    /// Stratified k-fold splits
    pub fn k_fold(&self, labels: &Labels, n_splits: usize) -> Result<Vec<CVSplit>> {
        if n_splits < 2 {
            return Err(ChurnError::ConfigError(format!(
                "k-fold needs at least 2 splits, got {}",
                n_splits
            )));
        }
        if labels.len() < n_splits {
            return Err(ChurnError::ConfigError(format!(
                "cannot split {} records into {} folds",
                labels.len(),
                n_splits
            )));
        }

        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut offset = 0;
        for indices in self.class_indices(labels) {
            for (i, &idx) in indices.iter().enumerate() {
                folds[(offset + i) % n_splits].push(idx);
            }
            offset += indices.len();
        }

        let splits = (0..n_splits)
            .map(|fold_idx| {
                let mut test_indices = folds[fold_idx].clone();
                test_indices.sort_unstable();
                let mut train_indices: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect();
                train_indices.sort_unstable();
                CVSplit {
                    train_indices,
                    test_indices,
                    fold_idx,
                }
            })
            .collect();
        Ok(splits)
    }

    /// Single stratified train/test split with `test_fraction` held out
    pub fn holdout(&self, labels: &Labels, test_fraction: f64) -> Result<CVSplit> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(ChurnError::ConfigError(format!(
                "holdout fraction must be in (0, 1), got {}",
                test_fraction
            )));
        }

        let mut train_indices = Vec::new();
        let mut test_indices = Vec::new();
        for indices in self.class_indices(labels) {
            let n_test = (indices.len() as f64 * test_fraction).round() as usize;
            let n_test = if indices.len() >= 2 { n_test.clamp(1, indices.len() - 1) } else { 0 };
            test_indices.extend_from_slice(&indices[..n_test]);
            train_indices.extend_from_slice(&indices[n_test..]);
        }
        if train_indices.is_empty() || test_indices.is_empty() {
            return Err(ChurnError::DataError(format!(
                "cannot hold out {} of {} records",
                test_fraction,
                labels.len()
            )));
        }

        train_indices.sort_unstable();
        test_indices.sort_unstable();
        Ok(CVSplit {
            train_indices,
            test_indices,
            fold_idx: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pos: usize, neg: usize) -> Labels {
        let mut v = vec![true; pos];
        v.extend(vec![false; neg]);
        Labels::new(v)
    }

    #[test]
    fn test_stratified_k_fold() {
        let y = labels(10, 20);
        let splits = CrossValidator::new().k_fold(&y, 5).unwrap();
        assert_eq!(splits.len(), 5);

        for split in &splits {
            assert_eq!(split.test_indices.len(), 6);
            let positives = split.test_indices.iter().filter(|&&i| y.values()[i]).count();
            assert_eq!(positives, 2);
            for idx in &split.test_indices {
                assert!(!split.train_indices.contains(idx));
            }
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort_unstable();
        assert_eq!(all_test, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_holdout_preserves_ratio_and_is_seeded() {
        let y = labels(30, 70);
        let a = CrossValidator::new().holdout(&y, 0.2).unwrap();
        let b = CrossValidator::new().holdout(&y, 0.2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test_indices.len(), 20);
        assert_eq!(a.test_indices.iter().filter(|&&i| y.values()[i]).count(), 6);

        let c = CrossValidator::new().with_random_state(7).holdout(&y, 0.2).unwrap();
        assert_ne!(a.test_indices, c.test_indices);
    }

    #[test]
    fn test_invalid_splits() {
        let y = labels(2, 2);
        assert!(CrossValidator::new().k_fold(&y, 1).is_err());
        assert!(CrossValidator::new().k_fold(&y, 5).is_err());
        assert!(CrossValidator::new().holdout(&y, 1.0).is_err());
    }
}
