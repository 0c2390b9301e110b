//! Sampling strategies for hyperparameter search

use super::search_space::{ParameterValue, SearchSpace, TrialParams};
use crate::error::{ChurnError, Result};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Largest grid that `Auto` will enumerate exhaustively
pub const MAX_AUTO_GRID: usize = 256;

/// Type of sampler to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerType {
    /// Grid for small discrete spaces, random otherwise
    #[default]
    Auto,
    Grid,
    Random,
    /// Tree-structured Parzen Estimator
    Tpe,
}

/// Trait for hyperparameter samplers
///
/// `history` holds completed trials with scores oriented so that higher
/// is better.
pub trait Sampler: Send {
    fn name(&self) -> &'static str;

    fn sample(&mut self, space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams;
}

/// Exhaustive grid, restarting from the first point once exhausted
#[derive(Debug)]
pub struct GridSampler {
    points: Vec<TrialParams>,
    cursor: usize,
}

impl GridSampler {
    pub fn new(space: &SearchSpace) -> Result<Self> {
        let points = space
            .grid()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ChurnError::ConfigError("grid search requires a discrete search space".to_string()))?;
        Ok(Self { points, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Sampler for GridSampler {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn sample(&mut self, _space: &SearchSpace, _history: &[(TrialParams, f64)]) -> TrialParams {
        let point = self.points[self.cursor % self.points.len()].clone();
        self.cursor += 1;
        point
    }
}

/// Random sampler
#[derive(Debug)]
pub struct RandomSampler {
    rng: Xoshiro256PlusPlus,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn sample(&mut self, space: &SearchSpace, _history: &[(TrialParams, f64)]) -> TrialParams {
        space.sample(&mut self.rng)
    }
}

/// Simplified Tree-structured Parzen Estimator
///
/// After a random warm-up, draws candidates at random and keeps the one
/// closest to the best-scoring quantile of the history.
#[derive(Debug)]
pub struct TpeSampler {
    rng: Xoshiro256PlusPlus,
    n_startup_trials: usize,
    gamma: f64,
    n_candidates: usize,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            n_startup_trials: 10,
            gamma: 0.25,
            n_candidates: 24,
        }
    }

    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    fn similarity(space: &SearchSpace, candidate: &TrialParams, good: &[&TrialParams]) -> f64 {
        if good.is_empty() {
            return 0.0;
        }
        let total: f64 = good
            .iter()
            .map(|g| {
                let dists: Vec<f64> = candidate
                    .iter()
                    .filter_map(|(k, v)| g.get(k).map(|gv| Self::distance(space, k, v, gv)))
                    .collect();
                if dists.is_empty() {
                    0.0
                } else {
                    let rms = (dists.iter().map(|d| d * d).sum::<f64>() / dists.len() as f64).sqrt();
                    1.0 / (1.0 + rms)
                }
            })
            .sum();
        total / good.len() as f64
    }

    /// Distance normalized by the parameter's range
    fn distance(space: &SearchSpace, name: &str, a: &ParameterValue, b: &ParameterValue) -> f64 {
        use super::search_space::ParameterType;
        match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => {
                let width = match space.get(name).map(|p| &p.param_type) {
                    Some(ParameterType::Float { low, high, .. }) => high - low,
                    Some(ParameterType::Int { low, high, .. }) => (high - low) as f64,
                    _ => 1.0,
                };
                if width > 0.0 {
                    (x - y).abs() / width
                } else {
                    0.0
                }
            }
            _ => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

impl Sampler for TpeSampler {
    fn name(&self) -> &'static str {
        "tpe"
    }

    fn sample(&mut self, space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams {
        if history.len() < self.n_startup_trials {
            return space.sample(&mut self.rng);
        }

        let mut sorted: Vec<&(TrialParams, f64)> = history.iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        let n_good = ((sorted.len() as f64 * self.gamma).ceil() as usize).max(1);
        let good: Vec<&TrialParams> = sorted[..n_good].iter().map(|(p, _)| p).collect();

        let mut best = space.sample(&mut self.rng);
        let mut best_score = Self::similarity(space, &best, &good);
        for _ in 1..self.n_candidates {
            let candidate = space.sample(&mut self.rng);
            let score = Self::similarity(space, &candidate, &good);
            if score > best_score {
                best_score = score;
                best = candidate;
            }
        }
        best
    }
}

/// Build the sampler for a search space
pub fn create_sampler(sampler_type: SamplerType, space: &SearchSpace, seed: u64) -> Result<Box<dyn Sampler>> {
    let sampler: Box<dyn Sampler> = match sampler_type {
        SamplerType::Auto => match space.grid_size() {
            Some(n) if n <= MAX_AUTO_GRID => Box::new(GridSampler::new(space)?),
            _ => Box::new(RandomSampler::new(seed)),
        },
        SamplerType::Grid => Box::new(GridSampler::new(space)?),
        SamplerType::Random => Box::new(RandomSampler::new(seed)),
        SamplerType::Tpe => Box::new(TpeSampler::new(seed)),
    };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_cycles_past_exhaustion() {
        let space = SearchSpace::new().choice("l2", vec![0.0.into(), 5.0.into()]);
        let mut sampler = GridSampler::new(&space).unwrap();
        let drawn: Vec<f64> = (0..5)
            .map(|_| sampler.sample(&space, &[])["l2"].as_float().unwrap())
            .collect();
        assert_eq!(drawn, vec![0.0, 5.0, 0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_random_sampler_is_seeded() {
        let space = SearchSpace::new().float("lr", 0.001, 0.1).int("n", 10, 100);
        let mut a = RandomSampler::new(7);
        let mut b = RandomSampler::new(7);
        for _ in 0..10 {
            assert_eq!(a.sample(&space, &[]), b.sample(&space, &[]));
        }
    }

    #[test]
    fn test_auto_selects_grid_only_for_discrete_spaces() {
        let discrete = SearchSpace::new().categorical("model", &["a", "b"]);
        assert_eq!(create_sampler(SamplerType::Auto, &discrete, 1).unwrap().name(), "grid");

        let continuous = SearchSpace::new().float("lr", 0.0, 1.0);
        assert_eq!(create_sampler(SamplerType::Auto, &continuous, 1).unwrap().name(), "random");
        assert!(create_sampler(SamplerType::Grid, &continuous, 1).is_err());
    }

    #[test]
    fn test_tpe_prefers_good_region() {
        let space = SearchSpace::new().float("x", 0.0, 1.0);
        let history: Vec<(TrialParams, f64)> = (0..20)
            .map(|i| {
                let x = i as f64 / 20.0;
                let mut params = TrialParams::new();
                params.insert("x".to_string(), ParameterValue::Float(x));
                (params, -(x - 0.9).abs())
            })
            .collect();

        let mut sampler = TpeSampler::new(3).with_n_startup(5);
        let mean: f64 = (0..20)
            .map(|_| sampler.sample(&space, &history)["x"].as_float().unwrap())
            .sum::<f64>()
            / 20.0;
        assert!(mean > 0.5, "mean {mean}");
    }
}
