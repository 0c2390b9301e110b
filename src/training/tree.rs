//! Second-order regression tree used as the boosting base learner

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Growth limits for one tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    pub reg_lambda: f64,
}

/// Regression tree fitted on gradient/hessian pairs
///
/// Splits maximize the second-order gain and leaves hold the Newton step
/// `sum(g) / (sum(h) + lambda)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

struct Split {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    pub fn fit(x: &Array2<f64>, grad: &[f64], hess: &[f64], indices: &[usize], params: &TreeParams) -> Self {
        let root = build(x, grad, hess, indices, 0, params);
        Self { root }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split { feature_idx, threshold, left, right } => {
                    node = if row[*feature_idx] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        depth(&self.root)
    }
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

fn build(x: &Array2<f64>, grad: &[f64], hess: &[f64], indices: &[usize], depth: usize, params: &TreeParams) -> TreeNode {
    let g: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h: f64 = indices.iter().map(|&i| hess[i]).sum();
    let leaf = TreeNode::Leaf {
        value: g / (h + params.reg_lambda),
    };

    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf.max(1) {
        return leaf;
    }

    let Some(split) = best_split(x, grad, hess, indices, g, h, params) else {
        return leaf;
    };

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, split.feature_idx]] <= split.threshold);

    TreeNode::Split {
        feature_idx: split.feature_idx,
        threshold: split.threshold,
        left: Box::new(build(x, grad, hess, &left, depth + 1, params)),
        right: Box::new(build(x, grad, hess, &right, depth + 1, params)),
    }
}

fn best_split(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    g_total: f64,
    h_total: f64,
    params: &TreeParams,
) -> Option<Split> {
    let parent = score(g_total, h_total, params.reg_lambda);
    let min_leaf = params.min_samples_leaf.max(1);

    let candidates: Vec<Option<Split>> = (0..x.ncols())
        .into_par_iter()
        .map(|feature_idx| {
            let mut order: Vec<usize> = indices.to_vec();
            order.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

            let mut best: Option<Split> = None;
            let (mut g_left, mut h_left) = (0.0, 0.0);
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                g_left += grad[i];
                h_left += hess[i];

                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }
                let (here, next) = (x[[i, feature_idx]], x[[order[pos + 1], feature_idx]]);
                if here == next {
                    continue;
                }

                let gain = score(g_left, h_left, params.reg_lambda)
                    + score(g_total - g_left, h_total - h_left, params.reg_lambda)
                    - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature_idx,
                        threshold: (here + next) / 2.0,
                        gain,
                    });
                }
            }
            best
        })
        .collect();

    // first feature wins ties so fits are reproducible
    candidates.into_iter().flatten().fold(None, |acc: Option<Split>, s| match acc {
        Some(a) if a.gain >= s.gain => Some(a),
        _ => Some(s),
    })
}
