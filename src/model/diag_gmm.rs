//! Diagonal-covariance GMM used for Gaussian preselection.

use crate::error::{IvecdError, Result};
use crate::model::{ComponentSelector, log_2pi, read_model_file};
use crate::pipeline::types::Selection;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Deserialize;
use std::path::Path;

/// On-disk layout of a diagonal GMM.
#[derive(Debug, Deserialize)]
struct DiagGmmFile {
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    vars: Vec<Vec<f64>>,
}

/// Diagonal GMM with precomputed per-component constants.
#[derive(Debug, Clone)]
pub struct DiagGmm {
    gconsts: Array1<f64>,
    means_invvars: Array2<f64>,
    inv_vars: Array2<f64>,
}

impl DiagGmm {
    /// Load a diagonal GMM from a JSON model file.
    pub fn load(path: &Path) -> Result<Self> {
        let file: DiagGmmFile = read_model_file(path)?;
        Self::from_parts(file.weights, file.means, file.vars).map_err(|e| IvecdError::ModelLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Build a GMM from component weights, means and variances.
    pub fn from_parts(weights: Vec<f64>, means: Vec<Vec<f64>>, vars: Vec<Vec<f64>>) -> Result<Self> {
        let num_gauss = weights.len();
        if num_gauss == 0 || means.len() != num_gauss || vars.len() != num_gauss {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "diagonal GMM needs matching weights/means/vars, got {}/{}/{}",
                    num_gauss,
                    means.len(),
                    vars.len()
                ),
            });
        }
        let dim = means[0].len();

        let mut gconsts = Array1::zeros(num_gauss);
        let mut means_invvars = Array2::zeros((num_gauss, dim));
        let mut inv_vars = Array2::zeros((num_gauss, dim));

        for (i, ((weight, mean), var)) in weights.iter().zip(&means).zip(&vars).enumerate() {
            if mean.len() != dim || var.len() != dim {
                return Err(IvecdError::ModelMismatch {
                    message: format!("component {} has inconsistent dimension", i),
                });
            }
            if !(*weight > 0.0) || var.iter().any(|v| !(*v > 0.0)) {
                return Err(IvecdError::ModelMismatch {
                    message: format!("component {} has a non-positive weight or variance", i),
                });
            }
            let mut gconst = weight.ln() - 0.5 * dim as f64 * log_2pi();
            for d in 0..dim {
                let inv_var = 1.0 / var[d];
                inv_vars[[i, d]] = inv_var;
                means_invvars[[i, d]] = mean[d] * inv_var;
                gconst -= 0.5 * (var[d].ln() + mean[d] * mean[d] * inv_var);
            }
            gconsts[i] = gconst;
        }

        Ok(Self {
            gconsts,
            means_invvars,
            inv_vars,
        })
    }

    pub fn dim(&self) -> usize {
        self.inv_vars.ncols()
    }

    /// Log-likelihood of `frame` under every component.
    pub fn log_likelihoods(&self, frame: ArrayView1<f32>) -> Array1<f64> {
        let x = frame.mapv(|v| v as f64);
        let x2 = x.mapv(|v| v * v);
        &self.gconsts + &self.means_invvars.dot(&x) - &(self.inv_vars.dot(&x2) * 0.5)
    }
}

/// `ln Σ exp(x)` computed stably.
pub(crate) fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl ComponentSelector for DiagGmm {
    fn num_components(&self) -> usize {
        self.gconsts.len()
    }

    fn select(&self, feats: ArrayView2<f32>, k: usize) -> Result<(Selection, f64)> {
        if feats.nrows() > 0 && feats.ncols() != self.dim() {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "feature dimension {} does not match diagonal GMM dimension {}",
                    feats.ncols(),
                    self.dim()
                ),
            });
        }
        let k = k.min(self.num_components());
        let mut frames = Vec::with_capacity(feats.nrows());
        let mut tot_like = 0.0;

        for frame in feats.rows() {
            let loglikes = self.log_likelihoods(frame);
            let mut order: Vec<usize> = (0..loglikes.len()).collect();
            order.sort_by(|&a, &b| loglikes[b].total_cmp(&loglikes[a]));
            order.truncate(k);
            tot_like += log_sum_exp(order.iter().map(|&i| loglikes[i]));
            frames.push(order);
        }

        Ok((Selection::new(frames), tot_like))
    }
}
