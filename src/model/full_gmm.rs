//! Full-covariance GMM evaluated on preselected components.

use crate::error::{IvecdError, Result};
use crate::model::linalg::{cholesky, log_det_from_cholesky, solve_lower};
use crate::model::{PreselectLikelihood, log_2pi, read_model_file};
use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FullGmmFile {
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    covars: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone)]
struct Component {
    gconst: f64,
    mean: Array1<f64>,
    /// Lower Cholesky factor of the covariance.
    chol: Array2<f64>,
}

/// Full-covariance GMM.
#[derive(Debug, Clone)]
pub struct FullGmm {
    components: Vec<Component>,
    dim: usize,
}

impl FullGmm {
    /// Load a full-covariance GMM from a JSON model file.
    pub fn load(path: &Path) -> Result<Self> {
        let file: FullGmmFile = read_model_file(path)?;
        Self::from_parts(file.weights, file.means, file.covars).map_err(|e| {
            IvecdError::ModelLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Build a GMM from component weights, means and covariance matrices.
    pub fn from_parts(
        weights: Vec<f64>,
        means: Vec<Vec<f64>>,
        covars: Vec<Vec<Vec<f64>>>,
    ) -> Result<Self> {
        let num_gauss = weights.len();
        if num_gauss == 0 || means.len() != num_gauss || covars.len() != num_gauss {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "full GMM needs matching weights/means/covars, got {}/{}/{}",
                    num_gauss,
                    means.len(),
                    covars.len()
                ),
            });
        }
        let dim = means[0].len();

        let mut components = Vec::with_capacity(num_gauss);
        for (i, ((weight, mean), covar)) in weights.into_iter().zip(means).zip(covars).enumerate() {
            if mean.len() != dim || covar.len() != dim || covar.iter().any(|row| row.len() != dim)
            {
                return Err(IvecdError::ModelMismatch {
                    message: format!("component {} has inconsistent dimension", i),
                });
            }
            let covar = Array2::from_shape_vec((dim, dim), covar.into_iter().flatten().collect())
                .map_err(|e| IvecdError::ModelMismatch {
                    message: format!("component {}: {}", i, e),
                })?;
            let chol = cholesky(covar.view()).ok_or_else(|| IvecdError::ModelMismatch {
                message: format!("covariance of component {} is not positive definite", i),
            })?;
            if !(weight > 0.0) {
                return Err(IvecdError::ModelMismatch {
                    message: format!("component {} has a non-positive weight", i),
                });
            }
            let gconst =
                weight.ln() - 0.5 * (dim as f64 * log_2pi() + log_det_from_cholesky(chol.view()));
            components.push(Component {
                gconst,
                mean: Array1::from(mean),
                chol,
            });
        }

        Ok(Self { components, dim })
    }
}

impl PreselectLikelihood for FullGmm {
    fn num_components(&self) -> usize {
        self.components.len()
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn log_likelihoods_preselect(
        &self,
        frame: ArrayView1<f32>,
        indices: &[usize],
    ) -> Result<Vec<f64>> {
        if frame.len() != self.dim {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "feature dimension {} does not match full GMM dimension {}",
                    frame.len(),
                    self.dim
                ),
            });
        }
        let x = frame.mapv(|v| v as f64);
        indices
            .iter()
            .map(|&i| {
                let component =
                    self.components
                        .get(i)
                        .ok_or_else(|| IvecdError::ModelMismatch {
                            message: format!(
                                "selected component {} but full GMM has {}",
                                i,
                                self.components.len()
                            ),
                        })?;
                let centered = &x - &component.mean;
                let y = solve_lower(component.chol.view(), centered.view());
                Ok(component.gconst - 0.5 * y.dot(&y))
            })
            .collect()
    }
}
