//! i-vector extractor model.
//!
//! Each Gaussian `i` has a projection `M_i` (feat_dim × ivector_dim) and a
//! precision `Σ_i⁻¹`. The prior over the i-vector is a unit Gaussian whose
//! mean is `prior_offset` in dimension 0 and zero elsewhere.

use crate::error::{IvecdError, Result};
use crate::model::linalg::{cholesky, log_det_from_cholesky, spd_solve};
use crate::model::{VectorExtractor, log_2pi, read_model_file};
use crate::pipeline::stats::UtteranceStats;
use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;
use std::path::Path;
use std::thread;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct IvectorModelFile {
    prior_offset: f64,
    m: Vec<Vec<Vec<f64>>>,
    sigma_inv: Vec<Vec<Vec<f64>>>,
}

/// Per-Gaussian quantities derived once at load time.
#[derive(Debug, Clone)]
struct Derived {
    /// `Σ_i⁻¹ M_i`
    sigma_inv_m: Array2<f64>,
    /// `M_iᵀ Σ_i⁻¹ M_i`
    u: Array2<f64>,
    gconst: f64,
}

/// i-vector extractor with derived variables precomputed.
#[derive(Debug, Clone)]
pub struct IvectorModel {
    prior_offset: f64,
    feat_dim: usize,
    ivector_dim: usize,
    derived: Vec<Derived>,
}

fn to_matrix(rows: Vec<Vec<f64>>, what: &str, gauss: usize) -> Result<Array2<f64>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(IvecdError::ModelMismatch {
            message: format!("{} of Gaussian {} has ragged rows", what, gauss),
        });
    }
    Array2::from_shape_vec((nrows, ncols), rows.into_iter().flatten().collect()).map_err(|e| {
        IvecdError::ModelMismatch {
            message: format!("{} of Gaussian {}: {}", what, gauss, e),
        }
    })
}

fn derive(m: &Array2<f64>, sigma_inv: &Array2<f64>, gauss: usize) -> Result<Derived> {
    let chol = cholesky(sigma_inv.view()).ok_or_else(|| IvecdError::ModelMismatch {
        message: format!("precision of Gaussian {} is not positive definite", gauss),
    })?;
    let dim = sigma_inv.nrows() as f64;
    let gconst = -0.5 * (dim * log_2pi() - log_det_from_cholesky(chol.view()));
    let sigma_inv_m = sigma_inv.dot(m);
    let u = m.t().dot(&sigma_inv_m);
    Ok(Derived {
        sigma_inv_m,
        u,
        gconst,
    })
}

/// Computes the derived variables for all Gaussians on `num_threads` threads.
fn compute_derived(
    m: &[Array2<f64>],
    sigma_inv: &[Array2<f64>],
    num_threads: usize,
) -> Result<Vec<Derived>> {
    let num_threads = num_threads.clamp(1, m.len().max(1));
    let chunk = m.len().div_ceil(num_threads).max(1);

    let results: Vec<Result<Vec<Derived>>> = thread::scope(|scope| {
        let handles: Vec<_> = m
            .chunks(chunk)
            .zip(sigma_inv.chunks(chunk))
            .enumerate()
            .map(|(c, (ms, ss))| {
                scope.spawn(move || {
                    ms.iter()
                        .zip(ss)
                        .enumerate()
                        .map(|(j, (m, s))| derive(m, s, c * chunk + j))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(IvecdError::Other(
                        "derived-variable computation panicked".to_string(),
                    ))
                })
            })
            .collect()
    });

    let mut derived = Vec::with_capacity(m.len());
    for part in results {
        derived.extend(part?);
    }
    Ok(derived)
}

impl IvectorModel {
    /// Load an extractor from a JSON model file.
    ///
    /// Derived variables are computed on `num_threads` threads.
    pub fn load(path: &Path, num_threads: usize) -> Result<Self> {
        let file: IvectorModelFile = read_model_file(path)?;
        Self::from_parts(file.prior_offset, file.m, file.sigma_inv, num_threads).map_err(|e| {
            IvecdError::ModelLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Build an extractor from projections `m[i]` and precisions `sigma_inv[i]`.
    pub fn from_parts(
        prior_offset: f64,
        m: Vec<Vec<Vec<f64>>>,
        sigma_inv: Vec<Vec<Vec<f64>>>,
        num_threads: usize,
    ) -> Result<Self> {
        if m.is_empty() || m.len() != sigma_inv.len() {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "extractor needs one projection and precision per Gaussian, got {}/{}",
                    m.len(),
                    sigma_inv.len()
                ),
            });
        }

        let m = m
            .into_iter()
            .enumerate()
            .map(|(i, rows)| to_matrix(rows, "projection", i))
            .collect::<Result<Vec<_>>>()?;
        let sigma_inv = sigma_inv
            .into_iter()
            .enumerate()
            .map(|(i, rows)| to_matrix(rows, "precision", i))
            .collect::<Result<Vec<_>>>()?;

        let (feat_dim, ivector_dim) = m[0].dim();
        if ivector_dim == 0 {
            return Err(IvecdError::ModelMismatch {
                message: "i-vector dimension must be at least 1".to_string(),
            });
        }
        for (i, (mi, si)) in m.iter().zip(&sigma_inv).enumerate() {
            if mi.dim() != (feat_dim, ivector_dim) || si.dim() != (feat_dim, feat_dim) {
                return Err(IvecdError::ModelMismatch {
                    message: format!("Gaussian {} has inconsistent dimensions", i),
                });
            }
        }

        let derived = compute_derived(&m, &sigma_inv, num_threads)?;
        debug!(
            "Computed derived variables for {} Gaussians on {} thread(s)",
            derived.len(),
            num_threads
        );

        Ok(Self {
            prior_offset,
            feat_dim,
            ivector_dim,
            derived,
        })
    }

    fn check_stats(&self, stats: &UtteranceStats) -> Result<()> {
        if stats.num_gauss() != self.derived.len() || stats.feat_dim() != self.feat_dim {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "stats are {}x{} but extractor expects {}x{}",
                    stats.num_gauss(),
                    stats.feat_dim(),
                    self.derived.len(),
                    self.feat_dim
                ),
            });
        }
        Ok(())
    }
}

impl VectorExtractor for IvectorModel {
    fn num_gauss(&self) -> usize {
        self.derived.len()
    }

    fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    fn ivector_dim(&self) -> usize {
        self.ivector_dim
    }

    fn prior_offset(&self) -> f64 {
        self.prior_offset
    }

    fn auxf(&self, stats: &UtteranceStats, ivector: ArrayView1<f64>) -> f64 {
        let mut acoustic = 0.0;
        for (i, derived) in self.derived.iter().enumerate() {
            let gamma = stats.gamma[i];
            if gamma == 0.0 {
                continue;
            }
            let projected = derived.sigma_inv_m.dot(&ivector);
            acoustic += gamma * derived.gconst + stats.x.row(i).dot(&projected)
                - 0.5 * gamma * ivector.dot(&derived.u.dot(&ivector));
        }

        let mut offset = ivector.to_owned();
        offset[0] -= self.prior_offset;
        let prior = -0.5 * (offset.dot(&offset) + self.ivector_dim as f64 * log_2pi());

        acoustic + prior
    }

    fn ivector_mean(&self, stats: &UtteranceStats, ivector: &mut Array1<f64>) -> Result<()> {
        self.check_stats(stats)?;

        let mut linear = Array1::<f64>::zeros(self.ivector_dim);
        linear[0] = self.prior_offset;
        let mut quadratic = Array2::<f64>::eye(self.ivector_dim);

        for (i, derived) in self.derived.iter().enumerate() {
            let gamma = stats.gamma[i];
            if gamma == 0.0 {
                continue;
            }
            linear += &derived.sigma_inv_m.t().dot(&stats.x.row(i));
            quadratic.scaled_add(gamma, &derived.u);
        }

        *ivector = spd_solve(quadratic.view(), linear.view()).ok_or_else(|| {
            IvecdError::ModelMismatch {
                message: "i-vector precision is not positive definite".to_string(),
            }
        })?;
        Ok(())
    }
}
