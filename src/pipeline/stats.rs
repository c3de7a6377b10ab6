//! Zeroth- and first-order sufficient statistics for one utterance.

use crate::error::{IvecdError, Result};
use crate::pipeline::types::Posterior;
use ndarray::{Array1, Array2, ArrayView2, Zip};

/// Per-Gaussian occupation counts and weighted feature sums.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceStats {
    /// `gamma[i] = Σ_t γ_t(i)`
    pub gamma: Array1<f64>,
    /// `x[i] = Σ_t γ_t(i) x_t`
    pub x: Array2<f64>,
}

impl UtteranceStats {
    pub fn new(num_gauss: usize, feat_dim: usize) -> Self {
        Self {
            gamma: Array1::zeros(num_gauss),
            x: Array2::zeros((num_gauss, feat_dim)),
        }
    }

    pub fn num_gauss(&self) -> usize {
        self.gamma.len()
    }

    pub fn feat_dim(&self) -> usize {
        self.x.ncols()
    }

    /// Adds the statistics of `feats` aligned by `posterior`.
    ///
    /// Fails if the frame counts differ, the feature dimension does not
    /// match, or a posterior references a Gaussian the model doesn't have.
    pub fn accumulate(&mut self, feats: ArrayView2<f32>, posterior: &Posterior) -> Result<()> {
        if feats.nrows() != posterior.num_frames() {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "posterior has {} frames but features have {}",
                    posterior.num_frames(),
                    feats.nrows()
                ),
            });
        }
        if feats.nrows() > 0 && feats.ncols() != self.feat_dim() {
            return Err(IvecdError::ModelMismatch {
                message: format!(
                    "feature dimension {} does not match model dimension {}",
                    feats.ncols(),
                    self.feat_dim()
                ),
            });
        }

        for (frame, entries) in feats.rows().into_iter().zip(posterior.frames()) {
            for &(gauss, weight) in entries {
                if gauss >= self.num_gauss() {
                    return Err(IvecdError::ModelMismatch {
                        message: format!(
                            "posterior references Gaussian {} but model has {}",
                            gauss,
                            self.num_gauss()
                        ),
                    });
                }
                let weight = weight as f64;
                self.gamma[gauss] += weight;
                Zip::from(self.x.row_mut(gauss))
                    .and(&frame)
                    .for_each(|acc, &value| *acc += weight * value as f64);
            }
        }
        Ok(())
    }

    /// Sum of all occupation counts.
    pub fn total_count(&self) -> f64 {
        self.gamma.sum()
    }
}
