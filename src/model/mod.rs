//! Acoustic model collaborators.
//!
//! The pipeline only talks to the three traits below. The reference
//! implementations load JSON model files; the mocks exist for tests.

pub mod diag_gmm;
pub mod extractor;
pub mod full_gmm;
pub mod linalg;

pub use diag_gmm::DiagGmm;
pub use extractor::IvectorModel;
pub use full_gmm::FullGmm;

use crate::error::{IvecdError, Result};
use crate::pipeline::posterior::apply_softmax;
use crate::pipeline::stats::UtteranceStats;
use crate::pipeline::types::Selection;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::f64::consts::PI;
use std::path::Path;

/// `ln(2π)`
pub(crate) fn log_2pi() -> f64 {
    (2.0 * PI).ln()
}

/// Reads and deserializes a JSON model file.
pub(crate) fn read_model_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| IvecdError::ModelLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| IvecdError::ModelLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Picks the best-scoring mixture components for every frame.
pub trait ComponentSelector: Send + Sync {
    /// Number of mixture components in the model.
    fn num_components(&self) -> usize;

    /// Returns the top-`k` component indices per frame, best first, and the
    /// total over frames of the log-sum-exp of the kept log-likelihoods.
    fn select(&self, feats: ArrayView2<f32>, k: usize) -> Result<(Selection, f64)>;
}

/// Computes log-likelihoods for a restricted set of mixture components.
pub trait PreselectLikelihood: Send + Sync {
    fn num_components(&self) -> usize;

    fn dim(&self) -> usize;

    /// Log-likelihood of `frame` under each component in `indices`, in order.
    fn log_likelihoods_preselect(&self, frame: ArrayView1<f32>, indices: &[usize])
    -> Result<Vec<f64>>;

    /// Responsibilities of `indices` for `frame` and the frame log-likelihood.
    ///
    /// The caller checks that the responsibilities sum to one.
    fn posteriors_preselect(
        &self,
        frame: ArrayView1<f32>,
        indices: &[usize],
    ) -> Result<(Vec<f64>, f64)> {
        let mut weights = self.log_likelihoods_preselect(frame, indices)?;
        let loglike = apply_softmax(&mut weights);
        Ok((weights, loglike))
    }
}

/// Estimates a fixed-length vector from accumulated statistics.
pub trait VectorExtractor: Send + Sync {
    fn num_gauss(&self) -> usize;

    fn feat_dim(&self) -> usize;

    fn ivector_dim(&self) -> usize;

    /// Mean of the prior in the first dimension.
    fn prior_offset(&self) -> f64;

    /// Objective function of `ivector` given `stats`.
    fn auxf(&self, stats: &UtteranceStats, ivector: ArrayView1<f64>) -> f64;

    /// Overwrites `ivector` with the mean of the posterior distribution.
    fn ivector_mean(&self, stats: &UtteranceStats, ivector: &mut Array1<f64>) -> Result<()>;
}

/// Mock selector: keeps the first `k` components of every frame.
#[derive(Debug, Clone)]
pub struct MockSelector {
    num_components: usize,
    frame_loglike: f64,
}

impl MockSelector {
    pub fn new(num_components: usize) -> Self {
        Self {
            num_components,
            frame_loglike: -1.0,
        }
    }

    /// Log-likelihood reported for every frame.
    pub fn with_frame_loglike(mut self, frame_loglike: f64) -> Self {
        self.frame_loglike = frame_loglike;
        self
    }
}

impl ComponentSelector for MockSelector {
    fn num_components(&self) -> usize {
        self.num_components
    }

    fn select(&self, feats: ArrayView2<f32>, k: usize) -> Result<(Selection, f64)> {
        let k = k.min(self.num_components);
        let frames = (0..feats.nrows()).map(|_| (0..k).collect()).collect();
        Ok((
            Selection::new(frames),
            self.frame_loglike * feats.nrows() as f64,
        ))
    }
}

/// Mock full-covariance model.
///
/// Component `i` scores `-i` for every frame, so lower indices dominate.
/// Frames whose first value equals the poison marker score NaN; frames
/// starting with the overweight marker get responsibilities summing to 1.5.
#[derive(Debug, Clone)]
pub struct MockFullGmm {
    num_components: usize,
    dim: usize,
    spread: f64,
    poison: Option<f32>,
    overweight: Option<f32>,
}

impl MockFullGmm {
    pub fn new(num_components: usize, dim: usize) -> Self {
        Self {
            num_components,
            dim,
            spread: 1.0,
            poison: None,
            overweight: None,
        }
    }

    /// Score gap between consecutive components.
    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = spread;
        self
    }

    /// Frames starting with `marker` produce NaN log-likelihoods.
    pub fn with_poison(mut self, marker: f32) -> Self {
        self.poison = Some(marker);
        self
    }

    /// Frames starting with `marker` get responsibilities that sum to 1.5.
    pub fn with_overweight(mut self, marker: f32) -> Self {
        self.overweight = Some(marker);
        self
    }
}

impl PreselectLikelihood for MockFullGmm {
    fn num_components(&self) -> usize {
        self.num_components
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn log_likelihoods_preselect(
        &self,
        frame: ArrayView1<f32>,
        indices: &[usize],
    ) -> Result<Vec<f64>> {
        if self.poison.is_some() && frame.get(0).copied() == self.poison {
            return Ok(vec![f64::NAN; indices.len()]);
        }
        Ok(indices
            .iter()
            .map(|&i| -(i as f64) * self.spread)
            .collect())
    }

    fn posteriors_preselect(
        &self,
        frame: ArrayView1<f32>,
        indices: &[usize],
    ) -> Result<(Vec<f64>, f64)> {
        if self.overweight.is_some() && frame.get(0).copied() == self.overweight {
            let share = 1.5 / indices.len() as f64;
            return Ok((vec![share; indices.len()], 0.0));
        }
        let mut weights = self.log_likelihoods_preselect(frame, indices)?;
        let loglike = apply_softmax(&mut weights);
        Ok((weights, loglike))
    }
}

/// Mock extractor.
///
/// The posterior mean is `[prior_offset + N, 1·N, 2·N, ...]` where `N` is the
/// total occupation count, which makes the applied posterior scale visible
/// in the written vectors.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    num_gauss: usize,
    feat_dim: usize,
    ivector_dim: usize,
    prior_offset: f64,
    should_fail: bool,
}

impl MockExtractor {
    pub fn new(num_gauss: usize, feat_dim: usize, ivector_dim: usize) -> Self {
        Self {
            num_gauss,
            feat_dim,
            ivector_dim,
            prior_offset: 100.0,
            should_fail: false,
        }
    }

    pub fn with_prior_offset(mut self, prior_offset: f64) -> Self {
        self.prior_offset = prior_offset;
        self
    }

    /// Configure the mock to fail every extraction.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl VectorExtractor for MockExtractor {
    fn num_gauss(&self) -> usize {
        self.num_gauss
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
        let target = self.prior_offset + stats.total_count();
        -(ivector[0] - target).powi(2)
    }

    fn ivector_mean(&self, stats: &UtteranceStats, ivector: &mut Array1<f64>) -> Result<()> {
        if self.should_fail {
            return Err(IvecdError::Other("mock extraction failure".to_string()));
        }
        let count = stats.total_count();
        for (r, value) in ivector.iter_mut().enumerate() {
            *value = r as f64 * count;
        }
        ivector[0] = self.prior_offset + count;
        Ok(())
    }
}
