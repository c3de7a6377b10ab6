//! Stage 2: pruned posteriors from the full-covariance GMM.
//!
//! For every frame the shortlisted components are scored, the scores are
//! turned into responsibilities with a softmax, and the log normalizer is
//! the frame's log-likelihood. Responsibilities below `min_post` are pruned
//! and the survivors renormalized.

use crate::config::PosteriorConfig;
use crate::defaults;
use crate::error::Result;
use crate::model::PreselectLikelihood;
use crate::pipeline::error::{UtteranceFault, report_fault};
use crate::pipeline::per_frame;
use crate::pipeline::types::{Posterior, Selection, Utterance};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-request diagnostics of the posterior stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosteriorStats {
    pub num_done: usize,
    pub num_err: usize,
    pub tot_loglike: f64,
    pub tot_frames: f64,
    pub tot_posts: u64,
}

impl PosteriorStats {
    pub fn loglike_per_frame(&self) -> f64 {
        per_frame(self.tot_loglike, self.tot_frames)
    }

    pub fn entries_per_frame(&self) -> f64 {
        per_frame(self.tot_posts as f64, self.tot_frames)
    }

    /// Logs the end-of-request summary.
    pub fn log_summary(&self) {
        info!(
            "Posteriors: done {} files; {} had errors",
            self.num_done, self.num_err
        );
        info!(
            "Overall loglike per frame is {} with {} entries per frame, over {} frames",
            self.loglike_per_frame(),
            self.entries_per_frame(),
            self.tot_frames
        );
    }
}

/// Replaces `values` with `exp(values - lse)` and returns `lse = ln Σ exp(values)`.
pub fn apply_softmax(values: &mut [f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    let lse = max + sum.ln();
    for v in values.iter_mut() {
        *v = (*v - lse).exp();
    }
    lse
}

/// Turns normalized responsibilities for one frame into a sparse posterior.
///
/// `weights[i]` belongs to component `indices[i]`. The weights must sum to
/// one within [`defaults::POSTERIOR_SUM_TOLERANCE`]. With `min_post > 0`,
/// weights below it are zeroed; if that removes everything, the frame is
/// assigned entirely to the best component, otherwise survivors are
/// renormalized.
pub fn prune_frame(
    frame: usize,
    indices: &[usize],
    mut weights: Vec<f64>,
    min_post: f32,
) -> std::result::Result<Vec<(usize, f32)>, UtteranceFault> {
    let sum: f64 = weights.iter().sum();
    if !((sum - 1.0).abs() <= defaults::POSTERIOR_SUM_TOLERANCE) {
        return Err(UtteranceFault::BadPosteriorSum { frame, sum });
    }

    if min_post > 0.0 {
        let min_post = min_post as f64;
        // First maximum wins on ties.
        let mut max_index = 0;
        for (i, &w) in weights.iter().enumerate() {
            if w > weights[max_index] {
                max_index = i;
            }
        }
        for w in weights.iter_mut() {
            if *w < min_post {
                *w = 0.0;
            }
        }
        let kept: f64 = weights.iter().sum();
        if kept == 0.0 {
            weights[max_index] = 1.0;
        } else {
            for w in weights.iter_mut() {
                *w /= kept;
            }
        }
    }

    let entries: Vec<(usize, f32)> = indices
        .iter()
        .zip(weights)
        .map(|(&gauss, w)| (gauss, w as f32))
        .filter(|&(_, w)| w > 0.0)
        .collect();
    if entries.is_empty() {
        return Err(UtteranceFault::EmptySelection { frame });
    }
    Ok(entries)
}

/// Computes sparse per-frame posteriors from the shortlist.
pub struct PosteriorStage {
    fgmm: Arc<dyn PreselectLikelihood>,
    min_post: f32,
}

impl PosteriorStage {
    pub fn new(fgmm: Arc<dyn PreselectLikelihood>, config: &PosteriorConfig) -> Self {
        Self {
            fgmm,
            min_post: config.min_post,
        }
    }

    /// Computes the posterior of `utt` restricted to `selection`.
    ///
    /// Returns `Ok(None)` if the utterance was rejected; the fault has been
    /// logged and counted. Model errors are returned as `Err`.
    pub fn process(
        &self,
        utt: &Utterance,
        selection: &Selection,
        stats: &mut PosteriorStats,
    ) -> Result<Option<Posterior>> {
        match self.compute(utt, selection)? {
            Ok((posterior, loglike)) => {
                let num_frames = utt.num_frames();
                debug!(
                    "Like/frame for utt {} was {} per frame over {} frames.",
                    utt.key,
                    per_frame(loglike, num_frames as f64),
                    num_frames
                );
                stats.num_done += 1;
                stats.tot_loglike += loglike;
                stats.tot_frames += num_frames as f64;
                stats.tot_posts += posterior.num_entries() as u64;
                Ok(Some(posterior))
            }
            Err(fault) => {
                report_fault("posterior", &utt.key, &fault);
                stats.num_err += 1;
                Ok(None)
            }
        }
    }

    fn compute(
        &self,
        utt: &Utterance,
        selection: &Selection,
    ) -> Result<std::result::Result<(Posterior, f64), UtteranceFault>> {
        if selection.num_frames() != utt.num_frames() {
            return Ok(Err(UtteranceFault::FrameCountMismatch {
                posterior: selection.num_frames(),
                features: utt.num_frames(),
            }));
        }

        let mut frames = Vec::with_capacity(utt.num_frames());
        let mut tot_loglike = 0.0;
        for (t, (frame, indices)) in utt.feats.rows().into_iter().zip(&selection.frames).enumerate()
        {
            if indices.is_empty() {
                return Ok(Err(UtteranceFault::EmptySelection { frame: t }));
            }
            let (weights, loglike) = self.fgmm.posteriors_preselect(frame, indices)?;
            tot_loglike += loglike;
            match prune_frame(t, indices, weights, self.min_post) {
                Ok(entries) => frames.push(entries),
                Err(fault) => return Ok(Err(fault)),
            }
        }
        Ok(Ok((Posterior::new(frames), tot_loglike)))
    }
}
