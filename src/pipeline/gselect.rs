//! Stage 1: Gaussian preselection with the diagonal GMM.

use crate::config::GselectConfig;
use crate::defaults;
use crate::error::Result;
use crate::model::ComponentSelector;
use crate::pipeline::per_frame;
use crate::pipeline::types::{Selection, Utterance};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-request diagnostics of the selection stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GselectStats {
    pub num_done: usize,
    pub tot_like: f64,
    pub tot_frames: u64,
}

impl GselectStats {
    /// Average log-likelihood per frame over the request.
    pub fn like_per_frame(&self) -> f64 {
        per_frame(self.tot_like, self.tot_frames as f64)
    }

    /// Logs the end-of-request summary.
    pub fn log_summary(&self) {
        info!(
            "Gaussian selection: done {} files, average UBM log-likelihood is {} over {} frames",
            self.num_done,
            self.like_per_frame(),
            self.tot_frames
        );
    }
}

/// Computes per-frame shortlists of the best `num_gselect` components.
pub struct GselectStage {
    selector: Arc<dyn ComponentSelector>,
    num_gselect: usize,
}

impl GselectStage {
    /// Creates the stage, clamping the shortlist size to the model size.
    pub fn new(selector: Arc<dyn ComponentSelector>, config: &GselectConfig) -> Self {
        let num_gauss = selector.num_components();
        let mut num_gselect = config.num_gselect;
        if num_gselect > num_gauss {
            warn!(
                "You asked for {} Gaussians but GMM only has {}, returning this many. \
                 Note: this means the Gaussian selection is pointless.",
                num_gselect, num_gauss
            );
            num_gselect = num_gauss;
        }
        Self {
            selector,
            num_gselect,
        }
    }

    /// Shortlist size after clamping.
    pub fn num_gselect(&self) -> usize {
        self.num_gselect
    }

    /// Shortlists every frame of `utt`. No utterance is rejected here.
    pub fn process(&self, utt: &Utterance, stats: &mut GselectStats) -> Result<Selection> {
        let (selection, tot_like_this_file) =
            self.selector.select(utt.feats.view(), self.num_gselect)?;
        let num_frames = utt.num_frames();

        if stats.num_done % defaults::GSELECT_LOG_INTERVAL == 0 {
            info!(
                "For {}'th file, average UBM likelihood over {} frames is {}",
                stats.num_done,
                num_frames,
                per_frame(tot_like_this_file, num_frames as f64)
            );
        }

        stats.tot_frames += num_frames as u64;
        stats.tot_like += tot_like_this_file;
        stats.num_done += 1;
        Ok(selection)
    }
}
