//! Stage 3: i-vector extraction on the task pool.
//!
//! The submitting thread validates and scales each posterior, then hands an
//! [`ExtractionTask`] to the pool. Workers accumulate statistics and estimate
//! the vector; the completion callback writes it, also after a failed run,
//! and updates the shared totals.

use crate::archive::SharedWriter;
use crate::config::ExtractConfig;
use crate::error::{IvecdError, Result};
use crate::model::VectorExtractor;
use crate::pipeline::accum::{RunAccumulators, Totals};
use crate::pipeline::error::{UtteranceFault, report_fault};
use crate::pipeline::per_frame;
use crate::pipeline::pool::{Task, TaskPool};
use crate::pipeline::stats::UtteranceStats;
use crate::pipeline::types::{Posterior, Utterance};
use ndarray::{Array1, Array2};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extraction of one utterance, owned by the pool until it completes.
pub struct ExtractionTask {
    extractor: Arc<dyn VectorExtractor>,
    key: String,
    feats: Array2<f32>,
    posterior: Posterior,
    weighted_frames: f64,
    compute_objf_change: bool,
    ivector: Array1<f64>,
    auxf_change: Option<f64>,
    sink: SharedWriter,
    accum: Arc<RunAccumulators>,
}

impl ExtractionTask {
    /// Zero vector with the prior offset in the first dimension.
    fn prior_mean(extractor: &dyn VectorExtractor) -> Array1<f64> {
        let mut ivector = Array1::zeros(extractor.ivector_dim());
        if let Some(first) = ivector.get_mut(0) {
            *first = extractor.prior_offset();
        }
        ivector
    }

    fn estimate(&mut self) -> Result<()> {
        let extractor = Arc::clone(&self.extractor);
        if self.ivector.is_empty() {
            return Err(IvecdError::ModelMismatch {
                message: "extractor has zero i-vector dimension".to_string(),
            });
        }
        let mut stats = UtteranceStats::new(extractor.num_gauss(), extractor.feat_dim());
        stats.accumulate(self.feats.view(), &self.posterior)?;

        if self.compute_objf_change {
            let old_auxf = extractor.auxf(&stats, self.ivector.view());
            extractor.ivector_mean(&stats, &mut self.ivector)?;
            let new_auxf = extractor.auxf(&stats, self.ivector.view());
            self.auxf_change = Some(new_auxf - old_auxf);
        } else {
            extractor.ivector_mean(&stats, &mut self.ivector)?;
        }
        Ok(())
    }

    fn write_result(&mut self) -> Result<()> {
        // Persisted vectors are offsets from the prior mean.
        if let Some(first) = self.ivector.get_mut(0) {
            *first -= self.extractor.prior_offset();
        }
        debug!(
            "Ivector norm for utterance {} was {}",
            self.key,
            self.ivector.dot(&self.ivector).sqrt()
        );

        let vector: Vec<f32> = self.ivector.iter().map(|&v| v as f32).collect();
        self.sink.lock().write(&self.key, &vector)
    }
}

impl Task for ExtractionTask {
    fn run(&mut self) -> Result<()> {
        self.estimate().map_err(|e| IvecdError::Extraction {
            utterance: self.key.clone(),
            message: e.to_string(),
        })
    }

    /// Writes whatever vector the task holds, even after a failed run.
    fn complete(mut self, outcome: Result<()>) {
        if let Err(e) = &outcome {
            warn!("Failed to extract i-vector for utterance {}: {}", self.key, e);
        }
        let written = self.write_result();
        if let Err(e) = &written {
            warn!("Failed to write i-vector for utterance {}: {}", self.key, e);
        }
        if outcome.is_err() || written.is_err() {
            self.accum.record_error();
            return;
        }

        if let Some(change) = self.auxf_change {
            debug!(
                "Auxf change for utterance {} was {} per frame over {} frames (weighted)",
                self.key,
                per_frame(change, self.weighted_frames),
                self.weighted_frames
            );
            self.accum.add_auxf_change(change);
        }
        self.accum.record_done();
    }
}

/// Scales posteriors and schedules extraction tasks.
pub struct ExtractStage {
    extractor: Arc<dyn VectorExtractor>,
    acoustic_weight: f64,
    max_count: f64,
    compute_objf_change: bool,
}

impl ExtractStage {
    pub fn new(extractor: Arc<dyn VectorExtractor>, config: &ExtractConfig) -> Self {
        Self {
            extractor,
            acoustic_weight: config.acoustic_weight,
            max_count: config.max_count,
            compute_objf_change: config.compute_objf_change,
        }
    }

    pub fn compute_objf_change(&self) -> bool {
        self.compute_objf_change
    }

    /// Returns the scale applied to `posterior` and the resulting weighted frame count.
    pub fn posterior_scale(&self, key: &str, posterior: &Posterior) -> (f64, f64) {
        let mut this_t = self.acoustic_weight * posterior.total();
        let mut max_count_scale = 1.0;
        if self.max_count > 0.0 && this_t > self.max_count {
            max_count_scale = self.max_count / this_t;
            info!(
                "Scaling stats for utterance {} by scale {} due to --max-count={}",
                key, max_count_scale, self.max_count
            );
            this_t = self.max_count;
        }
        (self.acoustic_weight * max_count_scale, this_t)
    }

    /// Validates, scales and submits one utterance.
    ///
    /// Returns `Ok(false)` if the utterance was skipped; the skip has been
    /// logged and counted in `accum`. Blocks while the pool queue is full.
    pub fn submit(
        &self,
        utt: Utterance,
        mut posterior: Posterior,
        pool: &TaskPool<ExtractionTask>,
        sink: &SharedWriter,
        accum: &Arc<RunAccumulators>,
    ) -> Result<bool> {
        if posterior.num_frames() != utt.num_frames() {
            let fault = UtteranceFault::FrameCountMismatch {
                posterior: posterior.num_frames(),
                features: utt.num_frames(),
            };
            report_fault("extract", &utt.key, &fault);
            accum.record_error();
            return Ok(false);
        }

        let (scale, this_t) = self.posterior_scale(&utt.key, &posterior);
        posterior.scale(scale);
        accum.add_weighted_frames(this_t);

        pool.submit(ExtractionTask {
            extractor: Arc::clone(&self.extractor),
            key: utt.key,
            feats: utt.feats,
            posterior,
            weighted_frames: this_t,
            compute_objf_change: self.compute_objf_change,
            ivector: ExtractionTask::prior_mean(self.extractor.as_ref()),
            auxf_change: None,
            sink: Arc::clone(sink),
            accum: Arc::clone(accum),
        })?;
        Ok(true)
    }
}

/// Logs the end-of-request extraction summary.
pub fn log_summary(totals: &Totals, compute_objf_change: bool) {
    info!(
        "Done {} files, {} with errors. Total (weighted) frames {}",
        totals.num_done, totals.num_err, totals.tot_t
    );
    if compute_objf_change {
        info!(
            "Overall average objective-function change from estimating ivector was {} per frame over {} (weighted) frames.",
            totals.auxf_change_per_frame(),
            totals.tot_t
        );
    }
}
