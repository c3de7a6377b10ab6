//! One request, end to end.
//!
//! The feature archive is read once. Each utterance is shortlisted, turned
//! into a pruned posterior and submitted for extraction before the next one
//! is read, so selections and posteriors never outlive their utterance. The
//! run returns only after the pool has drained and the writer is flushed.

use crate::archive::{FeatureReader, SharedWriter};
use crate::config::{Config, PoolConfig};
use crate::error::Result;
use crate::model::{ComponentSelector, PreselectLikelihood, VectorExtractor};
use crate::pipeline::accum::{RunAccumulators, Totals};
use crate::pipeline::extract::{self, ExtractStage, ExtractionTask};
use crate::pipeline::gselect::{GselectStage, GselectStats};
use crate::pipeline::posterior::{PosteriorStage, PosteriorStats};
use crate::pipeline::pool::TaskPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// The three models, loaded once and shared read-only.
#[derive(Clone)]
pub struct Models {
    pub diag: Arc<dyn ComponentSelector>,
    pub full: Arc<dyn PreselectLikelihood>,
    pub extractor: Arc<dyn VectorExtractor>,
}

/// Time spent in each stage during one request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub gselect: Duration,
    pub posterior: Duration,
    /// Submission, including time blocked on a full queue, plus the final drain.
    pub extract: Duration,
}

/// Outcome of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub gselect: GselectStats,
    pub posterior: PosteriorStats,
    pub extract: Totals,
    pub timings: StageTimings,
}

impl BatchReport {
    /// A request succeeds if at least one vector was written.
    pub fn success(&self) -> bool {
        self.extract.num_done > 0
    }

    /// Utterances dropped anywhere in the pipeline.
    pub fn num_err(&self) -> usize {
        self.posterior.num_err + self.extract.num_err
    }
}

/// Runs the fused selection, posterior and extraction stages over a batch.
pub struct BatchPipeline {
    gselect: GselectStage,
    posterior: PosteriorStage,
    extract: ExtractStage,
    pool: PoolConfig,
}

impl BatchPipeline {
    pub fn new(models: Models, config: &Config) -> Self {
        Self {
            gselect: GselectStage::new(models.diag, &config.gselect),
            posterior: PosteriorStage::new(models.full, &config.posterior),
            extract: ExtractStage::new(models.extractor, &config.extract),
            pool: config.pool.clone(),
        }
    }

    /// Processes every utterance from `reader`, writing vectors to `writer`.
    ///
    /// Data faults skip single utterances. Reader and model errors stop the
    /// batch; tasks already submitted still complete and are written before
    /// the error is returned.
    pub fn run(&self, reader: &mut dyn FeatureReader, writer: SharedWriter) -> Result<BatchReport> {
        let pool = TaskPool::new(&self.pool)?;
        let accum = Arc::new(RunAccumulators::new());
        let mut report = BatchReport::default();

        let fed = self.feed(reader, &pool, &writer, &accum, &mut report);

        let drain_start = Instant::now();
        pool.drain();
        report.timings.extract += drain_start.elapsed();
        let flushed = writer.lock().flush();
        report.extract = accum.snapshot();

        report.gselect.log_summary();
        report.posterior.log_summary();
        extract::log_summary(&report.extract, self.extract.compute_objf_change());
        info!(
            "Stage times: gselect {:.3}s, posterior {:.3}s, extract {:.3}s",
            report.timings.gselect.as_secs_f64(),
            report.timings.posterior.as_secs_f64(),
            report.timings.extract.as_secs_f64()
        );

        if let Err(e) = &fed {
            error!("Batch stopped early: {}", e);
        }
        fed?;
        flushed?;
        Ok(report)
    }

    fn feed(
        &self,
        reader: &mut dyn FeatureReader,
        pool: &TaskPool<ExtractionTask>,
        writer: &SharedWriter,
        accum: &Arc<RunAccumulators>,
        report: &mut BatchReport,
    ) -> Result<()> {
        while let Some(utt) = reader.next_utterance()? {
            let start = Instant::now();
            let selection = self.gselect.process(&utt, &mut report.gselect)?;
            let selected = Instant::now();
            report.timings.gselect += selected - start;

            let posterior = self
                .posterior
                .process(&utt, &selection, &mut report.posterior)?;
            let posted = Instant::now();
            report.timings.posterior += posted - selected;

            if let Some(posterior) = posterior {
                self.extract.submit(utt, posterior, pool, writer, accum)?;
                report.timings.extract += posted.elapsed();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{MemoryFeatureReader, MemoryVectorWriter, shared};
    use crate::model::{MockExtractor, MockFullGmm, MockSelector};
    use crate::pipeline::types::Utterance;
    use ndarray::Array2;

    fn models() -> Models {
        Models {
            diag: Arc::new(MockSelector::new(16)),
            full: Arc::new(MockFullGmm::new(16, 2).with_poison(9.0)),
            extractor: Arc::new(MockExtractor::new(16, 2, 3)),
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.gselect.num_gselect = 5;
        config.pool.num_threads = 2;
        config.pool.queue_depth = 1;
        config
    }

    fn run(utterances: Vec<Utterance>) -> (Result<BatchReport>, MemoryVectorWriter) {
        let output = MemoryVectorWriter::new();
        let pipeline = BatchPipeline::new(models(), &config());
        let mut reader = MemoryFeatureReader::new(utterances);
        (pipeline.run(&mut reader, shared(output.clone())), output)
    }

    #[test]
    fn every_clean_utterance_is_written() {
        let utts = (0..6)
            .map(|i| Utterance::new(format!("utt{}", i), Array2::zeros((3 + i, 2))))
            .collect();
        let (report, output) = run(utts);
        let report = report.unwrap();

        assert!(report.success());
        assert_eq!(report.extract.num_done, 6);
        assert_eq!(report.num_err(), 0);
        assert_eq!(output.entries().len(), 6);
        assert_eq!(report.gselect.tot_frames, (3..9).sum::<usize>() as u64);
    }

    #[test]
    fn faulty_utterance_does_not_affect_others() {
        let mut poisoned = Array2::zeros((4, 2));
        poisoned[[2, 0]] = 9.0;
        let utts = vec![
            Utterance::new("a", Array2::zeros((4, 2))),
            Utterance::new("bad", poisoned),
            Utterance::new("c", Array2::zeros((4, 2))),
        ];
        let (report, output) = run(utts);
        let report = report.unwrap();

        assert_eq!(report.extract.num_done, 2);
        assert_eq!(report.posterior.num_err, 1);
        assert!(output.get("bad").is_none());
        assert_eq!(output.get("a"), output.get("c"));
    }

    #[test]
    fn empty_batch_reports_failure() {
        let (report, output) = run(Vec::new());
        let report = report.unwrap();
        assert!(!report.success());
        assert!(output.entries().is_empty());
    }

    #[test]
    fn model_error_stops_batch_after_draining() {
        struct BrokenSelector;
        impl ComponentSelector for BrokenSelector {
            fn num_components(&self) -> usize {
                4
            }
            fn select(
                &self,
                feats: ndarray::ArrayView2<f32>,
                k: usize,
            ) -> Result<(crate::pipeline::types::Selection, f64)> {
                if feats.nrows() > 5 {
                    return Err(crate::error::IvecdError::ModelMismatch {
                        message: "too long".to_string(),
                    });
                }
                MockSelector::new(4).select(feats, k)
            }
        }

        let output = MemoryVectorWriter::new();
        let pipeline = BatchPipeline::new(
            Models {
                diag: Arc::new(BrokenSelector),
                ..models()
            },
            &config(),
        );
        let mut reader = MemoryFeatureReader::new(vec![
            Utterance::new("first", Array2::zeros((2, 2))),
            Utterance::new("long", Array2::zeros((8, 2))),
            Utterance::new("never", Array2::zeros((2, 2))),
        ]);

        assert!(pipeline.run(&mut reader, shared(output.clone())).is_err());
        assert!(output.get("first").is_some());
        assert!(output.get("never").is_none());
    }
}
