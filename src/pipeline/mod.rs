//! Per-request i-vector pipeline.
//!
//! Gaussian selection and posterior computation run on the request thread;
//! extraction runs on a bounded worker pool fed through a crossbeam channel
//! for backpressure.

pub mod accum;
pub mod batch;
pub mod error;
pub mod extract;
pub mod gselect;
pub mod pool;
pub mod posterior;
pub mod stats;
pub mod types;

pub use accum::{RunAccumulators, Totals};
pub use batch::{BatchPipeline, BatchReport, Models, StageTimings};
pub use error::UtteranceFault;
pub use extract::{ExtractStage, ExtractionTask};
pub use gselect::{GselectStage, GselectStats};
pub use pool::{Task, TaskPool};
pub use posterior::{PosteriorStage, PosteriorStats};
pub use stats::UtteranceStats;
pub use types::{Posterior, Selection, Utterance};

/// `total / frames`, or zero when there are no frames.
pub fn per_frame(total: f64, frames: f64) -> f64 {
    if frames == 0.0 { 0.0 } else { total / frames }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_guards_zero_frames() {
        assert_eq!(per_frame(10.0, 4.0), 2.5);
        assert_eq!(per_frame(10.0, 0.0), 0.0);
        assert_eq!(per_frame(0.0, 0.0), 0.0);
    }
}
