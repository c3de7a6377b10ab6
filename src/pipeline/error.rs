//! Per-utterance data faults.
//!
//! A fault removes one utterance from the batch; the rest of the batch
//! carries on. Faults are counted by the stage that detects them.

use std::fmt;
use tracing::warn;

/// Reasons an utterance is dropped from the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UtteranceFault {
    /// Posterior and features disagree on the number of frames.
    FrameCountMismatch { posterior: usize, features: usize },
    /// A frame's responsibilities did not sum to one (NaN included).
    BadPosteriorSum { frame: usize, sum: f64 },
    /// Gaussian selection produced no candidates for a frame.
    EmptySelection { frame: usize },
}

impl fmt::Display for UtteranceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtteranceFault::FrameCountMismatch {
                posterior,
                features,
            } => write!(
                f,
                "size mismatch between posterior {} and features {}",
                posterior, features
            ),
            UtteranceFault::BadPosteriorSum { frame, sum } => {
                write!(f, "bad posterior-sum {} at frame {} (NaN?)", sum, frame)
            }
            UtteranceFault::EmptySelection { frame } => {
                write!(f, "empty Gaussian selection at frame {}", frame)
            }
        }
    }
}

impl std::error::Error for UtteranceFault {}

/// Logs a skipped utterance.
pub fn report_fault(stage: &str, utterance: &str, fault: &UtteranceFault) {
    warn!("[{}] Skipping utterance {}: {}", stage, utterance, fault);
}
