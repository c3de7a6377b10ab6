//! Per-request totals shared between the submitting thread and workers.

use parking_lot::Mutex;

/// Snapshot of the extraction totals for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    /// Utterances whose vector was written.
    pub num_done: usize,
    /// Utterances skipped or failed during extraction.
    pub num_err: usize,
    /// Weighted frame count over all submitted utterances.
    pub tot_t: f64,
    /// Sum of per-utterance objective-function changes.
    pub tot_auxf_change: f64,
}

impl Totals {
    /// Average objective-function change per weighted frame.
    pub fn auxf_change_per_frame(&self) -> f64 {
        crate::pipeline::per_frame(self.tot_auxf_change, self.tot_t)
    }
}

/// Lock-guarded accumulator updated concurrently by completing tasks.
#[derive(Debug, Default)]
pub struct RunAccumulators {
    totals: Mutex<Totals>,
}

impl RunAccumulators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_weighted_frames(&self, frames: f64) {
        self.totals.lock().tot_t += frames;
    }

    pub fn add_auxf_change(&self, change: f64) {
        self.totals.lock().tot_auxf_change += change;
    }

    pub fn record_done(&self) {
        self.totals.lock().num_done += 1;
    }

    pub fn record_error(&self) {
        self.totals.lock().num_err += 1;
    }

    pub fn snapshot(&self) -> Totals {
        *self.totals.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_updates_are_not_lost() {
        let accum = Arc::new(RunAccumulators::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let accum = Arc::clone(&accum);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        accum.add_auxf_change(0.5);
                        accum.add_weighted_frames(1.0);
                        accum.record_done();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let totals = accum.snapshot();
        assert_eq!(totals.num_done, 8000);
        assert_eq!(totals.tot_t, 8000.0);
        assert_eq!(totals.tot_auxf_change, 4000.0);
        assert_eq!(totals.auxf_change_per_frame(), 0.5);
    }

    #[test]
    fn per_frame_average_with_no_frames_is_zero() {
        let totals = Totals::default();
        assert_eq!(totals.auxf_change_per_frame(), 0.0);
    }
}
