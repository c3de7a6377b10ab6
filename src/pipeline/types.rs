//! Data types that flow between the pipeline stages.

use ndarray::Array2;

/// One keyed record read from a feature archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Unique key within the archive.
    pub key: String,
    /// Feature matrix, one row per frame.
    pub feats: Array2<f32>,
}

impl Utterance {
    /// Creates a new utterance.
    pub fn new(key: impl Into<String>, feats: Array2<f32>) -> Self {
        Self {
            key: key.into(),
            feats,
        }
    }

    /// Number of frames (rows of the feature matrix).
    pub fn num_frames(&self) -> usize {
        self.feats.nrows()
    }
}

/// Per-frame shortlist of mixture-component indices for one utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub frames: Vec<Vec<usize>>,
}

impl Selection {
    pub fn new(frames: Vec<Vec<usize>>) -> Self {
        Self { frames }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

/// Per-frame sparse `(component, weight)` lists for one utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Posterior {
    frames: Vec<Vec<(usize, f32)>>,
}

impl Posterior {
    pub fn new(frames: Vec<Vec<(usize, f32)>>) -> Self {
        Self { frames }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Vec<(usize, f32)>] {
        &self.frames
    }

    /// Total number of `(component, weight)` entries over all frames.
    pub fn num_entries(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Sum of all weights, i.e. the weighted frame count.
    pub fn total(&self) -> f64 {
        self.frames
            .iter()
            .flat_map(|frame| frame.iter())
            .map(|&(_, weight)| weight as f64)
            .sum()
    }

    /// Multiplies every weight by `scale`.
    pub fn scale(&mut self, scale: f64) {
        if scale == 1.0 {
            return;
        }
        for frame in &mut self.frames {
            for (_, weight) in frame.iter_mut() {
                *weight = (*weight as f64 * scale) as f32;
            }
        }
    }
}
