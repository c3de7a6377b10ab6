use crate::archive::ArchiveSpec;
use crate::error::{IvecdError, Result};
use crate::pipeline::types::Utterance;
use ndarray::Array2;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// Sequential source of utterances, in archive order.
pub trait FeatureReader: Send {
    /// Returns the next utterance, or `None` at end of archive.
    fn next_utterance(&mut self) -> Result<Option<Utterance>>;
}

#[derive(Deserialize)]
struct FeatureRecord {
    key: String,
    feats: Vec<Vec<f32>>,
}

/// Reads `{"key": ..., "feats": [[...], ...]}` lines.
pub struct JsonlFeatureReader {
    spec: String,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl JsonlFeatureReader {
    pub fn open(spec: &ArchiveSpec) -> Result<Self> {
        let file = File::open(&spec.path).map_err(|e| IvecdError::ArchiveRead {
            spec: spec.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            spec: spec.to_string(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    fn read_error(&self, message: impl Into<String>) -> IvecdError {
        IvecdError::ArchiveRead {
            spec: self.spec.clone(),
            message: format!("line {}: {}", self.line_no, message.into()),
        }
    }

    fn to_matrix(&self, record: FeatureRecord) -> Result<Utterance> {
        let rows = record.feats.len();
        let cols = record.feats.first().map_or(0, Vec::len);
        if let Some(bad) = record.feats.iter().position(|row| row.len() != cols) {
            return Err(self.read_error(format!(
                "utterance {}: row {} has {} columns, expected {}",
                record.key,
                bad,
                record.feats[bad].len(),
                cols
            )));
        }
        let flat: Vec<f32> = record.feats.into_iter().flatten().collect();
        let feats = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| self.read_error(e.to_string()))?;
        Ok(Utterance::new(record.key, feats))
    }
}

impl FeatureReader for JsonlFeatureReader {
    fn next_utterance(&mut self) -> Result<Option<Utterance>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line.map_err(|e| self.read_error(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FeatureRecord =
                serde_json::from_str(&line).map_err(|e| self.read_error(e.to_string()))?;
            return self.to_matrix(record).map(Some);
        }
    }
}

/// In-memory reader for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureReader {
    utterances: VecDeque<Utterance>,
}

impl MemoryFeatureReader {
    pub fn new(utterances: impl IntoIterator<Item = Utterance>) -> Self {
        Self {
            utterances: utterances.into_iter().collect(),
        }
    }
}

impl FeatureReader for MemoryFeatureReader {
    fn next_utterance(&mut self) -> Result<Option<Utterance>> {
        Ok(self.utterances.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reader_for(contents: &str) -> (NamedTempFile, JsonlFeatureReader) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let spec = ArchiveSpec::parse(file.path().to_str().unwrap()).unwrap();
        let reader = JsonlFeatureReader::open(&spec).unwrap();
        (file, reader)
    }

    #[test]
    fn reads_utterances_in_order_and_skips_blank_lines() {
        let (_file, mut reader) = reader_for(
            "{\"key\":\"a\",\"feats\":[[1.0,2.0],[3.0,4.0]]}\n\n{\"key\":\"b\",\"feats\":[[5.0,6.0]]}\n",
        );

        let a = reader.next_utterance().unwrap().unwrap();
        assert_eq!(a.key, "a");
        assert_eq!(a.feats.dim(), (2, 2));
        assert_eq!(a.feats[[1, 0]], 3.0);

        let b = reader.next_utterance().unwrap().unwrap();
        assert_eq!(b.key, "b");
        assert_eq!(b.num_frames(), 1);

        assert!(reader.next_utterance().unwrap().is_none());
    }

    #[test]
    fn empty_feats_is_zero_frames() {
        let (_file, mut reader) = reader_for("{\"key\":\"empty\",\"feats\":[]}\n");
        let utt = reader.next_utterance().unwrap().unwrap();
        assert_eq!(utt.num_frames(), 0);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let (_file, mut reader) = reader_for("{\"key\":\"bad\",\"feats\":[[1.0,2.0],[3.0]]}\n");
        let err = reader.next_utterance().unwrap_err();
        assert!(err.to_string().contains("row 1 has 1 columns, expected 2"));
    }

    #[test]
    fn malformed_json_reports_line_number() {
        let (_file, mut reader) = reader_for("{\"key\":\"a\",\"feats\":[[1.0]]}\nnot json\n");
        reader.next_utterance().unwrap();
        let err = reader.next_utterance().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn memory_reader_yields_in_order() {
        let mut reader = MemoryFeatureReader::new(vec![
            Utterance::new("x", Array2::zeros((1, 1))),
            Utterance::new("y", Array2::zeros((2, 1))),
        ]);
        assert_eq!(reader.next_utterance().unwrap().unwrap().key, "x");
        assert_eq!(reader.next_utterance().unwrap().unwrap().key, "y");
        assert!(reader.next_utterance().unwrap().is_none());
    }
}
