//! Feature and vector archives.
//!
//! A request names its input with an archive specifier of the form
//! `[jsonl:]<path>`. Utterances are read sequentially in archive order and
//! vectors are appended to the output archive in completion order.

pub mod reader;
pub mod writer;

pub use reader::{FeatureReader, JsonlFeatureReader, MemoryFeatureReader};
pub use writer::{JsonlVectorWriter, MemoryVectorWriter, SharedWriter, VectorWriter, shared};

use crate::error::{IvecdError, Result};
use std::fmt;
use std::path::PathBuf;

/// Storage formats understood by the archive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// One JSON object per line.
    Jsonl,
}

/// A parsed archive specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub format: ArchiveFormat,
    pub path: PathBuf,
}

impl ArchiveSpec {
    /// Parses `[jsonl:]<path>`.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |message: &str| IvecdError::ArchiveSpec {
            spec: spec.to_string(),
            message: message.to_string(),
        };

        let path = match spec.split_once(':') {
            Some(("jsonl", rest)) => rest,
            Some((prefix, _)) if !prefix.is_empty() && !prefix.contains(['/', '\\', '.']) => {
                return Err(invalid(&format!("unsupported archive type '{}'", prefix)));
            }
            _ => spec,
        };

        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if path == "-" {
            return Err(invalid("standard input/output is not supported"));
        }

        Ok(Self {
            format: ArchiveFormat::Jsonl,
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for ArchiveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            ArchiveFormat::Jsonl => write!(f, "jsonl:{}", self.path.display()),
        }
    }
}

/// Opens the feature archive named by `spec` for sequential reading.
pub fn open_reader(spec: &str) -> Result<Box<dyn FeatureReader>> {
    let spec = ArchiveSpec::parse(spec)?;
    match spec.format {
        ArchiveFormat::Jsonl => Ok(Box::new(JsonlFeatureReader::open(&spec)?)),
    }
}

/// Opens the vector archive named by `spec` for appending.
pub fn open_writer(spec: &str) -> Result<SharedWriter> {
    let spec = ArchiveSpec::parse(spec)?;
    match spec.format {
        ArchiveFormat::Jsonl => Ok(shared(JsonlVectorWriter::append(&spec)?)),
    }
}
