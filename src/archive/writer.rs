use crate::archive::ArchiveSpec;
use crate::error::{IvecdError, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// Sink for `(key, vector)` pairs. Writes may arrive in any order.
pub trait VectorWriter: Send {
    fn write(&mut self, key: &str, vector: &[f32]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Writer shared by concurrently completing extraction tasks.
pub type SharedWriter = Arc<parking_lot::Mutex<dyn VectorWriter>>;

/// Wraps `writer` for sharing across worker threads.
pub fn shared(writer: impl VectorWriter + 'static) -> SharedWriter {
    Arc::new(parking_lot::Mutex::new(writer))
}

#[derive(Serialize)]
struct VectorRecord<'a> {
    key: &'a str,
    vector: &'a [f32],
}

/// Appends `{"key": ..., "vector": [...]}` lines to a file.
pub struct JsonlVectorWriter {
    spec: String,
    out: BufWriter<File>,
}

impl JsonlVectorWriter {
    /// Opens `spec` for appending, creating the file if needed.
    pub fn append(spec: &ArchiveSpec) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.path)
            .map_err(|e| IvecdError::ArchiveWrite {
                spec: spec.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            spec: spec.to_string(),
            out: BufWriter::new(file),
        })
    }

    fn write_error(&self, message: String) -> IvecdError {
        IvecdError::ArchiveWrite {
            spec: self.spec.clone(),
            message,
        }
    }
}

impl VectorWriter for JsonlVectorWriter {
    fn write(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        let line = serde_json::to_string(&VectorRecord { key, vector })?;
        writeln!(self.out, "{}", line).map_err(|e| self.write_error(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|e| self.write_error(e.to_string()))
    }
}

/// In-memory writer for tests. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorWriter {
    entries: Arc<parking_lot::Mutex<Vec<(String, Vec<f32>)>>>,
}

impl MemoryVectorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in write order.
    pub fn entries(&self) -> Vec<(String, Vec<f32>)> {
        self.entries.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl VectorWriter for MemoryVectorWriter {
    fn write(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.entries.lock().push((key.to_string(), vector.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
