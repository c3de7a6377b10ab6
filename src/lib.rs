//! ivecd - persistent i-vector extraction server
//!
//! Loads the acoustic models once and serves batch extraction requests over
//! a minimal TCP protocol.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod archive;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod model;
pub mod pipeline;

// Collaborator traits (read → model → write)
pub use archive::{FeatureReader, SharedWriter, VectorWriter};
pub use model::{ComponentSelector, PreselectLikelihood, VectorExtractor};

// Pipeline
pub use pipeline::{BatchPipeline, BatchReport, Models};

// Error handling
pub use error::{IvecdError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
