//! Error types for ivecd.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IvecdError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Model errors
    #[error("Failed to load model from {path}: {message}")]
    ModelLoad { path: String, message: String },

    #[error("Model mismatch: {message}")]
    ModelMismatch { message: String },

    // Archive errors
    #[error("Invalid archive specifier '{spec}': {message}")]
    ArchiveSpec { spec: String, message: String },

    #[error("Failed to read archive {spec}: {message}")]
    ArchiveRead { spec: String, message: String },

    #[error("Failed to write archive {spec}: {message}")]
    ArchiveWrite { spec: String, message: String },

    // Socket errors
    #[error("Socket error: {message}")]
    Socket { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    // Extraction errors
    #[error("Extraction failed for utterance {utterance}: {message}")]
    Extraction { utterance: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IvecdError>;
