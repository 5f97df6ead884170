//! Error types for docrun

use thiserror::Error;

/// Result type alias using the docrun common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration and spec files
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Spec parse error in {path}: {reason}")]
    SpecParse { path: String, reason: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}
