//! Error types for the runner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Driver bridge failed to start: {0}")]
    BridgeStartup(String),

    #[error("Driver bridge health check failed after {0} attempts")]
    BridgeHealthCheck(usize),

    #[error("Driver session could not be started: {0}")]
    SessionStart(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Common(#[from] docrun_common::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
