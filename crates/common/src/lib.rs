//! Docrun Common Library
//!
//! Data model shared by the runner and the CLI: specs, tests, contexts,
//! steps with typed action payloads, run configuration, and the report.

pub mod config;
pub mod error;
pub mod report;
pub mod step;
pub mod types;

// Re-export commonly used types
pub use config::{Config, LogLevel, RelativePathBase};
pub use error::{Error, Result};
pub use report::{ContextReport, Outcome, Report, SpecReport, StepReport, Summary, Tally, TestReport};
pub use step::{Action, ElementCriteria, ElementTarget, Step};
pub use types::*;

/// Docrun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
