//! Runner configuration

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::RunTarget;

/// Resolved runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Spec files or directories to run
    pub input: Vec<PathBuf>,

    /// Directory the report is written to
    pub output: PathBuf,

    /// What relative paths in steps are resolved against
    pub relative_path_base: RelativePathBase,

    /// Whether steps flagged `unsafe` may run
    pub allow_unsafe_steps: bool,

    /// Base URL for relative links
    pub origin: Option<String>,

    /// Number of contexts executed at once
    #[serde(deserialize_with = "concurrency")]
    pub concurrent_runners: usize,

    pub log_level: LogLevel,

    /// Targets applied to tests that declare none
    pub run_on: Vec<RunTarget>,

    pub bridge: BridgeSettings,

    pub integrations: Integrations,

    /// Recognized documentation file types, passed through untouched
    pub file_types: Vec<Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: vec![PathBuf::from(".")],
            output: PathBuf::from("."),
            relative_path_base: RelativePathBase::File,
            allow_unsafe_steps: false,
            origin: None,
            concurrent_runners: 1,
            log_level: LogLevel::Info,
            run_on: Vec::new(),
            bridge: BridgeSettings::default(),
            integrations: Integrations::default(),
            file_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativePathBase {
    #[default]
    File,
    Cwd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Silent,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Driver bridge process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Port to listen on (None = find a free port)
    pub port: Option<u16>,
    pub startup_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("appium"),
            args: Vec::new(),
            port: None,
            startup_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Integrations {
    /// Predereferenced OpenAPI documents, passed through untouched
    pub open_api: Vec<Value>,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    /// Upload changed media files after the run
    pub on_change: bool,
    /// Directory changed files are copied into
    pub destination: Option<PathBuf>,
}

/// `concurrentRunners` accepts a count or `true` (min of 4 and the CPU count)
fn concurrency<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Count(usize),
        Flag(bool),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Count(n) => n.max(1),
        Repr::Flag(true) => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4),
        Repr::Flag(false) => 1,
    })
}

impl Config {
    /// Load configuration from a JSON or YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let config: Config = match ext.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => return Err(Error::UnsupportedFileType(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_runners == 0 {
            return Err(Error::InvalidConfig("concurrentRunners must be at least 1".into()));
        }
        if let Some(origin) = &self.origin {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(Error::InvalidConfig(format!(
                    "origin must be an http(s) URL: {}",
                    origin
                )));
            }
        }
        Ok(())
    }
}
