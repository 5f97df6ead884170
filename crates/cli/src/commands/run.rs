//! `docrun run`: execute specs and write the report

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use docrun_common::{Config, LogLevel, Report, Spec, REPORT_FILE_PREFIX};
use docrun_runner::{DirectoryUploader, Runner};

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// JSON or YAML configuration file
    #[arg(short, long, env = "DOCRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Spec files or directories (replaces the configured input)
    #[arg(short, long, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Directory the results file is written to
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Run steps marked unsafe
    #[arg(long)]
    pub allow_unsafe: bool,

    /// Contexts executed at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Base URL for relative links
    #[arg(long)]
    pub origin: Option<String>,

    /// silent, error, warning, info or debug
    #[arg(long, value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,
}

pub fn parse_log_level(value: &str) -> std::result::Result<LogLevel, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown log level '{}'", value))
}

/// Load the config file (or defaults) and layer command-line flags on top
pub fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if !args.input.is_empty() {
        config.input = args.input.clone();
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if args.allow_unsafe {
        config.allow_unsafe_steps = true;
    }
    if let Some(n) = args.concurrency {
        config.concurrent_runners = n;
    }
    if let Some(origin) = &args.origin {
        config.origin = Some(origin.clone());
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
}

/// Run every spec under the configured input
pub async fn execute(config: Config) -> Result<(Report, PathBuf)> {
    let specs = Spec::load_all(&config.input).context("Failed to load specs")?;
    if specs.is_empty() {
        warn!("No specs found under {:?}", config.input);
    }
    info!("Loaded {} spec(s)", specs.len());

    let destination = config.integrations.upload.destination.clone();
    let output_dir = config.output.clone();

    let mut runner = Runner::new(config);
    if let Some(destination) = destination {
        runner = runner.with_uploader(Arc::new(DirectoryUploader::new(destination)));
    }

    let report = runner.run_specs(&specs).await?;
    let path = write_report(&report, &output_dir)?;
    Ok((report, path))
}

/// Write `<dir>/testResults-<unix-ms>.json`
pub fn write_report(report: &Report, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let path = dir.join(format!(
        "{}{}.json",
        REPORT_FILE_PREFIX,
        chrono::Utc::now().timestamp_millis()
    ));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;
    Ok(path)
}
