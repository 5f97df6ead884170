//! Step action handlers
//!
//! Every recognized action has one handler. Handlers return
//! `RunnerResult<StepOutcome>`; the dispatcher turns an `Err` into a FAIL so
//! a step can never abort its context.

mod browser;
mod cookies;
mod http;
mod process;
mod record;
mod screenshot;

pub use browser::{find_element, ElementLookup};
pub use record::Recording;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use docrun_common::step::{Action, LoadVariablesStep, WaitStep};
use docrun_common::{Config, Outcome, Step};

use crate::driver::Driver;
use crate::env::Environment;
use crate::error::{RunnerError, RunnerResult};

/// Result of executing one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub result: Outcome,
    pub description: String,
    pub outputs: Value,
}

impl StepOutcome {
    pub fn new(result: Outcome, description: impl Into<String>) -> Self {
        Self {
            result,
            description: description.into(),
            outputs: json!({}),
        }
    }

    pub fn pass(description: impl Into<String>) -> Self {
        Self::new(Outcome::Pass, description)
    }

    pub fn fail(description: impl Into<String>) -> Self {
        Self::new(Outcome::Fail, description)
    }

    pub fn warning(description: impl Into<String>) -> Self {
        Self::new(Outcome::Warning, description)
    }

    pub fn skipped(description: impl Into<String>) -> Self {
        Self::new(Outcome::Skipped, description)
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Files created or replaced during the run, offered to the upload integration
#[derive(Debug, Default)]
pub struct ChangedFiles(Mutex<Vec<PathBuf>>);

impl ChangedFiles {
    pub fn record(&self, path: impl Into<PathBuf>) {
        if let Ok(mut files) = self.0.lock() {
            files.push(path.into());
        }
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.0.lock().map(|files| files.clone()).unwrap_or_default()
    }
}

/// Everything a handler may touch while running inside one context
pub struct ActionContext<'a> {
    pub step_id: String,
    pub driver: Option<Arc<dyn Driver>>,
    pub env: &'a mut Environment,
    pub config: &'a Config,
    /// Directory relative step paths resolve against
    pub base_dir: PathBuf,
    pub changed_files: &'a ChangedFiles,
    pub recording: &'a mut Option<Recording>,
}

impl ActionContext<'_> {
    pub fn driver(&self) -> RunnerResult<Arc<dyn Driver>> {
        self.driver
            .clone()
            .ok_or_else(|| RunnerError::Driver("no browser session for this context".to_string()))
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Where a step writes its file: `path` inside `directory` (either
    /// relative to the base directory), else `default_name`
    pub fn output_path(&self, path: Option<&str>, directory: Option<&str>, default_name: &str) -> PathBuf {
        let dir = match directory {
            Some(directory) => self.resolve_path(directory),
            None => self.base_dir.clone(),
        };
        match path {
            Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
            Some(path) => dir.join(path),
            None => dir.join(default_name),
        }
    }

    /// `url` joined to the step origin, else the configured origin
    pub fn absolute_url(&self, url: &str, origin: Option<&str>) -> RunnerResult<String> {
        if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
            return Ok(url.to_string());
        }
        let origin = origin.or(self.config.origin.as_deref()).ok_or_else(|| {
            RunnerError::InvalidUrl(format!("relative URL '{}' needs an origin", url))
        })?;
        Ok(format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            url.trim_start_matches('/')
        ))
    }
}

/// Runs one step. The orchestrator holds this behind a trait object so the
/// step loop can be exercised with a recording fake.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &mut ActionContext<'_>) -> StepOutcome;
}

/// The built-in handlers
#[derive(Debug, Clone, Copy, Default)]
pub struct Actions;

#[async_trait]
impl StepExecutor for Actions {
    async fn execute(&self, step: &Step, ctx: &mut ActionContext<'_>) -> StepOutcome {
        let start = Instant::now();
        let outcome = match dispatch(&step.action, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::fail(e.to_string()),
        };
        debug!(
            "{} {} ({} ms): {}",
            outcome.result.symbol(),
            step.action.key(),
            start.elapsed().as_millis(),
            outcome.description
        );
        outcome
    }
}

async fn dispatch(action: &Action, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    match action {
        Action::CheckLink(step) => http::check_link(step, ctx).await,
        Action::Click(step) => browser::click(step, ctx).await,
        Action::DragAndDrop(step) => browser::drag_and_drop(step, ctx).await,
        Action::Find(step) => browser::find(step, ctx).await,
        Action::GoTo(step) => browser::go_to(step, ctx).await,
        Action::HttpRequest(step) => http::http_request(step, ctx).await,
        Action::LoadCookie(step) => cookies::load_cookie(step, ctx).await,
        Action::LoadVariables(step) => load_variables(step, ctx),
        Action::Record(step) => record::start(step, ctx).await,
        Action::RunCode(step) => process::run_code(step, ctx).await,
        Action::RunShell(step) => process::run_shell(step, ctx).await,
        Action::SaveCookie(step) => cookies::save_cookie(step, ctx).await,
        Action::Screenshot(step) => screenshot::capture(step, ctx).await,
        Action::StopRecord => record::stop(ctx).await,
        Action::Type(step) => browser::type_keys(step, ctx).await,
        Action::Wait(step) => Ok(wait(step).await),
        Action::Invalid { key, reason } => Ok(StepOutcome::fail(format!(
            "Invalid {} step: {}",
            key, reason
        ))),
        Action::Unrecognized { keys } => Ok(StepOutcome::fail(format!(
            "Unknown action. Expected one of the recognized action keys, found [{}]",
            keys.join(", ")
        ))),
    }
}

fn load_variables(step: &LoadVariablesStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let path = ctx.resolve_path(&step.path);
    let loaded = ctx.env.load_file(&path)?;
    Ok(
        StepOutcome::pass(format!("Loaded {} variable(s) from {}.", loaded.len(), path.display()))
            .with_outputs(json!({ "variables": loaded })),
    )
}

async fn wait(step: &WaitStep) -> StepOutcome {
    tokio::time::sleep(Duration::from_millis(step.duration_ms)).await;
    StepOutcome::pass(format!("Waited {} ms.", step.duration_ms))
}
