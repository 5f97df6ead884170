//! Execution orchestrator: specs -> tests -> contexts -> steps

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use docrun_common::{
    BrowserSpec, Config, Context, ContextReport, Outcome, RelativePathBase, Report, Size, Spec, SpecReport, Step,
    StepReport, Test, TestReport,
};

use crate::actions::{ActionContext, Actions, ChangedFiles, Recording, StepExecutor, StepOutcome};
use crate::bridge::{BridgeConfig, BridgeHandle};
use crate::contexts::resolve_contexts;
use crate::details::RunnerDetails;
use crate::driver::{Capabilities, Driver, DriverFactory, WebDriverFactory};
use crate::env::Environment;
use crate::error::{RunnerError, RunnerResult};
use crate::expression::{resolve_expression, resolve_str, stringify};
use crate::upload::ChangedFileUploader;

pub const UNSAFE_SKIP: &str = "Skipped because unsafe steps are not allowed.";
pub const PREVIOUS_FAILURE_SKIP: &str = "Skipped due to previous failure.";

/// Where driver sessions come from
enum DriverSource {
    /// Spawn the configured bridge when any context needs a browser
    Bridge(BridgeConfig),
    /// A caller-supplied factory; no bridge process is managed
    Factory(Arc<dyn DriverFactory>),
}

/// Runs resolved specs and produces a report
pub struct Runner {
    config: Config,
    details: RunnerDetails,
    drivers: DriverSource,
    executor: Arc<dyn StepExecutor>,
    uploader: Option<Arc<dyn ChangedFileUploader>>,
}

impl Runner {
    /// Runner with host detection, the built-in actions, and the configured bridge
    pub fn new(config: Config) -> Self {
        let details = RunnerDetails::detect(&config);
        let bridge = BridgeConfig::from(&config.bridge);
        Self {
            config,
            details,
            drivers: DriverSource::Bridge(bridge),
            executor: Arc::new(Actions),
            uploader: None,
        }
    }

    /// Use `factory` for sessions instead of spawning the bridge
    pub fn with_driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.drivers = DriverSource::Factory(factory);
        self
    }

    pub fn with_details(mut self, details: RunnerDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ChangedFileUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn details(&self) -> &RunnerDetails {
        &self.details
    }

    /// Run every spec and roll the results into a report.
    ///
    /// Only a bridge startup failure aborts the run; everything below the
    /// run level ends up as a result in the report.
    pub async fn run_specs(&self, specs: &[Spec]) -> RunnerResult<Report> {
        let start = Instant::now();

        let plan: Vec<(&Spec, Vec<(&Test, Vec<Context>)>)> = specs
            .iter()
            .map(|spec| {
                let tests = spec
                    .tests
                    .iter()
                    .map(|test| {
                        let targets = if test.run_on.is_empty() {
                            &self.config.run_on
                        } else {
                            &test.run_on
                        };
                        (test, resolve_contexts(targets, test))
                    })
                    .collect();
                (spec, tests)
            })
            .collect();

        let needs_driver = plan
            .iter()
            .flat_map(|(_, tests)| tests)
            .flat_map(|(_, contexts)| contexts)
            .any(Context::requires_driver);

        let mut bridge = None;
        let factory: Option<Arc<dyn DriverFactory>> = match (&self.drivers, needs_driver) {
            (_, false) => None,
            (DriverSource::Factory(factory), true) => Some(factory.clone()),
            (DriverSource::Bridge(config), true) => {
                let handle = BridgeHandle::spawn(config.clone()).await?;
                let factory = WebDriverFactory::new(handle.base_url())?;
                bridge = Some(handle);
                Some(Arc::new(factory) as Arc<dyn DriverFactory>)
            }
        };

        info!("Running {} spec(s)...", specs.len());

        let changed = ChangedFiles::default();
        let mut spec_reports = Vec::with_capacity(plan.len());
        for (spec, tests) in plan {
            let base_dir = self.base_dir(spec);
            let mut test_reports = Vec::with_capacity(tests.len());

            for (test, contexts) in tests {
                let base_dir = base_dir.as_path();
                let factory = factory.as_ref();
                let changed = &changed;
                let contexts: Vec<ContextReport> = stream::iter(contexts)
                    .map(move |context| self.run_context(context, base_dir, factory, changed))
                    .buffered(self.config.concurrent_runners.max(1))
                    .collect()
                    .await;

                let result = Outcome::aggregate(contexts.iter().map(|c| c.result));
                test_reports.push(TestReport {
                    test_id: test.test_id.clone(),
                    description: test.description.clone(),
                    content_path: test.content_path.clone(),
                    result,
                    contexts,
                });
            }

            let result = Outcome::aggregate(test_reports.iter().map(|t| t.result));
            spec_reports.push(SpecReport {
                spec_id: spec.spec_id.clone(),
                description: spec.description.clone(),
                content_path: spec.content_path.clone(),
                result,
                tests: test_reports,
            });
        }

        if let Some(mut handle) = bridge {
            handle.stop().await;
        }

        let mut report = Report::from_specs(spec_reports);
        self.upload_changed(&changed, &mut report).await;

        let specs = &report.summary.specs;
        info!(
            "Test Results: {} passed, {} failed, {} warning, {} skipped ({} ms)",
            specs.pass,
            specs.fail,
            specs.warning,
            specs.skipped,
            start.elapsed().as_millis()
        );
        Ok(report)
    }

    async fn run_context(
        &self,
        context: Context,
        base_dir: &Path,
        factory: Option<&Arc<dyn DriverFactory>>,
        changed: &ChangedFiles,
    ) -> ContextReport {
        let start = Instant::now();
        let report = self.execute_context(context, base_dir, factory, changed).await;
        let elapsed = start.elapsed().as_millis();

        match report.result {
            Outcome::Fail => error!(
                "{} {} - {}",
                report.result.symbol(),
                report.context_id,
                report
                    .steps
                    .iter()
                    .find(|s| s.result == Outcome::Fail)
                    .map(|s| s.result_description.as_str())
                    .unwrap_or("failed")
            ),
            Outcome::Skipped => info!(
                "{} {} ({})",
                report.result.symbol(),
                report.context_id,
                report.result_description.as_deref().unwrap_or("skipped")
            ),
            _ => info!("{} {} ({} ms)", report.result.symbol(), report.context_id, elapsed),
        }
        report
    }

    async fn execute_context(
        &self,
        mut context: Context,
        base_dir: &Path,
        factory: Option<&Arc<dyn DriverFactory>>,
        changed: &ChangedFiles,
    ) -> ContextReport {
        if !self.details.supports(&context) {
            let description = format!(
                "Skipping context: needs {}, this host is {} with [{}].",
                describe(&context),
                self.details.environment.platform,
                self.details
                    .available_apps
                    .iter()
                    .map(|app| app.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return skipped_context(context, description);
        }

        let mut driver: Option<Arc<dyn Driver>> = None;
        if context.requires_driver() {
            if context.browser.is_none() {
                context.browser = self.details.default_browser();
            }
            let Some(browser) = context.browser.clone() else {
                return skipped_context(context, "No supported browser is installed on this host.".to_string());
            };
            let Some(factory) = factory else {
                return skipped_context(context, "No driver bridge is available for this run.".to_string());
            };
            match start_driver(factory.as_ref(), &browser).await {
                Ok(session) => driver = Some(session),
                Err(e) => return skipped_context(context, driver_start_failure(&browser, &e)),
            }
        }

        let env = Environment::from_process();
        let meta = json!({ "steps": {}, "env": env.to_value() });
        let mut state = ContextState {
            driver: driver.clone(),
            env,
            meta,
            recording: None,
            base_dir,
            changed,
        };

        let mut steps = Vec::with_capacity(context.steps.len() + 1);
        let mut failed = false;
        for step in &context.steps {
            let unsafe_step = step.unsafe_step || context.unsafe_steps;
            let outcome = if unsafe_step && !self.details.allow_unsafe_steps {
                StepOutcome::skipped(UNSAFE_SKIP)
            } else if failed {
                StepOutcome::skipped(PREVIOUS_FAILURE_SKIP)
            } else {
                self.run_step(step, &mut state).await
            };

            if outcome.result == Outcome::Fail {
                failed = true;
            }
            steps.push(step_report(step, outcome));
        }

        if state.recording.is_some() {
            match Step::from_value(json!({
                "stepId": format!("{}-stopRecord", context.context_id),
                "stopRecord": true,
            })) {
                Ok(step) => {
                    let outcome = self.run_step(&step, &mut state).await;
                    steps.push(step_report(&step, outcome));
                }
                Err(e) => warn!("Couldn't build the stopRecord step: {}", e),
            }
        }

        if let Some(driver) = driver {
            if let Err(e) = driver.quit().await {
                warn!("Failed to close the driver session: {}", e);
            }
        }

        ContextReport {
            context_id: context.context_id,
            platform: context.platform,
            browser: context.browser,
            result: Outcome::aggregate(steps.iter().map(|s| s.result)),
            result_description: None,
            steps,
        }
    }

    async fn run_step(&self, step: &Step, state: &mut ContextState<'_>) -> StepOutcome {
        let resolved = {
            let env = &state.env;
            let meta = &state.meta;
            step.map_strings(&|text| {
                let text = env.substitute(text);
                if text.contains("$$") {
                    stringify(&resolve_str(&text, meta))
                } else {
                    text
                }
            })
        };

        let mut ctx = ActionContext {
            step_id: step.step_id.clone(),
            driver: state.driver.clone(),
            env: &mut state.env,
            config: &self.config,
            base_dir: state.base_dir.to_path_buf(),
            changed_files: state.changed,
            recording: &mut state.recording,
        };
        let outcome = self.executor.execute(&resolved, &mut ctx).await;

        if matches!(outcome.result, Outcome::Pass | Outcome::Warning) && !step.variables.is_empty() {
            let mut scope = state.meta.clone();
            scope["id"] = json!(step.step_id);
            scope["outputs"] = outcome.outputs.clone();
            for (name, expression) in &step.variables {
                let value = resolve_expression(expression, &scope);
                debug!("Exporting {} from step {}", name, step.step_id);
                state.env.set(name.clone(), stringify(&value));
            }
        }

        state.meta["steps"][step.step_id.as_str()] = json!({
            "outputs": outcome.outputs,
            "result": outcome.result,
        });
        state.meta["env"] = state.env.to_value();
        outcome
    }

    fn base_dir(&self, spec: &Spec) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match self.config.relative_path_base {
            RelativePathBase::Cwd => cwd,
            RelativePathBase::File => spec
                .content_path
                .as_deref()
                .map(Path::new)
                .and_then(Path::parent)
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or(cwd),
        }
    }

    async fn upload_changed(&self, changed: &ChangedFiles, report: &mut Report) {
        let files = changed.snapshot();
        if files.is_empty() || !self.config.integrations.upload.on_change {
            return;
        }
        let Some(uploader) = &self.uploader else {
            debug!("{} changed file(s), no uploader configured", files.len());
            return;
        };
        match uploader.upload(&files).await {
            Ok(count) => info!("Uploaded {} changed file(s)", count),
            Err(e) => {
                warn!("Upload failed: {}", e);
                report.upload_error = Some(e.to_string());
            }
        }
    }
}

/// Per-context mutable state threaded through the step loop
struct ContextState<'a> {
    driver: Option<Arc<dyn Driver>>,
    env: Environment,
    meta: Value,
    recording: Option<Recording>,
    base_dir: &'a Path,
    changed: &'a ChangedFiles,
}

/// Start a session, retrying once headless
async fn start_driver(factory: &dyn DriverFactory, browser: &BrowserSpec) -> RunnerResult<Arc<dyn Driver>> {
    let mut capabilities = capabilities_for(browser);
    match factory.start(&capabilities).await {
        Ok(driver) => return Ok(driver),
        Err(e) => warn!("Failed to start {} ({}); retrying headless", browser.name, e),
    }
    capabilities.headless = true;
    factory.start(&capabilities).await
}

pub fn capabilities_for(browser: &BrowserSpec) -> Capabilities {
    Capabilities {
        browser: browser.name.to_lowercase(),
        headless: browser.headless.unwrap_or(true),
        window: browser.window.as_ref().and_then(dimensions),
        viewport: browser.viewport.as_ref().and_then(dimensions),
    }
}

fn dimensions(size: &Size) -> Option<(u32, u32)> {
    Some((size.width?, size.height?))
}

fn driver_start_failure(browser: &BrowserSpec, error: &RunnerError) -> String {
    let hint = if browser.engine() == "webkit" {
        "Enable 'Allow Remote Automation' in Safari's Develop menu, then run `safaridriver --enable`."
    } else {
        "Check that the browser and its driver are installed and that the driver bridge can start sessions."
    };
    format!("Couldn't start {}: {}. {}", browser.name, error, hint)
}

fn describe(context: &Context) -> String {
    match (&context.platform, &context.browser) {
        (Some(platform), Some(browser)) => format!("{} on {}", browser.name, platform),
        (Some(platform), None) => platform.clone(),
        (None, Some(browser)) => browser.name.clone(),
        (None, None) => "the current host".to_string(),
    }
}

fn skipped_context(context: Context, description: String) -> ContextReport {
    let steps = context
        .steps
        .iter()
        .map(|step| step_report(step, StepOutcome::skipped(description.clone())))
        .collect();
    ContextReport {
        context_id: context.context_id,
        platform: context.platform,
        browser: context.browser,
        result: Outcome::Skipped,
        result_description: Some(description),
        steps,
    }
}

fn step_report(step: &Step, outcome: StepOutcome) -> StepReport {
    StepReport {
        step: step.clone(),
        result: outcome.result,
        result_description: outcome.description,
        outputs: outcome.outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_default_to_headless() {
        let caps = capabilities_for(&BrowserSpec::named("Chrome"));
        assert_eq!(caps.browser, "chrome");
        assert!(caps.headless);
        assert_eq!(caps.window, None);
    }

    #[test]
    fn test_capabilities_need_both_dimensions() {
        let browser = BrowserSpec {
            name: "firefox".into(),
            window: Some(Size {
                width: Some(1024),
                height: Some(768),
            }),
            viewport: Some(Size {
                width: Some(800),
                height: None,
            }),
            headless: Some(false),
        };
        let caps = capabilities_for(&browser);
        assert_eq!(caps.window, Some((1024, 768)));
        assert_eq!(caps.viewport, None);
        assert!(!caps.headless);
    }

    #[test]
    fn test_safari_failure_mentions_remote_automation() {
        let text = driver_start_failure(
            &BrowserSpec::named("safari"),
            &RunnerError::SessionStart("refused".into()),
        );
        assert!(text.contains("Allow Remote Automation"));
        assert!(text.contains("safaridriver --enable"));
    }

    #[test]
    fn test_skipped_context_skips_every_step() {
        let context = Context {
            context_id: "ctx".into(),
            platform: Some("windows".into()),
            browser: None,
            steps: vec![Step::from_value(json!({"wait": 10})).unwrap()],
            open_api: Vec::new(),
            unsafe_steps: false,
        };
        let report = skipped_context(context, "nope".into());
        assert_eq!(report.result, Outcome::Skipped);
        assert_eq!(report.steps[0].result, Outcome::Skipped);
        assert_eq!(report.result_description.as_deref(), Some("nope"));
    }
}
