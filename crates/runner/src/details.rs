//! Host environment and installed browser detection

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use docrun_common::{BrowserSpec, Config, Context};

static AVAILABLE_APPS: OnceCell<Vec<App>> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEnvironment {
    /// `linux`, `mac` or `windows`
    pub platform: String,
    pub arch: String,
}

impl HostEnvironment {
    pub fn current() -> Self {
        let platform = match std::env::consts::OS {
            "macos" => "mac",
            other => other,
        };
        Self {
            platform: platform.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// A detected browser and the driver that automates it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub browser_path: PathBuf,
    pub driver_path: PathBuf,
}

/// Read-only facts about the host, built once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDetails {
    pub environment: HostEnvironment,
    pub available_apps: Vec<App>,
    pub allow_unsafe_steps: bool,
}

impl RunnerDetails {
    pub fn detect(config: &Config) -> Self {
        Self {
            environment: HostEnvironment::current(),
            available_apps: available_apps().to_vec(),
            allow_unsafe_steps: config.allow_unsafe_steps,
        }
    }

    /// Whether `context` can run on this host.
    ///
    /// The platform must match when one is declared, and a declared
    /// browser must be among the detected apps.
    pub fn supports(&self, context: &Context) -> bool {
        if let Some(platform) = &context.platform {
            if platform != &self.environment.platform {
                return false;
            }
        }
        match &context.browser {
            Some(browser) => self.app_for(browser).is_some(),
            None => true,
        }
    }

    pub fn app_for(&self, browser: &BrowserSpec) -> Option<&App> {
        self.available_apps
            .iter()
            .find(|app| app.name == browser.name || engine_of(&app.name) == browser.engine())
    }

    /// First detected app, used when a driver step runs without a declared browser
    pub fn default_browser(&self) -> Option<BrowserSpec> {
        self.available_apps.first().map(|app| BrowserSpec::named(app.name.clone()))
    }
}

fn engine_of(name: &str) -> &str {
    match name {
        "safari" => "webkit",
        other => other,
    }
}

/// Browsers installed on this host, detected once per process
pub fn available_apps() -> &'static [App] {
    AVAILABLE_APPS.get_or_init(detect_apps)
}

fn detect_apps() -> Vec<App> {
    let mut apps = Vec::new();

    let chrome = first_on_path(&["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"]);
    if let (Some(browser_path), Some(driver_path)) = (chrome, first_on_path(&["chromedriver"])) {
        apps.push(App {
            name: "chrome".to_string(),
            browser_path,
            driver_path,
        });
    }

    if let (Some(browser_path), Some(driver_path)) = (first_on_path(&["firefox"]), first_on_path(&["geckodriver"])) {
        apps.push(App {
            name: "firefox".to_string(),
            browser_path,
            driver_path,
        });
    }

    if std::env::consts::OS == "macos" {
        let safari = PathBuf::from("/Applications/Safari.app");
        if let Some(driver_path) = first_on_path(&["safaridriver"]) {
            if safari.exists() {
                apps.push(App {
                    name: "safari".to_string(),
                    browser_path: safari,
                    driver_path,
                });
            }
        }
    }

    debug!(
        "Detected apps: {:?}",
        apps.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
    );
    apps
}

fn first_on_path(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|name| which::which(name).ok())
}
