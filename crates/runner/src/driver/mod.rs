//! Browser automation driver abstraction
//!
//! Everything that talks to a live browser goes through [`Driver`]. The
//! production implementation speaks the W3C WebDriver protocol to the
//! driver bridge; tests substitute an in-memory document.

mod webdriver;

pub use webdriver::{WebDriverFactory, WebDriverSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::RunnerResult;

/// Opaque handle to an element in the current document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// How to query the document for elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
    /// Elements whose accessible name equals the value
    AccessibleName(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Session parameters for a context's browser
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// Browser name as declared (`chrome`, `firefox`, `safari`, ...)
    pub browser: String,
    pub headless: bool,
    pub window: Option<(u32, u32)>,
    pub viewport: Option<(u32, u32)>,
}

impl Capabilities {
    /// W3C `capabilities` payload with engine-specific automation options
    pub fn to_webdriver(&self) -> Value {
        let mut always = json!({});
        let mut args: Vec<String> = Vec::new();
        if let Some((w, h)) = self.window {
            args.push(format!("--window-size={},{}", w, h));
        }

        match self.browser.as_str() {
            "firefox" => {
                let mut ff_args = Vec::new();
                if self.headless {
                    ff_args.push("-headless".to_string());
                }
                if let Some((w, h)) = self.window {
                    ff_args.push(format!("--width={}", w));
                    ff_args.push(format!("--height={}", h));
                }
                always["browserName"] = json!("firefox");
                always["appium:automationName"] = json!("Gecko");
                always["moz:firefoxOptions"] = json!({ "args": ff_args });
            }
            "safari" | "webkit" => {
                always["browserName"] = json!("Safari");
                always["appium:automationName"] = json!("Safari");
                always["safari:automaticInspection"] = json!(false);
                always["safari:automaticProfiling"] = json!(false);
            }
            "edge" => {
                if self.headless {
                    args.push("--headless=new".to_string());
                }
                always["browserName"] = json!("MicrosoftEdge");
                always["appium:automationName"] = json!("Chromium");
                always["ms:edgeOptions"] = json!({ "args": args });
            }
            _ => {
                if self.headless {
                    args.push("--headless=new".to_string());
                }
                args.push("--disable-search-engine-choice-screen".to_string());
                always["browserName"] = json!("chrome");
                always["appium:automationName"] = json!("Chromium");
                always["goog:chromeOptions"] = json!({ "args": args });
            }
        }

        json!({ "capabilities": { "alwaysMatch": always } })
    }
}

/// A live automation session bound to a browser engine
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> RunnerResult<()>;

    async fn current_url(&self) -> RunnerResult<String>;

    /// Run a script in the document; `arguments` are available to the script
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> RunnerResult<Value>;

    async fn find_elements(&self, locator: &Locator) -> RunnerResult<Vec<ElementRef>>;

    /// Rendered text content
    async fn element_text(&self, element: &ElementRef) -> RunnerResult<String>;

    async fn element_attribute(&self, element: &ElementRef, name: &str) -> RunnerResult<Option<String>>;

    async fn element_accessible_name(&self, element: &ElementRef) -> RunnerResult<String>;

    async fn element_tag(&self, element: &ElementRef) -> RunnerResult<String>;

    async fn element_rect(&self, element: &ElementRef) -> RunnerResult<Rect>;

    async fn element_click(&self, element: &ElementRef) -> RunnerResult<()>;

    async fn element_send_keys(&self, element: &ElementRef, text: &str) -> RunnerResult<()>;

    /// Type into whatever element has focus
    async fn send_keys(&self, text: &str) -> RunnerResult<()>;

    async fn move_to(&self, element: &ElementRef) -> RunnerResult<()>;

    /// Click with a specific pointer button (0 left, 1 middle, 2 right)
    async fn pointer_click(&self, element: &ElementRef, button: u8) -> RunnerResult<()>;

    async fn drag_and_drop(&self, source: &ElementRef, target: &ElementRef, duration_ms: u64) -> RunnerResult<()>;

    async fn cookies(&self) -> RunnerResult<Vec<Cookie>>;

    async fn add_cookie(&self, cookie: &Cookie) -> RunnerResult<()>;

    /// Viewport screenshot as PNG bytes
    async fn screenshot(&self) -> RunnerResult<Vec<u8>>;

    async fn window_size(&self) -> RunnerResult<(u32, u32)>;

    async fn set_window_size(&self, width: u32, height: u32) -> RunnerResult<()>;

    async fn quit(&self) -> RunnerResult<()>;
}

/// Starts driver sessions for contexts
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn start(&self, capabilities: &Capabilities) -> RunnerResult<Arc<dyn Driver>>;
}

/// Resize the window so the document viewport matches `width` x `height`
pub async fn set_viewport(driver: &dyn Driver, width: u32, height: u32) -> RunnerResult<()> {
    let inner = driver
        .execute_script("return [window.innerWidth, window.innerHeight];", vec![])
        .await?;
    let (outer_w, outer_h) = driver.window_size().await?;
    let inner_w = inner.get(0).and_then(Value::as_u64).unwrap_or(outer_w as u64) as u32;
    let inner_h = inner.get(1).and_then(Value::as_u64).unwrap_or(outer_h as u64) as u32;

    let chrome_w = outer_w.saturating_sub(inner_w);
    let chrome_h = outer_h.saturating_sub(inner_h);
    driver.set_window_size(width + chrome_w, height + chrome_h).await
}
