//! W3C WebDriver client speaking to the driver bridge over HTTP

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Capabilities, Cookie, Driver, DriverFactory, ElementRef, Locator, Rect};
use crate::error::{RunnerError, RunnerResult};

/// Key under which WebDriver serializes element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Elements whose computed accessible name matches `arguments[0]`
const ACCESSIBLE_NAME_SCRIPT: &str = r#"
const wanted = arguments[0];
const labelled = (el) => {
  const ids = (el.getAttribute('aria-labelledby') || '').split(/\s+/).filter(Boolean);
  return ids.map((id) => (document.getElementById(id) || {}).textContent || '').join(' ').trim();
};
const nameOf = (el) => {
  const aria = el.getAttribute('aria-label');
  if (aria) return aria.trim();
  const byId = labelled(el);
  if (byId) return byId;
  if (el.labels && el.labels.length) return Array.from(el.labels).map((l) => l.textContent.trim()).join(' ');
  const alt = el.getAttribute('alt');
  if (alt) return alt.trim();
  if (/^(BUTTON|A|SUMMARY|OPTION|H[1-6])$/.test(el.tagName)) return (el.textContent || '').replace(/\s+/g, ' ').trim();
  return (el.getAttribute('title') || '').trim();
};
return Array.from(document.querySelectorAll('*')).filter((el) => nameOf(el) === wanted);
"#;

/// Starts sessions against the bridge's WebDriver endpoint
pub struct WebDriverFactory {
    base_url: String,
    client: Client,
}

impl WebDriverFactory {
    pub fn new(base_url: impl Into<String>) -> RunnerResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn start(&self, capabilities: &Capabilities) -> RunnerResult<Arc<dyn Driver>> {
        let url = format!("{}/session", self.base_url);
        debug!("Starting {} session at {}", capabilities.browser, url);

        let response = self
            .client
            .post(&url)
            .json(&capabilities.to_webdriver())
            .send()
            .await
            .map_err(|e| RunnerError::SessionStart(e.to_string()))?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| RunnerError::SessionStart(e.to_string()))?;

        if !status.is_success() {
            return Err(RunnerError::SessionStart(error_message(&body)));
        }

        let session_id = body["value"]["sessionId"]
            .as_str()
            .or_else(|| body["sessionId"].as_str())
            .ok_or_else(|| RunnerError::SessionStart("response did not include a sessionId".into()))?
            .to_string();

        let session = WebDriverSession {
            session_url: format!("{}/session/{}", self.base_url, session_id),
            client: self.client.clone(),
        };

        if let Some((w, h)) = capabilities.window {
            session.set_window_size(w, h).await?;
        }
        if let Some((w, h)) = capabilities.viewport {
            super::set_viewport(&session, w, h).await?;
        }

        Ok(Arc::new(session))
    }
}

fn error_message(body: &Value) -> String {
    let value = &body["value"];
    match (value["error"].as_str(), value["message"].as_str()) {
        (Some(error), Some(message)) => format!("{}: {}", error, message),
        (None, Some(message)) => message.to_string(),
        _ => body.to_string(),
    }
}

/// One WebDriver session
pub struct WebDriverSession {
    session_url: String,
    client: Client,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> RunnerResult<Value> {
        let url = format!("{}{}", self.session_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(RunnerError::Driver(error_message(&body)));
        }
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    fn element_path(element: &ElementRef, suffix: &str) -> String {
        format!("/element/{}{}", element.0, suffix)
    }

    fn element_arg(element: &ElementRef) -> Value {
        json!({ ELEMENT_KEY: element.0 })
    }

    fn elements_from(value: &Value) -> Vec<ElementRef> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item[ELEMENT_KEY].as_str())
                    .map(|id| ElementRef(id.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn perform(&self, actions: Value) -> RunnerResult<()> {
        self.command(Method::POST, "/actions", Some(json!({ "actions": actions })))
            .await?;
        self.command(Method::DELETE, "/actions", None).await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for WebDriverSession {
    async fn navigate(&self, url: &str) -> RunnerResult<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn current_url(&self) -> RunnerResult<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> RunnerResult<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn find_elements(&self, locator: &Locator) -> RunnerResult<Vec<ElementRef>> {
        let (using, value) = match locator {
            Locator::Css(selector) => ("css selector", selector),
            Locator::XPath(xpath) => ("xpath", xpath),
            Locator::AccessibleName(name) => {
                let found = self
                    .execute_script(ACCESSIBLE_NAME_SCRIPT, vec![json!(name)])
                    .await?;
                return Ok(Self::elements_from(&found));
            }
        };
        let found = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        Ok(Self::elements_from(&found))
    }

    async fn element_text(&self, element: &ElementRef) -> RunnerResult<String> {
        let value = self
            .command(Method::GET, &Self::element_path(element, "/text"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn element_attribute(&self, element: &ElementRef, name: &str) -> RunnerResult<Option<String>> {
        let value = self
            .command(
                Method::GET,
                &Self::element_path(element, &format!("/attribute/{}", name)),
                None,
            )
            .await?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn element_accessible_name(&self, element: &ElementRef) -> RunnerResult<String> {
        let value = self
            .command(Method::GET, &Self::element_path(element, "/computedlabel"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn element_tag(&self, element: &ElementRef) -> RunnerResult<String> {
        let value = self
            .command(Method::GET, &Self::element_path(element, "/name"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_lowercase())
    }

    async fn element_rect(&self, element: &ElementRef) -> RunnerResult<Rect> {
        let value = self
            .command(Method::GET, &Self::element_path(element, "/rect"), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn element_click(&self, element: &ElementRef) -> RunnerResult<()> {
        self.command(Method::POST, &Self::element_path(element, "/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn element_send_keys(&self, element: &ElementRef, text: &str) -> RunnerResult<()> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> RunnerResult<()> {
        let mut key_actions = Vec::new();
        for c in text.chars() {
            key_actions.push(json!({ "type": "keyDown", "value": c.to_string() }));
            key_actions.push(json!({ "type": "keyUp", "value": c.to_string() }));
        }
        self.perform(json!([{ "type": "key", "id": "keyboard", "actions": key_actions }]))
            .await
    }

    async fn move_to(&self, element: &ElementRef) -> RunnerResult<()> {
        self.perform(json!([{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "origin": Self::element_arg(element), "x": 0, "y": 0 }
            ]
        }]))
        .await
    }

    async fn pointer_click(&self, element: &ElementRef, button: u8) -> RunnerResult<()> {
        self.perform(json!([{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "origin": Self::element_arg(element), "x": 0, "y": 0 },
                { "type": "pointerDown", "button": button },
                { "type": "pointerUp", "button": button }
            ]
        }]))
        .await
    }

    async fn drag_and_drop(&self, source: &ElementRef, target: &ElementRef, duration_ms: u64) -> RunnerResult<()> {
        self.perform(json!([{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [
                { "type": "pointerMove", "origin": Self::element_arg(source), "x": 0, "y": 0 },
                { "type": "pointerDown", "button": 0 },
                { "type": "pause", "duration": 100 },
                { "type": "pointerMove", "origin": Self::element_arg(target), "x": 0, "y": 0, "duration": duration_ms },
                { "type": "pointerUp", "button": 0 }
            ]
        }]))
        .await
    }

    async fn cookies(&self) -> RunnerResult<Vec<Cookie>> {
        let value = self.command(Method::GET, "/cookie", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn add_cookie(&self, cookie: &Cookie) -> RunnerResult<()> {
        self.command(Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
            .await?;
        Ok(())
    }

    async fn screenshot(&self) -> RunnerResult<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| RunnerError::Driver("screenshot response was not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RunnerError::Driver(format!("invalid screenshot data: {}", e)))
    }

    async fn window_size(&self) -> RunnerResult<(u32, u32)> {
        let rect: Rect = serde_json::from_value(self.command(Method::GET, "/window/rect", None).await?)?;
        Ok((rect.width as u32, rect.height as u32))
    }

    async fn set_window_size(&self, width: u32, height: u32) -> RunnerResult<()> {
        self.command(
            Method::POST,
            "/window/rect",
            Some(json!({ "width": width, "height": height })),
        )
        .await?;
        Ok(())
    }

    async fn quit(&self) -> RunnerResult<()> {
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_session_start_and_find_elements() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/session");
                then.status(200)
                    .json_body(json!({ "value": { "sessionId": "abc", "capabilities": {} } }));
            })
            .await;
        let find = server
            .mock_async(|when, then| {
                when.method(POST).path("/session/abc/elements");
                then.status(200).json_body(json!({ "value": [
                    { ELEMENT_KEY: "e1" },
                    { ELEMENT_KEY: "e2" }
                ] }));
            })
            .await;

        let factory = WebDriverFactory::new(server.base_url()).unwrap();
        let driver = factory
            .start(&Capabilities {
                browser: "chrome".into(),
                headless: true,
                window: None,
                viewport: None,
            })
            .await
            .unwrap();

        let found = driver.find_elements(&Locator::Css("button".into())).await.unwrap();
        assert_eq!(found, vec![ElementRef("e1".into()), ElementRef("e2".into())]);
        create.assert_async().await;
        find.assert_async().await;
    }

    #[tokio::test]
    async fn test_session_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session");
                then.status(500).json_body(json!({ "value": {
                    "error": "session not created",
                    "message": "Could not start a new session"
                } }));
            })
            .await;

        let factory = WebDriverFactory::new(server.base_url()).unwrap();
        let err = factory
            .start(&Capabilities {
                browser: "safari".into(),
                headless: false,
                window: None,
                viewport: None,
            })
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("session not created"));
    }
}
