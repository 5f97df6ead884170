//! In-memory browser used by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docrun_runner::driver::{Capabilities, Cookie, Driver, DriverFactory, ElementRef, Locator, Rect};
use docrun_runner::{RunnerError, RunnerResult};

/// One element of the fake document. Elements are flat; there is no nesting.
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub tag: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub aria: Option<String>,
    pub rect: Option<Rect>,
    /// Hidden from queries until this long after the driver was created
    pub appears_after: Option<Duration>,
}

impl MockElement {
    pub fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn aria(mut self, name: &str) -> Self {
        self.aria = Some(name.to_string());
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Some(Rect { x, y, width, height });
        self
    }

    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appears_after = Some(delay);
        self
    }
}

/// Everything the driver was asked to do
#[derive(Debug, Default)]
pub struct Calls {
    pub navigations: Vec<String>,
    pub clicks: Vec<(String, u8)>,
    pub typed: Vec<(Option<String>, String)>,
    pub drags: Vec<(String, String)>,
    pub queries: usize,
    pub quit: bool,
}

pub struct MockDriver {
    created: Instant,
    elements: Mutex<Vec<MockElement>>,
    cookies: Mutex<Vec<Cookie>>,
    color: Mutex<[u8; 4]>,
    pub calls: Mutex<Calls>,
}

impl MockDriver {
    pub fn new(elements: Vec<MockElement>) -> Arc<Self> {
        Arc::new(Self {
            created: Instant::now(),
            elements: Mutex::new(elements),
            cookies: Mutex::new(Vec::new()),
            color: Mutex::new([255, 255, 255, 255]),
            calls: Mutex::new(Calls::default()),
        })
    }

    /// Fill color of subsequent screenshots
    pub fn set_color(&self, rgba: [u8; 4]) {
        *self.color.lock().unwrap() = rgba;
    }

    pub fn set_cookies(&self, cookies: Vec<Cookie>) {
        *self.cookies.lock().unwrap() = cookies;
    }

    pub fn cookie_jar(&self) -> Vec<Cookie> {
        self.cookies.lock().unwrap().clone()
    }

    fn visible(&self) -> Vec<(usize, MockElement)> {
        let elapsed = self.created.elapsed();
        self.elements
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, e)| e.appears_after.map_or(true, |delay| elapsed >= delay))
            .collect()
    }

    fn element(&self, element: &ElementRef) -> RunnerResult<MockElement> {
        element
            .0
            .parse::<usize>()
            .ok()
            .and_then(|i| self.elements.lock().unwrap().get(i).cloned())
            .ok_or_else(|| RunnerError::Driver(format!("stale element {}", element.0)))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First quoted literal following `normalize-space(.)=`
fn xpath_text(xpath: &str) -> Option<String> {
    let rest = &xpath[xpath.find("normalize-space(.)=")? + "normalize-space(.)=".len()..];
    let quote = rest.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let body = &rest[1..];
    Some(body[..body.find(quote)?].to_string())
}

enum Predicate {
    Present(String),
    Equals(String, String),
    Word(String, String),
}

/// Parses `tag`, `*`, `#id`, followed by any `[name]`, `[name="v"]`,
/// `[name~="v"]` predicates
fn parse_css(selector: &str) -> Option<(Option<String>, Vec<Predicate>)> {
    let selector = selector.trim();
    let head_end = selector.find('[').unwrap_or(selector.len());
    let (head, mut rest) = selector.split_at(head_end);

    let mut predicates = Vec::new();
    let tag = if head.is_empty() || head == "*" {
        None
    } else if let Some(id) = head.strip_prefix('#') {
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return None;
        }
        predicates.push(Predicate::Equals("id".into(), id.into()));
        None
    } else if head.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(head.to_lowercase())
    } else {
        return None;
    };

    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let (name, after) = match inner.find(|c: char| c == '=' || c == '~' || c == ']') {
            Some(i) => inner.split_at(i),
            None => return None,
        };
        if let Some(after) = after.strip_prefix(']') {
            predicates.push(Predicate::Present(name.into()));
            rest = after;
            continue;
        }
        let (word, after) = match after.strip_prefix("~=") {
            Some(after) => (true, after),
            None => (false, after.strip_prefix('=')?),
        };
        let after = after.strip_prefix('"')?;
        let mut value = String::new();
        let mut chars = after.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '"' => {
                    end = Some(i);
                    break;
                }
                other => value.push(other),
            }
        }
        let after = after[end? + 1..].strip_prefix(']')?;
        predicates.push(if word {
            Predicate::Word(name.into(), value)
        } else {
            Predicate::Equals(name.into(), value)
        });
        rest = after;
    }
    Some((tag, predicates))
}

fn css_matches(element: &MockElement, tag: &Option<String>, predicates: &[Predicate]) -> bool {
    if let Some(tag) = tag {
        if &element.tag != tag {
            return false;
        }
    }
    predicates.iter().all(|p| match p {
        Predicate::Present(name) => element.attributes.contains_key(name),
        Predicate::Equals(name, value) => element.attributes.get(name) == Some(value),
        Predicate::Word(name, value) => element
            .attributes
            .get(name)
            .map_or(false, |v| v.split_whitespace().any(|w| w == value.as_str())),
    })
}

fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[async_trait]
impl Driver for MockDriver {
    async fn navigate(&self, url: &str) -> RunnerResult<()> {
        self.calls.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> RunnerResult<String> {
        Ok(self
            .calls
            .lock()
            .unwrap()
            .navigations
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn execute_script(&self, script: &str, _args: Vec<Value>) -> RunnerResult<Value> {
        Ok(if script.contains("readyState") {
            json!("complete")
        } else if script.contains("getEntriesByType") {
            json!(0)
        } else if script.contains("__docrunLastMutation") {
            json!(100_000)
        } else if script.contains("innerWidth") {
            json!([1200, 800])
        } else if script.contains("devicePixelRatio") {
            json!(1)
        } else {
            Value::Null
        })
    }

    async fn find_elements(&self, locator: &Locator) -> RunnerResult<Vec<ElementRef>> {
        self.calls.lock().unwrap().queries += 1;
        let visible = self.visible();
        let matched: Vec<usize> = match locator {
            Locator::XPath(xpath) => {
                let text = xpath_text(xpath)
                    .ok_or_else(|| RunnerError::Driver(format!("unsupported xpath {}", xpath)))?;
                visible
                    .iter()
                    .filter(|(_, e)| normalize(&e.text) == text)
                    .map(|(i, _)| *i)
                    .collect()
            }
            Locator::AccessibleName(name) => visible
                .iter()
                .filter(|(_, e)| e.aria.as_deref() == Some(name.as_str()))
                .map(|(i, _)| *i)
                .collect(),
            Locator::Css(selector) => {
                let (tag, predicates) = parse_css(selector)
                    .ok_or_else(|| RunnerError::Driver(format!("invalid selector: {}", selector)))?;
                visible
                    .iter()
                    .filter(|(_, e)| css_matches(e, &tag, &predicates))
                    .map(|(i, _)| *i)
                    .collect()
            }
        };
        Ok(matched.into_iter().map(|i| ElementRef(i.to_string())).collect())
    }

    async fn element_text(&self, element: &ElementRef) -> RunnerResult<String> {
        Ok(self.element(element)?.text)
    }

    async fn element_attribute(&self, element: &ElementRef, name: &str) -> RunnerResult<Option<String>> {
        Ok(self.element(element)?.attributes.get(name).cloned())
    }

    async fn element_accessible_name(&self, element: &ElementRef) -> RunnerResult<String> {
        Ok(self.element(element)?.aria.unwrap_or_default())
    }

    async fn element_tag(&self, element: &ElementRef) -> RunnerResult<String> {
        Ok(self.element(element)?.tag)
    }

    async fn element_rect(&self, element: &ElementRef) -> RunnerResult<Rect> {
        Ok(self.element(element)?.rect.unwrap_or(Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        }))
    }

    async fn element_click(&self, element: &ElementRef) -> RunnerResult<()> {
        self.element(element)?;
        self.calls.lock().unwrap().clicks.push((element.0.clone(), 0));
        Ok(())
    }

    async fn element_send_keys(&self, element: &ElementRef, text: &str) -> RunnerResult<()> {
        self.calls
            .lock()
            .unwrap()
            .typed
            .push((Some(element.0.clone()), text.to_string()));
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> RunnerResult<()> {
        self.calls.lock().unwrap().typed.push((None, text.to_string()));
        Ok(())
    }

    async fn move_to(&self, element: &ElementRef) -> RunnerResult<()> {
        self.element(element).map(|_| ())
    }

    async fn pointer_click(&self, element: &ElementRef, button: u8) -> RunnerResult<()> {
        self.calls.lock().unwrap().clicks.push((element.0.clone(), button));
        Ok(())
    }

    async fn drag_and_drop(&self, source: &ElementRef, target: &ElementRef, _duration_ms: u64) -> RunnerResult<()> {
        self.calls
            .lock()
            .unwrap()
            .drags
            .push((source.0.clone(), target.0.clone()));
        Ok(())
    }

    async fn cookies(&self) -> RunnerResult<Vec<Cookie>> {
        Ok(self.cookie_jar())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> RunnerResult<()> {
        let mut jar = self.cookies.lock().unwrap();
        jar.retain(|c| c.name != cookie.name);
        jar.push(cookie.clone());
        Ok(())
    }

    async fn screenshot(&self) -> RunnerResult<Vec<u8>> {
        Ok(png(40, 30, *self.color.lock().unwrap()))
    }

    async fn window_size(&self) -> RunnerResult<(u32, u32)> {
        Ok((1200, 900))
    }

    async fn set_window_size(&self, _width: u32, _height: u32) -> RunnerResult<()> {
        Ok(())
    }

    async fn quit(&self) -> RunnerResult<()> {
        self.calls.lock().unwrap().quit = true;
        Ok(())
    }
}

/// Hands out one shared [`MockDriver`], failing the first `failures` starts
pub struct MockDriverFactory {
    pub driver: Arc<MockDriver>,
    failures: AtomicUsize,
    pub started: Mutex<Vec<Capabilities>>,
}

impl MockDriverFactory {
    pub fn new(driver: Arc<MockDriver>) -> Arc<Self> {
        Self::failing(driver, 0)
    }

    pub fn failing(driver: Arc<MockDriver>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            driver,
            failures: AtomicUsize::new(failures),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<Capabilities> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn start(&self, capabilities: &Capabilities) -> RunnerResult<Arc<dyn Driver>> {
        self.started.lock().unwrap().push(capabilities.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RunnerError::SessionStart("browser refused to start".into()));
        }
        Ok(self.driver.clone() as Arc<dyn Driver>)
    }
}
