//! Element Finder
//!
//! Locates a single element in the live document, either from a shorthand
//! string (tried as text, accessible name, id, test id and CSS selector at
//! once) or from an AND-combined criteria set. Both modes poll until their
//! timeout elapses.

use futures::future::{join_all, BoxFuture, FutureExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use docrun_common::step::{ElementCriteria, ElementTarget};

use crate::driver::{Driver, ElementRef, Locator};
use crate::error::{RunnerError, RunnerResult};

/// Delay between lookups while waiting for an element
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const NOT_FOUND: &str = "Element not found within timeout";

const NO_CRITERIA: &str = "No element criteria supplied";

/// Which strategy located the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FoundBy {
    ElementText,
    ElementAria,
    ElementId,
    ElementTestId,
    Selector,
    Criteria,
}

impl FoundBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoundBy::ElementText => "elementText",
            FoundBy::ElementAria => "elementAria",
            FoundBy::ElementId => "elementId",
            FoundBy::ElementTestId => "elementTestId",
            FoundBy::Selector => "selector",
            FoundBy::Criteria => "criteria",
        }
    }
}

impl std::fmt::Display for FoundBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(element | none, foundBy, error?)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    pub element: Option<ElementRef>,
    pub found_by: Option<FoundBy>,
    pub error: Option<String>,
}

impl FindResult {
    fn found(element: ElementRef, found_by: FoundBy) -> Self {
        Self {
            element: Some(element),
            found_by: Some(found_by),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            element: None,
            found_by: None,
            error: Some(error.into()),
        }
    }
}

/// Find the element described by a step's target
pub async fn find_element(driver: &dyn Driver, target: &ElementTarget) -> FindResult {
    let timeout = Duration::from_millis(target.timeout_ms);
    match target.shorthand.as_deref() {
        Some(text) if !text.is_empty() => find_by_shorthand(driver, text, timeout).await,
        _ => find_by_criteria(driver, &target.criteria, timeout).await,
    }
}

/// Look an element up from one string.
///
/// Every round runs the five lookups concurrently and picks the winner by
/// precedence: text, accessible name, id, test id, selector. A `/regex/`
/// string runs the same strategies as sequential document scans.
pub async fn find_by_shorthand(driver: &dyn Driver, text: &str, timeout: Duration) -> FindResult {
    if text.is_empty() {
        return FindResult::failed(NO_CRITERIA);
    }

    if let Some(body) = regex_literal(text) {
        let re = match Regex::new(body) {
            Ok(re) => re,
            Err(e) => return FindResult::failed(format!("Invalid pattern {}: {}", text, e)),
        };
        let re = &re;
        return poll_until(timeout, move || scan_by_pattern(driver, re)).await;
    }

    poll_until(timeout, move || shorthand_round(driver, text)).await
}

/// Look an element up from AND-combined criteria.
///
/// A combined query narrows the candidates; each candidate is then checked
/// against every criterion concurrently and the first to pass wins.
pub async fn find_by_criteria(driver: &dyn Driver, criteria: &ElementCriteria, timeout: Duration) -> FindResult {
    if criteria.is_empty() {
        return FindResult::failed(NO_CRITERIA);
    }

    let checks = match CriteriaChecks::compile(criteria) {
        Ok(checks) => checks,
        Err(e) => return FindResult::failed(e.to_string()),
    };
    let locator = combined_locator(criteria);
    debug!("Searching for element with {:?}", locator);

    let checks = &checks;
    let locator = &locator;
    poll_until(timeout, move || async move {
        let candidates = match driver.find_elements(locator).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("Candidate query failed: {}", e);
                return None;
            }
        };
        for candidate in candidates {
            if checks.all_match(driver, &candidate).await {
                return Some((candidate, FoundBy::Criteria));
            }
        }
        None
    })
    .await
}

async fn poll_until<F, Fut>(timeout: Duration, mut attempt: F) -> FindResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<(ElementRef, FoundBy)>>,
{
    let start = Instant::now();
    loop {
        if let Some((element, found_by)) = attempt().await {
            debug!("Element found by {} after {} ms", found_by, start.elapsed().as_millis());
            return FindResult::found(element, found_by);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return FindResult::failed(NOT_FOUND);
        }
        sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
    }
}

async fn shorthand_round(driver: &dyn Driver, text: &str) -> Option<(ElementRef, FoundBy)> {
    let literal = css_string(text);
    let (by_text, by_aria, by_id, by_test_id, by_selector) = tokio::join!(
        first_match(driver, Locator::XPath(exact_text_xpath(text))),
        first_match(driver, Locator::AccessibleName(text.to_string())),
        first_match(driver, Locator::Css(format!("[id={}]", literal))),
        first_match(driver, Locator::Css(format!("[data-testid={}]", literal))),
        first_match(driver, Locator::Css(text.to_string())),
    );

    [
        (by_text, FoundBy::ElementText),
        (by_aria, FoundBy::ElementAria),
        (by_id, FoundBy::ElementId),
        (by_test_id, FoundBy::ElementTestId),
        (by_selector, FoundBy::Selector),
    ]
    .into_iter()
    .find_map(|(element, found_by)| element.map(|e| (e, found_by)))
}

async fn first_match(driver: &dyn Driver, locator: Locator) -> Option<ElementRef> {
    match driver.find_elements(&locator).await {
        Ok(elements) => elements.into_iter().next(),
        // An arbitrary string is rarely a valid selector
        Err(_) => None,
    }
}

/// One full-document scan per strategy, in precedence order
async fn scan_by_pattern(driver: &dyn Driver, re: &Regex) -> Option<(ElementRef, FoundBy)> {
    let all = driver.find_elements(&Locator::Css("*".to_string())).await.ok()?;

    // The innermost match carries the shortest text
    let mut best: Option<(usize, &ElementRef)> = None;
    for element in &all {
        let Ok(text) = driver.element_text(element).await else { continue };
        let text = normalize_text(&text);
        if re.is_match(&text) && best.map_or(true, |(len, _)| text.len() < len) {
            best = Some((text.len(), element));
        }
    }
    if let Some((_, element)) = best {
        return Some((element.clone(), FoundBy::ElementText));
    }

    for element in &all {
        if let Ok(name) = driver.element_accessible_name(element).await {
            if !name.is_empty() && re.is_match(&name) {
                return Some((element.clone(), FoundBy::ElementAria));
            }
        }
    }

    for (attribute, found_by) in [("id", FoundBy::ElementId), ("data-testid", FoundBy::ElementTestId)] {
        for element in &all {
            if let Ok(Some(value)) = driver.element_attribute(element, attribute).await {
                if re.is_match(&value) {
                    return Some((element.clone(), found_by));
                }
            }
        }
    }

    for element in &all {
        if let Ok(tag) = driver.element_tag(element).await {
            if re.is_match(&tag) {
                return Some((element.clone(), FoundBy::Selector));
            }
        }
    }

    None
}

/// An exact string or a `/regex/` literal
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    pub(crate) fn parse(text: &str) -> RunnerResult<Self> {
        match regex_literal(text) {
            Some(body) => Regex::new(body)
                .map(Pattern::Regex)
                .map_err(|e| RunnerError::InvalidPattern {
                    pattern: text.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(Pattern::Exact(text.to_string())),
        }
    }

    pub(crate) fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Regex(re) => re.is_match(value),
        }
    }
}

/// The body of a `/pattern/` literal
pub(crate) fn regex_literal(text: &str) -> Option<&str> {
    if text.len() > 2 && text.starts_with('/') && text.ends_with('/') {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

enum AttributeCheck {
    Present(bool),
    Value(Pattern),
}

struct CriteriaChecks {
    text: Option<Pattern>,
    id: Option<Pattern>,
    test_id: Option<Pattern>,
    classes: Vec<Pattern>,
    attributes: Vec<(String, AttributeCheck)>,
    aria: Option<Pattern>,
}

impl CriteriaChecks {
    fn compile(criteria: &ElementCriteria) -> RunnerResult<Self> {
        let text = match criteria.element_text.as_deref() {
            Some(t) => Some(match Pattern::parse(t)? {
                Pattern::Exact(t) => Pattern::Exact(normalize_text(&t)),
                regex => regex,
            }),
            None => None,
        };

        let mut attributes = Vec::with_capacity(criteria.element_attribute.len());
        for (name, value) in &criteria.element_attribute {
            let check = match value {
                Value::Bool(present) => AttributeCheck::Present(*present),
                Value::String(s) => AttributeCheck::Value(Pattern::parse(s)?),
                other => AttributeCheck::Value(Pattern::Exact(other.to_string())),
            };
            attributes.push((name.clone(), check));
        }

        Ok(Self {
            text,
            id: criteria.element_id.as_deref().map(Pattern::parse).transpose()?,
            test_id: criteria.element_test_id.as_deref().map(Pattern::parse).transpose()?,
            classes: criteria
                .element_class
                .iter()
                .map(|c| Pattern::parse(c))
                .collect::<RunnerResult<_>>()?,
            attributes,
            aria: criteria.element_aria.as_deref().map(Pattern::parse).transpose()?,
        })
    }

    async fn all_match(&self, driver: &dyn Driver, element: &ElementRef) -> bool {
        let mut checks: Vec<BoxFuture<'_, bool>> = Vec::new();

        if let Some(pattern) = &self.text {
            checks.push(
                async move {
                    driver
                        .element_text(element)
                        .await
                        .map(|t| pattern.matches(&normalize_text(&t)))
                        .unwrap_or(false)
                }
                .boxed(),
            );
        }
        if let Some(pattern) = &self.id {
            checks.push(attribute_matches(driver, element, "id", pattern).boxed());
        }
        if let Some(pattern) = &self.test_id {
            checks.push(attribute_matches(driver, element, "data-testid", pattern).boxed());
        }
        if !self.classes.is_empty() {
            checks.push(
                async move {
                    let Ok(Some(class)) = driver.element_attribute(element, "class").await else {
                        return false;
                    };
                    let present: Vec<&str> = class.split_whitespace().collect();
                    self.classes
                        .iter()
                        .all(|pattern| present.iter().any(|c| pattern.matches(c)))
                }
                .boxed(),
            );
        }
        for (name, check) in &self.attributes {
            checks.push(
                async move {
                    let value = match driver.element_attribute(element, name).await {
                        Ok(value) => value,
                        Err(_) => return false,
                    };
                    match (check, value) {
                        (AttributeCheck::Present(expected), value) => value.is_some() == *expected,
                        (AttributeCheck::Value(pattern), Some(value)) => pattern.matches(&value),
                        (AttributeCheck::Value(_), None) => false,
                    }
                }
                .boxed(),
            );
        }
        if let Some(pattern) = &self.aria {
            checks.push(
                async move {
                    driver
                        .element_accessible_name(element)
                        .await
                        .map(|name| pattern.matches(&name))
                        .unwrap_or(false)
                }
                .boxed(),
            );
        }

        join_all(checks).await.into_iter().all(|ok| ok)
    }
}

async fn attribute_matches(driver: &dyn Driver, element: &ElementRef, name: &str, pattern: &Pattern) -> bool {
    matches!(
        driver.element_attribute(element, name).await,
        Ok(Some(value)) if pattern.matches(&value)
    )
}

/// Query that narrows candidates using the criteria a single CSS or XPath
/// expression can carry. Regex criteria are left to validation.
pub(crate) fn combined_locator(criteria: &ElementCriteria) -> Locator {
    if let Some(selector) = &criteria.selector {
        return Locator::Css(selector.clone());
    }

    let mut css = String::new();
    if let Some(id) = exact(&criteria.element_id) {
        css.push_str(&format!("[id={}]", css_string(id)));
    }
    if let Some(test_id) = exact(&criteria.element_test_id) {
        css.push_str(&format!("[data-testid={}]", css_string(test_id)));
    }
    for class in &criteria.element_class {
        if regex_literal(class).is_none() {
            css.push_str(&format!("[class~={}]", css_string(class)));
        }
    }
    for (name, value) in &criteria.element_attribute {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            continue;
        }
        match value {
            Value::Bool(true) => css.push_str(&format!("[{}]", name)),
            Value::String(s) if regex_literal(s).is_none() => {
                css.push_str(&format!("[{}={}]", name, css_string(s)))
            }
            Value::Number(n) => css.push_str(&format!("[{}=\"{}\"]", name, n)),
            _ => {}
        }
    }
    if !css.is_empty() {
        return Locator::Css(format!("*{}", css));
    }

    if let Some(text) = exact(&criteria.element_text) {
        return Locator::XPath(exact_text_xpath(text));
    }
    if let Some(aria) = exact(&criteria.element_aria) {
        return Locator::AccessibleName(aria.to_string());
    }
    Locator::Css("*".to_string())
}

fn exact(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| regex_literal(v).is_none())
}

/// Innermost elements whose whitespace-normalized text equals `text`
pub fn exact_text_xpath(text: &str) -> String {
    let literal = xpath_literal(&normalize_text(text));
    format!(
        "//*[normalize-space(.)={lit} and not(*[normalize-space(.)={lit}])]",
        lit = literal
    )
}

fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn css_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
