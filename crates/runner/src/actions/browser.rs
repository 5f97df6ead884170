//! Browser actions: find, click, type, dragAndDrop, goTo

use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::time::sleep;

use docrun_common::step::{ClickStep, DragAndDropStep, ElementTarget, FindStep, GoToStep, MouseButton, TypeStep};

use super::{ActionContext, StepOutcome};
use crate::driver::{Driver, ElementRef};
use crate::element::{self, FindResult};
use crate::error::RunnerResult;

const READY_STATE_SCRIPT: &str = "return document.readyState;";

const RESOURCE_COUNT_SCRIPT: &str = "return performance.getEntriesByType('resource').length;";

/// Installs a mutation observer on first call; returns ms since the last mutation
const DOM_QUIET_SCRIPT: &str = r#"
if (!window.__docrunObserver) {
  window.__docrunLastMutation = Date.now();
  window.__docrunObserver = new MutationObserver(function () { window.__docrunLastMutation = Date.now(); });
  window.__docrunObserver.observe(document.documentElement || document, { childList: true, subtree: true, attributes: true, characterData: true });
}
return Date.now() - window.__docrunLastMutation;
"#;

const WAIT_POLL: Duration = Duration::from_millis(100);

/// An element lookup as a step result plus the element, when found
#[derive(Debug, Clone)]
pub struct ElementLookup {
    pub outcome: StepOutcome,
    pub element: Option<ElementRef>,
}

/// Locate an element for a step.
///
/// Returns `{status, description, outputs}` with
/// `outputs.element = {text, tag, foundBy}` on success.
pub async fn find_element(target: &ElementTarget, driver: &dyn Driver) -> ElementLookup {
    if target.is_empty() {
        return ElementLookup {
            outcome: StepOutcome::fail("No element criteria supplied."),
            element: None,
        };
    }

    let FindResult {
        element,
        found_by,
        error,
    } = element::find_element(driver, target).await;

    let (Some(element), Some(found_by)) = (element, found_by) else {
        return ElementLookup {
            outcome: StepOutcome::fail(error.unwrap_or_else(|| element::NOT_FOUND.to_string())),
            element: None,
        };
    };

    let text = driver.element_text(&element).await.unwrap_or_default();
    let tag = driver.element_tag(&element).await.ok();
    ElementLookup {
        outcome: StepOutcome::pass(format!("Found element by {}.", found_by)).with_outputs(json!({
            "element": { "text": text, "tag": tag, "foundBy": found_by }
        })),
        element: Some(element),
    }
}

pub(super) async fn find(step: &FindStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let lookup = find_element(&step.target, driver.as_ref()).await;
    let Some(element) = lookup.element else {
        return Ok(lookup.outcome);
    };

    let mut outcome = lookup.outcome;
    if step.move_to {
        driver.move_to(&element).await?;
        outcome.description.push_str(" Moved to element.");
    }
    if let Some(button) = step.click {
        click_element(driver.as_ref(), &element, button).await?;
        outcome.description.push_str(" Clicked element.");
    }
    if let Some(typing) = &step.type_keys {
        send_keys(driver.as_ref(), Some(&element), typing).await?;
        outcome.description.push_str(" Typed keys.");
    }
    Ok(outcome)
}

pub(super) async fn click(step: &ClickStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let lookup = find_element(&step.target, driver.as_ref()).await;
    let Some(element) = lookup.element else {
        return Ok(lookup.outcome);
    };

    click_element(driver.as_ref(), &element, step.button).await?;
    let mut outcome = lookup.outcome;
    outcome.description = format!("Clicked element. {}", outcome.description);
    Ok(outcome)
}

async fn click_element(driver: &dyn Driver, element: &ElementRef, button: MouseButton) -> RunnerResult<()> {
    match button {
        MouseButton::Left => driver.element_click(element).await,
        other => driver.pointer_click(element, other.code()).await,
    }
}

pub(super) async fn type_keys(step: &TypeStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;

    if step.target.is_empty() {
        send_keys(driver.as_ref(), None, step).await?;
        return Ok(StepOutcome::pass("Typed keys."));
    }

    let lookup = find_element(&step.target, driver.as_ref()).await;
    let Some(element) = lookup.element else {
        return Ok(lookup.outcome);
    };
    send_keys(driver.as_ref(), Some(&element), step).await?;
    Ok(StepOutcome::pass(format!("Typed keys. {}", lookup.outcome.description)).with_outputs(lookup.outcome.outputs))
}

async fn send_keys(driver: &dyn Driver, element: Option<&ElementRef>, step: &TypeStep) -> RunnerResult<()> {
    for (i, key) in step.keys.iter().enumerate() {
        if i > 0 && step.input_delay_ms > 0 {
            sleep(Duration::from_millis(step.input_delay_ms)).await;
        }
        let text = translate_special_keys(key);
        match element {
            Some(element) => driver.element_send_keys(element, &text).await?,
            None => driver.send_keys(&text).await?,
        }
    }
    Ok(())
}

/// Replace `$KEY$` tokens with WebDriver key code points
pub(crate) fn translate_special_keys(keys: &str) -> String {
    const SPECIAL: &[(&str, char)] = &[
        ("$ENTER$", '\u{E007}'),
        ("$TAB$", '\u{E004}'),
        ("$ESCAPE$", '\u{E00C}'),
        ("$BACKSPACE$", '\u{E003}'),
        ("$DELETE$", '\u{E017}'),
        ("$ARROW_UP$", '\u{E013}'),
        ("$ARROW_DOWN$", '\u{E015}'),
        ("$ARROW_LEFT$", '\u{E012}'),
        ("$ARROW_RIGHT$", '\u{E014}'),
    ];

    if !keys.contains('$') {
        return keys.to_string();
    }
    SPECIAL
        .iter()
        .fold(keys.to_string(), |acc, (token, code)| acc.replace(token, &code.to_string()))
}

pub(super) async fn drag_and_drop(step: &DragAndDropStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let (source, target) = tokio::join!(
        find_element(&step.source, driver.as_ref()),
        find_element(&step.target, driver.as_ref()),
    );

    let Some(source_el) = source.element else {
        return Ok(StepOutcome::fail(format!("Source element: {}", source.outcome.description)));
    };
    let Some(target_el) = target.element else {
        return Ok(StepOutcome::fail(format!("Target element: {}", target.outcome.description)));
    };

    driver.drag_and_drop(&source_el, &target_el, step.duration).await?;
    Ok(StepOutcome::pass("Dragged source element onto target element.").with_outputs(json!({
        "source": source.outcome.outputs["element"],
        "target": target.outcome.outputs["element"],
    })))
}

pub(super) async fn go_to(step: &GoToStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let url = ctx.absolute_url(&step.url, step.origin.as_deref())?;

    let start = Instant::now();
    let deadline = start + Duration::from_millis(step.timeout_ms);
    driver.navigate(&url).await?;

    let ready = wait_for_ready(driver.as_ref(), deadline).await;
    let mut checks = vec![("document ready".to_string(), ready)];

    if ready {
        let wait = &step.wait_until;
        let network = async {
            match wait.network_idle_time {
                Some(ms) => Some(wait_for_network_idle(driver.as_ref(), ms, deadline).await),
                None => None,
            }
        };
        let dom = async {
            match wait.dom_idle_time {
                Some(ms) => Some(wait_for_dom_stable(driver.as_ref(), ms, deadline).await),
                None => None,
            }
        };
        let found = async {
            match &wait.find {
                Some(target) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let target = ElementTarget {
                        timeout_ms: remaining.as_millis() as u64,
                        ..target.clone()
                    };
                    Some(element::find_element(driver.as_ref(), &target).await.element.is_some())
                }
                None => None,
            }
        };
        let (network, dom, found) = tokio::join!(network, dom, found);

        if let (Some(ok), Some(ms)) = (network, wait.network_idle_time) {
            checks.push((format!("network idle for {} ms", ms), ok));
        }
        if let (Some(ok), Some(ms)) = (dom, wait.dom_idle_time) {
            checks.push((format!("DOM stable for {} ms", ms), ok));
        }
        if let Some(ok) = found {
            checks.push(("element found".to_string(), ok));
        }
    }

    let outputs = json!({ "url": url });
    if checks.iter().all(|(_, ok)| *ok) {
        return Ok(StepOutcome::pass(format!("Opened {}.", url)).with_outputs(outputs));
    }

    let checklist: Vec<String> = checks
        .iter()
        .map(|(name, ok)| format!("{} {}", if *ok { "✓" } else { "✗" }, name))
        .collect();
    Ok(StepOutcome::fail(format!(
        "Timed out after {} ms waiting for {}: {}",
        start.elapsed().as_millis(),
        url,
        checklist.join(", ")
    ))
    .with_outputs(outputs))
}

async fn wait_for_ready(driver: &dyn Driver, deadline: Instant) -> bool {
    loop {
        if let Ok(Value::String(state)) = driver.execute_script(READY_STATE_SCRIPT, vec![]).await {
            if state == "complete" {
                return true;
            }
        }
        if Instant::now() + WAIT_POLL > deadline {
            return false;
        }
        sleep(WAIT_POLL).await;
    }
}

/// Idle once the resource-entry count stays unchanged for `idle_ms`
async fn wait_for_network_idle(driver: &dyn Driver, idle_ms: u64, deadline: Instant) -> bool {
    let idle = Duration::from_millis(idle_ms);
    let mut last_count: Option<u64> = None;
    let mut quiet_since = Instant::now();

    loop {
        let count = driver
            .execute_script(RESOURCE_COUNT_SCRIPT, vec![])
            .await
            .ok()
            .and_then(|v| v.as_u64());
        if count != last_count {
            last_count = count;
            quiet_since = Instant::now();
        }
        if quiet_since.elapsed() >= idle {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(WAIT_POLL).await;
    }
}

async fn wait_for_dom_stable(driver: &dyn Driver, idle_ms: u64, deadline: Instant) -> bool {
    loop {
        let quiet = driver
            .execute_script(DOM_QUIET_SCRIPT, vec![])
            .await
            .ok()
            .and_then(|v| v.as_f64());
        if quiet.is_some_and(|ms| ms >= idle_ms as f64) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(WAIT_POLL).await;
    }
}
