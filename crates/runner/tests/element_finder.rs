//! Element lookup against the in-memory document

mod support;

use std::time::{Duration, Instant};

use serde_json::json;
use test_case::test_case;

use docrun_common::{ElementCriteria, ElementTarget};
use docrun_runner::element::{self, FoundBy, NOT_FOUND, POLL_INTERVAL};
use support::{MockDriver, MockElement};

fn criteria(value: serde_json::Value) -> ElementCriteria {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_text_beats_id_in_shorthand() {
    let driver = MockDriver::new(vec![
        MockElement::new("div", "header").attr("id", "Submit"),
        MockElement::new("button", "Submit"),
    ]);

    let found = element::find_by_shorthand(driver.as_ref(), "Submit", Duration::from_secs(1)).await;

    assert_eq!(found.found_by, Some(FoundBy::ElementText));
    assert_eq!(found.element.unwrap().0, "1");
    assert!(found.error.is_none());
}

#[test_case(MockElement::new("a", "icon").aria("Close dialog"), "Close dialog", FoundBy::ElementAria; "accessible name")]
#[test_case(MockElement::new("input", "").attr("id", "email"), "email", FoundBy::ElementId; "id attribute")]
#[test_case(MockElement::new("div", "").attr("data-testid", "cart"), "cart", FoundBy::ElementTestId; "test id")]
#[test_case(MockElement::new("nav", "Menu"), "nav", FoundBy::Selector; "css selector")]
#[tokio::test]
async fn test_shorthand_strategies(element: MockElement, text: &str, expected: FoundBy) {
    let driver = MockDriver::new(vec![element]);
    let found = element::find_by_shorthand(driver.as_ref(), text, Duration::from_secs(1)).await;
    assert_eq!(found.found_by, Some(expected));
}

#[tokio::test]
async fn test_shorthand_normalizes_whitespace() {
    let driver = MockDriver::new(vec![MockElement::new("p", "  Create   a\n project ")]);
    let found = element::find_by_shorthand(driver.as_ref(), "Create a project", Duration::from_secs(1)).await;
    assert_eq!(found.found_by, Some(FoundBy::ElementText));
}

#[tokio::test]
async fn test_regex_shorthand_prefers_text_over_id() {
    let driver = MockDriver::new(vec![
        MockElement::new("span", "").attr("id", "order-42"),
        MockElement::new("td", "Order 42 shipped"),
    ]);

    let found = element::find_by_shorthand(driver.as_ref(), "/[Oo]rder.42/", Duration::from_secs(1)).await;

    assert_eq!(found.found_by, Some(FoundBy::ElementText));
    assert_eq!(found.element.unwrap().0, "1");
}

#[tokio::test]
async fn test_shorthand_times_out_with_fixed_message() {
    let driver = MockDriver::new(vec![MockElement::new("p", "Something else")]);
    let timeout = Duration::from_millis(300);

    let start = Instant::now();
    let found = element::find_by_shorthand(driver.as_ref(), "Missing", timeout).await;
    let elapsed = start.elapsed();

    assert!(found.element.is_none());
    assert!(found.found_by.is_none());
    assert_eq!(found.error.as_deref(), Some(NOT_FOUND));
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(elapsed < timeout + POLL_INTERVAL * 3, "overshot: {:?}", elapsed);
}

#[tokio::test]
async fn test_criteria_are_and_combined() {
    let driver = MockDriver::new(vec![
        MockElement::new("button", "Save").attr("class", "btn secondary"),
        MockElement::new("button", "Save").attr("class", "btn primary").attr("type", "submit"),
    ]);

    let found = element::find_by_criteria(
        driver.as_ref(),
        &criteria(json!({
            "elementText": "Save",
            "elementClass": ["btn", "/prim.*/"],
            "elementAttribute": {"type": "submit"}
        })),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(found.found_by, Some(FoundBy::Criteria));
    assert_eq!(found.element.unwrap().0, "1");
}

#[tokio::test]
async fn test_attribute_presence_and_absence() {
    let driver = MockDriver::new(vec![
        MockElement::new("input", "").attr("id", "a").attr("disabled", ""),
        MockElement::new("input", "").attr("id", "b"),
    ]);

    let found = element::find_by_criteria(
        driver.as_ref(),
        &criteria(json!({"selector": "input", "elementAttribute": {"disabled": false}})),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(found.element.unwrap().0, "1");
}

#[tokio::test]
async fn test_criteria_polls_until_element_appears() {
    let driver = MockDriver::new(vec![
        MockElement::new("div", "Loaded").attr("id", "status").appears_after(Duration::from_millis(250)),
    ]);

    let start = Instant::now();
    let found = element::find_by_criteria(
        driver.as_ref(),
        &criteria(json!({"elementId": "status"})),
        Duration::from_secs(2),
    )
    .await;

    assert!(found.element.is_some());
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert!(driver.calls.lock().unwrap().queries > 1);
}

#[tokio::test]
async fn test_criteria_timeout_is_deterministic() {
    let driver = MockDriver::new(vec![]);
    let target = ElementTarget::criteria(criteria(json!({"elementText": "Never"})), Some(300));

    let start = Instant::now();
    let found = element::find_element(driver.as_ref(), &target).await;
    let elapsed = start.elapsed();

    assert_eq!(found.error.as_deref(), Some(NOT_FOUND));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300) + POLL_INTERVAL * 3);
}

#[tokio::test]
async fn test_empty_criteria_is_an_immediate_error() {
    let driver = MockDriver::new(vec![MockElement::new("p", "anything")]);
    let target = ElementTarget::criteria(ElementCriteria::default(), Some(5_000));

    let start = Instant::now();
    let found = element::find_element(driver.as_ref(), &target).await;

    assert!(found.element.is_none());
    assert!(found.error.is_some());
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(driver.calls.lock().unwrap().queries, 0);
}
