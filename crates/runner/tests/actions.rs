//! Action handlers against httpmock, real processes and the mock browser

mod support;

use httpmock::prelude::*;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use docrun_common::{Config, Outcome, Step};
use docrun_runner::actions::{ActionContext, Actions, ChangedFiles, Recording, StepExecutor, StepOutcome};
use docrun_runner::driver::{Cookie, Driver};
use docrun_runner::Environment;
use support::{MockDriver, MockElement};

struct Fixture {
    env: Environment,
    config: Config,
    changed: ChangedFiles,
    recording: Option<Recording>,
    driver: Option<Arc<dyn Driver>>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            env: Environment::from_process(),
            config: Config::default(),
            changed: ChangedFiles::default(),
            recording: None,
            driver: None,
        }
    }

    fn with_driver(driver: Arc<MockDriver>) -> Self {
        Self {
            driver: Some(driver),
            ..Self::new()
        }
    }

    async fn run(&mut self, step: Value, base_dir: &Path) -> StepOutcome {
        let step = Step::from_value(step).unwrap();
        let mut ctx = ActionContext {
            step_id: step.step_id.clone(),
            driver: self.driver.clone(),
            env: &mut self.env,
            config: &self.config,
            base_dir: base_dir.to_path_buf(),
            changed_files: &self.changed,
            recording: &mut self.recording,
        };
        Actions.execute(&step, &mut ctx).await
    }
}

#[tokio::test]
async fn test_http_request_checks_status_and_body_subset() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/users")
                .header("x-api-key", "k1")
                .query_param("notify", "true")
                .json_body(json!({"name": "ada"}));
            then.status(201)
                .header("content-type", "application/json")
                .json_body(json!({"id": 7, "name": "ada", "roles": ["admin", "dev"]}));
        })
        .await;

    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(
            json!({"httpRequest": {
                "url": server.url("/users"),
                "method": "post",
                "request": {
                    "headers": {"x-api-key": "k1"},
                    "parameters": {"notify": true},
                    "body": {"name": "ada"}
                },
                "response": {
                    "headers": {"Content-Type": "application/json"},
                    "body": {"name": "ada", "roles": ["dev"]}
                },
                "statusCodes": [201]
            }}),
            Path::new("."),
        )
        .await;

    mock.assert_async().await;
    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert_eq!(outcome.outputs["response"]["statusCode"], 201);
    assert_eq!(outcome.outputs["response"]["body"]["id"], 7);
}

#[tokio::test]
async fn test_http_request_rejects_extra_fields_when_disallowed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200).json_body(json!({"ok": true, "debug": "x"}));
        })
        .await;

    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(
            json!({"httpRequest": {
                "url": server.url("/status"),
                "response": {"body": {"ok": true}},
                "allowAdditionalFields": false
            }}),
            Path::new("."),
        )
        .await;

    assert_eq!(outcome.result, Outcome::Fail);
    assert!(outcome.description.contains("body.debug"));
}

#[tokio::test]
async fn test_http_request_unexpected_status_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/missing");
            then.status(404).body("nope");
        })
        .await;

    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(json!({"httpRequest": server.url("/missing")}), Path::new("."))
        .await;

    assert_eq!(outcome.result, Outcome::Fail);
    assert!(outcome.description.contains("404"));
    assert_eq!(outcome.outputs["response"]["body"], "nope");
}

#[tokio::test]
async fn test_check_link_joins_origin() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/intro");
            then.status(202);
        })
        .await;

    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(
            json!({"checkLink": {"url": "/docs/intro", "origin": server.base_url()}}),
            Path::new("."),
        )
        .await;

    mock.assert_async().await;
    assert_eq!(outcome.result, Outcome::Pass);
}

#[tokio::test]
async fn test_check_link_unreachable_fails() {
    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(json!({"checkLink": "http://127.0.0.1:9/nowhere"}), Path::new("."))
        .await;
    assert_eq!(outcome.result, Outcome::Fail);
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_shell_exit_code_and_stdio() {
    let mut fixture = Fixture::new();

    let outcome = fixture
        .run(
            json!({"runShell": {"command": "echo", "args": ["build ok"], "stdio": "/build (ok|done)/"}}),
            Path::new("."),
        )
        .await;
    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert_eq!(outcome.outputs["stdio"]["stdout"], "build ok");

    let outcome = fixture
        .run(json!({"runShell": {"command": "exit 3", "exitCodes": [0, 1]}}), Path::new("."))
        .await;
    assert_eq!(outcome.result, Outcome::Fail);
    assert_eq!(outcome.outputs["exitCode"], 3);
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_shell_timeout_fails() {
    let mut fixture = Fixture::new();
    let outcome = fixture
        .run(json!({"runShell": {"command": "sleep 5", "timeout": 200}}), Path::new("."))
        .await;
    assert_eq!(outcome.result, Outcome::Fail);
    assert!(outcome.description.contains("Timeout"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_shell_sees_context_environment() {
    let mut fixture = Fixture::new();
    fixture.env.set("DOCRUN_TOKEN", "abc123");
    let outcome = fixture
        .run(
            json!({"runShell": {"command": "printenv DOCRUN_TOKEN", "stdio": "abc123"}}),
            Path::new("."),
        )
        .await;
    assert_eq!(outcome.result, Outcome::Pass);
}

#[tokio::test]
async fn test_screenshot_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new(vec![]);
    let mut fixture = Fixture::with_driver(driver.clone());
    let step = json!({"stepId": "home", "screenshot": {"maxVariation": 0.1}});

    // First capture creates the file
    let outcome = fixture.run(step.clone(), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass);
    assert!(dir.path().join("home.png").exists());
    assert_eq!(fixture.changed.snapshot().len(), 1);

    // Identical capture matches
    let outcome = fixture.run(step.clone(), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass);
    assert_eq!(outcome.outputs["changed"], false);

    // Whole-image change fails without overwrite
    driver.set_color([0, 0, 0, 255]);
    let outcome = fixture.run(step, dir.path()).await;
    assert_eq!(outcome.result, Outcome::Fail);

    let outcome = fixture
        .run(
            json!({"stepId": "home", "screenshot": {"maxVariation": 0.1, "overwrite": "aboveVariation"}}),
            dir.path(),
        )
        .await;
    assert_eq!(outcome.result, Outcome::Warning);
    assert_eq!(fixture.changed.snapshot().len(), 2);
}

#[tokio::test]
async fn test_cookie_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new(vec![]);
    driver.set_cookies(vec![Cookie {
        name: "session".into(),
        value: "s3cr3t".into(),
        path: Some("/".into()),
        domain: None,
        secure: Some(true),
        http_only: Some(true),
        expiry: None,
        same_site: None,
    }]);
    let mut fixture = Fixture::with_driver(driver.clone());

    let outcome = fixture.run(json!({"saveCookie": "session"}), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass);
    assert!(dir.path().join("session.json").exists());

    driver.set_cookies(vec![]);
    let outcome = fixture.run(json!({"loadCookie": "session"}), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass);
    assert_eq!(driver.cookie_jar()[0].value, "s3cr3t");
}

#[tokio::test]
async fn test_save_cookie_to_variable() {
    let driver = MockDriver::new(vec![]);
    driver.set_cookies(vec![Cookie {
        name: "pref".into(),
        value: "dark".into(),
        path: None,
        domain: None,
        secure: None,
        http_only: None,
        expiry: None,
        same_site: None,
    }]);
    let mut fixture = Fixture::with_driver(driver);

    let outcome = fixture
        .run(json!({"saveCookie": {"name": "pref", "variable": "PREF_COOKIE"}}), Path::new("."))
        .await;

    assert_eq!(outcome.result, Outcome::Pass);
    assert!(fixture.env.get("PREF_COOKIE").unwrap().contains("dark"));
}

#[tokio::test]
async fn test_go_to_then_find_and_click() {
    let driver = MockDriver::new(vec![
        MockElement::new("h1", "Welcome"),
        MockElement::new("button", "Start").attr("id", "start"),
    ]);
    let mut fixture = Fixture::with_driver(driver.clone());
    fixture.config.origin = Some("https://docs.example.com".into());

    let outcome = fixture
        .run(
            json!({"goTo": {"url": "/tour", "waitUntil": {"find": "Welcome"}}}),
            Path::new("."),
        )
        .await;
    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert_eq!(
        driver.calls.lock().unwrap().navigations,
        vec!["https://docs.example.com/tour"]
    );

    let outcome = fixture
        .run(json!({"find": {"elementId": "start", "click": true}}), Path::new("."))
        .await;
    assert_eq!(outcome.result, Outcome::Pass);
    assert_eq!(outcome.outputs["element"]["foundBy"], "criteria");
    assert_eq!(outcome.outputs["element"]["tag"], "button");
    assert_eq!(driver.calls.lock().unwrap().clicks, vec![("1".to_string(), 0)]);
}

#[tokio::test]
async fn test_click_missing_element_fails_after_timeout() {
    let driver = MockDriver::new(vec![]);
    let mut fixture = Fixture::with_driver(driver);
    let outcome = fixture
        .run(json!({"click": {"elementText": "Ghost", "timeout": 200}}), Path::new("."))
        .await;
    assert_eq!(outcome.result, Outcome::Fail);
    assert!(outcome.description.contains("not found"));
}

#[tokio::test]
async fn test_type_into_active_element_translates_special_keys() {
    let driver = MockDriver::new(vec![]);
    let mut fixture = Fixture::with_driver(driver.clone());

    let outcome = fixture.run(json!({"type": ["hello", "$ENTER$"]}), Path::new(".")).await;

    assert_eq!(outcome.result, Outcome::Pass);
    let typed = &driver.calls.lock().unwrap().typed;
    assert_eq!(typed[0], (None, "hello".to_string()));
    assert_eq!(typed[1], (None, "\u{E007}".to_string()));
}

#[tokio::test]
async fn test_drag_and_drop_locates_both_ends() {
    let driver = MockDriver::new(vec![
        MockElement::new("li", "Card"),
        MockElement::new("div", "Done column"),
    ]);
    let mut fixture = Fixture::with_driver(driver.clone());

    let outcome = fixture
        .run(json!({"dragAndDrop": {"source": "Card", "target": "Done column"}}), Path::new("."))
        .await;

    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert_eq!(
        driver.calls.lock().unwrap().drags,
        vec![("0".to_string(), "1".to_string())]
    );
}

#[tokio::test]
async fn test_record_writes_frames_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new(vec![]);
    let mut fixture = Fixture::with_driver(driver);

    let outcome = fixture.run(json!({"stepId": "demo", "record": true}), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert!(fixture.recording.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(450)).await;

    let outcome = fixture.run(json!({"stopRecord": true}), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Pass, "{}", outcome.description);
    assert!(outcome.outputs["frames"].as_u64().unwrap() >= 1);
    let written = outcome.outputs["recordingPath"].as_str().unwrap();
    assert!(Path::new(written).exists());
    assert!(fixture.recording.is_none());
    assert_eq!(fixture.changed.snapshot().len(), 1);

    let outcome = fixture.run(json!({"stopRecord": true}), dir.path()).await;
    assert_eq!(outcome.result, Outcome::Skipped);
}
