//! Context resolution: expand a test's run targets into concrete contexts

use std::collections::HashSet;

use docrun_common::{generate_id, BrowserSpec, Context, RunTarget, Test};

/// Expand declared run targets into deduplicated `(platform, browser?)`
/// contexts for `test`.
///
/// Browsers only matter when a step needs a driver; otherwise each platform
/// yields one context. With no targets at all, a single unconstrained
/// context runs on the current host. Order of first appearance is kept.
pub fn resolve_contexts(targets: &[RunTarget], test: &Test) -> Vec<Context> {
    let driver_required = test.steps.iter().any(|step| step.action.requires_driver());

    let mut seen = HashSet::new();
    let mut candidates: Vec<(Option<String>, Option<BrowserSpec>)> = Vec::new();
    let mut push = |platform: Option<String>, browser: Option<BrowserSpec>| {
        let key = (
            platform.clone(),
            browser
                .as_ref()
                .map(|b| serde_json::to_string(b).unwrap_or_default()),
        );
        if seen.insert(key) {
            candidates.push((platform, browser));
        }
    };

    for target in targets {
        let platforms: Vec<Option<String>> = if target.platforms.is_empty() {
            vec![None]
        } else {
            target.platforms.iter().cloned().map(Some).collect()
        };

        for platform in platforms {
            if driver_required && !target.browsers.is_empty() {
                for browser in &target.browsers {
                    push(platform.clone(), Some(browser.clone()));
                }
            } else {
                push(platform.clone(), None);
            }
        }
    }

    if candidates.is_empty() {
        candidates.push((None, None));
    }

    candidates
        .into_iter()
        .map(|(platform, browser)| Context {
            context_id: generate_id(),
            platform,
            browser,
            steps: test.steps.clone(),
            open_api: test.open_api.clone(),
            unsafe_steps: test.unsafe_steps,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_with(steps: serde_json::Value, run_on: serde_json::Value) -> Test {
        serde_json::from_value(json!({"testId": "t", "steps": steps, "runOn": run_on})).unwrap()
    }

    fn pairs(contexts: &[Context]) -> Vec<(Option<&str>, Option<&str>)> {
        contexts
            .iter()
            .map(|c| (c.platform.as_deref(), c.browser.as_ref().map(|b| b.name.as_str())))
            .collect()
    }

    #[test]
    fn test_platforms_cross_browsers_when_driver_required() {
        let test = test_with(
            json!([{"goTo": "https://example.com"}]),
            json!([{"platforms": ["linux", "mac"], "browsers": ["chrome"]}]),
        );
        let contexts = resolve_contexts(&test.run_on, &test);
        assert_eq!(pairs(&contexts), vec![(Some("linux"), Some("chrome")), (Some("mac"), Some("chrome"))]);
        assert_eq!(contexts[0].browser, Some(BrowserSpec::named("chrome")));
        assert_ne!(contexts[0].context_id, contexts[1].context_id);
    }

    #[test]
    fn test_repeated_descriptors_are_deduplicated() {
        let test = test_with(
            json!([{"click": "Go"}]),
            json!([
                {"platforms": ["linux", "mac"], "browsers": ["chrome"]},
                {"platforms": "linux", "browsers": [{"name": "chrome"}, "firefox"]}
            ]),
        );
        let contexts = resolve_contexts(&test.run_on, &test);
        assert_eq!(
            pairs(&contexts),
            vec![
                (Some("linux"), Some("chrome")),
                (Some("mac"), Some("chrome")),
                (Some("linux"), Some("firefox")),
            ]
        );
    }

    #[test]
    fn test_browsers_ignored_without_driver_steps() {
        let test = test_with(
            json!([{"runShell": "echo hi"}]),
            json!([{"platforms": ["linux"], "browsers": ["chrome", "firefox"]}]),
        );
        let contexts = resolve_contexts(&test.run_on, &test);
        assert_eq!(pairs(&contexts), vec![(Some("linux"), None)]);
    }

    #[test]
    fn test_no_targets_runs_on_host() {
        let test = test_with(json!([{"wait": 10}]), json!([]));
        let contexts = resolve_contexts(&[], &test);
        assert_eq!(pairs(&contexts), vec![(None, None)]);
        assert_eq!(contexts[0].steps, test.steps);
    }

    #[test]
    fn test_viewport_variants_are_distinct_contexts() {
        let test = test_with(
            json!([{"screenshot": true}]),
            json!([{"platforms": "linux", "browsers": [
                {"name": "chrome", "viewport": {"width": 800}},
                {"name": "chrome", "viewport": {"width": 1200}}
            ]}]),
        );
        assert_eq!(resolve_contexts(&test.run_on, &test).len(), 2);
    }

    #[test]
    fn test_unsafe_flag_inherited() {
        let mut test = test_with(json!([{"runShell": "rm -rf build"}]), json!([]));
        test.unsafe_steps = true;
        assert!(resolve_contexts(&[], &test)[0].unsafe_steps);
    }
}
