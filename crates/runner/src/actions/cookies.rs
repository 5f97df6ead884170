//! saveCookie / loadCookie: cookies as JSON files or environment variables

use serde_json::{json, Value};

use docrun_common::step::CookieStep;

use super::{ActionContext, StepOutcome};
use crate::driver::Cookie;
use crate::error::RunnerResult;

pub(super) async fn save_cookie(step: &CookieStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let cookies = driver.cookies().await?;
    let Some(cookie) = cookies.into_iter().find(|c| c.name == step.name) else {
        return Ok(StepOutcome::fail(format!("Cookie '{}' not found in the browser.", step.name)));
    };
    let serialized = serde_json::to_string_pretty(&cookie)?;

    if let Some(variable) = &step.variable {
        ctx.env.set(variable.clone(), serialized);
        return Ok(StepOutcome::pass(format!(
            "Saved cookie '{}' to variable {}.",
            step.name, variable
        )));
    }

    let default_name = format!("{}.json", step.name);
    let path = ctx.output_path(step.path.as_deref(), step.directory.as_deref(), &default_name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, serialized).await?;
    Ok(
        StepOutcome::pass(format!("Saved cookie '{}' to {}.", step.name, path.display()))
            .with_outputs(json!({ "path": path })),
    )
}

pub(super) async fn load_cookie(step: &CookieStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;

    let (content, source) = match &step.variable {
        Some(variable) => match ctx.env.get(variable) {
            Some(content) => (content.to_string(), format!("variable {}", variable)),
            None => {
                return Ok(StepOutcome::fail(format!("Variable {} is not set.", variable)));
            }
        },
        None => {
            let default_name = format!("{}.json", step.name);
            let path = ctx.output_path(step.path.as_deref(), step.directory.as_deref(), &default_name);
            if !path.exists() {
                return Ok(StepOutcome::fail(format!("Cookie file {} not found.", path.display())));
            }
            (tokio::fs::read_to_string(&path).await?, path.display().to_string())
        }
    };

    let Some(cookie) = parse_cookie(&content, &step.name)? else {
        return Ok(StepOutcome::fail(format!(
            "Cookie '{}' not found in {}.",
            step.name, source
        )));
    };

    driver.add_cookie(&cookie).await?;
    Ok(StepOutcome::pass(format!("Loaded cookie '{}' from {}.", step.name, source)))
}

/// A single cookie object, or the named entry of a cookie list
fn parse_cookie(content: &str, name: &str) -> RunnerResult<Option<Cookie>> {
    let value: Value = serde_json::from_str(content)?;
    let candidates = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    for candidate in candidates {
        let cookie: Cookie = serde_json::from_value(candidate)?;
        if cookie.name == name {
            return Ok(Some(cookie));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_list() {
        let single = r#"{"name": "session", "value": "abc", "httpOnly": true}"#;
        let cookie = parse_cookie(single, "session").unwrap().unwrap();
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.http_only, Some(true));

        let list = r#"[{"name": "a", "value": "1"}, {"name": "b", "value": "2"}]"#;
        assert_eq!(parse_cookie(list, "b").unwrap().unwrap().value, "2");
        assert!(parse_cookie(list, "c").unwrap().is_none());
    }
}
