//! httpRequest / checkLink

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

use docrun_common::step::{CheckLinkStep, HttpRequestStep};

use super::{ActionContext, StepOutcome};
use crate::error::{RunnerError, RunnerResult};
use crate::expression::stringify;

const CHECK_LINK_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) async fn http_request(step: &HttpRequestStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    if step.open_api.is_some() {
        return Ok(StepOutcome::fail(
            "OpenAPI operations are not supported. Give the request a url and method instead.",
        ));
    }
    let Some(url) = &step.url else {
        return Ok(StepOutcome::fail("httpRequest needs a url."));
    };

    let method = Method::from_bytes(step.method.to_uppercase().as_bytes())
        .map_err(|_| RunnerError::InvalidUrl(format!("unknown HTTP method '{}'", step.method)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &step.request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RunnerError::InvalidUrl(format!("bad header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RunnerError::InvalidUrl(format!("bad header value: {}", e)))?;
        headers.insert(name, value);
    }

    let query: Vec<(String, String)> = step
        .request
        .parameters
        .iter()
        .map(|(k, v)| (k.clone(), stringify(v)))
        .collect();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(step.timeout_ms))
        .build()?;
    let mut request = client.request(method, url).headers(headers).query(&query);
    request = match &step.request.body {
        Some(Value::String(text)) => request.body(text.clone()),
        Some(body) => request.json(body),
        None => request,
    };

    let response = request.send().await?;
    let status = response.status().as_u16();
    let response_headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                Value::String(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    let text = response.text().await?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    let outputs = json!({
        "response": {
            "statusCode": status,
            "headers": response_headers,
            "body": body,
        }
    });

    let mut problems = Vec::new();
    if !step.status_codes.contains(&status) {
        problems.push(format!(
            "Returned {}. Expected one of {:?}.",
            status, step.status_codes
        ));
    }
    for (name, expected) in &step.response.headers {
        match response_headers.get(&name.to_lowercase()).and_then(Value::as_str) {
            Some(actual) if actual == expected => {}
            Some(actual) => problems.push(format!(
                "Header {} was '{}', expected '{}'.",
                name, actual, expected
            )),
            None => problems.push(format!("Header {} missing from response.", name)),
        }
    }
    if let Some(expected) = &step.response.body {
        if let Err(path) = matches_subset(expected, &body, step.allow_additional_fields, "body") {
            problems.push(format!("Response body doesn't match expected value at {}.", path));
        }
    }

    if problems.is_empty() {
        Ok(StepOutcome::pass(format!("Returned {}.", status)).with_outputs(outputs))
    } else {
        Ok(StepOutcome::fail(problems.join(" ")).with_outputs(outputs))
    }
}

/// Whether `actual` contains `expected`: objects by key, arrays element-wise
/// in any order, scalars by equality. Returns the first mismatching path.
pub(crate) fn matches_subset(expected: &Value, actual: &Value, allow_additional: bool, path: &str) -> Result<(), String> {
    match (expected, actual) {
        (Value::Object(want), Value::Object(have)) => {
            for (key, value) in want {
                let child = format!("{}.{}", path, key);
                match have.get(key) {
                    Some(found) => matches_subset(value, found, allow_additional, &child)?,
                    None => return Err(child),
                }
            }
            if !allow_additional {
                if let Some(extra) = have.keys().find(|k| !want.contains_key(*k)) {
                    return Err(format!("{}.{}", path, extra));
                }
            }
            Ok(())
        }
        (Value::Array(want), Value::Array(have)) => {
            for (i, value) in want.iter().enumerate() {
                if !have
                    .iter()
                    .any(|found| matches_subset(value, found, allow_additional, path).is_ok())
                {
                    return Err(format!("{}[{}]", path, i));
                }
            }
            Ok(())
        }
        (want, have) if want == have => Ok(()),
        _ => Err(path.to_string()),
    }
}

pub(super) async fn check_link(step: &CheckLinkStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let url = ctx.absolute_url(&step.url, step.origin.as_deref())?;

    let client = reqwest::Client::builder().timeout(CHECK_LINK_TIMEOUT).build()?;
    let status = match client.get(&url).send().await {
        Ok(response) => response.status().as_u16(),
        Err(e) => {
            return Ok(StepOutcome::fail(format!("Invalid or unresolvable URL {}: {}", url, e)));
        }
    };

    let outputs = json!({ "url": url, "statusCode": status });
    if step.status_codes.contains(&status) {
        Ok(StepOutcome::pass(format!("Returned {}.", status)).with_outputs(outputs))
    } else {
        Ok(StepOutcome::fail(format!(
            "Returned {}. Expected one of {:?}.",
            status, step.status_codes
        ))
        .with_outputs(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_allows_extra_fields_by_default() {
        let expected = json!({"user": {"name": "ada"}, "tags": ["b"]});
        let actual = json!({"user": {"name": "ada", "id": 1}, "tags": ["a", "b"], "ok": true});
        assert!(matches_subset(&expected, &actual, true, "body").is_ok());
        assert_eq!(
            matches_subset(&expected, &actual, false, "body"),
            Err("body.user.id".to_string())
        );
    }

    #[test]
    fn test_subset_reports_mismatch_path() {
        let expected = json!({"user": {"name": "ada"}});
        let actual = json!({"user": {"name": "grace"}});
        assert_eq!(
            matches_subset(&expected, &actual, true, "body"),
            Err("body.user.name".to_string())
        );
    }
}
