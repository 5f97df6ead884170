//! Runtime expression resolution
//!
//! Steps are parameterized with three kinds of expressions:
//!
//! - embedded segments: `"Hello {{ $$user.name }}!"`, each segment resolved
//!   on its own and spliced back in as text
//! - meta-value references: `$$steps.login.outputs.token#/claims/sub`
//! - operator expressions: `extract($$stdout, '(\d+)')`,
//!   `jq($$response.body, '.items | length')`
//!
//! Resolution never fails outward: any error yields the original expression.

mod jq;
mod parser;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static OPERATOR_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^A-Za-z0-9_])(jq|extract)\s*\(|\sextract\s").expect("valid regex"));

/// Resolve an expression against a context object.
///
/// Non-string values are literals and returned as-is.
pub fn resolve_expression(expression: &Value, context: &Value) -> Value {
    match expression {
        Value::String(s) => resolve_str(s, context),
        other => other.clone(),
    }
}

/// Resolve a string expression against a context object
pub fn resolve_str(expression: &str, context: &Value) -> Value {
    if has_embedded_segments(expression) {
        return Value::String(resolve_embedded(expression, context));
    }
    resolve_standalone(expression, context)
}

/// Evaluate a boolean assertion such as `$$response.status == 200`.
/// Any error evaluates to `false`.
pub fn evaluate_assertion(assertion: &str, context: &Value) -> bool {
    let text = if has_embedded_segments(assertion) {
        resolve_embedded(assertion, context)
    } else {
        assertion.to_string()
    };

    match parser::parse(&text).and_then(|expr| parser::evaluate(&expr, context)) {
        Ok(value) => parser::truthy(&value),
        Err(e) => {
            debug!("Assertion '{}' evaluated to false: {}", assertion, e);
            false
        }
    }
}

/// Stringify a value for splicing: strings raw, everything else as JSON
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Locate `{{ ... }}` segments that are not part of a `$$` path
fn embedded_segments(expression: &str) -> Vec<(usize, usize)> {
    let chars: Vec<char> = expression.chars().collect();
    let mut segments = Vec::new();
    let mut meta_end = 0;
    let mut i = 0;

    while i + 1 < chars.len() {
        if chars[i] == '$' && chars[i + 1] == '$' {
            meta_end = scan_meta_ref(&chars, i);
            i = meta_end.max(i + 2);
            continue;
        }
        if chars[i] == '{' && chars[i + 1] == '{' && i >= meta_end {
            let close = (i + 2..chars.len().saturating_sub(1)).find(|&j| chars[j] == '}' && chars[j + 1] == '}');
            match close {
                Some(j) => {
                    segments.push((i, j + 2));
                    i = j + 2;
                }
                None => break,
            }
            continue;
        }
        i += 1;
    }

    segments
}

fn has_embedded_segments(expression: &str) -> bool {
    !embedded_segments(expression).is_empty()
}

fn resolve_embedded(expression: &str, context: &Value) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::new();
    let mut last = 0;

    for (start, end) in embedded_segments(expression) {
        out.extend(&chars[last..start]);
        let inner: String = chars[start + 2..end - 2].iter().collect();
        out.push_str(&stringify(&resolve_str(inner.trim(), context)));
        last = end;
    }
    out.extend(&chars[last..]);
    out
}

fn resolve_standalone(expression: &str, context: &Value) -> Value {
    if OPERATOR_CALL.is_match(expression) {
        return match parser::parse(expression).and_then(|expr| parser::evaluate(&expr, context)) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Value::String(value.to_string()),
            Ok(value) => value,
            Err(e) => {
                debug!("Expression '{}' left unresolved: {}", expression, e);
                Value::String(expression.to_string())
            }
        };
    }

    let chars: Vec<char> = expression.chars().collect();
    let trimmed = expression.trim();

    // A lone reference keeps scalar types; objects and arrays become JSON text
    if trimmed.starts_with("$$") {
        let trimmed_chars: Vec<char> = trimmed.chars().collect();
        if scan_meta_ref(&trimmed_chars, 0) == trimmed_chars.len() {
            let path: String = trimmed_chars[2..].iter().collect();
            return match resolve_meta_path(&path, context) {
                Some(value @ (Value::Object(_) | Value::Array(_))) => Value::String(value.to_string()),
                Some(value) => value,
                None => Value::String(expression.to_string()),
            };
        }
    }

    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'$') {
            let end = scan_meta_ref(&chars, i);
            let path: String = chars[i + 2..end].iter().collect();
            match resolve_meta_path(&path, context) {
                Some(value) if end > i + 2 => out.push_str(&stringify(&value)),
                _ => out.extend(&chars[i..end.max(i + 2)]),
            }
            i = end.max(i + 2);
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    Value::String(out)
}

/// Find the end (exclusive) of a `$$path` reference starting at `start`.
///
/// Paths take identifier characters, dots, bracketed segments, `{{id}}`
/// placeholders, and an optional `#/json/pointer` suffix. Trailing dots are
/// left out so a sentence can end right after a reference.
pub(crate) fn scan_meta_ref(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i < chars.len() {
        let c = chars[i];
        if c == '[' {
            match chars[i..].iter().position(|ch| *ch == ']') {
                Some(p) => i += p + 1,
                None => break,
            }
        } else if c == '{' && chars.get(i + 1) == Some(&'{') {
            match (i + 2..chars.len().saturating_sub(1)).find(|&j| chars[j] == '}' && chars[j + 1] == '}') {
                Some(j) => i = j + 2,
                None => break,
            }
        } else if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
            i += 1;
        } else if c == '#' && chars.get(i + 1) == Some(&'/') {
            i += 1;
            while i < chars.len() && !chars[i].is_whitespace() && !matches!(chars[i], ',' | ')' | '\'' | '"') {
                i += 1;
            }
            break;
        } else {
            break;
        }
    }
    while i > start + 2 && chars[i - 1] == '.' {
        i -= 1;
    }
    i
}

/// Resolve a `$$` path (without the `$$` prefix) against the context
pub(crate) fn resolve_meta_path(path: &str, context: &Value) -> Option<Value> {
    let (path, pointer) = match path.find("#/") {
        Some(idx) => (&path[..idx], Some(&path[idx + 1..])),
        None => (path, None),
    };

    let path = if path.contains("{{id}}") {
        let id = context.get("id").map(stringify)?;
        path.replace("{{id}}", &id)
    } else {
        path.to_string()
    };

    let mut current = context;
    for segment in path_segments(&path)? {
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(&key)?,
            (Value::Array(items), Segment::Key(key)) => items.get(key.parse::<usize>().ok()?)?,
            (Value::Array(items), Segment::Index(idx)) => items.get(idx)?,
            (Value::Object(map), Segment::Index(idx)) => map.get(&idx.to_string())?,
            _ => return None,
        };
    }

    match pointer {
        None => Some(current.clone()),
        Some(pointer) => {
            let parsed;
            let target = match current {
                Value::String(s) => {
                    parsed = serde_json::from_str::<Value>(s).ok()?;
                    &parsed
                }
                other => other,
            };
            target.pointer(pointer).cloned()
        }
    }
}

enum Segment {
    Key(String),
    Index(usize),
}

fn path_segments(path: &str) -> Option<Vec<Segment>> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    let flush = |current: &mut String, segments: &mut Vec<Segment>| {
        if !current.is_empty() {
            segments.push(Segment::Key(std::mem::take(current)));
        }
    };

    while i < chars.len() {
        match chars[i] {
            '.' => {
                flush(&mut current, &mut segments);
                i += 1;
            }
            '[' => {
                flush(&mut current, &mut segments);
                let close = chars[i..].iter().position(|c| *c == ']')? + i;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                let quoted = inner.len() >= 2
                    && ((inner.starts_with('"') && inner.ends_with('"'))
                        || (inner.starts_with('\'') && inner.ends_with('\'')));
                if quoted {
                    segments.push(Segment::Key(inner[1..inner.len() - 1].to_string()));
                } else if let Ok(idx) = inner.parse::<usize>() {
                    segments.push(Segment::Index(idx));
                } else {
                    segments.push(Segment::Key(inner.to_string()));
                }
                i = close + 1;
            }
            c => {
                current.push(c);
                i += 1;
            }
        }
    }
    flush(&mut current, &mut segments);

    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lone_reference_keeps_native_type() {
        assert_eq!(resolve_str("$$a.b", &json!({"a": {"b": "x"}})), json!("x"));
        assert_eq!(resolve_str("$$a.b", &json!({"a": {"b": true}})), json!(true));
        assert_eq!(resolve_str("$$a.b", &json!({"a": {"b": 7}})), json!(7));
        assert_eq!(resolve_str("$$a.b", &json!({"a": {"b": {"c": 1}}})), json!("{\"c\":1}"));
        assert_eq!(resolve_str("$$a", &json!({"a": [1, 2]})), json!("[1,2]"));
    }

    #[test]
    fn test_object_value_inside_text_is_json() {
        let ctx = json!({"a": {"b": {"c": 1}}});
        assert_eq!(resolve_str("value: $$a.b", &ctx), json!("value: {\"c\":1}"));
    }

    #[test]
    fn test_object_result_of_operator_is_json_string() {
        let ctx = json!({"body": {"user": {"id": 3}}});
        assert_eq!(resolve_str("jq($$body, '.user')", &ctx), json!("{\"id\":3}"));
    }

    #[test]
    fn test_bracket_and_pointer_paths() {
        let ctx = json!({
            "steps": {"login step": {"outputs": {"body": "{\"token\": {\"value\": \"abc\"}}"}}},
            "list": [10, 20]
        });
        assert_eq!(
            resolve_str("$$steps[\"login step\"].outputs.body#/token/value", &ctx),
            json!("abc")
        );
        assert_eq!(resolve_str("$$list[1]", &ctx), json!(20));
    }

    #[test]
    fn test_id_placeholder_inside_path() {
        let ctx = json!({"id": "s1", "steps": {"s1": {"outputs": {"exitCode": 0}}}});
        assert_eq!(resolve_str("$$steps.{{id}}.outputs.exitCode", &ctx), json!(0));
    }

    #[test]
    fn test_unresolved_reference_left_in_place() {
        assert_eq!(resolve_str("$$missing.value", &json!({})), json!("$$missing.value"));
        assert_eq!(resolve_str("ends with $$x.", &json!({"x": "y"})), json!("ends with y."));
    }

    #[test]
    fn test_embedded_segments() {
        let ctx = json!({"x": 5, "name": "docs"});
        assert_eq!(resolve_str("{{$$x}}", &ctx), json!("5"));
        assert_eq!(resolve_str("Hi {{ $$name }}, {{ $$x }}!", &ctx), json!("Hi docs, 5!"));
        assert_eq!(resolve_str("plain text", &ctx), json!("plain text"));
    }

    #[test]
    fn test_syntax_error_returns_original() {
        let input = "extract($$s, '(\\d+)'";
        assert_eq!(resolve_str(input, &json!({"s": "id 42"})), json!(input));
    }

    #[test]
    fn test_non_string_is_literal() {
        assert_eq!(resolve_expression(&json!(12), &json!({})), json!(12));
    }

    #[test]
    fn test_evaluate_assertion() {
        let ctx = json!({"response": {"status": 201}});
        assert!(evaluate_assertion("$$response.status == 201", &ctx));
        assert!(!evaluate_assertion("$$response.status == 200", &ctx));
        assert!(!evaluate_assertion("$$response.status ==", &ctx));
        assert!(evaluate_assertion("{{$$response.status}} > 200", &ctx));
    }
}
