//! A small jq filter subset used by the `jq(json, query)` operator
//!
//! Supported: `.`, `.key`, `."key"`, `.[n]`, `.["key"]`, `.[]`, chained
//! paths, `|` pipes, and the builtins `length`, `keys`, `first`, `last`.

use serde_json::Value;

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, PartialEq)]
enum PathPart {
    Key(String),
    Index(i64),
    Iterate,
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Path(Vec<PathPart>),
    Length,
    Keys,
    First,
    Last,
}

/// Run `query` against `input`, returning every output of the filter
pub fn run(query: &str, input: &Value) -> RunnerResult<Vec<Value>> {
    let filters = parse(query)?;
    let mut stream = vec![input.clone()];
    for filter in &filters {
        let mut next = Vec::new();
        for value in &stream {
            next.extend(apply(filter, value)?);
        }
        stream = next;
    }
    Ok(stream)
}

fn err(msg: impl Into<String>) -> RunnerError {
    RunnerError::Expression(format!("jq: {}", msg.into()))
}

fn parse(query: &str) -> RunnerResult<Vec<Filter>> {
    split_pipes(query)
        .into_iter()
        .map(|part| parse_filter(part.trim()))
        .collect()
}

/// Split on `|` outside of brackets and quotes
fn split_pipes(query: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in query.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                parts.push(&query[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&query[start..]);
    parts
}

fn parse_filter(text: &str) -> RunnerResult<Filter> {
    match text {
        "length" => return Ok(Filter::Length),
        "keys" => return Ok(Filter::Keys),
        "first" => return Ok(Filter::First),
        "last" => return Ok(Filter::Last),
        _ => {}
    }
    if !text.starts_with('.') {
        return Err(err(format!("unsupported filter '{}'", text)));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                if i < chars.len() && chars[i] == '"' {
                    let (key, next) = read_quoted(&chars, i)?;
                    parts.push(PathPart::Key(key));
                    i = next;
                } else {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                        i += 1;
                    }
                    if i > start {
                        parts.push(PathPart::Key(chars[start..i].iter().collect()));
                    }
                }
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| err("unclosed '['"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                if inner.is_empty() {
                    parts.push(PathPart::Iterate);
                } else if inner.starts_with('"') || inner.starts_with('\'') {
                    parts.push(PathPart::Key(inner[1..inner.len().saturating_sub(1)].to_string()));
                } else {
                    let index = inner
                        .parse::<i64>()
                        .map_err(|_| err(format!("invalid index '{}'", inner)))?;
                    parts.push(PathPart::Index(index));
                }
                i = close + 1;
            }
            '?' => i += 1,
            c if c.is_whitespace() => i += 1,
            c => return Err(err(format!("unexpected '{}' in '{}'", c, text))),
        }
    }

    Ok(Filter::Path(parts))
}

fn read_quoted(chars: &[char], start: usize) -> RunnerResult<(String, usize)> {
    let mut i = start + 1;
    let mut out = String::new();
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            '"' => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(err("unterminated string"))
}

fn apply(filter: &Filter, value: &Value) -> RunnerResult<Vec<Value>> {
    match filter {
        Filter::Path(parts) => {
            let mut stream = vec![value.clone()];
            for part in parts {
                let mut next = Vec::new();
                for v in &stream {
                    next.extend(step(part, v)?);
                }
                stream = next;
            }
            Ok(stream)
        }
        Filter::Length => Ok(vec![match value {
            Value::Null => Value::from(0),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(a) => Value::from(a.len()),
            Value::Object(o) => Value::from(o.len()),
            Value::Number(n) => Value::from(n.as_f64().unwrap_or_default().abs()),
            Value::Bool(_) => return Err(err("boolean has no length")),
        }]),
        Filter::Keys => match value {
            Value::Object(o) => {
                let mut keys: Vec<&String> = o.keys().collect();
                keys.sort();
                Ok(vec![Value::from(keys.into_iter().cloned().collect::<Vec<_>>())])
            }
            Value::Array(a) => Ok(vec![Value::from((0..a.len()).collect::<Vec<_>>())]),
            _ => Err(err("keys requires an object or array")),
        },
        Filter::First => step(&PathPart::Index(0), value),
        Filter::Last => step(&PathPart::Index(-1), value),
    }
}

fn step(part: &PathPart, value: &Value) -> RunnerResult<Vec<Value>> {
    match (part, value) {
        (PathPart::Key(_), Value::Null) | (PathPart::Index(_), Value::Null) => Ok(vec![Value::Null]),
        (PathPart::Key(key), Value::Object(map)) => Ok(vec![map.get(key).cloned().unwrap_or(Value::Null)]),
        (PathPart::Index(index), Value::Array(items)) => {
            let len = items.len() as i64;
            let idx = if *index < 0 { len + index } else { *index };
            Ok(vec![if (0..len).contains(&idx) {
                items[idx as usize].clone()
            } else {
                Value::Null
            }])
        }
        (PathPart::Iterate, Value::Array(items)) => Ok(items.clone()),
        (PathPart::Iterate, Value::Object(map)) => Ok(map.values().cloned().collect()),
        (PathPart::Key(key), other) => Err(err(format!("cannot index {} with \"{}\"", type_name(other), key))),
        (PathPart::Index(_), other) => Err(err(format!("cannot index {} with number", type_name(other)))),
        (PathPart::Iterate, other) => Err(err(format!("cannot iterate over {}", type_name(other)))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
