//! Per-context variable environment
//!
//! Step `variables` and `loadVariables` write here instead of the process
//! environment. Spawned shell and code children receive it as their
//! environment, expressions see it as `$$env`, and `$NAME` / `${NAME}`
//! references in step payloads are substituted from it before dispatch.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::RunnerResult;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded from the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace `$NAME` and `${NAME}` with their values. Unknown names are
    /// left as written; `$$` meta references are untouched.
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        REFERENCE
            .replace_all(text, |caps: &Captures| {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
                if start > 0 && text.as_bytes()[start - 1] == b'$' {
                    return whole.to_string();
                }
                let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
                match self.vars.get(name) {
                    Some(value) => value.clone(),
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }

    /// Load `KEY=VALUE` lines: blank lines and `#` comments are skipped,
    /// `export ` prefixes dropped and matching surrounding quotes removed.
    /// Returns the names that were set.
    pub fn load_file(&mut self, path: &Path) -> RunnerResult<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        let mut loaded = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else { continue };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = unquote(value.trim());
            self.set(key, value);
            loaded.push(key.to_string());
        }

        Ok(loaded)
    }

    /// `{ NAME: value }` for expression contexts
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.vars
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>(),
        )
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let mut env = Environment::new();
        for (k, v) in pairs {
            env.set(*k, *v);
        }
        env
    }

    #[test]
    fn test_substitute_both_forms() {
        let env = env(&[("HOST", "localhost"), ("PORT", "8080")]);
        assert_eq!(env.substitute("http://$HOST:${PORT}/x"), "http://localhost:8080/x");
    }

    #[test]
    fn test_unknown_names_and_meta_refs_untouched() {
        let env = env(&[("steps", "nope")]);
        assert_eq!(env.substitute("$MISSING and $$steps.a"), "$MISSING and $$steps.a");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment\n\nexport TOKEN=\"abc 123\"\nUSER='me'\nBARE=value=with=equals\nbroken").unwrap();

        let mut env = Environment::new();
        let loaded = env.load_file(file.path()).unwrap();
        assert_eq!(loaded, vec!["TOKEN", "USER", "BARE"]);
        assert_eq!(env.get("TOKEN"), Some("abc 123"));
        assert_eq!(env.get("USER"), Some("me"));
        assert_eq!(env.get("BARE"), Some("value=with=equals"));
    }

    #[test]
    fn test_to_value() {
        let env = env(&[("A", "1")]);
        assert_eq!(env.to_value(), serde_json::json!({"A": "1"}));
    }
}
