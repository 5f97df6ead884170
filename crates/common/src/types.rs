//! Core types for docrun: specs, tests, run targets and resolved contexts

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::step::Step;

/// A detected document translated into a collection of tests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default = "generate_id")]
    pub spec_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,

    /// OpenAPI document references, passed through untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_api: Vec<Value>,

    #[serde(default)]
    pub tests: Vec<Test>,
}

/// A named sequence of template steps plus declared run targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    #[serde(default = "generate_id")]
    pub test_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_on: Vec<RunTarget>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_api: Vec<Value>,

    #[serde(default, rename = "unsafe", skip_serializing_if = "std::ops::Not::not")]
    pub unsafe_steps: bool,
}

/// Declared target descriptor: every platform crossed with every browser
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunTarget {
    #[serde(default, deserialize_with = "one_or_many")]
    pub platforms: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub browsers: Vec<BrowserSpec>,
}

/// A browser declaration. Plain strings deserialize as `{ name }`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Size>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Size>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
}

impl BrowserSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Engine identifier used when matching against detected apps.
    /// Safari runs on webkit; execution keeps the `safari` wiring.
    pub fn engine(&self) -> &str {
        match self.name.as_str() {
            "safari" => "webkit",
            other => other,
        }
    }
}

impl<'de> Deserialize<'de> for BrowserSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Full {
            name: String,
            #[serde(default)]
            viewport: Option<Size>,
            #[serde(default)]
            window: Option<Size>,
            #[serde(default)]
            headless: Option<bool>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full(Full),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => BrowserSpec::named(name.to_lowercase()),
            Repr::Full(full) => BrowserSpec {
                name: full.name.to_lowercase(),
                viewport: full.viewport,
                window: full.window,
                headless: full.headless,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Size {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// One concrete `(platform, browser?)` execution of a test's steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default = "generate_id")]
    pub context_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_api: Vec<Value>,

    #[serde(default, rename = "unsafe", skip_serializing_if = "std::ops::Not::not")]
    pub unsafe_steps: bool,
}

impl Context {
    /// Whether any step needs a live browser session
    pub fn requires_driver(&self) -> bool {
        self.steps.iter().any(|step| step.action.requires_driver())
    }
}

/// Top-level container for spec files that hold several specs
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SpecFile {
    Many { specs: Vec<Spec> },
    One(Spec),
}

impl Spec {
    /// Parse specs from a JSON or YAML document
    pub fn from_str(content: &str, path: &Path) -> Result<Vec<Self>> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let parse_error = |reason: String| Error::SpecParse {
            path: path.display().to_string(),
            reason,
        };
        let document: Value = match ext.as_str() {
            "json" => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
            other => return Err(Error::UnsupportedFileType(other.to_string())),
        };
        let spec_shaped = document
            .as_object()
            .map(|map| map.contains_key("tests") || map.contains_key("specs"))
            .unwrap_or(false);
        if !spec_shaped {
            return Err(parse_error("expected an object with `tests` or `specs`".to_string()));
        }
        let parsed: SpecFile = serde_json::from_value(document).map_err(|e| parse_error(e.to_string()))?;

        let mut specs = match parsed {
            SpecFile::Many { specs } => specs,
            SpecFile::One(spec) => vec![spec],
        };

        for spec in &mut specs {
            if spec.content_path.is_none() {
                spec.content_path = Some(path.display().to_string());
            }
        }
        Ok(specs)
    }

    /// Parse specs from a file
    pub fn from_file(path: &Path) -> Result<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content, path)
    }

    /// Load every spec file (`.json`, `.yaml`, `.yml`) under the given paths.
    ///
    /// Files that are not specs (fixtures, package manifests) are skipped
    /// with a warning; only read errors abort.
    pub fn load_all(paths: &[impl AsRef<Path>]) -> Result<Vec<Self>> {
        let mut specs = Vec::new();

        for root in paths {
            for entry in walkdir::WalkDir::new(root.as_ref())
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == "json" || ext == "yaml" || ext == "yml")
                        .unwrap_or(false)
                })
                .filter(|e| !e.file_name().to_string_lossy().starts_with(REPORT_FILE_PREFIX))
            {
                let path = entry.path();
                tracing::debug!("Loading spec file {}", path.display());
                let content = std::fs::read_to_string(path)?;
                match Self::from_str(&content, path) {
                    Ok(found) => specs.extend(found),
                    Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        Ok(specs)
    }
}

/// Report files written by previous runs are never loaded as specs
pub const REPORT_FILE_PREFIX: &str = "testResults-";

/// Generate a fresh identifier for specs, tests, contexts and steps
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accept either a single value or a list of values
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_string_becomes_object() {
        let target: RunTarget = serde_json::from_value(serde_json::json!({
            "platforms": "linux",
            "browsers": ["Chrome", {"name": "firefox", "headless": false}]
        }))
        .unwrap();

        assert_eq!(target.platforms, vec!["linux"]);
        assert_eq!(target.browsers[0], BrowserSpec::named("chrome"));
        assert_eq!(target.browsers[1].headless, Some(false));
    }

    #[test]
    fn test_safari_engine_is_webkit() {
        assert_eq!(BrowserSpec::named("safari").engine(), "webkit");
        assert_eq!(BrowserSpec::named("chrome").engine(), "chrome");
    }

    #[test]
    fn test_parse_yaml_spec_generates_ids() {
        let yaml = r#"
description: Getting started guide
tests:
  - description: install works
    steps:
      - runShell: echo hello
      - goTo: https://example.com
"#;
        let specs = Spec::from_str(yaml, Path::new("guide.yaml")).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert!(!spec.spec_id.is_empty());
        assert_eq!(spec.content_path.as_deref(), Some("guide.yaml"));
        assert_eq!(spec.tests[0].steps.len(), 2);
        assert!(!spec.tests[0].test_id.is_empty());
    }

    #[test]
    fn test_parse_json_spec_list() {
        let json = r#"{"specs": [{"specId": "a", "tests": []}, {"specId": "b", "tests": []}]}"#;
        let specs = Spec::from_str(json, Path::new("all.json")).unwrap();
        let ids: Vec<_> = specs.iter().map(|s| s.spec_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Spec::from_str("{}", Path::new("notes.txt")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
    }

    #[test]
    fn test_load_all_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"specId": "a", "tests": []}"#).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.yml"), "specId: b\ntests: []\n").unwrap();
        std::fs::write(dir.path().join("readme.md"), "# ignored").unwrap();

        let specs = Spec::load_all(&[dir.path()]).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_load_all_skips_files_that_are_not_specs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"specId": "a", "tests": [{"steps": [{"wait": 1}]}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("fixtures.json"), "[1, 2, 3]").unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "site", "version": "1.0.0", "scripts": {"build": "vite"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("tsconfig.json"), "{ // comment\n }").unwrap();

        let specs = Spec::load_all(&[dir.path()]).unwrap();
        let ids: Vec<_> = specs.iter().map(|s| s.spec_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_object_without_tests_is_not_a_spec() {
        let err = Spec::from_str(r#"{"name": "site"}"#, Path::new("package.json")).unwrap_err();
        assert!(matches!(err, Error::SpecParse { .. }));
    }
}
