//! Hierarchical run report: specs -> tests -> contexts -> steps

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::Step;
use crate::types::BrowserSpec;

/// Terminal result of a step, context, test or spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl Outcome {
    /// Roll child results into a parent result.
    ///
    /// FAIL if any child failed, else WARNING if any warned, else SKIPPED
    /// when every child was skipped (including no children), else PASS.
    pub fn aggregate<I>(children: I) -> Outcome
    where
        I: IntoIterator<Item = Outcome>,
    {
        let mut any_fail = false;
        let mut any_warning = false;
        let mut all_skipped = true;

        for outcome in children {
            match outcome {
                Outcome::Fail => any_fail = true,
                Outcome::Warning => any_warning = true,
                Outcome::Skipped => {}
                Outcome::Pass => {}
            }
            if outcome != Outcome::Skipped {
                all_skipped = false;
            }
        }

        if any_fail {
            Outcome::Fail
        } else if any_warning {
            Outcome::Warning
        } else if all_skipped {
            Outcome::Skipped
        } else {
            Outcome::Pass
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Pass => "✓",
            Outcome::Fail => "✗",
            Outcome::Warning => "~",
            Outcome::Skipped => "-",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Warning => "WARNING",
            Outcome::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome counters for one level of the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub pass: usize,
    pub fail: usize,
    pub warning: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.pass += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::Warning => self.warning += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.warning + self.skipped
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub specs: Tally,
    pub tests: Tally,
    pub contexts: Tally,
    pub steps: Tally,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub summary: Summary,
    pub specs: Vec<SpecReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
}

impl Report {
    /// Build a report from finished specs, computing the summary counters
    pub fn from_specs(specs: Vec<SpecReport>) -> Self {
        let mut summary = Summary::default();
        for spec in &specs {
            summary.specs.record(spec.result);
            for test in &spec.tests {
                summary.tests.record(test.result);
                for context in &test.contexts {
                    summary.contexts.record(context.result);
                    for step in &context.steps {
                        summary.steps.record(step.result);
                    }
                }
            }
        }
        Self {
            summary,
            specs,
            upload_error: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.specs.fail > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecReport {
    pub spec_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    pub result: Outcome,
    pub tests: Vec<TestReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    pub result: Outcome,
    pub contexts: Vec<ContextReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub context_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserSpec>,
    pub result: Outcome,
    /// Why the context was skipped, when it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_description: Option<String>,
    pub steps: Vec<StepReport>,
}

/// The step as written, merged with its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    #[serde(flatten)]
    pub step: Step,
    pub result: Outcome,
    pub result_description: String,
    #[serde(default)]
    pub outputs: Value,
}
