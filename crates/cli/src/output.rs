//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use docrun_common::{Outcome, Report, Tally};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a serializable value as JSON or YAML
pub fn print_structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(text) => println!("{}", text),
            Err(e) => print_error(&format!("Failed to render YAML: {}", e)),
        },
        _ => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => print_error(&format!("Failed to render JSON: {}", e)),
        },
    }
}

/// Per-level outcome counters as a table
pub fn summary_table(report: &Report) -> Table {
    let mut table = new_table();
    table.set_header(vec!["", "Pass", "Fail", "Warning", "Skipped"]);

    let rows: [(&str, &Tally); 4] = [
        ("Specs", &report.summary.specs),
        ("Tests", &report.summary.tests),
        ("Contexts", &report.summary.contexts),
        ("Steps", &report.summary.steps),
    ];
    for (label, tally) in rows {
        table.add_row(vec![
            Cell::new(label),
            count_cell(tally.pass, Color::Green),
            count_cell(tally.fail, Color::Red),
            count_cell(tally.warning, Color::Yellow),
            Cell::new(tally.skipped),
        ]);
    }
    table
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count == 0 {
        Cell::new(count)
    } else {
        Cell::new(count).fg(color)
    }
}

/// One line per failed step: `spec > test > context > step: description`
pub fn failure_lines(report: &Report) -> Vec<String> {
    let mut lines = Vec::new();
    for spec in &report.specs {
        for test in &spec.tests {
            for context in &test.contexts {
                for step in context.steps.iter().filter(|s| s.result == Outcome::Fail) {
                    lines.push(format!(
                        "{} > {} > {} > {}: {}",
                        spec.spec_id,
                        test.test_id,
                        context.context_id,
                        step.step.step_id,
                        step.result_description
                    ));
                }
            }
        }
    }
    lines
}

fn colored_outcome(outcome: Outcome) -> colored::ColoredString {
    let text = format!("{} {}", outcome.symbol(), outcome);
    match outcome {
        Outcome::Pass => text.green(),
        Outcome::Fail => text.red().bold(),
        Outcome::Warning => text.yellow(),
        Outcome::Skipped => text.dimmed(),
    }
}

/// Print the report in the requested format
pub fn print_report(report: &Report, format: OutputFormat) {
    if !matches!(format, OutputFormat::Table) {
        print_structured(report, format);
        return;
    }

    for spec in &report.specs {
        let label = spec
            .content_path
            .as_deref()
            .unwrap_or(spec.spec_id.as_str());
        println!("{}  {}", colored_outcome(spec.result), label);
        for test in &spec.tests {
            println!("    {}  {}", colored_outcome(test.result), test.test_id);
        }
    }
    println!();
    println!("{}", summary_table(report));

    let failures = failure_lines(report);
    if !failures.is_empty() {
        println!();
        println!("{}", "Failures:".red().bold());
        for line in failures {
            println!("  {}", line);
        }
    }

    if let Some(error) = &report.upload_error {
        print_warning(error);
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrun_common::{ContextReport, SpecReport, Step, StepReport, TestReport};
    use serde_json::json;

    fn report() -> Report {
        let step = |id: &str, result: Outcome, description: &str| StepReport {
            step: Step::from_value(json!({"stepId": id, "wait": 10})).unwrap(),
            result,
            result_description: description.to_string(),
            outputs: json!({}),
        };
        Report::from_specs(vec![SpecReport {
            spec_id: "guide".into(),
            description: None,
            content_path: Some("docs/guide.md".into()),
            result: Outcome::Fail,
            tests: vec![TestReport {
                test_id: "install".into(),
                description: None,
                content_path: None,
                result: Outcome::Fail,
                contexts: vec![ContextReport {
                    context_id: "linux-chrome".into(),
                    platform: Some("linux".into()),
                    browser: None,
                    result: Outcome::Fail,
                    result_description: None,
                    steps: vec![
                        step("a", Outcome::Pass, "Waited 10ms."),
                        step("b", Outcome::Fail, "Element not found"),
                        step("c", Outcome::Skipped, "Skipped due to previous failure."),
                    ],
                }],
            }],
        }])
    }

    #[test]
    fn test_failure_lines_name_the_full_path() {
        let lines = failure_lines(&report());
        assert_eq!(
            lines,
            vec!["guide > install > linux-chrome > b: Element not found".to_string()]
        );
    }

    #[test]
    fn test_summary_table_has_a_row_per_level() {
        let rendered = summary_table(&report()).to_string();
        for label in ["Specs", "Tests", "Contexts", "Steps"] {
            assert!(rendered.contains(label), "missing {}", label);
        }
    }
}
