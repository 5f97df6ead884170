//! `docrun detect`: show the host facts contexts are matched against

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use docrun_common::Config;
use docrun_runner::RunnerDetails;

use crate::output::{print_info, print_structured, print_warning, OutputFormat};

pub fn execute(config: &Config, format: OutputFormat) {
    let details = RunnerDetails::detect(config);

    if !matches!(format, OutputFormat::Table) {
        print_structured(&details, format);
        return;
    }

    print_info(&format!(
        "Platform: {} ({})",
        details.environment.platform, details.environment.arch
    ));
    if details.available_apps.is_empty() {
        print_warning("No supported browser/driver pairs found");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Browser", "Binary", "Driver"]);
    for app in &details.available_apps {
        table.add_row(vec![
            app.name.clone(),
            app.browser_path.display().to_string(),
            app.driver_path.display().to_string(),
        ]);
    }
    println!("{table}");
}
