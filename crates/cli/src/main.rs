//! Docrun CLI - Main Entry Point
//!
//! Runs the executable steps embedded in documentation and reports
//! which still match reality.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docrun_cli::commands::{detect, run};
use docrun_cli::output::{self, OutputFormat};
use docrun_common::LogLevel;

/// Docrun - test your docs by running them
#[derive(Parser)]
#[command(name = "docrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests in spec files
    Run(run::RunArgs),

    /// Show the host platform and detected browsers
    Detect {
        /// JSON or YAML configuration file
        #[arg(short, long, env = "DOCRUN_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn init_logging(level: LogLevel, verbose: bool) {
    let directive = if verbose { "debug" } else { level.directive() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = run::load_config(&args)?;
            init_logging(config.log_level, cli.verbose);

            let (report, path) = run::execute(config).await?;
            output::print_report(&report, cli.format);

            if report.has_failures() {
                output::print_error(&format!("Failures recorded in {}", path.display()));
                std::process::exit(1);
            }
            output::print_success(&format!("Results written to {}", path.display()));
        }
        Commands::Detect { config } => {
            let args = run::RunArgs {
                config,
                ..Default::default()
            };
            let config = run::load_config(&args)?;
            init_logging(config.log_level, cli.verbose);
            detect::execute(&config, cli.format);
        }
        Commands::Version => {
            println!("docrun {}", docrun_common::VERSION);
        }
    }

    Ok(())
}
