mod commands;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::{Commands, GlobalOptions};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "provision")]
#[command(about = "Create, configure and terminate notebook and cluster environments", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ./provision.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where to write the JSON result record
    #[arg(long = "result-file", global = true)]
    result_file: Option<PathBuf>,

    /// Print the steps that would run and exit
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,

    /// Log step progress to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = GlobalOptions {
        config: cli.config,
        result_file: cli.result_file,
        dry_run: cli.dry_run,
    };

    match cli.command.execute(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PROVISION_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_error(error: &CliError) {
    eprintln!("error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = std::error::Error::source(cause);
    }
    output::print_rollback_summary(error);
}
