pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stockflow",
    about = "Stockflow operator CLI",
    long_about = "Operate the stock approval service: migrations, demo directory seeding, config inspection, and readiness checks.",
    after_help = "Examples:\n  stockflow migrate\n  stockflow seed\n  stockflow doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load one demo account per workflow role (idempotent)")]
    Seed,
    #[command(about = "Print the effective configuration with sources and secrets redacted")]
    Config,
    #[command(about = "Validate config, database connectivity, schema, and approver directory")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
