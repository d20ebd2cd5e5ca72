pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use haven_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "haven",
    about = "Haven operator CLI",
    long_about = "Operate Haven runtime readiness, migrations, config inspection, transcript \
                  history, and smoke validation.",
    after_help = "Examples:\n  haven doctor --json\n  haven config\n  haven smoke\n  haven history --session alex --limit 10"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending archive migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Run end-to-end conversation scenarios against the orchestrator with per-check timings"
    )]
    Smoke {
        #[arg(long, help = "Emit only the machine-readable JSON report line")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(
        about = "Validate config, escalation policy, telephony readiness, and archive state"
    )]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show archived turns for a session, newest first")]
    History {
        #[arg(long, help = "Session id to read from the archive")]
        session: String,
        #[arg(long, default_value_t = 20, help = "Maximum number of turns to show")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke { json } => commands::smoke::run(json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::History { session, limit } => commands::history::run(&session, limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Best-effort tracing setup from whatever config loads. Commands re-load
/// config themselves and report load failures through structured output, so
/// an unloadable config here only means the run is unlogged.
fn init_logging() {
    use haven_core::config::LogFormat::*;
    use tracing::Level;

    let Ok(config) = AppConfig::load(LoadOptions::default()) else {
        return;
    };
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}
