pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "maitre",
    about = "Maitre operator CLI",
    long_about = "Operate the Maitre reservation assistant: migrations, demo data, config inspection, and slot-extraction checks.",
    after_help = "Examples:\n  maitre migrate\n  maitre config\n  maitre extract \"我是王小明，明天晚上7點，4個人\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo floor plan for the configured restaurant")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Print the reservation slots found in a guest message as JSON")]
    Extract {
        #[arg(help = "Guest message to analyse")]
        text: String,
        #[arg(long, help = "Reference date for relative days (YYYY-MM-DD); defaults to today")]
        today: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Extract { text, today } => commands::extract::run(&text, today.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
