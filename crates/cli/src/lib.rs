pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::ask::AskArgs;

#[derive(Debug, Parser)]
#[command(
    name = "ragdesk",
    about = "ragdesk operator CLI",
    long_about = "Apply migrations, inspect configuration, ask the agent a question, and run the feedback learning job.",
    after_help = "Examples:\n  ragdesk migrate\n  ragdesk config\n  ragdesk ask --company acme \"What are your opening hours?\"\n  ragdesk learn --company acme"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run one query through the agent pipeline and print the JSON response")]
    Ask {
        #[arg(help = "The question to ask")]
        message: String,
        #[arg(long, help = "Tenant to answer for (defaults to server.default_company_id)")]
        company: Option<String>,
        #[arg(long, help = "Continue an existing conversation session")]
        session: Option<String>,
    },
    #[command(about = "Analyze low-rated replies once and store a tuning report")]
    Learn {
        #[arg(long, help = "Limit the run to one company")]
        company: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Ask { message, company, session } => {
            commands::ask::run(AskArgs { message, company, session })
        }
        Command::Learn { company } => commands::learn::run(company),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
