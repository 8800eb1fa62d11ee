//! InboxPilot - on-demand inbox briefing agent
//!
//! One run reads a user's recent unseen mail over IMAP, asks a local model
//! to triage each message (and draft a reply when one is needed), and
//! commits the results as a single briefing with a structured trace.
//!
//! ## Module Organization
//!
//! - `commands/`: CLI command handlers (thin wrappers)
//! - `services/`: Run coordinator, retry, tracing, locking, user directory
//! - `adapters/`: IMAP, SQLite and Ollama implementations
//! - `types/`: Data structures and types
//! - `config/`: Configuration management
//! - `encryption`: App password encryption at rest

pub mod adapters;
pub mod commands;
pub mod config;
pub mod encryption;
pub mod error;
pub mod services;
pub mod types;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;

use commands::AppContext;
use error::AgentError;

/// InboxPilot command line.
#[derive(Parser)]
#[command(name = "inbox-pilot", about = "On-demand inbox briefing agent", version)]
pub struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true, env = config::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process the user's inbox once and commit a briefing.
    Run {
        #[arg(long)]
        user: String,
    },

    /// Register a user.
    Signup {
        #[arg(long)]
        email: String,

        /// Display name. Defaults to the address's local part.
        #[arg(long)]
        name: Option<String>,
    },

    /// Save the mailbox app password and, optionally, the profile.
    Settings {
        #[arg(long)]
        user: String,

        #[arg(long, env = "INBOX_PILOT_APP_PASSWORD", hide_env_values = true)]
        app_password: String,

        /// Free text used to personalize drafted replies.
        #[arg(long)]
        profile: Option<String>,
    },

    /// Show whether an app password is saved, and the profile.
    ShowSettings {
        #[arg(long)]
        user: String,
    },

    /// Print the latest briefing as JSON.
    Latest {
        #[arg(long)]
        user: String,
    },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    #[serde(flatten)]
    error: &'a AgentError,
}

/// Execute one CLI invocation, printing the result as JSON on stdout.
pub async fn run(cli: Cli) -> ExitCode {
    match dispatch(cli).await {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.code(), "{}", e);
            let body = ErrorBody { code: e.code(), error: &e };
            match serde_json::to_string_pretty(&body) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{{\"code\": \"{}\"}}", e.code()),
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<String, AgentError> {
    let config = match &cli.config {
        Some(path) => config::load_config_from_path(path)?,
        None => config::load_config()?,
    };
    let ctx = AppContext::from_config(config)?;

    let json = match cli.command {
        Commands::Run { user } => to_json(&commands::run::run(&ctx, &user).await?)?,
        Commands::Signup { email, name } => {
            to_json(&commands::users::signup(&ctx, &email, name.as_deref())?)?
        }
        Commands::Settings {
            user,
            app_password,
            profile,
        } => to_json(&commands::users::save_settings(
            &ctx,
            &user,
            &app_password,
            profile.as_deref(),
        )?)?,
        Commands::ShowSettings { user } => to_json(&commands::users::get_settings(&ctx, &user)?)?,
        Commands::Latest { user } => to_json(&commands::briefing::latest(&ctx, &user).await?)?,
    };
    Ok(json)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AgentError> {
    Ok(serde_json::to_string_pretty(value)?)
}
