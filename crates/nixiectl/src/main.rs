//! Nixie Control - natural-language CLI for a declarative system manager.
//!
//! Thin front-end over the `nixie_common` pipeline: it supplies
//! `(query, mode)` and renders the response. It never calls the
//! underlying manager directly.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nixie_common::{ExecMode, NixManager, NixieConfig, Pipeline};
use nixiectl::output;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nixiectl")]
#[command(about = "Say what you want; nixie makes it a safe, reversible operation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask in plain language: "install firefox", "roll back to yesterday"
    Ask {
        /// The request, in your own words
        #[arg(required = true)]
        query: Vec<String>,

        /// Actually perform the operations (default is a dry run)
        #[arg(long)]
        execute: bool,

        /// Allow destructive operations no checkpoint can cover
        #[arg(long)]
        allow_irreversible: bool,

        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search packages by free-text term
    Search {
        #[arg(required = true)]
        term: Vec<String>,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },

    /// List generation checkpoints
    Generations,

    /// Roll back to a generation by id
    Rollback {
        id: u64,

        /// Actually perform the rollback (default is a dry run)
        #[arg(long)]
        execute: bool,
    },

    /// Show recent command history
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = NixieConfig::load()?;
    let manager = Arc::new(NixManager::new(Duration::from_secs(
        config.pipeline.manager_timeout_secs,
    )));
    let pipeline = Pipeline::new(&config, manager)?;

    let exit = match cli.command {
        Commands::Ask {
            query,
            execute,
            allow_irreversible,
            json,
        } => {
            let query = query.join(" ");
            let mode = if execute { ExecMode::Execute } else { ExecMode::DryRun };
            let response = pipeline
                .execute_command_opts(&query, mode, allow_irreversible)
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", output::render_response(&response));
            }
            exit_for(response.success)
        }
        Commands::Search { term, json } => {
            let query = format!("search for {}", term.join(" "));
            let response = pipeline.execute_command(&query, ExecMode::Execute).await;
            if json {
                match &response.structured_data {
                    Some(data) => println!("{}", serde_json::to_string_pretty(data)?),
                    None => println!("[]"),
                }
            } else {
                print!("{}", output::render_response(&response));
            }
            exit_for(response.success)
        }
        Commands::Generations => {
            print!("{}", output::render_generations(&pipeline.generations()));
            ExitCode::SUCCESS
        }
        Commands::Rollback { id, execute } => {
            let mode = if execute { ExecMode::Execute } else { ExecMode::DryRun };
            let response = pipeline.rollback(id, mode).await;
            print!("{}", output::render_response(&response));
            exit_for(response.success)
        }
        Commands::History { limit } => {
            print!("{}", output::render_history(&pipeline.recent_history(limit)));
            ExitCode::SUCCESS
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            ExitCode::SUCCESS
        }
    };

    // Persist the search cache on the way out; a failure here must not
    // mask the command's own exit status.
    if let Err(e) = pipeline.flush() {
        tracing::warn!("failed to persist search cache: {}", e);
    }

    Ok(exit)
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
