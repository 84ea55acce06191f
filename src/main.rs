//! # CalPilot CLI (`calpilot`)
//!
//! Runs the HTTP API and offers the same read operations from the shell.
//!
//! ## Usage
//!
//! ```bash
//! calpilot --config ./config/calpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `calpilot serve` | Start the HTTP API server |
//! | `calpilot get <id>` | Print a call record as JSON |
//! | `calpilot search [query]` | Search calls |
//! | `calpilot summary <id>` | Print a call summary |
//! | `calpilot companies` | List unique companies |
//! | `calpilot ask <id> "<question>"` | Ask a question about a call |

use anyhow::{bail, Result};
use calpilot::config::{self, Config};
use calpilot::logging;
use calpilot::qa::AnswerGateway;
use calpilot::query::{CallService, SearchParams};
use calpilot::server;
use calpilot::store::CallStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// CalPilot: sales-call records, search, and transcript Q&A.
///
/// Settings are read from an optional TOML file and overridden by
/// environment variables (`CALPILOT_ENV`, `CALLS_FILE`, `CALLS_BUCKET`,
/// `CALPILOT_BIND`, `ANTHROPIC_API_KEY`).
#[derive(Parser)]
#[command(name = "calpilot", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/calpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Print a call record by id.
    Get {
        id: String,
    },

    /// Search calls by text, company, and date range.
    Search {
        /// Case-insensitive substring of the title or transcript.
        query: Option<String>,

        /// Only calls involving this company.
        #[arg(long)]
        company: Option<String>,

        /// Only calls on or after this date (YYYY-MM-DD or ISO-8601).
        #[arg(long)]
        from: Option<String>,

        /// Only calls on or before this date (YYYY-MM-DD or ISO-8601).
        #[arg(long)]
        to: Option<String>,
    },

    /// Print the summary of a call.
    Summary {
        id: String,
    },

    /// List unique companies across all calls.
    Companies,

    /// Ask a question about a call transcript.
    Ask {
        id: String,
        question: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let _log_guard = logging::init(&cfg)?;

    run(&cfg, cli.command).await
}

fn call_service(cfg: &Config) -> Result<CallService> {
    let store = CallStore::from_config(&cfg.storage)?;
    Ok(CallService::new(Arc::new(store)))
}

async fn run(cfg: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => server::run_server(cfg).await?,
        Commands::Get { id } => match call_service(cfg)?.get_by_id(&id).await {
            Some(call) => print_json(&call)?,
            None => bail!("call not found: {}", id),
        },
        Commands::Search {
            query,
            company,
            from,
            to,
        } => {
            let params = SearchParams {
                query,
                company,
                date_from: from,
                date_to: to,
            };
            print_json(&call_service(cfg)?.search(&params).await)?;
        }
        Commands::Summary { id } => match call_service(cfg)?.get_summary(&id).await {
            Some(summary) => print_json(&summary)?,
            None => bail!("call not found: {}", id),
        },
        Commands::Companies => {
            print_json(call_service(cfg)?.unique_companies().await.as_ref())?;
        }
        Commands::Ask { id, question } => {
            let calls = call_service(cfg)?;
            let gateway = AnswerGateway::from_config(cfg)?;
            let Some(call) = calls.get_by_id(&id).await else {
                bail!("call not found: {}", id);
            };
            let answer = gateway
                .answer(call.id(), &question, call.transcript_text())
                .await?;
            print_json(&serde_json::json!({
                "answer": answer,
                "call_id": id,
                "question": question,
            }))?;
        }
    }

    Ok(())
}
