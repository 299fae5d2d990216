//! CLI binary for the Charter Interview Engine.
//!
//! Thin `clap`-based front end over the [`Orchestrator`]: its surface
//! matches the shape of the interview workflow, not a bit-exact external
//! contract.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use charter_engine::config::EngineConfig;
use charter_engine::conversation::ResponseSource;
use charter_engine::error::EngineError;
use charter_engine::orchestrator::Orchestrator;
use charter_engine::router::{EchoProvider, HttpProvider, LlmProvider, Router};
use charter_engine::store::StateStore;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the RocksDB state directory (overrides CHARTER_DB_PATH).
    #[arg(long)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new interview session.
    Start {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        project_name: String,
    },
    /// Resume an existing session and run its current stage's interview.
    Resume {
        #[arg(long)]
        session_id: String,
    },
    /// Print a session's current stage and lifecycle status.
    Status {
        #[arg(long)]
        session_id: String,
    },
    /// Generate and print the completed Project Charter as Markdown.
    Export {
        #[arg(long)]
        session_id: String,
    },
}

/// Reads one line from stdin per question — the terminal-driven
/// [`ResponseSource`] used by the CLI.
struct StdinSource;

#[async_trait::async_trait]
impl ResponseSource for StdinSource {
    async fn next_response(&mut self, question: &str) -> String {
        print!("{}\n> ", question);
        std::io::stdout().flush().ok();
        let mut reader = BufReader::new(stdin());
        let mut line = String::new();
        reader.read_line(&mut line).await.ok();
        line.trim_end().to_string()
    }
}

fn build_router(config: &EngineConfig) -> Router {
    let mut providers: std::collections::HashMap<String, Box<dyn LlmProvider>> =
        std::collections::HashMap::new();

    if let Ok(base_url) = std::env::var("CHARTER_LLM_BASE_URL") {
        let api_key = std::env::var("CHARTER_LLM_API_KEY").ok();
        if let Ok(http) = HttpProvider::new(base_url.clone(), api_key.clone()) {
            providers.insert("openai".to_string(), Box::new(http));
        }
        if let Ok(http) = HttpProvider::new(base_url, api_key) {
            providers.insert("anthropic".to_string(), Box::new(http));
        }
    }
    providers.insert("local".to_string(), Box::new(EchoProvider));

    Router::new(config.router.clone(), providers)
}

fn render_charter_markdown(charter: &charter_engine::store::Charter) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Project Charter: {}\n\n", charter.project_name));
    out.push_str(&format!("Governance decision: {:?}\n\n", charter.governance_decision));
    out.push_str(&format!("Feasibility: {:?}\n\n", charter.feasibility));
    out.push_str("## Critical success factors\n");
    for factor in &charter.critical_success_factors {
        out.push_str(&format!("- {}\n", factor));
    }
    out.push_str("\n## Major risks\n");
    for risk in &charter.major_risks {
        out.push_str(&format!("- {}\n", risk));
    }
    out
}

async fn run(args: Args) -> Result<()> {
    let mut config = EngineConfig::from_env();
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let store = Arc::new(StateStore::open(&config.db_path).context("opening state store")?);
    let router = Arc::new(build_router(&config));
    let orchestrator = Orchestrator::new(store, router, config);

    match args.command {
        Command::Start { owner, project_name } => {
            let session = orchestrator.create_session(owner, project_name).await?;
            println!("{}", session.id);
        }
        Command::Resume { session_id } => {
            let mut source = StdinSource;
            orchestrator.run_stage(&session_id, &mut source).await?;
            let validation = orchestrator.advance_stage(&session_id).await?;
            if validation.can_proceed {
                println!(
                    "stage {} passed (completeness {:.2})",
                    validation.stage_number, validation.completeness
                );
            } else {
                eprintln!(
                    "stage {} did not pass: missing {:?}, violations {:?}",
                    validation.stage_number, validation.missing_fields, validation.rule_violations
                );
                std::process::exit(2);
            }
        }
        Command::Status { session_id } => {
            let session = orchestrator.resume_session(&session_id).await?;
            println!("stage={} status={:?}", session.current_stage, session.status);
        }
        Command::Export { session_id } => {
            match orchestrator.generate_charter(&session_id).await {
                Ok(charter) => println!("{}", render_charter_markdown(&charter)),
                Err(EngineError::CharterBlockedInconsistent) => {
                    eprintln!("charter generation blocked: project deemed infeasible");
                    std::process::exit(3);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))
}
