//! Main Entrypoint for the Lecture Tutor terminal client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Initializing logging (to stderr, so the dialogue on stdout stays clean).
//! 3. Building the session gateway: the HTTP backend or the offline script.
//! 4. Running the REPL until the learner quits or presses Ctrl+C.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::{io::BufReader, sync::mpsc};
use tracing::{info, warn};
use tutor_cli::{config::Config, repl::Repl, state::AppState};
use tutor_core::{
    gateway::{HttpSessionGateway, ScriptedSessionGateway, SessionGateway},
    segment::LectureId,
    session::SessionController,
};

/// Work through an uploaded lecture with the AI tutor.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Lecture to start a session for right away.
    #[arg(long)]
    lecture: Option<u64>,

    /// Backend base URL; overrides TUTOR_API_URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Run a built-in scripted lecture instead of talking to the backend.
    #[arg(long)]
    offline: bool,
}

/// Resolves on `Ctrl+C`. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C."),
        Err(e) => {
            warn!(error = %e, "Failed to install Ctrl+C handler.");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url.trim().to_string();
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Build the Gateway and Controller ---
    let (gateway, backend): (Arc<dyn SessionGateway>, String) = if args.offline {
        info!("Using the offline demo script.");
        (
            Arc::new(ScriptedSessionGateway::demo()),
            "offline demo script".to_string(),
        )
    } else {
        let mut http = HttpSessionGateway::new(config.api_url.clone(), config.request_timeout)
            .context("Failed to build HTTP client")?;
        if let Some(token) = &config.access_token {
            http = http.with_bearer_token(token.clone());
        }
        info!(api_url = %http.base_url(), "Using the HTTP backend.");
        (Arc::new(http), config.api_url.clone())
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = Arc::new(SessionController::new(
        gateway,
        config.poll_policy(),
        Some(events_tx),
    ));
    let lecture = args
        .lecture
        .or(args.offline.then_some(1))
        .map(LectureId);
    let state = AppState {
        controller,
        config: Arc::new(config),
        backend,
    };

    // --- 4. Run the REPL ---
    let stdin = BufReader::new(tokio::io::stdin());
    Repl::new(state, lecture, tokio::io::stdout())
        .run(stdin, events_rx, shutdown_signal())
        .await?;

    info!("Tutor has shut down.");
    // The blocking stdin reader would otherwise hold the runtime open until
    // the next line of input arrives. The REPL has already waited for the
    // remote cancel.
    std::process::exit(0);
}
