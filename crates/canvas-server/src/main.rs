mod app;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use canvas_contracts::events::EventLog;
use canvas_contracts::models::ModelRegistry;
use canvas_engine::GenerationService;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::app::{router, AppState};
use crate::config::{ServeArgs, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "canvas-server", version, about = "Image canvas generation server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the generate and edit endpoints.
    Serve(ServeArgs),
    /// Print the model registry as JSON.
    Models,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("canvas-server error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(ServerConfig::try_from(args)?),
        Command::Models => print_models(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn serve(config: ServerConfig) -> Result<()> {
    init_tracing();

    // Providers own blocking HTTP clients: build them before the runtime
    // starts and keep a handle here so they are dropped after it stops.
    let service = Arc::new(GenerationService::with_default_providers(
        config.upstream_timeout,
    )?);
    let events = config.events.as_ref().map(|path| {
        let log = EventLog::new(path, Uuid::new_v4().to_string());
        tracing::info!(
            path = %log.path().display(),
            session_id = log.session_id(),
            "recording events"
        );
        log
    });
    tracing::info!(
        providers = ?service.provider_names(),
        timeout_secs = config.upstream_timeout.as_secs(),
        "providers ready"
    );
    let app = router(
        AppState::new(Arc::clone(&service), events),
        config.max_body_bytes,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let served = runtime.block_on(app::serve(config.bind, app));
    drop(runtime);
    drop(service);
    served
}

fn print_models() -> Result<()> {
    let registry = ModelRegistry::default();
    let models: Vec<_> = registry.list().collect();
    println!("{}", serde_json::to_string_pretty(&models)?);
    Ok(())
}
