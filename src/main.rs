//! Squarely - room server binary.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, ConfigArgs};
use squarely::{
    AppState, MemoryRoomStore, RoomEngine, RoomHub, RoomStore, ServerConfig, SqliteRoomStore,
    StoreBackend, router, spawn_sweeper,
};
use std::sync::Arc;
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { args } => run_server(args).await,
        Command::PrintConfig { args } => print_config(args),
    }
}

/// Resolves configuration from file, environment and flags.
fn resolve_config(args: &ConfigArgs) -> Result<ServerConfig> {
    let base = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    Ok(base
        .apply_env()?
        .with_overrides(args.overrides())
        .validate()?)
}

fn print_config(args: ConfigArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}

#[instrument(skip(config), fields(store = %config.store()))]
fn open_store(config: &ServerConfig) -> Result<Arc<dyn RoomStore>> {
    let store: Arc<dyn RoomStore> = match config.store() {
        StoreBackend::Memory => Arc::new(MemoryRoomStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteRoomStore::open(config.db_path().clone())?),
    };
    Ok(store)
}

/// Run the HTTP room server
async fn run_server(args: ConfigArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = resolve_config(&args)?;
    info!(
        store = %config.store(),
        grid_size = config.grid_size(),
        turn_limit = config.turn_limit(),
        ttl_secs = config.room_ttl_secs(),
        sweep_secs = config.sweep_interval_secs(),
        "Starting squarely room server"
    );

    let store = open_store(&config)?;
    let engine = RoomEngine::new(store, config.rules(), config.room_ttl());
    let hub = RoomHub::new(*config.channel_capacity());
    let state = AppState::new(engine, hub);
    let sweeper = spawn_sweeper(state.clone(), config.sweep_interval());
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Server ready at http://{}/", addr);

    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;
    Ok(())
}
