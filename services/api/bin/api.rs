//! Main Entrypoint for the CodePrep API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Building the generation backend and the streaming relay.
//! 4. Starting the scheduled contest sync.
//! 5. Constructing the Axum router, applying middleware and serving until shutdown.

use anyhow::Context;
use codeprep_api::{
    config::Config, contests::spawn_contest_sync, db::Db, router::create_router,
    state::AppState, ws::registry::ConnectionRegistry, ws::relay::Relay,
};
use codeprep_core::{OllamaClient, generation::DEFAULT_SYSTEM_PREAMBLE};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SYSTEM_PROMPT_FILE: &str = "system_prompt.md";

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = ?e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads the persona preamble, falling back to the built-in one.
fn load_system_prompt(prompts_path: &Path) -> String {
    let path = prompts_path.join(SYSTEM_PROMPT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => {
            warn!(path = %path.display(), "System prompt file is empty; using built-in preamble");
            DEFAULT_SYSTEM_PREAMBLE.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "System prompt not readable; using built-in preamble");
            DEFAULT_SYSTEM_PREAMBLE.to_string()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let db = Arc::new(
        Db::connect(
            &config.database_url,
            config.database_max_connections,
            config.database_acquire_timeout,
        )
        .await
        .context("Failed to connect to database")?,
    );
    db.run_migrations().await?;
    info!(
        max_connections = config.database_max_connections,
        "Database connection established and migrations are up-to-date."
    );

    // --- 4. Initialize the Relay ---
    let backend = Arc::new(OllamaClient::new(
        config.ollama_base_url.clone(),
        config.ollama_model.clone(),
    ));
    let relay = Relay::new(backend, config.relay.clone())
        .with_system_preamble(load_system_prompt(&config.prompts_path))
        .with_sampling(config.sampling);

    let app_state = Arc::new(AppState {
        db: db.clone(),
        sessions: db.clone(),
        relay: Arc::new(relay),
        connections: Arc::new(ConnectionRegistry::new()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Background Jobs ---
    let contest_sync = match config.contest_sync_interval {
        Some(interval) => Some(spawn_contest_sync(
            db.clone(),
            config.contest_source_url.clone(),
            interval,
        )),
        None => {
            info!("Contest sync disabled.");
            None
        }
    };

    // --- 6. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 7. Start Server ---
    info!(
        ollama_base_url = %config.ollama_base_url,
        model = %config.ollama_model,
        require_auth = config.relay.require_auth,
        framing = ?config.relay.framing,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = contest_sync {
        handle.abort();
    }
    info!("Server has shut down.");
    Ok(())
}
