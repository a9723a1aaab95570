//! Grants Indexer: entry point.
//!
//! Starts a background indexer task that polls `eth_getLogs` for the round
//! manager's `GrantDonation` events and persists them to SQLite. Alongside it
//! an Axum REST API serves round listings, CLR matching predictions (cached
//! per indexed block), grant summaries, quotes and checkout preparation.

mod api;
mod cache;
mod config;
mod db;
mod errors;
mod events;
mod indexer;
mod quotes;
mod rounds;
mod rpc;
mod service;
mod trust;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cache::{KeyedLocks, SqliteCache};
use config::Config;
use indexer::IndexerState;
use quotes::HttpQuoteProvider;
use rounds::RoundRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the indexer, quote and trust lookups.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let registry = RoundRegistry::load(&config.rounds_file).await?;
    let shutdown = CancellationToken::new();

    // ─── Background indexer ───────────────────────────────
    let indexer_state = Arc::new(IndexerState {
        pool: pool.clone(),
        config: config.clone(),
        client: client.clone(),
    });
    let indexer_task = tokio::spawn(indexer::run(indexer_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let quotes = HttpQuoteProvider::new(
        client.clone(),
        &config.quote_api_url,
        &config.quote_platform,
        &config.quote_currency,
    );
    let api_state = Arc::new(api::ApiState {
        pool: pool.clone(),
        client,
        config: config.clone(),
        registry,
        cache: Arc::new(SqliteCache::new(pool)),
        locks: Arc::new(KeyedLocks::new()),
        quotes: Arc::new(quotes),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/rounds", get(api::list_rounds))
        .route("/rounds/:address/predictions", get(api::get_round_predictions))
        .route("/grants/:id/rounds", get(api::get_grant_rounds))
        .route("/quotes", get(api::get_quotes))
        .route("/checkout", post(api::checkout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    indexer_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
