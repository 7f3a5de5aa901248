use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollbet_backend::api::create_router;
use pollbet_backend::betting::notify::TracingNotifier;
use pollbet_backend::betting::token_gate::AllowAllGate;
use pollbet_backend::betting::{BettingDb, BettingEngine};
use pollbet_backend::config::{self, Args, Config};

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    init_tracing();

    let config = Config::from_args(Args::parse());

    let db = BettingDb::new(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path))?;
    info!("Database initialized at: {}", config.db_path);

    let engine = BettingEngine::new(db, Arc::new(AllowAllGate), Arc::new(TracingNotifier));

    let app = create_router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("API server listening on {}", config.bind);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollbet_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
