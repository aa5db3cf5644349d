use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quizduel::bus::amqp::AmqpBus;
use quizduel::bus::DuelBus;
use quizduel::config::Settings;
use quizduel::coordinator::RequestCoordinator;
use quizduel::http::{self, AppState};
use quizduel::questions::QuestionProvider;
use quizduel::session::SessionRegistry;
use quizduel::store::sqlite::{self, SqliteDuelStore, SqlitePlayerStore, SqliteQuestionStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load()?;

    let pool = sqlite::connect(&settings.store.url).await?;
    let duels = Arc::new(SqliteDuelStore::new(pool.clone()));
    let players = Arc::new(SqlitePlayerStore::new(pool.clone()));
    let provider = QuestionProvider::new(
        Arc::new(SqliteQuestionStore::new(pool)),
        settings.duel.questions_per_duel,
    );

    let amqp = Arc::new(AmqpBus::connect(&settings.bus.url).await?);
    let bus: Arc<dyn DuelBus> = amqp.clone();
    let registry = Arc::new(SessionRegistry::new(bus.clone()));
    amqp.start_consumer(registry.clone()).await?;

    let coordinator = Arc::new(RequestCoordinator::new(
        settings.clone(),
        duels,
        players,
        provider,
        bus,
        registry.clone(),
    ));

    let listener = TcpListener::bind(&settings.http.addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.http.addr))?;
    info!(addr = %settings.http.addr, "Duel service listening");

    axum::serve(listener, http::router(AppState { coordinator }))
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the shutdown signal: {e}");
        return;
    }
    info!(live_duels = registry.live_sessions(), "Shutting down, cancelling live duels");
    registry.shutdown();
}
