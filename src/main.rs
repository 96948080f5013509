use std::net::SocketAddr;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use leadline::{config::AppConfig, db, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        ai_classification = config.ai_api_key.is_some(),
        email = config.email_api_key.is_some(),
        webhook = config.webhook_url.is_some(),
        fallback_users = config.fallback_users.len(),
        "loaded configuration"
    );

    let pool = connect_store(&config);
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST and SERVER_PORT must form a socket address")?;

    let state = AppState::from_config(pool, config)?;
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Without a DATABASE_URL the service runs storeless; fallback users and the
/// email path still work. A configured but unreachable database is retried
/// on every checkout.
fn connect_store(config: &AppConfig) -> Option<db::PgPool> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; running without a store");
        return None;
    };
    let pool = db::init_pool_with_size(url, config.database_max_pool_size);
    if let Err(err) = pool.get() {
        tracing::warn!(error = %err, "database unreachable at startup; will keep retrying");
    }
    Some(pool)
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        tracing::info!("received shutdown signal");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
