use anyhow::Context;
use tracing_subscriber::EnvFilter;

use budgetsync_server::config::AppConfig;
use budgetsync_server::identity::IdentityVerifier;
use budgetsync_server::{AppState, build_router, storage};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "budgetsync_server=info,tower_http=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(config.json_logs);

    tracing::info!("database: {}", config.database_path.display());
    let db = storage::init_db(&config.database_path)?;
    tracing::info!("database initialized");

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;
    let identity = IdentityVerifier::from_config(&config, &http).await?;
    identity.spawn_refresh(http);

    let port = config.port;
    let app = build_router(AppState {
        db,
        config,
        identity,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
