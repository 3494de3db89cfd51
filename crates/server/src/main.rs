use anyhow::Context;
use matchbook_server::{build_router, config::ServerConfig, AppState};
use matchbook_storage::Reconciler;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = config.database_path()?;
    tracing::info!("Opening database: {}", db_path.display());
    let reconciler = Reconciler::open(&db_path, config.engine.clone())
        .await
        .context("failed to initialize database")?;

    let app = build_router(AppState::new(reconciler));
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
