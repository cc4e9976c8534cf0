use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use kindred_db::Database;
use kindred_gateway::sweep::run_idle_sweep;
use kindred_server::build_app;
use kindred_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindred=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let (app, presence) = build_app(&config, db);

    tokio::spawn(run_idle_sweep(
        presence,
        config.sweep_interval,
        config.idle_timeout,
    ));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Kindred server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
