mod config;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use parley_db::Database;
use parley_db::seed::Seed;
use parley_gateway::gateway::Gateway;

use crate::config::ServerConfig;
use crate::routes::{ServerState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    if let Some(seed_path) = &config.seed_path {
        db.import_seed(&Seed::from_path(seed_path)?)?;
    }

    let gateway = Gateway::with_history_limit(db.clone(), db, config.history_limit);
    let app = build_router(ServerState {
        gateway,
        internal_token: config.internal_token.as_deref().map(Arc::from),
    });

    let target = config.bind_target();
    let listener = tokio::net::TcpListener::bind(&target)
        .await
        .with_context(|| format!("binding {target}"))?;
    info!("Parley server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
