//! balldontlie sync service.
//!
//! Proxies the balldontlie NBA API and, when `DATABASE_URL` is set, keeps a
//! Postgres copy of teams and games refreshed by explicit or scheduled syncs.

use anyhow::{Context, Result};
use bdl_sync::routes::{router, AppState};
use bdl_sync::{Config, PgStore};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bdl_sync=info".parse().context("invalid log directive")?),
        )
        .init();

    info!("balldontlie sync service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    if config.api_key().is_none() {
        warn!("BALLDONTLIE_API_KEY is not set; upstream requests will fail");
    }
    if config.task_token.is_none() {
        warn!("TASK_TOKEN is not set; the scheduled sync endpoint is disabled");
    }

    let store = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect_with_retry(url, 5).await?;
            store.ensure_schema().await.context("Failed to create schema")?;
            Some(store)
        }
        None => {
            warn!("DATABASE_URL is not set; sync and db endpoints will not persist");
            None
        }
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config, store).context("Failed to create HTTP client")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
            }
        })
        .await
        .context("Server error")?;

    Ok(())
}
