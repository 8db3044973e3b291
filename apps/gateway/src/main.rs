use anyhow::Result;
use tracing_subscriber::EnvFilter;

use giftpool_gateway::config::Config;
use giftpool_gateway::{SERVICE_NAME, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind_addr = config.bind_addr;
    let app = build_router(config)?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(service = SERVICE_NAME, bind_addr = %bind_addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
