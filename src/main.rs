use anyhow::Result;
use genai_relay::config::Config;
use genai_relay::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration from flags and environment
    let config = Config::load();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("genai_relay={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config
        .check()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Starting genai-relay service");
    tracing::info!(
        "Configuration: bind_addr={}, upstream={}, timeout={}s, store={}",
        config.bind_addr,
        config.upstream_base_url,
        config.upstream_timeout_secs,
        if config.redis_url.is_some() { "redis" } else { "memory" }
    );
    if config.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; relay endpoints will answer 500 until it is configured");
    }

    // Create and run the server
    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
