use anyhow::Context;
use sparkle_ratelimit::{config::ServiceConfig, init_service, init_tracing};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line; environment alone is also valid
    let config_path = env::args().nth(1).map(PathBuf::from);

    // Load configuration
    let config = ServiceConfig::load(config_path.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}\nUsage: sparkle-ratelimit [config_file]",
            config_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "environment".to_string())
        )
    })?;

    // Initialize tracing
    init_tracing(config.logging.format);

    // Start the service
    init_service(config).await.context("Rate limit service error")?;

    Ok(())
}
