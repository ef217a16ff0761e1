use agworld_reporter::config::AppConfig;
use agworld_reporter::logging::{init_logging, LoggingConfig};
use agworld_reporter::topology;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = AppConfig::from_env()?;
    topology::run(config).await
}
