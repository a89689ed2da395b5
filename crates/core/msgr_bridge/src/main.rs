use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use msgr_bridge::bridge::Bridge;
use msgr_bridge::config::Config;
use msgr_bridge::db::Database;
use msgr_bridge::matrix::http::HttpMatrixApi;

#[derive(Parser)]
#[command(name = "msgr-bridge", about = "Matrix <-> Messenger puppeting bridge")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Only run the database migrations, then exit.
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone())),
        )
        .init();

    let db = Database::connect(&config.appservice.database)
        .await
        .context("failed to open the database")?;
    if args.migrate_only {
        info!("Database migrations applied");
        return Ok(());
    }

    let matrix = Arc::new(HttpMatrixApi::new(
        &config.homeserver.address,
        &config.homeserver.domain,
        &config.appservice.as_token,
        config.bridge.backfill.msc2716,
    ));
    let bridge = Bridge::new(config, db, matrix);
    bridge.start().await.context("failed to start the bridge")?;
    info!("Bridge started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bridge.stop().await;
    Ok(())
}
