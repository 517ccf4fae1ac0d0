use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

use tg_stats::channel_store::{create_pool, PgChannelStore};
use tg_stats::config::AppConfig;
use tg_stats::fetcher::Fetcher;
use tg_stats::migrations::MigrationManager;
use tg_stats::telegram::GrammersClient;

#[derive(Parser)]
#[command(name = "tg-stats-fetcher")]
#[command(about = "Periodically refreshes channel statistics from Telegram")]
struct Args {
    /// run a single fetch cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // initialize rustls crypto provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = AppConfig::from_env()?;

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let pool = create_pool(&config.database_url)?;
    MigrationManager::run_migrations(&pool).await?;
    let store = Arc::new(PgChannelStore::new(pool));

    let client = Arc::new(GrammersClient::connect(&config.telegram).await?);
    let fetcher = Fetcher::new(client, store, config.fetcher.clone());

    if args.once {
        let report = fetcher.run_cycle().await?;
        info!("Single cycle finished: {:?}", report);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!("Starting fetcher...");
    fetcher.run(shutdown_rx).await;

    Ok(())
}
