use clap::{Parser, Subcommand};
use log::{info, warn};
use std::error::Error;

use tg_stats::channel_store::{create_pool, ChannelFilter, ChannelStore, PgChannelStore};
use tg_stats::config::AppConfig;
use tg_stats::migrations::MigrationManager;
use tg_stats::models::Channel;
use tg_stats::telegram::{GrammersClient, MessagingClient};

#[derive(Parser)]
#[command(name = "channel_admin")]
#[command(about = "Manage directory channels and the fetcher account's subscriptions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// subscribe the fetcher account to a channel and add it to the directory
    Add {
        /// @username or t.me link
        login: String,
        #[arg(long, default_value_t = 0)]
        owner_id: i64,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long, default_value_t = 0.0)]
        post_price: f64,
    },
    /// remove a channel from the directory and unsubscribe the fetcher account
    Remove { id: i32 },
    /// set the price of a post; cpm follows the current coverage
    SetPrice { id: i32, price: f64 },
    /// list directory channels
    List {
        #[arg(long)]
        min_subscribers: Option<i64>,
        #[arg(long)]
        max_subscribers: Option<i64>,
        #[arg(long)]
        min_er: Option<f64>,
        #[arg(long)]
        max_er: Option<f64>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 15)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// print the selected channels as JSON
    Export { ids: Vec<i32> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let config = AppConfig::from_env()?;

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let pool = create_pool(&config.database_url)?;
    MigrationManager::run_migrations(&pool).await?;
    let store = PgChannelStore::new(pool);

    match cli.command {
        Command::Add {
            login,
            owner_id,
            category,
            post_price,
        } => {
            let client = GrammersClient::connect(&config.telegram).await?;
            let Some(dialog) = client.join_channel(&login).await? else {
                return Err(format!("{} is not a joinable channel", login).into());
            };

            let link = client
                .get_chat_link(dialog.chat_id)
                .await?
                .unwrap_or_else(|| dialog.label());
            let channel = Channel {
                owner_id,
                category,
                post_price,
                sub_count: dialog.member_count.unwrap_or(0),
                ..Channel::from_fetcher(dialog.chat_id, &dialog.title, &link)
            };

            if store.insert(&channel).await? {
                info!("Added {} ({}) to the directory", dialog.title, dialog.chat_id);
            } else {
                warn!("{} is already in the directory", dialog.title);
            }
        }
        Command::Remove { id } => {
            let Some(channel) = store.get_channel_by_id(id).await? else {
                return Err(format!("Channel {} not found", id).into());
            };
            store.delete(id).await?;
            info!("Removed {} from the directory", channel.name);

            let client = GrammersClient::connect(&config.telegram).await?;
            if let Err(e) = client.leave_channel(channel.tg_id).await {
                warn!("Failed to leave {}: {}", channel.name, e);
            }
        }
        Command::SetPrice { id, price } => {
            if price < 0.0 {
                return Err("Post price must not be negative".into());
            }
            if !store.update_post_price(id, price).await? {
                return Err(format!("Channel {} not found", id).into());
            }
            info!("Post price of channel {} set to {}", id, price);
        }
        Command::List {
            min_subscribers,
            max_subscribers,
            min_er,
            max_er,
            name,
            limit,
            offset,
        } => {
            let mut filter = ChannelFilter::new()
                .subscribers(min_subscribers, max_subscribers)
                .er(min_er, max_er)
                .page(limit, offset);
            if let Some(name) = name {
                filter = filter.name(&name);
            }

            let (channels, total) = store.get_all(&filter).await?;
            println!("{} of {} channels", channels.len(), total);
            for channel in channels {
                println!(
                    "{:>5}  {:<32} subs {:>8}  avg {:>7}  er {:>5.1}%  cpm {:>8.2}  price {:>8.2}",
                    channel.id,
                    channel.name,
                    channel.sub_count,
                    channel.avg_coverage,
                    channel.er,
                    channel.cpm,
                    channel.post_price
                );
            }
        }
        Command::Export { ids } => {
            let channels = store.get_channels_by_ids(&ids).await?;
            println!("{}", serde_json::to_string_pretty(&channels)?);
        }
    }

    Ok(())
}
