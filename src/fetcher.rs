use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::channel_store::{ChannelStore, StoreError};
use crate::config::{ChannelScope, FetcherConfig};
use crate::history::{get_channel_messages, HistoryWindow};
use crate::models::{Channel, ChatType, Dialog};
use crate::stats::{cpm, StatsSnapshot};
use crate::telegram::{MessagingClient, TelegramError};

/// why a single channel was skipped in a cycle
#[derive(Debug)]
pub enum FetchError {
    Telegram(TelegramError),
    Store(StoreError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Telegram(e) => write!(f, "{}", e),
            FetchError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for FetchError {}

impl From<TelegramError> for FetchError {
    fn from(err: TelegramError) -> Self {
        FetchError::Telegram(err)
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        FetchError::Store(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Updated,
    /// the channel is not in the directory, nothing to write
    NotInDirectory,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub updated: usize,
    pub not_in_directory: usize,
    pub skipped: usize,
}

pub struct Fetcher {
    client: Arc<dyn MessagingClient>,
    store: Arc<dyn ChannelStore>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        store: Arc<dyn ChannelStore>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn is_eligible(&self, dialog: &Dialog) -> bool {
        dialog.chat_type == ChatType::Channel
            && match self.config.scope {
                ChannelScope::All => true,
                ChannelScope::PublicOnly => dialog.is_public(),
            }
    }

    fn history_window(&self) -> HistoryWindow {
        HistoryWindow {
            days: self.config.window_days,
            page_size: self.config.page_size,
            max_pages: self.config.max_pages,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, TelegramError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// one pass over all eligible dialogs; only a failed dialog listing fails the cycle
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, TelegramError> {
        let dialogs = self.client.list_dialogs().await?;
        let mut report = CycleReport::default();

        for dialog in dialogs.iter().filter(|dialog| self.is_eligible(dialog)) {
            report.processed += 1;
            info!("Processing channel {} ({})", dialog.label(), dialog.chat_id);

            match self.refresh_channel(dialog, now).await {
                Ok(ChannelOutcome::Updated) => report.updated += 1,
                Ok(ChannelOutcome::NotInDirectory) => report.not_in_directory += 1,
                Err(FetchError::Telegram(e)) => {
                    warn!("Skipping channel {}: {}", dialog.label(), e);
                    report.skipped += 1;
                }
                Err(FetchError::Store(e)) => {
                    error!("Failed to store channel {}: {}", dialog.label(), e);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    async fn refresh_channel(
        &self,
        dialog: &Dialog,
        now: DateTime<Utc>,
    ) -> Result<ChannelOutcome, FetchError> {
        let mut candidate = self.build_channel_record(dialog, now).await?;

        let Some(existing) = self.store.get_channel_by_telegram_id(dialog.chat_id).await? else {
            info!(
                "Channel {} is not in the directory, cpm left unset",
                dialog.label()
            );
            return Ok(ChannelOutcome::NotInDirectory);
        };
        candidate.cpm = cpm(existing.post_price, candidate.avg_coverage as f64);

        self.store.update_data_from_fetcher(&candidate).await?;
        Ok(ChannelOutcome::Updated)
    }

    /// fresh metrics for one dialog; cpm is left at zero
    pub async fn build_channel_record(
        &self,
        dialog: &Dialog,
        now: DateTime<Utc>,
    ) -> Result<Channel, TelegramError> {
        // no member count, no write: sub_count and er are never zeroed
        let member_count = dialog
            .member_count
            .ok_or(TelegramError::MemberCountUnavailable(dialog.chat_id))?;

        let messages =
            get_channel_messages(self.client.as_ref(), dialog.chat_id, self.history_window(), now)
                .await?;
        let snapshot = StatsSnapshot::compute(
            &messages,
            self.config.window_days,
            member_count,
            now,
        );
        info!(
            "Channel {}: {} posts, {} views, avg {:.1}, er {:.2}%",
            dialog.label(),
            snapshot.message_count,
            snapshot.total_views,
            snapshot.avg_views,
            snapshot.engagement_rate
        );

        let link = self.resolve_link(dialog).await;
        let mut channel = Channel::from_fetcher(dialog.chat_id, &dialog.title, &link);
        channel.sub_count = member_count.max(0);
        channel.avg_coverage = snapshot.rounded_avg_views();
        channel.er = snapshot.rounded_engagement_rate();
        channel.photo_path = self.download_photo(dialog).await;
        Ok(channel)
    }

    async fn resolve_link(&self, dialog: &Dialog) -> String {
        match self.client.get_chat_link(dialog.chat_id).await {
            Ok(Some(link)) => link,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Failed to get link for {}: {}", dialog.label(), e);
                dialog
                    .username
                    .as_ref()
                    .map(|username| format!("@{}", username))
                    .unwrap_or_default()
            }
        }
    }

    /// path of the saved avatar, empty when there is none
    async fn download_photo(&self, dialog: &Dialog) -> String {
        if !dialog.has_photo {
            return String::new();
        }
        let path = self
            .config
            .photo_dir
            .join(format!("{}.jpg", dialog.chat_id.unsigned_abs()));

        match self.client.download_photo(dialog.chat_id, &path).await {
            Ok(true) => {
                info!("Saved avatar of {} to {}", dialog.label(), path.display());
                path.to_string_lossy().to_string()
            }
            Ok(false) => String::new(),
            Err(e) => {
                warn!("Failed to download avatar of {}: {}", dialog.label(), e);
                String::new()
            }
        }
    }

    /// runs cycles until `shutdown` flips to true; a running cycle is never interrupted
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("Fetch cycle started");
            match self.run_cycle().await {
                Ok(report) => info!(
                    "Fetch cycle finished: {} channels, {} updated, {} not in directory, {} skipped. Next run in {}s",
                    report.processed,
                    report.updated,
                    report.not_in_directory,
                    report.skipped,
                    self.config.interval.as_secs()
                ),
                Err(e) => error!(
                    "Fetch cycle failed: {}. Retrying in {}s",
                    e,
                    self.config.interval.as_secs()
                ),
            }

            tokio::select! {
                _ = sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // sender dropped, treat as shutdown
                        break;
                    }
                }
            }
        }
        info!("Fetcher stopped");
    }
}
