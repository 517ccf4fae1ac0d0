use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use tg_stats::channel_store::{ChannelFilter, ChannelStore, StoreError};
use tg_stats::models::{Channel, ChatType, Dialog, Message};

use super::TestDatabase;

/// helper for building channel dialogs with predictable ids
pub struct TestDialogBuilder {
    dialog: Dialog,
}

impl TestDialogBuilder {
    pub fn channel(chat_id: i64, title: &str) -> Self {
        Self {
            dialog: Dialog {
                chat_id,
                chat_type: ChatType::Channel,
                title: title.to_string(),
                username: None,
                member_count: None,
                has_photo: false,
            },
        }
    }

    pub fn group(chat_id: i64, title: &str) -> Self {
        let mut builder = Self::channel(chat_id, title);
        builder.dialog.chat_type = ChatType::Group;
        builder
    }

    pub fn username(mut self, username: &str) -> Self {
        self.dialog.username = Some(username.to_string());
        self
    }

    pub fn members(mut self, member_count: i64) -> Self {
        self.dialog.member_count = Some(member_count);
        self
    }

    pub fn with_photo(mut self) -> Self {
        self.dialog.has_photo = true;
        self
    }

    pub fn build(self) -> Dialog {
        self.dialog
    }
}

/// `count` posts, newest first, one every `step` back from `now`
pub fn posts(count: usize, views: i64, step: Duration, now: DateTime<Utc>) -> Vec<Message> {
    (0..count)
        .map(|i| Message {
            id: (count - i) as i32,
            timestamp: now - step * i as i32,
            view_count: Some(views),
        })
        .collect()
}

/// a directory entry as the channel owner would submit it
pub fn directory_channel(tg_id: i64, name: &str, tg_link: &str, post_price: f64) -> Channel {
    Channel {
        post_price,
        owner_id: 42,
        category: "news".to_string(),
        ..Channel::from_fetcher(tg_id, name, tg_link)
    }
}

/// `ChannelStore` kept in memory, mirroring the postgres semantics
#[derive(Default)]
pub struct InMemoryChannelStore {
    channels: Mutex<Vec<Channel>>,
    pub fail_lookups: bool,
    /// tg_ids whose fetcher writes fail
    pub fail_updates_for: HashSet<i64>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let store = Self::new();
        {
            let mut stored = store.channels.lock().unwrap();
            for (i, channel) in channels.into_iter().enumerate() {
                stored.push(Channel {
                    id: i as i32 + 1,
                    ..channel
                });
            }
        }
        store
    }

    pub fn snapshot(&self) -> Vec<Channel> {
        self.channels.lock().unwrap().clone()
    }

    pub fn by_tg_id(&self, tg_id: i64) -> Option<Channel> {
        self.snapshot().into_iter().find(|c| c.tg_id == tg_id)
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn get_channel_by_telegram_id(&self, tg_id: i64) -> Result<Option<Channel>, StoreError> {
        if self.fail_lookups {
            return Err(StoreError::DatabaseError("connection refused".into()));
        }
        Ok(self.by_tg_id(tg_id))
    }

    async fn get_channel_by_id(&self, id: i32) -> Result<Option<Channel>, StoreError> {
        Ok(self.snapshot().into_iter().find(|c| c.id == id))
    }

    async fn update_data_from_fetcher(&self, channel: &Channel) -> Result<(), StoreError> {
        if self.fail_updates_for.contains(&channel.tg_id) {
            return Err(StoreError::DatabaseError("deadlock detected".into()));
        }
        let mut channels = self.channels.lock().unwrap();
        let stored = channels
            .iter_mut()
            .find(|c| c.tg_id == channel.tg_id)
            .ok_or(StoreError::ChannelNotFound(channel.tg_id))?;

        stored.sub_count = channel.sub_count;
        stored.avg_coverage = channel.avg_coverage;
        stored.er = channel.er;
        stored.cpm = channel.cpm;
        if !channel.tg_link.is_empty() {
            stored.tg_link = channel.tg_link.clone();
        }
        if !channel.photo_path.is_empty() {
            stored.photo_path = channel.photo_path.clone();
        }
        Ok(())
    }

    async fn update_post_price(&self, id: i32, post_price: f64) -> Result<bool, StoreError> {
        let mut channels = self.channels.lock().unwrap();
        match channels.iter_mut().find(|c| c.id == id) {
            Some(stored) => {
                stored.post_price = post_price;
                stored.cpm = tg_stats::stats::cpm(post_price, stored.avg_coverage as f64);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_all(&self, filter: &ChannelFilter) -> Result<(Vec<Channel>, i64), StoreError> {
        let matching: Vec<Channel> = self
            .snapshot()
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_channels_by_ids(&self, ids: &[i32]) -> Result<Vec<Channel>, StoreError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|c| ids.contains(&c.id))
            .collect())
    }

    async fn delete(&self, id: i32) -> Result<bool, StoreError> {
        let mut channels = self.channels.lock().unwrap();
        let before = channels.len();
        channels.retain(|c| c.id != id);
        Ok(channels.len() < before)
    }

    async fn insert(&self, channel: &Channel) -> Result<bool, StoreError> {
        let mut channels = self.channels.lock().unwrap();
        if channels
            .iter()
            .any(|c| c.tg_id == channel.tg_id || c.tg_link == channel.tg_link)
        {
            return Ok(false);
        }
        let id = channels.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        channels.push(Channel {
            id,
            cpm: 0.0,
            ..channel.clone()
        });
        Ok(true)
    }
}

/// utility functions for assertions against the test database
pub struct TestAssertions;

impl TestAssertions {
    /// verifies the number of rows in the channels table
    pub async fn assert_channel_count(
        db: &TestDatabase,
        expected_count: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = db.pool.get().await?;
        let actual_count: i64 = client
            .query_one("SELECT COUNT(*) FROM channels", &[])
            .await?
            .get(0);
        assert_eq!(
            actual_count, expected_count,
            "Expected {} channels, but found {}",
            expected_count, actual_count
        );
        Ok(())
    }

    /// verifies that the fetcher stamped the row after a refresh
    pub async fn assert_refreshed(
        db: &TestDatabase,
        tg_id: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = db.pool.get().await?;
        let row = client
            .query_one(
                "SELECT updated_at >= created_at FROM channels WHERE tg_id = $1",
                &[&tg_id],
            )
            .await?;
        let refreshed: bool = row.get(0);
        assert!(refreshed, "Channel {} was not refreshed", tg_id);
        Ok(())
    }
}
