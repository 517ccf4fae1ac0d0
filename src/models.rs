use chrono::{DateTime, Utc};
use serde::Serialize;

/// a directory channel as stored in the `channels` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: i32,
    pub owner_id: i64,
    pub name: String,
    pub tg_link: String,
    pub tg_id: i64,
    pub category: String,
    pub sub_count: i64,
    pub avg_coverage: i64,
    pub er: f64,
    pub cpm: f64,
    pub post_price: f64,
    pub photo_path: String,
}

impl Channel {
    /// builds a record for a channel seen by the fetcher; directory fields stay empty
    pub fn from_fetcher(tg_id: i64, name: &str, tg_link: &str) -> Self {
        Self {
            id: 0,
            owner_id: 0,
            name: name.to_string(),
            tg_link: tg_link.to_string(),
            tg_id,
            category: String::new(),
            sub_count: 0,
            avg_coverage: 0,
            er: 0.0,
            cpm: 0.0,
            post_price: 0.0,
            photo_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    User,
    Group,
    Channel,
}

/// a conversation entry as seen by the fetcher account
#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub title: String,
    pub username: Option<String>,
    /// `None` when telegram did not report it
    pub member_count: Option<i64>,
    pub has_photo: bool,
}

impl Dialog {
    pub fn is_public(&self) -> bool {
        self.username.as_deref().map_or(false, |u| !u.is_empty())
    }

    /// human readable label for log lines
    pub fn label(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", username),
            None => self.title.clone(),
        }
    }
}

/// a single history entry; service messages carry no view count
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub view_count: Option<i64>,
}

/// one history response; `raw_count` includes deleted entries dropped from `messages`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub raw_count: usize,
}

impl HistoryPage {
    pub fn new(messages: Vec<Message>) -> Self {
        let raw_count = messages.len();
        Self { messages, raw_count }
    }
}
