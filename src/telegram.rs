use async_trait::async_trait;
use chrono::DateTime;
use grammers_client::types::Chat;
use grammers_client::{Client, Config, InitParams, InvocationError};
use grammers_session::Session;
use grammers_tl_types as tl;
use log::{error, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::config::TelegramConfig;
use crate::models::{ChatType, Dialog, HistoryPage, Message};
use crate::rate_limiters::TelegramRateLimiter;
use crate::session_manager::SessionManager;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;

#[derive(Debug)]
pub enum TelegramError {
    Connection(String),
    Unauthorized,
    Request(Box<dyn Error + Send + Sync>),
    Timeout(Duration),
    UnknownChat(i64),
    InvalidLogin(String),
    MemberCountUnavailable(i64),
    Io(std::io::Error),
}

impl TelegramError {
    /// errors worth another attempt within the same call
    pub fn is_transient(&self) -> bool {
        matches!(self, TelegramError::Timeout(_) | TelegramError::Connection(_))
    }
}

impl fmt::Display for TelegramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelegramError::Connection(msg) => write!(f, "Telegram connection failed: {}", msg),
            TelegramError::Unauthorized => {
                write!(f, "Client is not authorized, run the authorize binary first")
            }
            TelegramError::Request(e) => write!(f, "Telegram request failed: {}", e),
            TelegramError::Timeout(limit) => {
                write!(f, "Telegram request timed out after {}s", limit.as_secs())
            }
            TelegramError::UnknownChat(chat_id) => write!(f, "Chat {} is not in the dialog list", chat_id),
            TelegramError::InvalidLogin(login) => write!(f, "Not a channel username or link: {}", login),
            TelegramError::MemberCountUnavailable(chat_id) => {
                write!(f, "Member count of chat {} is unavailable", chat_id)
            }
            TelegramError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for TelegramError {}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::Dropped | InvocationError::Read(_) => {
                TelegramError::Connection(err.to_string())
            }
            other => TelegramError::Request(Box::new(other)),
        }
    }
}

impl From<std::io::Error> for TelegramError {
    fn from(err: std::io::Error) -> Self {
        TelegramError::Io(err)
    }
}

/// what the fetcher needs from a logged in telegram account
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn list_dialogs(&self) -> Result<Vec<Dialog>, TelegramError>;

    /// one page of history, newest first, skipping the `offset` newest entries
    async fn get_history(
        &self,
        chat_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage, TelegramError>;

    /// invite link if the chat exposes one, otherwise its username
    async fn get_chat_link(&self, chat_id: i64) -> Result<Option<String>, TelegramError>;

    /// saves the small profile photo; `false` when the chat has none
    async fn download_photo(&self, chat_id: i64, path: &Path) -> Result<bool, TelegramError>;

    /// joins a channel by username or t.me link; `None` if it is not a channel
    async fn join_channel(&self, login: &str) -> Result<Option<Dialog>, TelegramError>;

    async fn leave_channel(&self, chat_id: i64) -> Result<(), TelegramError>;
}

/// normalizes `@name`, `name` and `t.me/name` to a bare username
pub fn normalize_channel_login(text: &str) -> Option<String> {
    let channel_regex = Regex::new(r"^@?([a-zA-Z0-9_]{5,32})$").ok()?;
    let tme_regex = Regex::new(r"^(?:https?://)?t\.me/([a-zA-Z0-9_]{5,32})/?$").ok()?;

    let text = text.trim();
    channel_regex
        .captures(text)
        .or_else(|| tme_regex.captures(text))
        .map(|captures| captures[1].to_string())
}

pub fn calculate_delay(attempt: u32) -> Duration {
    let base_delay = BASE_DELAY_MS * (1 << attempt); // exponential backoff: 1s, 2s, 4s
    let jitter = fastrand::u64(0..=base_delay / 4); // add up to 25% jitter
    Duration::from_millis(base_delay + jitter)
}

/// `MessagingClient` over a grammers user session
pub struct GrammersClient {
    client: Client,
    chats: Mutex<HashMap<i64, Chat>>,
    history_limiter: TelegramRateLimiter,
    request_timeout: Duration,
}

impl GrammersClient {
    pub async fn connect(config: &TelegramConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let session_file = SessionManager::pick_session(&config.session_dir)?;
        let session_path = session_file.to_string_lossy().to_string();

        for attempt in 0..=MAX_RETRIES {
            let session = Session::load_file(&session_path)?;
            info!("Loaded session: {}", session_path);

            let client_config = Config {
                session,
                api_id: config.api_id,
                api_hash: config.api_hash.clone(),
                params: InitParams {
                    ..Default::default()
                },
            };

            let client = match timeout(config.request_timeout, Client::connect(client_config)).await {
                Ok(Ok(client)) => client,
                Ok(Err(e)) if attempt < MAX_RETRIES => {
                    let delay = calculate_delay(attempt);
                    warn!(
                        "Failed to connect Telegram client (attempt {}/{}): {}. Retrying in {}ms",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    continue;
                }
                Ok(Err(e)) => {
                    error!(
                        "Failed to connect Telegram client after {} attempts: {}",
                        MAX_RETRIES + 1,
                        e
                    );
                    return Err(Box::new(TelegramError::Connection(e.to_string())));
                }
                Err(_) if attempt < MAX_RETRIES => {
                    warn!("Telegram connect timed out (attempt {}/{})", attempt + 1, MAX_RETRIES + 1);
                    sleep(calculate_delay(attempt)).await;
                    continue;
                }
                Err(_) => return Err(Box::new(TelegramError::Timeout(config.request_timeout))),
            };

            if !client.is_authorized().await? {
                return Err(Box::new(TelegramError::Unauthorized));
            }

            info!("Client connected and authorized (attempt {})", attempt + 1);
            return Ok(Self {
                client,
                chats: Mutex::new(HashMap::new()),
                history_limiter: TelegramRateLimiter::new(config.history_min_interval),
                request_timeout: config.request_timeout,
            });
        }

        unreachable!()
    }

    async fn timed<T, E, F>(&self, fut: F) -> Result<T, TelegramError>
    where
        F: Future<Output = Result<T, E>>,
        TelegramError: From<E>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(TelegramError::from),
            Err(_) => Err(TelegramError::Timeout(self.request_timeout)),
        }
    }

    /// retries transient failures with exponential backoff
    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TelegramError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TelegramError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let delay = calculate_delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {}ms",
                        what,
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn chat(&self, chat_id: i64) -> Result<Chat, TelegramError> {
        if let Some(chat) = self.chats.lock().await.get(&chat_id) {
            return Ok(chat.clone());
        }
        // unknown id, refresh the dialog cache once
        self.list_dialogs().await?;
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .ok_or(TelegramError::UnknownChat(chat_id))
    }

    async fn full_channel(&self, chat: &Chat) -> Result<Option<tl::types::ChannelFull>, TelegramError> {
        let Some(input_channel) = chat.pack().try_to_input_channel() else {
            return Ok(None);
        };
        let request = tl::functions::channels::GetFullChannel {
            channel: input_channel,
        };
        let tl::enums::messages::ChatFull::Full(full) =
            self.timed(self.client.invoke(&request)).await?;
        match full.full_chat {
            tl::enums::ChatFull::ChannelFull(channel_full) => Ok(Some(channel_full)),
            tl::enums::ChatFull::Full(_) => Ok(None),
        }
    }

    /// member count is `None` when telegram could not tell it
    async fn to_dialog(&self, chat: &Chat) -> Dialog {
        let (chat_type, member_count) = match chat {
            Chat::User(_) => (ChatType::User, None),
            Chat::Group(_) => (ChatType::Group, None),
            Chat::Channel(channel) => {
                let count = match channel.raw.participants_count {
                    Some(count) => Some(count as i64),
                    None => match self.retrying("Member count request", || self.full_channel(chat)).await {
                        Ok(full) => full.and_then(|full| full.participants_count).map(i64::from),
                        Err(e) => {
                            warn!("Failed to get member count for {}: {}", chat.name(), e);
                            None
                        }
                    },
                };
                (ChatType::Channel, count)
            }
        };

        Dialog {
            chat_id: chat.id(),
            chat_type,
            title: chat.name().to_string(),
            username: chat.username().map(str::to_string),
            member_count,
            has_photo: chat.photo_downloadable(false).is_some(),
        }
    }

    async fn fetch_history_page(
        &self,
        chat: &Chat,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage, TelegramError> {
        self.history_limiter.wait().await;

        let request = tl::functions::messages::GetHistory {
            peer: chat.pack().to_input_peer(),
            offset_id: 0,
            offset_date: 0,
            add_offset: offset as i32,
            limit: limit as i32,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let raw_messages = match self.timed(self.client.invoke(&request)).await? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };

        Ok(HistoryPage {
            raw_count: raw_messages.len(),
            messages: raw_messages.into_iter().filter_map(convert_message).collect(),
        })
    }
}

fn convert_message(raw: tl::enums::Message) -> Option<Message> {
    let (id, date, views) = match raw {
        tl::enums::Message::Message(m) => (m.id, m.date, m.views),
        tl::enums::Message::Service(m) => (m.id, m.date, None),
        tl::enums::Message::Empty(_) => return None,
    };
    Some(Message {
        id,
        timestamp: DateTime::from_timestamp(date as i64, 0)?,
        view_count: views.map(i64::from),
    })
}

#[async_trait]
impl MessagingClient for GrammersClient {
    async fn list_dialogs(&self) -> Result<Vec<Dialog>, TelegramError> {
        let mut chats = Vec::new();
        let mut iter = self.client.iter_dialogs();
        while let Some(dialog) = self.timed(iter.next()).await? {
            chats.push(dialog.chat().clone());
        }

        let mut dialogs = Vec::with_capacity(chats.len());
        for chat in &chats {
            dialogs.push(self.to_dialog(chat).await);
        }

        let mut cache = self.chats.lock().await;
        cache.clear();
        cache.extend(chats.into_iter().map(|chat| (chat.id(), chat)));

        info!("Listed {} dialogs", dialogs.len());
        Ok(dialogs)
    }

    async fn get_history(
        &self,
        chat_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<HistoryPage, TelegramError> {
        let chat = self.chat(chat_id).await?;
        self.retrying("History request", || self.fetch_history_page(&chat, offset, limit))
            .await
    }

    async fn get_chat_link(&self, chat_id: i64) -> Result<Option<String>, TelegramError> {
        let chat = self.chat(chat_id).await?;
        let invite_link = self
            .retrying("Chat info request", || self.full_channel(&chat))
            .await?
            .and_then(|full| full.exported_invite)
            .and_then(|invite| match invite {
                tl::enums::ExportedChatInvite::ChatInviteExported(exported) => Some(exported.link),
                _ => None,
            });

        Ok(invite_link.or_else(|| chat.username().map(|username| format!("@{}", username))))
    }

    async fn download_photo(&self, chat_id: i64, path: &Path) -> Result<bool, TelegramError> {
        let chat = self.chat(chat_id).await?;
        let Some(photo) = chat.photo_downloadable(false) else {
            return Ok(false);
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.timed(self.client.download_media(&photo, path)).await?;
        Ok(true)
    }

    async fn join_channel(&self, login: &str) -> Result<Option<Dialog>, TelegramError> {
        let username =
            normalize_channel_login(login).ok_or_else(|| TelegramError::InvalidLogin(login.to_string()))?;

        let Some(chat) = self.timed(self.client.resolve_username(&username)).await? else {
            info!("Channel {} not found", username);
            return Ok(None);
        };
        if !matches!(chat, Chat::Channel(_)) {
            info!("{} is not a channel", username);
            return Ok(None);
        }

        let joined = self
            .timed(self.client.join_chat(chat.pack()))
            .await?
            .unwrap_or(chat);
        let dialog = self.to_dialog(&joined).await;
        self.chats.lock().await.insert(joined.id(), joined);

        info!("Joined channel {}", dialog.label());
        Ok(Some(dialog))
    }

    async fn leave_channel(&self, chat_id: i64) -> Result<(), TelegramError> {
        let chat = self.chat(chat_id).await?;
        self.timed(self.client.delete_dialog(chat.pack())).await?;
        self.chats.lock().await.remove(&chat_id);
        info!("Left channel {}", chat.name());
        Ok(())
    }
}
