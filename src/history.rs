use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::models::Message;
use crate::stats::window_start;
use crate::telegram::{MessagingClient, TelegramError};

/// how far back and how to page through a chat history
#[derive(Debug, Clone, Copy)]
pub struct HistoryWindow {
    pub days: i64,
    pub page_size: usize,
    pub max_pages: usize,
}

/// fetches the pages covering the trailing `days` of a channel, newest first.
///
/// Paging stops on an empty page, when the oldest message of the last page is
/// older than the window, or after `max_pages` pages. Telegram may answer with
/// fewer messages than asked for while older history exists, so a short page
/// does not end the history.
pub async fn get_channel_messages(
    client: &dyn MessagingClient,
    channel_id: i64,
    window: HistoryWindow,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, TelegramError> {
    let since = window_start(window.days, now);
    let mut messages: Vec<Message> = Vec::new();
    let mut offset = 0;

    for page_number in 1..=window.max_pages.max(1) {
        let page = client.get_history(channel_id, offset, window.page_size).await?;
        debug!(
            "Got {} messages ({} raw) from {} (page {}, offset {})",
            page.messages.len(),
            page.raw_count,
            channel_id,
            page_number,
            offset
        );

        if page.raw_count == 0 {
            break;
        }
        // deleted entries still occupy history slots
        offset += page.raw_count;

        let covers_window = page
            .messages
            .last()
            .map_or(false, |oldest| oldest.timestamp < since);
        messages.extend(page.messages);

        if covers_window {
            return Ok(messages);
        }
        if page_number == window.max_pages {
            warn!(
                "Stopped paging {} after {} pages without reaching the window start",
                channel_id, page_number
            );
        }
    }

    Ok(messages)
}
