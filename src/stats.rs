use chrono::{DateTime, Duration, Utc};

use crate::models::Message;

/// views summed over the countable messages of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewCount {
    pub total_views: i64,
    pub message_count: u64,
}

/// aggregate statistics of one channel for one fetch cycle, kept exact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total_views: i64,
    pub message_count: u64,
    pub avg_views: f64,
    pub engagement_rate: f64,
}

impl StatsSnapshot {
    pub fn compute(
        messages: &[Message],
        days: i64,
        subscriber_count: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let views = count_channel_views(messages, days, now);
        let avg_views = avg_views(views);
        Self {
            total_views: views.total_views,
            message_count: views.message_count,
            avg_views,
            engagement_rate: engagement_rate(avg_views, subscriber_count),
        }
    }

    pub fn rounded_avg_views(&self) -> i64 {
        self.avg_views.round() as i64
    }

    pub fn rounded_engagement_rate(&self) -> f64 {
        (self.engagement_rate * 10.0).round() / 10.0
    }
}

pub fn window_start(days: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(days)
}

/// sums views of messages inside the trailing window; messages without a view count are ignored
pub fn count_channel_views(messages: &[Message], days: i64, now: DateTime<Utc>) -> ViewCount {
    let since = window_start(days, now);
    messages
        .iter()
        .filter(|message| message.timestamp >= since)
        .filter_map(|message| message.view_count)
        .fold(ViewCount::default(), |acc, views| ViewCount {
            total_views: acc.total_views + views.max(0),
            message_count: acc.message_count + 1,
        })
}

pub fn avg_views(views: ViewCount) -> f64 {
    if views.message_count == 0 {
        return 0.0;
    }
    views.total_views as f64 / views.message_count as f64
}

/// engagement rate in percent
pub fn engagement_rate(avg_views: f64, subscriber_count: i64) -> f64 {
    if subscriber_count <= 0 {
        return 0.0;
    }
    avg_views / subscriber_count as f64 * 100.0
}

/// cost per thousand views for the stored post price
pub fn cpm(post_price: f64, avg_coverage: f64) -> f64 {
    if avg_coverage <= 0.0 {
        return 0.0;
    }
    post_price / avg_coverage * 1000.0
}
