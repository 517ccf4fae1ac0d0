use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use log::{error, info, warn};
use std::error::Error;
use std::fmt;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::models::Channel;

#[derive(Debug)]
pub enum StoreError {
    ChannelNotFound(i64),
    DatabaseError(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ChannelNotFound(tg_id) => write!(f, "Channel {} not found", tg_id),
            StoreError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl Error for StoreError {}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::DatabaseError(Box::new(err))
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::DatabaseError(Box::new(err))
    }
}

/// optional ranges and searches for listing channels
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFilter {
    pub subscribers: (Option<i64>, Option<i64>),
    pub avg_coverage: (Option<i64>, Option<i64>),
    pub er: (Option<f64>, Option<f64>),
    pub cpm: (Option<f64>, Option<f64>),
    pub post_price: (Option<f64>, Option<f64>),
    pub tg_link: Option<String>,
    pub name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            subscribers: (None, None),
            avg_coverage: (None, None),
            er: (None, None),
            cpm: (None, None),
            post_price: (None, None),
            tg_link: None,
            name: None,
            limit: 15,
            offset: 0,
        }
    }
}

impl ChannelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribers(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.subscribers = (min, max);
        self
    }

    pub fn avg_coverage(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.avg_coverage = (min, max);
        self
    }

    pub fn er(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.er = (min, max);
        self
    }

    pub fn cpm(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.cpm = (min, max);
        self
    }

    pub fn post_price(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.post_price = (min, max);
        self
    }

    /// case-insensitive substring match on the link
    pub fn tg_link(mut self, needle: &str) -> Self {
        self.tg_link = Some(needle.to_string());
        self
    }

    /// case-insensitive substring match on the name
    pub fn name(mut self, needle: &str) -> Self {
        self.name = Some(needle.to_string());
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.max(0);
        self.offset = offset.max(0);
        self
    }

    /// in-memory counterpart of the SQL filter, ignores paging
    pub fn matches(&self, channel: &Channel) -> bool {
        fn within<T: PartialOrd>(value: T, (min, max): (Option<T>, Option<T>)) -> bool {
            min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
        }
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map_or(true, |needle| haystack.to_lowercase().contains(&needle.to_lowercase()))
        }

        within(channel.sub_count, self.subscribers)
            && within(channel.avg_coverage, self.avg_coverage)
            && within(channel.er, self.er)
            && within(channel.cpm, self.cpm)
            && within(channel.post_price, self.post_price)
            && contains(&channel.tg_link, &self.tg_link)
            && contains(&channel.name, &self.name)
    }
}

/// persistence of directory channels
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel_by_telegram_id(&self, tg_id: i64) -> Result<Option<Channel>, StoreError>;

    async fn get_channel_by_id(&self, id: i32) -> Result<Option<Channel>, StoreError>;

    /// writes fetcher metrics (subscribers, coverage, ER, CPM, link, photo) keyed by tg_id
    async fn update_data_from_fetcher(&self, channel: &Channel) -> Result<(), StoreError>;

    /// returns false when no channel has this id
    async fn update_post_price(&self, id: i32, post_price: f64) -> Result<bool, StoreError>;

    /// matching page of channels plus the total number of matches
    async fn get_all(&self, filter: &ChannelFilter) -> Result<(Vec<Channel>, i64), StoreError>;

    /// channels selected for export, ordered by id
    async fn get_channels_by_ids(&self, ids: &[i32]) -> Result<Vec<Channel>, StoreError>;

    async fn delete(&self, id: i32) -> Result<bool, StoreError>;

    /// returns false when a channel with the same link or tg_id exists
    async fn insert(&self, channel: &Channel) -> Result<bool, StoreError>;
}

/// builds a TLS-enabled pool from a postgres url
pub fn create_pool(database_url: &str) -> Result<Pool, Box<dyn Error + Send + Sync>> {
    let mut config = Config::new();
    config.url = Some(database_url.to_string());

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = MakeRustlsConnect::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );

    let pool = config.create_pool(Some(Runtime::Tokio1), tls)?;
    Ok(pool)
}

const CHANNEL_COLUMNS: &str = "id, owner_id, name, tg_link, tg_id, category, sub_count, \
     avg_coverage, er, cpm, post_price, photo_path";

const FILTER_CLAUSE: &str = "($1::BIGINT IS NULL OR sub_count >= $1) \
     AND ($2::BIGINT IS NULL OR sub_count <= $2) \
     AND ($3::BIGINT IS NULL OR avg_coverage >= $3) \
     AND ($4::BIGINT IS NULL OR avg_coverage <= $4) \
     AND ($5::FLOAT8 IS NULL OR er >= $5) \
     AND ($6::FLOAT8 IS NULL OR er <= $6) \
     AND ($7::FLOAT8 IS NULL OR cpm >= $7) \
     AND ($8::FLOAT8 IS NULL OR cpm <= $8) \
     AND ($9::FLOAT8 IS NULL OR post_price >= $9) \
     AND ($10::FLOAT8 IS NULL OR post_price <= $10) \
     AND ($11::TEXT IS NULL OR tg_link ILIKE '%' || $11 || '%') \
     AND ($12::TEXT IS NULL OR name ILIKE '%' || $12 || '%')";

fn scan_channel(row: &Row) -> Channel {
    Channel {
        id: row.get(0),
        owner_id: row.get(1),
        name: row.get(2),
        tg_link: row.get(3),
        tg_id: row.get(4),
        category: row.get(5),
        sub_count: row.get(6),
        avg_coverage: row.get(7),
        er: row.get(8),
        cpm: row.get(9),
        post_price: row.get(10),
        photo_path: row.get(11),
    }
}

pub struct PgChannelStore {
    pool: Pool,
}

impl PgChannelStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelStore for PgChannelStore {
    async fn get_channel_by_telegram_id(&self, tg_id: i64) -> Result<Option<Channel>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM channels WHERE tg_id = $1", CHANNEL_COLUMNS),
                &[&tg_id],
            )
            .await?;
        Ok(row.as_ref().map(scan_channel))
    }

    async fn get_channel_by_id(&self, id: i32) -> Result<Option<Channel>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM channels WHERE id = $1", CHANNEL_COLUMNS),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(scan_channel))
    }

    async fn update_data_from_fetcher(&self, channel: &Channel) -> Result<(), StoreError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        // a failed statement drops the transaction, which rolls it back
        let updated = transaction
            .execute(
                "UPDATE channels SET sub_count = $1, avg_coverage = $2, er = $3, cpm = $4, \
                 tg_link = CASE WHEN $5::TEXT = '' THEN tg_link ELSE $5 END, \
                 photo_path = CASE WHEN $6::TEXT = '' THEN photo_path ELSE $6 END, \
                 updated_at = NOW() \
                 WHERE tg_id = $7",
                &[
                    &channel.sub_count,
                    &channel.avg_coverage,
                    &channel.er,
                    &channel.cpm,
                    &channel.tg_link,
                    &channel.photo_path,
                    &channel.tg_id,
                ],
            )
            .await?;

        if updated == 0 {
            transaction.rollback().await?;
            return Err(StoreError::ChannelNotFound(channel.tg_id));
        }

        transaction.commit().await?;
        info!(
            "Updated channel {} (subscribers: {}, coverage: {}, er: {}, cpm: {})",
            channel.tg_id, channel.sub_count, channel.avg_coverage, channel.er, channel.cpm
        );
        Ok(())
    }

    async fn update_post_price(&self, id: i32, post_price: f64) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        // cpm is derived from the price, refresh it against the current coverage
        let updated = client
            .execute(
                "UPDATE channels SET post_price = $1::DOUBLE PRECISION, \
                 cpm = CASE WHEN avg_coverage > 0 THEN $1::DOUBLE PRECISION / avg_coverage * 1000 ELSE 0 END, \
                 updated_at = NOW() \
                 WHERE id = $2",
                &[&post_price, &id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn get_all(&self, filter: &ChannelFilter) -> Result<(Vec<Channel>, i64), StoreError> {
        let client = self.pool.get().await?;
        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 12] = [
            &filter.subscribers.0,
            &filter.subscribers.1,
            &filter.avg_coverage.0,
            &filter.avg_coverage.1,
            &filter.er.0,
            &filter.er.1,
            &filter.cpm.0,
            &filter.cpm.1,
            &filter.post_price.0,
            &filter.post_price.1,
            &filter.tg_link,
            &filter.name,
        ];

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM channels WHERE {}", FILTER_CLAUSE),
                &params,
            )
            .await?
            .get(0);

        let mut page_params = params.to_vec();
        page_params.push(&filter.limit);
        page_params.push(&filter.offset);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM channels WHERE {} ORDER BY id LIMIT $13 OFFSET $14",
                    CHANNEL_COLUMNS, FILTER_CLAUSE
                ),
                &page_params,
            )
            .await?;

        Ok((rows.iter().map(scan_channel).collect(), total))
    }

    async fn get_channels_by_ids(&self, ids: &[i32]) -> Result<Vec<Channel>, StoreError> {
        let client = self.pool.get().await?;
        let ids = ids.to_vec();
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM channels WHERE id = ANY($1) ORDER BY id",
                    CHANNEL_COLUMNS
                ),
                &[&ids],
            )
            .await?;
        Ok(rows.iter().map(scan_channel).collect())
    }

    async fn delete(&self, id: i32) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM channels WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn insert(&self, channel: &Channel) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        // coverage, er and cpm are left to the fetcher, cpm is never taken from input
        let result = client
            .execute(
                "INSERT INTO channels (owner_id, name, tg_link, tg_id, category, sub_count, post_price, photo_path) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &channel.owner_id,
                    &channel.name,
                    &channel.tg_link,
                    &channel.tg_id,
                    &channel.category,
                    &channel.sub_count.max(0),
                    &channel.post_price.max(0.0),
                    &channel.photo_path,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                info!("Inserted channel {} ({})", channel.name, channel.tg_id);
                Ok(true)
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                warn!("Channel {} already exists: {}", channel.tg_link, e);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to insert channel {}: {}", channel.tg_link, e);
                Err(e.into())
            }
        }
    }
}
