use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// which channel dialogs the fetcher refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    All,
    PublicOnly,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_dir: PathBuf,
    pub request_timeout: Duration,
    pub history_min_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub window_days: i64,
    pub interval: Duration,
    pub scope: ChannelScope,
    pub page_size: usize,
    pub max_pages: usize,
    pub photo_dir: PathBuf,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            interval: Duration::from_secs(30 * 60),
            scope: ChannelScope::All,
            page_size: 100,
            max_pages: 50,
            photo_dir: PathBuf::from("channel_img"),
        }
    }
}

/// process-wide settings, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub database_url: String,
    pub fetcher: FetcherConfig,
}

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        match e {
            // a missing .env file is fine
            dotenvy::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            _ => eprintln!("warning: failed to load .env file: {}", e),
        }
    }
}

impl TelegramConfig {
    /// telegram settings alone, for tools that never touch the database
    pub fn from_env() -> ConfigResult<Self> {
        load_dotenv();
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_id = lookup("TG_API_ID")
            .ok_or("TG_API_ID environment variable is required")?
            .parse::<i32>()
            .map_err(|_| "TG_API_ID must be a valid integer")?;
        let api_hash =
            lookup("TG_API_HASH").ok_or("TG_API_HASH environment variable is required")?;

        Ok(Self {
            api_id,
            api_hash,
            session_dir: PathBuf::from(lookup("SESSION_DIR").unwrap_or_else(|| "sessions".into())),
            request_timeout: Duration::from_secs(parse_or(lookup, "REQUEST_TIMEOUT_SECS", 30)?),
            history_min_interval: Duration::from_millis(parse_or(
                lookup,
                "HISTORY_MIN_INTERVAL_MS",
                500,
            )?),
        })
    }
}

impl AppConfig {
    /// loads `.env` if present and reads the process environment
    pub fn from_env() -> ConfigResult<Self> {
        load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").ok_or("DATABASE_URL environment variable is required")?;

        let telegram = TelegramConfig::from_lookup(&lookup)?;

        let defaults = FetcherConfig::default();
        let window_days: i64 = parse_or(&lookup, "FETCH_WINDOW_DAYS", defaults.window_days)?;
        if window_days <= 0 {
            return Err("FETCH_WINDOW_DAYS must be positive".into());
        }
        let page_size: usize = parse_or(&lookup, "HISTORY_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 || page_size > 100 {
            return Err("HISTORY_PAGE_SIZE must be between 1 and 100".into());
        }
        let scope = if parse_or(&lookup, "FETCH_PUBLIC_ONLY", false)? {
            ChannelScope::PublicOnly
        } else {
            ChannelScope::All
        };

        let fetcher = FetcherConfig {
            window_days,
            interval: Duration::from_secs(parse_or(
                &lookup,
                "FETCH_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            scope,
            page_size,
            max_pages: parse_or(&lookup, "MAX_HISTORY_PAGES", defaults.max_pages)?,
            photo_dir: lookup("PHOTO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.photo_dir),
        };

        Ok(Self {
            telegram,
            database_url,
            fetcher,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} has an invalid value: {}", key, raw).into()),
        _ => Ok(default),
    }
}
