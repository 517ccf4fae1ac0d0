use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// spaces out telegram api calls of one kind
#[derive(Clone)]
pub struct TelegramRateLimiter {
    min_interval: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl TelegramRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// waits until `min_interval` has passed since the previous call, then records this one
    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;

        if let Some(last_time) = *last_call {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting telegram call: waiting {}ms", wait_time.as_millis());
                sleep(wait_time).await;
            }
        }

        *last_call = Some(Instant::now());
    }
}
