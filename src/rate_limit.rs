//! Minimum spacing between requests forwarded to the backend.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{GatewayError, Result};

#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    wait: bool,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `interval` of `None` disables limiting. With `wait` set, an early request
    /// sleeps until the interval has passed instead of failing.
    pub fn new(interval: Option<Duration>, wait: bool) -> Self {
        Self {
            interval: interval.filter(|d| !d.is_zero()),
            wait,
            last_request: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    /// # Errors
    /// Returns `GatewayError::RateLimited` when called inside the interval and
    /// waiting is off.
    pub async fn check(&self) -> Result<()> {
        let Some(interval) = self.interval else {
            return Ok(());
        };

        // Held across the sleep so waiting requests are released one per interval.
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let remaining = interval - elapsed;
                if !self.wait {
                    tracing::warn!(retry_after_ms = remaining.as_millis() as u64, "Rate limit exceeded");
                    return Err(GatewayError::RateLimited {
                        retry_after: remaining,
                    });
                }
                tracing::info!(wait_ms = remaining.as_millis() as u64, "Rate limit reached, waiting");
                tokio::time::sleep(remaining).await;
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }
}
