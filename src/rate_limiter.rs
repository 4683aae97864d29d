use std::time::Duration;
use tracing::info;

use crate::error::{DialogueError, Result};

/// Fixed post-call delay derived from a requests-per-minute ceiling.
///
/// Calls are issued strictly one after another, so a plain sleep after each
/// call keeps the stream under the ceiling. Not adaptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    delay: Duration,
}

impl RateLimiter {
    /// Create a limiter for `requests_per_minute` (must be > 0)
    pub fn from_rpm(requests_per_minute: u32) -> Result<Self> {
        if requests_per_minute == 0 {
            return Err(DialogueError::ConfigError(
                "requests_per_minute must be greater than 0".into(),
            ));
        }
        Ok(Self {
            delay: Duration::from_secs_f64(60.0 / f64::from(requests_per_minute)),
        })
    }

    /// Create a limiter with an explicit delay
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// The delay applied after every call
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Suspend for the configured delay
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        info!(
            "Waiting for {:.1} seconds to respect API limits...",
            self.delay.as_secs_f64()
        );
        tokio::time::sleep(self.delay).await;
    }
}
