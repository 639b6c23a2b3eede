//! Ticker that never sleeps.

use async_trait::async_trait;
use fleet_dashboard::Ticker;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Records every requested wait and returns immediately.
#[derive(Debug, Default)]
pub struct ManualTicker {
    ticks: Mutex<Vec<Duration>>,
}

impl ManualTicker {
    /// Creates a ticker with no recorded waits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits requested so far, in order.
    pub fn ticks(&self) -> Vec<Duration> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of waits requested with exactly `interval`.
    pub fn count(&self, interval: Duration) -> usize {
        self.ticks().iter().filter(|d| **d == interval).count()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&self, interval: Duration) {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interval);
        tokio::task::yield_now().await;
    }
}
