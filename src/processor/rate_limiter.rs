//! Sliding-window limiter shared by every fetch worker.
//!
//! The limiter remembers the instant of each grant made in the last window and
//! admits a new caller only while fewer than `limit` grants fall inside it, so
//! no window of that length ever sees more than `limit` provider calls.

use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Result<Self> {
        if limit == 0 {
            bail!("rate limit must be greater than zero");
        }
        if window.is_zero() {
            bail!("rate window must be greater than zero");
        }

        Ok(Self {
            limit,
            window,
            grants: Mutex::new(VecDeque::with_capacity(limit)),
        })
    }

    /// Waits until a grant is available and takes it, returning how long the
    /// caller was held back.
    ///
    /// Never rejects. Waiters queue on a fair mutex, so grants follow arrival
    /// order. Dropping the future before it resolves records nothing.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        let mut grants = self.grants.lock().await;

        loop {
            let now = Instant::now();
            while grants
                .front()
                .is_some_and(|granted| now.duration_since(*granted) >= self.window)
            {
                grants.pop_front();
            }

            if grants.len() < self.limit {
                grants.push_back(now);
                return now.duration_since(started);
            }

            if let Some(oldest) = grants.front().copied() {
                sleep_until(oldest + self.window).await;
            }
        }
    }

    /// Grants made inside the current window.
    pub async fn in_window(&self) -> usize {
        let now = Instant::now();
        self.grants
            .lock()
            .await
            .iter()
            .filter(|granted| now.duration_since(**granted) < self.window)
            .count()
    }
}
