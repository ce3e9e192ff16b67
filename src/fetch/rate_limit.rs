use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration, Instant};

use super::error::UpstreamError;

/// Published upstream API tiers, in calls per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPlan {
    Free,
    Developer,
    Business,
    Professional,
}

impl RateLimitPlan {
    pub fn calls_per_second(&self) -> usize {
        match self {
            RateLimitPlan::Free => 2,
            RateLimitPlan::Developer => 10,
            RateLimitPlan::Business => 20,
            RateLimitPlan::Professional => 50,
        }
    }
}

impl FromStr for RateLimitPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(RateLimitPlan::Free),
            "developer" => Ok(RateLimitPlan::Developer),
            "business" => Ok(RateLimitPlan::Business),
            "professional" => Ok(RateLimitPlan::Professional),
            other => Err(format!("unknown rate limit plan '{}'", other)),
        }
    }
}

/// Admits at most `max_calls` acquisitions in any window of `period`, and
/// at most `max_calls` permits outstanding at once.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    slots: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
}

/// Held for the duration of one upstream call. Dropping it releases the slot.
#[derive(Debug)]
pub struct RateLimitPermit {
    _slot: OwnedSemaphorePermit,
}

impl RateLimitPermit {
    pub fn release(self) {}
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            period,
            slots: Arc::new(Semaphore::new(max_calls)),
            window: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn for_plan(plan: RateLimitPlan) -> Self {
        Self::new(plan.calls_per_second(), Duration::from_secs(1))
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Concurrency slots not currently held by a permit.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn acquire(&self) -> Result<RateLimitPermit, UpstreamError> {
        let slot = self.slots.clone().acquire_owned().await?;

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = window.front() {
                    if now.duration_since(oldest) >= self.period {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < self.max_calls {
                    window.push_back(now);
                    return Ok(RateLimitPermit { _slot: slot });
                }

                let oldest = window.front().copied().unwrap_or(now);
                self.period.saturating_sub(now.duration_since(oldest))
            };

            debug!("rate limit window full, waiting {:?}", wait);
            sleep(wait).await;
        }
    }
}
