use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::TimeRange;

/// Upstream caps a single page at this many records.
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_CONCURRENT_BATCHES: usize = 5;
/// Window applied by [`FetchRequest::with_default_window`].
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub token: String,
    pub limit: usize,
    pub time_range: TimeRange,
    pub batch_size: Option<usize>,
}

impl FetchRequest {
    pub fn new(token: impl Into<String>, limit: usize) -> Self {
        Self {
            token: token.into(),
            limit,
            time_range: TimeRange::unbounded(),
            batch_size: None,
        }
    }

    pub fn with_time_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.time_range = TimeRange::new(start, end);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Fills missing bounds: the end defaults to `now` and the start to
    /// [`DEFAULT_WINDOW_HOURS`] before the end. Set bounds are kept.
    pub fn with_default_window(mut self, now: DateTime<Utc>) -> Self {
        let end = self.time_range.end.unwrap_or(now);
        let start = self
            .time_range
            .start
            .unwrap_or(end - Duration::hours(DEFAULT_WINDOW_HOURS));
        self.time_range = TimeRange::new(Some(start), Some(end));
        self
    }
}

/// Market overview of a token as reported by upstream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price: Option<f64>,
    #[serde(alias = "volume24h")]
    pub volume_24h: Option<f64>,
    #[serde(alias = "marketCap")]
    pub market_cap: Option<f64>,
}

/// Cache key for a fetch. Equal inputs give equal keys; any differing
/// input gives a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchFingerprint {
    token: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: usize,
    batch_size: usize,
}

impl FetchFingerprint {
    pub fn new(token: &str, time_range: &TimeRange, limit: usize, batch_size: usize) -> Self {
        Self {
            token: token.to_string(),
            start: time_range.start,
            end: time_range.end,
            limit,
            batch_size,
        }
    }
}

impl fmt::Display for FetchFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |value: &Option<DateTime<Utc>>| value.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.token,
            bound(&self.start),
            bound(&self.end),
            self.limit,
            self.batch_size
        )
    }
}

/// A single upstream page request, at most [`MAX_PAGE_SIZE`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub token: String,
    pub offset: usize,
    pub limit: usize,
    pub time_range: TimeRange,
}

/// One batch of a fetch: a contiguous offset range walked page by page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
}

/// Splits `limit` into `ceil(limit / batch_size)` contiguous batches.
pub(crate) fn plan_batches(limit: usize, batch_size: usize) -> Vec<BatchPlan> {
    (0..limit.div_ceil(batch_size))
        .map(|index| {
            let offset = index * batch_size;
            BatchPlan {
                index,
                offset,
                size: batch_size.min(limit - offset),
            }
        })
        .collect()
}
