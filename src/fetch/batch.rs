use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;

use super::cache::TransactionCache;
use super::client::{TokenInfoSource, TransactionSource};
use super::error::{FetchError, UpstreamError};
use super::rate_limit::RateLimiter;
use super::retry::RetryHandler;
use super::types::{
    plan_batches,
    BatchPlan,
    FetchFingerprint,
    FetchRequest,
    PageRequest,
    TokenInfo,
    DEFAULT_BATCH_SIZE,
    MAX_CONCURRENT_BATCHES,
    MAX_PAGE_SIZE,
};
use crate::normalize::{EventNormalizer, SwapEvent};

#[derive(Debug, Default)]
struct BatchOutcome {
    events: Vec<SwapEvent>,
    pages: usize,
    failed_pages: usize,
    last_error: Option<UpstreamError>,
}

/// Fetches swap history for a token in concurrent, rate-limited batches.
pub struct BatchFetcher {
    source: Arc<dyn TransactionSource>,
    token_info: Option<Arc<dyn TokenInfoSource>>,
    limiter: Arc<RateLimiter>,
    cache: Arc<TransactionCache>,
    retry_handler: RetryHandler,
    default_batch_size: usize,
    max_concurrent_batches: usize,
}

impl BatchFetcher {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        limiter: Arc<RateLimiter>,
        cache: Arc<TransactionCache>,
    ) -> Self {
        Self {
            source,
            token_info: None,
            limiter,
            cache,
            retry_handler: RetryHandler::default(),
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: MAX_CONCURRENT_BATCHES,
        }
    }

    pub fn with_retry_handler(mut self, retry_handler: RetryHandler) -> Self {
        self.retry_handler = retry_handler;
        self
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    /// Clamped to `1..=MAX_CONCURRENT_BATCHES`.
    pub fn with_max_concurrent_batches(mut self, max_concurrent_batches: usize) -> Self {
        self.max_concurrent_batches = max_concurrent_batches.clamp(1, MAX_CONCURRENT_BATCHES);
        self
    }

    /// Token metadata lets description records that name the token by
    /// symbol be matched.
    pub fn with_token_info(mut self, token_info: Arc<dyn TokenInfoSource>) -> Self {
        self.token_info = Some(token_info);
        self
    }

    pub fn cache(&self) -> &Arc<TransactionCache> {
        &self.cache
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("transaction cache cleared");
    }

    /// Looks the token up through the rate limiter. `Ok(None)` when no
    /// metadata source is configured.
    pub async fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, UpstreamError> {
        let Some(source) = &self.token_info else {
            return Ok(None);
        };
        self.retry_handler
            .retry(|| self.token_info_once(source.as_ref(), token))
            .await
    }

    async fn token_info_once(&self, source: &dyn TokenInfoSource, token: &str) -> Result<Option<TokenInfo>, UpstreamError> {
        let permit = self.limiter.acquire().await?;
        let result = source.token_info(token).await;
        permit.release();
        result
    }

    /// Returns up to `limit` unique events, newest pages first as served by
    /// upstream. Failed pages are skipped; the fetch only errors when every
    /// page failed.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Arc<[SwapEvent]>, FetchError> {
        let batch_size = request.batch_size.unwrap_or(self.default_batch_size);
        if batch_size == 0 {
            return Err(FetchError::InvalidRequest("batch size must be greater than zero".into()));
        }
        Pubkey::from_str(&request.token)
            .map_err(|e| FetchError::InvalidRequest(format!("invalid token address '{}': {}", request.token, e)))?;
        if !request.time_range.is_valid() {
            return Err(FetchError::InvalidRequest("time range start is after its end".into()));
        }

        let key = FetchFingerprint::new(&request.token, &request.time_range, request.limit, batch_size);
        if let Some(events) = self.cache.get(&key).await {
            debug!("cache hit for {}", key);
            return Ok(events);
        }

        if request.limit == 0 {
            return Ok(Arc::from(Vec::new()));
        }

        let plans = plan_batches(request.limit, batch_size);
        let in_flight = plans.len().min(self.max_concurrent_batches);
        info!(
            "fetching {} transactions for {} in {} batches ({} concurrent)",
            request.limit,
            request.token,
            plans.len(),
            in_flight
        );

        let normalizer = self.normalizer_for(&request.token).await;
        let outcomes: Vec<BatchOutcome> = stream::iter(plans)
            .map(|plan| self.fetch_batch(request, plan, &normalizer))
            .buffered(in_flight)
            .collect()
            .await;

        let pages: usize = outcomes.iter().map(|o| o.pages).sum();
        let failed_pages: usize = outcomes.iter().map(|o| o.failed_pages).sum();
        if failed_pages > 0 && failed_pages == pages {
            let last = outcomes
                .into_iter()
                .rev()
                .find_map(|o| o.last_error)
                .unwrap_or(UpstreamError::Network("no page succeeded".into()));
            return Err(FetchError::UpstreamUnavailable { pages, last });
        }
        if failed_pages > 0 {
            warn!(
                "{} of {} pages failed for {}; returning partial results",
                failed_pages, pages, request.token
            );
        }

        let mut seen = HashSet::new();
        let mut events: Vec<SwapEvent> = outcomes
            .into_iter()
            .flat_map(|o| o.events)
            .filter(|event| seen.insert(event.signature.clone()))
            .collect();
        events.truncate(request.limit);

        info!("fetched {} unique swap events for {}", events.len(), request.token);
        Ok(self.cache.insert(key, events).await)
    }

    async fn normalizer_for(&self, token: &str) -> EventNormalizer {
        let normalizer = EventNormalizer::new(token);
        match self.token_info(token).await {
            Ok(Some(TokenInfo { symbol: Some(symbol), .. })) => {
                debug!("matching descriptions of {} by symbol {}", token, symbol);
                normalizer.with_symbol(symbol)
            }
            Ok(_) => normalizer,
            Err(e) => {
                warn!("token info for {} unavailable: {}", token, e);
                normalizer
            }
        }
    }

    async fn fetch_batch(&self, request: &FetchRequest, plan: BatchPlan, normalizer: &EventNormalizer) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut offset = plan.offset;
        let mut remaining = plan.size;

        while remaining > 0 {
            let page = PageRequest {
                token: request.token.clone(),
                offset,
                limit: remaining.min(MAX_PAGE_SIZE),
                time_range: request.time_range,
            };
            outcome.pages += 1;

            match self.fetch_page(&page).await {
                Ok(records) => {
                    let received = records.len();
                    self.normalize_page(&records, request, normalizer, &mut outcome.events);
                    if received < page.limit {
                        debug!("batch {} ended early at offset {}", plan.index, offset);
                        break;
                    }
                }
                Err(error) => {
                    warn!(
                        "batch {} page at offset {} failed: {}",
                        plan.index, page.offset, error
                    );
                    outcome.failed_pages += 1;
                    outcome.last_error = Some(error);
                }
            }

            offset += page.limit;
            remaining -= page.limit;
        }

        outcome
    }

    fn normalize_page(
        &self,
        records: &[Value],
        request: &FetchRequest,
        normalizer: &EventNormalizer,
        events: &mut Vec<SwapEvent>,
    ) {
        for record in records {
            match normalizer.normalize(record) {
                Ok(Some(event)) if request.time_range.contains(event.timestamp) => events.push(event),
                Ok(_) => {}
                Err(error) => debug!("skipping malformed record: {}", error),
            }
        }
    }

    async fn fetch_page(&self, page: &PageRequest) -> Result<Vec<Value>, UpstreamError> {
        self.retry_handler.retry(|| self.fetch_page_once(page)).await
    }

    async fn fetch_page_once(&self, page: &PageRequest) -> Result<Vec<Value>, UpstreamError> {
        let permit = self.limiter.acquire().await?;
        let result = self.source.fetch_page(page).await;
        permit.release();
        result
    }
}
