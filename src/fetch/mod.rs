mod batch;
mod cache;
mod client;
mod error;
mod helius;
mod rate_limit;
mod retry;
mod types;

pub use batch::BatchFetcher;
pub use cache::{CacheEntry, TransactionCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use client::{HttpTransactionSource, TokenInfoSource, TransactionSource, DEFAULT_BASE_URL};
pub use error::{FetchError, UpstreamError, UpstreamErrorType};
pub use helius::{HeliusTransactionSource, DEFAULT_HELIUS_RPC_URL};
pub use rate_limit::{RateLimitPermit, RateLimitPlan, RateLimiter};
pub use retry::{RetryConfig, RetryHandler};
pub use types::{
    FetchFingerprint,
    FetchRequest,
    PageRequest,
    TokenInfo,
    DEFAULT_BATCH_SIZE,
    DEFAULT_WINDOW_HOURS,
    MAX_CONCURRENT_BATCHES,
    MAX_PAGE_SIZE,
};
