use thiserror::Error;
use tokio::sync::AcquireError;

/// Failure of a single upstream page request. Recovered at the page level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by upstream (HTTP 429)")]
    RateLimited,

    #[error("Upstream returned HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
    },

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("Upstream rejected the request: {0}")]
    Rejected(String),

    #[error("Rate limiter closed")]
    LimiterClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorType {
    Network,
    Timeout,
    RateLimited,
    Http,
    Decode,
    Rejected,
    LimiterClosed,
}

impl UpstreamError {
    pub fn error_type(&self) -> UpstreamErrorType {
        match self {
            UpstreamError::Network(_) => UpstreamErrorType::Network,
            UpstreamError::Timeout => UpstreamErrorType::Timeout,
            UpstreamError::RateLimited => UpstreamErrorType::RateLimited,
            UpstreamError::Http { .. } => UpstreamErrorType::Http,
            UpstreamError::Decode(_) => UpstreamErrorType::Decode,
            UpstreamError::Rejected(_) => UpstreamErrorType::Rejected,
            UpstreamError::LimiterClosed => UpstreamErrorType::LimiterClosed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.error_type(), UpstreamErrorType::RateLimited)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout
        } else if error.is_decode() {
            UpstreamError::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            UpstreamError::Http {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            UpstreamError::Network(error.to_string())
        }
    }
}

impl From<AcquireError> for UpstreamError {
    fn from(_: AcquireError) -> Self {
        UpstreamError::LimiterClosed
    }
}

/// Errors surfaced to the caller of a whole fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),

    #[error("Upstream unavailable: all {pages} page requests failed, last error: {last}")]
    UpstreamUnavailable {
        pages: usize,
        last: UpstreamError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limits_are_retryable() {
        assert!(UpstreamError::RateLimited.is_retryable());
        assert!(!UpstreamError::Timeout.is_retryable());
        assert!(!UpstreamError::Http { status: 500, body: String::new() }.is_retryable());
        assert!(!UpstreamError::Decode("bad".into()).is_retryable());
    }
}
