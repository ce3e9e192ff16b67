use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tokio::time::Duration;
use zeroize::Zeroizing;

use crate::fetch::{
    RateLimitPlan,
    DEFAULT_BASE_URL,
    DEFAULT_BATCH_SIZE,
    DEFAULT_CACHE_CAPACITY,
    DEFAULT_HELIUS_RPC_URL,
    MAX_CONCURRENT_BATCHES,
};
use crate::task::DEFAULT_TASK_HISTORY;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVariable(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        reason: String,
    },
}

/// Where transaction history is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamProvider {
    Birdeye,
    Helius,
}

impl FromStr for UpstreamProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "birdeye" => Ok(UpstreamProvider::Birdeye),
            "helius" => Ok(UpstreamProvider::Helius),
            other => Err(format!("unknown upstream provider '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct AnalyzerConfig {
    pub provider: UpstreamProvider,
    pub birdeye_api_key: Option<Zeroizing<String>>, // also serves token metadata
    pub base_url: String,
    pub helius_api_key: Option<Zeroizing<String>>,
    pub helius_rpc_url: String,
    pub rate_limit_plan: RateLimitPlan,
    pub max_calls: usize,           // calls admitted per rate limit period
    pub rate_limit_period: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub default_batch_size: usize,
    pub max_concurrent_batches: usize,
    pub task_history_capacity: usize,
}

impl fmt::Debug for AnalyzerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<Zeroizing<String>>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("AnalyzerConfig")
            .field("provider", &self.provider)
            .field("birdeye_api_key", &redact(&self.birdeye_api_key))
            .field("base_url", &self.base_url)
            .field("helius_api_key", &redact(&self.helius_api_key))
            .field("helius_rpc_url", &self.helius_rpc_url)
            .field("rate_limit_plan", &self.rate_limit_plan)
            .field("max_calls", &self.max_calls)
            .field("rate_limit_period", &self.rate_limit_period)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .field("default_batch_size", &self.default_batch_size)
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("task_history_capacity", &self.task_history_capacity)
            .finish()
    }
}

impl AnalyzerConfig {
    /// Birdeye-backed config with defaults everywhere else.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            birdeye_api_key: Some(Zeroizing::new(api_key.into())),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        let plan = RateLimitPlan::Free;
        Self {
            provider: UpstreamProvider::Birdeye,
            birdeye_api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            helius_api_key: None,
            helius_rpc_url: DEFAULT_HELIUS_RPC_URL.to_string(),
            rate_limit_plan: plan,
            max_calls: plan.calls_per_second(),
            rate_limit_period: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: MAX_CONCURRENT_BATCHES,
            task_history_capacity: DEFAULT_TASK_HISTORY,
        }
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; unset variables fall
    /// back to defaults except the selected provider's API key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::defaults();
        if let Some(provider) = lookup("UPSTREAM_PROVIDER") {
            config.provider = provider
                .parse()
                .map_err(|reason| ConfigError::InvalidValue { name: "UPSTREAM_PROVIDER", reason })?;
        }

        let secret = |name: &str| {
            lookup(name)
                .filter(|key| !key.trim().is_empty())
                .map(Zeroizing::new)
        };
        config.birdeye_api_key = secret("BIRDEYE_API_KEY");
        config.helius_api_key = secret("HELIUS_API_KEY");
        match config.provider {
            UpstreamProvider::Birdeye if config.birdeye_api_key.is_none() => {
                return Err(ConfigError::MissingVariable("BIRDEYE_API_KEY"));
            }
            UpstreamProvider::Helius if config.helius_api_key.is_none() => {
                return Err(ConfigError::MissingVariable("HELIUS_API_KEY"));
            }
            _ => {}
        }

        if let Some(base_url) = lookup("BIRDEYE_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(rpc_url) = lookup("HELIUS_RPC_URL") {
            config.helius_rpc_url = rpc_url;
        }
        if let Some(plan) = lookup("RATE_LIMIT_PLAN") {
            config.rate_limit_plan = plan
                .parse()
                .map_err(|reason| ConfigError::InvalidValue { name: "RATE_LIMIT_PLAN", reason })?;
            config.max_calls = config.rate_limit_plan.calls_per_second();
        }
        if let Some(max_calls) = parse_var::<usize>(&lookup, "RATE_LIMIT_MAX_CALLS")? {
            config.max_calls = positive("RATE_LIMIT_MAX_CALLS", max_calls)?;
        }
        if let Some(period) = parse_var::<u64>(&lookup, "RATE_LIMIT_PERIOD_MS")? {
            config.rate_limit_period = Duration::from_millis(positive("RATE_LIMIT_PERIOD_MS", period)?);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(positive("REQUEST_TIMEOUT_SECS", secs)?);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "CACHE_CAPACITY")? {
            config.cache_capacity = positive("CACHE_CAPACITY", capacity)?;
        }
        if let Some(batch_size) = parse_var::<usize>(&lookup, "DEFAULT_BATCH_SIZE")? {
            config.default_batch_size = positive("DEFAULT_BATCH_SIZE", batch_size)?;
        }
        if let Some(batches) = parse_var::<usize>(&lookup, "MAX_CONCURRENT_BATCHES")? {
            if batches > MAX_CONCURRENT_BATCHES {
                return Err(ConfigError::InvalidValue {
                    name: "MAX_CONCURRENT_BATCHES",
                    reason: format!("must be at most {}", MAX_CONCURRENT_BATCHES),
                });
            }
            config.max_concurrent_batches = positive("MAX_CONCURRENT_BATCHES", batches)?;
        }
        if let Some(history) = parse_var::<usize>(&lookup, "TASK_HISTORY_CAPACITY")? {
            config.task_history_capacity = positive("TASK_HISTORY_CAPACITY", history)?;
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name,
                reason: format!("'{}': {}", raw, e),
            })
        })
        .transpose()
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        Err(ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".to_string(),
        })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "secret")])).unwrap();
        assert_eq!(config.provider, UpstreamProvider::Birdeye);
        assert_eq!(config.birdeye_api_key.as_ref().map(|k| k.as_str()), Some("secret"));
        assert!(config.helius_api_key.is_none());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.helius_rpc_url, DEFAULT_HELIUS_RPC_URL);
        assert_eq!(config.rate_limit_plan, RateLimitPlan::Free);
        assert_eq!(config.max_calls, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.default_batch_size, 100);
        assert_eq!(config.max_concurrent_batches, 5);
        assert_eq!(config.task_history_capacity, DEFAULT_TASK_HISTORY);
    }

    #[test]
    fn test_helius_provider_requires_its_own_key() {
        let missing = AnalyzerConfig::from_lookup(lookup(&[("UPSTREAM_PROVIDER", "helius"), ("BIRDEYE_API_KEY", "b")]));
        assert_eq!(missing.unwrap_err(), ConfigError::MissingVariable("HELIUS_API_KEY"));

        let config = AnalyzerConfig::from_lookup(lookup(&[
            ("UPSTREAM_PROVIDER", "Helius"),
            ("HELIUS_API_KEY", "h"),
            ("HELIUS_RPC_URL", "http://localhost:8899"),
        ]))
        .unwrap();
        assert_eq!(config.provider, UpstreamProvider::Helius);
        assert_eq!(config.helius_api_key.as_ref().map(|k| k.as_str()), Some("h"));
        assert_eq!(config.helius_rpc_url, "http://localhost:8899");
        assert!(config.birdeye_api_key.is_none());

        let unknown = AnalyzerConfig::from_lookup(lookup(&[("UPSTREAM_PROVIDER", "solscan")]));
        assert!(matches!(unknown, Err(ConfigError::InvalidValue { name: "UPSTREAM_PROVIDER", .. })));
    }

    #[test]
    fn test_concurrent_batches_are_bounded() {
        let too_many = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("MAX_CONCURRENT_BATCHES", "6")]));
        assert!(matches!(too_many, Err(ConfigError::InvalidValue { name: "MAX_CONCURRENT_BATCHES", .. })));

        let zero = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("MAX_CONCURRENT_BATCHES", "0")]));
        assert!(matches!(zero, Err(ConfigError::InvalidValue { name: "MAX_CONCURRENT_BATCHES", .. })));

        let max = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("MAX_CONCURRENT_BATCHES", "5")]));
        assert_eq!(max.unwrap().max_concurrent_batches, 5);
    }

    #[test]
    fn test_missing_api_key() {
        assert_eq!(
            AnalyzerConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingVariable("BIRDEYE_API_KEY")
        );
        assert!(AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_plan_and_overrides() {
        let config = AnalyzerConfig::from_lookup(lookup(&[
            ("BIRDEYE_API_KEY", "k"),
            ("RATE_LIMIT_PLAN", "business"),
            ("RATE_LIMIT_PERIOD_MS", "2000"),
            ("CACHE_TTL_SECS", "30"),
            ("MAX_CONCURRENT_BATCHES", "3"),
            ("TASK_HISTORY_CAPACITY", "16"),
        ]))
        .unwrap();
        assert_eq!(config.max_calls, 20);
        assert_eq!(config.rate_limit_period, Duration::from_secs(2));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_batches, 3);
        assert_eq!(config.task_history_capacity, 16);

        let overridden = AnalyzerConfig::from_lookup(lookup(&[
            ("BIRDEYE_API_KEY", "k"),
            ("RATE_LIMIT_PLAN", "business"),
            ("RATE_LIMIT_MAX_CALLS", "7"),
        ]))
        .unwrap();
        assert_eq!(overridden.max_calls, 7);
    }

    #[test]
    fn test_invalid_values() {
        let bad_number = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("CACHE_TTL_SECS", "soon")]));
        assert!(matches!(bad_number, Err(ConfigError::InvalidValue { name: "CACHE_TTL_SECS", .. })));

        let zero = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("DEFAULT_BATCH_SIZE", "0")]));
        assert!(matches!(zero, Err(ConfigError::InvalidValue { name: "DEFAULT_BATCH_SIZE", .. })));

        let plan = AnalyzerConfig::from_lookup(lookup(&[("BIRDEYE_API_KEY", "k"), ("RATE_LIMIT_PLAN", "gold")]));
        assert!(matches!(plan, Err(ConfigError::InvalidValue { name: "RATE_LIMIT_PLAN", .. })));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = AnalyzerConfig::new("super-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
