use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use thiserror::Error;

use crate::classify::{AnalysisResult, WalletClassifier};
use crate::config::{AnalyzerConfig, ConfigError, UpstreamProvider};
use crate::fetch::{
    BatchFetcher,
    FetchError,
    FetchRequest,
    HeliusTransactionSource,
    HttpTransactionSource,
    RateLimiter,
    RetryConfig,
    RetryHandler,
    TokenInfo,
    TokenInfoSource,
    TransactionCache,
    TransactionSource,
    UpstreamError,
};
use crate::task::{Checkpoint, TaskError, TaskId, TaskManager, TaskReporter, TaskSnapshot};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Export failed: {0}")]
pub struct ExportError(pub String);

/// Receives each completed result before its task is finalized.
#[async_trait]
pub trait ResultExporter: Send + Sync {
    async fn export(&self, result: &AnalysisResult) -> Result<(), ExportError>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Classification worker failed: {0}")]
    Classify(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Caller-facing entry point: fetch, classify, and background tasks.
#[derive(Clone)]
pub struct Analyzer {
    fetcher: Arc<BatchFetcher>,
    classifier: WalletClassifier,
    tasks: Arc<TaskManager>,
    exporter: Option<Arc<dyn ResultExporter>>,
}

impl Analyzer {
    pub fn new(fetcher: BatchFetcher) -> Self {
        Self::assemble(fetcher, TaskManager::new())
    }

    fn assemble(fetcher: BatchFetcher, tasks: TaskManager) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            classifier: WalletClassifier::new(),
            tasks: Arc::new(tasks),
            exporter: None,
        }
    }

    /// Reads history from the configured provider. A Birdeye key, when
    /// present, also serves token metadata.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, PipelineError> {
        let birdeye = match &config.birdeye_api_key {
            Some(api_key) => Some(Arc::new(HttpTransactionSource::new(
                config.base_url.clone(),
                api_key.clone(),
                config.request_timeout,
            )?)),
            None => None,
        };

        let source: Arc<dyn TransactionSource> = match config.provider {
            UpstreamProvider::Birdeye => match &birdeye {
                Some(birdeye) => birdeye.clone() as Arc<dyn TransactionSource>,
                None => return Err(ConfigError::MissingVariable("BIRDEYE_API_KEY").into()),
            },
            UpstreamProvider::Helius => {
                let api_key = config
                    .helius_api_key
                    .clone()
                    .ok_or(ConfigError::MissingVariable("HELIUS_API_KEY"))?;
                let detail_limiter = Arc::new(RateLimiter::new(config.max_calls, config.rate_limit_period));
                Arc::new(
                    HeliusTransactionSource::new(config.helius_rpc_url.clone(), api_key, config.request_timeout)?
                        .with_detail_limiter(detail_limiter),
                )
            }
        };

        let token_info = birdeye.map(|birdeye| birdeye as Arc<dyn TokenInfoSource>);
        Ok(Self::with_sources(source, token_info, config))
    }

    /// Wires every component from `config` around an arbitrary upstream.
    pub fn with_source(source: Arc<dyn TransactionSource>, config: &AnalyzerConfig) -> Self {
        Self::with_sources(source, None, config)
    }

    pub fn with_sources(
        source: Arc<dyn TransactionSource>,
        token_info: Option<Arc<dyn TokenInfoSource>>,
        config: &AnalyzerConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.max_calls, config.rate_limit_period));
        let cache = Arc::new(TransactionCache::new(config.cache_capacity, config.cache_ttl));
        let retry_handler = RetryHandler::new(RetryConfig {
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
            ..RetryConfig::default()
        });

        let mut fetcher = BatchFetcher::new(source, limiter, cache)
            .with_retry_handler(retry_handler)
            .with_default_batch_size(config.default_batch_size)
            .with_max_concurrent_batches(config.max_concurrent_batches);
        if let Some(token_info) = token_info {
            fetcher = fetcher.with_token_info(token_info);
        }
        Self::assemble(fetcher, TaskManager::with_history_capacity(config.task_history_capacity))
    }

    pub fn with_classifier(mut self, classifier: WalletClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn ResultExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub async fn fetch_and_classify(&self, request: &FetchRequest) -> Result<AnalysisResult, PipelineError> {
        self.run(request, None).await
    }

    /// Starts the pipeline in the background and returns its task id.
    pub async fn submit_task(&self, request: FetchRequest) -> TaskId {
        let analyzer = self.clone();
        self.tasks
            .submit(move |reporter| async move {
                let result = analyzer.run(&request, Some(&reporter)).await?;
                if let Some(exporter) = &analyzer.exporter {
                    exporter.export(&result).await?;
                }
                reporter.checkpoint(Checkpoint::ExportDone).await?;
                Ok::<_, PipelineError>(result)
            })
            .await
    }

    pub async fn poll_task(&self, id: TaskId) -> Result<Arc<TaskSnapshot>, TaskError> {
        self.tasks.poll(id).await
    }

    pub async fn remove_task(&self, id: TaskId) -> Result<Arc<TaskSnapshot>, TaskError> {
        self.tasks.remove(id).await
    }

    pub async fn clear_cache(&self) {
        self.fetcher.clear_cache().await;
    }

    pub async fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, PipelineError> {
        Ok(self.fetcher.token_info(token).await?)
    }

    async fn run(&self, request: &FetchRequest, reporter: Option<&TaskReporter>) -> Result<AnalysisResult, PipelineError> {
        if let Some(reporter) = reporter {
            reporter.checkpoint(Checkpoint::FetchStarted).await?;
        }
        let events = self.fetcher.fetch(request).await?;

        if let Some(reporter) = reporter {
            reporter.checkpoint(Checkpoint::FetchDone).await?;
        }
        let classifier = self.classifier;
        let token = request.token.clone();
        let time_range = request.time_range;
        let result = tokio::task::spawn_blocking(move || classifier.classify(&token, time_range, &events))
            .await
            .map_err(|e| PipelineError::Classify(e.to_string()))?;

        if let Some(reporter) = reporter {
            reporter.checkpoint(Checkpoint::ClassifyDone).await?;
        }
        info!(
            "{}: {} buyers, {} sellers, {:.4} SOL net buy volume",
            result.token, result.unique_buyers, result.unique_sellers, result.net_buy_volume
        );
        Ok(result)
    }
}
