pub mod classify;
pub mod config;
pub mod fetch;
pub mod normalize;
pub mod service;
pub mod task;

pub use classify::{AnalysisResult, SolRange, SolRangeBucket, TimeRange, WalletAggregate, WalletClassifier};
pub use config::{AnalyzerConfig, ConfigError, UpstreamProvider};
pub use fetch::{
    BatchFetcher,
    FetchError,
    FetchRequest,
    RateLimiter,
    TokenInfo,
    TokenInfoSource,
    TransactionCache,
    TransactionSource,
    UpstreamError,
};
pub use normalize::{EventNormalizer, SwapDirection, SwapEvent};
pub use service::{Analyzer, ExportError, PipelineError, ResultExporter};
pub use task::{TaskError, TaskId, TaskManager, TaskSnapshot, TaskState};
