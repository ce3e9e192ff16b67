mod classifier;
mod types;

pub use classifier::{WalletClassifier, DEFAULT_SHARD_SIZE};
pub use types::{
    AnalysisResult,
    SolRange,
    SolRangeBucket,
    TimeRange,
    WalletAggregate,
};
