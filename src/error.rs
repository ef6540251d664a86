use thiserror::Error;

/// Failure taxonomy for the simulation pipeline. Per-ticker variants are
/// recorded as diagnostics and never abort a batch; `InvalidInput` is the one
/// caller error surfaced immediately.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no usable bar data for {ticker}")]
    DataUnavailable { ticker: String },

    #[error("{ticker} has {have} bars, {need} required")]
    InsufficientHistory {
        ticker: String,
        have: usize,
        need: usize,
    },

    #[error("classifier training failed for {ticker}: {reason}")]
    ModelTrainingFailure { ticker: String, reason: String },

    #[error("sizing rejected: {reason}")]
    SizingRejected { reason: String },

    #[error("price fetch failed for {ticker}: {source}")]
    PriceFetchError {
        ticker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("market data snapshot is malformed: {0}")]
    SnapshotFormat(String),

    #[error("market data snapshot version {found} is not supported (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },
}

impl EngineError {
    /// Short tag used when a failure is folded into batch diagnostics.
    pub fn diagnostic_tag(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable { .. } => "data_unavailable",
            EngineError::InsufficientHistory { .. } => "insufficient_history",
            EngineError::ModelTrainingFailure { .. } => "model_training_failure",
            EngineError::SizingRejected { .. } => "sizing_rejected",
            EngineError::PriceFetchError { .. } => "price_fetch_error",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::SnapshotFormat(_) => "snapshot_format",
            EngineError::SnapshotVersion { .. } => "snapshot_version",
        }
    }
}
