//! Domain error types.

use crate::domain::ohlcv::OhlcvFrame;

/// A failed market data fetch for one cache key.
///
/// The cache keeps its previous entry when a fetch fails; that entry is handed
/// back in `stale` so callers can decide whether to degrade or abort.
#[derive(Debug, Clone, thiserror::Error)]
#[error("market data fetch failed for {key}: {reason}")]
pub struct MarketDataError {
    pub key: String,
    pub reason: String,
    pub stale: Option<Box<OhlcvFrame>>,
}

/// Top-level error type for the analyzer.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("position source error: {reason}")]
    PositionSource { reason: String },

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error("weight references form a cycle: {}", path.join(" -> "))]
    WeightCycle { path: Vec<String> },

    #[error("invalid data: {reason}")]
    InvalidData { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&AnalyzerError> for std::process::ExitCode {
    fn from(err: &AnalyzerError) -> Self {
        let code: u8 = match err {
            AnalyzerError::Io(_) => 1,
            AnalyzerError::ConfigParse { .. }
            | AnalyzerError::ConfigMissing { .. }
            | AnalyzerError::ConfigInvalid { .. } => 2,
            AnalyzerError::Database { .. } | AnalyzerError::DatabaseQuery { .. } => 3,
            AnalyzerError::PositionSource { .. } | AnalyzerError::MarketData(_) => 4,
            AnalyzerError::WeightCycle { .. } | AnalyzerError::InvalidData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
