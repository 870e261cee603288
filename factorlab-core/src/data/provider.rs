//! Market-data service trait and structured error types.
//!
//! The MarketDataService trait abstracts over the upstream quote service so
//! the acquisition layer can be exercised against a scripted mock. The
//! upstream hands back untyped tables; all column resolution and cleaning
//! happens downstream in `schema`.

use chrono::NaiveDate;
use thiserror::Error;

/// Untyped tabular payload from the upstream service. Every cell is a raw
/// string; numeric coercion is the consumer's job.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of an exactly-named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Structured error types for data acquisition.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid ticker symbol: {0}")]
    InvalidSymbol(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("http {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("quote snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("{context} data missing required field(s): {}", .missing.join(", "))]
    MissingFields {
        context: &'static str,
        missing: Vec<String>,
    },

    #[error("insufficient history for {code}: {got} usable bars, need {need}")]
    InsufficientHistory {
        code: String,
        got: usize,
        need: usize,
    },

    #[error("candidate pool unavailable: {source}")]
    PoolUnavailable {
        #[source]
        source: Box<DataError>,
    },

    #[error("data provider failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DataError>,
    },

    #[error("cache error: {0}")]
    CacheError(String),
}

/// How a failure is surfaced to the user and counted by the orchestrator.
/// Never changes retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Data,
}

/// Message substrings that mark a failure as a transport problem rather than
/// a data problem.
const NETWORK_SIGNALS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "unreachable",
    "ssl",
    "max retries",
    "http",
    "temporarily unavailable",
];

/// Classify a failure as network vs data by its rendered message. Wrapper
/// variants (retry exhaustion, pool fallback) include their source's message,
/// so the classification follows the underlying cause.
pub fn classify(err: &DataError) -> FailureKind {
    let msg = err.to_string().to_lowercase();
    if NETWORK_SIGNALS.iter().any(|sig| msg.contains(sig)) {
        FailureKind::Network
    } else {
        FailureKind::Data
    }
}

/// The upstream market-data service: two capability probes, both end-of-day
/// batch snapshots. Implementations retry internally; callers see only the
/// final outcome.
pub trait MarketDataService: Send + Sync {
    /// Full-market quote snapshot: one row per listed symbol, with code,
    /// name, and turnover/volume columns under locale-specific names.
    fn spot_snapshot(&self) -> Result<DataTable, DataError>;

    /// Forward-adjusted daily bars for one normalized symbol.
    fn daily_history(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DataTable, DataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_network_signals() {
        let err = DataError::NetworkUnreachable("connection refused".into());
        assert_eq!(classify(&err), FailureKind::Network);

        let err = DataError::HttpStatus {
            status: 503,
            endpoint: "spot".into(),
        };
        assert_eq!(classify(&err), FailureKind::Network);
    }

    #[test]
    fn classify_data_errors() {
        let err = DataError::MissingFields {
            context: "history",
            missing: vec!["close".into()],
        };
        assert_eq!(classify(&err), FailureKind::Data);

        let err = DataError::InsufficientHistory {
            code: "600519".into(),
            got: 40,
            need: 120,
        };
        assert_eq!(classify(&err), FailureKind::Data);
    }

    #[test]
    fn classification_follows_wrapped_source() {
        let err = DataError::RetriesExhausted {
            attempts: 2,
            source: Box::new(DataError::NetworkUnreachable("timed out".into())),
        };
        assert_eq!(classify(&err), FailureKind::Network);

        let err = DataError::RetriesExhausted {
            attempts: 2,
            source: Box::new(DataError::ResponseFormat("klines array empty".into())),
        };
        assert_eq!(classify(&err), FailureKind::Data);
    }
}
