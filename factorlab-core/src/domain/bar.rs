//! Daily OHLCV bar for one symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day of a symbol's history, after canonicalization.
///
/// `close` is guaranteed finite and positive — rows failing that are dropped
/// before a `PriceBar` is built. The other numeric fields carry whatever the
/// upstream sent and may be NaN when a column was absent or unparseable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: Option<f64>,
    pub pct_change: Option<f64>,
}

impl PriceBar {
    /// Minimal constructor for tests and synthetic data: flat OHLC at
    /// `close`, zero volume.
    pub fn at(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            turnover: None,
            pct_change: None,
        }
    }
}
