//! Daily run quota — one JSON record, implicit reset on date change.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("quota state write failed: {0}")]
    Write(String),
}

/// The daily-quota collaborator the orchestrator charges against.
pub trait QuotaStore {
    /// Runs left today.
    fn remaining(&self) -> usize;

    /// Consume one run; returns the new consumed count. Clamped — consuming
    /// past the maximum is a no-op on the stored count.
    fn consume(&self) -> usize;
}

/// On-disk record: `{date, count}`. A stored date other than today reads as
/// zero consumed; the file is rewritten on the next consume.
#[derive(Debug, Serialize, Deserialize)]
struct QuotaRecord {
    date: NaiveDate,
    count: i64,
}

/// File-backed quota store. Unsynchronized across processes — the
/// deployment assumption is at most one run at a time, matching the cache
/// layer.
pub struct FileQuotaStore {
    path: PathBuf,
    max_daily_runs: usize,
    today: NaiveDate,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>, max_daily_runs: usize) -> Self {
        Self::at_date(path, max_daily_runs, Local::now().date_naive())
    }

    /// Pin "today" for deterministic tests.
    pub fn at_date(path: impl Into<PathBuf>, max_daily_runs: usize, today: NaiveDate) -> Self {
        Self {
            path: path.into(),
            max_daily_runs,
            today,
        }
    }

    /// Today's consumed count, clamped to `[0, max_daily_runs]`. Missing,
    /// corrupt, or stale records read as zero.
    fn consumed_today(&self) -> usize {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return 0;
        };
        let Ok(record) = serde_json::from_str::<QuotaRecord>(&content) else {
            return 0;
        };
        if record.date != self.today {
            return 0;
        }
        record.count.clamp(0, self.max_daily_runs as i64) as usize
    }

    fn save(&self, count: usize) -> Result<(), QuotaError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuotaError::Write(e.to_string()))?;
        }
        let record = QuotaRecord {
            date: self.today,
            count: count as i64,
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| QuotaError::Write(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| QuotaError::Write(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuotaStore for FileQuotaStore {
    fn remaining(&self) -> usize {
        self.max_daily_runs.saturating_sub(self.consumed_today())
    }

    fn consume(&self) -> usize {
        let count = (self.consumed_today() + 1).min(self.max_daily_runs);
        // A failed write must not block the run that already happened; the
        // next read simply sees the old count.
        let _ = self.save(count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_quota_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "factorlab_quota_{}_{id}/run_limit.json",
            std::process::id()
        ))
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fresh_store_has_full_quota() {
        let store = FileQuotaStore::at_date(temp_quota_path(), 3, day(2026, 8, 6));
        assert_eq!(store.remaining(), 3);
    }

    #[test]
    fn consume_decrements_and_persists() {
        let path = temp_quota_path();
        let store = FileQuotaStore::at_date(&path, 3, day(2026, 8, 6));
        assert_eq!(store.consume(), 1);
        assert_eq!(store.consume(), 2);
        assert_eq!(store.remaining(), 1);

        // A second store over the same file sees the same state.
        let reread = FileQuotaStore::at_date(&path, 3, day(2026, 8, 6));
        assert_eq!(reread.remaining(), 1);
    }

    #[test]
    fn date_change_resets_implicitly() {
        let path = temp_quota_path();
        let store = FileQuotaStore::at_date(&path, 3, day(2026, 8, 5));
        store.consume();
        store.consume();
        store.consume();
        assert_eq!(store.remaining(), 0);

        let tomorrow = FileQuotaStore::at_date(&path, 3, day(2026, 8, 6));
        assert_eq!(tomorrow.remaining(), 3);
    }

    #[test]
    fn consume_clamps_at_maximum() {
        let path = temp_quota_path();
        let store = FileQuotaStore::at_date(&path, 2, day(2026, 8, 6));
        store.consume();
        store.consume();
        assert_eq!(store.consume(), 2);
        assert_eq!(store.remaining(), 0);
    }

    #[test]
    fn corrupt_state_reads_as_fresh() {
        let path = temp_quota_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store = FileQuotaStore::at_date(&path, 3, day(2026, 8, 6));
        assert_eq!(store.remaining(), 3);
    }

    #[test]
    fn negative_count_clamps_to_zero() {
        let path = temp_quota_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"date":"2026-08-06","count":-5}"#).unwrap();

        let store = FileQuotaStore::at_date(&path, 3, day(2026, 8, 6));
        assert_eq!(store.remaining(), 3);
        assert_eq!(store.consume(), 1);
    }
}
