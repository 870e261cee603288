//! CSV cache layer for pool, history, and name-map entries.
//!
//! Layout: one delimited file per entry under a single cache directory —
//! `auto_candidates_{YYYYMMDD}_{limit}.csv`, `hist_{CODE}.csv`,
//! `stock_name_map_{YYYYMMDD}.csv`. Staleness is carried entirely by the
//! key: a new day produces a new filename, so entries are superseded rather
//! than expired in place.
//!
//! Writes are atomic (write to .tmp, rename into place). Readers resolve
//! columns by header name, tolerate extra columns, and skip malformed rows;
//! an unreadable file behaves like a missing one. The store assumes a single
//! writer per deployment — concurrent processes can overwrite the same key,
//! and the atomic rename only keeps each individual file internally
//! consistent.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::provider::DataError;
use super::schema::canonicalize_history;
use crate::data::provider::DataTable;
use crate::domain::candidate::clean_name;
use crate::domain::{Candidate, PriceBar};

/// The on-disk cache store, rooted at one directory.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pool_path(&self, day: NaiveDate, limit: usize) -> PathBuf {
        self.dir
            .join(format!("auto_candidates_{}_{limit}.csv", day.format("%Y%m%d")))
    }

    fn history_path(&self, code: &str) -> PathBuf {
        self.dir.join(format!("hist_{code}.csv"))
    }

    fn names_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("stock_name_map_{}.csv", day.format("%Y%m%d")))
    }

    // ── candidate pool ──────────────────────────────────────────────

    /// Same-day, same-limit pool entry, if present and non-empty.
    pub fn read_pool(&self, day: NaiveDate, limit: usize) -> Option<Vec<Candidate>> {
        let candidates = read_pool_file(&self.pool_path(day, limit), limit);
        if candidates.is_empty() {
            None
        } else {
            Some(candidates)
        }
    }

    /// Newest usable pool entry for any prior day: same-limit files first
    /// (newest filename first), then any pool file newest-first.
    pub fn read_pool_fallback(&self, limit: usize) -> Option<Vec<Candidate>> {
        let mut all: Vec<PathBuf> = list_files(&self.dir, "auto_candidates_", ".csv");
        all.sort();
        all.reverse();

        let suffix = format!("_{limit}.csv");
        let same_limit: Vec<&PathBuf> = all
            .iter()
            .filter(|p| p.to_string_lossy().ends_with(&suffix))
            .collect();
        let scan: Vec<&PathBuf> = if same_limit.is_empty() {
            all.iter().collect()
        } else {
            same_limit
        };

        for path in scan {
            let candidates = read_pool_file(path, limit);
            if !candidates.is_empty() {
                return Some(candidates);
            }
        }
        None
    }

    pub fn write_pool(
        &self,
        day: NaiveDate,
        limit: usize,
        candidates: &[Candidate],
    ) -> Result<(), DataError> {
        let path = self.pool_path(day, limit);
        write_code_name_csv(&path, candidates.iter().map(|c| (&c.code, &c.name)))
    }

    // ── history ─────────────────────────────────────────────────────

    /// Cached history for a symbol, chronological. `None` when the entry is
    /// missing, unreadable, or empty.
    pub fn read_history(&self, code: &str) -> Option<Vec<PriceBar>> {
        let table = read_csv_table(&self.history_path(code))?;
        match canonicalize_history(&table) {
            Ok(bars) if !bars.is_empty() => Some(bars),
            _ => None,
        }
    }

    pub fn write_history(&self, code: &str, bars: &[PriceBar]) -> Result<(), DataError> {
        let path = self.history_path(code);
        let mut buf = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut buf);
            writer
                .write_record([
                    "date", "open", "high", "low", "close", "volume", "turnover", "pct_change",
                ])
                .map_err(|e| DataError::CacheError(format!("history header: {e}")))?;
            for bar in bars {
                writer
                    .write_record([
                        bar.date.format("%Y-%m-%d").to_string(),
                        bar.open.to_string(),
                        bar.high.to_string(),
                        bar.low.to_string(),
                        bar.close.to_string(),
                        bar.volume.to_string(),
                        opt_cell(bar.turnover),
                        opt_cell(bar.pct_change),
                    ])
                    .map_err(|e| DataError::CacheError(format!("history row: {e}")))?;
            }
            writer
                .flush()
                .map_err(|e| DataError::CacheError(format!("history flush: {e}")))?;
        }
        write_atomic(&path, &buf)
    }

    // ── name map ────────────────────────────────────────────────────

    /// Name map for one day. Empty when missing or unreadable.
    pub fn read_names(&self, day: NaiveDate) -> HashMap<String, String> {
        read_names_file(&self.names_path(day))
    }

    pub fn write_names(
        &self,
        day: NaiveDate,
        names: &HashMap<String, String>,
    ) -> Result<(), DataError> {
        let mut rows: Vec<(&String, &String)> = names.iter().collect();
        rows.sort();
        write_code_name_csv(&self.names_path(day), rows.into_iter())
    }

    /// All name-map snapshot files, newest first.
    pub fn name_snapshots(&self) -> Vec<PathBuf> {
        let mut paths = list_files(&self.dir, "stock_name_map_", ".csv");
        paths.sort();
        paths.reverse();
        paths
    }
}

/// Read one name-map snapshot file. Public within the crate so the hub can
/// walk historical snapshots without re-deriving paths.
pub(crate) fn read_names_file(path: &Path) -> HashMap<String, String> {
    let Some(table) = read_csv_table(path) else {
        return HashMap::new();
    };
    let (Some(code_col), Some(name_col)) =
        (table.column_index("code"), table.column_index("name"))
    else {
        return HashMap::new();
    };

    let mut names = HashMap::new();
    for row in &table.rows {
        let Some(code) = row.get(code_col).and_then(|s| crate::domain::extract_code(s)) else {
            continue;
        };
        let name = row.get(name_col).map(|s| clean_name(s)).unwrap_or_default();
        if !name.is_empty() {
            names.insert(code, name);
        }
    }
    names
}

fn read_pool_file(path: &Path, limit: usize) -> Vec<Candidate> {
    let Some(table) = read_csv_table(path) else {
        return Vec::new();
    };
    let Some(code_col) = table.column_index("code") else {
        return Vec::new();
    };
    let name_col = table.column_index("name");

    let mut candidates = Vec::new();
    for row in &table.rows {
        let Some(code) = row.get(code_col) else { continue };
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let name = name_col
            .and_then(|c| row.get(c))
            .map(|s| clean_name(s))
            .unwrap_or_default();
        candidates.push(Candidate::new(code, name));
        if candidates.len() >= limit {
            break;
        }
    }
    candidates
}

/// Load a whole CSV file as an untyped table. `None` on any I/O or parse
/// problem — cache readers treat damage as a miss, never an error.
fn read_csv_table(path: &Path) -> Option<DataTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .ok()?;
    let columns: Vec<String> = reader
        .headers()
        .ok()?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    let mut table = DataTable::new(columns);
    for record in reader.records() {
        let Ok(record) = record else { continue };
        table
            .rows
            .push(record.iter().map(|s| s.to_string()).collect());
    }
    Some(table)
}

fn write_code_name_csv<'a>(
    path: &Path,
    rows: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<(), DataError> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        writer
            .write_record(["code", "name"])
            .map_err(|e| DataError::CacheError(format!("header: {e}")))?;
        for (code, name) in rows {
            writer
                .write_record([code, name])
                .map_err(|e| DataError::CacheError(format!("row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| DataError::CacheError(format!("flush: {e}")))?;
    }
    write_atomic(path, &buf)
}

/// Write to `{path}.tmp`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::CacheError(format!("create cache dir: {e}")))?;
    }
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, bytes).map_err(|e| DataError::CacheError(format!("write tmp: {e}")))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DataError::CacheError(format!("atomic rename: {e}"))
    })
}

fn list_files(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix) && n.ends_with(suffix))
                    .unwrap_or(false)
        })
        .collect()
}

fn opt_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
