//! Acquisition layer: cache-first, fetch-on-miss, fallback-on-failure.
//!
//! `DataHub` composes the market-data service, the cache store, and the
//! name resolver behind three operations: `fetch_auto_pool`,
//! `fetch_history`, and `resolve_names`. The hub owns the cache-vs-live
//! policy; the service owns retries; the cache owns durability.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Local, NaiveDate};

use super::cache::{read_names_file, CacheStore};
use super::provider::{DataError, DataTable, MarketDataService};
use super::schema::{canonicalize_history, resolve_spot_columns};
use crate::config::ScreenerConfig;
use crate::domain::candidate::clean_name;
use crate::domain::{extract_code, normalize_symbol, Candidate, PriceBar};

/// Outcome of best-effort name resolution. Codes that could not be resolved
/// are listed rather than silently dropped; the caller substitutes the code
/// itself as the display name.
#[derive(Debug, Default)]
pub struct NameResolution {
    pub names: HashMap<String, String>,
    pub unresolved: Vec<String>,
}

/// The data acquisition layer.
pub struct DataHub<'a> {
    service: &'a dyn MarketDataService,
    cache: CacheStore,
    today: NaiveDate,
    lookback: usize,
    min_bars: usize,
}

impl<'a> DataHub<'a> {
    pub fn new(
        service: &'a dyn MarketDataService,
        cache: CacheStore,
        config: &ScreenerConfig,
    ) -> Self {
        Self {
            service,
            cache,
            today: Local::now().date_naive(),
            lookback: config.history_lookback_days,
            min_bars: config.min_history_bars,
        }
    }

    /// Pin "today" for deterministic cache keys in tests.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Up to `limit` candidates ranked by descending traded turnover
    /// (volume when turnover is absent), as of the freshest snapshot
    /// available. Same-day same-limit cache entries are returned verbatim;
    /// on any live failure the newest prior cache entry is served instead,
    /// and only when that also comes up empty does the pool fail.
    pub fn fetch_auto_pool(&self, limit: usize) -> Result<Vec<Candidate>, DataError> {
        if let Some(cached) = self.cache.read_pool(self.today, limit) {
            return Ok(cached);
        }

        match self.fetch_live_pool(limit) {
            Ok(candidates) => Ok(candidates),
            Err(err) => match self.cache.read_pool_fallback(limit) {
                Some(fallback) => Ok(fallback),
                None => Err(DataError::PoolUnavailable {
                    source: Box::new(err),
                }),
            },
        }
    }

    fn fetch_live_pool(&self, limit: usize) -> Result<Vec<Candidate>, DataError> {
        let table = self.service.spot_snapshot()?;
        let cols = resolve_spot_columns(&table)?;

        let mut ranked: Vec<(f64, Candidate)> = Vec::new();
        for row in &table.rows {
            let Some(code) = row.get(cols.code).and_then(|s| extract_code(s)) else {
                continue;
            };
            let name = row
                .get(cols.name)
                .map(|s| clean_name(s))
                .unwrap_or_default();
            let rank = cols
                .rank
                .and_then(|c| row.get(c))
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            ranked.push((rank, Candidate::new(code, name)));
        }

        if cols.rank.is_some() {
            ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        }
        let candidates: Vec<Candidate> =
            ranked.into_iter().take(limit).map(|(_, c)| c).collect();

        self.cache.write_pool(self.today, limit, &candidates)?;
        Ok(candidates)
    }

    /// Cleaned, chronological history for one symbol: at most `lookback`
    /// bars, at least `min_bars`. Cache-first; a live fetch covers a
    /// 3×lookback calendar window to survive holidays and halts.
    pub fn fetch_history(&self, symbol: &str) -> Result<Vec<PriceBar>, DataError> {
        let code = normalize_symbol(symbol)?;

        if let Some(cached) = self.cache.read_history(&code) {
            if cached.len() >= self.min_bars {
                return Ok(tail(cached, self.lookback));
            }
        }

        let start = self.today - Duration::days(self.lookback as i64 * 3);
        let table = self.service.daily_history(&code, start, self.today)?;
        let bars = canonicalize_history(&table)?;
        if bars.len() < self.min_bars {
            return Err(DataError::InsufficientHistory {
                code,
                got: bars.len(),
                need: self.min_bars,
            });
        }

        let bars = tail(bars, self.lookback);
        self.cache.write_history(&code, &bars)?;
        Ok(bars)
    }

    /// Best-effort code→name resolution; never fails. Same-day cache first;
    /// one live snapshot fetch for the gaps (persisted on success); on live
    /// failure, walks historical snapshots newest-first.
    pub fn resolve_names(&self, codes: &[String]) -> NameResolution {
        let mut normalized: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for code in codes {
            if let Ok(code) = normalize_symbol(code) {
                if seen.insert(code.clone()) {
                    normalized.push(code);
                }
            }
        }
        if normalized.is_empty() {
            return NameResolution::default();
        }

        let mut names = self.cache.read_names(self.today);
        let mut unresolved: Vec<String> =
            normalized.iter().filter(|c| !names.contains_key(*c)).cloned().collect();

        if !unresolved.is_empty() {
            match self.fetch_live_names() {
                Ok(live) if !live.is_empty() => {
                    let _ = self.cache.write_names(self.today, &live);
                    for code in &unresolved {
                        if let Some(name) = live.get(code) {
                            names.insert(code.clone(), name.clone());
                        }
                    }
                }
                _ => {
                    for snapshot in self.cache.name_snapshots() {
                        let fallback = read_names_file(&snapshot);
                        for code in &unresolved {
                            if let Some(name) = fallback.get(code) {
                                names.insert(code.clone(), name.clone());
                            }
                        }
                        unresolved.retain(|c| !names.contains_key(c));
                        if unresolved.is_empty() {
                            break;
                        }
                    }
                }
            }
        }

        let resolved: HashMap<String, String> = normalized
            .iter()
            .filter_map(|c| names.get(c).map(|n| (c.clone(), n.clone())))
            .collect();
        let unresolved = normalized
            .into_iter()
            .filter(|c| !resolved.contains_key(c))
            .collect();

        NameResolution {
            names: resolved,
            unresolved,
        }
    }

    fn fetch_live_names(&self) -> Result<HashMap<String, String>, DataError> {
        let table: DataTable = self.service.spot_snapshot()?;
        let cols = resolve_spot_columns(&table)?;

        let mut names = HashMap::new();
        for row in &table.rows {
            let Some(code) = row.get(cols.code).and_then(|s| extract_code(s)) else {
                continue;
            };
            let name = row
                .get(cols.name)
                .map(|s| clean_name(s))
                .unwrap_or_default();
            if !name.is_empty() {
                names.insert(code, name);
            }
        }
        Ok(names)
    }
}

fn tail(mut bars: Vec<PriceBar>, lookback: usize) -> Vec<PriceBar> {
    if bars.len() > lookback {
        bars.drain(..bars.len() - lookback);
    }
    bars
}
