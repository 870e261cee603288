//! Column-alias resolution and history canonicalization.
//!
//! The upstream ships tabular payloads whose column names vary by endpoint
//! and locale. Each logical field carries one ordered alias list, resolved
//! once per batch; validation fails fast naming the missing fields instead
//! of probing ad hoc at every access.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::provider::{DataError, DataTable};
use crate::domain::PriceBar;

/// One logical field and the upstream column names it may appear under, in
/// probe order.
pub struct FieldAliases {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
}

pub const SPOT_CODE: FieldAliases = FieldAliases {
    canonical: "code",
    aliases: &["代码", "symbol", "code"],
};

pub const SPOT_NAME: FieldAliases = FieldAliases {
    canonical: "name",
    aliases: &["名称", "name"],
};

/// Ranking key for the auto pool: traded turnover, falling back to traded
/// volume when the feed omits turnover.
pub const SPOT_RANK: FieldAliases = FieldAliases {
    canonical: "turnover",
    aliases: &["成交额", "amount", "turnover", "成交量", "volume"],
};

const HISTORY_FIELDS: &[FieldAliases] = &[
    FieldAliases { canonical: "date", aliases: &["日期", "date"] },
    FieldAliases { canonical: "open", aliases: &["开盘", "open"] },
    FieldAliases { canonical: "close", aliases: &["收盘", "close"] },
    FieldAliases { canonical: "high", aliases: &["最高", "high"] },
    FieldAliases { canonical: "low", aliases: &["最低", "low"] },
    FieldAliases { canonical: "volume", aliases: &["成交量", "volume"] },
];

const HISTORY_OPTIONAL: &[FieldAliases] = &[
    FieldAliases { canonical: "turnover", aliases: &["成交额", "amount", "turnover"] },
    FieldAliases { canonical: "pct_change", aliases: &["涨跌幅", "pct_change"] },
];

impl FieldAliases {
    /// First alias present in the table, as a column index.
    pub fn resolve(&self, table: &DataTable) -> Option<usize> {
        self.aliases
            .iter()
            .find_map(|alias| table.column_index(alias))
    }
}

/// Resolved column indices for a spot snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SpotColumns {
    pub code: usize,
    pub name: usize,
    /// Absent when the feed carries neither turnover nor volume; the pool
    /// then keeps the feed's own ordering.
    pub rank: Option<usize>,
}

/// Resolve the spot snapshot's columns once for the whole batch.
pub fn resolve_spot_columns(table: &DataTable) -> Result<SpotColumns, DataError> {
    let code = SPOT_CODE.resolve(table);
    let name = SPOT_NAME.resolve(table);

    let mut missing = Vec::new();
    if code.is_none() {
        missing.push(SPOT_CODE.canonical.to_string());
    }
    if name.is_none() {
        missing.push(SPOT_NAME.canonical.to_string());
    }
    if !missing.is_empty() {
        return Err(DataError::MissingFields {
            context: "spot",
            missing,
        });
    }

    Ok(SpotColumns {
        code: code.unwrap(),
        name: name.unwrap(),
        rank: SPOT_RANK.resolve(table),
    })
}

/// Rename a history table to canonical fields and build cleaned bars:
/// required fields validated up front, `close` coerced to a finite positive
/// number (rows failing that are dropped), dates deduplicated (later rows
/// win) and sorted chronologically.
pub fn canonicalize_history(table: &DataTable) -> Result<Vec<PriceBar>, DataError> {
    let mut resolved = Vec::with_capacity(HISTORY_FIELDS.len());
    let mut missing = Vec::new();
    for field in HISTORY_FIELDS {
        match field.resolve(table) {
            Some(idx) => resolved.push(idx),
            None => missing.push(field.canonical.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(DataError::MissingFields {
            context: "history",
            missing,
        });
    }
    let [date_col, open_col, close_col, high_col, low_col, volume_col] =
        [resolved[0], resolved[1], resolved[2], resolved[3], resolved[4], resolved[5]];
    let turnover_col = HISTORY_OPTIONAL[0].resolve(table);
    let pct_change_col = HISTORY_OPTIONAL[1].resolve(table);

    let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
    for row in &table.rows {
        let Some(date) = row.get(date_col).and_then(|s| parse_date(s)) else {
            continue;
        };
        let Some(close) = row.get(close_col).and_then(|s| parse_f64(s)) else {
            continue;
        };
        if !close.is_finite() || close <= 0.0 {
            continue;
        }
        by_date.insert(
            date,
            PriceBar {
                date,
                open: cell_f64(row, open_col),
                high: cell_f64(row, high_col),
                low: cell_f64(row, low_col),
                close,
                volume: cell_f64(row, volume_col),
                turnover: turnover_col.and_then(|c| row.get(c).and_then(|s| parse_f64(s))),
                pct_change: pct_change_col.and_then(|c| row.get(c).and_then(|s| parse_f64(s))),
            },
        );
    }

    Ok(by_date.into_values().collect())
}

fn cell_f64(row: &[String], col: usize) -> f64 {
    row.get(col).and_then(|s| parse_f64(s)).unwrap_or(f64::NAN)
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_table(columns: &[&str], rows: &[&[&str]]) -> DataTable {
        DataTable {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn resolves_first_matching_alias() {
        let table = history_table(&["symbol", "代码", "名称", "成交额"], &[]);
        let cols = resolve_spot_columns(&table).unwrap();
        // "代码" is probed before "symbol", but "symbol" appears first in the
        // table — alias order decides, not column order.
        assert_eq!(cols.code, 1);
        assert_eq!(cols.name, 2);
        assert_eq!(cols.rank, Some(3));
    }

    #[test]
    fn spot_missing_fields_are_named() {
        let table = history_table(&["成交额"], &[]);
        match resolve_spot_columns(&table).unwrap_err() {
            DataError::MissingFields { context, missing } => {
                assert_eq!(context, "spot");
                assert_eq!(missing, vec!["code".to_string(), "name".to_string()]);
            }
            other => panic!("expected MissingFields, got {other}"),
        }
    }

    #[test]
    fn rank_falls_back_to_volume() {
        let table = history_table(&["代码", "名称", "成交量"], &[]);
        let cols = resolve_spot_columns(&table).unwrap();
        assert_eq!(cols.rank, Some(2));
    }

    #[test]
    fn canonicalize_drops_bad_closes_and_sorts() {
        let table = history_table(
            &["日期", "开盘", "收盘", "最高", "最低", "成交量"],
            &[
                &["2024-01-03", "10.0", "10.5", "10.6", "9.9", "1000"],
                &["2024-01-02", "9.8", "10.0", "10.1", "9.7", "900"],
                &["2024-01-04", "10.5", "-1.0", "10.7", "10.2", "800"],
                &["2024-01-05", "10.5", "n/a", "10.7", "10.2", "800"],
            ],
        );
        let bars = canonicalize_history(&table).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 10.5);
    }

    #[test]
    fn canonicalize_dedupes_by_date_last_wins() {
        let table = history_table(
            &["date", "open", "close", "high", "low", "volume"],
            &[
                &["2024-01-02", "9.8", "10.0", "10.1", "9.7", "900"],
                &["2024-01-02", "9.8", "10.2", "10.3", "9.7", "950"],
            ],
        );
        let bars = canonicalize_history(&table).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 10.2);
    }

    #[test]
    fn canonicalize_names_missing_history_fields() {
        let table = history_table(&["日期", "收盘"], &[]);
        match canonicalize_history(&table).unwrap_err() {
            DataError::MissingFields { context, missing } => {
                assert_eq!(context, "history");
                assert_eq!(
                    missing,
                    vec!["open", "high", "low", "volume"]
                        .into_iter()
                        .map(String::from)
                        .collect::<Vec<_>>()
                );
            }
            other => panic!("expected MissingFields, got {other}"),
        }
    }
}
