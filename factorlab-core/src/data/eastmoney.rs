//! Eastmoney quote-service client.
//!
//! Fetches the full-market A-share spot snapshot from the `clist` API and
//! per-symbol forward-adjusted daily bars from the `kline` API. Handles
//! retries with exponential backoff, host fallback for the spot probe, and
//! response parsing. The service is unofficial and subject to unannounced
//! format changes; cached data is the primary fallback when it misbehaves.

use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use super::provider::{DataError, DataTable, MarketDataService};
use super::retry::{call_with_retry, RetryPolicy};

/// Spot snapshot hosts, probed in order. The delayed mirror serves the same
/// payload a few minutes behind and tends to survive primary outages.
const SPOT_HOSTS: &[&str] = &[
    "https://push2.eastmoney.com",
    "https://push2delay.eastmoney.com",
];

const HISTORY_HOST: &str = "https://push2his.eastmoney.com";

/// A-share board filter: SH/SZ main boards, ChiNext, STAR.
const SPOT_MARKETS: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23";

/// clist response: code/name/volume/turnover per listed symbol.
#[derive(Debug, Deserialize)]
struct ClistResponse {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    diff: Vec<ClistRow>,
}

#[derive(Debug, Deserialize)]
struct ClistRow {
    #[serde(rename = "f12")]
    code: Option<serde_json::Value>,
    #[serde(rename = "f14")]
    name: Option<serde_json::Value>,
    #[serde(rename = "f5")]
    volume: Option<serde_json::Value>,
    #[serde(rename = "f6")]
    turnover: Option<serde_json::Value>,
}

/// kline response: one comma-joined string per trading day.
#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Column layout of one kline row, in upstream order.
const KLINE_COLUMNS: &[&str] = &[
    "日期", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "振幅", "涨跌幅", "涨跌额", "换手率",
];

/// Eastmoney market-data client.
pub struct EastmoneyProvider {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl EastmoneyProvider {
    pub fn new(retry: RetryPolicy) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .expect("failed to build HTTP client");
        Self { client, retry }
    }

    fn spot_url(host: &str) -> String {
        format!(
            "{host}/api/qt/clist/get?pn=1&pz=10000&po=1&np=1&fltt=2&invt=2\
             &fid=f6&fs={SPOT_MARKETS}&fields=f5,f6,f12,f14"
        )
    }

    fn kline_url(code: &str, start: NaiveDate, end: NaiveDate) -> String {
        // Market prefix: 1 = Shanghai (6xx/9xx), 0 = Shenzhen/Beijing.
        let market = if code.starts_with('6') || code.starts_with('9') {
            "1"
        } else {
            "0"
        };
        format!(
            "{HISTORY_HOST}/api/qt/stock/kline/get?secid={market}.{code}\
             &fields1=f1,f2,f3,f4,f5,f6&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61\
             &klt=101&fqt=1&beg={}&end={}",
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        )
    }

    /// One retried GET, decoded as JSON.
    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, DataError> {
        call_with_retry(&self.retry, std::thread::sleep, || {
            let resp = self
                .client
                .get(url)
                .send()
                .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(DataError::HttpStatus {
                    status: status.as_u16(),
                    endpoint: url.split('?').next().unwrap_or(url).to_string(),
                });
            }
            resp.json::<T>()
                .map_err(|e| DataError::ResponseFormat(e.to_string()))
        })
    }

    fn spot_from_host(&self, host: &str) -> Result<DataTable, DataError> {
        let resp: ClistResponse = self.get_json(&Self::spot_url(host))?;
        let rows = resp
            .data
            .map(|d| d.diff)
            .ok_or_else(|| DataError::ResponseFormat("clist payload has no data".into()))?;

        let mut table = DataTable::new(
            ["代码", "名称", "成交量", "成交额"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        for row in rows {
            table.rows.push(vec![
                value_to_cell(&row.code),
                value_to_cell(&row.name),
                value_to_cell(&row.volume),
                value_to_cell(&row.turnover),
            ]);
        }
        Ok(table)
    }
}

/// Render an optional JSON scalar as a raw cell. Halted symbols report "-"
/// for numeric fields; that passes through and fails numeric coercion
/// downstream, which is the intended drop path.
fn value_to_cell(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl MarketDataService for EastmoneyProvider {
    fn spot_snapshot(&self) -> Result<DataTable, DataError> {
        let mut failures = Vec::new();
        for host in SPOT_HOSTS {
            match self.spot_from_host(host) {
                Ok(table) if !table.is_empty() => return Ok(table),
                Ok(_) => failures.push(format!("{host}: empty snapshot")),
                Err(err) => failures.push(format!("{host}: {err}")),
            }
        }
        Err(DataError::SnapshotUnavailable(failures.join(" | ")))
    }

    fn daily_history(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DataTable, DataError> {
        let resp: KlineResponse = self.get_json(&Self::kline_url(code, start, end))?;
        let klines = resp
            .data
            .map(|d| d.klines)
            .ok_or_else(|| DataError::ResponseFormat(format!("no kline data for {code}")))?;
        if klines.is_empty() {
            return Err(DataError::ResponseFormat(format!(
                "empty kline history for {code}"
            )));
        }

        let mut table =
            DataTable::new(KLINE_COLUMNS.iter().map(|s| s.to_string()).collect());
        for line in &klines {
            let parts: Vec<String> = line.split(',').map(|s| s.to_string()).collect();
            // Tolerate upstream adding trailing fields; skip truncated rows.
            if parts.len() >= KLINE_COLUMNS.len() {
                table.rows.push(parts[..KLINE_COLUMNS.len()].to_vec());
            }
        }
        Ok(table)
    }
}
