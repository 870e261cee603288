//! Scoring engine — a pure transform from price history to a scored result.
//!
//! Four sub-scores (valuation, quality, momentum, volatility), each clamped
//! to [0, 100], blended with fixed weights into a composite, plus a risk tag
//! and a three-way signal. Deterministic given identical history; no I/O,
//! no shared state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PriceBar;

/// Closing prices required before a candidate can be scored. The
/// acquisition layer enforces a stricter 120-bar gate; this floor is the
/// engine's own precondition so it stays total over any input.
pub const MIN_SCORING_BARS: usize = 80;

const WEIGHT_VALUATION: f64 = 0.30;
const WEIGHT_QUALITY: f64 = 0.25;
const WEIGHT_MOMENTUM: f64 = 0.25;
const WEIGHT_VOLATILITY: f64 = 0.20;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("insufficient close history for {code}: {bars} bars, need {MIN_SCORING_BARS}")]
    InsufficientData { code: String, bars: usize },
}

/// Three-way recommendation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Watch,
    Observe,
    Avoid,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Signal::Watch => "watch",
            Signal::Observe => "observe",
            Signal::Avoid => "avoid",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTag {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RiskTag::Low => "low",
            RiskTag::Medium => "medium",
            RiskTag::High => "high",
        })
    }
}

/// Scored candidate. Sub-scores are stored rounded to 0.1; the three raw
/// metrics are stored as percentages rounded to 0.01.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub code: String,
    pub name: String,
    pub score: f64,
    pub signal: Signal,
    pub risk_tag: RiskTag,
    pub valuation_score: f64,
    pub quality_score: f64,
    pub momentum_score: f64,
    pub volatility_score: f64,
    pub return_60d: f64,
    pub annual_volatility: f64,
    pub max_drawdown: f64,
    pub explanation: String,
}

/// Score one candidate from its cleaned history.
pub fn evaluate_candidate(
    code: &str,
    name: &str,
    history: &[PriceBar],
) -> Result<ScoreResult, ScoreError> {
    let closes: Vec<f64> = history
        .iter()
        .map(|b| b.close)
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    if closes.len() < MIN_SCORING_BARS {
        return Err(ScoreError::InsufficientData {
            code: code.to_string(),
            bars: closes.len(),
        });
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let annual_vol = population_std(&returns) * (252.0_f64).sqrt();
    let mdd = max_drawdown(&closes);

    let last = *closes.last().unwrap();
    let return_60d = if closes.len() >= 61 {
        last / closes[closes.len() - 61] - 1.0
    } else {
        last / closes[0] - 1.0
    };

    let low = closes.iter().cloned().fold(f64::INFINITY, f64::min);
    let high = closes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let position = if high > low { (last - low) / (high - low) } else { 0.5 };

    let valuation = clip_0_100((1.0 - position) * 100.0);
    let quality = clip_0_100((1.0 + mdd) * 100.0);
    let momentum = clip_0_100(((return_60d + 0.20) / 0.60) * 100.0);
    let volatility = clip_0_100(((0.50 - annual_vol) / 0.50) * 100.0);

    let score = composite(valuation, quality, momentum, volatility);
    let risk_tag = risk_tag_for(annual_vol, mdd);
    let signal = signal_for(score, momentum, valuation);
    let explanation = explain(valuation, quality, momentum, volatility);

    Ok(ScoreResult {
        code: code.to_string(),
        name: name.to_string(),
        score,
        signal,
        risk_tag,
        valuation_score: round1(valuation),
        quality_score: round1(quality),
        momentum_score: round1(momentum),
        volatility_score: round1(volatility),
        return_60d: round2(return_60d * 100.0),
        annual_volatility: round2(annual_vol * 100.0),
        max_drawdown: round2(mdd * 100.0),
        explanation,
    })
}

/// Weighted blend of the four sub-scores, rounded to one decimal.
fn composite(valuation: f64, quality: f64, momentum: f64, volatility: f64) -> f64 {
    round1(
        WEIGHT_VALUATION * valuation
            + WEIGHT_QUALITY * quality
            + WEIGHT_MOMENTUM * momentum
            + WEIGHT_VOLATILITY * volatility,
    )
}

fn risk_tag_for(annual_vol: f64, mdd: f64) -> RiskTag {
    if annual_vol > 0.45 || mdd < -0.40 {
        RiskTag::High
    } else if annual_vol > 0.30 || mdd < -0.25 {
        RiskTag::Medium
    } else {
        RiskTag::Low
    }
}

fn signal_for(score: f64, momentum: f64, valuation: f64) -> Signal {
    if score >= 70.0 && momentum >= 55.0 && valuation >= 50.0 {
        Signal::Watch
    } else if score >= 55.0 {
        Signal::Observe
    } else {
        Signal::Avoid
    }
}

/// Name the strongest and weakest of the four factors. Ties resolve to the
/// first factor in valuation/quality/momentum/volatility order.
fn explain(valuation: f64, quality: f64, momentum: f64, volatility: f64) -> String {
    let factors = [
        ("valuation", valuation),
        ("quality", quality),
        ("momentum", momentum),
        ("volatility", volatility),
    ];
    let mut best = factors[0];
    let mut weak = factors[0];
    for f in &factors[1..] {
        if f.1 > best.1 {
            best = *f;
        }
        if f.1 < weak.1 {
            weak = *f;
        }
    }
    format!(
        "{} stands out while {} lags; corroborate with sector and fundamental context before acting.",
        best.0, weak.0
    )
}

/// Deepest peak-to-trough decline: min over time of close / running-max − 1.
/// Always ≤ 0; exactly 0 for a series that never falls below a prior high.
fn max_drawdown(closes: &[f64]) -> f64 {
    let mut running_max = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for &close in closes {
        running_max = running_max.max(close);
        worst = worst.min(close / running_max - 1.0);
    }
    worst
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn clip_0_100(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
