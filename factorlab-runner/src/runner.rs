//! Screening run orchestrator.
//!
//! Drives one bounded batch over a candidate list: resolve the list, score
//! each candidate through the acquisition layer, top up an under-filled
//! manual pool from the auto pool, rank the results, and decide whether the
//! run counts against the daily quota. Per-candidate failures never abort a
//! run; only an empty candidate list or zero total successes does.
//!
//! Single-threaded and synchronous: every fetch blocks the loop, which is
//! why the wall-clock budget exists. The budget is polled only between
//! candidates — one slow upstream call can overrun it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use thiserror::Error;

use factorlab_core::config::ScreenerConfig;
use factorlab_core::data::{classify, DataError, DataHub, FailureKind};
use factorlab_core::domain::{parse_code_list, Candidate};
use factorlab_core::scoring::{evaluate_candidate, ScoreResult};

use crate::quota::QuotaStore;

/// How the candidate list is sourced.
#[derive(Debug, Clone)]
pub enum ScreenRequest {
    /// Caller-supplied codes, free text; auto-fill tops up shortfalls.
    Manual { codes: Vec<String> },
    /// Auto pool of the given size, ranked by traded turnover.
    Auto { limit: usize },
}

/// Errors that fail a whole run. None of these consume quota.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no valid candidates to score")]
    EmptyCandidates,

    #[error("candidate pool unavailable: {0}")]
    Pool(#[source] DataError),

    #[error(
        "no candidate produced a usable score ({} attempted, {} network / {} data failures)",
        .outcome.attempted,
        .outcome.network_failures,
        .outcome.data_failures
    )]
    AllFailed { outcome: RunOutcome },
}

/// Aggregate over one orchestrator invocation. Lives only for the run.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub network_failures: usize,
    pub data_failures: usize,
    pub budget_exhausted: bool,
    /// Manual list exceeded the universe cap and was cut down.
    pub truncated: bool,
    /// Supplemental candidates attempted during auto-fill.
    pub auto_fill_attempted: usize,
    pub charged: bool,
    /// Successful results, ranked by descending score.
    pub results: Vec<ScoreResult>,
    /// Per-candidate failure records: (code, message).
    pub errors: Vec<(String, String)>,
}

impl RunOutcome {
    /// The shortlist surface: the best `n` results.
    pub fn top(&self, n: usize) -> &[ScoreResult] {
        &self.results[..self.results.len().min(n)]
    }
}

/// Progress callbacks for a screening run.
pub trait ScreenProgress {
    fn on_pool_ready(&self, count: usize) {
        let _ = count;
    }
    fn on_candidate_start(&self, code: &str, index: usize, total: usize) {
        let _ = (code, index, total);
    }
    fn on_candidate_done(&self, code: &str, result: Result<&ScoreResult, &str>) {
        let _ = (code, result);
    }
    fn on_auto_fill(&self, shortfall: usize, pool_size: usize) {
        let _ = (shortfall, pool_size);
    }
}

/// No-op progress for library callers and tests.
pub struct SilentProgress;

impl ScreenProgress for SilentProgress {}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl ScreenProgress for StdoutProgress {
    fn on_pool_ready(&self, count: usize) {
        println!("Screening {count} candidate(s)...");
    }

    fn on_candidate_start(&self, code: &str, index: usize, total: usize) {
        println!("[{}/{}] {code}", index + 1, total);
    }

    fn on_candidate_done(&self, code: &str, result: Result<&ScoreResult, &str>) {
        match result {
            Ok(r) => println!("  OK: {code} score {:.1} ({})", r.score, r.signal),
            Err(msg) => println!("  FAIL: {code}: {msg}"),
        }
    }

    fn on_auto_fill(&self, shortfall: usize, pool_size: usize) {
        println!("Auto-filling {shortfall} slot(s) from a pool of {pool_size}...");
    }
}

/// Execute one screening run.
pub fn run_screen(
    hub: &DataHub<'_>,
    quota: &dyn QuotaStore,
    config: &ScreenerConfig,
    request: &ScreenRequest,
    progress: &dyn ScreenProgress,
) -> Result<RunOutcome, RunError> {
    let started = Instant::now();
    let budget = config.runtime_budget();

    let mut outcome = RunOutcome::default();

    // Preparing: resolve the candidate list. Precondition violations are
    // reported before any scoring traffic.
    let (candidates, is_manual) = match request {
        ScreenRequest::Manual { codes } => {
            let mut codes = parse_code_list(&codes.join(" "));
            if codes.is_empty() {
                return Err(RunError::EmptyCandidates);
            }
            if codes.len() > config.max_universe_size {
                codes.truncate(config.max_universe_size);
                outcome.truncated = true;
            }
            let resolution = hub.resolve_names(&codes);
            let candidates = codes
                .into_iter()
                .map(|code| {
                    let name = resolution.names.get(&code).cloned().unwrap_or_default();
                    Candidate::new(code, name)
                })
                .collect::<Vec<_>>();
            (candidates, true)
        }
        ScreenRequest::Auto { limit } => {
            let pool = hub.fetch_auto_pool(*limit).map_err(RunError::Pool)?;
            (pool, false)
        }
    };
    if candidates.is_empty() {
        return Err(RunError::EmptyCandidates);
    }
    progress.on_pool_ready(candidates.len());

    // Scoring: one pass over the list, budget polled between items.
    let mut attempted_codes: HashSet<String> = HashSet::new();
    score_batch(
        hub,
        &candidates,
        started,
        budget,
        None,
        &mut attempted_codes,
        &mut outcome,
        progress,
    );

    // AutoFilling: manual runs only, and only while the budget holds.
    if is_manual && outcome.results.len() < config.auto_fill_target && !outcome.budget_exhausted
    {
        match hub.fetch_auto_pool(config.auto_fill_pool_size) {
            Ok(pool) => {
                let supplemental: Vec<Candidate> = pool
                    .into_iter()
                    .filter(|c| !attempted_codes.contains(&c.code))
                    .collect();
                progress.on_auto_fill(
                    config.auto_fill_target - outcome.results.len(),
                    supplemental.len(),
                );
                let before = outcome.attempted;
                score_batch(
                    hub,
                    &supplemental,
                    started,
                    budget,
                    Some(config.auto_fill_target),
                    &mut attempted_codes,
                    &mut outcome,
                    progress,
                );
                outcome.auto_fill_attempted = outcome.attempted - before;
            }
            Err(err) => {
                outcome
                    .errors
                    .push(("auto-pool".to_string(), err.to_string()));
            }
        }
    }

    // Finalizing: rank, then decide the charge separately from success.
    outcome.succeeded = outcome.results.len();
    if outcome.succeeded == 0 {
        return Err(RunError::AllFailed { outcome });
    }
    outcome
        .results
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    outcome.charged = outcome.succeeded >= config.min_success_to_charge;
    if outcome.charged {
        quota.consume();
    }
    Ok(outcome)
}

/// Score a list of candidates into `outcome`, polling the budget before
/// each item. `target`, when set, stops the loop once that many total
/// results exist (the auto-fill shortfall rule).
#[allow(clippy::too_many_arguments)]
fn score_batch(
    hub: &DataHub<'_>,
    candidates: &[Candidate],
    started: Instant,
    budget: Duration,
    target: Option<usize>,
    attempted_codes: &mut HashSet<String>,
    outcome: &mut RunOutcome,
    progress: &dyn ScreenProgress,
) {
    let total = candidates.len();
    for (index, candidate) in candidates.iter().enumerate() {
        if let Some(target) = target {
            if outcome.results.len() >= target {
                break;
            }
        }
        if started.elapsed() >= budget {
            outcome.budget_exhausted = true;
            break;
        }
        if !attempted_codes.insert(candidate.code.clone()) {
            continue;
        }

        progress.on_candidate_start(&candidate.code, index, total);
        outcome.attempted += 1;

        let history = match hub.fetch_history(&candidate.code) {
            Ok(history) => history,
            Err(err) => {
                let message = err.to_string();
                record_failure(outcome, &candidate.code, classify(&err), message.clone());
                progress.on_candidate_done(&candidate.code, Err(&message));
                continue;
            }
        };

        match evaluate_candidate(&candidate.code, &candidate.name, &history) {
            Ok(result) => {
                progress.on_candidate_done(&candidate.code, Ok(&result));
                outcome.results.push(result);
            }
            Err(err) => {
                let message = err.to_string();
                record_failure(outcome, &candidate.code, FailureKind::Data, message.clone());
                progress.on_candidate_done(&candidate.code, Err(&message));
            }
        }
    }
}

fn record_failure(outcome: &mut RunOutcome, code: &str, kind: FailureKind, message: String) {
    match kind {
        FailureKind::Network => outcome.network_failures += 1,
        FailureKind::Data => outcome.data_failures += 1,
    }
    outcome.failed += 1;
    outcome.errors.push((code.to_string(), message));
}
