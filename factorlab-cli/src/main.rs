//! FactorLab CLI — screen, pool, quota, cache, and license commands.
//!
//! Commands:
//! - `screen` — run one screening batch over manual codes or the auto pool
//! - `pool` — show the auto candidate pool (by traded turnover)
//! - `quota` — report today's remaining runs
//! - `cache status` — report cache entry counts and sizes
//! - `license` — machine code, verification, and issue-side tooling

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use factorlab_core::config::ScreenerConfig;
use factorlab_core::data::{CacheStore, DataHub, EastmoneyProvider};
use factorlab_runner::license;
use factorlab_runner::quota::{FileQuotaStore, QuotaStore};
use factorlab_runner::runner::{run_screen, RunError, RunOutcome, ScreenRequest, StdoutProgress};

#[derive(Parser)]
#[command(
    name = "factorlab",
    about = "FactorLab CLI — four-factor equity screening under daily limits"
)]
struct Cli {
    /// State directory (quota file, default cache location). Defaults to
    /// ~/.factorlab.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Cache directory. Defaults to <state-dir>/cache.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Path to a TOML config overriding the built-in limits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one screening batch (consumes quota when enough candidates score).
    Screen {
        /// Manual candidate codes (6-digit, .SH/.SZ suffixes accepted).
        codes: Vec<String>,

        /// Screen the auto pool of this size instead of manual codes.
        #[arg(long, conflicts_with = "codes")]
        auto: Option<usize>,

        /// Show raw per-candidate error messages.
        #[arg(long, default_value_t = false)]
        debug: bool,

        /// Number of ranked results to display.
        #[arg(long, default_value_t = 3)]
        show: usize,
    },
    /// Show the auto candidate pool.
    Pool {
        /// Pool size.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Report today's remaining runs.
    Quota,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// License commands.
    License {
        #[command(subcommand)]
        action: LicenseAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cache entry counts and sizes.
    Status,
}

#[derive(Subcommand)]
enum LicenseAction {
    /// Print this machine's code.
    MachineCode,
    /// Verify the installed license.
    Verify,
    /// Generate an issuer keypair in the state directory.
    Keygen,
    /// Issue a signed license file.
    Issue {
        /// Signing key file (from `license keygen`).
        #[arg(long)]
        key: PathBuf,

        /// License id.
        #[arg(long)]
        id: String,

        /// Plan name.
        #[arg(long, default_value = "lite")]
        plan: String,

        /// Expiry date (YYYY-MM-DD).
        #[arg(long)]
        expires: String,

        /// Machine code to bind to (empty = unbound).
        #[arg(long, default_value = "")]
        machine: String,

        /// Output path.
        #[arg(long, default_value = "license.key")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let state_dir = cli
        .state_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|h| h.join(".factorlab")))
        .context("cannot determine a state directory; pass --state-dir")?;
    let cache_dir = cli.cache_dir.clone().unwrap_or_else(|| state_dir.join("cache"));

    let config = match &cli.config {
        Some(path) => ScreenerConfig::from_file(path).map_err(|e| anyhow::anyhow!(e))?,
        None => ScreenerConfig::default(),
    };

    match cli.command {
        Commands::Screen {
            codes,
            auto,
            debug,
            show,
        } => run_screen_cmd(&state_dir, &cache_dir, &config, codes, auto, debug, show),
        Commands::Pool { limit } => run_pool(&cache_dir, &config, limit),
        Commands::Quota => run_quota(&state_dir, &config),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&cache_dir),
        },
        Commands::License { action } => run_license(&state_dir, action),
    }
}

fn quota_store(state_dir: &Path, config: &ScreenerConfig) -> FileQuotaStore {
    FileQuotaStore::new(state_dir.join("run_limit.json"), config.max_daily_runs)
}

fn run_screen_cmd(
    state_dir: &Path,
    cache_dir: &Path,
    config: &ScreenerConfig,
    codes: Vec<String>,
    auto: Option<usize>,
    debug: bool,
    show: usize,
) -> Result<()> {
    let request = match auto {
        Some(limit) => ScreenRequest::Auto { limit },
        None if !codes.is_empty() => ScreenRequest::Manual { codes },
        None => bail!("pass candidate codes, or --auto N for the auto pool"),
    };

    let quota = quota_store(state_dir, config);
    let remaining = quota.remaining();
    if remaining == 0 {
        bail!(
            "today's {} runs are used up; the quota resets tomorrow",
            config.max_daily_runs
        );
    }

    if license_required() {
        let info = enforce_license(state_dir)?;
        println!(
            "License OK: {} (plan {}, expires {})",
            info.license_id, info.plan, info.expires_at
        );
    }

    let provider = EastmoneyProvider::new(config.retry_policy());
    let hub = DataHub::new(&provider, CacheStore::new(cache_dir), config);

    match run_screen(&hub, &quota, config, &request, &StdoutProgress) {
        Ok(outcome) => {
            print_outcome(&outcome, config, &quota, debug, show);
            Ok(())
        }
        Err(RunError::AllFailed { outcome }) => {
            println!();
            println!(
                "No usable results this run ({} attempted, {} network / {} data failures).",
                outcome.attempted, outcome.network_failures, outcome.data_failures
            );
            if outcome.budget_exhausted {
                println!("The time budget ran out before any candidate scored.");
            }
            print_errors(&outcome, debug);
            println!("The run was not charged; please retry later.");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn print_outcome(
    outcome: &RunOutcome,
    config: &ScreenerConfig,
    quota: &FileQuotaStore,
    debug: bool,
    show: usize,
) {
    println!();
    println!("=== Screening Result ===");
    if outcome.truncated {
        println!(
            "Note: manual list exceeded {} candidates and was truncated.",
            config.max_universe_size
        );
    }
    if outcome.budget_exhausted {
        println!("Note: the time budget ran out; remaining candidates were skipped.");
    }
    if outcome.auto_fill_attempted > 0 {
        println!(
            "Note: {} supplemental candidate(s) drawn from the auto pool.",
            outcome.auto_fill_attempted
        );
    }

    println!(
        "Scored {}/{} attempted candidates.",
        outcome.succeeded, outcome.attempted
    );
    println!();
    println!(
        "{:<8} {:<10} {:>7} {:<9} {:<7}",
        "Code", "Name", "Score", "Signal", "Risk"
    );
    println!("{}", "-".repeat(46));
    for result in outcome.top(show) {
        println!(
            "{:<8} {:<10} {:>7.1} {:<9} {:<7}",
            result.code, result.name, result.score, result.signal, result.risk_tag
        );
    }

    if let Some(best) = outcome.results.first() {
        println!();
        println!("Best candidate: {} ({}, {} risk)", best.name, best.signal, best.risk_tag);
        println!("{}", best.explanation);
    }

    print_errors(outcome, debug);

    println!();
    if outcome.charged {
        println!(
            "This run consumed 1 quota unit; {} run(s) left today.",
            quota.remaining()
        );
    } else {
        println!(
            "Fewer than {} candidates scored — the run was not charged.",
            config.min_success_to_charge
        );
    }
}

fn print_errors(outcome: &RunOutcome, debug: bool) {
    if outcome.errors.is_empty() {
        return;
    }
    println!();
    println!(
        "{} candidate(s) skipped for data problems ({} network, {} data).",
        outcome.errors.len(),
        outcome.network_failures,
        outcome.data_failures
    );
    if debug {
        for (code, message) in &outcome.errors {
            println!("  {code}: {message}");
        }
    } else {
        println!("Raw messages hidden; pass --debug to show them.");
    }
}

fn run_pool(cache_dir: &Path, config: &ScreenerConfig, limit: usize) -> Result<()> {
    let provider = EastmoneyProvider::new(config.retry_policy());
    let hub = DataHub::new(&provider, CacheStore::new(cache_dir), config);

    let pool = hub.fetch_auto_pool(limit)?;
    println!("Auto pool ({} candidates, by traded turnover):", pool.len());
    for (i, candidate) in pool.iter().enumerate() {
        println!("{:>3}. {} {}", i + 1, candidate.code, candidate.name);
    }
    Ok(())
}

fn run_quota(state_dir: &Path, config: &ScreenerConfig) -> Result<()> {
    let quota = quota_store(state_dir, config);
    println!(
        "Runs remaining today: {}/{}",
        quota.remaining(),
        config.max_daily_runs
    );
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let mut counts: [(&str, &str, usize, u64); 3] = [
        ("pool", "auto_candidates_", 0, 0),
        ("history", "hist_", 0, 0),
        ("names", "stock_name_map_", 0, 0),
    ];

    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".csv") {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        for slot in counts.iter_mut() {
            if name.starts_with(slot.1) {
                slot.2 += 1;
                slot.3 += size;
            }
        }
    }

    println!("Cache: {}", cache_dir.display());
    println!("{:<10} {:>8} {:>10}", "Kind", "Entries", "Size");
    println!("{}", "-".repeat(30));
    for (kind, _, count, size) in counts {
        println!("{:<10} {:>8} {:>10}", kind, count, format_size(size));
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

// ── license plumbing ────────────────────────────────────────────────

fn license_required() -> bool {
    std::env::var("FACTORLAB_REQUIRE_LICENSE")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn resolve_public_key_path(state_dir: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACTORLAB_PUBLIC_KEY_PATH") {
        let path = PathBuf::from(path.trim());
        if path.exists() {
            return Some(path);
        }
    }
    [
        state_dir.join("license_public.key"),
        PathBuf::from("license_public.key"),
    ]
    .into_iter()
    .find(|p| p.exists())
}

fn resolve_license_path(state_dir: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACTORLAB_LICENSE_PATH") {
        let path = PathBuf::from(path.trim());
        if path.exists() {
            return Some(path);
        }
    }
    let mut candidates = vec![
        PathBuf::from("license.key"),
        state_dir.join("license.key"),
    ];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            candidates.push(parent.join("license.key"));
        }
    }
    candidates.into_iter().find(|p| p.exists())
}

fn enforce_license(state_dir: &Path) -> Result<license::LicenseInfo> {
    let machine = license::machine_code();
    let key_path = resolve_public_key_path(state_dir)
        .context("license_public.key not found; cannot verify the license")?;
    let lic_path = resolve_license_path(state_dir)
        .context("license.key not found; obtain a license file and retry")?;
    license::verify_license_file(&lic_path, &key_path, &machine, Local::now().date_naive())
        .with_context(|| format!("license verification failed (machine code {machine})"))
}

fn run_license(state_dir: &Path, action: LicenseAction) -> Result<()> {
    match action {
        LicenseAction::MachineCode => {
            println!("{}", license::machine_code());
            Ok(())
        }
        LicenseAction::Verify => {
            let info = enforce_license(state_dir)?;
            println!(
                "License OK: {} (plan {}, product {}, expires {})",
                info.license_id, info.plan, info.product, info.expires_at
            );
            Ok(())
        }
        LicenseAction::Keygen => {
            let (signing, public) = license::generate_keypair(state_dir)?;
            println!("Signing key: {}", signing.display());
            println!("Public key:  {}", public.display());
            println!("Ship the public key with the tool; keep the signing key private.");
            Ok(())
        }
        LicenseAction::Issue {
            key,
            id,
            plan,
            expires,
            machine,
            output,
        } => {
            NaiveDate::parse_from_str(&expires, "%Y-%m-%d")
                .context("--expires must be YYYY-MM-DD")?;
            let payload = serde_json::json!({
                "license_id": id,
                "plan": plan,
                "product": license::LICENSE_PRODUCT,
                "expires_at": expires,
                "machine_code": machine,
            });
            let signature = license::sign_payload(&payload, &key)?;
            let file = serde_json::json!({
                "payload": payload,
                "signature": signature,
            });
            std::fs::write(&output, serde_json::to_string_pretty(&file)?)?;
            println!("License written to {}", output.display());
            Ok(())
        }
    }
}
