//! FactorLab Runner — run orchestration, daily quota, licensing.
//!
//! Sits between the CLI and factorlab-core: drives a bounded screening
//! batch, supplements under-filled manual pools, and gates runs against a
//! daily quota. The license module is independent of the run pipeline.

pub mod license;
pub mod quota;
pub mod runner;

pub use license::{machine_code, verify_license_file, LicenseError, LicenseInfo};
pub use quota::{FileQuotaStore, QuotaStore};
pub use runner::{
    run_screen, RunError, RunOutcome, ScreenProgress, ScreenRequest, SilentProgress,
    StdoutProgress,
};
