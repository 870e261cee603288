//! A ticker/name pair under evaluation in one screening run.

use serde::{Deserialize, Serialize};

/// One candidate in a screening run. `code` is always exactly six ASCII
/// digits; `name` is the cleaned display name, falling back to the code
/// itself when no name could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub name: String,
}

impl Candidate {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        let code = code.into();
        let name = name.into();
        let name = if name.is_empty() { code.clone() } else { name };
        Self { code, name }
    }
}

/// Strip embedded whitespace from a display name. Some quote feeds pad
/// Chinese names with spaces (e.g. "五 粮 液"); a literal "nan" comes from
/// serialized missing values and is treated as absent.
pub fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return String::new();
    }
    trimmed.split_whitespace().collect()
}
