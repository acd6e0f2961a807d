//! Environment identifier validation and generation.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::catalog::EnvironmentTrack;

/// Maximum identifier length.
pub const MAX_ID_LEN: usize = 63;

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,62}$").unwrap());

/// Whether `id` is usable as an environment identifier.
///
/// Identifiers start with an alphanumeric character and may contain
/// letters, digits, `.`, `_` and `-`, up to 63 characters. This keeps them
/// safe as file names and as URL path segments.
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Generate a fresh identifier: `{track}-{YYYYMMDDHHMMSS}-{8 hex chars}`.
pub fn generate_id(track: EnvironmentTrack) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        track.as_str(),
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}
