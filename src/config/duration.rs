//! # Duration Parsing
//!
//! Parses Kubernetes duration strings used for refresh intervals and timeouts.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Upper bound for any configured interval or timeout
const MAX_DURATION_SECS: u64 = 365 * 86400;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").expect("duration regex is valid")
});

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let interval_lower = duration_trimmed.to_lowercase();
    let captures = DURATION_REGEX.captures(&interval_lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '5m', '1h')",
            duration_trimmed
        )
    })?;

    let number: u64 = captures["number"].parse().map_err(|e| {
        anyhow::anyhow!("Invalid duration number in '{}': {}", duration_trimmed, e)
    })?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{}'",
            duration_trimmed
        ));
    }

    let multiplier: u64 = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{}' in duration '{}'. Expected: s, m, h, or d",
                unit,
                duration_trimmed
            ));
        }
    };

    let seconds = number
        .checked_mul(multiplier)
        .filter(|seconds| *seconds <= MAX_DURATION_SECS)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Duration '{}' is too large (maximum {}d)",
                duration_trimmed,
                MAX_DURATION_SECS / 86400
            )
        })?;

    Ok(Duration::from_secs(seconds))
}

/// Render a duration back into the shortest Kubernetes duration string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs != 0 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
