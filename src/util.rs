use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate};
use tracing::warn;

/// Read an environment variable with surrounding quotes removed.
///
/// Compose files tend to pass values like `'10'`, so both quote styles are
/// stripped. Empty values count as absent.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an environment variable, falling back to `default` when it is absent
/// or does not parse.
pub fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env_var(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{name} has invalid value '{raw}', defaulting to {default}");
            default
        }),
    }
}

/// Today's calendar date in local time
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Local calendar date of a unix timestamp
pub fn local_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|utc| utc.with_timezone(&Local).date_naive())
}
