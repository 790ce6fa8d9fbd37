//! Human-readable duration strings.
//!
//! Accepts `"500ms"`, `"15s"`, `"5m"`, `"1h"`, or a bare number of seconds.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid());
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins
            .trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid());
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .trim()
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| invalid());
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
}
