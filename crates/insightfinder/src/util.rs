// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for InsightFinder configuration values.

use std::time::Duration;

/// Joins an API path onto a base url, adding `https://` when no scheme is given.
///
/// # Examples
///
/// ```
/// use insightfinder::util::form_complete_url;
///
/// assert_eq!(
///     form_complete_url("app.insightfinder.com", "/api/v2/metric-data-receive"),
///     Some("https://app.insightfinder.com/api/v2/metric-data-receive".to_string())
/// );
/// assert_eq!(form_complete_url("   ", "/api"), None);
/// ```
pub fn form_complete_url(base: &str, path: &str) -> Option<String> {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        tracing::error!("InsightFinder url is empty");
        return None;
    }

    let base = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// Parses a duration written as seconds (`"300"`), or with an `s`, `m` or `h`
/// suffix (`"300s"`, `"5m"`, `"1h"`).
///
/// Returns `None` for anything else, including negative or fractional values.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use insightfinder::util::parse_duration_secs;
///
/// assert_eq!(parse_duration_secs("5m"), Some(Duration::from_secs(300)));
/// assert_eq!(parse_duration_secs("90"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration_secs("fast"), None);
/// ```
pub fn parse_duration_secs(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last()? {
        's' | 'S' => (&trimmed[..trimmed.len() - 1], 1),
        'm' | 'M' => (&trimmed[..trimmed.len() - 1], 60),
        'h' | 'H' => (&trimmed[..trimmed.len() - 1], 3600),
        _ => (trimmed, 1),
    };

    match digits.trim().parse::<u64>() {
        Ok(n) => n.checked_mul(multiplier).map(Duration::from_secs),
        Err(_) => {
            tracing::error!("Could not parse duration '{}'", trimmed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_complete_url() {
        assert_eq!(
            form_complete_url("https://stg.insightfinder.com", "/api/v2/metric-data-receive"),
            Some("https://stg.insightfinder.com/api/v2/metric-data-receive".to_string())
        );
        assert_eq!(
            form_complete_url("http://10.0.0.1:8080/", "api/v2/x"),
            Some("http://10.0.0.1:8080/api/v2/x".to_string())
        );
        assert_eq!(
            form_complete_url("  insightfinder.local/base/  ", "/api"),
            Some("https://insightfinder.local/base/api".to_string())
        );
        assert_eq!(form_complete_url("", "/api"), None);
    }

    #[test]
    fn test_parse_duration_secs_valid() {
        assert_eq!(parse_duration_secs("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration_secs("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration_secs(" 5m "), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_secs("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_secs("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_secs_invalid() {
        assert_eq!(parse_duration_secs(""), None);
        assert_eq!(parse_duration_secs("m"), None);
        assert_eq!(parse_duration_secs("-5"), None);
        assert_eq!(parse_duration_secs("1.5m"), None);
        assert_eq!(parse_duration_secs("ten"), None);
    }
}
