//! Shared utility functions

/// Minimum interval to prevent tight loops (10 seconds)
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Unified duration parser - supports "30s", "5m", "2h", "1d", "1w" or plain seconds
pub fn parse_duration(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    // Try to parse as pure number (seconds)
    if let Ok(secs) = s.parse::<u64>() {
        return Some(secs);
    }

    let (num_str, unit) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600u64)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400u64)
    } else if let Some(n) = s.strip_suffix('w') {
        (n, 604800u64)
    } else {
        return None;
    };

    num_str.parse::<u64>().ok().and_then(|n| n.checked_mul(unit))
}

/// Parse interval string like "30s", "5m", "2h" into seconds.
/// Enforces a minimum of 10 seconds.
pub fn parse_interval_str(s: &str) -> tripwire::Result<u64> {
    let secs = parse_duration(s).ok_or_else(|| {
        tripwire::TripwireError::ConfigError(format!(
            "Invalid interval '{}'. Use format like 30s, 5m, 2h, 1d, 1w", s
        ))
    })?;

    if secs < MIN_INTERVAL_SECS {
        return Err(tripwire::TripwireError::ConfigError(format!(
            "Interval {}s is too short. Minimum is {}s.",
            secs, MIN_INTERVAL_SECS
        )));
    }

    Ok(secs)
}

/// Format seconds as human-readable interval (e.g., "5m", "2h", "1d")
pub fn format_interval(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else if secs >= 604800 && secs % 604800 == 0 {
        format!("{}w", secs / 604800)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Host part of a URL, used as the default target name
pub fn extract_domain(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Validate a target URL: must parse and use http or https
pub fn validate_url(input: &str) -> tripwire::Result<String> {
    let parsed = url::Url::parse(input.trim())?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(tripwire::TripwireError::ConfigError(format!(
            "Unsupported URL scheme '{}'. Use http:// or https://",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30"), Some(30));
        assert_eq!(parse_duration("30s"), Some(30));
        assert_eq!(parse_duration("5m"), Some(300));
        assert_eq!(parse_duration("2H"), Some(7200));
        assert_eq!(parse_duration("1w"), Some(604800));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_interval_minimum() {
        assert!(parse_interval_str("5s").is_err());
        assert_eq!(parse_interval_str("10s").unwrap(), 10);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(45), "45s");
        assert_eq!(format_interval(300), "5m");
        assert_eq!(format_interval(7200), "2h");
        assert_eq!(format_interval(1209600), "2w");
        assert_eq!(format_interval(172800), "2d");
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("https://example.com").unwrap(), "https://example.com/");
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert_eq!(extract_domain("https://news.example.com/a").as_deref(), Some("news.example.com"));
    }
}
