//! Time-filter parsing for the Event Journal's `since`/`until` query
//! arguments: accepts ISO-8601 timestamps as well as the relative forms the
//! CLI exposes (`"1h"`, `"24h"`, `"7d"`, `"2 days ago"`).

use chrono::{DateTime, Duration, Utc};

/// Parses `input` as either an ISO-8601 timestamp or a relative time-form,
/// resolving the relative form against `Utc::now()`.
pub fn parse_time_filter(input: &str) -> anyhow::Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let duration = parse_relative_duration(trimmed)
        .ok_or_else(|| anyhow::anyhow!("invalid time filter {trimmed:?}: not an ISO timestamp or a relative form like \"1h\", \"24h\", \"7d\", \"2 days ago\""))?;
    Ok(Utc::now() - duration)
}

fn parse_relative_duration(input: &str) -> Option<Duration> {
    let lower = input.to_ascii_lowercase();
    if let Some(rest) = lower.strip_suffix("ago") {
        let rest = rest.trim();
        let (count, unit) = rest.split_once(' ')?;
        return duration_from_unit(count.trim().parse().ok()?, unit.trim());
    }
    let split_at = lower.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = lower.split_at(split_at);
    duration_from_unit(count.parse().ok()?, unit)
}

fn duration_from_unit(count: i64, unit: &str) -> Option<Duration> {
    let unit = unit.trim_end_matches('s');
    match unit {
        "h" | "hour" | "hr" => Some(Duration::hours(count)),
        "d" | "day" => Some(Duration::days(count)),
        "m" | "min" | "minute" => Some(Duration::minutes(count)),
        "w" | "week" => Some(Duration::weeks(count)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_hour_and_day_forms() {
        let now = Utc::now();
        let one_hour_ago = parse_time_filter("1h").expect("parse 1h");
        assert!((now - one_hour_ago - Duration::hours(1)).num_seconds().abs() < 2);

        let week_ago = parse_time_filter("7d").expect("parse 7d");
        assert!((now - week_ago - Duration::days(7)).num_seconds().abs() < 2);
    }

    #[test]
    fn parses_spelled_out_ago_form() {
        let now = Utc::now();
        let two_days_ago = parse_time_filter("2 days ago").expect("parse relative");
        assert!((now - two_days_ago - Duration::days(2)).num_seconds().abs() < 2);
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_time_filter("2026-01-01T00:00:00Z").expect("parse rfc3339");
        assert_eq!(parsed.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time_filter("whenever").is_err());
    }
}
