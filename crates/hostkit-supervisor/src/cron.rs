//! Cron-expression-to-systemd-`OnCalendar` translation, backing the
//! Scheduled-Task and Worker managers (which hand `OnCalendar=` straight to
//! [`crate::render_unit`] for a [`crate::UnitKind::CronTimer`] unit).
//!
//! Reimplements the original host agent's `cron_to_oncalendar` field-by-field,
//! not by transliteration: standard shortcuts (`@daily`, `@hourly`, ...) map
//! to a fixed calendar string, already-`OnCalendar`-shaped input passes
//! through unchanged, and otherwise exactly five whitespace-separated fields
//! (minute hour day-of-month month day-of-week) are required.

use hostkit_types::{ErrorCode, HostKitError};

fn shortcut(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("*-01-01 00:00:00"),
        "@monthly" => Some("*-*-01 00:00:00"),
        "@weekly" => Some("Sun *-*-* 00:00:00"),
        "@daily" | "@midnight" => Some("*-*-* 00:00:00"),
        "@hourly" => Some("*-*-* *:00:00"),
        _ => None,
    }
}

/// `true` if `expr` already looks like an `OnCalendar=` value rather than a
/// cron expression: it starts with a wildcard or four-digit year, or it
/// names a weekday.
fn looks_like_on_calendar(expr: &str) -> bool {
    let starts_like_calendar = expr.starts_with('*')
        || expr
            .split_once('-')
            .map(|(head, _)| head.len() == 4 && head.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
    if starts_like_calendar {
        return true;
    }
    const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    WEEKDAYS.iter().any(|d| expr.contains(d))
}

fn dow_name(field: &str) -> String {
    match field {
        "0" | "7" => "Sun".to_string(),
        "1" => "Mon".to_string(),
        "2" => "Tue".to_string(),
        "3" => "Wed".to_string(),
        "4" => "Thu".to_string(),
        "5" => "Fri".to_string(),
        "6" => "Sat".to_string(),
        other => other.to_string(),
    }
}

/// `*` stays `*`; `*/n` becomes `00/n`; a field already containing `-` or
/// `,` passes through unchanged (a range or list, not a single value); a
/// bare numeric value is zero-padded to two digits.
fn convert_field(field: &str) -> String {
    if field == "*" {
        return "*".to_string();
    }
    if let Some(step) = field.strip_prefix("*/") {
        return format!("00/{step}");
    }
    if field.contains('-') || field.contains(',') {
        return field.to_string();
    }
    if field.chars().all(|c| c.is_ascii_digit()) {
        format!("{field:0>2}")
    } else {
        field.to_string()
    }
}

fn invalid(expr: &str) -> HostKitError {
    HostKitError::new(
        ErrorCode::InvalidCronExpression,
        format!("not a valid cron expression: {expr:?}"),
    )
    .with_suggestion("expected a shortcut (@daily, @hourly, ...) or 5 fields: minute hour dom month dow")
}

/// Translates a cron expression (shortcut or 5-field form) into a systemd
/// `OnCalendar=` value.
pub fn cron_to_on_calendar(expr: &str) -> Result<String, HostKitError> {
    let trimmed = expr.trim();
    if let Some(calendar) = shortcut(&trimmed.to_ascii_lowercase()) {
        return Ok(calendar.to_string());
    }
    if looks_like_on_calendar(trimmed) {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let [minute, hour, dom, month, dow]: [&str; 5] = fields
        .try_into()
        .map_err(|_| invalid(expr))?;

    let dow_prefix = if dow == "*" {
        String::new()
    } else if dow.contains(',') || dow.contains('-') {
        let names: Vec<String> = dow.replace('-', ",").split(',').map(dow_name).collect();
        format!("{} ", names.join(","))
    } else {
        format!("{} ", dow_name(dow))
    };

    let date_part = format!("{}-{}", convert_field(month), convert_field(dom));
    let time_part = format!("{}:{}:00", convert_field(hour), convert_field(minute));

    Ok(format!("{dow_prefix}*-{date_part} {time_part}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nightly_schedule_translates_to_fixed_hour() {
        assert_eq!(cron_to_on_calendar("0 3 * * *").unwrap(), "*-*-* 03:00:00");
    }

    #[test]
    fn daily_shortcut_translates_to_midnight() {
        assert_eq!(cron_to_on_calendar("@daily").unwrap(), "*-*-* 00:00:00");
    }

    #[test]
    fn step_value_minute_field_translates_to_slash_syntax() {
        assert_eq!(
            cron_to_on_calendar("*/2 * * * *").unwrap(),
            "*-*-* *:00/2:00"
        );
    }

    #[test]
    fn hourly_shortcut_translates() {
        assert_eq!(cron_to_on_calendar("@hourly").unwrap(), "*-*-* *:00:00");
    }

    #[test]
    fn weekly_shortcut_includes_weekday() {
        assert_eq!(cron_to_on_calendar("@weekly").unwrap(), "Sun *-*-* 00:00:00");
    }

    #[test]
    fn single_day_of_week_field_is_named() {
        assert_eq!(
            cron_to_on_calendar("30 9 * * 1").unwrap(),
            "Mon *-*-* 09:30:00"
        );
    }

    #[test]
    fn already_on_calendar_input_passes_through() {
        assert_eq!(
            cron_to_on_calendar("*-*-* 04:30:00").unwrap(),
            "*-*-* 04:30:00"
        );
    }

    #[test]
    fn four_field_input_is_rejected() {
        let err = cron_to_on_calendar("0 3 * *").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCronExpression);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let err = cron_to_on_calendar("not a cron expression").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCronExpression);
    }
}
