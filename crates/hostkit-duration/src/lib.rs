//! Human-readable duration and byte-size parsing with serde codecs.
//!
//! HostKit configuration files and CLI flags accept durations like `"30s"`,
//! `"5m"`, `"2h"` and byte sizes like `"512mb"`, `"1gb"`. This crate wraps
//! [`humantime`] for durations and implements a small byte-size parser in
//! the same style, plus `serde::{Serialize, Deserialize}` helper modules so
//! config structs can use plain `std::time::Duration` / `u64` fields.

use std::time::Duration;

/// Parses a human duration string (`"30s"`, `"5m"`, `"1h30m"`) into a [`Duration`].
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    humantime::parse_duration(input.trim()).map_err(|source| DurationParseError {
        input: input.to_string(),
        source,
    })
}

/// Formats a [`Duration`] the same way HostKit config files expect it written back.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

#[derive(Debug, thiserror::Error)]
#[error("invalid duration {input:?}: {source}")]
pub struct DurationParseError {
    input: String,
    #[source]
    source: humantime::DurationError,
}

/// Parses a byte-size string (`"512mb"`, `"1gb"`, `"2048"`) into a byte count.
///
/// Bare integers are bytes. Recognized suffixes are `kb`, `mb`, `gb`, `tb`
/// (decimal, 1000-based, matching how HostKit reports disk/memory limits
/// elsewhere) case-insensitively, with or without a separating space.
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    let err = || SizeParseError {
        input: input.to_string(),
    };

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number_part, suffix) = trimmed.split_at(split_at);
    if number_part.is_empty() {
        return Err(err());
    }
    let number: f64 = number_part.parse().map_err(|_| err())?;
    let multiplier: f64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1_000.0,
        "mb" => 1_000_000.0,
        "gb" => 1_000_000_000.0,
        "tb" => 1_000_000_000_000.0,
        _ => return Err(err()),
    };
    if number < 0.0 {
        return Err(err());
    }
    Ok((number * multiplier).round() as u64)
}

/// Formats a byte count using the largest whole suffix that divides cleanly,
/// falling back to plain bytes.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[(&str, u64)] = &[
        ("tb", 1_000_000_000_000),
        ("gb", 1_000_000_000),
        ("mb", 1_000_000),
        ("kb", 1_000),
    ];
    for (suffix, scale) in UNITS {
        if bytes >= *scale && bytes % *scale == 0 {
            return format!("{}{suffix}", bytes / scale);
        }
    }
    format!("{bytes}b")
}

#[derive(Debug, thiserror::Error)]
#[error("invalid size {input:?}")]
pub struct SizeParseError {
    input: String,
}

/// Serde (de)serialization helpers for `Duration` fields stored as human strings.
///
/// Usage: `#[serde(with = "hostkit_duration::serde_duration")] timeout: Duration`
pub mod serde_duration {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        super::format_duration(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// As [`serde_duration`] but for `Option<Duration>` fields.
pub mod serde_duration_opt {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::format_duration(*d).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(raw) => super::parse_duration(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Serde (de)serialization helpers for byte counts stored as human size strings.
pub mod serde_size {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        super::format_size(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_size(&raw).map_err(serde::de::Error::custom)
    }
}
