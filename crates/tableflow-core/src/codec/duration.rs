//! Compact duration strings: `500ms`, `30s`, `15m`, `1h`, `7d`.
//!
//! Used as a `#[serde(with = ...)]` module for window sizes. Deserialization
//! also accepts a bare integer, read as seconds.

use chrono::Duration;
use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

const UNITS: &[(&str, i64)] = &[
    ("d", 86_400_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
    ("ms", 1),
];

/// Parse `<n><unit>` into a duration. Whitespace between number and unit is
/// allowed.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let unit = unit.trim();

    let value: i64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{text}': expected <number><unit>"))?;

    let millis_per_unit = match unit {
        "" => return Err(format!("invalid duration '{text}': missing unit")),
        other => UNITS
            .iter()
            .find(|(name, _)| *name == other)
            .map(|(_, ms)| *ms)
            .ok_or_else(|| format!("invalid duration '{text}': unknown unit '{other}'"))?,
    };

    value
        .checked_mul(millis_per_unit)
        .and_then(Duration::try_milliseconds)
        .ok_or_else(|| format!("invalid duration '{text}': out of range"))
}

/// Format using the largest unit that divides the duration exactly.
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.num_milliseconds();
    if millis == 0 {
        return "0s".to_string();
    }
    for (unit, per) in UNITS {
        if millis % per == 0 {
            return format!("{}{}", millis / per, unit);
        }
    }
    format!("{millis}ms")
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a duration such as \"15m\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        parse_duration(value).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
        Duration::try_seconds(value).ok_or_else(|| E::custom("duration out of range"))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
        let seconds = i64::try_from(value).map_err(|_| E::custom("duration out of range"))?;
        self.visit_i64(seconds)
    }
}
