//! Human duration strings for CLI flags (`30s`, `500ms`, `1m30s`, or bare seconds).

use std::{error::Error, fmt, time::Duration};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DurationParseError {
    Empty,
    Invalid(String),
    UnknownUnit(String),
    Overflow(String),
}

impl fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationParseError::Empty => write!(f, "duration must not be empty"),
            DurationParseError::Invalid(input) => write!(f, "invalid duration: {input}"),
            DurationParseError::UnknownUnit(unit) => write!(f, "unknown duration unit {unit} (expected ms, s, m or h)"),
            DurationParseError::Overflow(input) => write!(f, "duration {input} is too large"),
        }
    }
}

impl Error for DurationParseError {}

pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(DurationParseError::Invalid(input.to_string()));
        }
        let value = rest[..digits]
            .parse::<u64>()
            .map_err(|_| DurationParseError::Overflow(input.to_string()))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "" => return Err(DurationParseError::Invalid(input.to_string())),
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
    }
    Ok(total)
}
