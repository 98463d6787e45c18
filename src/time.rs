//! Duration grammar for probe extensions.
//!
//! Probe requests carry their bounds as strings (`timeout=2m`, `period=200ms`).
//! The grammar is a possibly signed sequence of decimal numbers, each with an
//! optional fraction and a unit suffix:
//!
//! - `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`
//! - `"0"` on its own needs no unit
//!
//! # Examples
//!
//! ```
//! use probe_helper::time::parse_duration;
//! use std::time::Duration;
//!
//! assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
//! assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
//! assert!(parse_duration("100ps").is_err());
//! assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use chrono::TimeDelta;
use regex::Regex;

use crate::error::ValidationError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

/// Fraction digits beyond this cannot change a nanosecond count.
const MAX_FRACTION_DIGITS: usize = 18;

fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]*)(?:\.([0-9]*))?([^0-9.]*)").unwrap_or_else(|e| {
            unreachable!("duration component pattern is a valid regex: {e}")
        })
    })
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidDuration {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Parses a possibly negative duration.
///
/// # Errors
///
/// Returns `ValidationError::InvalidDuration` for empty input, a component
/// without digits, a missing or unknown unit, or a value that overflows.
pub fn parse_signed_duration(input: &str) -> Result<TimeDelta, ValidationError> {
    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid(input, "empty duration"));
    }

    let limit = i64::MAX as u128;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let caps = component_regex()
            .captures(rest)
            .ok_or_else(|| invalid(input, "unparsable component"))?;
        let whole = caps.get(1).map_or("", |m| m.as_str());
        let fraction = caps.get(2).map_or("", |m| m.as_str());
        let unit = caps.get(3).map_or("", |m| m.as_str());

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid(input, "expected a number"));
        }
        if unit.is_empty() {
            return Err(invalid(input, "missing unit"));
        }
        let scale = unit_nanos(unit).ok_or_else(|| invalid(input, format!("unknown unit '{unit}'")))?;

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid(input, "value out of range"))?
        };
        let mut nanos = whole_value
            .checked_mul(scale)
            .ok_or_else(|| invalid(input, "value out of range"))?;

        if !fraction.is_empty() {
            let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let numerator: u128 = digits.parse().map_err(|_| invalid(input, "invalid fraction"))?;
            let denominator = 10u128.pow(u32::try_from(digits.len()).unwrap_or(0));
            nanos += numerator * scale / denominator;
        }

        total = total.saturating_add(nanos);
        if total > limit {
            return Err(invalid(input, "value out of range"));
        }

        let consumed = caps.get(0).map_or(0, |m| m.end());
        rest = &rest[consumed..];
    }

    let nanos = i64::try_from(total).map_err(|_| invalid(input, "value out of range"))?;
    let delta = TimeDelta::nanoseconds(nanos);
    Ok(if negative { -delta } else { delta })
}

/// Parses a non-negative duration.
///
/// # Errors
///
/// Returns `ValidationError::InvalidDuration` if the input does not parse or
/// is negative.
pub fn parse_duration(input: &str) -> Result<Duration, ValidationError> {
    let delta = parse_signed_duration(input)?;
    delta
        .to_std()
        .map_err(|_| invalid(input, "duration must not be negative"))
}
