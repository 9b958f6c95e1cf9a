//! Monotonically advancing date

use super::{parse_json, InterpolatorKind};
use crate::error::{CalcError, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;

/// Largest accepted step, about 31,700 years; dates themselves end near year 262,000
const MAX_INCREMENT_SECS: f64 = 1e12;

/// Each evaluation advances the stored date by `increment` seconds
/// and returns it as an ISO-8601 UTC string with milliseconds.
#[derive(Debug)]
pub struct DateIncrementInterpolator {
    current: Mutex<DateTime<Utc>>,
    increment: Duration,
}

impl DateIncrementInterpolator {
    /// Parse `{"origin": "now" | <RFC 3339 date>, "increment": <seconds>}`
    pub fn parse(spec: &str) -> Result<Self> {
        let kind = InterpolatorKind::DateIncrement;
        let value = parse_json(kind, spec)?;

        let origin = match value.get("origin").and_then(Value::as_str) {
            Some("now") => Utc::now(),
            Some(date) => DateTime::parse_from_rfc3339(date)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| {
                    CalcError::invalid_spec(format!("{}: invalid origin '{}': {}", kind, date, e))
                })?,
            None => {
                return Err(CalcError::invalid_spec(format!(
                    "{}: \"origin\" must be \"now\" or a date",
                    kind
                )))
            },
        };

        let increment = value
            .get("increment")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                CalcError::invalid_spec(format!("{}: \"increment\" must be a number of seconds", kind))
            })?;
        if !increment.is_finite() || increment.abs() > MAX_INCREMENT_SECS {
            return Err(CalcError::invalid_spec(format!(
                "{}: \"increment\" must be within +/-{} seconds, got {}",
                kind, MAX_INCREMENT_SECS, increment
            )));
        }

        Ok(Self {
            current: Mutex::new(origin),
            increment: Duration::milliseconds((increment * 1000.0).round() as i64),
        })
    }

    /// Fails once the date would leave the supported calendar range
    pub fn evaluate(&self) -> Result<Value> {
        let mut current = self.current.lock();
        let next = current.checked_add_signed(self.increment).ok_or_else(|| {
            CalcError::out_of_range(format!(
                "{}: advancing {} by {} seconds overflows",
                InterpolatorKind::DateIncrement,
                current.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.increment.num_seconds()
            ))
        })?;
        *current = next;
        Ok(Value::String(next.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }
}
