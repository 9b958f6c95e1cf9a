//! Text selected by the current calendar unit

use super::{parse_json, InterpolatorKind};
use crate::error::{CalcError, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use rand::seq::SliceRandom;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextUnits {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    /// Day of the week, Sunday = 0
    Days,
    /// Day of the month, 1..=31
    Dates,
    /// Month of the year, January = 0
    Months,
}

impl TextUnits {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "milliseconds" => Some(Self::Milliseconds),
            "seconds" => Some(Self::Seconds),
            "minutes" => Some(Self::Minutes),
            "hours" => Some(Self::Hours),
            "days" => Some(Self::Days),
            "dates" => Some(Self::Dates),
            "months" => Some(Self::Months),
            _ => None,
        }
    }

    pub fn current(&self, now: &DateTime<Local>) -> f64 {
        let value = match self {
            Self::Milliseconds => now.timestamp_subsec_millis() % 1000,
            Self::Seconds => now.second(),
            Self::Minutes => now.minute(),
            Self::Hours => now.hour(),
            Self::Days => now.weekday().num_days_from_sunday(),
            Self::Dates => now.day(),
            Self::Months => now.month0(),
        };
        f64::from(value)
    }
}

#[derive(Debug, Clone)]
pub struct TextRotationInterpolator {
    units: TextUnits,
    /// Sorted by threshold; every entry holds at least one candidate text
    entries: Vec<(f64, Vec<String>)>,
}

impl TextRotationInterpolator {
    /// Parse `{"units": <unit>, "text": [[threshold, "text" | ["a", "b"]], ...]}`
    pub fn parse(spec: &str) -> Result<Self> {
        let kind = InterpolatorKind::TextRotation;
        let value = parse_json(kind, spec)?;
        let invalid = |msg: String| CalcError::invalid_spec(format!("{}: {}", kind, msg));

        let units = value
            .get("units")
            .and_then(Value::as_str)
            .and_then(TextUnits::parse)
            .ok_or_else(|| invalid("\"units\" must be one of milliseconds, seconds, minutes, hours, days, dates or months".to_string()))?;

        let text = value
            .get("text")
            .and_then(Value::as_array)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("\"text\" must be a non-empty array".to_string()))?;

        let mut entries = text
            .iter()
            .map(|entry| {
                let (threshold, candidates) = match entry.as_array().map(Vec::as_slice) {
                    Some([threshold, candidates]) => (threshold, candidates),
                    _ => return Err(invalid(format!("{} is not a [threshold, text] pair", entry))),
                };
                let threshold = threshold
                    .as_f64()
                    .ok_or_else(|| invalid(format!("threshold {} is not a number", threshold)))?;
                let candidates = match candidates {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) if !items.is_empty() => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid(format!("{} is not a text", item)))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => return Err(invalid(format!("{} is not a text or list of texts", other))),
                };
                Ok((threshold, candidates))
            })
            .collect::<Result<Vec<_>>>()?;

        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { units, entries })
    }

    /// Candidates of the entry with the greatest threshold not above `unit_value`
    ///
    /// Values below the first threshold wrap around to the last entry.
    pub fn candidates(&self, unit_value: f64) -> &[String] {
        self.entries
            .iter()
            .rev()
            .find(|(threshold, _)| *threshold <= unit_value)
            .or(self.entries.last())
            .map(|(_, candidates)| candidates.as_slice())
            .unwrap_or_default()
    }

    pub fn evaluate(&self, now: &DateTime<Local>) -> Value {
        let candidates = self.candidates(self.units.current(now));
        candidates
            .choose(&mut rand::thread_rng())
            .map_or(Value::Null, |text| Value::String(text.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_selects_by_threshold() {
        let rotation = TextRotationInterpolator::parse(
            r#"{"units": "seconds", "text": [[0, "PENDING"], [15, "REQUESTED"], [30, ["SHIPPED", "DELIVERED"]], [45, "REJECTED"]]}"#,
        )
        .unwrap();

        assert_eq!(rotation.candidates(10.0), ["PENDING"]);
        assert_eq!(rotation.candidates(15.0), ["REQUESTED"]);
        assert_eq!(rotation.candidates(59.0), ["REJECTED"]);

        let now = Local.with_ymd_and_hms(2026, 5, 4, 10, 20, 35).unwrap();
        let picked = rotation.evaluate(&now);
        assert!(picked == json!("SHIPPED") || picked == json!("DELIVERED"));
    }

    #[test]
    fn test_wraps_to_last_entry() {
        let rotation =
            TextRotationInterpolator::parse(r#"{"units": "hours", "text": [[8, "day"], [20, "night"]]}"#)
                .unwrap();
        assert_eq!(rotation.candidates(3.0), ["night"]);
    }

    #[test]
    fn test_unit_values() {
        // 2026-05-03 is a Sunday
        let now = Local.with_ymd_and_hms(2026, 5, 3, 10, 20, 35).unwrap();
        assert_eq!(TextUnits::Days.current(&now), 0.0);
        assert_eq!(TextUnits::Dates.current(&now), 3.0);
        assert_eq!(TextUnits::Months.current(&now), 4.0);
        assert_eq!(TextUnits::Minutes.current(&now), 20.0);
    }

    #[test]
    fn test_invalid_spec() {
        assert!(TextRotationInterpolator::parse(r#"{"units": "weeks", "text": [[0, "a"]]}"#).is_err());
        assert!(TextRotationInterpolator::parse(r#"{"units": "hours", "text": []}"#).is_err());
        assert!(TextRotationInterpolator::parse(r#"{"units": "hours", "text": [[0, 1]]}"#).is_err());
    }
}
