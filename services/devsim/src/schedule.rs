//! Update schedules
//!
//! A schedule is either the literal `once` or a cron-like recurrence with
//! five fields (`minute hour day month weekday`) or six fields with a leading
//! seconds field. Each field is a number, `*` or `*/N`.

use crate::error::{Result, SimulatorError};
use chrono::{DateTime, Duration, Local};
use std::fmt;
use std::str::FromStr;

/// Delay between the creation of a one-shot job and its firing
pub const ONCE_DELAY_MS: i64 = 500;

/// Field bounds in cron-crate order: seconds, minutes, hours, day of month, month, day of week
const FIELD_BOUNDS: [(u32, u32, &str); 6] = [
    (0, 59, "second"),
    (0, 59, "minute"),
    (0, 23, "hour"),
    (1, 31, "day of month"),
    (1, 12, "month"),
    (0, 7, "day of week"),
];

#[derive(Clone)]
pub enum Schedule {
    Once,
    Recurring {
        source: String,
        cron: Box<cron::Schedule>,
    },
}

impl Schedule {
    pub fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }

    /// Next firing strictly after `after`
    ///
    /// One-shot schedules fire [`ONCE_DELAY_MS`] after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Once => Some(*after + Duration::milliseconds(ONCE_DELAY_MS)),
            Self::Recurring { cron, .. } => cron.after(after).next(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Once => "once",
            Self::Recurring { source, .. } => source,
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schedule({})", self.as_str())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schedule {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self> {
        let source = s.trim();
        if source == "once" {
            return Ok(Self::Once);
        }

        let expression = to_cron_expression(source)?;
        let cron = cron::Schedule::from_str(&expression).map_err(|e| {
            SimulatorError::config_not_valid(format!("invalid schedule '{}': {}", source, e))
        })?;

        Ok(Self::Recurring {
            source: source.to_string(),
            cron: Box::new(cron),
        })
    }
}

/// Translate a 5- or 6-field schedule into the cron crate's 6-field syntax
fn to_cron_expression(source: &str) -> Result<String> {
    let invalid = |reason: String| {
        SimulatorError::config_not_valid(format!("invalid schedule '{}': {}", source, reason))
    };

    let mut fields: Vec<&str> = source.split_whitespace().collect();
    match fields.len() {
        5 => fields.insert(0, "0"),
        6 => {},
        n => return Err(invalid(format!("expected 5 or 6 fields, found {}", n))),
    }

    fields
        .iter()
        .zip(FIELD_BOUNDS)
        .map(|(field, (min, max, name))| {
            let is_weekday = name == "day of week";
            if *field == "*" {
                return Ok("*".to_string());
            }
            if let Some(step) = field.strip_prefix("*/") {
                return match step.parse::<u32>() {
                    // The cron crate anchors steps at the field minimum
                    Ok(step) if step > 0 => {
                        Ok(format!("{}/{}", if is_weekday { 1 } else { min }, step))
                    },
                    _ => Err(invalid(format!("invalid {} step '{}'", name, field))),
                };
            }
            match field.parse::<u32>() {
                Ok(value) if (min..=max).contains(&value) => {
                    // Sunday is 0 or 7 here and 1 in the cron crate
                    Ok(if is_weekday { (value % 7 + 1).to_string() } else { value.to_string() })
                },
                _ => Err(invalid(format!("invalid {} '{}'", name, field))),
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(|fields| fields.join(" "))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_once() {
        let schedule: Schedule = "once".parse().unwrap();
        assert!(schedule.is_once());
        let now = Local::now();
        assert_eq!(schedule.next_after(&now).unwrap() - now, Duration::milliseconds(500));
    }

    #[test]
    fn test_five_field_expressions() {
        assert_eq!(to_cron_expression("*/5 * * * *").unwrap(), "0 0/5 * * * *");
        assert_eq!(to_cron_expression("30 8 1 1 0").unwrap(), "0 30 8 1 1 1");
        assert_eq!(to_cron_expression("0 0 * * 7").unwrap(), "0 0 0 * * 1");
    }

    #[test]
    fn test_six_field_expression_with_seconds() {
        assert_eq!(to_cron_expression("*/1 * * * * *").unwrap(), "0/1 * * * * *");
        let schedule: Schedule = "*/1 * * * * *".parse().unwrap();
        let now = Local.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = schedule.next_after(&now).unwrap();
        assert_eq!(next.second(), 1);
    }

    #[test]
    fn test_every_five_minutes_fires_on_the_boundary() {
        let schedule: Schedule = "*/5 * * * *".parse().unwrap();
        let now = Local.with_ymd_and_hms(2026, 1, 1, 10, 2, 13).unwrap();
        let next = schedule.next_after(&now).unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (10, 5, 0));
    }

    #[test]
    fn test_invalid_schedules() {
        for bad in ["", "every minute", "* * * *", "61 * * * *", "*/0 * * * *", "* * * 13 *", "1-5 * * * *"] {
            let err = bad.parse::<Schedule>().unwrap_err();
            assert!(err.is_fatal(), "'{}' should be rejected", bad);
        }
    }
}
