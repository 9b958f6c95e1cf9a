//! Interpolator kinds
//!
//! Every interpolator spec string has the shape `<kind-name>(<params>)`.
//! The set of kinds is closed; [`InterpolatorKind::detect`] is the only place
//! that maps a string prefix to a kind.

mod attribute_function;
mod date_increment;
mod linear;
mod multiline_position;
mod step;
mod text_rotation;

pub use attribute_function::{AttributeFunctionInterpolator, AttributeReference};
pub use date_increment::DateIncrementInterpolator;
pub use linear::{LinearInterpolator, ReturnType, Rounding};
pub use multiline_position::{MultilinePositionInterpolator, SpeedUnits};
pub use step::{StepDirection, StepInterpolator};
pub use text_rotation::{TextRotationInterpolator, TextUnits};

use crate::error::{CalcError, Result};
use chrono::{DateTime, Local, Timelike};
use serde_json::Value;
use std::fmt;

/// Interpolator kind, named after its spec prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolatorKind {
    TimeLinear,
    TimeRandomLinear,
    TimeStepBefore,
    TimeStepAfter,
    DateIncrement,
    MultilinePosition,
    TextRotation,
    AttributeFunction,
}

impl InterpolatorKind {
    pub const ALL: [InterpolatorKind; 8] = [
        InterpolatorKind::TimeLinear,
        InterpolatorKind::TimeRandomLinear,
        InterpolatorKind::TimeStepBefore,
        InterpolatorKind::TimeStepAfter,
        InterpolatorKind::DateIncrement,
        InterpolatorKind::MultilinePosition,
        InterpolatorKind::TextRotation,
        InterpolatorKind::AttributeFunction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeLinear => "time-linear-interpolator",
            Self::TimeRandomLinear => "time-random-linear-interpolator",
            Self::TimeStepBefore => "time-step-before-interpolator",
            Self::TimeStepAfter => "time-step-after-interpolator",
            Self::DateIncrement => "date-increment-interpolator",
            Self::MultilinePosition => "multiline-position-interpolator",
            Self::TextRotation => "text-rotation-interpolator",
            Self::AttributeFunction => "attribute-function-interpolator",
        }
    }

    /// Random kinds must be instantiated on every resolution
    pub fn is_random(&self) -> bool {
        matches!(self, Self::TimeRandomLinear)
    }

    /// Detect the kind of a value string and return the parameter spec
    ///
    /// The spec is the text between the first `(` and the final `)`.
    pub fn detect(value: &str) -> Option<(Self, &str)> {
        Self::ALL.into_iter().find_map(|kind| {
            let rest = value.strip_prefix(kind.name())?.strip_prefix('(')?;
            Some((kind, rest.strip_suffix(')').unwrap_or(rest)))
        })
    }

    /// Return the name of a `<name>-interpolator(...)` string whose kind is not known
    pub fn unknown_name(value: &str) -> Option<&str> {
        if Self::detect(value).is_some() {
            return None;
        }
        let open = value.find('(')?;
        let name = &value[..open];
        let looks_like_interpolator = name.ends_with("-interpolator")
            && value.ends_with(')')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        looks_like_interpolator.then_some(name)
    }
}

impl fmt::Display for InterpolatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compiled interpolator
#[derive(Debug)]
pub enum Interpolator {
    Linear(LinearInterpolator),
    Step(StepInterpolator),
    DateIncrement(DateIncrementInterpolator),
    MultilinePosition(MultilinePositionInterpolator),
    TextRotation(TextRotationInterpolator),
    AttributeFunction(AttributeFunctionInterpolator),
}

impl Interpolator {
    /// Compile a parameter spec for the given kind
    pub fn compile(kind: InterpolatorKind, spec: &str) -> Result<Self> {
        let interpolator = match kind {
            InterpolatorKind::TimeLinear => Self::Linear(LinearInterpolator::parse(spec)?),
            InterpolatorKind::TimeRandomLinear => {
                Self::Linear(LinearInterpolator::parse_random(spec)?)
            },
            InterpolatorKind::TimeStepBefore => {
                Self::Step(StepInterpolator::parse(spec, StepDirection::Before)?)
            },
            InterpolatorKind::TimeStepAfter => {
                Self::Step(StepInterpolator::parse(spec, StepDirection::After)?)
            },
            InterpolatorKind::DateIncrement => {
                Self::DateIncrement(DateIncrementInterpolator::parse(spec)?)
            },
            InterpolatorKind::MultilinePosition => {
                Self::MultilinePosition(MultilinePositionInterpolator::parse(spec)?)
            },
            InterpolatorKind::TextRotation => {
                Self::TextRotation(TextRotationInterpolator::parse(spec)?)
            },
            InterpolatorKind::AttributeFunction => {
                Self::AttributeFunction(AttributeFunctionInterpolator::parse(spec)?)
            },
        };
        Ok(interpolator)
    }

    /// Evaluate at the given instant
    ///
    /// Attribute-function interpolators are evaluated without live values here,
    /// which only succeeds for literal specs or reference-free expressions.
    pub fn evaluate(&self, now: &DateTime<Local>) -> Result<Value> {
        match self {
            Self::Linear(i) => Ok(i.evaluate(decimal_hours(now))),
            Self::Step(i) => Ok(i.evaluate(decimal_hours(now))),
            Self::DateIncrement(i) => i.evaluate(),
            Self::MultilinePosition(i) => Ok(i.evaluate(decimal_hours(now))),
            Self::TextRotation(i) => Ok(i.evaluate(now)),
            Self::AttributeFunction(i) => i.evaluate(&Default::default()),
        }
    }

    pub fn as_attribute_function(&self) -> Option<&AttributeFunctionInterpolator> {
        match self {
            Self::AttributeFunction(i) => Some(i),
            _ => None,
        }
    }
}

/// Local time of day as decimal hours in `[0, 24)`
pub fn decimal_hours(now: &DateTime<Local>) -> f64 {
    f64::from(now.hour()) + f64::from(now.minute()) / 60.0 + f64::from(now.second()) / 3600.0
}

/// Parse a JSON spec, reporting failures as invalid spec errors
pub(crate) fn parse_json(kind: InterpolatorKind, spec: &str) -> Result<Value> {
    serde_json::from_str(spec)
        .map_err(|e| CalcError::invalid_spec(format!("{}: spec '{}' is not valid JSON: {}", kind, spec, e)))
}

/// Parse a non-empty `[[x, y], ...]` array of numeric pairs, sorted by x
pub(crate) fn parse_points(kind: InterpolatorKind, value: &Value) -> Result<Vec<(f64, f64)>> {
    let entries = value
        .as_array()
        .ok_or_else(|| CalcError::invalid_spec(format!("{}: expected an array of [x, y] pairs", kind)))?;
    if entries.is_empty() {
        return Err(CalcError::invalid_spec(format!("{}: at least one [x, y] pair is required", kind)));
    }

    let mut points = entries
        .iter()
        .map(|entry| match entry.as_array().map(Vec::as_slice) {
            Some([x, y]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(CalcError::invalid_spec(format!("{}: non-numeric pair {}", kind, entry))),
            },
            _ => Err(CalcError::invalid_spec(format!("{}: {} is not an [x, y] pair", kind, entry))),
        })
        .collect::<Result<Vec<_>>>()?;

    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(points)
}
