//! Piecewise-linear interpolation over the hours of the day

use super::{parse_json, parse_points, InterpolatorKind};
use crate::error::{CalcError, Result};
use rand::Rng;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Ceil,
    Floor,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Float,
    Integer(Rounding),
}

#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    points: Vec<(f64, f64)>,
    return_type: ReturnType,
}

impl LinearInterpolator {
    /// Parse `[[x, y], ...]` or `{"spec": [[x, y], ...], "return": {...}}`
    pub fn parse(spec: &str) -> Result<Self> {
        Self::from_value(InterpolatorKind::TimeLinear, &parse_json(InterpolatorKind::TimeLinear, spec)?)
    }

    /// Like [`parse`](Self::parse), replacing each `random(min, max)` with a fresh sample
    pub fn parse_random(spec: &str) -> Result<Self> {
        let kind = InterpolatorKind::TimeRandomLinear;
        let re = Regex::new(r"random\(\s*([-+0-9.eE]+)\s*,\s*([-+0-9.eE]+)\s*\)")
            .map_err(|e| CalcError::expression(format!("Regex error: {}", e)))?;

        let mut rng = rand::thread_rng();
        let mut failure = None;
        let sampled = re.replace_all(spec, |caps: &regex::Captures<'_>| {
            let bounds = (caps[1].parse::<f64>(), caps[2].parse::<f64>());
            match bounds {
                (Ok(min), Ok(max)) if min <= max => rng.gen_range(min..=max).to_string(),
                _ => {
                    failure = Some(caps[0].to_string());
                    "null".to_string()
                },
            }
        });
        if let Some(bad) = failure {
            return Err(CalcError::invalid_spec(format!("{}: invalid random range '{}'", kind, bad)));
        }

        Self::from_value(kind, &parse_json(kind, &sampled)?)
    }

    fn from_value(kind: InterpolatorKind, value: &Value) -> Result<Self> {
        if value.is_array() {
            return Ok(Self {
                points: parse_points(kind, value)?,
                return_type: ReturnType::Float,
            });
        }

        let points = value
            .get("spec")
            .ok_or_else(|| CalcError::invalid_spec(format!("{}: missing \"spec\" property", kind)))
            .and_then(|spec| parse_points(kind, spec))?;
        let ret = value
            .get("return")
            .ok_or_else(|| CalcError::invalid_spec(format!("{}: missing \"return\" property", kind)))?;

        let return_type = match ret.get("type").and_then(Value::as_str) {
            Some("float") => ReturnType::Float,
            Some("integer") => {
                let rounding = match ret.get("rounding").and_then(Value::as_str) {
                    Some("ceil") => Rounding::Ceil,
                    Some("floor") => Rounding::Floor,
                    Some("round") => Rounding::Round,
                    other => {
                        return Err(CalcError::invalid_spec(format!(
                            "{}: integer return requires rounding ceil, floor or round (got {:?})",
                            kind, other
                        )))
                    },
                };
                ReturnType::Integer(rounding)
            },
            other => {
                return Err(CalcError::invalid_spec(format!(
                    "{}: return type must be \"float\" or \"integer\" (got {:?})",
                    kind, other
                )))
            },
        };

        Ok(Self { points, return_type })
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Raw interpolated value; inputs outside the domain take the edge values
    pub fn interpolate(&self, x: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return 0.0,
        };
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }

        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x >= x0 && x <= x1 {
                if x1 == x0 {
                    return y1;
                }
                return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
            }
        }
        last.1
    }

    pub fn evaluate(&self, hours: f64) -> Value {
        let raw = self.interpolate(hours);
        match self.return_type {
            ReturnType::Float => crate::number_to_json(raw),
            ReturnType::Integer(rounding) => {
                let rounded = match rounding {
                    Rounding::Ceil => raw.ceil(),
                    Rounding::Floor => raw.floor(),
                    Rounding::Round => raw.round(),
                };
                Value::from(rounded as i64)
            },
        }
    }
}
