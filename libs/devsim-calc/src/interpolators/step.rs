//! Step interpolation over the hours of the day

use super::{parse_json, parse_points, InterpolatorKind};
use crate::error::Result;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    /// Take the value of the next point at or after the input
    Before,
    /// Take the value of the last point at or before the input
    After,
}

#[derive(Debug, Clone)]
pub struct StepInterpolator {
    points: Vec<(f64, f64)>,
    direction: StepDirection,
}

impl StepInterpolator {
    pub fn parse(spec: &str, direction: StepDirection) -> Result<Self> {
        let kind = match direction {
            StepDirection::Before => InterpolatorKind::TimeStepBefore,
            StepDirection::After => InterpolatorKind::TimeStepAfter,
        };
        let points = parse_points(kind, &parse_json(kind, spec)?)?;
        Ok(Self { points, direction })
    }

    pub fn evaluate(&self, hours: f64) -> Value {
        let y = match self.direction {
            StepDirection::Before => self
                .points
                .iter()
                .find(|(x, _)| *x >= hours)
                .or(self.points.last()),
            StepDirection::After => self
                .points
                .iter()
                .rev()
                .find(|(x, _)| *x <= hours)
                .or(self.points.first()),
        }
        .map_or(0.0, |(_, y)| *y);

        crate::number_to_json(y)
    }
}
