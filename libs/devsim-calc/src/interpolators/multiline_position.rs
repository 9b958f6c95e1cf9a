//! Position along a polyline travelled at constant speed

use super::{parse_json, InterpolatorKind};
use crate::error::{CalcError, Result};
use serde_json::{json, Value};

const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnits {
    KilometersPerHour,
    MetersPerSecond,
}

#[derive(Debug, Clone)]
pub struct MultilinePositionInterpolator {
    /// `[lon, lat]` pairs
    coordinates: Vec<(f64, f64)>,
    speed_kmh: f64,
    from: f64,
    to: f64,
}

impl MultilinePositionInterpolator {
    /// Parse `{"coordinates": [[lon, lat], ...], "speed": {"value": n, "units": "km/h" | "m/s"},
    /// "time": {"from": h, "to": h}}`
    pub fn parse(spec: &str) -> Result<Self> {
        let kind = InterpolatorKind::MultilinePosition;
        let value = parse_json(kind, spec)?;
        let invalid = |msg: &str| CalcError::invalid_spec(format!("{}: {}", kind, msg));

        let coordinates = value
            .get("coordinates")
            .and_then(Value::as_array)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid("\"coordinates\" must be a non-empty array"))?
            .iter()
            .map(|point| match point.as_array().map(Vec::as_slice) {
                Some([lon, lat]) => lon
                    .as_f64()
                    .zip(lat.as_f64())
                    .ok_or_else(|| invalid("coordinates must be numeric [lon, lat] pairs")),
                _ => Err(invalid("coordinates must be [lon, lat] pairs")),
            })
            .collect::<Result<Vec<_>>>()?;

        let speed = value.get("speed").ok_or_else(|| invalid("missing \"speed\""))?;
        let speed_value = speed
            .get("value")
            .and_then(Value::as_f64)
            .filter(|v| *v >= 0.0)
            .ok_or_else(|| invalid("\"speed.value\" must be a non-negative number"))?;
        let units = match speed.get("units").and_then(Value::as_str) {
            Some("km/h") => SpeedUnits::KilometersPerHour,
            Some("m/s") => SpeedUnits::MetersPerSecond,
            _ => return Err(invalid("\"speed.units\" must be \"km/h\" or \"m/s\"")),
        };
        let speed_kmh = match units {
            SpeedUnits::KilometersPerHour => speed_value,
            SpeedUnits::MetersPerSecond => speed_value * 3.6,
        };

        let time = value.get("time").ok_or_else(|| invalid("missing \"time\""))?;
        let from = time.get("from").and_then(Value::as_f64);
        let to = time.get("to").and_then(Value::as_f64);
        let (from, to) = match (from, to) {
            (Some(from), Some(to)) if (0.0..=24.0).contains(&from) && from <= to && to <= 24.0 => {
                (from, to)
            },
            _ => return Err(invalid("\"time\" must hold \"from\" <= \"to\" within 0..24")),
        };

        Ok(Self {
            coordinates,
            speed_kmh,
            from,
            to,
        })
    }

    /// Distance travelled in kilometers at the given decimal hour
    pub fn travelled_km(&self, hours: f64) -> f64 {
        if hours <= self.from {
            return 0.0;
        }
        (hours.min(self.to) - self.from) * self.speed_kmh
    }

    pub fn position(&self, hours: f64) -> (f64, f64) {
        let mut remaining = self.travelled_km(hours);
        for pair in self.coordinates.windows(2) {
            let segment = haversine_km(pair[0], pair[1]);
            if remaining <= segment {
                if segment == 0.0 {
                    return pair[1];
                }
                let t = remaining / segment;
                return (
                    pair[0].0 + (pair[1].0 - pair[0].0) * t,
                    pair[0].1 + (pair[1].1 - pair[0].1) * t,
                );
            }
            remaining -= segment;
        }
        self.coordinates.last().copied().unwrap_or_default()
    }

    pub fn evaluate(&self, hours: f64) -> Value {
        let (lon, lat) = self.position(hours);
        json!({
            "type": "Point",
            "coordinates": [lon, lat],
        })
    }
}

/// Great-circle distance between two `[lon, lat]` points
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn line(speed: &str) -> MultilinePositionInterpolator {
        let spec = format!(
            r#"{{"coordinates": [[0,0],[0,1],[1,1]], "speed": {}, "time": {{"from": 8, "to": 20}}}}"#,
            speed
        );
        MultilinePositionInterpolator::parse(&spec).unwrap()
    }

    #[test]
    fn test_before_start_is_first_point() {
        let route = line(r#"{"value": 10, "units": "km/h"}"#);
        assert_eq!(route.position(7.0), (0.0, 0.0));
    }

    #[test]
    fn test_moves_along_first_segment() {
        let route = line(r#"{"value": 10, "units": "km/h"}"#);
        let (lon, lat) = route.position(9.0);
        assert_eq!(lon, 0.0);
        // One degree of latitude is about 111.2 km
        assert!((lat - 10.0 / 111.195).abs() < 1e-3, "lat = {}", lat);
    }

    #[test]
    fn test_beyond_the_line_is_last_point() {
        let route = line(r#"{"value": 100, "units": "m/s"}"#);
        assert_eq!(route.position(19.0), (1.0, 1.0));
        assert_eq!(route.travelled_km(23.0), route.travelled_km(20.0));
    }

    #[test]
    fn test_geojson_output() {
        let route = line(r#"{"value": 10, "units": "km/h"}"#);
        let value = route.evaluate(0.0);
        assert_eq!(value["type"], "Point");
        assert_eq!(value["coordinates"], serde_json::json!([0.0, 0.0]));
    }

    #[test]
    fn test_invalid_units() {
        let spec = r#"{"coordinates": [[0,0]], "speed": {"value": 1, "units": "mph"}, "time": {"from": 0, "to": 1}}"#;
        assert!(MultilinePositionInterpolator::parse(spec).unwrap_err().is_invalid_spec());
    }
}
