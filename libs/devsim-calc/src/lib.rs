//! devsim-calc - Value computation for the device simulator
//!
//! Provides the interpolator kinds used to produce simulated attribute
//! values, a run-scoped registry caching their compiled form, and a sandboxed
//! expression evaluator for attribute functions.
//!
//! # Example
//!
//! ```rust
//! use devsim_calc::{InterpolatorKind, InterpolatorRegistry};
//! use chrono::{Local, TimeZone};
//!
//! let registry = InterpolatorRegistry::new();
//! let linear = registry
//!     .resolve_interpolator(InterpolatorKind::TimeLinear, "[[0,0],[12,100],[24,0]]")
//!     .unwrap();
//!
//! let noon = Local.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
//! assert_eq!(linear.evaluate(&noon).unwrap(), serde_json::json!(100));
//! ```
//!
//! # Interpolator kinds
//!
//! | Spec prefix | Input | Output |
//! |-------------|-------|--------|
//! | `time-linear-interpolator` | decimal hours | number |
//! | `time-random-linear-interpolator` | decimal hours | number (never cached) |
//! | `time-step-before-interpolator` | decimal hours | number |
//! | `time-step-after-interpolator` | decimal hours | number |
//! | `date-increment-interpolator` | none | ISO-8601 string |
//! | `multiline-position-interpolator` | decimal hours | GeoJSON point |
//! | `text-rotation-interpolator` | date | string |
//! | `attribute-function-interpolator` | fetched attribute values | any |
//!
//! # Expression functions
//!
//! | Function | Signature |
//! |----------|-----------|
//! | `scale` | `scale(value, factor)` |
//! | `clamp` | `clamp(value, min, max)` |
//! | `abs` | `abs(value)` |
//! | `min` / `max` | `min(a, b)` |
//! | `round` | `round(value)` or `round(value, decimals)` |
//! | `sign` | `sign(value)` |
//! | `floor` / `ceil` / `sqrt` | `floor(value)` |
//! | `pow` | `pow(base, exponent)` |

pub mod error;
pub mod evaluator;
pub mod interpolators;
pub mod registry;

// Re-exports for convenience
pub use error::{CalcError, Result};
pub use evaluator::ExpressionEvaluator;
pub use interpolators::{
    decimal_hours, AttributeFunctionInterpolator, AttributeReference, Interpolator,
    InterpolatorKind,
};
pub use registry::InterpolatorRegistry;

/// Convert a float to JSON, emitting integral values as integers
pub fn number_to_json(value: f64) -> serde_json::Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        return serde_json::Value::from(value as i64);
    }
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
}
