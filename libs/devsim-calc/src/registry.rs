//! InterpolatorRegistry - compiled interpolators cached by kind and spec

use crate::error::Result;
use crate::interpolators::{Interpolator, InterpolatorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Cache key: kind plus the canonical form of the spec
///
/// Specs that parse as JSON are keyed by their re-serialised form, so two
/// specs differing only in whitespace or key order share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: InterpolatorKind,
    spec: String,
}

impl CacheKey {
    fn new(kind: InterpolatorKind, spec: &str) -> Self {
        let spec = serde_json::from_str::<serde_json::Value>(spec)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| spec.trim().to_string());
        Self { kind, spec }
    }
}

/// Registry of compiled interpolators, scoped to one simulation run
#[derive(Debug, Default)]
pub struct InterpolatorRegistry {
    cache: Mutex<HashMap<CacheKey, Arc<Interpolator>>>,
}

impl InterpolatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled interpolator for `kind` and `spec`
    ///
    /// Random kinds are compiled afresh on every call and never cached.
    pub fn resolve_interpolator(
        &self,
        kind: InterpolatorKind,
        spec: &str,
    ) -> Result<Arc<Interpolator>> {
        if kind.is_random() {
            trace!("Instantiating uncached {} interpolator", kind);
            return Interpolator::compile(kind, spec).map(Arc::new);
        }

        let key = CacheKey::new(kind, spec);
        if let Some(found) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(found));
        }

        // Compile outside the lock; a concurrent miss for the same key keeps the first entry
        let compiled = Arc::new(Interpolator::compile(kind, spec)?);
        let mut cache = self.cache.lock();
        let entry = cache.entry(key).or_insert_with(|| {
            debug!("Compiled {} interpolator", kind);
            compiled
        });
        Ok(Arc::clone(entry))
    }

    /// Resolve a value string of the form `<kind>(<spec>)`
    ///
    /// Returns `None` when the string does not name a known kind.
    pub fn resolve_value_spec(&self, value: &str) -> Option<Result<Arc<Interpolator>>> {
        InterpolatorKind::detect(value).map(|(kind, spec)| self.resolve_interpolator(kind, spec))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}
