use std::collections::HashMap;

use crate::core::time::DateTime;
use crate::core::timeseries::DataPoint;

/// Synchronous read access to the latest known value of a named data point.
/// `None` means the data point is unavailable or was never seen.
pub trait ValueSource {
    fn current(&self, entity_id: &str) -> Option<DataPoint<f64>>;

    fn current_of(&self, entity_id: &Option<String>) -> Option<DataPoint<f64>> {
        entity_id.as_deref().and_then(|id| self.current(id))
    }
}

/// In-memory cache of the latest value per entity, fed from the event stream.
/// All synchronous reads in the accumulation path go against this cache, no
/// I/O happens there.
#[derive(Debug, Default)]
pub struct ValueCache {
    values: HashMap<String, Option<DataPoint<f64>>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, entity_id: &str, value: Option<f64>, timestamp: DateTime) {
        self.values
            .insert(entity_id.to_string(), value.map(|v| DataPoint::new(v, timestamp)));
    }
}

impl ValueSource for ValueCache {
    fn current(&self, entity_id: &str) -> Option<DataPoint<f64>> {
        self.values.get(entity_id).and_then(|v| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_overwrites_cached_value() {
        let mut cache = ValueCache::new();
        let now = DateTime::now();

        cache.update("sensor.price", Some(0.25), now);
        assert_eq!(cache.current("sensor.price").map(|dp| dp.value), Some(0.25));

        cache.update("sensor.price", None, now);
        assert_eq!(cache.current("sensor.price"), None);
    }

    #[test]
    fn test_unknown_entity_is_none() {
        let cache = ValueCache::new();
        assert_eq!(cache.current("sensor.unknown"), None);
    }
}
