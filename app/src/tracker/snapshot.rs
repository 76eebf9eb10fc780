use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::time::DateTime;
use crate::core::unit::{Euro, KiloWattHours};
use crate::tracker::accumulator::{AccumulatedTotals, ImportWindow, day_key, month_key};

const KEY_SELF_CONSUMPTION: &str = "self_consumption_kwh";
const KEY_FEED_IN: &str = "feed_in_kwh";
const KEY_SAVINGS: &str = "savings_eur";
const KEY_EARNINGS: &str = "earnings_eur";
const KEY_IMPORT: &str = "grid_import_kwh";
const KEY_IMPORT_COST: &str = "grid_import_cost_eur";
const KEY_DAY_WINDOW: &str = "day_window";
const KEY_DAY_IMPORT: &str = "day_import_kwh";
const KEY_DAY_IMPORT_COST: &str = "day_import_cost_eur";
const KEY_MONTH_WINDOW: &str = "month_window";
const KEY_MONTH_IMPORT: &str = "month_import_kwh";
const KEY_MONTH_IMPORT_COST: &str = "month_import_cost_eur";
const KEY_FIRST_SEEN: &str = "first_seen";

/// Flat key/value form of the accumulation state, as stored in the snapshot
/// store. Values are numbers or ISO-8601 date strings.
pub fn encode(totals: &AccumulatedTotals) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();

    map.insert(KEY_SELF_CONSUMPTION.to_string(), totals.self_consumption.0.into());
    map.insert(KEY_FEED_IN.to_string(), totals.exported.0.into());
    map.insert(KEY_SAVINGS.to_string(), totals.savings.0.into());
    map.insert(KEY_EARNINGS.to_string(), totals.earnings.0.into());
    map.insert(KEY_IMPORT.to_string(), totals.import_energy.0.into());
    map.insert(KEY_IMPORT_COST.to_string(), totals.import_cost.0.into());
    map.insert(KEY_DAY_WINDOW.to_string(), totals.import_day.key.clone().into());
    map.insert(KEY_DAY_IMPORT.to_string(), totals.import_day.energy.0.into());
    map.insert(KEY_DAY_IMPORT_COST.to_string(), totals.import_day.cost.0.into());
    map.insert(KEY_MONTH_WINDOW.to_string(), totals.import_month.key.clone().into());
    map.insert(KEY_MONTH_IMPORT.to_string(), totals.import_month.energy.0.into());
    map.insert(KEY_MONTH_IMPORT_COST.to_string(), totals.import_month.cost.0.into());

    if let Some(first_seen) = &totals.first_seen {
        map.insert(KEY_FIRST_SEEN.to_string(), first_seen.to_iso_string().into());
    }

    map
}

/// Rebuilds the accumulation state from a stored snapshot.
///
/// Negative numbers are corrected to zero. Day and month sub-windows whose
/// key no longer matches the current calendar day/month are dropped, their
/// energy already belongs to a finished window.
pub fn decode(map: &BTreeMap<String, Value>, now: DateTime) -> AccumulatedTotals {
    let today = now.date();

    let import_day = decode_window(
        map,
        KEY_DAY_WINDOW,
        KEY_DAY_IMPORT,
        KEY_DAY_IMPORT_COST,
        day_key(today),
    );
    let import_month = decode_window(
        map,
        KEY_MONTH_WINDOW,
        KEY_MONTH_IMPORT,
        KEY_MONTH_IMPORT_COST,
        month_key(today),
    );

    let first_seen = map
        .get(KEY_FIRST_SEEN)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::from_iso(s).ok());

    AccumulatedTotals {
        self_consumption: KiloWattHours(non_negative(map, KEY_SELF_CONSUMPTION)),
        exported: KiloWattHours(non_negative(map, KEY_FEED_IN)),
        savings: Euro(non_negative(map, KEY_SAVINGS)),
        earnings: Euro(non_negative(map, KEY_EARNINGS)),
        import_energy: KiloWattHours(non_negative(map, KEY_IMPORT)),
        import_cost: Euro(non_negative(map, KEY_IMPORT_COST)),
        import_day,
        import_month,
        first_seen,
    }
}

/// Restored totals should not appreciably exceed what the production counter
/// has ever seen. A violation is only flagged, never corrected: a wrong
/// correction would be worse than a visible anomaly.
pub fn is_implausible(totals: &AccumulatedTotals, production_counter: Option<f64>) -> bool {
    let production = match production_counter {
        Some(p) if p > 0.0 => p,
        _ => return false,
    };

    let tracked = totals.self_consumption.0 + totals.exported.0;
    let implausible = tracked > production * 1.05 + 1.0;

    if implausible {
        tracing::warn!(
            "Restored totals implausible: {:.2} kWh tracked vs {:.2} kWh produced, keeping values as-is",
            tracked,
            production,
        );
    }

    implausible
}

fn decode_window(
    map: &BTreeMap<String, Value>,
    window_key: &str,
    energy_key: &str,
    cost_key: &str,
    current: String,
) -> ImportWindow {
    let stored = map.get(window_key).and_then(|v| v.as_str());

    if stored == Some(current.as_str()) {
        ImportWindow {
            key: current,
            energy: KiloWattHours(non_negative(map, energy_key)),
            cost: Euro(non_negative(map, cost_key)),
        }
    } else {
        if let Some(stale) = stored {
            tracing::debug!("Dropping stale import window {} (now {})", stale, current);
        }
        ImportWindow {
            key: current,
            energy: KiloWattHours(0.0),
            cost: Euro(0.0),
        }
    }
}

fn non_negative(map: &BTreeMap<String, Value>, key: &str) -> f64 {
    let value = map.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

    if value < 0.0 {
        tracing::warn!("Snapshot value {} is negative ({}), correcting to 0", key, value);
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::accumulator::{CounterReadings, ResolvedPrices, SavingsAccumulator};
    use crate::tracker::pricing::{PriceQuote, PriceSource};

    fn now() -> DateTime {
        DateTime::from_iso("2026-08-20T12:00:00+02:00").unwrap()
    }

    fn prices() -> ResolvedPrices {
        ResolvedPrices {
            import: PriceQuote {
                rate: 0.30.into(),
                source: PriceSource::Config,
            },
            export: PriceQuote {
                rate: 0.08.into(),
                source: PriceSource::Config,
            },
            reference: None,
        }
    }

    fn populated_totals() -> AccumulatedTotals {
        let mut acc = SavingsAccumulator::new();
        let readings = |p: f64, e: f64, i: f64| CounterReadings {
            production: Some(p),
            export: Some(e),
            import: Some(i),
        };

        acc.update(readings(100.0, 40.0, 500.0), prices(), now());
        acc.update(readings(105.0, 41.0, 504.0), prices(), now());
        acc.totals
    }

    #[test]
    fn test_round_trip_reproduces_totals_exactly() {
        let totals = populated_totals();

        let restored = decode(&encode(&totals), now());

        assert_eq!(restored, totals);
    }

    #[test]
    fn test_negative_values_corrected_to_zero() {
        let mut map = encode(&populated_totals());
        map.insert("savings_eur".to_string(), (-3.5).into());

        let restored = decode(&map, now());

        assert_eq!(restored.savings, Euro(0.0));
        assert_eq!(restored.exported, KiloWattHours(1.0));
    }

    #[test]
    fn test_stale_day_window_dropped_month_kept() {
        let totals = populated_totals();
        let map = encode(&totals);

        //two days later the date differs in any host timezone, the month
        //does not
        let next_day = now().plus_days(2);
        let restored = decode(&map, next_day);

        assert_eq!(restored.import_day.energy, KiloWattHours(0.0));
        assert_eq!(restored.import_day.key, crate::tracker::accumulator::day_key(next_day.date()));
        assert_eq!(restored.import_month.energy, totals.import_month.energy);
        assert_eq!(restored.import_energy, totals.import_energy);
    }

    #[test]
    fn test_missing_keys_restore_to_zero() {
        let restored = decode(&BTreeMap::new(), now());

        assert_eq!(restored.self_consumption, KiloWattHours(0.0));
        assert_eq!(restored.first_seen, None);
    }

    #[test]
    fn test_plausibility_check() {
        let totals = populated_totals();

        //production counter far below tracked totals
        assert!(is_implausible(&totals, Some(2.0)));
        //matching production counter
        assert!(!is_implausible(&totals, Some(105.0)));
        //no production reading, nothing to check against
        assert!(!is_implausible(&totals, None));
    }
}
