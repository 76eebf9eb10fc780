use crate::core::time::DateTime;
use crate::core::unit::{Euro, EuroPerKiloWattHour, KiloWattHours};
use crate::tracker::pricing::PriceQuote;

//a single update above this is implausible for one counter interval and is
//treated like a counter reset
const MAX_DELTA_KWH: f64 = 50.0;

/// Latest raw cumulative counter values, as far as they are known this cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterReadings {
    pub production: Option<f64>,
    pub export: Option<f64>,
    pub import: Option<f64>,
}

/// Prices in effect at the moment the deltas are observed. `reference` is the
/// day-ahead market price used for the spot-vs-fixed comparison when a feed is
/// configured.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPrices {
    pub import: PriceQuote,
    pub export: PriceQuote,
    pub reference: Option<EuroPerKiloWattHour>,
}

/// Calendar-scoped import sub-total. The key identifies the day or month the
/// window belongs to; a key mismatch on update resets the window.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportWindow {
    pub key: String,
    pub energy: KiloWattHours,
    pub cost: Euro,
}

impl ImportWindow {
    fn empty(key: String) -> Self {
        Self {
            key,
            energy: KiloWattHours(0.0),
            cost: Euro(0.0),
        }
    }

    fn roll(&mut self, key: String) {
        if self.key != key {
            *self = Self::empty(key);
        }
    }

    fn add(&mut self, energy: KiloWattHours, cost: Euro) {
        self.energy = self.energy + energy;
        self.cost = self.cost + cost;
    }

    pub fn average_price(&self) -> Option<EuroPerKiloWattHour> {
        if self.energy.0 > 0.0 {
            Some(EuroPerKiloWattHour(self.cost.0 / self.energy.0))
        } else {
            None
        }
    }
}

pub fn day_key(date: chrono::NaiveDate) -> String {
    date.to_string()
}

pub fn month_key(date: chrono::NaiveDate) -> String {
    use chrono::Datelike;
    format!("{:04}-{:02}", date.year(), date.month())
}

/// The persisted accumulation state.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedTotals {
    pub self_consumption: KiloWattHours,
    pub exported: KiloWattHours,
    pub savings: Euro,
    pub earnings: Euro,
    pub import_energy: KiloWattHours,
    pub import_cost: Euro,
    pub import_day: ImportWindow,
    pub import_month: ImportWindow,
    pub first_seen: Option<DateTime>,
}

impl AccumulatedTotals {
    pub fn zero() -> Self {
        Self {
            self_consumption: KiloWattHours(0.0),
            exported: KiloWattHours(0.0),
            savings: Euro(0.0),
            earnings: Euro(0.0),
            import_energy: KiloWattHours(0.0),
            import_cost: Euro(0.0),
            import_day: ImportWindow::empty(String::new()),
            import_month: ImportWindow::empty(String::new()),
            first_seen: None,
        }
    }

    pub fn average_import_price(&self) -> Option<EuroPerKiloWattHour> {
        if self.import_energy.0 > 0.0 {
            Some(EuroPerKiloWattHour(self.import_cost.0 / self.import_energy.0))
        } else {
            None
        }
    }
}

/// Incremental accumulation over raw cumulative energy counters.
///
/// Each counter runs its own baseline: the first observation only stores the
/// baseline, every later one contributes `new - previous`. Regressions and
/// implausibly large jumps rebase the counter and contribute nothing, so the
/// running totals never decrease.
pub struct SavingsAccumulator {
    pub totals: AccumulatedTotals,
    baseline_production: Option<f64>,
    baseline_export: Option<f64>,
    baseline_import: Option<f64>,
    pub restored: bool,
    pub restore_implausible: bool,
}

impl SavingsAccumulator {
    pub fn new() -> Self {
        Self {
            totals: AccumulatedTotals::zero(),
            baseline_production: None,
            baseline_export: None,
            baseline_import: None,
            restored: false,
            restore_implausible: false,
        }
    }

    pub fn with_restored(totals: AccumulatedTotals, implausible: bool) -> Self {
        Self {
            totals,
            baseline_production: None,
            baseline_export: None,
            baseline_import: None,
            restored: true,
            restore_implausible: implausible,
        }
    }

    /// Processes the current counter values. Energy observed since the last
    /// call is billed at the prices in effect right now. Returns true when
    /// any total changed.
    ///
    /// Deltas are computed per call: a production delta observed before the
    /// matching export update is booked entirely as self-consumption, the
    /// export delta arriving later does not reattribute it.
    pub fn update(&mut self, readings: CounterReadings, prices: ResolvedPrices, now: DateTime) -> bool {
        if self.totals.first_seen.is_none() {
            self.totals.first_seen = Some(now);
        }

        let delta_production = counter_delta("production", &mut self.baseline_production, readings.production);
        let delta_export = counter_delta("export", &mut self.baseline_export, readings.export);
        let delta_import = counter_delta("import", &mut self.baseline_import, readings.import);

        let delta_self_consumption = (delta_production - delta_export).max(0.0);

        let mut changed = false;

        if delta_self_consumption > 0.0 || delta_export > 0.0 {
            let savings_delta = KiloWattHours(delta_self_consumption) * prices.import.rate;
            let earnings_delta = KiloWattHours(delta_export) * prices.export.rate;

            self.totals.self_consumption = self.totals.self_consumption + KiloWattHours(delta_self_consumption);
            self.totals.exported = self.totals.exported + KiloWattHours(delta_export);
            self.totals.savings = self.totals.savings + savings_delta;
            self.totals.earnings = self.totals.earnings + earnings_delta;

            tracing::debug!(
                "Accumulated +{:.3} kWh self-consumption ({}), +{:.3} kWh export ({})",
                delta_self_consumption,
                savings_delta,
                delta_export,
                earnings_delta,
            );

            changed = true;
        }

        if delta_import > 0.0 {
            let rate = prices.reference.unwrap_or(prices.import.rate);
            let cost_delta = KiloWattHours(delta_import) * rate;

            self.totals.import_energy = self.totals.import_energy + KiloWattHours(delta_import);
            self.totals.import_cost = self.totals.import_cost + cost_delta;

            let today = now.date();
            self.totals.import_day.roll(day_key(today));
            self.totals.import_day.add(KiloWattHours(delta_import), cost_delta);
            self.totals.import_month.roll(month_key(today));
            self.totals.import_month.add(KiloWattHours(delta_import), cost_delta);

            changed = true;
        }

        changed
    }

    /// One-time seeding from the absolute counter values when neither a
    /// restore nor prior accumulation exists. All historical
    /// production-minus-export is treated as self-consumption and priced at
    /// the current rates, an explicit approximation.
    pub fn seed_from_history(&mut self, readings: CounterReadings, prices: ResolvedPrices, now: DateTime) -> bool {
        if self.restored || self.totals.self_consumption.0 != 0.0 {
            return false;
        }

        let production = readings.production.unwrap_or(0.0);
        let export = readings.export.unwrap_or(0.0);

        if production <= 0.0 {
            tracing::info!("No historical production data available, starting at zero");
            return false;
        }

        let self_consumption = (production - export).max(0.0);

        self.totals.self_consumption = KiloWattHours(self_consumption);
        self.totals.exported = KiloWattHours(export);
        self.totals.savings = KiloWattHours(self_consumption) * prices.import.rate;
        self.totals.earnings = KiloWattHours(export) * prices.export.rate;
        self.totals.first_seen = Some(now);

        tracing::info!(
            "Seeded from history: production={:.2} kWh, export={:.2} kWh -> self-consumption={} ({}), export earnings {}",
            production,
            export,
            self.totals.self_consumption,
            self.totals.savings,
            self.totals.earnings,
        );

        true
    }

    /// Zeroes the import-price tracking sub-state and rebases the import
    /// baseline to the current counter value.
    pub fn reset_import_tracking(&mut self, current_import: Option<f64>, now: DateTime) {
        tracing::info!(
            "Resetting grid import tracking (was {} at {})",
            self.totals.import_energy,
            self.totals.import_cost,
        );

        let today = now.date();
        self.totals.import_energy = KiloWattHours(0.0);
        self.totals.import_cost = Euro(0.0);
        self.totals.import_day = ImportWindow::empty(day_key(today));
        self.totals.import_month = ImportWindow::empty(month_key(today));

        if current_import.is_some() {
            self.baseline_import = current_import;
        }
    }
}

impl Default for SavingsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn counter_delta(name: &str, baseline: &mut Option<f64>, reading: Option<f64>) -> f64 {
    let value = match reading {
        Some(v) => v,
        None => return 0.0,
    };

    let previous = match baseline.replace(value) {
        Some(p) => p,
        None => {
            tracing::info!("{} counter tracking initialized at {:.2} kWh", name, value);
            return 0.0;
        }
    };

    let delta = value - previous;

    if delta < 0.0 {
        tracing::debug!("{} counter regressed ({:.3} kWh), rebasing", name, delta);
        return 0.0;
    }

    if delta > MAX_DELTA_KWH {
        tracing::warn!("{} counter jumped by {:.1} kWh in one update, rebasing", name, delta);
        return 0.0;
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::pricing::{PriceQuote, PriceSource};

    fn prices(import: f64, export: f64) -> ResolvedPrices {
        ResolvedPrices {
            import: PriceQuote {
                rate: EuroPerKiloWattHour(import),
                source: PriceSource::Config,
            },
            export: PriceQuote {
                rate: EuroPerKiloWattHour(export),
                source: PriceSource::Config,
            },
            reference: None,
        }
    }

    fn readings(production: f64, export: f64) -> CounterReadings {
        CounterReadings {
            production: Some(production),
            export: Some(export),
            import: None,
        }
    }

    fn now() -> DateTime {
        DateTime::from_iso("2026-08-20T12:00:00+02:00").unwrap()
    }

    #[test]
    fn test_first_observation_only_sets_baseline() {
        let mut acc = SavingsAccumulator::new();

        let changed = acc.update(readings(100.0, 40.0), prices(0.30, 0.08), now());

        assert!(!changed);
        assert_eq!(acc.totals.self_consumption, KiloWattHours(0.0));
        assert_eq!(acc.totals.first_seen, Some(now()));
    }

    #[test]
    fn test_delta_billed_at_current_prices() {
        let mut acc = SavingsAccumulator::new();
        acc.update(readings(100.0, 40.0), prices(0.30, 0.08), now());

        //5 kWh produced, 1 kWh exported -> 4 kWh self-consumed
        let changed = acc.update(readings(105.0, 41.0), prices(0.30, 0.08), now());

        assert!(changed);
        assert_eq!(acc.totals.self_consumption, KiloWattHours(4.0));
        assert_eq!(acc.totals.exported, KiloWattHours(1.0));
        assert!((acc.totals.savings.0 - 1.20).abs() < 1e-9);
        assert!((acc.totals.earnings.0 - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_interleaved_updates_book_production_first() {
        let mut acc = SavingsAccumulator::new();

        //counters report one at a time, as delivered by the event stream
        acc.update(readings(100.0, 40.0), prices(0.30, 0.08), now());
        acc.update(readings(105.0, 40.0), prices(0.30, 0.08), now());
        acc.update(readings(105.0, 41.0), prices(0.30, 0.08), now());

        assert_eq!(acc.totals.self_consumption, KiloWattHours(5.0));
        assert_eq!(acc.totals.exported, KiloWattHours(1.0));
        assert!((acc.totals.savings.0 - 1.50).abs() < 1e-9);
    }

    #[test]
    fn test_counter_reset_never_subtracts() {
        let mut acc = SavingsAccumulator::new();

        //sequence 10, 12, 3, 4 with a reset between the 2nd and 3rd reading
        for value in [10.0, 12.0, 3.0, 4.0] {
            acc.update(
                CounterReadings {
                    production: Some(value),
                    export: None,
                    import: None,
                },
                prices(0.30, 0.08),
                now(),
            );
        }

        assert_eq!(acc.totals.self_consumption, KiloWattHours(3.0));
    }

    #[test]
    fn test_zero_delta_is_idempotent() {
        let mut acc = SavingsAccumulator::new();
        acc.update(readings(100.0, 40.0), prices(0.30, 0.08), now());
        acc.update(readings(105.0, 41.0), prices(0.30, 0.08), now());

        let before = acc.totals.clone();
        let changed = acc.update(readings(105.0, 41.0), prices(0.30, 0.08), now());

        assert!(!changed);
        assert_eq!(acc.totals, before);
    }

    #[test]
    fn test_totals_monotonic_under_regressions() {
        let mut acc = SavingsAccumulator::new();
        let sequence = [(100.0, 40.0), (105.0, 41.0), (50.0, 10.0), (52.0, 11.0), (51.0, 10.5)];

        let mut last_self = 0.0;
        let mut last_export = 0.0;
        for (production, export) in sequence {
            acc.update(readings(production, export), prices(0.30, 0.08), now());

            assert!(acc.totals.self_consumption.0 >= last_self);
            assert!(acc.totals.exported.0 >= last_export);
            last_self = acc.totals.self_consumption.0;
            last_export = acc.totals.exported.0;
        }
    }

    #[test]
    fn test_implausible_jump_is_rebased() {
        let mut acc = SavingsAccumulator::new();
        acc.update(readings(100.0, 0.0), prices(0.30, 0.08), now());
        acc.update(readings(200.0, 0.0), prices(0.30, 0.08), now());

        assert_eq!(acc.totals.self_consumption, KiloWattHours(0.0));

        //after rebase regular deltas count again
        acc.update(readings(202.0, 0.0), prices(0.30, 0.08), now());
        assert_eq!(acc.totals.self_consumption, KiloWattHours(2.0));
    }

    #[test]
    fn test_import_tracked_at_reference_price() {
        let mut acc = SavingsAccumulator::new();
        let mut p = prices(0.30, 0.08);
        p.reference = Some(EuroPerKiloWattHour(0.25));

        acc.update(
            CounterReadings {
                production: None,
                export: None,
                import: Some(500.0),
            },
            p,
            now(),
        );
        acc.update(
            CounterReadings {
                production: None,
                export: None,
                import: Some(504.0),
            },
            p,
            now(),
        );

        assert_eq!(acc.totals.import_energy, KiloWattHours(4.0));
        assert_eq!(acc.totals.import_cost, Euro(1.0));
        assert_eq!(acc.totals.average_import_price(), Some(EuroPerKiloWattHour(0.25)));
    }

    #[test]
    fn test_import_windows_reset_on_calendar_change() {
        let mut acc = SavingsAccumulator::new();
        //instants chosen so the local date and month differ in any host
        //timezone
        let day_one = DateTime::from_iso("2026-08-30T00:00:00+00:00").unwrap();
        let day_two = DateTime::from_iso("2026-09-02T00:00:00+00:00").unwrap();

        let import_only = |v: f64| CounterReadings {
            production: None,
            export: None,
            import: Some(v),
        };

        acc.update(import_only(500.0), prices(0.25, 0.08), day_one);
        acc.update(import_only(504.0), prices(0.25, 0.08), day_one);
        assert_eq!(acc.totals.import_day.energy, KiloWattHours(4.0));
        assert_eq!(acc.totals.import_month.energy, KiloWattHours(4.0));

        //both day and month roll over
        acc.update(import_only(506.0), prices(0.25, 0.08), day_two);
        assert_eq!(acc.totals.import_day.energy, KiloWattHours(2.0));
        assert_eq!(acc.totals.import_month.energy, KiloWattHours(2.0));
        assert_eq!(acc.totals.import_energy, KiloWattHours(6.0));
    }

    #[test]
    fn test_seed_from_history() {
        let mut acc = SavingsAccumulator::new();

        let seeded = acc.seed_from_history(readings(1000.0, 400.0), prices(0.30, 0.08), now());

        assert!(seeded);
        assert_eq!(acc.totals.self_consumption, KiloWattHours(600.0));
        assert_eq!(acc.totals.exported, KiloWattHours(400.0));
        assert_eq!(acc.totals.savings, Euro(180.0));
        assert_eq!(acc.totals.earnings, Euro(32.0));
    }

    #[test]
    fn test_seed_skipped_after_restore() {
        let mut acc = SavingsAccumulator::with_restored(AccumulatedTotals::zero(), false);

        assert!(!acc.seed_from_history(readings(1000.0, 400.0), prices(0.30, 0.08), now()));
    }

    #[test]
    fn test_reset_import_tracking() {
        let mut acc = SavingsAccumulator::new();
        let import_only = |v: f64| CounterReadings {
            production: None,
            export: None,
            import: Some(v),
        };
        acc.update(import_only(500.0), prices(0.25, 0.08), now());
        acc.update(import_only(504.0), prices(0.25, 0.08), now());

        acc.reset_import_tracking(Some(504.0), now());

        assert_eq!(acc.totals.import_energy, KiloWattHours(0.0));
        assert_eq!(acc.totals.import_cost, Euro(0.0));
        assert_eq!(acc.totals.import_day.energy, KiloWattHours(0.0));

        //next delta counts from the rebased baseline
        acc.update(import_only(505.0), prices(0.25, 0.08), now());
        assert_eq!(acc.totals.import_energy, KiloWattHours(1.0));
    }
}
