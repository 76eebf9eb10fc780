pub mod accumulator;
pub mod battery;
pub mod config;
pub mod pricing;
pub mod recommendation;
pub mod report;
pub mod snapshot;
pub mod values;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::core::time::DateTime;
use crate::core::unit::EuroPerKiloWattHour;
use accumulator::{CounterReadings, ResolvedPrices, SavingsAccumulator};
use battery::BatteryAdvice;
pub use self::config::TrackerConfig;
use pricing::{DaySpread, PriceChannel, PriceResolver, PricingStrategy};
use recommendation::Recommendation;
use report::SavingsReport;
use values::{ValueCache, ValueSource};

//let a restore win the race against the fallback initialization
const FALLBACK_INIT_DELAY: std::time::Duration = std::time::Duration::from_secs(60);
const SAVE_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(10);

/// A value-change notification for one data point. `None` means the data
/// point turned unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingValue {
    pub entity_id: String,
    pub value: Option<f64>,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone)]
pub enum TrackerCommand {
    ResetGridImport,
    ApplyConfig(TrackerConfig),
}

/// Everything the presentation layer exposes, recomputed after each
/// qualifying update and fanned out to the listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerState {
    pub report: SavingsReport,
    pub recommendation: Recommendation,
    pub battery: BatteryAdvice,
}

/// Persistence facility for the accumulation snapshot.
pub trait SnapshotRepo {
    fn load(&self) -> impl std::future::Future<Output = anyhow::Result<BTreeMap<String, Value>>> + Send;
    fn save(&self, snapshot: BTreeMap<String, Value>) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

pub struct TrackerRunner<S> {
    config: TrackerConfig,
    cache: ValueCache,
    resolver: PriceResolver,
    accumulator: SavingsAccumulator,
    spread: DaySpread,
    store: S,
    event_rx: mpsc::Receiver<IncomingValue>,
    command_rx: mpsc::Receiver<TrackerCommand>,
    state_tx: broadcast::Sender<TrackerState>,
    plausibility_checked: bool,
}

impl<S: SnapshotRepo> TrackerRunner<S> {
    pub fn new(
        config: TrackerConfig,
        store: S,
        event_rx: mpsc::Receiver<IncomingValue>,
        command_rx: mpsc::Receiver<TrackerCommand>,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(16);
        let resolver = new_resolver(&config);

        Self {
            config,
            cache: ValueCache::new(),
            resolver,
            accumulator: SavingsAccumulator::new(),
            spread: DaySpread::new(),
            store,
            event_rx,
            command_rx,
            state_tx,
            plausibility_checked: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerState> {
        self.state_tx.subscribe()
    }

    /// Restores the accumulation state from the snapshot store. Must run
    /// before the first live delta is processed so the baselines rebase to
    /// the current counter values instead of re-billing old energy.
    pub async fn bootstrap(&mut self) -> anyhow::Result<()> {
        let stored = self.store.load().await?;

        if stored.is_empty() {
            tracing::info!("No stored snapshot found");
            return Ok(());
        }

        let totals = snapshot::decode(&stored, DateTime::now());
        tracing::info!(
            "Restored accumulation state: {} self-consumption, {} exported, {} savings",
            totals.self_consumption,
            totals.exported,
            totals.savings,
        );

        self.accumulator = SavingsAccumulator::with_restored(totals, false);

        Ok(())
    }

    pub async fn run(mut self) {
        let init_check = tokio::time::sleep(FALLBACK_INIT_DELAY);
        tokio::pin!(init_check);
        let mut init_pending = true;

        let save_timer = tokio::time::sleep(SAVE_DEBOUNCE);
        tokio::pin!(save_timer);
        let mut save_pending = false;

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    let outcome = self.handle_value(event);

                    if outcome.totals_changed {
                        save_pending = true;
                        save_timer.as_mut().reset(tokio::time::Instant::now() + SAVE_DEBOUNCE);
                    }

                    if outcome.publish {
                        self.publish_state();
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    if self.handle_command(command) {
                        save_pending = true;
                        save_timer.as_mut().reset(tokio::time::Instant::now() + SAVE_DEBOUNCE);
                    }
                    self.publish_state();
                }

                _ = &mut init_check, if init_pending => {
                    init_pending = false;
                    if self.fallback_init() {
                        save_pending = true;
                        save_timer.as_mut().reset(tokio::time::Instant::now() + SAVE_DEBOUNCE);
                        self.publish_state();
                    }
                }

                _ = &mut save_timer, if save_pending => {
                    save_pending = false;
                    self.save_snapshot().await;
                }
            }
        }
    }

    fn handle_value(&mut self, event: IncomingValue) -> UpdateOutcome {
        self.cache.update(&event.entity_id, event.value, event.timestamp);

        let is_energy_counter = [
            &self.config.production_entity,
            &self.config.export_entity,
            &self.config.import_entity,
        ]
        .into_iter()
        .flatten()
        .any(|id| *id == event.entity_id);

        if Some(&event.entity_id) == self.config.day_ahead_price_entity.as_ref() {
            if let Some(raw) = event.value {
                self.spread
                    .observe(pricing::auto_detect_to_eur(raw), DateTime::now().date());
            }
        }

        if !is_energy_counter {
            //recommendation inputs, prices etc. only need a recompute
            return UpdateOutcome {
                publish: true,
                totals_changed: false,
            };
        }

        self.check_restore_plausibility();

        let readings = self.counter_readings();
        let prices = self.resolved_prices();
        let totals_changed = self.accumulator.update(readings, prices, DateTime::now());

        UpdateOutcome {
            publish: true,
            totals_changed,
        }
    }

    fn handle_command(&mut self, command: TrackerCommand) -> bool {
        match command {
            TrackerCommand::ResetGridImport => {
                let current_import = self
                    .cache
                    .current_of(&self.config.import_entity)
                    .map(|dp| dp.value);
                self.accumulator.reset_import_tracking(current_import, DateTime::now());
                true
            }
            TrackerCommand::ApplyConfig(update) => match self.config.apply_update(update) {
                Ok(()) => {
                    self.resolver = new_resolver(&self.config);
                    tracing::info!("Tracker configuration updated");
                    false
                }
                Err(e) => {
                    tracing::error!("Rejected configuration update: {:?}", e);
                    false
                }
            },
        }
    }

    /// When neither a restore nor prior accumulation produced data, seed once
    /// from the absolute counter values.
    fn fallback_init(&mut self) -> bool {
        let readings = self.counter_readings();
        let prices = self.resolved_prices();
        self.accumulator.seed_from_history(readings, prices, DateTime::now())
    }

    fn check_restore_plausibility(&mut self) {
        if self.plausibility_checked || !self.accumulator.restored {
            return;
        }

        let production = self.cache.current_of(&self.config.production_entity);
        if let Some(production) = production {
            self.accumulator.restore_implausible =
                snapshot::is_implausible(&self.accumulator.totals, Some(production.value));
            self.plausibility_checked = true;
        }
    }

    fn counter_readings(&self) -> CounterReadings {
        CounterReadings {
            production: self.cache.current_of(&self.config.production_entity).map(|dp| dp.value),
            export: self.cache.current_of(&self.config.export_entity).map(|dp| dp.value),
            import: self.cache.current_of(&self.config.import_entity).map(|dp| dp.value),
        }
    }

    fn resolved_prices(&mut self) -> ResolvedPrices {
        ResolvedPrices {
            import: self.resolver.import_price(&self.cache),
            export: self.resolver.export_price(&self.cache),
            reference: self.reference_price(),
        }
    }

    fn reference_price(&self) -> Option<EuroPerKiloWattHour> {
        self.cache
            .current_of(&self.config.day_ahead_price_entity)
            .map(|dp| pricing::auto_detect_to_eur(dp.value))
    }

    fn current_state(&mut self) -> TrackerState {
        let now = DateTime::now();

        let import_price = self.resolver.import_price(&self.cache);
        let export_price = self.resolver.export_price(&self.cache);

        let quantile = self
            .cache
            .current_of(&self.config.price_quantile_entity)
            .map(|dp| dp.value);
        let battery_soc = self
            .cache
            .current_of(&self.config.battery_soc_entity)
            .map(|dp| dp.value.into());
        let forecast_today = self
            .cache
            .current_of(&self.config.forecast_entity)
            .map(|dp| dp.value.into());

        let recommendation = recommendation::evaluate(
            &recommendation::RecommendationInputs {
                pv_power: self.cache.current_of(&self.config.pv_power_entity).map(|dp| dp.value.into()),
                battery_soc,
                price_quantile: quantile,
                import_price: import_price.rate,
                forecast_today,
                hour: now.hour(),
                month: now.month(),
            },
            &self.config,
        );

        let battery = battery::advise(
            &battery::BatteryInputs {
                battery_soc,
                price_quantile: quantile,
                forecast_today,
                price_spread_cents: self.spread.spread_cents(),
                month: now.month(),
            },
            &self.config,
        );

        let report = report::build(
            &report::ReportContext {
                totals: &self.accumulator.totals,
                config: &self.config,
                import_price,
                export_price,
                comparison_tariff: self.resolver.comparison_tariff(),
                has_reference_feed: self.config.day_ahead_price_entity.is_some(),
                counters: self.counter_readings(),
                consumption_counter: self.cache.current_of(&self.config.consumption_entity).map(|dp| dp.value),
                data_restored: self.accumulator.restored,
                restore_implausible: self.accumulator.restore_implausible,
            },
            now,
        );

        TrackerState {
            report,
            recommendation,
            battery,
        }
    }

    fn publish_state(&mut self) {
        let state = self.current_state();

        //no listeners yet is fine, the export runner may still be starting
        let _ = self.state_tx.send(state);
    }

    async fn save_snapshot(&self) {
        let snapshot = snapshot::encode(&self.accumulator.totals);

        if let Err(e) = self.store.save(snapshot).await {
            tracing::error!("Error saving accumulation snapshot: {:?}", e);
        }
    }
}

struct UpdateOutcome {
    publish: bool,
    totals_changed: bool,
}

fn new_resolver(config: &TrackerConfig) -> PriceResolver {
    let strategy = match config.fixed_tariff {
        Some(rate) => PricingStrategy::Fixed {
            rate: pricing::explicit_unit_to_eur(rate, config.import_price_unit),
        },
        None => PricingStrategy::Dynamic,
    };

    PriceResolver::new(
        PriceChannel::new(
            config.import_price_entity.clone(),
            config.import_price,
            config.import_price_unit,
        ),
        PriceChannel::new(
            config.export_price_entity.clone(),
            config.export_price,
            config.export_price_unit,
        ),
        strategy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::config::test::test_config;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct InMemoryRepo {
        data: Arc<Mutex<BTreeMap<String, Value>>>,
    }

    impl SnapshotRepo for InMemoryRepo {
        async fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
            Ok(self.data.lock().unwrap().clone())
        }

        async fn save(&self, snapshot: BTreeMap<String, Value>) -> anyhow::Result<()> {
            *self.data.lock().unwrap() = snapshot;
            Ok(())
        }
    }

    fn new_runner(repo: InMemoryRepo) -> (TrackerRunner<InMemoryRepo>, mpsc::Sender<IncomingValue>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (_command_tx, command_rx) = mpsc::channel(4);
        let runner = TrackerRunner::new(test_config(), repo, event_rx, command_rx);
        (runner, event_tx)
    }

    fn value(entity_id: &str, value: f64) -> IncomingValue {
        IncomingValue {
            entity_id: entity_id.to_string(),
            value: Some(value),
            timestamp: DateTime::now(),
        }
    }

    #[tokio::test]
    async fn test_energy_updates_flow_into_totals() {
        let fixed = DateTime::from_iso("2026-08-20T12:00:00+02:00").unwrap();

        crate::core::time::FIXED_NOW
            .scope(fixed, async {
                let (mut runner, _tx) = new_runner(InMemoryRepo::default());

                runner.handle_value(value("sensor.pv_production", 100.0));
                runner.handle_value(value("sensor.grid_export", 40.0));
                runner.handle_value(value("sensor.pv_production", 105.0));
                let outcome = runner.handle_value(value("sensor.grid_export", 41.0));

                //each event is accumulated on its own: the production-only
                //event books its full delta as self-consumption, the export
                //event arriving later cannot reattribute it
                assert!(outcome.totals_changed);
                assert_eq!(runner.accumulator.totals.self_consumption.0, 5.0);
                assert_eq!(runner.accumulator.totals.exported.0, 1.0);
                assert_eq!(runner.accumulator.totals.first_seen, Some(fixed));
            })
            .await;
    }

    #[tokio::test]
    async fn test_recommendation_input_does_not_touch_totals() {
        let (mut runner, _tx) = new_runner(InMemoryRepo::default());

        let outcome = runner.handle_value(value("sensor.battery_soc", 85.0));

        assert!(outcome.publish);
        assert!(!outcome.totals_changed);
        assert_eq!(runner.accumulator.totals.self_consumption.0, 0.0);
    }

    #[tokio::test]
    async fn test_restore_rebases_before_first_delta() {
        let repo = InMemoryRepo::default();

        //a previous run accumulated state
        {
            let (mut runner, _tx) = new_runner(repo.clone());
            runner.handle_value(value("sensor.pv_production", 100.0));
            runner.handle_value(value("sensor.grid_export", 40.0));
            runner.handle_value(value("sensor.pv_production", 110.0));
            runner.save_snapshot().await;
        }

        let (mut runner, _tx) = new_runner(repo);
        runner.bootstrap().await.unwrap();
        assert!(runner.accumulator.restored);

        //counters re-arrive at their absolute values, no re-billing happens
        runner.handle_value(value("sensor.pv_production", 110.0));
        runner.handle_value(value("sensor.grid_export", 40.0));
        assert_eq!(runner.accumulator.totals.self_consumption.0, 10.0);

        //the next genuine delta counts
        runner.handle_value(value("sensor.pv_production", 112.0));
        assert_eq!(runner.accumulator.totals.self_consumption.0, 12.0);
    }

    #[tokio::test]
    async fn test_fallback_init_skipped_after_restore() {
        let repo = InMemoryRepo::default();

        {
            let (mut runner, _tx) = new_runner(repo.clone());
            runner.handle_value(value("sensor.pv_production", 100.0));
            runner.handle_value(value("sensor.pv_production", 105.0));
            runner.save_snapshot().await;
        }

        let (mut runner, _tx) = new_runner(repo);
        runner.bootstrap().await.unwrap();
        runner.handle_value(value("sensor.pv_production", 1000.0));

        assert!(!runner.fallback_init());
    }

    #[tokio::test]
    async fn test_fallback_init_seeds_from_counters() {
        let (mut runner, _tx) = new_runner(InMemoryRepo::default());

        runner.handle_value(value("sensor.pv_production", 1000.0));
        runner.handle_value(value("sensor.grid_export", 400.0));

        assert!(runner.fallback_init());
        assert_eq!(runner.accumulator.totals.self_consumption.0, 600.0);
        assert_eq!(runner.accumulator.totals.exported.0, 400.0);
    }

    #[tokio::test]
    async fn test_reset_command_clears_import_tracking() {
        let (mut runner, _tx) = new_runner(InMemoryRepo::default());

        runner.handle_value(value("sensor.grid_import", 500.0));
        runner.handle_value(value("sensor.grid_import", 504.0));
        assert_eq!(runner.accumulator.totals.import_energy.0, 4.0);

        let changed = runner.handle_command(TrackerCommand::ResetGridImport);

        assert!(changed);
        assert_eq!(runner.accumulator.totals.import_energy.0, 0.0);
    }

    #[tokio::test]
    async fn test_config_update_keeps_accumulation_state() {
        let (mut runner, _tx) = new_runner(InMemoryRepo::default());

        runner.handle_value(value("sensor.pv_production", 100.0));
        runner.handle_value(value("sensor.pv_production", 105.0));

        let mut update = test_config();
        update.installation_cost = 5_000.0;
        runner.handle_command(TrackerCommand::ApplyConfig(update));

        assert_eq!(runner.config.installation_cost, 5_000.0);
        assert_eq!(runner.accumulator.totals.self_consumption.0, 5.0);
    }

    #[tokio::test]
    async fn test_implausible_restore_is_flagged_not_corrected() {
        let repo = InMemoryRepo::default();

        {
            let (mut runner, _tx) = new_runner(repo.clone());
            runner.handle_value(value("sensor.pv_production", 1000.0));
            runner.handle_value(value("sensor.pv_production", 1010.0));
            runner.save_snapshot().await;
        }

        let (mut runner, _tx) = new_runner(repo);
        runner.bootstrap().await.unwrap();

        //production counter came back far below the tracked totals
        runner.handle_value(value("sensor.pv_production", 2.0));

        assert!(runner.accumulator.restore_implausible);
        assert_eq!(runner.accumulator.totals.self_consumption.0, 10.0);
    }

    #[tokio::test]
    async fn test_state_published_to_listeners() {
        let (mut runner, _tx) = new_runner(InMemoryRepo::default());
        let mut listener = runner.subscribe();

        runner.handle_value(value("sensor.pv_production", 100.0));
        runner.publish_state();

        let state = listener.try_recv().unwrap();
        assert_eq!(state.report.self_consumption_kwh, 0.0);
        assert!(!state.report.data_restored);
    }
}
