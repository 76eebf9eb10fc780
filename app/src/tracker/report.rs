use serde::Serialize;

use crate::core::time::DateTime;
use crate::core::unit::{EuroPerKiloWattHour, KiloWattHours};
use crate::tracker::accumulator::{AccumulatedTotals, CounterReadings};
use crate::tracker::config::TrackerConfig;
use crate::tracker::pricing::{PriceQuote, PriceSource};

//German grid mix CO2 factor, kg per kWh
const CO2_FACTOR_GRID: f64 = 0.4;

const DAYS_PER_MONTH: f64 = 30.44;
const DAYS_PER_YEAR: f64 = 365.0;

pub struct ReportContext<'a> {
    pub totals: &'a AccumulatedTotals,
    pub config: &'a TrackerConfig,
    pub import_price: PriceQuote,
    pub export_price: PriceQuote,
    pub comparison_tariff: EuroPerKiloWattHour,
    pub has_reference_feed: bool,
    pub counters: CounterReadings,
    pub consumption_counter: Option<f64>,
    pub data_restored: bool,
    pub restore_implausible: bool,
}

/// Read-only computed properties exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavingsReport {
    pub self_consumption_kwh: f64,
    pub feed_in_kwh: f64,
    pub savings_self_consumption: f64,
    pub earnings_feed_in: f64,
    pub total_savings: f64,

    pub amortisation_percent: f64,
    pub remaining_cost: f64,
    pub is_amortised: bool,
    pub status: String,

    pub self_consumption_ratio: Option<f64>,
    pub autarky_percent: Option<f64>,
    pub co2_saved_kg: f64,

    pub days_since_installation: i64,
    pub average_daily_savings: f64,
    pub average_monthly_savings: f64,
    pub average_yearly_savings: f64,
    pub estimated_remaining_days: Option<i64>,
    pub estimated_payback_date: Option<String>,
    pub estimated_payback_in: Option<String>,

    pub import_price: f64,
    pub import_price_source: PriceSource,
    pub export_price: f64,
    pub export_price_source: PriceSource,

    pub grid_import_kwh: f64,
    pub grid_import_cost: f64,
    pub average_import_price: Option<f64>,
    pub average_import_price_today: Option<f64>,
    pub average_import_price_month: Option<f64>,
    pub spot_vs_fixed_savings: Option<f64>,

    pub data_restored: bool,
    pub restore_implausible: bool,
}

pub fn build(ctx: &ReportContext, now: DateTime) -> SavingsReport {
    let totals = ctx.totals;
    let config = ctx.config;

    //manual pre-tracking offsets are applied on read, the offset energy is
    //priced at the current rates
    let self_consumption_kwh = totals.self_consumption.0 + config.offset_self_consumption_kwh;
    let feed_in_kwh = totals.exported.0 + config.offset_export_kwh;
    let savings_self_consumption =
        totals.savings.0 + (KiloWattHours(config.offset_self_consumption_kwh) * ctx.import_price.rate).0;
    let earnings_feed_in = totals.earnings.0 + (KiloWattHours(config.offset_export_kwh) * ctx.export_price.rate).0;
    let total_savings = savings_self_consumption + earnings_feed_in + config.offset_savings;

    let amortisation_percent = if config.installation_cost <= 0.0 {
        100.0
    } else {
        ((total_savings / config.installation_cost) * 100.0).min(100.0)
    };
    let remaining_cost = (config.installation_cost - total_savings).max(0.0);
    let is_amortised = total_savings >= config.installation_cost;

    let status = if is_amortised {
        format!("amortised, {:.2} € profit", total_savings - config.installation_cost)
    } else {
        format!("{:.1}% amortised", amortisation_percent)
    };

    let days_since_installation = days_since_installation(config, totals, now);
    let average_daily_savings = if days_since_installation > 0 {
        total_savings / days_since_installation as f64
    } else {
        0.0
    };

    let estimated_remaining_days = if is_amortised {
        Some(0)
    } else if average_daily_savings > 0.0 {
        Some((remaining_cost / average_daily_savings) as i64)
    } else {
        None
    };
    let payback = estimated_remaining_days.map(|days| now.plus_days(days));

    let average_import_price = totals.average_import_price();
    let spot_vs_fixed_savings = if ctx.has_reference_feed {
        average_import_price.map(|avg| (avg.0 - ctx.comparison_tariff.0) * totals.import_energy.0)
    } else {
        None
    };

    SavingsReport {
        self_consumption_kwh,
        feed_in_kwh,
        savings_self_consumption,
        earnings_feed_in,
        total_savings,
        amortisation_percent,
        remaining_cost,
        is_amortised,
        status,
        self_consumption_ratio: self_consumption_ratio(&ctx.counters),
        autarky_percent: autarky_percent(&ctx.counters, ctx.consumption_counter),
        co2_saved_kg: self_consumption_kwh * CO2_FACTOR_GRID,
        days_since_installation,
        average_daily_savings,
        average_monthly_savings: average_daily_savings * DAYS_PER_MONTH,
        average_yearly_savings: average_daily_savings * DAYS_PER_YEAR,
        estimated_remaining_days,
        estimated_payback_date: payback.map(|d| d.date().to_string()),
        estimated_payback_in: payback.map(|d| d.to_human_readable()),
        import_price: ctx.import_price.rate.0,
        import_price_source: ctx.import_price.source,
        export_price: ctx.export_price.rate.0,
        export_price_source: ctx.export_price.source,
        grid_import_kwh: totals.import_energy.0,
        grid_import_cost: totals.import_cost.0,
        average_import_price: average_import_price.map(|p| p.0),
        average_import_price_today: totals.import_day.average_price().map(|p| p.0),
        average_import_price_month: totals.import_month.average_price().map(|p| p.0),
        spot_vs_fixed_savings,
        data_restored: ctx.data_restored,
        restore_implausible: ctx.restore_implausible,
    }
}

fn days_since_installation(config: &TrackerConfig, totals: &AccumulatedTotals, now: DateTime) -> i64 {
    let reference = config
        .installation_date
        .or_else(|| totals.first_seen.map(|dt| dt.date()));

    match reference {
        Some(date) => (now.date() - date).num_days().max(0),
        None => 0,
    }
}

/// Share of production consumed on-site, from the raw cumulative counters.
fn self_consumption_ratio(counters: &CounterReadings) -> Option<f64> {
    let production = counters.production.filter(|p| *p > 0.0)?;
    let export = counters.export.unwrap_or(0.0);

    let self_consumption = (production - export).max(0.0);
    Some(((self_consumption / production) * 100.0).min(100.0))
}

/// Share of consumption covered by PV. Prefers the consumption counter,
/// falls back to self-consumption plus grid import.
fn autarky_percent(counters: &CounterReadings, consumption: Option<f64>) -> Option<f64> {
    let production = counters.production.unwrap_or(0.0);
    let export = counters.export.unwrap_or(0.0);
    let self_consumption = (production - export).max(0.0);

    if self_consumption <= 0.0 {
        return None;
    }

    if let Some(consumption) = consumption.filter(|c| *c > 0.0) {
        return Some(((self_consumption / consumption) * 100.0).min(100.0));
    }

    if let Some(import) = counters.import.filter(|i| *i > 0.0) {
        let total_consumption = self_consumption + import;
        return Some(((self_consumption / total_consumption) * 100.0).min(100.0));
    }

    None
}
