use serde::Serialize;

use crate::core::unit::{KiloWattHours, Percent};
use crate::tracker::config::TrackerConfig;

#[derive(Debug, Clone, Copy)]
pub struct BatteryInputs {
    pub battery_soc: Option<Percent>,
    pub price_quantile: Option<f64>,
    pub forecast_today: Option<KiloWattHours>,
    pub price_spread_cents: Option<f64>,
    pub month: u32,
}

/// Advisory signal only. Actual charge/discharge commands are the concern of
/// external automations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryAdvice {
    pub should_charge: bool,
    pub should_discharge: bool,
    /// SoC the battery may be drawn down to right now.
    pub discharge_floor: Percent,
    /// Target SoC for grid charging.
    pub charge_target: Percent,
    pub reasons: Vec<String>,
}

/// Should the battery be charged from the grid now, and should it be allowed
/// to discharge. Each decision is a conjunction of gates; a missing input
/// fails its gate.
pub fn advise(inputs: &BatteryInputs, config: &TrackerConfig) -> BatteryAdvice {
    let mut reasons = Vec::new();

    let season_ok = !config.charge_winter_only || config.is_winter(inputs.month);

    let forecast_low = inputs
        .forecast_today
        .map(|f| f.0 < config.charge_forecast_max_kwh)
        .unwrap_or(false);

    let price_cheap = inputs
        .price_quantile
        .map(|q| q < config.charge_quantile_max)
        .unwrap_or(false);

    let soc_low = inputs
        .battery_soc
        .map(|soc| soc.0 < config.charge_soc_min)
        .unwrap_or(false);

    //without a spread figure there is nothing to hold charging back; with one
    //a too-small spread means no arbitrage headroom for charge losses
    let spread_ok = inputs
        .price_spread_cents
        .map(|spread| spread >= config.min_price_spread_ct)
        .unwrap_or(true);

    let should_charge = season_ok && forecast_low && price_cheap && soc_low && spread_ok;

    if should_charge {
        if let (Some(forecast), Some(quantile)) = (inputs.forecast_today, inputs.price_quantile) {
            reasons.push(format!(
                "low production forecast ({:.1} kWh) and cheap price window (q={:.2})",
                forecast.0, quantile,
            ));
        }
    } else if season_ok && forecast_low && price_cheap && soc_low {
        reasons.push("price spread too small for grid charging".to_string());
    }

    let price_expensive = inputs
        .price_quantile
        .map(|q| q >= config.discharge_quantile_min)
        .unwrap_or(false);

    let should_discharge = price_expensive && season_ok;

    if should_discharge {
        reasons.push("expensive price window, discharging pays off".to_string());
    }

    let discharge_floor = if should_discharge {
        Percent(config.discharge_allow_soc)
    } else {
        Percent(config.discharge_hold_soc)
    };

    BatteryAdvice {
        should_charge,
        should_discharge,
        discharge_floor,
        charge_target: Percent(config.charge_target_soc),
        reasons,
    }
}
