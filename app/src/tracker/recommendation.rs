use serde::Serialize;

use crate::core::unit::{EuroPerKiloWattHour, KiloWattHours, Percent, Watt};
use crate::tracker::config::TrackerConfig;

/// Everything the scoring looks at. Inputs that have no configured source
/// arrive as `None` and their factor is skipped.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationInputs {
    pub pv_power: Option<Watt>,
    pub battery_soc: Option<Percent>,
    pub price_quantile: Option<f64>,
    pub import_price: EuroPerKiloWattHour,
    pub forecast_today: Option<KiloWattHours>,
    pub hour: u32,
    pub month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ideal,
    Good,
    Neutral,
    Poor,
    Avoid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub verdict: Verdict,
    pub score: i32,
    pub reasons: Vec<String>,
}

/// Scores how good a moment this is to consume electricity. Pure function of
/// the inputs and configuration, re-evaluated on every input change.
pub fn evaluate(inputs: &RecommendationInputs, config: &TrackerConfig) -> Recommendation {
    let mut score = 0;
    let mut reasons = Vec::new();

    score += pv_power_score(inputs, config, &mut reasons);
    score += battery_score(inputs, config, &mut reasons);
    score += price_score(inputs, config, &mut reasons);
    score += time_of_day_score(inputs.hour, &mut reasons);
    score += forecast_score(inputs.forecast_today, &mut reasons);

    let verdict = match score {
        s if s >= 5 => Verdict::Ideal,
        s if s >= 3 => Verdict::Good,
        s if s >= 0 => Verdict::Neutral,
        s if s >= -2 => Verdict::Poor,
        _ => Verdict::Avoid,
    };

    Recommendation { verdict, score, reasons }
}

fn pv_power_score(inputs: &RecommendationInputs, config: &TrackerConfig, reasons: &mut Vec<String>) -> i32 {
    let raw = match inputs.pv_power {
        Some(power) => power.0,
        None => return 0,
    };

    //during winter a base load (e.g. heat pump) eats part of the production,
    //that power is not available for additional consumers
    let effective = if config.is_winter(inputs.month) {
        (raw - config.winter_base_load_watt).max(0.0)
    } else {
        raw
    };

    let peak = config.pv_peak_watt;

    if effective >= peak * 0.6 {
        reasons.push("plenty of PV power".to_string());
        4
    } else if effective >= peak * 0.3 {
        reasons.push("good PV power".to_string());
        2
    } else if effective >= peak * 0.1 {
        reasons.push("some PV power".to_string());
        1
    } else if effective < peak * 0.05 {
        reasons.push("hardly any PV power".to_string());
        -1
    } else {
        0
    }
}

fn battery_score(inputs: &RecommendationInputs, config: &TrackerConfig, reasons: &mut Vec<String>) -> i32 {
    let soc = match inputs.battery_soc {
        Some(soc) => soc.0,
        None => return 0,
    };

    if soc >= config.battery_soc_high {
        reasons.push(format!("battery full ({:.0}%)", soc));
        2
    } else if soc <= config.battery_soc_low {
        reasons.push(format!("battery empty ({:.0}%)", soc));
        -2
    } else {
        0
    }
}

fn price_score(inputs: &RecommendationInputs, config: &TrackerConfig, reasons: &mut Vec<String>) -> i32 {
    let price = inputs.import_price.0;

    match inputs.price_quantile {
        Some(quantile) if (0.0..=1.0).contains(&quantile) => {
            let (band_score, label): (i32, &str) = if quantile <= 0.2 {
                (3, "price in the cheapest 20% of the day")
            } else if quantile <= 0.4 {
                (1, "price below the daily average")
            } else if quantile >= 0.8 {
                (-3, "price in the most expensive 20% of the day")
            } else if quantile >= 0.6 {
                (-1, "price above the daily average")
            } else {
                return 0;
            };

            //optionally require the absolute threshold to agree before
            //granting the strong bands
            let score = if config.require_price_agreement && band_score.abs() == 3 {
                let agrees = (band_score > 0 && price <= config.price_low_threshold)
                    || (band_score < 0 && price >= config.price_high_threshold);
                if agrees { band_score } else { band_score.signum() }
            } else {
                band_score
            };

            reasons.push(format!("{} (q={:.2})", label, quantile));
            score
        }
        _ => {
            if price <= config.price_low_threshold {
                reasons.push(format!("cheap electricity ({:.2} €/kWh)", price));
                2
            } else if price >= config.price_high_threshold {
                reasons.push(format!("expensive electricity ({:.2} €/kWh)", price));
                -2
            } else {
                0
            }
        }
    }
}

fn time_of_day_score(hour: u32, reasons: &mut Vec<String>) -> i32 {
    if (10..=15).contains(&hour) {
        reasons.push(format!("midday solar window ({}:00)", hour));
        1
    } else if hour < 6 || hour > 21 {
        reasons.push(format!("night time ({}:00)", hour));
        -1
    } else {
        0
    }
}

fn forecast_score(forecast: Option<KiloWattHours>, reasons: &mut Vec<String>) -> i32 {
    let forecast = match forecast {
        Some(f) if f.0 > 0.0 => f.0,
        _ => return 0,
    };

    if forecast >= 10.0 {
        reasons.push(format!("good production forecast ({:.1} kWh)", forecast));
        1
    } else if forecast < 3.0 {
        reasons.push(format!("poor production forecast ({:.1} kWh)", forecast));
        -1
    } else {
        0
    }
}
