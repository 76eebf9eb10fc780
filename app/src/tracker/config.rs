use serde::Deserialize;

use crate::tracker::pricing::PriceUnit;

/// Typed runtime options of the tracker. A new instance can be applied at
/// runtime via [`TrackerConfig::apply_update`] without touching accumulation
/// state.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    //energy counter entities (cumulative kWh)
    pub production_entity: Option<String>,
    pub export_entity: Option<String>,
    pub import_entity: Option<String>,
    pub consumption_entity: Option<String>,

    //recommendation input entities
    pub pv_power_entity: Option<String>,
    pub battery_soc_entity: Option<String>,
    pub forecast_entity: Option<String>,

    //day-ahead market entities
    pub day_ahead_price_entity: Option<String>,
    pub price_quantile_entity: Option<String>,

    //price configuration
    pub import_price_entity: Option<String>,
    #[serde(default = "default_import_price")]
    pub import_price: f64,
    #[serde(default)]
    pub import_price_unit: PriceUnit,
    pub export_price_entity: Option<String>,
    #[serde(default = "default_export_price")]
    pub export_price: f64,
    #[serde(default)]
    pub export_price_unit: PriceUnit,
    /// Fixed import tariff in the unit of `import_price_unit`. When set,
    /// savings are billed at this rate instead of the resolved dynamic price.
    pub fixed_tariff: Option<f64>,

    //installation
    #[serde(default = "default_installation_cost")]
    pub installation_cost: f64,
    pub installation_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub offset_self_consumption_kwh: f64,
    #[serde(default)]
    pub offset_export_kwh: f64,
    #[serde(default)]
    pub offset_savings: f64,

    //recommendation thresholds
    #[serde(default = "default_pv_peak_watt")]
    pub pv_peak_watt: f64,
    #[serde(default)]
    pub winter_base_load_watt: f64,
    #[serde(default = "default_winter_months")]
    pub winter_months: Vec<u32>,
    #[serde(default = "default_soc_high")]
    pub battery_soc_high: f64,
    #[serde(default = "default_soc_low")]
    pub battery_soc_low: f64,
    #[serde(default = "default_price_high")]
    pub price_high_threshold: f64,
    #[serde(default = "default_price_low")]
    pub price_low_threshold: f64,
    #[serde(default)]
    pub require_price_agreement: bool,

    //battery advisor
    #[serde(default = "default_charge_forecast_max")]
    pub charge_forecast_max_kwh: f64,
    #[serde(default = "default_charge_quantile_max")]
    pub charge_quantile_max: f64,
    #[serde(default = "default_charge_soc_min")]
    pub charge_soc_min: f64,
    #[serde(default = "default_charge_target_soc")]
    pub charge_target_soc: f64,
    #[serde(default = "default_min_price_spread_ct")]
    pub min_price_spread_ct: f64,
    #[serde(default = "default_discharge_quantile_min")]
    pub discharge_quantile_min: f64,
    #[serde(default = "default_discharge_allow_soc")]
    pub discharge_allow_soc: f64,
    #[serde(default = "default_discharge_hold_soc")]
    pub discharge_hold_soc: f64,
    #[serde(default = "default_true")]
    pub charge_winter_only: bool,
}

fn default_import_price() -> f64 {
    0.35
}
fn default_export_price() -> f64 {
    0.08
}
fn default_installation_cost() -> f64 {
    10_000.0
}
fn default_pv_peak_watt() -> f64 {
    10_000.0
}
fn default_winter_months() -> Vec<u32> {
    vec![11, 12, 1, 2]
}
fn default_soc_high() -> f64 {
    80.0
}
fn default_soc_low() -> f64 {
    20.0
}
fn default_price_high() -> f64 {
    0.30
}
fn default_price_low() -> f64 {
    0.15
}
fn default_charge_forecast_max() -> f64 {
    5.0
}
fn default_charge_quantile_max() -> f64 {
    0.3
}
fn default_charge_soc_min() -> f64 {
    30.0
}
fn default_charge_target_soc() -> f64 {
    80.0
}
fn default_min_price_spread_ct() -> f64 {
    15.0
}
fn default_discharge_quantile_min() -> f64 {
    0.7
}
fn default_discharge_allow_soc() -> f64 {
    20.0
}
fn default_discharge_hold_soc() -> f64 {
    50.0
}
fn default_true() -> bool {
    true
}

impl TrackerConfig {
    pub fn is_winter(&self, month: u32) -> bool {
        self.winter_months.contains(&month)
    }

    /// Entities whose state changes the tracker consumes.
    pub fn tracked_entities(&self) -> Vec<String> {
        [
            &self.production_entity,
            &self.export_entity,
            &self.import_entity,
            &self.consumption_entity,
            &self.pv_power_entity,
            &self.battery_soc_entity,
            &self.forecast_entity,
            &self.day_ahead_price_entity,
            &self.price_quantile_entity,
            &self.import_price_entity,
            &self.export_price_entity,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    /// Validates and applies a new configuration. Accumulation state is not
    /// touched, only the options change.
    pub fn apply_update(&mut self, update: TrackerConfig) -> anyhow::Result<()> {
        update.validate()?;
        *self = update;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.installation_cost < 0.0 {
            anyhow::bail!("Installation cost must not be negative");
        }

        if self.pv_peak_watt <= 0.0 {
            anyhow::bail!("PV peak power must be positive");
        }

        for (name, value) in [
            ("battery_soc_high", self.battery_soc_high),
            ("battery_soc_low", self.battery_soc_low),
            ("charge_soc_min", self.charge_soc_min),
            ("charge_target_soc", self.charge_target_soc),
            ("discharge_allow_soc", self.discharge_allow_soc),
            ("discharge_hold_soc", self.discharge_hold_soc),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 100, got {}", name, value);
            }
        }

        if self.battery_soc_low >= self.battery_soc_high {
            anyhow::bail!("battery_soc_low must be below battery_soc_high");
        }

        if self.price_low_threshold >= self.price_high_threshold {
            anyhow::bail!("price_low_threshold must be below price_high_threshold");
        }

        for (name, value) in [
            ("charge_quantile_max", self.charge_quantile_max),
            ("discharge_quantile_min", self.discharge_quantile_min),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }

        if self.winter_months.iter().any(|m| !(1..=12).contains(m)) {
            anyhow::bail!("winter_months must contain month numbers 1-12");
        }

        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub fn test_config() -> TrackerConfig {
        serde_json::from_value(serde_json::json!({
            "production_entity": "sensor.pv_production",
            "export_entity": "sensor.grid_export",
            "import_entity": "sensor.grid_import",
            "consumption_entity": null,
            "pv_power_entity": "sensor.pv_power",
            "battery_soc_entity": "sensor.battery_soc",
            "forecast_entity": "sensor.pv_forecast",
            "day_ahead_price_entity": "sensor.day_ahead_price",
            "price_quantile_entity": "sensor.price_quantile",
            "import_price_entity": "sensor.electricity_price",
            "export_price_entity": null,
            "fixed_tariff": null
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = test_config();

        assert_eq!(config.import_price, 0.35);
        assert_eq!(config.export_price, 0.08);
        assert_eq!(config.installation_cost, 10_000.0);
        assert_eq!(config.winter_months, vec![11, 12, 1, 2]);
        assert!(config.charge_winter_only);
    }

    #[test]
    fn test_apply_update_rejects_invalid_soc() {
        let mut config = test_config();
        let mut update = test_config();
        update.battery_soc_low = 90.0;

        assert!(config.apply_update(update).is_err());
        assert_eq!(config.battery_soc_low, 20.0);
    }

    #[test]
    fn test_tracked_entities_skips_unconfigured() {
        let config = test_config();
        let entities = config.tracked_entities();

        assert!(entities.contains(&"sensor.pv_production".to_string()));
        assert!(!entities.iter().any(|e| e.is_empty()));
        assert_eq!(entities.len(), 9);
    }

    #[test]
    fn test_is_winter() {
        let config = test_config();

        assert!(config.is_winter(12));
        assert!(config.is_winter(1));
        assert!(!config.is_winter(6));
    }
}
