use serde::{Deserialize, Serialize};

use crate::core::unit::EuroPerKiloWattHour;
use crate::tracker::values::ValueSource;

/// Unit of a statically configured price value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    #[default]
    Eur,
    Cent,
}

/// Provenance of a resolved price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    Cached,
    Fallback,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub rate: EuroPerKiloWattHour,
    pub source: PriceSource,
}

/// One externally sourced price with the fallback chain
/// live reading -> cached last-good -> static configured value.
///
/// The minor-unit auto-detection (values above 1.0 are taken as ct/kWh) only
/// applies to live and cached sensor readings. The static value uses its
/// explicitly configured unit. Readings close to 1 €/kWh can be misclassified
/// by the heuristic; that matches the established behavior and is not
/// corrected here.
#[derive(Debug, Clone)]
pub struct PriceChannel {
    entity_id: Option<String>,
    fallback: f64,
    fallback_unit: PriceUnit,
    cached: Option<f64>,
}

impl PriceChannel {
    pub fn new(entity_id: Option<String>, fallback: f64, fallback_unit: PriceUnit) -> Self {
        Self {
            entity_id,
            fallback,
            fallback_unit,
            cached: None,
        }
    }

    pub fn resolve(&mut self, source: &dyn ValueSource) -> PriceQuote {
        let entity_id = match &self.entity_id {
            Some(id) => id,
            None => {
                return PriceQuote {
                    rate: explicit_unit_to_eur(self.fallback, self.fallback_unit),
                    source: PriceSource::Config,
                };
            }
        };

        if let Some(reading) = source.current(entity_id) {
            self.cached = Some(reading.value);
            return PriceQuote {
                rate: auto_detect_to_eur(reading.value),
                source: PriceSource::Live,
            };
        }

        if let Some(cached) = self.cached {
            return PriceQuote {
                rate: auto_detect_to_eur(cached),
                source: PriceSource::Cached,
            };
        }

        tracing::info!("Price sensor {} unavailable without cache, using configured value", entity_id);
        PriceQuote {
            rate: explicit_unit_to_eur(self.fallback, self.fallback_unit),
            source: PriceSource::Fallback,
        }
    }
}

pub(crate) fn auto_detect_to_eur(raw: f64) -> EuroPerKiloWattHour {
    if raw > 1.0 {
        tracing::debug!("Auto-detect: price {} > 1, interpreting as ct/kWh", raw);
        EuroPerKiloWattHour(raw / 100.0)
    } else {
        EuroPerKiloWattHour(raw)
    }
}

pub(crate) fn explicit_unit_to_eur(value: f64, unit: PriceUnit) -> EuroPerKiloWattHour {
    match unit {
        PriceUnit::Eur => EuroPerKiloWattHour(value),
        PriceUnit::Cent => EuroPerKiloWattHour(value / 100.0),
    }
}

/// How the import side of the bill is priced.
#[derive(Debug, Clone)]
pub enum PricingStrategy {
    /// Import price goes through the live/cached/fallback chain.
    Dynamic,
    /// Import price is a fixed contract tariff.
    Fixed { rate: EuroPerKiloWattHour },
}

pub struct PriceResolver {
    import: PriceChannel,
    export: PriceChannel,
    strategy: PricingStrategy,
}

impl PriceResolver {
    pub fn new(import: PriceChannel, export: PriceChannel, strategy: PricingStrategy) -> Self {
        Self {
            import,
            export,
            strategy,
        }
    }

    pub fn import_price(&mut self, source: &dyn ValueSource) -> PriceQuote {
        match &self.strategy {
            PricingStrategy::Fixed { rate } => PriceQuote {
                rate: *rate,
                source: PriceSource::Config,
            },
            PricingStrategy::Dynamic => self.import.resolve(source),
        }
    }

    pub fn export_price(&mut self, source: &dyn ValueSource) -> PriceQuote {
        self.export.resolve(source)
    }

    /// Tariff used as the fixed side of the spot-vs-fixed comparison.
    pub fn comparison_tariff(&self) -> EuroPerKiloWattHour {
        match &self.strategy {
            PricingStrategy::Fixed { rate } => *rate,
            PricingStrategy::Dynamic => explicit_unit_to_eur(self.import.fallback, self.import.fallback_unit),
        }
    }
}

/// Minimum and maximum day-ahead price observed today. The spread between
/// them gates grid charging: without a meaningful spread there is no
/// arbitrage opportunity.
#[derive(Debug, Clone)]
pub struct DaySpread {
    day: Option<chrono::NaiveDate>,
    min: f64,
    max: f64,
}

impl DaySpread {
    pub fn new() -> Self {
        Self {
            day: None,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn observe(&mut self, price: EuroPerKiloWattHour, day: chrono::NaiveDate) {
        if self.day != Some(day) {
            self.day = Some(day);
            self.min = f64::INFINITY;
            self.max = f64::NEG_INFINITY;
        }

        self.min = self.min.min(price.0);
        self.max = self.max.max(price.0);
    }

    pub fn spread_cents(&self) -> Option<f64> {
        if self.min.is_finite() && self.max.is_finite() {
            Some((self.max - self.min) * 100.0)
        } else {
            None
        }
    }
}

impl Default for DaySpread {
    fn default() -> Self {
        Self::new()
    }
}
