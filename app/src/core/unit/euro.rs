use std::{
    fmt::Display,
    ops::{Add, Mul, Sub},
};

use derive_more::derive::AsRef;
use serde::{Deserialize, Serialize};

use super::KiloWattHours;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsRef, Serialize, Deserialize)]
pub struct Euro(pub f64);

impl Display for Euro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} €", self.0)
    }
}

impl From<&Euro> for f64 {
    fn from(value: &Euro) -> Self {
        value.0
    }
}

impl From<f64> for Euro {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Add for Euro {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Euro(self.0 + rhs.0)
    }
}

impl Sub for Euro {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Euro(self.0 - rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsRef, Serialize, Deserialize)]
pub struct EuroPerKiloWattHour(pub f64);

impl Display for EuroPerKiloWattHour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} €/kWh", self.0)
    }
}

impl From<&EuroPerKiloWattHour> for f64 {
    fn from(value: &EuroPerKiloWattHour) -> Self {
        value.0
    }
}

impl From<f64> for EuroPerKiloWattHour {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Mul<EuroPerKiloWattHour> for KiloWattHours {
    type Output = Euro;

    fn mul(self, rhs: EuroPerKiloWattHour) -> Self::Output {
        Euro(self.0 * rhs.0)
    }
}
