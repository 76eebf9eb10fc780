mod euro;
mod kwh;
mod percent;
mod watt;

pub use euro::{Euro, EuroPerKiloWattHour};
pub use kwh::KiloWattHours;
pub use percent::Percent;
pub use watt::Watt;
