use config::{Config, ConfigError, Environment, File};
use infrastructure::{DatabaseConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::adapter::export::ExportConfig;
use crate::adapter::homeassistant::HomeAssistant;
use crate::tracker::TrackerConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub mqtt: MqttConfig,
    pub monitoring: MonitoringConfig,
    pub homeassistant: HomeAssistant,
    pub export: ExportConfig,
    pub tracker: TrackerConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::default().separator("_").list_separator(","));

        let s = builder.build()?;
        s.try_deserialize()
    }
}
