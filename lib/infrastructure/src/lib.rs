mod db;
mod http;
mod monitoring;
mod mqtt;

pub use monitoring::MonitoringConfig;

pub use db::DatabaseConfig;
pub use http::HttpClientConfig;
pub use mqtt::{Mqtt, MqttConfig, MqttInMessage, MqttSender, MqttSubscription};
