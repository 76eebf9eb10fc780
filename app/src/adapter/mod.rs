pub mod export;
pub mod homeassistant;
pub mod persistence;
