use serde::Deserialize;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::sync::mpsc;

use infrastructure::{Mqtt, MqttInMessage, MqttSender, MqttSubscription};

use crate::tracker::{TrackerCommand, TrackerConfig, TrackerState};

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub base_topic: String,
}

impl ExportConfig {
    pub async fn new_runner(
        &self,
        mqtt: &mut Mqtt,
        state_rx: Receiver<TrackerState>,
        command_tx: mpsc::Sender<TrackerCommand>,
    ) -> anyhow::Result<ExportRunner> {
        let command_rx = mqtt.subscribe_all(&command_topics(&self.base_topic)).await?;

        Ok(ExportRunner {
            state_rx,
            command_rx,
            command_tx,
            mqtt_sender: mqtt.sender(),
            base_topic: self.base_topic.clone(),
        })
    }
}

fn command_topics(base_topic: &str) -> Vec<String> {
    vec![
        format!("{}/command/reset_grid_import", base_topic),
        format!("{}/command/config", base_topic),
    ]
}

/// Publishes each recomputed tracker state as retained MQTT messages, one
/// topic per surface, and feeds commands arriving via MQTT back into the
/// tracker.
pub struct ExportRunner {
    state_rx: Receiver<TrackerState>,
    command_rx: MqttSubscription,
    command_tx: mpsc::Sender<TrackerCommand>,
    mqtt_sender: MqttSender,
    base_topic: String,
}

impl ExportRunner {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.command_rx.recv() => {
                    self.handle_command_message(msg).await;
                }

                state = self.state_rx.recv() => {
                    match state {
                        Ok(state) => {
                            self.publish_state(&state).await;
                        }
                        Err(RecvError::Closed) => {
                            tracing::error!("Tracker state channel closed");
                            return;
                        }
                        Err(RecvError::Lagged(count)) => {
                            //only the latest state matters, lagging is harmless
                            tracing::debug!("Tracker state receiver lagged by {} messages", count);
                        }
                    }
                }
            }
        }
    }

    async fn publish_state(&self, state: &TrackerState) {
        let surfaces = [
            ("savings", serde_json::to_string(&state.report)),
            ("recommendation", serde_json::to_string(&state.recommendation)),
            ("battery", serde_json::to_string(&state.battery)),
        ];

        for (surface, payload) in surfaces {
            let topic = format!("{}/{}", self.base_topic, surface);

            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("Error serializing {} payload: {:?}", surface, e);
                    continue;
                }
            };

            if let Err(e) = self.mqtt_sender.send_retained(&topic, payload).await {
                tracing::error!("Error publishing to {}: {:?}", topic, e);
            }
        }
    }

    async fn handle_command_message(&self, msg: MqttInMessage) {
        let command = match parse_command(&self.base_topic, &msg) {
            Some(command) => command,
            None => {
                tracing::warn!("Unsupported command message on {}: {:?}", msg.topic, msg.payload);
                return;
            }
        };

        tracing::info!("Received tracker command via {}", msg.topic);

        if let Err(e) = self.command_tx.send(command).await {
            tracing::error!("Error forwarding tracker command: {:?}", e);
        }
    }
}

fn parse_command(base_topic: &str, msg: &MqttInMessage) -> Option<TrackerCommand> {
    match msg.topic.strip_prefix(base_topic)? {
        "/command/reset_grid_import" => Some(TrackerCommand::ResetGridImport),
        "/command/config" => match serde_json::from_str::<TrackerConfig>(&msg.payload) {
            Ok(config) => Some(TrackerCommand::ApplyConfig(config)),
            Err(e) => {
                tracing::error!("Error parsing configuration update: {:?}", e);
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;

    use super::*;
    use crate::core::unit::Percent;
    use crate::tracker::battery::BatteryAdvice;
    use crate::tracker::recommendation::{Recommendation, Verdict};

    #[test]
    fn test_recommendation_payload_shape() {
        let recommendation = Recommendation {
            verdict: Verdict::Good,
            score: 4,
            reasons: vec!["good PV power".to_string()],
        };

        assert_json_eq!(
            serde_json::to_value(&recommendation).unwrap(),
            serde_json::json!({
                "verdict": "good",
                "score": 4,
                "reasons": ["good PV power"]
            })
        );
    }

    #[test]
    fn test_battery_payload_shape() {
        let advice = BatteryAdvice {
            should_charge: false,
            should_discharge: true,
            discharge_floor: Percent(20.0),
            charge_target: Percent(80.0),
            reasons: vec!["expensive price window, discharging pays off".to_string()],
        };

        assert_json_eq!(
            serde_json::to_value(&advice).unwrap(),
            serde_json::json!({
                "should_charge": false,
                "should_discharge": true,
                "discharge_floor": 20.0,
                "charge_target": 80.0,
                "reasons": ["expensive price window, discharging pays off"]
            })
        );
    }

    #[test]
    fn test_parse_reset_command() {
        let msg = MqttInMessage {
            topic: "pv_tracker/command/reset_grid_import".to_string(),
            payload: "".to_string(),
        };

        assert!(matches!(
            parse_command("pv_tracker", &msg),
            Some(TrackerCommand::ResetGridImport)
        ));
    }

    #[test]
    fn test_parse_config_command() {
        let msg = MqttInMessage {
            topic: "pv_tracker/command/config".to_string(),
            payload: r#"{"production_entity": "sensor.pv", "export_entity": null, "import_entity": null,
                "consumption_entity": null, "pv_power_entity": null, "battery_soc_entity": null,
                "forecast_entity": null, "day_ahead_price_entity": null, "price_quantile_entity": null,
                "import_price_entity": null, "export_price_entity": null, "fixed_tariff": null,
                "installation_date": null}"#
                .to_string(),
        };

        match parse_command("pv_tracker", &msg) {
            Some(TrackerCommand::ApplyConfig(config)) => {
                assert_eq!(config.production_entity.as_deref(), Some("sensor.pv"));
            }
            other => panic!("Expected config command, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_topic_is_rejected() {
        let msg = MqttInMessage {
            topic: "pv_tracker/command/reboot".to_string(),
            payload: "".to_string(),
        };

        assert!(parse_command("pv_tracker", &msg).is_none());
    }
}
