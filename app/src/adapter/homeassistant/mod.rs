mod http;

use std::collections::HashSet;

use serde::{Deserialize, Deserializer};
use tokio::sync::mpsc;

use infrastructure::{Mqtt, MqttSubscription};

use crate::core::time::DateTime;
use crate::tracker::IncomingValue;
use http::HaRestClient;

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistant {
    pub topic_event: String,
    pub url: String,
    pub token: String,
}

impl HomeAssistant {
    pub async fn new_event_runner(
        &self,
        mqtt: &mut Mqtt,
        tracked_entities: Vec<String>,
        tx: mpsc::Sender<IncomingValue>,
    ) -> anyhow::Result<HaEventRunner> {
        let rx = mqtt.subscribe(self.topic_event.clone()).await?;
        let client = HaRestClient::new(&self.url, &self.token)?;

        Ok(HaEventRunner {
            client,
            rx,
            tracked: tracked_entities.into_iter().collect(),
            tx,
        })
    }
}

/// Feeds entity state changes into the tracker. Starts with a one-time REST
/// load of all current states so the counters are known before the first
/// event arrives, then follows the MQTT event stream.
pub struct HaEventRunner {
    client: HaRestClient,
    rx: MqttSubscription,
    tracked: HashSet<String>,
    tx: mpsc::Sender<IncomingValue>,
}

impl HaEventRunner {
    pub async fn run(mut self) {
        self.bootstrap().await;

        while let Some(msg) = self.rx.recv().await {
            let event: StateChangedEvent = match serde_json::from_str(&msg.payload) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!("Error parsing state-changed event: {:?} -- {:?}", msg.payload, e);
                    continue;
                }
            };

            self.forward(event).await;
        }

        tracing::error!("Home Assistant event subscription closed");
    }

    async fn bootstrap(&self) {
        match self.client.get_current_states().await {
            Ok(states) => {
                tracing::info!("Loaded {} current states from Home Assistant", states.len());
                for event in states {
                    self.forward(event).await;
                }
            }
            Err(e) => {
                tracing::error!("Error loading initial states from Home Assistant: {:?}", e);
            }
        }
    }

    async fn forward(&self, event: StateChangedEvent) {
        if !self.tracked.contains(&event.entity_id) {
            return;
        }

        if let Err(e) = self.tx.send(to_incoming_value(event)).await {
            tracing::error!("Error forwarding state change to tracker: {:?}", e);
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct StateChangedEvent {
    pub entity_id: String,
    pub state: StateValue,
    pub last_changed: DateTime,
}

#[derive(Debug)]
pub enum StateValue {
    Available(String),
    Unavailable,
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match value.as_str() {
            "unavailable" | "unknown" => Ok(StateValue::Unavailable),
            _ => Ok(StateValue::Available(value)),
        }
    }
}

fn to_incoming_value(event: StateChangedEvent) -> IncomingValue {
    let value = match &event.state {
        StateValue::Available(raw) => match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::debug!("Non-numeric state for {}: {:?}", event.entity_id, raw);
                None
            }
        },
        StateValue::Unavailable => None,
    };

    IncomingValue {
        entity_id: event.entity_id,
        value,
        timestamp: event.last_changed,
    }
}
