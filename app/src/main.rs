use infrastructure::Mqtt;
use settings::Settings;
use tokio::sync::mpsc;

use crate::adapter::persistence::SnapshotStore;
use crate::tracker::TrackerRunner;

mod adapter;
mod core;
mod settings;
mod tracker;

struct Infrastructure {
    db_pool: sqlx::PgPool,
    mqtt_client: Mqtt,
}

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.tracker.validate().expect("Invalid tracker configuration");

    let mut infrastructure = Infrastructure::init(&settings)
        .await
        .expect("Error initializing infrastructure");

    let (event_tx, event_rx) = mpsc::channel(16);
    let (command_tx, command_rx) = mpsc::channel(4);

    let snapshot_store = SnapshotStore::new(infrastructure.db_pool.clone());
    snapshot_store
        .ensure_schema()
        .await
        .expect("Error preparing snapshot storage");

    let mut tracker_runner = TrackerRunner::new(settings.tracker.clone(), snapshot_store, event_rx, command_rx);

    let ha_runner = settings
        .homeassistant
        .new_event_runner(
            &mut infrastructure.mqtt_client,
            settings.tracker.tracked_entities(),
            event_tx,
        )
        .await
        .expect("Error initializing Home Assistant adapter");

    let export_runner = settings
        .export
        .new_runner(&mut infrastructure.mqtt_client, tracker_runner.subscribe(), command_tx)
        .await
        .expect("Error initializing MQTT export");

    tracing::info!("Restoring accumulation state");
    tracker_runner
        .bootstrap()
        .await
        .expect("Error restoring accumulation state");

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = infrastructure.process() => {},
        _ = tracker_runner.run() => {},
        _ = ha_runner.run() => {},
        _ = export_runner.run() => {},
    );
}

impl Infrastructure {
    pub async fn init(settings: &Settings) -> anyhow::Result<Self> {
        settings.monitoring.init().expect("Error initializing monitoring");

        let db_pool = settings.database.new_pool().await.expect("Error initializing database");

        let mqtt_client = settings.mqtt.new_client();

        Ok(Self { db_pool, mqtt_client })
    }

    async fn process(self) {
        tokio::select!(
            _ = self.mqtt_client.run() => {},
        )
    }
}
