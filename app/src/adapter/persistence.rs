use std::collections::BTreeMap;

use anyhow::Context as _;
use serde_json::Value;
use sqlx::Row as _;

use crate::tracker::SnapshotRepo;

/// Flat key/value snapshot store backed by Postgres. Values are stored as
/// JSON text, keys are the accumulation state field names.
#[derive(Clone)]
pub struct SnapshotStore {
    pool: sqlx::PgPool,
}

impl SnapshotStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tracker_snapshot (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(&self.pool)
        .await
        .context("Error creating snapshot table")?;

        Ok(())
    }
}

impl SnapshotRepo for SnapshotStore {
    async fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        let rows = sqlx::query("SELECT key, value FROM tracker_snapshot")
            .fetch_all(&self.pool)
            .await
            .context("Error loading snapshot")?;

        let mut map = BTreeMap::new();
        for row in rows {
            let key: String = row.get("key");
            let raw: String = row.get("value");

            match serde_json::from_str(&raw) {
                Ok(value) => {
                    map.insert(key, value);
                }
                Err(e) => {
                    tracing::warn!("Skipping unparseable snapshot value for {}: {}", key, e);
                }
            }
        }

        Ok(map)
    }

    async fn save(&self, snapshot: BTreeMap<String, Value>) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("Error starting snapshot transaction")?;

        for (key, value) in snapshot {
            sqlx::query(
                r#"INSERT INTO tracker_snapshot (key, value, updated_at)
                   VALUES ($1, $2, now())
                   ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = now()"#,
            )
            .bind(&key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Error saving snapshot key {}", key))?;
        }

        tx.commit().await.context("Error committing snapshot")?;

        Ok(())
    }
}
