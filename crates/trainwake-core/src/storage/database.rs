//! SQLite-based alert storage.
//!
//! Provides persistent storage for:
//! - Alerts (JSON payload, active flag)
//! - Per-alert progress: phase, escalation, cached stop sequence
//! - Last proximity tier
//! - Exhausted notification deliveries

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{data_dir, migrations, AlertStore};
use crate::alert::{Alert, AlertId};
use crate::clock::{Clock, SystemClock};
use crate::delivery::{DeliveryFailure, NotificationKind};
use crate::error::StoreError;
use crate::proximity::{PersistedProximity, Tier};
use crate::trigger::AlertProgress;

/// SQLite database for alert state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open the database at `~/.config/trainwake/trainwake.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let path = data_dir()?.join("trainwake.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// Stamp `updated_at` from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every stored alert, active or not, oldest first. Unreadable rows are
    /// skipped with a warning.
    pub fn list_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, payload FROM alerts ORDER BY updated_at")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            match serde_json::from_str::<Alert>(&payload) {
                Ok(alert) => alerts.push(alert),
                Err(e) => tracing::warn!(alert_id = %id, error = %e, "skipping unreadable alert"),
            }
        }
        Ok(alerts)
    }

    fn corrupt(id: AlertId, err: impl std::fmt::Display) -> StoreError {
        StoreError::Corrupt {
            id,
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn active_alert_ids(&self) -> Result<Vec<AlertId>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM alerts WHERE active = 1 ORDER BY updated_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            let raw = row?;
            match AlertId::from_str(&raw) {
                Ok(id) => ids.push(id),
                Err(e) => tracing::warn!(raw_id = %raw, error = %e, "skipping alert with malformed id"),
            }
        }
        Ok(ids)
    }

    async fn load_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM alerts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| Self::corrupt(id, e)))
            .transpose()
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let payload = serde_json::to_string(alert)?;
        self.conn().execute(
            "INSERT INTO alerts (id, active, payload, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                active = excluded.active,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                alert.id.to_string(),
                alert.active,
                payload,
                self.clock.now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn delete_alert(&self, id: AlertId) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let key = id.to_string();
        tx.execute("DELETE FROM alerts WHERE id = ?1", params![key])?;
        tx.execute("DELETE FROM progress WHERE alert_id = ?1", params![key])?;
        tx.execute("DELETE FROM proximity WHERE alert_id = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }

    async fn load_progress(&self, id: AlertId) -> Result<Option<AlertProgress>, StoreError> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM progress WHERE alert_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| Self::corrupt(id, e)))
            .transpose()
    }

    async fn save_progress(&self, id: AlertId, progress: &AlertProgress) -> Result<(), StoreError> {
        let payload = serde_json::to_string(progress)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO progress (alert_id, payload, updated_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), payload, progress.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_proximity(&self, id: AlertId) -> Result<Option<PersistedProximity>, StoreError> {
        let tier: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT tier FROM proximity WHERE alert_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(tier) = tier else {
            return Ok(None);
        };
        let tier = tier
            .map(|t| serde_json::from_value::<Tier>(serde_json::Value::String(t)))
            .transpose()
            .map_err(|e| Self::corrupt(id, e))?;
        Ok(Some(PersistedProximity { tier }))
    }

    async fn save_proximity(
        &self,
        id: AlertId,
        proximity: PersistedProximity,
    ) -> Result<(), StoreError> {
        let tier = proximity
            .tier
            .map(serde_json::to_value)
            .transpose()?
            .and_then(|v| v.as_str().map(str::to_string));
        self.conn().execute(
            "INSERT OR REPLACE INTO proximity (alert_id, tier) VALUES (?1, ?2)",
            params![id.to_string(), tier],
        )?;
        Ok(())
    }

    async fn record_delivery_failure(&self, failure: &DeliveryFailure) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO delivery_failures (alert_id, kind, attempts, error, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.alert_id.to_string(),
                failure.kind.as_str(),
                failure.attempts,
                failure.error,
                failure.failed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delivery_failures(&self, id: AlertId) -> Result<Vec<DeliveryFailure>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT kind, attempts, error, failed_at FROM delivery_failures
             WHERE alert_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut failures = Vec::new();
        for row in rows {
            let (kind, attempts, error, failed_at) = row?;
            let kind = NotificationKind::from_str(&kind).map_err(|e| Self::corrupt(id, e))?;
            let failed_at = DateTime::parse_from_rfc3339(&failed_at)
                .map_err(|e| Self::corrupt(id, e))?
                .with_timezone(&Utc);
            failures.push(DeliveryFailure {
                alert_id: id,
                kind,
                attempts,
                error,
                failed_at,
            });
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Occurrence, Recurrence, SnoozeConfig, Station, Trigger};
    use crate::clock::ManualClock;
    use crate::geo::Coordinate;
    use chrono::{Duration, TimeZone};

    fn alert() -> Alert {
        let dep = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        Alert {
            id: AlertId::new(),
            departure_station: "Tokyo".into(),
            target: Station {
                name: "Shinjuku".into(),
                coordinate: Coordinate::new(35.6896, 139.7006),
            },
            trigger: Trigger::TimeBeforeArrival { minutes: 5 },
            snooze: SnoozeConfig::default(),
            schedule: Occurrence {
                departure_at: dep,
                arrival_at: dep + Duration::minutes(30),
            },
            train: None,
            style: String::new(),
            recurrence: Recurrence::Weekdays,
            active: true,
            created_at: dep - Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn alert_roundtrip_and_active_listing() {
        let store = SqliteStore::open_memory().unwrap();
        let mut a = alert();
        store.save_alert(&a).await.unwrap();

        assert_eq!(store.load_alert(a.id).await.unwrap(), Some(a.clone()));
        assert_eq!(store.active_alert_ids().await.unwrap(), vec![a.id]);

        a.active = false;
        store.save_alert(&a).await.unwrap();
        assert!(store.active_alert_ids().await.unwrap().is_empty());
        assert_eq!(store.list_alerts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_ids_follow_the_injected_clock() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 10, 5, 0).unwrap());
        let store = SqliteStore::open_memory()
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let (first, second) = (alert(), alert());

        store.save_alert(&first).await.unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());
        store.save_alert(&second).await.unwrap();

        assert_eq!(
            store.active_alert_ids().await.unwrap(),
            vec![second.id, first.id]
        );
    }

    #[tokio::test]
    async fn progress_and_proximity_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let a = alert();
        let progress = AlertProgress::new(a.schedule, a.trigger, None, Vec::new(), a.created_at);
        store.save_progress(a.id, &progress).await.unwrap();
        assert_eq!(store.load_progress(a.id).await.unwrap(), Some(progress));

        assert_eq!(store.load_proximity(a.id).await.unwrap(), None);
        let near = PersistedProximity {
            tier: Some(Tier::Near),
        };
        store.save_proximity(a.id, near).await.unwrap();
        assert_eq!(store.load_proximity(a.id).await.unwrap(), Some(near));
    }

    #[tokio::test]
    async fn corrupt_payload_is_reported_per_alert() {
        let store = SqliteStore::open_memory().unwrap();
        let a = alert();
        store.save_alert(&a).await.unwrap();
        store
            .conn()
            .execute("UPDATE alerts SET payload = '{broken' WHERE id = ?1", params![a.id.to_string()])
            .unwrap();

        let err = store.load_alert(a.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id, .. } if id == a.id));
    }

    #[tokio::test]
    async fn delete_removes_every_row() {
        let store = SqliteStore::open_memory().unwrap();
        let a = alert();
        store.save_alert(&a).await.unwrap();
        store
            .save_progress(
                a.id,
                &AlertProgress::new(a.schedule, a.trigger, None, Vec::new(), a.created_at),
            )
            .await
            .unwrap();
        store.delete_alert(a.id).await.unwrap();
        assert_eq!(store.load_alert(a.id).await.unwrap(), None);
        assert_eq!(store.load_progress(a.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delivery_failures_are_kept_in_order() {
        let store = SqliteStore::open_memory().unwrap();
        let id = AlertId::new();
        let failed_at = Utc.with_ymd_and_hms(2026, 10, 19, 10, 25, 13).unwrap();
        for kind in [NotificationKind::Primary, NotificationKind::Terminal] {
            store
                .record_delivery_failure(&DeliveryFailure {
                    alert_id: id,
                    kind,
                    attempts: 4,
                    error: "busy".into(),
                    failed_at,
                })
                .await
                .unwrap();
        }
        let failures = store.delivery_failures(id).await.unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].kind, NotificationKind::Terminal);
        assert_eq!(failures[0].failed_at, failed_at);
    }
}
