mod config;
pub mod database;
mod memory;
pub mod migrations;

pub use config::{
    DelayConfig, DeliveryConfig, EngineConfig, LoggingConfig, MonitoringConfig, ProximityConfig,
    SamplingConfig,
};
pub use database::SqliteStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::alert::{Alert, AlertId};
use crate::delivery::DeliveryFailure;
use crate::error::StoreError;
use crate::proximity::PersistedProximity;
use crate::trigger::AlertProgress;

/// Returns `~/.config/trainwake[-dev]/` based on TRAINWAKE_ENV.
///
/// Set TRAINWAKE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TRAINWAKE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("trainwake-dev")
    } else {
        base_dir.join("trainwake")
    };

    std::fs::create_dir_all(&dir).map_err(|e| StoreError::DataDir(e.to_string()))?;
    Ok(dir)
}

/// Persistent store boundary.
///
/// Everything is keyed by alert id so a cold start can load alerts one by
/// one and drop a single unreadable record without touching the rest.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Ids of every alert still marked active.
    async fn active_alert_ids(&self) -> Result<Vec<AlertId>, StoreError>;

    async fn load_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError>;

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Remove the alert together with its progress and proximity rows.
    async fn delete_alert(&self, id: AlertId) -> Result<(), StoreError>;

    async fn load_progress(&self, id: AlertId) -> Result<Option<AlertProgress>, StoreError>;

    async fn save_progress(&self, id: AlertId, progress: &AlertProgress) -> Result<(), StoreError>;

    async fn load_proximity(&self, id: AlertId) -> Result<Option<PersistedProximity>, StoreError>;

    async fn save_proximity(
        &self,
        id: AlertId,
        proximity: PersistedProximity,
    ) -> Result<(), StoreError>;

    async fn record_delivery_failure(&self, failure: &DeliveryFailure) -> Result<(), StoreError>;

    async fn delivery_failures(&self, id: AlertId) -> Result<Vec<DeliveryFailure>, StoreError>;
}
