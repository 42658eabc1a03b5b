//! In-process store for simulation and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::AlertStore;
use crate::alert::{Alert, AlertId};
use crate::delivery::DeliveryFailure;
use crate::error::StoreError;
use crate::proximity::PersistedProximity;
use crate::trigger::AlertProgress;

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order, so listings are stable.
    order: Vec<AlertId>,
    alerts: HashMap<AlertId, Alert>,
    progress: HashMap<AlertId, AlertProgress>,
    proximity: HashMap<AlertId, PersistedProximity>,
    failures: Vec<DeliveryFailure>,
    corrupt: Vec<AlertId>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later load of `id` fail as unreadable.
    pub fn mark_corrupt(&self, id: AlertId) {
        self.tables().corrupt.push(id);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        let tables = self.tables();
        tables
            .order
            .iter()
            .filter_map(|id| tables.alerts.get(id).cloned())
            .collect()
    }

    fn check(tables: &Tables, id: AlertId) -> Result<(), StoreError> {
        if tables.corrupt.contains(&id) {
            return Err(StoreError::Corrupt {
                id,
                message: "record marked unreadable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn active_alert_ids(&self) -> Result<Vec<AlertId>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .order
            .iter()
            .filter(|id| tables.corrupt.contains(id) || tables.alerts.get(id).is_some_and(|a| a.active))
            .copied()
            .collect())
    }

    async fn load_alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        let tables = self.tables();
        Self::check(&tables, id)?;
        Ok(tables.alerts.get(&id).cloned())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if !tables.order.contains(&alert.id) {
            tables.order.push(alert.id);
        }
        tables.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn delete_alert(&self, id: AlertId) -> Result<(), StoreError> {
        let mut tables = self.tables();
        tables.order.retain(|o| *o != id);
        tables.alerts.remove(&id);
        tables.progress.remove(&id);
        tables.proximity.remove(&id);
        tables.corrupt.retain(|c| *c != id);
        Ok(())
    }

    async fn load_progress(&self, id: AlertId) -> Result<Option<AlertProgress>, StoreError> {
        let tables = self.tables();
        Self::check(&tables, id)?;
        Ok(tables.progress.get(&id).cloned())
    }

    async fn save_progress(&self, id: AlertId, progress: &AlertProgress) -> Result<(), StoreError> {
        self.tables().progress.insert(id, progress.clone());
        Ok(())
    }

    async fn load_proximity(&self, id: AlertId) -> Result<Option<PersistedProximity>, StoreError> {
        Ok(self.tables().proximity.get(&id).copied())
    }

    async fn save_proximity(
        &self,
        id: AlertId,
        proximity: PersistedProximity,
    ) -> Result<(), StoreError> {
        self.tables().proximity.insert(id, proximity);
        Ok(())
    }

    async fn record_delivery_failure(&self, failure: &DeliveryFailure) -> Result<(), StoreError> {
        self.tables().failures.push(failure.clone());
        Ok(())
    }

    async fn delivery_failures(&self, id: AlertId) -> Result<Vec<DeliveryFailure>, StoreError> {
        Ok(self
            .tables()
            .failures
            .iter()
            .filter(|f| f.alert_id == id)
            .cloned()
            .collect())
    }
}
