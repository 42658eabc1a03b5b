//! Keeping the evaluation loop alive across suspension.
//!
//! The host process may sleep between location events. Every background
//! wake runs [`AlertEngine::on_wake`]: alerts missing from memory are
//! rehydrated from the store, each alert is evaluated once (catching any
//! trigger boundary slept through), and the next wake is requested at the
//! tightest deadline any alert needs.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::monitor::AlertMonitor;
use super::runtime::AlertEngine;
use crate::alert::AlertId;
use crate::error::{Result, StoreError};
use crate::events::EngineEvent;
use crate::proximity::Tier;
use crate::route::RouteIssue;
use crate::storage::SamplingConfig;
use crate::trigger::AlertProgress;

/// What one wake pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeReport {
    pub rehydrated: usize,
    pub removed: usize,
    pub dropped: usize,
    pub evaluated: usize,
    pub next_wake: Option<DateTime<Utc>>,
}

/// Re-wake cadence while an alert is watching, by tier. `Imminent` asks for
/// the earliest possible wake.
pub fn wake_interval(tier: Tier, config: &SamplingConfig) -> Duration {
    let secs = match tier {
        Tier::Imminent => 0,
        Tier::Near => config.near_interval_secs,
        Tier::Approaching => config.approaching_interval_secs,
        Tier::Far => config.far_interval_secs,
    };
    Duration::seconds(i64::from(secs))
}

impl AlertEngine {
    /// Load every active alert from the store and evaluate them.
    pub async fn start(&self) -> Result<WakeReport> {
        let loaded = self.reload().await?;
        tracing::info!(alerts = loaded, "engine started");
        self.on_wake().await
    }

    /// Background wake entry point.
    ///
    /// # Errors
    /// Only when the list of active alerts cannot be read; a single
    /// unreadable alert is dropped and reported instead.
    pub async fn on_wake(&self) -> Result<WakeReport> {
        let mut report = WakeReport::default();
        let stored = self.store.active_alert_ids().await?;

        for id in &stored {
            if self.registry.contains(*id) || self.registry.is_dropped(*id) {
                continue;
            }
            match self.rehydrate(*id).await {
                Ok(Some(monitor)) => {
                    tracing::debug!(alert_id = %id, phase = %monitor.progress.phase, "alert rehydrated");
                    self.registry.insert(monitor);
                    report.rehydrated += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    self.drop_alert(*id, &e).await;
                    report.dropped += 1;
                }
            }
        }

        let stored: HashSet<AlertId> = stored.into_iter().collect();
        for id in self.registry.ids() {
            if !stored.contains(&id) && self.remove(id).await {
                report.removed += 1;
            }
        }

        for handle in self.registry.handles() {
            let mut guard = handle.lock().await;
            let monitor = &mut *guard;
            if handle.is_cancelled() {
                continue;
            }
            self.poll_delay(monitor).await;
            self.tick(&handle, monitor).await;
            report.evaluated += 1;
        }

        report.next_wake = self.rearm().await;
        tracing::debug!(?report, "wake pass complete");
        Ok(report)
    }

    /// Full re-sync of the registry from the store, for when alerts were
    /// changed behind the engine's back.
    pub async fn reload(&self) -> Result<usize> {
        let ids = self.store.active_alert_ids().await?;

        let mut monitors = Vec::with_capacity(ids.len());
        let mut dropped = Vec::new();
        for id in ids {
            match self.rehydrate(id).await {
                Ok(Some(monitor)) => monitors.push(monitor),
                Ok(None) => {}
                Err(e) => dropped.push((id, e)),
            }
        }

        let keep: HashSet<AlertId> = monitors.iter().map(|m| m.id()).collect();
        let now = self.now();
        for id in self.registry.ids() {
            if !keep.contains(&id) {
                self.sampling.release(id).await;
                self.emit(EngineEvent::AlertRemoved { alert_id: id, at: now });
            }
        }

        let handles = self.registry.replace(monitors);
        for (id, e) in dropped {
            self.drop_alert(id, &e).await;
        }
        for handle in &handles {
            let monitor = handle.lock().await;
            self.registry.publish(monitor.snapshot(&self.adjuster, now));
        }

        tracing::info!(alerts = handles.len(), "registry reloaded");
        Ok(handles.len())
    }

    /// Request the next background wake. Returns the instant asked for, or
    /// `None` when no alert needs one.
    pub(super) async fn rearm(&self) -> Option<DateTime<Utc>> {
        let now = self.now();
        let mut earliest: Option<DateTime<Utc>> = None;

        for handle in self.registry.handles() {
            let monitor = handle.lock().await;
            if let Some(at) = self.next_wake_for(&monitor, now) {
                earliest = Some(earliest.map_or(at, |e| e.min(at)));
            }
        }

        let not_before = earliest?;
        self.waker.request_wake(not_before).await;
        tracing::debug!(%not_before, "background wake requested");
        self.emit(EngineEvent::WakeRequested { not_before, at: now });
        Some(not_before)
    }

    fn next_wake_for(&self, monitor: &AlertMonitor, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !monitor.alert.active {
            return None;
        }
        let arrival = monitor.arrival(&self.adjuster, now);
        let deadline = self.evaluator.next_deadline(&monitor.progress, &arrival, now);
        let cadence = monitor
            .progress
            .phase
            .is_watching()
            .then(|| now + wake_interval(monitor.tier(), &self.config().sampling));

        [deadline, cadence].into_iter().flatten().min()
    }

    /// Build a monitor from stored state. A missing progress row gets a
    /// fresh time-based progress, since the route is no longer at hand; if
    /// no time trigger fits the journey the alert is unreadable.
    async fn rehydrate(&self, id: AlertId) -> std::result::Result<Option<AlertMonitor>, StoreError> {
        let Some(alert) = self.store.load_alert(id).await? else {
            return Ok(None);
        };
        let progress = match self.store.load_progress(id).await? {
            Some(progress) => progress,
            None => {
                tracing::warn!(alert_id = %id, "no stored progress, restarting on the timetable alone");
                let trigger = alert
                    .trigger
                    .degraded_to_time(
                        self.config().monitoring.minutes_per_station,
                        alert.schedule.duration(),
                    )
                    .ok_or_else(|| StoreError::Corrupt {
                        id,
                        message: "no stored progress and no time trigger fits the journey".into(),
                    })?;
                AlertProgress::new(
                    alert.schedule,
                    trigger,
                    None,
                    vec![RouteIssue::InsufficientRouteData { known: 0 }],
                    self.now(),
                )
            }
        };
        let proximity = self.store.load_proximity(id).await?;
        Ok(Some(AlertMonitor::restore(alert, progress, proximity)))
    }

    async fn drop_alert(&self, id: AlertId, error: &StoreError) {
        tracing::error!(alert_id = %id, error = %error, "dropping alert with unreadable state");
        self.registry.mark_dropped(id);
        self.sampling.release(id).await;
        self.emit(EngineEvent::AlertDropped {
            alert_id: id,
            reason: error.to_string(),
            at: self.now(),
        });
    }

    async fn poll_delay(&self, monitor: &mut AlertMonitor) {
        let (Some(feed), Some(train)) = (self.delay_feed.as_ref(), monitor.alert.train.as_ref())
        else {
            return;
        };
        let Some(record) = feed.latest(train).await else {
            return;
        };
        if monitor.delay.as_ref() != Some(&record) {
            self.apply_delay(monitor, record);
        }
    }
}
