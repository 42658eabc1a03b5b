//! The alert engine: host-facing commands and the per-alert evaluation tick.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::broadcast;

use super::monitor::{AlertMonitor, AlertSnapshot};
use super::ports::{DelayFeed, WakeScheduler};
use super::registry::{AlertHandle, AlertRegistry};
use crate::alert::{Alert, AlertDraft, AlertId, AlertSetup};
use crate::clock::Clock;
use crate::delay::{DelayAdjuster, DelayRecord, DelayStatus};
use crate::delivery::{
    DeliveryFailure, DeliveryOutcome, DeliveryRequest, MessageParams, NotificationKind,
    NotificationSink, RetryPolicy,
};
use crate::error::{CoreError, Result};
use crate::escalation::ReminderKind;
use crate::events::EngineEvent;
use crate::proximity::{LocationSample, ProximityState, TierThresholds};
use crate::route::{Route, RouteIssue};
use crate::sampling::{LocationProvider, PermissionState, PowerState, SamplingController};
use crate::storage::{AlertStore, EngineConfig};
use crate::trigger::{AlertPhase, FireReason, SubMode, Tick, TriggerDecision, TriggerEvaluator};

const EVENT_CAPACITY: usize = 256;

/// Collaborators supplied by the host.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn AlertStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub location: Arc<dyn LocationProvider>,
    pub waker: Arc<dyn WakeScheduler>,
    pub clock: Arc<dyn Clock>,
    pub delay_feed: Option<Arc<dyn DelayFeed>>,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn AlertStore>,
        sink: Arc<dyn NotificationSink>,
        location: Arc<dyn LocationProvider>,
        waker: Arc<dyn WakeScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sink,
            location,
            waker,
            clock,
            delay_feed: None,
        }
    }

    pub fn with_delay_feed(mut self, feed: Arc<dyn DelayFeed>) -> Self {
        self.delay_feed = Some(feed);
        self
    }
}

/// Owns every active alert and drives it from location updates, background
/// wakes and user commands.
///
/// Constructed once by the host and shared by reference; there is no global
/// instance.
pub struct AlertEngine {
    config: EngineConfig,
    pub(super) store: Arc<dyn AlertStore>,
    sink: Arc<dyn NotificationSink>,
    pub(super) waker: Arc<dyn WakeScheduler>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) delay_feed: Option<Arc<dyn DelayFeed>>,
    pub(super) registry: AlertRegistry,
    pub(super) sampling: SamplingController,
    setup: AlertSetup,
    pub(super) evaluator: TriggerEvaluator,
    pub(super) adjuster: DelayAdjuster,
    thresholds: TierThresholds,
    retry: RetryPolicy,
    tz: Tz,
    events: broadcast::Sender<EngineEvent>,
}

impl AlertEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sampling: SamplingController::new(deps.location, config.sampling.clone()),
            setup: AlertSetup::new(config.monitoring.minutes_per_station),
            evaluator: TriggerEvaluator::from_config(&config),
            adjuster: config.delay.adjuster(),
            thresholds: config.proximity.tier_thresholds(),
            retry: RetryPolicy::new(config.delivery.retry_delays()),
            tz: config.monitoring.tz(),
            store: deps.store,
            sink: deps.sink,
            waker: deps.waker,
            clock: deps.clock,
            delay_feed: deps.delay_feed,
            registry: AlertRegistry::new(),
            events,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &AlertRegistry {
        &self.registry
    }

    pub fn sampling(&self) -> &SamplingController {
        &self.sampling
    }

    pub fn active_alerts(&self) -> Vec<AlertSnapshot> {
        self.registry.active_alerts()
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(super) fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Validate and register a new alert, then evaluate it once.
    ///
    /// # Errors
    /// Setup validation failures are returned and nothing is registered.
    pub async fn create_alert(&self, draft: AlertDraft, route: &Route) -> Result<AlertId> {
        let now = self.now();
        let prepared = self.setup.prepare(AlertId::new(), &draft, route, now)?;
        let degraded = prepared.is_degraded();
        let (alert, progress) = (prepared.alert, prepared.progress);
        let id = alert.id;

        self.store.save_alert(&alert).await?;
        self.store.save_progress(id, &progress).await?;

        tracing::info!(
            alert_id = %id,
            target = %alert.target.name,
            trigger = ?alert.trigger,
            departure = %alert.schedule.departure_at,
            "alert registered"
        );
        self.emit(EngineEvent::AlertRegistered {
            alert_id: id,
            target_station: alert.target.name.clone(),
            at: now,
        });
        if degraded {
            self.report_degraded(id, &progress.issues, now);
        }

        let handle = self.registry.insert(AlertMonitor::new(alert, progress));
        self.run_tick(&handle).await;
        self.rearm().await;
        Ok(id)
    }

    /// Replace an alert's journey and settings, restarting its occurrence.
    ///
    /// # Errors
    /// Unknown ids and setup validation failures; on error the alert is left
    /// as it was.
    pub async fn edit_alert(&self, id: AlertId, draft: AlertDraft, route: &Route) -> Result<()> {
        let handle = self.registry.get(id).ok_or(CoreError::AlertNotFound(id))?;
        {
            let mut guard = handle.lock().await;
            let monitor = &mut *guard;
            let now = self.now();

            let prepared = self.setup.prepare(id, &draft, route, now)?;
            let degraded = prepared.is_degraded();
            let mut alert = prepared.alert;
            alert.created_at = monitor.alert.created_at;

            self.store.save_alert(&alert).await?;
            self.store.save_progress(id, &prepared.progress).await?;

            tracing::info!(alert_id = %id, target = %alert.target.name, "alert edited");
            if degraded {
                self.report_degraded(id, &prepared.progress.issues, now);
            }

            *monitor = AlertMonitor::new(alert, prepared.progress);
            self.tick(&handle, monitor).await;
        }
        self.rearm().await;
        Ok(())
    }

    /// Cancel an alert from any state short of completion. Pending delivery
    /// retries are abandoned.
    ///
    /// # Errors
    /// Unknown ids, completed alerts and store failures.
    pub async fn cancel_alert(&self, id: AlertId) -> Result<()> {
        let Some(handle) = self.registry.get(id) else {
            // Finished alerts leave the registry but stay in the store inactive.
            return match self.store.load_alert(id).await? {
                Some(alert) if !alert.active => Err(CoreError::AlertCompleted(id)),
                _ => Err(CoreError::AlertNotFound(id)),
            };
        };
        handle.cancel();

        {
            // A registered alert in `Completed` is mid-tick or about to roll
            // over; either way it is still cancellable.
            let mut guard = handle.lock().await;
            let monitor = &mut *guard;
            monitor.progress.escalation = None;
            monitor.alert.active = false;
            self.sampling.release(id).await;
            self.store.delete_alert(id).await?;
        }

        self.registry.remove(id);
        let now = self.now();
        tracing::info!(alert_id = %id, "alert cancelled");
        self.emit(EngineEvent::AlertCancelled { alert_id: id, at: now });
        self.emit(EngineEvent::AlertRemoved { alert_id: id, at: now });
        self.rearm().await;
        Ok(())
    }

    /// Drop an alert from the registry without touching the store, e.g.
    /// after the host deleted it directly.
    pub async fn remove(&self, id: AlertId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            self.sampling.release(id).await;
            tracing::info!(alert_id = %id, "alert removed from registry");
            self.emit(EngineEvent::AlertRemoved {
                alert_id: id,
                at: self.now(),
            });
        }
        removed
    }

    /// Feed one location fix to every watching alert.
    pub async fn on_location(&self, sample: LocationSample) {
        for handle in self.registry.handles() {
            let mut guard = handle.lock().await;
            let monitor = &mut *guard;
            if handle.is_cancelled() || !monitor.wants_sampling() {
                continue;
            }

            let before = monitor.proximity.tier;
            let target = monitor.alert.target.coordinate;
            let Some(tier) = monitor.proximity.observe(&sample, &target, &self.thresholds) else {
                tracing::debug!(alert_id = %monitor.id(), at = %sample.timestamp, "discarded stale or invalid location sample");
                continue;
            };
            if before != Some(tier) {
                tracing::debug!(alert_id = %monitor.id(), ?tier, distance_m = ?monitor.proximity.distance_m, "proximity tier changed");
            }

            self.tick(&handle, monitor).await;
        }
        self.rearm().await;
    }

    /// Permission changes flip affected alerts between hybrid and
    /// schedule-only on the spot.
    pub async fn on_permission_changed(&self, permission: PermissionState) {
        tracing::info!(?permission, "location permission changed");
        self.sampling.set_permission(permission).await;
        self.evaluate_all().await;
        self.rearm().await;
    }

    pub async fn on_power_state(&self, power: PowerState) {
        tracing::info!(?power, "power state changed");
        self.sampling.set_power(power).await;
    }

    /// Apply a pushed delay record to every alert watching that train.
    pub async fn ingest_delay(&self, record: DelayRecord) {
        let train = record.train();
        for handle in self.registry.handles() {
            let mut guard = handle.lock().await;
            let monitor = &mut *guard;
            if handle.is_cancelled() || monitor.alert.train.as_ref() != Some(&train) {
                continue;
            }
            self.apply_delay(monitor, record.clone());
            self.tick(&handle, monitor).await;
        }
        self.rearm().await;
    }

    pub(super) async fn evaluate_all(&self) {
        for handle in self.registry.handles() {
            self.run_tick(&handle).await;
        }
    }

    pub(super) async fn run_tick(&self, handle: &AlertHandle) {
        let mut guard = handle.lock().await;
        self.tick(handle, &mut guard).await;
    }

    pub(super) fn apply_delay(&self, monitor: &mut AlertMonitor, record: DelayRecord) {
        let now = self.now();
        let id = monitor.id();
        let arrival = self
            .adjuster
            .adjust(monitor.progress.occurrence.arrival_at, Some(&record), now);
        match arrival.status {
            DelayStatus::Suspect { clamped_minutes } => {
                tracing::warn!(alert_id = %id, delay_minutes = record.delay_minutes, clamped_minutes, "implausible delay ignored");
                self.emit(EngineEvent::DelaySuspect {
                    alert_id: id,
                    delay_minutes: record.delay_minutes,
                    at: now,
                });
            }
            DelayStatus::Stale => {
                tracing::debug!(alert_id = %id, observed_at = %record.observed_at, "stale delay record ignored");
            }
            DelayStatus::Applied => {
                let changed = monitor.delay.as_ref().map(|d| d.delay_minutes) != Some(record.delay_minutes);
                if changed {
                    tracing::info!(alert_id = %id, delay_minutes = record.delay_minutes, adjusted_arrival = %arrival.at, "delay applied");
                }
            }
            DelayStatus::NoRecord => {}
        }
        monitor.delay = Some(record);
    }

    /// One serialized evaluation step. The caller holds the alert's lock.
    pub(super) async fn tick(&self, handle: &AlertHandle, monitor: &mut AlertMonitor) {
        if handle.is_cancelled() || !monitor.alert.active {
            return;
        }
        let now = self.now();
        let id = monitor.id();

        let location_available = self.sampling.is_available().await;
        let sub_mode = SubMode::select(location_available, monitor.progress.stops.is_some());
        if sub_mode != monitor.progress.sub_mode {
            tracing::info!(alert_id = %id, from = %monitor.progress.sub_mode, to = %sub_mode, "sub-mode changed");
            self.emit(EngineEvent::SubModeChanged {
                alert_id: id,
                from: monitor.progress.sub_mode,
                to: sub_mode,
                at: now,
            });
            monitor.progress.sub_mode = sub_mode;
        }

        let arrival = monitor.arrival(&self.adjuster, now);
        let decisions = {
            let tick = Tick {
                now,
                arrival,
                proximity: &monitor.proximity,
            };
            self.evaluator
                .evaluate(&monitor.alert.snooze, &mut monitor.progress, &tick)
        };

        for decision in decisions {
            if handle.is_cancelled() {
                break;
            }
            match decision {
                TriggerDecision::Transition { from, to } => {
                    tracing::info!(alert_id = %id, %from, %to, "phase changed");
                    self.emit(EngineEvent::PhaseChanged {
                        alert_id: id,
                        from,
                        to,
                        at: now,
                    });
                }
                TriggerDecision::Primary {
                    reason,
                    minutes_remaining,
                    stations_remaining,
                } => {
                    self.notify(
                        &monitor.alert,
                        handle.cancel_flag(),
                        NotificationKind::Primary,
                        Some(reason),
                        minutes_remaining,
                        stations_remaining,
                    )
                    .await;
                }
                TriggerDecision::Reminder {
                    action,
                    minutes_remaining,
                } => {
                    let kind = match action.kind {
                        ReminderKind::Snooze => NotificationKind::Snooze,
                        ReminderKind::Terminal => NotificationKind::Terminal,
                    };
                    self.notify(
                        &monitor.alert,
                        handle.cancel_flag(),
                        kind,
                        None,
                        minutes_remaining,
                        Some(action.stations_remaining),
                    )
                    .await;
                }
                TriggerDecision::Missed { arrival_at } => {
                    tracing::warn!(alert_id = %id, %arrival_at, "occurrence missed, no alert fired");
                    self.emit(EngineEvent::OccurrenceMissed {
                        alert_id: id,
                        arrival_at,
                        at: now,
                    });
                }
            }
        }

        if handle.is_cancelled() {
            return;
        }

        let retire =
            monitor.progress.phase == AlertPhase::Completed && !self.roll_over(monitor, now);

        if !retire && monitor.wants_sampling() {
            self.sampling.request(id, monitor.tier()).await;
        } else {
            self.sampling.release(id).await;
        }

        self.persist(monitor).await;

        if retire {
            self.registry.remove(id);
            tracing::info!(alert_id = %id, "alert finished");
            self.emit(EngineEvent::AlertRemoved { alert_id: id, at: now });
        } else {
            self.registry.publish(monitor.snapshot(&self.adjuster, now));
        }
    }

    /// Move a completed repeating alert to its next occurrence. Returns
    /// `false` when there is none and the alert should retire.
    fn roll_over(&self, monitor: &mut AlertMonitor, now: DateTime<Utc>) -> bool {
        let id = monitor.id();
        let next = monitor
            .alert
            .recurrence
            .next_occurrence(&monitor.progress.occurrence, now, self.tz);

        let Some(next) = next else {
            monitor.alert.active = false;
            return false;
        };

        monitor.progress.reset_for(next, now);
        monitor.proximity = ProximityState::default();
        monitor.delay = None;

        tracing::info!(alert_id = %id, departure = %next.departure_at, "next occurrence scheduled");
        self.emit(EngineEvent::PhaseChanged {
            alert_id: id,
            from: AlertPhase::Completed,
            to: AlertPhase::Idle,
            at: now,
        });
        self.emit(EngineEvent::OccurrenceScheduled {
            alert_id: id,
            occurrence: next,
            at: now,
        });
        true
    }

    async fn persist(&self, monitor: &AlertMonitor) {
        let id = monitor.id();
        if !monitor.alert.active {
            if let Err(e) = self.store.save_alert(&monitor.alert).await {
                tracing::error!(alert_id = %id, error = %e, "failed to persist alert");
            }
        }
        if let Err(e) = self.store.save_progress(id, &monitor.progress).await {
            tracing::error!(alert_id = %id, error = %e, "failed to persist progress");
        }
        if let Err(e) = self
            .store
            .save_proximity(id, monitor.proximity.persisted())
            .await
        {
            tracing::error!(alert_id = %id, error = %e, "failed to persist proximity tier");
        }
    }

    async fn notify(
        &self,
        alert: &Alert,
        cancelled: &AtomicBool,
        kind: NotificationKind,
        reason: Option<FireReason>,
        minutes_remaining: i64,
        stations_remaining: Option<u32>,
    ) {
        let request = DeliveryRequest {
            alert_id: alert.id,
            kind,
            params: MessageParams {
                station_name: alert.target.name.clone(),
                minutes_remaining: Some(minutes_remaining),
                stations_remaining,
                style: alert.style.clone(),
            },
        };

        let outcome = self
            .retry
            .deliver(self.sink.as_ref(), &request, cancelled, |attempt, error| {
                self.emit(EngineEvent::DeliveryRetried {
                    alert_id: alert.id,
                    kind,
                    attempt,
                    error: error.to_string(),
                    at: self.now(),
                });
            })
            .await;

        let now = self.now();
        match outcome {
            DeliveryOutcome::Delivered { attempts } => {
                tracing::info!(
                    alert_id = %alert.id,
                    %kind,
                    ?reason,
                    minutes_remaining,
                    stations_remaining = ?stations_remaining,
                    attempts,
                    "notification delivered"
                );
                self.emit(EngineEvent::NotificationFired {
                    alert_id: alert.id,
                    kind,
                    reason,
                    stations_remaining,
                    minutes_remaining,
                    attempts,
                    at: now,
                });
            }
            DeliveryOutcome::Failed { attempts, error } => {
                tracing::error!(alert_id = %alert.id, %kind, attempts, error = %error, "notification delivery failed, continuing");
                let failure = DeliveryFailure {
                    alert_id: alert.id,
                    kind,
                    attempts,
                    error: error.to_string(),
                    failed_at: now,
                };
                if let Err(e) = self.store.record_delivery_failure(&failure).await {
                    tracing::error!(alert_id = %alert.id, error = %e, "failed to record delivery failure");
                }
                self.emit(EngineEvent::DeliveryFailed {
                    alert_id: alert.id,
                    kind,
                    attempts,
                    error: failure.error,
                    at: now,
                });
            }
            DeliveryOutcome::Cancelled { .. } => {}
        }
    }

    fn report_degraded(&self, id: AlertId, issues: &[RouteIssue], now: DateTime<Utc>) {
        tracing::warn!(alert_id = %id, ?issues, "route data degraded");
        self.emit(EngineEvent::RouteDegraded {
            alert_id: id,
            issues: issues.to_vec(),
            at: now,
        });
    }
}
