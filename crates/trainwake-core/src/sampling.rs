//! Location sampling control.
//!
//! One location stream is shared by every alert. Each watching alert
//! registers the tier it currently needs; the controller runs the provider at
//! the most demanding profile among them and stops it when the last alert
//! lets go.
//!
//! - Far: coarse, every 60 s
//! - Approaching: medium, every 30 s
//! - Near: high, every 15 s
//! - Imminent: highest, event driven
//!
//! Low power caps the profile at Approaching unless some alert is Imminent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::alert::AlertId;
use crate::error::SensingError;
use crate::proximity::Tier;
use crate::storage::SamplingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyProfile {
    Coarse,
    Medium,
    High,
    Highest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingProfile {
    pub accuracy: AccuracyProfile,
    /// `None` means deliver fixes as fast as the provider produces them.
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Granted,
    Denied,
}

/// Host location stream. Samples come back through the engine's
/// `on_location`.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Start, or reconfigure a running stream, at `profile`.
    async fn start(&self, profile: SamplingProfile) -> Result<(), SensingError>;

    async fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStatus {
    Active(SamplingProfile),
    Stopped,
    /// Permission denied or the provider failed; alerts run schedule-only.
    Unavailable,
}

#[derive(Debug, Default)]
struct ControllerState {
    wants: HashMap<AlertId, Tier>,
    active: Option<SamplingProfile>,
    power: PowerState,
    permission: PermissionState,
    provider_failed: bool,
}

impl ControllerState {
    fn available(&self) -> bool {
        self.permission == PermissionState::Granted && !self.provider_failed
    }
}

pub struct SamplingController {
    provider: Arc<dyn LocationProvider>,
    config: SamplingConfig,
    state: Mutex<ControllerState>,
}

impl SamplingController {
    pub fn new(provider: Arc<dyn LocationProvider>, config: SamplingConfig) -> Self {
        Self {
            provider,
            config,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Profile for `tier` under `power`.
    pub fn profile_for(&self, tier: Tier, power: PowerState) -> SamplingProfile {
        let tier = match (power, tier) {
            (PowerState::Low, Tier::Near) => Tier::Approaching,
            (_, tier) => tier,
        };
        let secs = |s: u32| Some(Duration::from_secs(u64::from(s)));
        match tier {
            Tier::Far => SamplingProfile {
                accuracy: AccuracyProfile::Coarse,
                interval: secs(self.config.far_interval_secs),
            },
            Tier::Approaching => SamplingProfile {
                accuracy: AccuracyProfile::Medium,
                interval: secs(self.config.approaching_interval_secs),
            },
            Tier::Near => SamplingProfile {
                accuracy: AccuracyProfile::High,
                interval: secs(self.config.near_interval_secs),
            },
            Tier::Imminent => SamplingProfile {
                accuracy: AccuracyProfile::Highest,
                interval: None,
            },
        }
    }

    /// Register (or update) `alert`'s need for sampling at `tier`.
    pub async fn request(&self, alert: AlertId, tier: Tier) -> SamplingStatus {
        let mut state = self.state.lock().await;
        state.wants.insert(alert, tier);
        self.reconcile(&mut state).await
    }

    /// Drop `alert`'s request; stops the stream when nobody else needs it.
    pub async fn release(&self, alert: AlertId) -> SamplingStatus {
        let mut state = self.state.lock().await;
        if state.wants.remove(&alert).is_none() {
            return self.status(&state);
        }
        self.reconcile(&mut state).await
    }

    pub async fn set_power(&self, power: PowerState) -> SamplingStatus {
        let mut state = self.state.lock().await;
        state.power = power;
        self.reconcile(&mut state).await
    }

    /// Denial stops the stream and blocks restarts until permission comes
    /// back. A grant also clears any earlier provider failure.
    pub async fn set_permission(&self, permission: PermissionState) -> SamplingStatus {
        let mut state = self.state.lock().await;
        state.permission = permission;
        if permission == PermissionState::Granted {
            state.provider_failed = false;
        }
        self.reconcile(&mut state).await
    }

    pub async fn is_available(&self) -> bool {
        self.state.lock().await.available()
    }

    pub async fn active_profile(&self) -> Option<SamplingProfile> {
        self.state.lock().await.active
    }

    pub async fn subscribers(&self) -> usize {
        self.state.lock().await.wants.len()
    }

    fn status(&self, state: &ControllerState) -> SamplingStatus {
        match state.active {
            Some(profile) => SamplingStatus::Active(profile),
            None if !state.available() => SamplingStatus::Unavailable,
            None => SamplingStatus::Stopped,
        }
    }

    fn desired(&self, state: &ControllerState) -> Option<SamplingProfile> {
        if state.permission == PermissionState::Denied {
            return None;
        }
        state
            .wants
            .values()
            .max()
            .map(|tier| self.profile_for(*tier, state.power))
    }

    async fn reconcile(&self, state: &mut ControllerState) -> SamplingStatus {
        let desired = self.desired(state);
        if desired == state.active {
            return self.status(state);
        }

        match desired {
            None => {
                self.provider.stop().await;
                state.active = None;
                tracing::debug!("location sampling stopped");
            }
            Some(profile) => match self.provider.start(profile).await {
                Ok(()) => {
                    state.active = Some(profile);
                    state.provider_failed = false;
                    tracing::debug!(?profile, subscribers = state.wants.len(), "location sampling started");
                }
                Err(SensingError::PermissionDenied) => {
                    tracing::warn!("location permission denied by provider");
                    state.permission = PermissionState::Denied;
                    if state.active.take().is_some() {
                        self.provider.stop().await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "location provider failed to start");
                    state.provider_failed = true;
                    if state.active.take().is_some() {
                        self.provider.stop().await;
                    }
                }
            },
        }
        self.status(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingProvider {
        starts: StdMutex<Vec<SamplingProfile>>,
        stops: StdMutex<u32>,
        fail_with: StdMutex<Option<SensingError>>,
    }

    #[async_trait]
    impl LocationProvider for RecordingProvider {
        async fn start(&self, profile: SamplingProfile) -> Result<(), SensingError> {
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            self.starts.lock().unwrap().push(profile);
            Ok(())
        }

        async fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn controller() -> (SamplingController, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::default());
        let controller = SamplingController::new(provider.clone(), SamplingConfig::default());
        (controller, provider)
    }

    #[tokio::test]
    async fn repeated_start_is_a_no_op() {
        let (ctl, provider) = controller();
        let id = AlertId::new();
        for _ in 0..5 {
            ctl.request(id, Tier::Far).await;
        }
        assert_eq!(provider.starts.lock().unwrap().len(), 1);
        assert_eq!(ctl.subscribers().await, 1);
    }

    #[tokio::test]
    async fn runs_at_most_demanding_tier() {
        let (ctl, provider) = controller();
        let a = AlertId::new();
        let b = AlertId::new();
        ctl.request(a, Tier::Far).await;
        let status = ctl.request(b, Tier::Near).await;
        assert_eq!(
            status,
            SamplingStatus::Active(SamplingProfile {
                accuracy: AccuracyProfile::High,
                interval: Some(Duration::from_secs(15)),
            })
        );

        ctl.release(b).await;
        let last = *provider.starts.lock().unwrap().last().unwrap();
        assert_eq!(last.accuracy, AccuracyProfile::Coarse);
    }

    #[tokio::test]
    async fn releasing_one_alert_keeps_stream_for_others() {
        let (ctl, provider) = controller();
        let a = AlertId::new();
        let b = AlertId::new();
        ctl.request(a, Tier::Far).await;
        ctl.request(b, Tier::Far).await;

        ctl.release(a).await;
        assert_eq!(*provider.stops.lock().unwrap(), 0);
        assert!(ctl.active_profile().await.is_some());

        ctl.release(b).await;
        assert_eq!(*provider.stops.lock().unwrap(), 1);
        assert_eq!(ctl.active_profile().await, None);

        // Releasing again stays stopped without touching the provider.
        ctl.release(b).await;
        assert_eq!(*provider.stops.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn low_power_caps_at_approaching_except_imminent() {
        let (ctl, _provider) = controller();
        let id = AlertId::new();
        ctl.set_power(PowerState::Low).await;

        ctl.request(id, Tier::Near).await;
        assert_eq!(
            ctl.active_profile().await.map(|p| p.accuracy),
            Some(AccuracyProfile::Medium)
        );

        ctl.request(id, Tier::Imminent).await;
        assert_eq!(
            ctl.active_profile().await,
            Some(SamplingProfile {
                accuracy: AccuracyProfile::Highest,
                interval: None,
            })
        );
    }

    #[tokio::test]
    async fn permission_denial_stops_and_blocks_restart() {
        let (ctl, provider) = controller();
        let id = AlertId::new();
        ctl.request(id, Tier::Near).await;

        let status = ctl.set_permission(PermissionState::Denied).await;
        assert_eq!(status, SamplingStatus::Unavailable);
        assert_eq!(*provider.stops.lock().unwrap(), 1);
        assert!(!ctl.is_available().await);

        ctl.request(id, Tier::Imminent).await;
        assert_eq!(provider.starts.lock().unwrap().len(), 1);

        ctl.set_permission(PermissionState::Granted).await;
        assert_eq!(provider.starts.lock().unwrap().len(), 2);
        assert!(ctl.is_available().await);
    }

    #[tokio::test]
    async fn provider_denial_marks_unavailable() {
        let (ctl, provider) = controller();
        *provider.fail_with.lock().unwrap() = Some(SensingError::PermissionDenied);
        let status = ctl.request(AlertId::new(), Tier::Far).await;
        assert_eq!(status, SamplingStatus::Unavailable);
        assert!(!ctl.is_available().await);
    }
}
