//! Notification hand-off.
//!
//! The engine never renders text: it passes semantic parameters to a
//! [`NotificationSink`] and retries transient failures with a fixed backoff.
//! An exhausted or rejected delivery is reported back to the caller, which
//! records it and carries on as if the notification went out.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertId;
use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Primary,
    Snooze,
    Terminal,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Primary => "primary",
            NotificationKind::Snooze => "snooze",
            NotificationKind::Terminal => "terminal",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(NotificationKind::Primary),
            "snooze" => Ok(NotificationKind::Snooze),
            "terminal" => Ok(NotificationKind::Terminal),
            other => Err(format!("unknown notification kind '{other}'")),
        }
    }
}

/// What the message collaborator needs to render the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParams {
    pub station_name: String,
    pub minutes_remaining: Option<i64>,
    pub stations_remaining: Option<u32>,
    /// Opaque style tag from the alert.
    pub style: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub alert_id: AlertId,
    pub kind: NotificationKind,
    pub params: MessageParams,
}

/// Host side of notification delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// A delivery that never got through, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub alert_id: AlertId,
    pub kind: NotificationKind,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Retries exhausted, or the sink rejected the request outright.
    Failed { attempts: u32, error: DeliveryError },
    /// The alert was cancelled between attempts; nothing further was sent.
    Cancelled { attempts: u32 },
}

/// Backoff schedule: one initial attempt, then one retry per delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(9),
        ])
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }

    /// Hand `request` to `sink`, retrying transient failures.
    ///
    /// `cancelled` is checked before every attempt. `on_retry` is called
    /// with the failed attempt number before each backoff sleep.
    pub async fn deliver<F>(
        &self,
        sink: &dyn NotificationSink,
        request: &DeliveryRequest,
        cancelled: &AtomicBool,
        mut on_retry: F,
    ) -> DeliveryOutcome
    where
        F: FnMut(u32, &DeliveryError) + Send,
    {
        let mut attempts = 0;
        let mut delays = self.delays.iter();

        loop {
            if cancelled.load(Ordering::SeqCst) {
                tracing::info!(alert_id = %request.alert_id, kind = %request.kind, attempts, "delivery abandoned, alert cancelled");
                return DeliveryOutcome::Cancelled { attempts };
            }

            attempts += 1;
            let error = match sink.deliver(request).await {
                Ok(()) => return DeliveryOutcome::Delivered { attempts },
                Err(error @ DeliveryError::Rejected(_)) => {
                    return DeliveryOutcome::Failed { attempts, error }
                }
                Err(error) => error,
            };

            let Some(delay) = delays.next() else {
                return DeliveryOutcome::Failed { attempts, error };
            };

            tracing::warn!(
                alert_id = %request.alert_id,
                kind = %request.kind,
                attempt = attempts,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "notification delivery failed, retrying"
            );
            on_retry(attempts, &error);
            tokio::time::sleep(*delay).await;
        }
    }
}
