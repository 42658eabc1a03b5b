//! Snooze escalation.
//!
//! After the primary alert, reminders fire as the train counts down the
//! remaining stations: at `start`, `start - step`, ... and finally at zero,
//! which doubles as the terminal "arrived" reminder.
//!
//! ## Guarantees
//!
//! - `advance` called repeatedly with the same count fires at most once
//! - the watermark (lowest count already fired) never moves back up, so a
//!   corrected fix reporting more stations remaining cannot re-fire anything
//! - a jump over several thresholds fires a single reminder for the count
//!   actually observed

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Snooze,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderAction {
    pub kind: ReminderKind,
    pub stations_remaining: u32,
    /// 1-based ordinal of this reminder within the escalation.
    pub ordinal: u32,
}

/// Persistent per-alert escalation progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub reminders_fired: u32,
    /// Count at or below which the next reminder fires; `None` once done.
    pub next_threshold: Option<u32>,
    /// Lowest count a reminder already fired at.
    pub watermark: Option<u32>,
    pub terminal_fired: bool,
    pub step: u32,
}

impl EscalationState {
    pub fn new(start_stations: u32, step: u32) -> Self {
        Self {
            reminders_fired: 0,
            next_threshold: Some(start_stations),
            watermark: None,
            terminal_fired: false,
            step: step.max(1),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.terminal_fired
    }

    pub fn advance(&mut self, stations_remaining: u32) -> Option<ReminderAction> {
        if self.terminal_fired {
            return None;
        }
        if self.watermark.is_some_and(|w| stations_remaining >= w) {
            return None;
        }
        let next = self.next_threshold?;
        if stations_remaining > next {
            return None;
        }
        Some(self.fire(stations_remaining))
    }

    /// Target reached by other means (proximity): fire the terminal reminder
    /// if it has not fired yet.
    pub fn finish(&mut self) -> Option<ReminderAction> {
        if self.terminal_fired {
            return None;
        }
        Some(self.fire(0))
    }

    fn fire(&mut self, stations_remaining: u32) -> ReminderAction {
        self.watermark = Some(stations_remaining);
        self.reminders_fired += 1;

        let kind = if stations_remaining == 0 {
            self.terminal_fired = true;
            self.next_threshold = None;
            ReminderKind::Terminal
        } else {
            self.next_threshold = Some(stations_remaining.saturating_sub(self.step));
            ReminderKind::Snooze
        };

        ReminderAction {
            kind,
            stations_remaining,
            ordinal: self.reminders_fired,
        }
    }
}
