//! # Trainwake Core Library
//!
//! Core logic for Trainwake, an arrival alarm for train passengers. An alert
//! wakes the rider a configurable number of minutes or stations before their
//! stop, or as the train closes in on it, and keeps working when location is
//! unavailable or the host process is suspended between wakes.
//!
//! ## Architecture
//!
//! - **Setup**: validates an [`AlertDraft`] against a [`Route`] and resolves
//!   the stop sequence, degrading to time-based triggering on bad route data
//! - **Engine**: [`AlertEngine`] owns every active alert, serializes
//!   evaluation per alert and drives [`TriggerEvaluator`] from location fixes,
//!   delay records and background wakes
//! - **Sensing**: [`SamplingController`] turns proximity tiers into one
//!   location request at the tightest profile any alert needs
//! - **Storage**: SQLite alert state and TOML configuration
//!
//! The host supplies the platform edges through traits: [`AlertStore`],
//! [`NotificationSink`], [`LocationProvider`], [`WakeScheduler`] and
//! [`Clock`].

pub mod alert;
pub mod clock;
pub mod delay;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod events;
pub mod geo;
pub mod proximity;
pub mod route;
pub mod sampling;
pub mod storage;
pub mod trigger;

pub use alert::{Alert, AlertDraft, AlertId, Occurrence, Recurrence, SnoozeConfig, Station, TrainRef, Trigger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delay::{DelayAdjuster, DelayRecord, DelayStatus};
pub use delivery::{DeliveryRequest, NotificationKind, NotificationSink, RetryPolicy};
pub use engine::{AlertEngine, AlertSnapshot, DelayFeed, EngineDeps, WakeReport, WakeScheduler};
pub use error::{ConfigError, CoreError, DeliveryError, SensingError, SetupError, StoreError};
pub use events::EngineEvent;
pub use geo::Coordinate;
pub use proximity::{LocationSample, Tier};
pub use route::{Route, RouteIssue, StopSequence};
pub use sampling::{LocationProvider, PermissionState, PowerState, SamplingController};
pub use storage::{AlertStore, EngineConfig, MemoryStore, SqliteStore};
pub use trigger::{AlertPhase, SubMode, TriggerEvaluator};
