//! Core error types for trainwake-core.
//!
//! Errors are grouped the way the engine recovers from them: setup-time
//! validation is surfaced to the caller, route data problems degrade the
//! alert, sensing problems switch it to schedule-only, delivery problems are
//! retried and then logged, and store corruption drops a single alert.

use std::path::PathBuf;
use thiserror::Error;

use crate::alert::AlertId;

/// Core error type for trainwake-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Alert setup was rejected
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Location sensing errors
    #[error("Sensing error: {0}")]
    Sensing(#[from] SensingError),

    /// The alert is not (or no longer) registered
    #[error("Alert {0} not found")]
    AlertNotFound(AlertId),

    /// The alert already reached its terminal state
    #[error("Alert {0} is already completed")]
    AlertCompleted(AlertId),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors raised synchronously when an alert is created or edited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// Station trigger resolves at or before the departure station
    #[error(
        "Invalid trigger position: {threshold} stations before arrival on a route with {stop_count} stops"
    )]
    InvalidTriggerPosition { threshold: u32, stop_count: usize },

    /// Recurrence rule could not be parsed or names no days
    #[error("Malformed recurrence rule: {0}")]
    MalformedRecurrence(String),

    /// Threshold out of range
    #[error("Invalid threshold for '{field}': {message}")]
    InvalidThreshold { field: String, message: String },

    /// Snooze configuration out of range
    #[error("Invalid snooze configuration: {0}")]
    InvalidSnooze(String),

    /// Arrival is not after departure
    #[error("Invalid schedule: arrival ({arrival}) must be after departure ({departure})")]
    InvalidSchedule {
        departure: chrono::DateTime<chrono::Utc>,
        arrival: chrono::DateTime<chrono::Utc>,
    },
}

/// Route data that cannot support station-count triggers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Insufficient route data: {known} resolvable station(s), at least 2 required")]
    InsufficientRouteData { known: usize },
}

/// Location provider errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensingError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location provider failure: {0}")]
    ProviderFailure(String),
}

/// Notification hand-off errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying (e.g. the OS briefly refused the notification)
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// The delivery collaborator refused outright
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Persistent store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored record could not be decoded
    #[error("Stored state for alert {id} is corrupt: {message}")]
    Corrupt { id: AlertId, message: String },

    /// Encoding a record failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Data directory could not be resolved
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
