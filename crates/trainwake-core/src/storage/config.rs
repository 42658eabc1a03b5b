//! TOML-based engine configuration.
//!
//! Stores tunables for:
//! - Delay feed trust (freshness window, sanity bound)
//! - Proximity tiers and arrival detection radii
//! - Location sampling cadence per tier
//! - Delivery retry backoff
//! - Monitoring window, missed-journey grace and recurrence time zone
//!
//! Configuration is stored at `~/.config/trainwake/config.toml`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::delay::DelayAdjuster;
use crate::error::ConfigError;
use crate::proximity::TierThresholds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: u32,
    #[serde(default = "default_sanity_bound_minutes")]
    pub sanity_bound_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityConfig {
    #[serde(default = "default_imminent_meters")]
    pub imminent_meters: f64,
    #[serde(default = "default_near_meters")]
    pub near_meters: f64,
    #[serde(default = "default_approaching_meters")]
    pub approaching_meters: f64,
    /// Distance to the target at which it counts as reached.
    #[serde(default = "default_arrival_radius_meters")]
    pub arrival_radius_meters: f64,
    /// Distance to an intermediate station at which the train counts as there.
    #[serde(default = "default_station_match_radius_meters")]
    pub station_match_radius_meters: f64,
}

/// Polling interval per tier; `Imminent` is always event driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_far_interval_secs")]
    pub far_interval_secs: u32,
    #[serde(default = "default_approaching_interval_secs")]
    pub approaching_interval_secs: u32,
    #[serde(default = "default_near_interval_secs")]
    pub near_interval_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Wait before each retry; its length is the retry count.
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Monitoring opens this long before departure.
    #[serde(default = "default_lead_minutes")]
    pub lead_minutes: u32,
    /// An occurrence still unfired this long after arrival is recorded as missed.
    #[serde(default = "default_missed_grace_minutes")]
    pub missed_grace_minutes: u32,
    /// Conversion used when a station trigger degrades to a time trigger.
    #[serde(default = "default_minutes_per_station")]
    pub minutes_per_station: u32,
    /// IANA zone used for recurrence day-of-week.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/trainwake/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_freshness_minutes() -> u32 {
    5
}
fn default_sanity_bound_minutes() -> u32 {
    180
}
fn default_imminent_meters() -> f64 {
    500.0
}
fn default_near_meters() -> f64 {
    2_000.0
}
fn default_approaching_meters() -> f64 {
    5_000.0
}
fn default_arrival_radius_meters() -> f64 {
    200.0
}
fn default_station_match_radius_meters() -> f64 {
    400.0
}
fn default_far_interval_secs() -> u32 {
    60
}
fn default_approaching_interval_secs() -> u32 {
    30
}
fn default_near_interval_secs() -> u32 {
    15
}
fn default_retry_delays_secs() -> Vec<u64> {
    vec![1, 3, 9]
}
fn default_lead_minutes() -> u32 {
    30
}
fn default_missed_grace_minutes() -> u32 {
    30
}
fn default_minutes_per_station() -> u32 {
    3
}
fn default_time_zone() -> String {
    "UTC".into()
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            freshness_minutes: default_freshness_minutes(),
            sanity_bound_minutes: default_sanity_bound_minutes(),
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            imminent_meters: default_imminent_meters(),
            near_meters: default_near_meters(),
            approaching_meters: default_approaching_meters(),
            arrival_radius_meters: default_arrival_radius_meters(),
            station_match_radius_meters: default_station_match_radius_meters(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            far_interval_secs: default_far_interval_secs(),
            approaching_interval_secs: default_approaching_interval_secs(),
            near_interval_secs: default_near_interval_secs(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_delays_secs: default_retry_delays_secs(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            lead_minutes: default_lead_minutes(),
            missed_grace_minutes: default_missed_grace_minutes(),
            minutes_per_station: default_minutes_per_station(),
            time_zone: default_time_zone(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl DelayConfig {
    pub fn adjuster(&self) -> DelayAdjuster {
        DelayAdjuster::new(
            Duration::minutes(i64::from(self.freshness_minutes)),
            i64::from(self.sanity_bound_minutes),
        )
    }
}

impl ProximityConfig {
    pub fn tier_thresholds(&self) -> TierThresholds {
        TierThresholds {
            imminent_m: self.imminent_meters,
            near_m: self.near_meters,
            approaching_m: self.approaching_meters,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delays(&self) -> Vec<std::time::Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| std::time::Duration::from_secs(*s))
            .collect()
    }
}

impl MonitoringConfig {
    pub fn lead(&self) -> Duration {
        Duration::minutes(i64::from(self.lead_minutes))
    }

    pub fn missed_grace(&self) -> Duration {
        Duration::minutes(i64::from(self.missed_grace_minutes))
    }

    /// Configured zone, falling back to UTC for unknown names.
    pub fn tz(&self) -> Tz {
        self.time_zone.parse().unwrap_or_else(|_| {
            tracing::warn!(time_zone = %self.time_zone, "unknown time zone, using UTC");
            Tz::UTC
        })
    }
}

impl EngineConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key in memory. Returns error if key is unknown,
    /// the value does not fit the field, or the result fails [`validate`];
    /// `self` is left untouched on error.
    ///
    /// [`validate`]: EngineConfig::validate
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let candidate: Self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Top-level sections, in file order.
    pub const SECTIONS: [&'static str; 6] =
        ["delay", "proximity", "sampling", "delivery", "monitoring", "logging"];

    /// Restore one section to its defaults.
    pub fn reset_section(&mut self, section: &str) -> Result<(), ConfigError> {
        match section {
            "delay" => self.delay = DelayConfig::default(),
            "proximity" => self.proximity = ProximityConfig::default(),
            "sampling" => self.sampling = SamplingConfig::default(),
            "delivery" => self.delivery = DeliveryConfig::default(),
            "monitoring" => self.monitoring = MonitoringConfig::default(),
            "logging" => self.logging = LoggingConfig::default(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Cross-field checks the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let p = &self.proximity;
        if !(p.imminent_meters > 0.0
            && p.imminent_meters < p.near_meters
            && p.near_meters < p.approaching_meters)
        {
            return Err(invalid(
                "proximity",
                format!(
                    "tier radii must grow: imminent {} < near {} < approaching {}",
                    p.imminent_meters, p.near_meters, p.approaching_meters
                ),
            ));
        }
        if self.delay.freshness_minutes == 0 {
            return Err(invalid("delay.freshness_minutes", "must be at least 1".into()));
        }
        if self.monitoring.minutes_per_station == 0 {
            return Err(invalid("monitoring.minutes_per_station", "must be at least 1".into()));
        }
        if self.monitoring.time_zone.parse::<Tz>().is_err() {
            return Err(invalid(
                "monitoring.time_zone",
                format!("unknown time zone '{}'", self.monitoring.time_zone),
            ));
        }
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: EngineConfig = toml::from_str("[delay]\nfreshness_minutes = 2\n").unwrap();
        assert_eq!(parsed.delay.freshness_minutes, 2);
        assert_eq!(parsed.delay.sanity_bound_minutes, 180);
        assert_eq!(parsed.delivery.retry_delays_secs, vec![1, 3, 9]);
        assert_eq!(parsed.monitoring.time_zone, "UTC");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.get("delay.freshness_minutes").as_deref(), Some("5"));
        assert_eq!(cfg.get("monitoring.time_zone").as_deref(), Some("UTC"));
        assert!(cfg.get("delay.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = EngineConfig::default();
        cfg.set("monitoring.lead_minutes", "45").unwrap();
        cfg.set("monitoring.time_zone", "Asia/Tokyo").unwrap();
        cfg.set("proximity.arrival_radius_meters", "150.5").unwrap();
        cfg.set("delivery.retry_delays_secs", "[0, 0]").unwrap();
        assert_eq!(cfg.monitoring.lead_minutes, 45);
        assert_eq!(cfg.monitoring.tz(), chrono_tz::Asia::Tokyo);
        assert_eq!(cfg.proximity.arrival_radius_meters, 150.5);
        assert_eq!(cfg.delivery.retry_delays().len(), 2);
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_type() {
        let mut cfg = EngineConfig::default();
        assert!(matches!(
            cfg.set("delay.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("delay.freshness_minutes", "soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn set_keeps_tier_radii_ordered() {
        let mut cfg = EngineConfig::default();
        let err = cfg.set("proximity.near_meters", "100").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "proximity"));
        assert_eq!(cfg.proximity.near_meters, 2_000.0);

        assert!(cfg.set("monitoring.time_zone", "Mars/Olympus").is_err());
        assert_eq!(cfg.monitoring.time_zone, "UTC");
    }

    #[test]
    fn reset_section_restores_only_that_section() {
        let mut cfg = EngineConfig::default();
        cfg.set("monitoring.lead_minutes", "45").unwrap();
        cfg.set("delay.freshness_minutes", "2").unwrap();
        cfg.reset_section("monitoring").unwrap();
        assert_eq!(cfg.monitoring, MonitoringConfig::default());
        assert_eq!(cfg.delay.freshness_minutes, 2);
        assert!(matches!(
            cfg.reset_section("weather"),
            Err(ConfigError::UnknownKey(_))
        ));
        for section in EngineConfig::SECTIONS {
            assert!(cfg.get(section).is_some());
        }
    }

    #[test]
    fn derived_helpers_follow_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.proximity.tier_thresholds(), TierThresholds::default());
        assert_eq!(cfg.delay.adjuster(), DelayAdjuster::default());
        assert_eq!(cfg.monitoring.lead(), Duration::minutes(30));
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = EngineConfig::load_from(&path).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert!(path.exists());
    }
}
