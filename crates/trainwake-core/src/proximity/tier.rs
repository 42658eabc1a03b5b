//! Distance tiers that drive sampling cadence and the proximity predicate.

use serde::{Deserialize, Serialize};

/// Proximity bucket driving sampling cadence and the proximity safety net.
///
/// Ordered from farthest to nearest, so `max` picks the most urgent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Far,
    Approaching,
    Near,
    Imminent,
}

/// Tier boundaries in meters. A distance exactly on a boundary belongs to
/// the nearer tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub imminent_m: f64,
    pub near_m: f64,
    pub approaching_m: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            imminent_m: 500.0,
            near_m: 2_000.0,
            approaching_m: 5_000.0,
        }
    }
}

impl TierThresholds {
    /// Total: every input maps to a tier. A non-finite distance carries no
    /// position information and is treated as `Far`.
    pub fn classify(&self, distance_m: f64) -> Tier {
        if !distance_m.is_finite() {
            return Tier::Far;
        }
        if distance_m <= self.imminent_m {
            Tier::Imminent
        } else if distance_m <= self.near_m {
            Tier::Near
        } else if distance_m <= self.approaching_m {
            Tier::Approaching
        } else {
            Tier::Far
        }
    }
}

/// Classify with the default boundaries (500 m / 2 km / 5 km).
pub fn classify(distance_m: f64) -> Tier {
    TierThresholds::default().classify(distance_m)
}
