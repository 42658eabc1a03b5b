mod state;
mod tier;

pub use state::{LocationSample, PersistedProximity, ProximityState};
pub use tier::{classify, Tier, TierThresholds};
