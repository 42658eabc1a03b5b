//! Host collaborators the engine calls out to, besides the store, the
//! notification sink and the location provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::TrainRef;
use crate::delay::DelayRecord;

/// Background wake primitive. Best effort: the host may coalesce or delay.
#[async_trait]
pub trait WakeScheduler: Send + Sync {
    async fn request_wake(&self, not_before: DateTime<Utc>);
}

/// Pull side of the delay feed, polled on every wake.
#[async_trait]
pub trait DelayFeed: Send + Sync {
    async fn latest(&self, train: &TrainRef) -> Option<DelayRecord>;
}
