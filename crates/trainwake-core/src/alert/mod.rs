mod model;
mod recurrence;
mod setup;

pub use model::{
    Alert, AlertDraft, AlertId, Occurrence, SnoozeConfig, Station, TrainRef, Trigger, TriggerMode,
};
pub use recurrence::Recurrence;
pub use setup::{AlertSetup, PreparedAlert};
