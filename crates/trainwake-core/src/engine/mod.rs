mod monitor;
mod ports;
mod registry;
mod reliability;
mod runtime;

pub use monitor::{AlertMonitor, AlertSnapshot};
pub use ports::{DelayFeed, WakeScheduler};
pub use registry::{AlertHandle, AlertRegistry};
pub use reliability::{wake_interval, WakeReport};
pub use runtime::{AlertEngine, EngineDeps};
