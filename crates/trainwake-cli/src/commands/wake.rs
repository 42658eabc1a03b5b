use std::sync::Arc;

use trainwake_core::{AlertEngine, EngineConfig, SqliteStore, SystemClock};

use super::host::{terminal_deps, NoteWake};

/// One wake pass over the stored alerts. Prints the report as JSON; the
/// `next_wake` field says when to run again.
pub async fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    let waker = Arc::new(NoteWake::default());
    let engine = AlertEngine::new(config, terminal_deps(store, waker, Arc::new(SystemClock)));

    let report = engine.start().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
