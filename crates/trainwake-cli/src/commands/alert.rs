use std::sync::Arc;

use clap::Subcommand;
use trainwake_core::{AlertEngine, AlertId, EngineConfig, SqliteStore, SystemClock};

use super::host::{terminal_deps, DraftArgs, NoteWake};

#[derive(Subcommand)]
pub enum AlertAction {
    /// Create an alert for the journey described by a route file
    Create(DraftArgs),
    /// List active alerts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel an alert
    Cancel {
        /// Alert ID
        id: String,
    },
}

fn open_engine(config: EngineConfig) -> Result<(AlertEngine, Arc<NoteWake>), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    let waker = Arc::new(NoteWake::default());
    let deps = terminal_deps(store, waker.clone(), Arc::new(SystemClock));
    Ok((AlertEngine::new(config, deps), waker))
}

pub async fn run(action: AlertAction, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, waker) = open_engine(config)?;

    match action {
        AlertAction::Create(args) => {
            let route = args.load_route()?;
            let draft = args.draft(&route)?;
            engine.reload().await?;
            let id = engine.create_alert(draft, &route).await?;
            println!("Alert created: {id}");
            if let Some(snapshot) = engine.registry().snapshot(id) {
                println!("State: {}", snapshot.phase);
                if snapshot.route_degraded {
                    println!("Route data degraded: {:?}", snapshot.issues);
                }
            }
            if let Some(next) = waker.next() {
                println!("Next wake: {next}");
            }
        }
        AlertAction::List { json } => {
            engine.reload().await?;
            let alerts = engine.active_alerts();
            if json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
            } else if alerts.is_empty() {
                println!("No active alerts");
            } else {
                for a in alerts {
                    println!(
                        "{} {} -> {} dep {} [{}] {:?}",
                        a.id,
                        a.departure_station,
                        a.target_station,
                        a.occurrence.departure_at.format("%Y-%m-%d %H:%M"),
                        a.phase,
                        a.effective_trigger,
                    );
                }
            }
        }
        AlertAction::Cancel { id } => {
            let id: AlertId = id.parse().map_err(|e| format!("invalid alert id '{id}': {e}"))?;
            engine.reload().await?;
            engine.cancel_alert(id).await?;
            println!("Alert cancelled: {id}");
        }
    }
    Ok(())
}
