use clap::{Parser, Subcommand};
use trainwake_core::EngineConfig;

mod commands;

#[derive(Parser)]
#[command(name = "trainwake-cli", version, about = "Trainwake CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alert management
    Alert {
        #[command(subcommand)]
        action: commands::alert::AlertAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run one background wake pass over stored alerts
    Wake,
    /// Replay a journey against a simulated clock and print engine events
    Simulate(commands::simulate::SimulateArgs),
}

/// Logs go to stderr so stdout stays machine readable. `RUST_LOG` wins over
/// the configured filter.
fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = EngineConfig::load_or_default();
    init_tracing(&config);

    let result = match cli.command {
        Commands::Alert { action } => commands::alert::run(action, config).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Wake => commands::wake::run(config).await,
        Commands::Simulate(args) => commands::simulate::run(args, config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
