use clap::Subcommand;
use trainwake_core::{ConfigError, EngineConfig};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value (e.g. "proximity.near_meters", "monitoring.time_zone")
    Get {
        /// Dotted config key
        key: String,
    },
    /// Change one value; the whole config is re-validated before saving
    Set {
        /// Dotted config key
        key: String,
        /// New value (JSON for lists, e.g. "[1, 3, 9]")
        value: String,
    },
    /// Print the config as JSON, or only one section
    Show {
        /// delay, proximity, sampling, delivery, monitoring or logging
        section: Option<String>,
    },
    /// Restore defaults, for everything or a single section
    Reset {
        /// Section to reset; all sections when omitted
        section: Option<String>,
    },
    /// Print the config file location
    Path,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = EngineConfig::load()?;
            let value = config.get(&key).ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = EngineConfig::load()?;
            let before = config.get(&key).ok_or_else(|| ConfigError::UnknownKey(key.clone()))?;
            config.set(&key, &value)?;
            config.save()?;
            let after = config.get(&key).unwrap_or_default();
            println!("{key}: {before} -> {after}");
        }
        ConfigAction::Show { section } => {
            let config = EngineConfig::load()?;
            let json = match section {
                Some(section) if EngineConfig::SECTIONS.contains(&section.as_str()) => {
                    let value = serde_json::to_value(&config)?;
                    serde_json::to_string_pretty(&value[section.as_str()])?
                }
                Some(section) => return Err(ConfigError::UnknownKey(section).into()),
                None => serde_json::to_string_pretty(&config)?,
            };
            println!("{json}");
        }
        ConfigAction::Reset { section } => {
            let mut config = EngineConfig::load()?;
            match section {
                Some(section) => {
                    config.reset_section(&section)?;
                    println!("{section} reset to defaults");
                }
                None => {
                    config = EngineConfig::default();
                    println!("config reset to defaults");
                }
            }
            config.save()?;
        }
        ConfigAction::Path => {
            println!("{}", EngineConfig::path()?.display());
        }
    }
    Ok(())
}
