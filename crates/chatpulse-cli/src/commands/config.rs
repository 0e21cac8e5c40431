use std::path::Path;

use clap::Subcommand;
use chatpulse_core::Config;

use super::{config_path, load_config, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Dot-separated key (e.g. "window.active_secs", "channels.announce")
        key: String,
    },
    /// Set a config value
    Set {
        /// Dot-separated key
        key: String,
        /// New value
        value: String,
    },
    /// Print the whole config as JSON
    Show,
    /// Print the config file location
    Path,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction, dir: &Path) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let config = load_config(dir)?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = load_config(dir)?;
            config.set(&key, &value)?;
            config.save_to(&config_path(dir))?;
            println!("ok");
        }
        ConfigAction::Show => {
            let config = load_config(dir)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path(dir).display());
        }
        ConfigAction::Reset => {
            Config::default().save_to(&config_path(dir))?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
