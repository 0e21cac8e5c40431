pub mod config;
pub mod history;
pub mod leaderboard;
pub mod run;

use std::path::{Path, PathBuf};

use chatpulse_core::storage::data_dir;
use chatpulse_core::{Config, Database};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn resolve_data_dir(explicit: Option<PathBuf>) -> std::io::Result<PathBuf> {
    match explicit {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        }
        None => data_dir(),
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.toml")
}

pub fn load_config(dir: &Path) -> Result<Config, chatpulse_core::CoreError> {
    Config::load_from(&config_path(dir))
}

pub fn open_database(dir: &Path) -> Result<Database, chatpulse_core::CoreError> {
    Database::open_at(&dir.join("chatpulse.db"))
}
