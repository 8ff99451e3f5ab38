use crate::counter::DEFAULT_TICK_INTERVAL;
use crate::paths::AppPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

fn default_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL.as_millis() as u64
}

fn default_prefs_name() -> String {
    "CounterPrefs".to_string()
}

/// Which persistence mechanism backs the counter value.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Synchronous reads from memory, background disk flush.
    SharedPreferences,
    /// Every read and write goes through a queued async store.
    #[default]
    DataStore,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::SharedPreferences => write!(f, "shared preferences"),
            Backend::DataStore => write!(f, "data store"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shared" | "shared_preferences" | "sharedpreferences" | "prefs" => {
                Ok(Backend::SharedPreferences)
            }
            "datastore" | "data_store" | "store" => Ok(Backend::DataStore),
            other => Err(anyhow::anyhow!("Unknown backend: {}", other)),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_prefs_name")]
    pub prefs_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            tick_interval_ms: default_interval_ms(),
            prefs_name: default_prefs_name(),
        }
    }
}

impl Config {
    /// Load the config, writing the defaults out on first run so there is
    /// a file to edit.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&AppPaths::get_config_file_path()?)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        config.save_to(path)?;
        log::info!("Wrote default config to {:?}", path);
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("Invalid config: {:?}", path))?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config: {:?}", path))?;
        Ok(())
    }

    pub fn get_path_string() -> Result<String> {
        let path = AppPaths::get_config_file_path()?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
