use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Directory searched for helper executables when none is configured
pub const DEFAULT_SERVER_DIR_NAME: &str = "servers";

/// User settings, stored as `settings.toml` in the data directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefer external `TelescopeServer*` executables over embedded servers
    pub use_server_executables: bool,
    pub server_executables_path: Option<PathBuf>,
    /// Write per-slot communication logs
    pub use_server_logs: bool,
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_server_executables: false,
            server_executables_path: None,
            use_server_logs: false,
            tick_interval_ms: 100,
        }
    }
}

impl Settings {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE_NAME)
    }

    /// Read the settings of `data_dir`. Anything unreadable yields defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = Self::path(data_dir);
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {path:?}"))
            .and_then(|text| {
                toml::from_str::<Settings>(&text)
                    .with_context(|| format!("Failed to parse {path:?}"))
            }) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("{err:#}, using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = Self::path(data_dir);
        let text = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create directory {data_dir:?}"))?;
        fs::write(&path, text).with_context(|| format!("Failed to write {path:?}"))?;
        Ok(())
    }

    /// Configured helper directory, or `<data dir>/servers`.
    pub fn server_dir(&self, data_dir: &Path) -> PathBuf {
        self.server_executables_path
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_SERVER_DIR_NAME))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
