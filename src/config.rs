use crate::model::{NetworkConfig, ProjectId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and history limits of an edit session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub coalesce_window_ms: u64,
    pub max_undo: usize,
    pub preview_debounce_ms: u64,
    pub error_clear_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 500,
            max_undo: 50,
            preview_debounce_ms: 50,
            error_clear_ms: 3000,
        }
    }
}

impl SessionConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }

    pub fn error_clear(&self) -> Duration {
        Duration::from_millis(self.error_clear_ms)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub project_id: ProjectId,
}

impl AppConfig {
    /// Read the config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[CONFIG] No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read config at {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write config at {:?}", path))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| user_data_path("looks.db"))
    }
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn user_config_path() -> PathBuf {
    user_data_path("looks_config.json")
}

/// Per-user location for a file of the application.
pub fn user_data_path(file_name: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("Lightspeed")
                .join(file_name);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(base) = std::env::var_os("APPDATA") {
            return PathBuf::from(base).join("Lightspeed").join(file_name);
        }
    }

    // Linux / fallback: XDG or ~/.config
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(base).join("lightspeed").join(file_name)
    } else if let Some(home) = home::home_dir() {
        home.join(".config").join("lightspeed").join(file_name)
    } else {
        PathBuf::from(file_name)
    }
}
