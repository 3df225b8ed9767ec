//! App-wide preferences: the current mode and whether tools auto-start.
//!
//! This is the only engine-relevant piece of application state. It is read
//! once at startup and rewritten immediately after every mode change, before
//! any backend work happens, so a crash mid-switch still leaves the intended
//! mode on disk.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{data_directory, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(rename = "currentMode")]
    pub current_mode: Mode,
    #[serde(rename = "autoStartTools", default)]
    pub auto_start_tools: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            current_mode: Mode::Monitor,
            auto_start_tools: false,
        }
    }
}

/// Path of the preference file.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(data_directory()?.join("settings.json"))
}

impl AppSettings {
    /// Load preferences, falling back to defaults when the file is missing or
    /// unreadable. Unreadable is treated like missing; the next save repairs it.
    pub fn load(path: &Path) -> AppSettings {
        if !path.exists() {
            return AppSettings::default();
        }

        let Ok(contents) = fs::read_to_string(path) else {
            return AppSettings::default();
        };

        serde_json::from_str(&contents).unwrap_or_default()
    }

    /// Save as pretty-printed JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize settings: {}", e))?;

        fs::write(path, json)
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;

        Ok(())
    }
}
