//! Engine settings persisted as JSON.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for the outline engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Largest number of note specifications accepted in one mutation batch.
    pub max_batch_size: usize,
    /// Verify on read that every `next` link joins notes with the same parent.
    pub strict_sibling_check: bool,
    /// How many operations the log retains.
    pub operation_log_keep_last: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            strict_sibling_check: false,
            operation_log_keep_last: 1000,
        }
    }
}

/// Loads settings from `path`; returns defaults if the file is missing or corrupt.
pub fn load_settings<P: AsRef<Path>>(path: P) -> EngineSettings {
    match fs::read_to_string(path.as_ref()) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("ignoring unreadable settings file {}: {e}", path.as_ref().display());
            EngineSettings::default()
        }),
        Err(_) => EngineSettings::default(),
    }
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save_settings<P: AsRef<Path>>(path: P, settings: &EngineSettings) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
