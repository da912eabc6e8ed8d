//! Configuration and data directories for Prune
//!
//! Settings and credentials live in the config directory (~/.config/prune/),
//! the per-account mailbox databases in the data directory
//! (~/.local/share/prune/ on Linux).
//!
//! Call [`init`] at application startup to bootstrap both directories.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "prune";

/// Initialize the Prune config and data directories.
///
/// Returns the config directory.
pub fn init() -> Result<PathBuf> {
    ensure_data_dir()?;
    ensure_config_dir()
}

/// Get the Prune config directory (~/.config/prune/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the Prune data directory holding the mailbox databases
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a config file within the Prune config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the Prune config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the Prune config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the Prune config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Ensure the Prune data directory exists
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir().context("Could not determine data directory")?;
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Create a directory (and parents) if missing
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Save a value as JSON to a config file in the Prune config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as pretty-printed JSON to an arbitrary path
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        page_size: u32,
        name: String,
    }

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("prune"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("settings.json").unwrap();
        assert!(path.ends_with("prune/settings.json"));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample {
            page_size: 500,
            name: "me@example.com".to_string(),
        };

        save_json_file(&path, &sample).unwrap();
        let loaded: Sample = load_json_file(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = load_json_file::<Sample>(&path).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
