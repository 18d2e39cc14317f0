use std::path::{Path, PathBuf};

use tracing::debug;

use crate::camera::error::{CameraError, Result};
use crate::settings::types::PipelineSettings;

/// Environment variable naming the settings file.
pub const SETTINGS_PATH_ENV: &str = "GRAYCAM_SETTINGS";
/// Environment variable overriding the configured device id.
pub const DEVICE_ID_ENV: &str = "GRAYCAM_DEVICE_ID";
/// Settings file used when `GRAYCAM_SETTINGS` is unset.
pub const DEFAULT_SETTINGS_FILE: &str = "graycam.json";

/// Settings file on disk and the values loaded from it.
pub struct SettingsStore {
    path: PathBuf,
    settings: PipelineSettings,
}

impl SettingsStore {
    /// Open the store at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// Returns `CameraError::Settings` if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: PathBuf) -> Result<Self> {
        let settings = Self::load(&path)?;
        Ok(Self { path, settings })
    }

    /// Open the store named by `GRAYCAM_SETTINGS` and apply
    /// `GRAYCAM_DEVICE_ID` on top.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        let mut store = Self::open(path)?;
        if let Ok(raw) = std::env::var(DEVICE_ID_ENV) {
            store.settings.device_id = parse_device_id(&raw)?;
        }
        Ok(store)
    }

    /// Load settings from a JSON file, returning defaults on missing file.
    pub fn load(path: &Path) -> Result<PipelineSettings> {
        if !path.exists() {
            debug!("no settings at {}, using defaults", path.display());
            return Ok(PipelineSettings::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CameraError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| CameraError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}

fn parse_device_id(raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|e| {
        CameraError::Settings(format!("{DEVICE_ID_ENV}={raw:?} is not a device id: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_returns_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.json");
        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result, PipelineSettings::default());
    }

    #[test]
    fn load_parses_valid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graycam.json");
        std::fs::write(&path, r#"{"deviceId":2,"frames":5,"logLevel":"debug"}"#).unwrap();

        let result = SettingsStore::load(&path).unwrap();
        assert_eq!(result.device_id, 2);
        assert_eq!(result.frames, 5);
        assert_eq!(result.log_level, "debug");
    }

    #[test]
    fn load_returns_settings_error_for_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graycam.json");
        std::fs::write(&path, "not valid json!!!").unwrap();

        let err = SettingsStore::load(&path).unwrap_err();
        assert!(matches!(err, CameraError::Settings(_)));
    }

    #[test]
    fn open_keeps_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graycam.json");
        let store = SettingsStore::open(path.clone()).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.settings(), &PipelineSettings::default());
    }

    #[test]
    fn device_id_must_be_numeric() {
        assert_eq!(parse_device_id(" 4 ").unwrap(), 4);
        assert!(matches!(
            parse_device_id("front"),
            Err(CameraError::Settings(_))
        ));
    }
}
