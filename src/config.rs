use crate::persist::BackendKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "spinstats";
const SETTINGS_FILE: &str = "settings.json";
const STORE_DIR: &str = "store";
const EXPORT_DIR: &str = "exports";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    #[serde(default = "default_summary_top_count")]
    pub summary_top_count: u8,
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_summary_top_count() -> u8 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: None,
            export_dir: None,
            summary_top_count: default_summary_top_count(),
            log_filter: None,
        }
    }
}

impl Settings {
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_root()?.join(STORE_DIR)),
        }
    }

    pub fn resolved_export_dir(&self) -> Result<PathBuf> {
        match &self.export_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_root()?.join(EXPORT_DIR)),
        }
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("SPINSTATS_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn load_settings() -> Result<Settings> {
    let path = settings_path()?;
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_settings_file_from_config_root() {
        let dir = tempdir().expect("tempdir");
        unsafe {
            env::set_var("SPINSTATS_CONFIG_DIR", dir.path().to_string_lossy().as_ref());
        }

        assert_eq!(load_settings().expect("defaults"), Settings::default());

        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"backend":"entity","summary_top_count":25}"#,
        )
        .expect("write settings");
        let loaded = load_settings().expect("load");
        assert_eq!(loaded.backend, BackendKind::Entity);
        assert_eq!(loaded.summary_top_count, 25);
        assert_eq!(
            loaded.resolved_data_dir().expect("data dir"),
            dir.path().join(STORE_DIR)
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"backend":"entity"}"#).expect("parse");
        assert_eq!(settings.backend, BackendKind::Entity);
        assert_eq!(settings.summary_top_count, 10);
        assert!(settings.data_dir.is_none());
    }
}
