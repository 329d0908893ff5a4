use serde::{Deserialize, Serialize};

use crate::paths::{Paths, ensure_directory};

pub const DEFAULT_CATALOG_URL: &str = "https://api.github.com/repos/fatedier/frp/releases";

/// User-level preferences persisted next to the role directories.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Mirror child output into `{role}-config/logs/<timestamp>.log`.
    #[serde(default)]
    pub session_logs: bool,
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_user_agent() -> String {
    format!("frp-desktop/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            user_agent: default_user_agent(),
            session_logs: false,
        }
    }
}

impl Settings {
    pub fn load(paths: &Paths) -> Self {
        let path = paths.settings_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    log::info!("[settings] loaded from {}", path.display());
                    settings
                }
                Err(error) => {
                    log::warn!("[settings] failed to parse {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "[settings] no settings file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &Paths) {
        let path = paths.settings_path();
        if let Some(parent) = path.parent() {
            ensure_directory(parent);
        }
        match toml::to_string_pretty(self) {
            Ok(content) => {
                if let Err(error) = std::fs::write(&path, content) {
                    log::warn!("[settings] failed to write {}: {error}", path.display());
                }
            }
            Err(error) => {
                log::warn!("[settings] failed to serialize settings: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let paths = Paths::new(directory.path());
        assert_eq!(Settings::load(&paths), Settings::default());
    }

    #[test]
    fn test_save_and_load_keeps_values() {
        let directory = tempfile::tempdir().unwrap();
        let paths = Paths::new(directory.path());
        let settings = Settings {
            catalog_url: "http://127.0.0.1:9/releases".into(),
            session_logs: true,
            ..Settings::default()
        };
        settings.save(&paths);
        assert_eq!(Settings::load(&paths), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let paths = Paths::new(directory.path());
        std::fs::write(paths.settings_path(), "session_logs = true\n").unwrap();
        let settings = Settings::load(&paths);
        assert!(settings.session_logs);
        assert_eq!(settings.catalog_url, DEFAULT_CATALOG_URL);
    }
}
