use std::path::{Path, PathBuf};

use crate::role::Role;

/// Environment variable that relocates the application root.
pub const HOME_ENVIRONMENT_VARIABLE: &str = "FRP_DESKTOP_HOME";

const RELEASE_DIRECTORY: &str = "frp-release";
const VERSION_LIST_FILE: &str = "frp-version";
const CURRENT_VERSION_FILE: &str = "current-version";
const SETTINGS_FILE: &str = "frp-desktop.toml";

/// On-disk layout of the per-user application data root.
#[derive(Clone, Debug)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$FRP_DESKTOP_HOME`, or `frp-desktop` under the platform config directory.
    pub fn from_environment() -> Self {
        if let Some(root) = std::env::var_os(HOME_ENVIRONMENT_VARIABLE).filter(|v| !v.is_empty()) {
            return Self::new(root);
        }
        let root = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("frp-desktop");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn config_directory(&self, role: Role) -> PathBuf {
        self.root.join(format!("{}-config", role.program()))
    }

    pub fn config_path(&self, role: Role) -> PathBuf {
        self.config_directory(role)
            .join(format!("{}.toml", role.program()))
    }

    pub fn logs_directory(&self, role: Role) -> PathBuf {
        self.config_directory(role).join("logs")
    }

    pub fn release_root(&self) -> PathBuf {
        self.root.join(RELEASE_DIRECTORY)
    }

    pub fn version_list_path(&self) -> PathBuf {
        self.release_root().join(VERSION_LIST_FILE)
    }

    pub fn current_version_path(&self) -> PathBuf {
        self.release_root().join(CURRENT_VERSION_FILE)
    }

    pub fn version_directory(&self, version: &str) -> PathBuf {
        self.release_root().join(version)
    }

    pub fn executable_path(&self, version: &str, role: Role) -> PathBuf {
        self.version_directory(version).join(role.binary_name())
    }
}

/// Creates `directory`, logging instead of failing when it cannot be created.
pub fn ensure_directory(directory: &Path) -> bool {
    match std::fs::create_dir_all(directory) {
        Ok(()) => true,
        Err(error) => {
            log::warn!(
                "[paths] failed to create directory {}: {error}",
                directory.display()
            );
            false
        }
    }
}
