use std::{
    cmp::Ordering,
    fs, io,
    path::PathBuf,
};

use serde::Serialize;

use super::{ReleaseError, platform::parse_version};
use crate::{paths::Paths, role::Role, supervisor::BinaryLocator};

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct InstalledVersions {
    pub all: Vec<String>,
    pub current: Option<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct CurrentVersionStatus {
    pub version: Option<String>,
    pub has_server: bool,
    pub has_client: bool,
}

/// Newest first by `(major, minor, patch)`. Tags that do not parse go last in
/// their original order.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|left, right| match (parse_version(left), parse_version(right)) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// The `frp-version` list and `current-version` pointer under the release root.
#[derive(Clone, Debug)]
pub struct VersionRegistry {
    paths: Paths,
}

impl VersionRegistry {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn versions(&self) -> InstalledVersions {
        InstalledVersions {
            all: self.read_list(),
            current: self.current(),
        }
    }

    pub fn current(&self) -> Option<String> {
        let path = self.paths.current_version_path();
        match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|version| !version.is_empty()),
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    log::warn!("[release] failed to read {}: {error}", path.display());
                }
                None
            }
        }
    }

    /// Adds `version` to the list if absent, re-sorts it and makes it current.
    pub fn register_version(&self, version: &str) -> Result<(), ReleaseError> {
        let mut all = self.read_list();
        if !all.iter().any(|existing| existing == version) {
            all.push(version.to_string());
        }
        sort_versions(&mut all);
        self.write(self.paths.version_list_path(), all.join("\n"))?;
        self.set_current(version)?;
        log::info!("[release] registered {version}");
        Ok(())
    }

    /// Points `current-version` at `version`. The version is not validated.
    pub fn set_current(&self, version: &str) -> Result<(), ReleaseError> {
        self.write(self.paths.current_version_path(), version.trim().to_string())?;
        log::info!("[release] current version set to {}", version.trim());
        Ok(())
    }

    pub fn check_current(&self) -> CurrentVersionStatus {
        let Some(version) = self.current().filter(|version| parse_version(version).is_some()) else {
            return CurrentVersionStatus::default();
        };
        CurrentVersionStatus {
            has_server: self.paths.executable_path(&version, Role::Server).is_file(),
            has_client: self.paths.executable_path(&version, Role::Client).is_file(),
            version: Some(version),
        }
    }

    /// The current version's binary for `role`, if it is installed.
    pub fn executable(&self, role: Role) -> Option<PathBuf> {
        let version = self.current()?;
        let path = self.paths.executable_path(&version, role);
        path.is_file().then_some(path)
    }

    fn read_list(&self) -> Vec<String> {
        let path = self.paths.version_list_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    log::warn!("[release] failed to read {}: {error}", path.display());
                }
                return Vec::new();
            }
        };
        let mut all: Vec<String> = Vec::new();
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if !all.iter().any(|existing| existing == line) {
                all.push(line.to_string());
            }
        }
        all
    }

    fn write(&self, path: PathBuf, content: String) -> Result<(), ReleaseError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReleaseError::io(parent, source))?;
        }
        fs::write(&path, content).map_err(|source| ReleaseError::io(&path, source))
    }
}

impl BinaryLocator for VersionRegistry {
    fn locate(&self, role: Role) -> Option<PathBuf> {
        self.executable(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_sort_is_numeric_not_lexical() {
        let mut versions = strings(&["v1.2.0", "v1.10.0", "v1.2.10"]);
        sort_versions(&mut versions);
        assert_eq!(versions, strings(&["v1.10.0", "v1.2.10", "v1.2.0"]));
    }

    #[test]
    fn test_malformed_tags_sort_last_in_order() {
        let mut versions = strings(&["nightly", "v0.50.0", "latest", "v0.61.1"]);
        sort_versions(&mut versions);
        assert_eq!(versions, strings(&["v0.61.1", "v0.50.0", "nightly", "latest"]));
    }

    #[test]
    fn test_missing_files_yield_empty_registry() {
        let directory = tempfile::tempdir().unwrap();
        let registry = VersionRegistry::new(Paths::new(directory.path()));
        assert_eq!(registry.versions(), InstalledVersions::default());
        assert_eq!(registry.check_current(), CurrentVersionStatus::default());
        assert!(registry.executable(Role::Client).is_none());
    }

    #[test]
    fn test_register_dedupes_and_sets_current() {
        let directory = tempfile::tempdir().unwrap();
        let paths = Paths::new(directory.path());
        let registry = VersionRegistry::new(paths.clone());

        registry.register_version("v0.50.0").unwrap();
        registry.register_version("v0.61.1").unwrap();
        registry.register_version("v0.50.0").unwrap();

        let versions = registry.versions();
        assert_eq!(versions.all, strings(&["v0.61.1", "v0.50.0"]));
        assert_eq!(versions.current.as_deref(), Some("v0.50.0"));
        assert_eq!(
            fs::read_to_string(paths.version_list_path()).unwrap(),
            "v0.61.1\nv0.50.0"
        );
    }

    #[test]
    fn test_register_orders_numerically() {
        let directory = tempfile::tempdir().unwrap();
        let registry = VersionRegistry::new(Paths::new(directory.path()));
        for version in ["v1.2.0", "v1.10.0", "v1.2.10"] {
            registry.register_version(version).unwrap();
        }
        let versions = registry.versions();
        assert_eq!(versions.all, strings(&["v1.10.0", "v1.2.10", "v1.2.0"]));
        assert_eq!(versions.current.as_deref(), Some("v1.2.10"));
    }

    #[test]
    fn test_set_current_does_not_validate() {
        let directory = tempfile::tempdir().unwrap();
        let registry = VersionRegistry::new(Paths::new(directory.path()));
        registry.set_current("v9.9.9").unwrap();
        assert_eq!(registry.current().as_deref(), Some("v9.9.9"));
        assert!(registry.versions().all.is_empty());

        let status = registry.check_current();
        assert_eq!(status.version.as_deref(), Some("v9.9.9"));
        assert!(!status.has_server && !status.has_client);
    }

    #[test]
    fn test_check_current_reports_installed_binaries() {
        let directory = tempfile::tempdir().unwrap();
        let paths = Paths::new(directory.path());
        let registry = VersionRegistry::new(paths.clone());
        fs::create_dir_all(paths.version_directory("v0.50.0")).unwrap();
        fs::write(paths.executable_path("v0.50.0", Role::Client), "").unwrap();
        registry.set_current("v0.50.0").unwrap();

        let status = registry.check_current();
        assert!(status.has_client);
        assert!(!status.has_server);
        assert_eq!(
            registry.locate(Role::Client),
            Some(paths.executable_path("v0.50.0", Role::Client))
        );
        assert_eq!(registry.locate(Role::Server), None);

        registry.set_current("garbage").unwrap();
        assert_eq!(registry.check_current(), CurrentVersionStatus::default());
    }
}
