//! Discovery, download, extraction and selection of frp releases.

mod catalog;
mod download;
mod extract;
mod platform;
mod registry;
#[cfg(test)]
mod test_server;

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Serialize;

pub use catalog::{ReleaseAsset, ReleaseCatalogEntry, fetch_catalog};
pub use download::{download, file_name_from_url};
pub use extract::{ArchiveKind, extract};
pub use platform::{
    Platform, host_arch, host_platform, normalize_arch, normalize_version, parse_version,
    resolve_asset_name, version_from_asset_name,
};
pub use registry::{CurrentVersionStatus, InstalledVersions, VersionRegistry, sort_versions};

use crate::{paths::Paths, settings::Settings};

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("network error: {0}")]
    Network(String),
    #[error("GitHub rate limit exceeded{}", .reset_at.map(|at| format!(", resets at {}", at.to_rfc3339())).unwrap_or_default())]
    RateLimited { reset_at: Option<DateTime<Utc>> },
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {status}")]
    Http { status: u16 },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("unsupported archive type: {}", .0.display())]
    UnsupportedArchiveType(PathBuf),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("cannot determine a version from {0}")]
    InvalidVersion(String),
    #[error("release {tag} has no asset for {platform}/{arch}")]
    AssetUnavailable {
        tag: String,
        platform: Platform,
        arch: String,
    },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl ReleaseError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Shared flag that aborts a running download at the next chunk.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "phase", content = "fraction", rename_all = "lowercase")]
pub enum InstallProgress {
    Download(f64),
    Extract(f64),
}

pub struct ReleaseManager {
    paths: Paths,
    client: Client,
    catalog_url: String,
    registry: VersionRegistry,
}

impl ReleaseManager {
    pub fn new(paths: Paths, settings: &Settings) -> Result<Self, ReleaseError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|error| ReleaseError::Network(error.to_string()))?;
        Ok(Self::with_client(paths, client, settings.catalog_url.clone()))
    }

    fn with_client(paths: Paths, client: Client, catalog_url: String) -> Self {
        Self {
            registry: VersionRegistry::new(paths.clone()),
            paths,
            client,
            catalog_url,
        }
    }

    pub fn list_remote_releases(&self) -> Result<Vec<ReleaseCatalogEntry>, ReleaseError> {
        fetch_catalog(&self.client, &self.catalog_url)
    }

    /// Downloads `url` into the release root.
    pub fn download(
        &self,
        url: &str,
        progress: &mut dyn FnMut(f64),
        cancel: &CancelToken,
    ) -> Result<PathBuf, ReleaseError> {
        download(&self.client, url, &self.release_root(), progress, cancel)
    }

    /// Extracts an archive into the release root.
    pub fn extract(&self, archive: &Path, progress: &mut dyn FnMut(f64)) -> Result<PathBuf, ReleaseError> {
        extract(archive, &self.release_root(), progress)
    }

    /// Installs the host's asset of `entry` and makes it current.
    pub fn install(
        &self,
        entry: &ReleaseCatalogEntry,
        progress: &mut dyn FnMut(InstallProgress),
        cancel: &CancelToken,
    ) -> Result<String, ReleaseError> {
        let platform = host_platform();
        let arch = host_arch();
        let asset = entry
            .asset_for(platform, &arch)
            .ok_or_else(|| ReleaseError::AssetUnavailable {
                tag: entry.tag.clone(),
                platform,
                arch: arch.clone(),
            })?;
        self.install_from_url(&asset.url, progress, cancel)
    }

    /// Download, extract and register. Returns the installed version tag.
    pub fn install_from_url(
        &self,
        url: &str,
        progress: &mut dyn FnMut(InstallProgress),
        cancel: &CancelToken,
    ) -> Result<String, ReleaseError> {
        let archive = self.download(url, &mut |fraction| progress(InstallProgress::Download(fraction)), cancel)?;
        let target = self.extract(&archive, &mut |fraction| progress(InstallProgress::Extract(fraction)))?;
        let version = target
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| ReleaseError::InvalidVersion(target.display().to_string()))?;
        self.registry.register_version(&version)?;
        Ok(version)
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn versions(&self) -> InstalledVersions {
        self.registry.versions()
    }

    pub fn set_current(&self, version: &str) -> Result<(), ReleaseError> {
        self.registry.set_current(version)
    }

    pub fn check_current(&self) -> CurrentVersionStatus {
        self.registry.check_current()
    }

    pub fn release_root(&self) -> PathBuf {
        self.paths.release_root()
    }
}
