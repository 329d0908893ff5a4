//! The command surface a UI or the CLI drives.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
};

use futures::channel::mpsc;
use serde::Serialize;

use crate::{
    config::{ConfigStore, Configuration, ProxyEntry, ProxyStore},
    error::{Error, ErrorResponse},
    paths::Paths,
    process_log::{LogLine, ProcessEvent},
    process_state::ProcessState,
    release::{
        CancelToken, CurrentVersionStatus, InstallProgress, InstalledVersions, ReleaseCatalogEntry,
        ReleaseManager,
    },
    role::Role,
    settings::Settings,
    supervisor::{BinaryLocator, ProcessHealth, StopTicket, Supervisor},
};

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InstallEvent {
    Progress(InstallProgress),
    Finished { version: String },
    Failed(ErrorResponse),
}

/// A release installation running on a worker thread.
pub struct InstallHandle {
    pub cancel: CancelToken,
    pub events: mpsc::UnboundedReceiver<InstallEvent>,
}

pub struct ControlPlane {
    paths: Paths,
    settings: Settings,
    store: ConfigStore,
    proxies: ProxyStore,
    supervisor: Supervisor,
    releases: Arc<ReleaseManager>,
}

impl ControlPlane {
    pub fn new(paths: Paths) -> Result<Self, Error> {
        let settings = Settings::load(&paths);
        Self::with_settings(paths, settings)
    }

    pub fn with_settings(paths: Paths, settings: Settings) -> Result<Self, Error> {
        let releases = Arc::new(ReleaseManager::new(paths.clone(), &settings)?);
        let locator: Arc<dyn BinaryLocator> = Arc::new(releases.registry().clone());
        let supervisor =
            Supervisor::new(paths.clone(), locator).with_session_logs(settings.session_logs);
        let store = ConfigStore::new(paths.clone());
        log::info!("[cmd] control plane rooted at {}", paths.root().display());
        Ok(Self {
            proxies: ProxyStore::new(store.clone()),
            store,
            supervisor,
            releases,
            settings,
            paths,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self, role: Role) -> PathBuf {
        self.store.config_path(role)
    }

    /// Creates the role's default configuration when it is missing.
    pub fn ensure_config(&self, role: Role) -> Result<PathBuf, Error> {
        Ok(self.store.ensure(role)?)
    }

    pub fn read_config(&self, role: Role) -> Configuration {
        self.store.read_configuration(role)
    }

    pub fn save_config(&self, configuration: &Configuration) -> Result<(), Error> {
        log::info!("[cmd] saving {} configuration", configuration.role());
        Ok(self.store.write_configuration(configuration)?)
    }

    pub fn read_raw_config(&self, role: Role) -> String {
        self.store.read_raw(role)
    }

    pub fn start(&self, role: Role) -> Result<(), Error> {
        Ok(self.supervisor.start(role)?)
    }

    pub fn stop(&self, role: Role) -> StopTicket {
        self.supervisor.stop(role)
    }

    pub fn status(&self, role: Role) -> bool {
        self.supervisor.status(role)
    }

    pub fn state(&self, role: Role) -> ProcessState {
        self.supervisor.state(role)
    }

    pub fn health(&self, role: Role) -> ProcessHealth {
        self.supervisor.health(role)
    }

    pub fn subscribe(&self, role: Role) -> mpsc::UnboundedReceiver<ProcessEvent> {
        self.supervisor.subscribe(role)
    }

    pub fn recent_logs(&self, role: Role) -> Vec<LogLine> {
        self.supervisor.recent_logs(role)
    }

    pub fn list_proxies(&self) -> Result<Vec<ProxyEntry>, Error> {
        Ok(self.proxies.list()?)
    }

    pub fn get_proxy(&self, name: &str) -> Result<Option<ProxyEntry>, Error> {
        Ok(self.proxies.get(name)?)
    }

    pub fn add_proxy(&self, entry: &ProxyEntry) -> Result<(), Error> {
        Ok(self.proxies.add(entry)?)
    }

    pub fn update_proxy(&self, name: &str, entry: &ProxyEntry) -> Result<(), Error> {
        Ok(self.proxies.update(name, entry)?)
    }

    pub fn delete_proxy(&self, name: &str) -> Result<(), Error> {
        Ok(self.proxies.delete(name)?)
    }

    pub fn list_remote_releases(&self) -> Result<Vec<ReleaseCatalogEntry>, Error> {
        Ok(self.releases.list_remote_releases()?)
    }

    /// Installs on the calling thread.
    pub fn install(
        &self,
        entry: &ReleaseCatalogEntry,
        progress: &mut dyn FnMut(InstallProgress),
        cancel: &CancelToken,
    ) -> Result<String, Error> {
        Ok(self.releases.install(entry, progress, cancel)?)
    }

    /// Installs on a worker thread. The stream ends with `Finished` or `Failed`.
    pub fn spawn_install(&self, entry: ReleaseCatalogEntry) -> InstallHandle {
        let cancel = CancelToken::new();
        let (sender, events) = mpsc::unbounded();
        let releases = self.releases.clone();
        let worker_cancel = cancel.clone();

        thread::spawn(move || {
            log::info!("[cmd] installing {}", entry.tag);
            let progress_sender = sender.clone();
            let result = releases.install(
                &entry,
                &mut |progress| {
                    let _ = progress_sender.unbounded_send(InstallEvent::Progress(progress));
                },
                &worker_cancel,
            );
            let event = match result {
                Ok(version) => InstallEvent::Finished { version },
                Err(error) => {
                    log::warn!("[cmd] install of {} failed: {error}", entry.tag);
                    InstallEvent::Failed(Error::from(error).to_response())
                }
            };
            let _ = sender.unbounded_send(event);
        });

        InstallHandle { cancel, events }
    }

    pub fn versions(&self) -> InstalledVersions {
        self.releases.versions()
    }

    pub fn set_current_version(&self, version: &str) -> Result<(), Error> {
        Ok(self.releases.set_current(version)?)
    }

    pub fn check_current_version(&self) -> CurrentVersionStatus {
        self.releases.check_current()
    }

    pub fn release_root(&self) -> PathBuf {
        self.releases.release_root()
    }

    /// Stops both children, killing any that ignore the request.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }
}
