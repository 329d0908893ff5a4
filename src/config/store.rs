use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use crate::{
    config::{
        codec::{self, CodecError},
        proxies,
        schema::{ClientConfig, Configuration, RoleConfig, ServerConfig},
    },
    paths::Paths,
    role::Role,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("{} is empty", .0.display())]
    Blank(PathBuf),
    #[error("failed to parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: CodecError },
    #[error("failed to encode configuration: {0}")]
    Encode(#[source] CodecError),
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads and writes the per-role configuration files.
///
/// Reads never fail: a missing, blank or unparseable file is replaced with
/// the role's defaults, which are then returned.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    paths: Paths,
}

impl ConfigStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config_path(&self, role: Role) -> PathBuf {
        self.paths.config_path(role)
    }

    /// Creates the role directory and writes the default skeleton when the
    /// file is absent or blank. Returns the file path.
    pub fn ensure(&self, role: Role) -> Result<PathBuf, ConfigError> {
        let path = self.config_path(role);
        let needs_defaults = match fs::read_to_string(&path) {
            Ok(content) => content.trim().is_empty(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => true,
            Err(error) => return Err(ConfigError::io(&path, error)),
        };
        if needs_defaults {
            log::info!("[config] writing default {} configuration", role.program());
            self.write_text(role, &default_text(role)?)?;
        }
        Ok(path)
    }

    /// Parses the file without healing it.
    pub fn try_read<C: RoleConfig>(&self) -> Result<C, ConfigError> {
        let path = self.config_path(C::ROLE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path));
            }
            Err(error) => return Err(ConfigError::io(&path, error)),
        };
        if content.trim().is_empty() {
            return Err(ConfigError::Blank(path));
        }
        codec::decode(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn read<C: RoleConfig>(&self) -> C {
        match self.try_read::<C>() {
            Ok(config) => config,
            Err(error) => {
                log::warn!("[config] {error}, restoring defaults");
                self.heal(C::ROLE);
                stored_defaults()
            }
        }
    }

    pub fn read_configuration(&self, role: Role) -> Configuration {
        match role {
            Role::Server => self.read::<ServerConfig>().into(),
            Role::Client => self.read::<ClientConfig>().into(),
        }
    }

    /// The file text. A missing or blank file is replaced with defaults; a
    /// file that does not parse is returned as-is so it can be repaired.
    pub fn read_raw(&self, role: Role) -> String {
        if let Err(error) = self.ensure(role) {
            log::warn!("[config] {error}");
        }
        let path = self.config_path(role);
        match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                log::warn!("[config] failed to read {}: {error}", path.display());
                default_text(role).unwrap_or_default()
            }
        }
    }

    /// Replaces the global section. For the client the existing
    /// `[[proxies]]` blocks are carried over verbatim.
    pub fn write<C: RoleConfig>(&self, config: &C) -> Result<(), ConfigError> {
        let mut text = codec::encode(config).map_err(ConfigError::Encode)?;
        if C::ROLE == Role::Client {
            let path = self.config_path(Role::Client);
            let existing = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(error) if error.kind() == io::ErrorKind::NotFound => String::new(),
                Err(error) => return Err(ConfigError::io(&path, error)),
            };
            let layout = proxies::scan(&existing);
            if !layout.blocks.is_empty() {
                log::debug!(
                    "[config] keeping {} proxy blocks in {}",
                    layout.blocks.len(),
                    path.display()
                );
            }
            let mut carried = String::new();
            for block in &layout.blocks {
                if !carried.is_empty() && !carried.ends_with('\n') {
                    carried.push('\n');
                }
                carried.push_str(block.full_text(&existing));
            }
            if !carried.trim().is_empty() {
                text = format!("{}\n\n{}\n", text.trim_end(), carried.trim_end());
            }
            if text.starts_with('\n') {
                text = text.trim_start().to_string();
            }
        }
        self.write_text(C::ROLE, &text)
    }

    pub fn write_configuration(&self, configuration: &Configuration) -> Result<(), ConfigError> {
        match configuration {
            Configuration::Server(config) => self.write(config),
            Configuration::Client(config) => self.write(config),
        }
    }

    /// Writes `text` verbatim, creating the role directory when needed.
    pub(crate) fn write_text(&self, role: Role, text: &str) -> Result<(), ConfigError> {
        let directory = self.paths.config_directory(role);
        fs::create_dir_all(&directory).map_err(|error| ConfigError::io(&directory, error))?;
        let path = self.config_path(role);
        fs::write(&path, text).map_err(|error| ConfigError::io(&path, error))?;
        log::debug!("[config] wrote {} bytes to {}", text.len(), path.display());
        Ok(())
    }

    fn heal(&self, role: Role) {
        let path = self.config_path(role);
        if path.exists() {
            let backup = path.with_extension("toml.bak");
            if let Err(error) = fs::copy(&path, &backup) {
                log::warn!("[config] failed to back up {}: {error}", path.display());
            } else {
                log::info!("[config] previous file kept at {}", backup.display());
            }
        }
        let result = default_text(role).and_then(|text| self.write_text(role, &text));
        if let Err(error) = result {
            log::error!("[config] failed to restore defaults: {error}");
        }
    }
}

/// The defaults as they read back from disk once written, which drops the
/// empty values the encoder omits.
fn stored_defaults<C: RoleConfig>() -> C {
    default_text(C::ROLE)
        .ok()
        .and_then(|text| codec::decode(&text).ok())
        .unwrap_or_else(C::defaults)
}

fn default_text(role: Role) -> Result<String, ConfigError> {
    match role {
        Role::Server => codec::encode(&ServerConfig::defaults()),
        Role::Client => codec::encode(&ClientConfig::defaults()),
    }
    .map_err(ConfigError::Encode)
}
