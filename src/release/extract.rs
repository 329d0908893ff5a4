use std::{
    collections::VecDeque,
    fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use futures::{channel::mpsc, executor::block_on_stream};

use super::{ReleaseError, platform::version_from_asset_name};
use crate::{role::Role, system};

/// Lines of tool output kept for the error message of a failed extraction.
const ERROR_TAIL_LINES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Unpacks a release archive into `destination/vX.Y.Z` and deletes the
/// archive. Progress counts extracted entries against the listed total.
pub fn extract(
    archive: &Path,
    destination: &Path,
    progress: &mut dyn FnMut(f64),
) -> Result<PathBuf, ReleaseError> {
    let kind = ArchiveKind::from_path(archive)
        .ok_or_else(|| ReleaseError::UnsupportedArchiveType(archive.to_path_buf()))?;
    let file_name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let version = version_from_asset_name(file_name)
        .ok_or_else(|| ReleaseError::InvalidVersion(file_name.to_string()))?;
    if !archive.is_file() {
        return Err(ReleaseError::io(
            archive,
            io::Error::new(io::ErrorKind::NotFound, "archive not found"),
        ));
    }

    log::info!(
        "[release] extracting {} into {}",
        archive.display(),
        destination.display()
    );
    let staging = destination.join(format!(".extract-{version}"));
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|source| ReleaseError::io(&staging, source))?;
    }
    fs::create_dir_all(&staging).map_err(|source| ReleaseError::io(&staging, source))?;

    let result = extract_into(kind, archive, &staging, progress)
        .and_then(|()| install_extracted(&staging, destination, &version));
    if let Err(error) = fs::remove_dir_all(&staging)
        && error.kind() != io::ErrorKind::NotFound
    {
        log::warn!(
            "[release] failed to remove staging directory {}: {error}",
            staging.display()
        );
    }
    let target = result?;

    if let Err(error) = fs::remove_file(archive) {
        log::warn!("[release] failed to remove {}: {error}", archive.display());
    }
    for role in Role::ALL {
        let binary = target.join(role.binary_name());
        if binary.exists()
            && let Err(error) = system::make_executable(&binary)
        {
            log::warn!("[release] failed to set executable permission on {}: {error}", binary.display());
        }
    }

    progress(1.0);
    log::info!("[release] installed {version} at {}", target.display());
    Ok(target)
}

fn extract_into(
    kind: ArchiveKind,
    archive: &Path,
    staging: &Path,
    progress: &mut dyn FnMut(f64),
) -> Result<(), ReleaseError> {
    progress(0.0);
    let total = count_entries(kind, archive);
    let archive_string = archive.to_string_lossy().to_string();
    let staging_string = staging.to_string_lossy().to_string();

    let command = match kind {
        ArchiveKind::TarGz => {
            let mut command = system::silent_command("tar");
            command.args(["-xzvf", &archive_string, "-C", &staging_string]);
            command
        }
        ArchiveKind::Zip if cfg!(target_os = "windows") => {
            let script = format!(
                "Expand-Archive -Path '{}' -DestinationPath '{}' -Force",
                archive_string.replace('\'', "''"),
                staging_string.replace('\'', "''"),
            );
            let mut command = system::silent_command("powershell");
            command.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
            command
        }
        ArchiveKind::Zip => {
            let mut command = system::silent_command("unzip");
            command.args(["-o", &archive_string, "-d", &staging_string]);
            command
        }
    };
    run_counting(command, total, progress)
}

fn count_entries(kind: ArchiveKind, archive: &Path) -> Option<usize> {
    let archive_string = archive.to_string_lossy();
    let (success, output) = match kind {
        ArchiveKind::TarGz => system::run_silent_with_output("tar", &["-tzf", &archive_string]),
        ArchiveKind::Zip if cfg!(target_os = "windows") => {
            let script = format!(
                "Add-Type -AssemblyName System.IO.Compression.FileSystem; \
                 [System.IO.Compression.ZipFile]::OpenRead('{}').Entries.Count",
                archive_string.replace('\'', "''"),
            );
            let (success, output) = system::run_silent_with_output(
                "powershell",
                &["-NoProfile", "-NonInteractive", "-Command", &script],
            );
            return success.then(|| output.trim().parse().ok()).flatten();
        }
        ArchiveKind::Zip => system::run_silent_with_output("unzip", &["-Z1", &archive_string]),
    };
    if !success {
        log::debug!("[release] could not list {}: {}", archive.display(), output.trim());
        return None;
    }
    Some(output.lines().filter(|line| !line.trim().is_empty()).count())
}

/// Runs the extraction tool, counting the entry lines it prints on either
/// stream (GNU tar lists on stdout, bsdtar on stderr).
fn run_counting(
    mut command: Command,
    total: Option<usize>,
    progress: &mut dyn FnMut(f64),
) -> Result<(), ReleaseError> {
    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .spawn()
        .map_err(|error| ReleaseError::Extraction(format!("failed to run {program}: {error}")))?;

    let (sender, receiver) = mpsc::unbounded::<String>();
    let streams: [Option<Box<dyn Read + Send>>; 2] = [
        child.stdout.take().map(|reader| Box::new(reader) as Box<dyn Read + Send>),
        child.stderr.take().map(|reader| Box::new(reader) as Box<dyn Read + Send>),
    ];
    let readers: Vec<_> = streams
        .into_iter()
        .flatten()
        .map(|reader| {
            let sender = sender.clone();
            thread::spawn(move || {
                for line in BufReader::new(reader).lines().map_while(Result::ok) {
                    if sender.unbounded_send(line).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(sender);

    let total = total.filter(|total| *total > 0);
    let mut extracted = 0usize;
    let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
    for line in block_on_stream(receiver) {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with("Archive:") {
            extracted += 1;
            if let Some(total) = total {
                progress((extracted as f64 / total as f64).min(0.99));
            }
        }
        if tail.len() == ERROR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let status = child
        .wait()
        .map_err(|error| ReleaseError::Extraction(format!("failed to wait for {program}: {error}")))?;
    for reader in readers {
        let _ = reader.join();
    }
    if !status.success() {
        return Err(ReleaseError::Extraction(format!(
            "{program} failed (exit {}): {}",
            status.code().unwrap_or(-1),
            Vec::from(tail).join("; ")
        )));
    }
    log::debug!("[release] {program} extracted {extracted} entries");
    Ok(())
}

/// Moves the single top-level `frp_*` directory to `destination/version`,
/// replacing any previous installation of that version.
fn install_extracted(staging: &Path, destination: &Path, version: &str) -> Result<PathBuf, ReleaseError> {
    let entries = fs::read_dir(staging).map_err(|source| ReleaseError::io(staging, source))?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("frp_"))
        })
        .collect();
    candidates.sort();
    let extracted = candidates.into_iter().next().ok_or_else(|| {
        ReleaseError::Extraction("archive does not contain an frp_* directory".into())
    })?;

    let target = destination.join(version);
    if target.exists() {
        log::info!("[release] replacing existing {}", target.display());
        fs::remove_dir_all(&target).map_err(|source| ReleaseError::io(&target, source))?;
    }
    fs::rename(&extracted, &target).map_err(|source| ReleaseError::io(&extracted, source))?;
    Ok(target)
}
