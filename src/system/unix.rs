use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::Path,
    process::Command,
};

use super::{ChildProcess, run_silent};

pub fn terminate_process(process_id: u32) -> bool {
    let process_id_string = process_id.to_string();
    let delivered = run_silent("kill", &["-TERM", &process_id_string]);
    if delivered {
        log::info!("[process] sent SIGTERM to pid={process_id_string}");
    } else {
        log::warn!("[process] SIGTERM failed for pid={process_id_string}");
    }
    delivered
}

pub fn spawn(mut command: Command) -> io::Result<ChildProcess> {
    command.spawn().map(|child| ChildProcess { child })
}

pub fn make_executable(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}
