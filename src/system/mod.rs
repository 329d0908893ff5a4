use std::{
    io,
    path::Path,
    process::{Child, Command, Stdio},
};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
use windows as platform;
#[cfg(target_os = "windows")]
pub use windows::JobGuard;

pub struct ChildExit {
    pub code: Option<i32>,
}

impl ChildExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code: {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// A spawned frps/frpc child. On Windows it is tied to a kill-on-close job
/// so it cannot outlive the control plane.
pub struct ChildProcess {
    child: Child,
    #[cfg(target_os = "windows")]
    _job_guard: Option<JobGuard>,
}

impl ChildProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ChildExit>> {
        self.child
            .try_wait()
            .map(|status| status.map(|status| ChildExit { code: status.code() }))
    }

    pub fn kill(&mut self) {
        if let Err(error) = self.child.kill() {
            log::debug!("[process] kill pid {} failed: {error}", self.child.id());
        }
    }

    pub fn take_stdout(&mut self) -> Option<Box<dyn io::Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|reader| Box::new(reader) as Box<dyn io::Read + Send>)
    }

    pub fn take_stderr(&mut self) -> Option<Box<dyn io::Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|reader| Box::new(reader) as Box<dyn io::Read + Send>)
    }
}

/// Spawns `<binary> -c <configuration_path>` with piped output and no stdin.
pub fn spawn_with_config(binary: &Path, configuration_path: &Path) -> io::Result<ChildProcess> {
    log::info!(
        "[process] spawning: {} -c {}",
        binary.display(),
        configuration_path.display(),
    );
    let mut command = Command::new(binary);
    command
        .arg("-c")
        .arg(configuration_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(directory) = binary.parent() {
        command.current_dir(directory);
    }
    platform::spawn(command)
}

/// Asks the process to exit. Returns whether the request was delivered.
pub fn terminate_process(process_id: u32) -> bool {
    platform::terminate_process(process_id)
}

#[cfg(target_os = "windows")]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x08000000;

/// A command with piped output, no stdin and no console window.
pub fn silent_command(program: &str) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    command
}

pub fn run_silent_with_output(program: &str, arguments: &[&str]) -> (bool, String) {
    log::debug!("[cmd] {} {}", program, arguments.join(" "));
    let mut command = silent_command(program);
    command.args(arguments);

    match command.output() {
        Ok(output) => {
            let success = output.status.success();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !success {
                log::debug!(
                    "[cmd] FAILED (exit {}): {} {}\n  stdout: {}\n  stderr: {}",
                    output.status.code().unwrap_or(-1),
                    program,
                    arguments.join(" "),
                    stdout.trim(),
                    stderr.trim(),
                );
                return (false, stderr);
            }
            log::trace!(
                "[cmd] OK: {} {} → stdout={}",
                program,
                arguments.join(" "),
                stdout.trim(),
            );
            (true, stdout)
        }
        Err(error) => {
            log::debug!("[cmd] spawn error for {}: {}", program, error);
            (false, error.to_string())
        }
    }
}

pub fn run_silent(program: &str, arguments: &[&str]) -> bool {
    run_silent_with_output(program, arguments).0
}

/// Marks `path` executable for everyone. No-op off Unix.
pub fn make_executable(path: &Path) -> io::Result<()> {
    platform::make_executable(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_run_silent_reports_stdout_or_stderr() {
        let (success, output) = run_silent_with_output("sh", &["-c", "echo out; echo err >&2"]);
        assert!(success);
        assert_eq!(output.trim(), "out");

        let (success, output) = run_silent_with_output("sh", &["-c", "echo err >&2; exit 3"]);
        assert!(!success);
        assert_eq!(output.trim(), "err");

        assert!(!run_silent("/nonexistent/program", &[]));
    }

    #[test]
    fn test_terminate_delivers_signal() {
        let directory = tempfile::tempdir().unwrap();
        let script = directory.path().join("sleeper");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        make_executable(&script).unwrap();

        let mut child = spawn_with_config(&script, Path::new("/dev/null")).unwrap();
        assert!(terminate_process(child.id()));
        let exit = loop {
            if let Some(exit) = child.try_wait().unwrap() {
                break exit;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        };
        assert!(!exit.success());
        assert_eq!(exit.code, None);
    }
}
