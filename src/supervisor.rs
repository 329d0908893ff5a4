//! Lifecycle of the frps and frpc children.
//!
//! Each role has one slot holding at most one live child. Output is read on
//! dedicated threads and fanned out to subscribers as [`ProcessEvent`]s; a
//! watcher thread per child polls for its exit. Every start bumps the slot's
//! generation so that an exit or a late line from a previous child is never
//! attributed to the current one.

use std::{
    fs::{self, File},
    future::Future,
    io::{self, BufRead, BufReader, Read, Write},
    path::PathBuf,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use futures::channel::{mpsc, oneshot};
use serde::Serialize;

use crate::{
    paths::Paths,
    process_log::{LogLevel, LogLine, ProcessEvent, ProcessLog, StatusChange},
    process_state::ProcessState,
    role::Role,
    system::{self, ChildProcess},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code reported when the child could not be spawned at all.
pub const SPAWN_FAILURE_CODE: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{0} is already running")]
    AlreadyRunning(Role),
    #[error("no {0} executable available; install a release and select it first")]
    MissingBinary(Role),
    #[error("configuration file {} does not exist", .0.display())]
    MissingConfig(PathBuf),
    #[error("failed to start {role}: {source}")]
    SpawnFailure { role: Role, source: io::Error },
}

/// Resolves the executable to run for a role.
pub trait BinaryLocator: Send + Sync {
    fn locate(&self, role: Role) -> Option<PathBuf>;
}

impl<F> BinaryLocator for F
where
    F: Fn(Role) -> Option<PathBuf> + Send + Sync,
{
    fn locate(&self, role: Role) -> Option<PathBuf> {
        self(role)
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ProcessHealth {
    pub state: ProcessState,
    /// A line confirming login or listener startup has been seen.
    pub ready: bool,
    /// First error line of the current session.
    pub error: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ExitSignal {
    code: Option<Option<i32>>,
    waiters: Vec<oneshot::Sender<Option<i32>>>,
}

struct RunningProcess {
    pid: u32,
    generation: u64,
    child: Mutex<ChildProcess>,
    stop_requested: AtomicBool,
    exit: Mutex<ExitSignal>,
}

impl RunningProcess {
    fn new(child: ChildProcess, generation: u64) -> Self {
        Self {
            pid: child.id(),
            generation,
            child: Mutex::new(child),
            stop_requested: AtomicBool::new(false),
            exit: Mutex::new(ExitSignal::default()),
        }
    }

    /// Resolves once the child has exited, immediately if it already has.
    fn exited(&self) -> oneshot::Receiver<Option<i32>> {
        let (sender, receiver) = oneshot::channel();
        let mut exit = lock(&self.exit);
        match exit.code {
            Some(code) => {
                let _ = sender.send(code);
            }
            None => exit.waiters.push(sender),
        }
        receiver
    }

    fn finish(&self, code: Option<i32>) {
        let mut exit = lock(&self.exit);
        exit.code = Some(code);
        for waiter in exit.waiters.drain(..) {
            let _ = waiter.send(code);
        }
    }
}

/// Handle to a requested stop. Dropping it is fine; awaiting it (or calling
/// [`StopTicket::wait`]) yields the child's raw exit code once it is gone.
pub struct StopTicket {
    exited: Option<oneshot::Receiver<Option<i32>>>,
    outcome: Option<Option<i32>>,
    process: Option<Arc<RunningProcess>>,
}

impl StopTicket {
    fn already_stopped() -> Self {
        Self {
            exited: None,
            outcome: Some(None),
            process: None,
        }
    }

    /// Whether a child was actually running when the stop was requested.
    pub fn was_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn wait(self) -> Option<i32> {
        futures::executor::block_on(self)
    }

    /// Returns `true` if the child exited within `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.outcome.is_some() {
                return true;
            }
            let Some(receiver) = self.exited.as_mut() else {
                return true;
            };
            match receiver.try_recv() {
                Ok(Some(code)) => self.outcome = Some(code),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => self.outcome = Some(None),
            }
        }
    }

    /// Forcibly kills the child if it is still alive.
    pub fn kill(&self) {
        if let Some(process) = &self.process {
            log::warn!("[supervisor] killing pid {}", process.pid);
            lock(&process.child).kill();
        }
    }
}

impl Future for StopTicket {
    type Output = Option<i32>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(code) = this.outcome {
            return Poll::Ready(code);
        }
        let Some(receiver) = this.exited.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(receiver).poll(context) {
            Poll::Ready(result) => {
                let code = result.unwrap_or(None);
                this.outcome = Some(code);
                Poll::Ready(code)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Default)]
struct Slot {
    state: ProcessState,
    generation: u64,
    process: Option<Arc<RunningProcess>>,
    subscribers: Vec<mpsc::UnboundedSender<ProcessEvent>>,
    history: ProcessLog,
}

impl Slot {
    fn broadcast(&mut self, event: ProcessEvent) {
        if let ProcessEvent::Log(line) = &event {
            self.history.push_line(line.clone());
        }
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
    }

    fn broadcast_status(&mut self, running: bool, code: Option<i32>) {
        self.broadcast(ProcessEvent::Status(StatusChange { running, code }));
    }
}

#[derive(Default)]
struct Shared {
    slots: [Mutex<Slot>; 2],
}

impl Shared {
    fn slot(&self, role: Role) -> MutexGuard<'_, Slot> {
        lock(&self.slots[role.index()])
    }
}

/// Owns both role slots. Cloning shares the same slots.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
    paths: Paths,
    locator: Arc<dyn BinaryLocator>,
    session_logs: bool,
}

impl Supervisor {
    pub fn new(paths: Paths, locator: Arc<dyn BinaryLocator>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            paths,
            locator,
            session_logs: false,
        }
    }

    /// Also write each session's output to `{role}-config/logs/<timestamp>.log`.
    pub fn with_session_logs(mut self, enabled: bool) -> Self {
        self.session_logs = enabled;
        self
    }

    pub fn start(&self, role: Role) -> Result<(), SupervisorError> {
        let mut slot = self.shared.slot(role);
        if slot.process.is_some() {
            return Err(SupervisorError::AlreadyRunning(role));
        }
        let binary = self
            .locator
            .locate(role)
            .filter(|path| path.is_file())
            .ok_or(SupervisorError::MissingBinary(role))?;
        let configuration_path = self.paths.config_path(role);
        if !configuration_path.is_file() {
            return Err(SupervisorError::MissingConfig(configuration_path));
        }
        let configuration_path =
            std::path::absolute(&configuration_path).unwrap_or(configuration_path);

        slot.state = ProcessState::Starting;
        slot.generation += 1;
        let generation = slot.generation;
        slot.history.reset();

        let mut child = match system::spawn_with_config(&binary, &configuration_path) {
            Ok(child) => child,
            Err(source) => {
                log::error!("[supervisor] failed to spawn {}: {source}", binary.display());
                slot.state = ProcessState::Stopped;
                slot.broadcast_status(false, Some(SPAWN_FAILURE_CODE));
                return Err(SupervisorError::SpawnFailure { role, source });
            }
        };
        let stdout = child.take_stdout();
        let stderr = child.take_stderr();
        let process = Arc::new(RunningProcess::new(child, generation));
        slot.process = Some(process.clone());
        slot.state = ProcessState::Running;
        slot.broadcast_status(true, None);
        drop(slot);

        log::info!(
            "[supervisor] {role} started (pid={}, generation={generation})",
            process.pid
        );

        let session_log = if self.session_logs {
            open_session_log(&self.paths, role)
        } else {
            None
        };
        let readers = [(stdout, LogLevel::Info), (stderr, LogLevel::Error)]
            .into_iter()
            .filter_map(|(reader, level)| {
                self.spawn_reader(role, generation, reader?, level, session_log.clone())
            })
            .collect();
        self.spawn_watcher(role, process, readers);
        Ok(())
    }

    /// Requests termination. A no-op when nothing runs. The slot is free for
    /// a new start as soon as this returns.
    pub fn stop(&self, role: Role) -> StopTicket {
        let mut slot = self.shared.slot(role);
        let Some(process) = slot.process.take() else {
            log::debug!("[supervisor] {role} is not running, nothing to stop");
            return StopTicket::already_stopped();
        };
        slot.state = ProcessState::Stopping;
        drop(slot);

        process.stop_requested.store(true, Ordering::SeqCst);
        let exited = process.exited();
        if !system::terminate_process(process.pid) {
            lock(&process.child).kill();
        }
        StopTicket {
            exited: Some(exited),
            outcome: None,
            process: Some(process),
        }
    }

    /// Stops both roles, killing any child that ignores the request.
    pub fn shutdown(&self) {
        for role in Role::ALL {
            let mut ticket = self.stop(role);
            if !ticket.was_running() {
                continue;
            }
            if !ticket.wait_timeout(GRACEFUL_SHUTDOWN_TIMEOUT) {
                log::warn!("[supervisor] {role} did not exit in time");
                ticket.kill();
            }
        }
    }

    pub fn status(&self, role: Role) -> bool {
        self.shared.slot(role).process.is_some()
    }

    pub fn state(&self, role: Role) -> ProcessState {
        self.shared.slot(role).state
    }

    pub fn pid(&self, role: Role) -> Option<u32> {
        self.shared.slot(role).process.as_ref().map(|process| process.pid)
    }

    pub fn health(&self, role: Role) -> ProcessHealth {
        let slot = self.shared.slot(role);
        ProcessHealth {
            state: slot.state,
            ready: slot.history.ready,
            error: slot.history.error.clone(),
        }
    }

    pub fn subscribe(&self, role: Role) -> mpsc::UnboundedReceiver<ProcessEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.shared.slot(role).subscribers.push(sender);
        receiver
    }

    /// Output of the current (or last) session, oldest first.
    pub fn recent_logs(&self, role: Role) -> Vec<LogLine> {
        self.shared.slot(role).history.lines()
    }

    fn spawn_reader(
        &self,
        role: Role,
        generation: u64,
        reader: Box<dyn Read + Send>,
        level: LogLevel,
        session_log: Option<Arc<Mutex<File>>>,
    ) -> Option<JoinHandle<()>> {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", role.program(), level.as_str()))
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                let mut buffer = Vec::new();
                loop {
                    buffer.clear();
                    match reader.read_until(b'\n', &mut buffer) {
                        Ok(0) => break,
                        Ok(_) => {
                            let message = String::from_utf8_lossy(&buffer)
                                .trim_end_matches(['\r', '\n'])
                                .to_string();
                            if let Some(ref log_file) = session_log
                                && let Ok(mut file) = log_file.lock()
                                && let Err(error) = writeln!(file, "{message}")
                            {
                                log::warn!("[logs] failed to write {} line: {error}", level.as_str());
                            }
                            let mut slot = shared.slot(role);
                            if slot.generation == generation {
                                slot.broadcast(ProcessEvent::Log(LogLine { level, message }));
                            }
                        }
                        Err(error) => {
                            log::trace!(
                                "[supervisor] {role} {} reader ended: {error}",
                                level.as_str()
                            );
                            break;
                        }
                    }
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(error) => {
                log::warn!("[supervisor] failed to start {role} output reader: {error}");
                None
            }
        }
    }

    fn spawn_watcher(&self, role: Role, process: Arc<RunningProcess>, readers: Vec<JoinHandle<()>>) {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-watcher", role.program()))
            .spawn(move || {
                let exit_code = loop {
                    let polled = lock(&process.child).try_wait();
                    match polled {
                        Ok(Some(exit)) => {
                            log::info!("[supervisor] {role} pid {} exited ({exit})", process.pid);
                            break exit.code;
                        }
                        Ok(None) => thread::sleep(POLL_INTERVAL),
                        Err(error) => {
                            log::warn!("[supervisor] failed to poll {role}: {error}");
                            break None;
                        }
                    }
                };

                // Let the readers flush the last lines before announcing the exit.
                let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
                while readers.iter().any(|reader| !reader.is_finished()) && Instant::now() < deadline
                {
                    thread::sleep(Duration::from_millis(10));
                }

                process.finish(exit_code);
                let code = if process.stop_requested.load(Ordering::SeqCst) {
                    None
                } else {
                    exit_code
                };

                let mut slot = shared.slot(role);
                if slot.generation != process.generation {
                    log::debug!(
                        "[supervisor] ignoring exit of stale {role} generation {}",
                        process.generation
                    );
                    return;
                }
                slot.process = None;
                slot.state = ProcessState::Stopped;
                slot.broadcast_status(false, code);
            });
        if let Err(error) = spawned {
            log::error!("[supervisor] failed to start {role} exit watcher: {error}");
        }
    }
}

fn session_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn open_session_log(paths: &Paths, role: Role) -> Option<Arc<Mutex<File>>> {
    let logs_directory = paths.logs_directory(role);
    if let Err(error) = fs::create_dir_all(&logs_directory) {
        log::warn!("[logs] failed to create log directory: {error}");
        return None;
    }

    let log_path = logs_directory.join(format!("{}.log", session_timestamp()));
    match File::create(&log_path) {
        Ok(file) => {
            log::info!("[logs] session log: {}", log_path.display());
            Some(Arc::new(Mutex::new(file)))
        }
        Err(error) => {
            log::warn!("[logs] failed to create log file: {error}");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use std::path::Path;

    struct Fixture {
        _directory: tempfile::TempDir,
        paths: Paths,
        binary: PathBuf,
    }

    impl Fixture {
        fn new(script: &str) -> Self {
            let directory = tempfile::tempdir().unwrap();
            let paths = Paths::new(directory.path());
            let binary = directory.path().join("frpc");
            fs::write(&binary, script).unwrap();
            system::make_executable(&binary).unwrap();
            let configuration = paths.config_path(Role::Client);
            fs::create_dir_all(configuration.parent().unwrap()).unwrap();
            fs::write(&configuration, "serverPort = 7000\n").unwrap();
            Self {
                _directory: directory,
                paths,
                binary,
            }
        }

        fn supervisor(&self) -> Supervisor {
            let binary = self.binary.clone();
            Supervisor::new(self.paths.clone(), Arc::new(move |_: Role| Some(binary.clone())))
        }
    }

    fn next_event(events: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> ProcessEvent {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(event) = events.next().now_or_never() {
                return event.expect("event stream closed");
            }
            assert!(Instant::now() < deadline, "timed out waiting for an event");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn events_until_exit(events: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut collected = Vec::new();
        loop {
            let event = next_event(events);
            let done = matches!(event, ProcessEvent::Status(StatusChange { running: false, .. }));
            collected.push(event);
            if done {
                return collected;
            }
        }
    }

    fn status(running: bool, code: Option<i32>) -> ProcessEvent {
        ProcessEvent::Status(StatusChange { running, code })
    }

    #[test]
    fn test_output_is_streamed_and_exit_code_reported() {
        let fixture = Fixture::new("#!/bin/sh\necho \"using $2\"\necho \"oops\" >&2\nexit 3\n");
        let supervisor = fixture.supervisor();
        let mut events = supervisor.subscribe(Role::Client);

        supervisor.start(Role::Client).unwrap();
        let collected = events_until_exit(&mut events);

        let configuration = std::path::absolute(fixture.paths.config_path(Role::Client)).unwrap();
        assert_eq!(collected.first(), Some(&status(true, None)));
        assert_eq!(collected.last(), Some(&status(false, Some(3))));
        assert!(collected.contains(&ProcessEvent::Log(LogLine {
            level: LogLevel::Info,
            message: format!("using {}", configuration.display()),
        })));
        assert!(collected.contains(&ProcessEvent::Log(LogLine {
            level: LogLevel::Error,
            message: "oops".into(),
        })));
        assert_eq!(supervisor.recent_logs(Role::Client).len(), 2);
        assert_eq!(supervisor.state(Role::Client), ProcessState::Stopped);
        assert!(!supervisor.status(Role::Client));
    }

    #[test]
    fn test_start_is_exclusive_and_stop_is_idempotent() {
        let fixture = Fixture::new("#!/bin/sh\nexec sleep 30\n");
        let supervisor = fixture.supervisor();
        let mut events = supervisor.subscribe(Role::Client);

        supervisor.start(Role::Client).unwrap();
        assert!(supervisor.status(Role::Client));
        assert!(matches!(
            supervisor.start(Role::Client),
            Err(SupervisorError::AlreadyRunning(Role::Client))
        ));

        let mut ticket = supervisor.stop(Role::Client);
        assert!(ticket.was_running());
        assert!(!supervisor.status(Role::Client));
        assert!(ticket.wait_timeout(Duration::from_secs(10)));

        let collected = events_until_exit(&mut events);
        assert_eq!(collected, vec![status(true, None), status(false, None)]);

        let again = supervisor.stop(Role::Client);
        assert!(!again.was_running());
        assert_eq!(again.wait(), None);
        assert!(!supervisor.status(Role::Server));
    }

    #[test]
    fn test_missing_binary_and_missing_config() {
        let fixture = Fixture::new("#!/bin/sh\nexit 0\n");
        let nothing = Supervisor::new(fixture.paths.clone(), Arc::new(|_: Role| -> Option<PathBuf> { None }));
        assert!(matches!(
            nothing.start(Role::Client),
            Err(SupervisorError::MissingBinary(Role::Client))
        ));

        let supervisor = fixture.supervisor();
        assert!(matches!(
            supervisor.start(Role::Server),
            Err(SupervisorError::MissingConfig(path)) if path.ends_with(Path::new("frps-config/frps.toml"))
        ));
        assert_eq!(supervisor.state(Role::Server), ProcessState::Stopped);
    }

    #[test]
    fn test_spawn_failure_reports_minus_one() {
        let fixture = Fixture::new("not a script");
        fs::set_permissions(&fixture.binary, std::os::unix::fs::PermissionsExt::from_mode(0o644))
            .unwrap();
        let supervisor = fixture.supervisor();
        let mut events = supervisor.subscribe(Role::Client);

        assert!(matches!(
            supervisor.start(Role::Client),
            Err(SupervisorError::SpawnFailure { role: Role::Client, .. })
        ));
        assert_eq!(next_event(&mut events), status(false, Some(SPAWN_FAILURE_CODE)));
        assert_eq!(supervisor.state(Role::Client), ProcessState::Stopped);
    }

    #[test]
    fn test_exit_of_previous_generation_is_ignored() {
        let fixture = Fixture::new("#!/bin/sh\nexec sleep 30\n");
        let supervisor = fixture.supervisor();

        supervisor.start(Role::Client).unwrap();
        let first_pid = supervisor.pid(Role::Client);
        let mut first = supervisor.stop(Role::Client);
        supervisor.start(Role::Client).unwrap();
        assert!(first.wait_timeout(Duration::from_secs(10)));

        // Give the old watcher time to observe the exit.
        thread::sleep(POLL_INTERVAL * 3);
        assert!(supervisor.status(Role::Client));
        assert_eq!(supervisor.state(Role::Client), ProcessState::Running);
        assert_ne!(supervisor.pid(Role::Client), first_pid);

        supervisor.shutdown();
        assert!(!supervisor.status(Role::Client));
    }

    #[test]
    fn test_session_log_mirrors_output() {
        let fixture = Fixture::new("#!/bin/sh\necho hello\n");
        let supervisor = fixture.supervisor().with_session_logs(true);
        let mut events = supervisor.subscribe(Role::Client);
        supervisor.start(Role::Client).unwrap();
        events_until_exit(&mut events);

        let logs: Vec<_> = fs::read_dir(fixture.paths.logs_directory(Role::Client))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        assert_eq!(fs::read_to_string(&logs[0]).unwrap(), "hello\n");
    }
}
