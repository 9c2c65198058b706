// Starting and controlling the engine process

use super::core::{JobSpec, build_stream_copy_args, shell_command_line};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const WRITE_CHECK_NAME: &str = ".vidbatch_write_check";

/// Ways of starting the engine, in the order they are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchStrategy {
    /// Spawn the executable with the argument list
    Direct,
    /// Same command as one quoted line through the platform interpreter
    Shell,
    /// Remux only: `-c copy`, requested encoding settings dropped
    StreamCopy,
}

impl LaunchStrategy {
    pub const ORDER: [LaunchStrategy; 3] = [Self::Direct, Self::Shell, Self::StreamCopy];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct => "direct execution",
            Self::Shell => "shell-mediated execution",
            Self::StreamCopy => "stream-copy execution",
        }
    }

    /// True when the started process won't apply the requested encoding settings
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::StreamCopy)
    }
}

impl fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Every strategy failed to start a process
#[derive(Debug, Error)]
#[error("all launch strategies failed: {}", summarize_attempts(.attempts))]
pub struct LaunchFailure {
    pub attempts: Vec<(LaunchStrategy, String)>,
}

fn summarize_attempts(attempts: &[(LaunchStrategy, String)]) -> String {
    attempts
        .iter()
        .map(|(strategy, error)| format!("{}: {}", strategy, error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Process creation seam
pub trait Spawner: Send + Sync {
    fn spawn(&self, strategy: LaunchStrategy, command: &mut Command) -> io::Result<Child>;
}

/// Spawns through the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, _strategy: LaunchStrategy, command: &mut Command) -> io::Result<Child> {
        command.spawn()
    }
}

/// Result of polling the merged output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(String),
    /// Nothing arrived within the idle backoff
    Idle,
    /// Both stdout and stderr reached end of file
    Closed,
}

/// A running engine process with its merged stdout/stderr line stream
pub struct ProcessHandle {
    child: Child,
    lines: Receiver<String>,
    strategy: LaunchStrategy,
}

impl ProcessHandle {
    fn from_child(mut child: Child, strategy: LaunchStrategy) -> Self {
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        Self {
            child,
            lines: rx,
            strategy,
        }
    }

    pub fn strategy(&self) -> LaunchStrategy {
        self.strategy
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait up to `idle` for the next output line
    pub fn next_line(&self, idle: Duration) -> StreamEvent {
        match self.lines.recv_timeout(idle) {
            Ok(line) => StreamEvent::Line(line),
            Err(RecvTimeoutError::Timeout) => StreamEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => StreamEvent::Closed,
        }
    }

    /// Poll for exit until `timeout` elapses. `Ok(None)` means still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Ask the process to exit (SIGTERM on Unix; Windows has no graceful variant)
    #[cfg(unix)]
    pub fn terminate(&mut self) -> io::Result<()> {
        let pid = libc::pid_t::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    pub fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    /// Terminate, wait `grace`, then kill and wait `kill_grace`.
    /// Returns the exit status if the process was reaped.
    pub fn shutdown(&mut self, grace: Duration, kill_grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        if let Err(e) = self.terminate() {
            debug!(pid = self.id(), error = %e, "terminate failed");
        }
        if let Ok(Some(status)) = self.wait_timeout(grace) {
            return Some(status);
        }

        warn!(pid = self.id(), "engine ignored terminate, killing");
        if let Err(e) = self.kill() {
            debug!(pid = self.id(), error = %e, "kill failed");
        }
        self.wait_timeout(kill_grace).ok().flatten()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Never leave a stray engine behind or an unreaped child
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Forward lines from a pipe into the merged channel.
///
/// ffmpeg rewrites its stats line with `\r`, so both `\r` and `\n` end a line.
fn forward_lines<R: Read + Send + 'static>(source: R, tx: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut pending: Vec<u8> = Vec::new();

        let flush = |pending: &mut Vec<u8>| -> bool {
            if pending.is_empty() {
                return true;
            }
            let line = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            tx.send(line).is_ok()
        };

        loop {
            let consumed = match reader.fill_buf() {
                Ok([]) => break,
                Ok(buf) => {
                    let mut open = true;
                    for &byte in buf {
                        if byte == b'\n' || byte == b'\r' {
                            open = flush(&mut pending);
                            if !open {
                                break;
                            }
                        } else {
                            pending.push(byte);
                        }
                    }
                    if !open {
                        return;
                    }
                    buf.len()
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            reader.consume(consumed);
        }

        flush(&mut pending);
    });
}

/// Outcome of a best-effort access check before launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightNote {
    Ok(String),
    Warning(String),
}

/// Read a few bytes of the input and write/remove a scratch file in the output directory.
/// Failures are warnings only; ffmpeg reports the authoritative error.
pub fn preflight(job: &JobSpec) -> Vec<PreflightNote> {
    let mut notes = Vec::new();

    match check_readable(&job.input_path) {
        Ok(()) => notes.push(PreflightNote::Ok("Input file is readable".to_string())),
        Err(e) => notes.push(PreflightNote::Warning(format!(
            "Input read check failed for {}: {}",
            job.input_path.display(),
            e
        ))),
    }

    let output_dir = job
        .output_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    match check_writable(&output_dir) {
        Ok(()) => notes.push(PreflightNote::Ok(
            "Output directory is writable".to_string(),
        )),
        Err(e) => notes.push(PreflightNote::Warning(format!(
            "Output directory write check failed for {}: {}",
            output_dir.display(),
            e
        ))),
    }

    notes
}

fn check_readable(path: &Path) -> io::Result<()> {
    let mut buf = [0u8; 100];
    File::open(path)?.read(&mut buf).map(|_| ())
}

fn check_writable(dir: &Path) -> io::Result<()> {
    let scratch = dir.join(WRITE_CHECK_NAME);
    fs::write(&scratch, b"check")?;
    fs::remove_file(&scratch)
}

/// Starts the engine for a job, falling back through [`LaunchStrategy::ORDER`]
#[derive(Clone)]
pub struct ProcessLauncher {
    engine: PathBuf,
    spawner: Arc<dyn Spawner>,
}

impl fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLauncher")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl ProcessLauncher {
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self::with_spawner(engine, Arc::new(SystemSpawner))
    }

    pub fn with_spawner(engine: impl Into<PathBuf>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            engine: engine.into(),
            spawner,
        }
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// The command a strategy would run for this job
    pub fn command_for(&self, strategy: LaunchStrategy, job: &JobSpec, args: &[String]) -> Command {
        let mut cmd = match strategy {
            LaunchStrategy::Direct => {
                let mut cmd = Command::new(&self.engine);
                cmd.args(args);
                cmd
            }
            LaunchStrategy::Shell => shell_command(&shell_command_line(&self.engine, args)),
            LaunchStrategy::StreamCopy => {
                let mut cmd = Command::new(&self.engine);
                cmd.args(build_stream_copy_args(job));
                cmd
            }
        };

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        hide_console_window(&mut cmd);
        cmd
    }

    /// Try each strategy in order until one starts a process.
    ///
    /// Only start errors trigger a fallback; a process that starts and later
    /// exits nonzero is the caller's concern. `log` receives one message per attempt.
    pub fn launch(
        &self,
        job: &JobSpec,
        args: &[String],
        log: &mut dyn FnMut(String),
    ) -> Result<ProcessHandle, LaunchFailure> {
        let mut attempts = Vec::new();

        for (n, strategy) in LaunchStrategy::ORDER.into_iter().enumerate() {
            log(format!("Attempt {}: {}", n + 1, strategy));
            let mut cmd = self.command_for(strategy, job, args);

            match self.spawner.spawn(strategy, &mut cmd) {
                Ok(child) => {
                    if attempts.is_empty() {
                        log(format!("Engine started (pid {}) via {}", child.id(), strategy));
                    } else {
                        log(format!(
                            "Engine started (pid {}) via fallback {} after: {}",
                            child.id(),
                            strategy,
                            summarize_attempts(&attempts)
                        ));
                    }
                    info!(pid = child.id(), %strategy, "engine started");
                    return Ok(ProcessHandle::from_child(child, strategy));
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "engine failed to start");
                    log(format!("{} failed: {}", strategy, e));
                    attempts.push((strategy, e.to_string()));
                }
            }
        }

        Err(LaunchFailure { attempts })
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    // exec so that signals reach the engine rather than the shell
    cmd.arg("-c").arg(format!("exec {}", line));
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    use std::os::windows::process::CommandExt;

    let mut cmd = Command::new("cmd");
    cmd.arg("/C").raw_arg(format!("\"{}\"", line));
    cmd
}

#[cfg(windows)]
fn hide_console_window(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_cmd: &mut Command) {}
