// Batch worker: runs jobs one at a time on a dedicated thread

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::core::{
    JobSpec, JobStatus, MarkerUpdate, ProgressParser, build_ffmpeg_args, format_ffmpeg_cmd,
    overall_percent,
};
use super::events::{BatchEvent, BatchOutcome, LogLevel};
use super::launcher::{LaunchStrategy, PreflightNote, ProcessLauncher, StreamEvent, preflight};

/// Shared stop flag. Once set it stays set for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
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

/// Ordered jobs executed as one run
#[derive(Debug)]
pub struct Batch {
    pub id: Uuid,
    jobs: Vec<JobSpec>,
    output_dir: PathBuf,
    cancel: CancellationToken,
}

impl Batch {
    pub fn new(jobs: Vec<JobSpec>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            jobs,
            output_dir: output_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Handle that can stop this batch from another thread (e.g. a Ctrl-C handler)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("No files to convert")]
    EmptyBatch,

    #[error("Output directory {} is unusable: {reason}", .path.display())]
    OutputDirUnusable { path: PathBuf, reason: String },

    #[error("A batch is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl From<BatchOutcome> for BatchState {
    fn from(outcome: BatchOutcome) -> Self {
        match outcome {
            BatchOutcome::Completed => Self::Completed,
            BatchOutcome::Stopped => Self::Stopped,
            BatchOutcome::Failed => Self::Failed,
        }
    }
}

/// Where the active job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    AwaitingProcess,
    Streaming,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStatus {
    pub state: BatchState,
    pub current_job: Option<usize>,
    pub phase: Option<JobPhase>,
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
            current_job: None,
            phase: None,
        }
    }
}

/// Timing knobs for process supervision
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// How long to wait for exit once the output stream closes
    pub finalize_timeout: Duration,
    /// Wait after terminate before escalating to kill
    pub terminate_grace: Duration,
    /// Wait after kill before giving up on reaping
    pub kill_grace: Duration,
    /// How long one poll for an output line may block
    pub idle_backoff: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            finalize_timeout: Duration::from_secs(5),
            terminate_grace: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
            idle_backoff: Duration::from_millis(50),
        }
    }
}

/// Final record of a run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub outcome: BatchOutcome,
    pub jobs: Vec<JobStatus>,
}

struct ActiveRun {
    token: CancellationToken,
    worker: JoinHandle<BatchReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs batches sequentially on one worker thread and streams [`BatchEvent`]s
pub struct BatchRunner {
    launcher: Arc<ProcessLauncher>,
    settings: RunnerSettings,
    tx: Sender<BatchEvent>,
    rx: Receiver<BatchEvent>,
    status: Arc<Mutex<RunnerStatus>>,
    active: Mutex<Option<ActiveRun>>,
}

impl BatchRunner {
    /// Create a runner for a located engine with default timings
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self::with_launcher(ProcessLauncher::new(engine), RunnerSettings::default())
    }

    pub fn with_launcher(launcher: ProcessLauncher, settings: RunnerSettings) -> Self {
        let (tx, rx) = mpsc::channel();

        Self {
            launcher: Arc::new(launcher),
            settings,
            tx,
            rx,
            status: Arc::new(Mutex::new(RunnerStatus::default())),
            active: Mutex::new(None),
        }
    }

    /// Get the receiver for batch events
    pub fn receiver(&self) -> &Receiver<BatchEvent> {
        &self.rx
    }

    pub fn status(&self) -> RunnerStatus {
        *lock(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.status().state == BatchState::Running
    }

    /// Validate the batch and start it on the worker thread. Returns immediately.
    pub fn start(&self, batch: Batch) -> Result<(), BatchError> {
        let mut active = lock(&self.active);

        if self.is_running() {
            return Err(BatchError::AlreadyRunning);
        }
        if batch.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if let Err(reason) = check_output_dir(batch.output_dir()) {
            return Err(BatchError::OutputDirUnusable {
                path: batch.output_dir().to_path_buf(),
                reason,
            });
        }

        // A finished run's thread is already done; reap it before replacing
        if let Some(previous) = active.take() {
            let _ = previous.worker.join();
        }

        *lock(&self.status) = RunnerStatus {
            state: BatchState::Running,
            current_job: None,
            phase: None,
        };

        let token = batch.cancellation_token();
        let ctx = WorkerContext {
            launcher: self.launcher.clone(),
            settings: self.settings.clone(),
            tx: self.tx.clone(),
            status: self.status.clone(),
        };
        let worker = thread::spawn(move || ctx.run(batch));

        *active = Some(ActiveRun { token, worker });
        Ok(())
    }

    /// Ask the active run to stop. The worker notices within one idle backoff.
    pub fn request_stop(&self) {
        if let Some(run) = lock(&self.active).as_ref() {
            run.token.cancel();
        }
    }

    /// Block until the current run's worker exits and return its report
    pub fn wait(&self) -> Option<BatchReport> {
        let run = lock(&self.active).take()?;
        run.worker.join().ok()
    }
}

/// Check that the output directory exists, is a directory and is not read-only
pub fn check_output_dir(dir: &Path) -> Result<(), String> {
    let meta = fs::metadata(dir).map_err(|e| format!("cannot access: {}", e))?;
    if !meta.is_dir() {
        return Err("not a directory".to_string());
    }
    if meta.permissions().readonly() {
        return Err("directory is read-only".to_string());
    }
    Ok(())
}

enum JobResult {
    Finished {
        success: bool,
        exit_code: Option<i32>,
        strategy: LaunchStrategy,
    },
    LaunchFailed,
    Cancelled,
}

/// Everything the worker thread owns
struct WorkerContext {
    launcher: Arc<ProcessLauncher>,
    settings: RunnerSettings,
    tx: Sender<BatchEvent>,
    status: Arc<Mutex<RunnerStatus>>,
}

impl WorkerContext {
    fn emit(&self, event: BatchEvent) {
        // Nobody listening is fine; the run still has to finish and clean up
        let _ = self.tx.send(event);
    }

    fn log(&self, job_index: Option<usize>, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Engine => {}
            LogLevel::Info => debug!(job = ?job_index, "{}", text),
            LogLevel::Warn | LogLevel::Error => warn!(job = ?job_index, "{}", text),
        }
        self.emit(BatchEvent::Log {
            job_index,
            level,
            text,
        });
    }

    fn set_phase(&self, job: Option<usize>, phase: Option<JobPhase>) {
        let mut status = lock(&self.status);
        status.current_job = job;
        status.phase = phase;
    }

    fn run(self, batch: Batch) -> BatchReport {
        let span = info_span!("batch", id = %batch.id);
        let _enter = span.enter();

        let total = batch.len();
        let token = batch.cancellation_token();
        let mut statuses = vec![JobStatus::Pending; total];
        let mut outcome = BatchOutcome::Completed;

        info!(jobs = total, output_dir = %batch.output_dir().display(), "batch started");
        self.log(
            None,
            LogLevel::Info,
            format!("Converting {} file(s) into {}", total, batch.output_dir().display()),
        );
        self.emit(BatchEvent::BatchProgress { percent: 0.0 });

        for (index, job) in batch.jobs().iter().enumerate() {
            if token.is_cancelled() {
                outcome = BatchOutcome::Stopped;
                break;
            }
            if let Err(reason) = check_output_dir(batch.output_dir()) {
                self.log(
                    None,
                    LogLevel::Error,
                    format!(
                        "Output directory {} became unusable ({}); aborting remaining jobs",
                        batch.output_dir().display(),
                        reason
                    ),
                );
                outcome = BatchOutcome::Failed;
                break;
            }

            statuses[index] = JobStatus::Running;
            self.set_phase(Some(index), Some(JobPhase::AwaitingProcess));
            self.log(
                Some(index),
                LogLevel::Info,
                format!("=== Converting {}/{}: {} ===", index + 1, total, job.input_name()),
            );

            match self.run_job(index, total, job, &token) {
                JobResult::Finished {
                    success,
                    exit_code,
                    strategy,
                } => {
                    statuses[index] = if success {
                        JobStatus::Done
                    } else {
                        JobStatus::Failed
                    };
                    self.emit(BatchEvent::JobFinished {
                        job_index: index,
                        success,
                        exit_code,
                        strategy: Some(strategy),
                    });
                }
                JobResult::LaunchFailed => {
                    statuses[index] = JobStatus::Failed;
                    self.emit(BatchEvent::JobFinished {
                        job_index: index,
                        success: false,
                        exit_code: None,
                        strategy: None,
                    });
                }
                JobResult::Cancelled => {
                    statuses[index] = JobStatus::Cancelled;
                    remove_partial_output(&self, index, job);
                    outcome = BatchOutcome::Stopped;
                    break;
                }
            }

            self.emit(BatchEvent::BatchProgress {
                percent: overall_percent(index + 1, 0.0, total),
            });
        }

        match outcome {
            BatchOutcome::Completed => {
                let done = statuses.iter().filter(|s| **s == JobStatus::Done).count();
                self.log(
                    None,
                    LogLevel::Info,
                    format!("=== Batch complete: {}/{} file(s) converted ===", done, total),
                );
            }
            BatchOutcome::Stopped => self.log(None, LogLevel::Warn, "Conversion stopped"),
            BatchOutcome::Failed => self.log(None, LogLevel::Error, "Conversion failed"),
        }

        {
            let mut status = lock(&self.status);
            status.state = outcome.into();
            status.current_job = None;
            status.phase = None;
        }
        info!(?outcome, "batch finished");
        self.emit(BatchEvent::BatchFinished { outcome });

        BatchReport {
            batch_id: batch.id,
            outcome,
            jobs: statuses,
        }
    }

    fn run_job(
        &self,
        index: usize,
        total: usize,
        job: &JobSpec,
        token: &CancellationToken,
    ) -> JobResult {
        let args = build_ffmpeg_args(job);
        if job.encoder_profile.is_hardware() {
            self.log(
                Some(index),
                LogLevel::Info,
                format!("Using {} hardware encoder", job.encoder_profile),
            );
        }
        self.log(
            Some(index),
            LogLevel::Info,
            format!("Command: {}", format_ffmpeg_cmd(self.launcher.engine(), &args)),
        );

        for note in preflight(job) {
            match note {
                PreflightNote::Ok(msg) => self.log(Some(index), LogLevel::Info, msg),
                PreflightNote::Warning(msg) => self.log(Some(index), LogLevel::Warn, msg),
            }
        }

        let launched = self.launcher.launch(job, &args, &mut |msg: String| {
            self.log(Some(index), LogLevel::Info, msg);
        });
        let mut handle = match launched {
            Ok(handle) => handle,
            Err(failure) => {
                self.log(
                    Some(index),
                    LogLevel::Error,
                    format!("{} could not be converted: {}", job.input_name(), failure),
                );
                return JobResult::LaunchFailed;
            }
        };
        let strategy = handle.strategy();

        self.set_phase(Some(index), Some(JobPhase::Streaming));
        let mut parser = ProgressParser::new();

        loop {
            if token.is_cancelled() {
                self.log(Some(index), LogLevel::Warn, "Stop requested, terminating engine");
                handle.shutdown(self.settings.terminate_grace, self.settings.kill_grace);
                return JobResult::Cancelled;
            }

            let line = match handle.next_line(self.settings.idle_backoff) {
                StreamEvent::Line(line) => line,
                StreamEvent::Idle => continue,
                StreamEvent::Closed if token.is_cancelled() => {
                    self.log(Some(index), LogLevel::Warn, "Stop requested as the engine finished");
                    handle.shutdown(self.settings.terminate_grace, self.settings.kill_grace);
                    return JobResult::Cancelled;
                }
                StreamEvent::Closed => break,
            };

            let updates = parser.parse_line(&line);
            self.log(Some(index), LogLevel::Engine, line);

            for update in updates {
                match update {
                    MarkerUpdate::Duration(seconds) => self.log(
                        Some(index),
                        LogLevel::Info,
                        format!("Total duration: {:.2}s", seconds),
                    ),
                    MarkerUpdate::Position(_) => {
                        let percent = parser.percent();
                        self.emit(BatchEvent::JobProgress {
                            job_index: index,
                            percent,
                        });
                        self.emit(BatchEvent::BatchProgress {
                            percent: overall_percent(index, percent, total),
                        });
                    }
                    MarkerUpdate::Regressed(seconds) => {
                        debug!(job = index, seconds, "ignoring regressive position marker")
                    }
                    MarkerUpdate::Malformed { marker, text } => self.log(
                        Some(index),
                        LogLevel::Warn,
                        format!(
                            "Could not parse '{}' value '{}'",
                            marker.trim_end_matches(['=', ':']),
                            text
                        ),
                    ),
                }
            }
        }

        self.set_phase(Some(index), Some(JobPhase::Finalizing));
        let status = match handle.wait_timeout(self.settings.finalize_timeout) {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                self.log(
                    Some(index),
                    LogLevel::Warn,
                    "Engine did not exit in time, terminating",
                );
                handle.shutdown(self.settings.terminate_grace, self.settings.kill_grace);
                None
            }
            Err(e) => {
                self.log(
                    Some(index),
                    LogLevel::Error,
                    format!("Failed to wait for engine: {}", e),
                );
                handle.shutdown(self.settings.terminate_grace, self.settings.kill_grace);
                None
            }
        };

        let exit_code = status.and_then(|s| s.code());
        let success = status.is_some_and(|s| s.success());

        match (success, status) {
            (true, _) if strategy.is_degraded() => self.log(
                Some(index),
                LogLevel::Warn,
                format!(
                    "{}/{} converted by stream copy; requested encoding parameters were not applied",
                    index + 1,
                    total
                ),
            ),
            (true, _) => self.log(
                Some(index),
                LogLevel::Info,
                format!("{}/{} converted: {}", index + 1, total, job.output_path.display()),
            ),
            (false, Some(status)) => self.log(
                Some(index),
                LogLevel::Error,
                format!("{}/{} failed: engine exited with {}", index + 1, total, status),
            ),
            (false, None) => self.log(
                Some(index),
                LogLevel::Error,
                format!("{}/{} failed: engine timed out", index + 1, total),
            ),
        }

        JobResult::Finished {
            success,
            exit_code,
            strategy,
        }
    }
}

/// Delete the interrupted job's output, if the engine got far enough to create it
fn remove_partial_output(ctx: &WorkerContext, index: usize, job: &JobSpec) {
    if !job.output_path.exists() {
        return;
    }
    match fs::remove_file(&job.output_path) {
        Ok(()) => ctx.log(
            Some(index),
            LogLevel::Info,
            format!("Removed incomplete output {}", job.output_path.display()),
        ),
        Err(e) => ctx.log(
            Some(index),
            LogLevel::Warn,
            format!(
                "Failed to remove incomplete output {}: {}",
                job.output_path.display(),
                e
            ),
        ),
    }
}
