use crate::cli::{Cli, Commands, ConvertArgs};
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use vidbatch::config::Config;
use vidbatch::engine::{
    self, Batch, BatchEvent, BatchOutcome, BatchReport, BatchRunner, CancellationToken,
    ConversionSettings, JobSpec, JobStatus, LogLevel, ProcessLauncher,
};

/// Exit status for a stopped batch, matching the shell convention for SIGINT
const EXIT_STOPPED: i32 = 130;

pub fn run(cli: Cli) {
    let result = match cli.command {
        Commands::Convert(args) => handle_convert(args),
        Commands::DryRun(args) => handle_dry_run(args),
        Commands::CheckFfmpeg { ffmpeg } => handle_check_ffmpeg(ffmpeg),
        Commands::InitConfig => handle_init_config(),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default config: {:#}", e);
        Config::default()
    })
}

/// Jobs and settings after merging config defaults with command-line overrides
struct Plan {
    config: Config,
    settings: ConversionSettings,
    output_dir: PathBuf,
    jobs: Vec<JobSpec>,
}

fn plan(args: &ConvertArgs) -> Result<Plan> {
    let config = load_config();

    let mut defaults = config.defaults.clone();
    let overrides = [
        (&mut defaults.format, &args.format),
        (&mut defaults.resolution, &args.resolution),
        (&mut defaults.bitrate, &args.bitrate),
        (&mut defaults.encoder, &args.encoder),
        (&mut defaults.quality, &args.quality),
    ];
    for (slot, value) in overrides {
        if let Some(value) = value {
            *slot = value.clone();
        }
    }

    let settings = defaults
        .to_settings(&args.gpus)
        .context("Invalid conversion settings")?;

    let output_dir = match args.output_dir.clone().or(defaults.output_dir) {
        Some(dir) => dir,
        None => std::env::current_dir().context("Could not determine current directory")?,
    };

    let files = engine::collect_inputs(&args.inputs);
    let jobs = engine::build_job_queue(files, &output_dir, &settings);

    Ok(Plan {
        config,
        settings,
        output_dir,
        jobs,
    })
}

fn handle_dry_run(args: ConvertArgs) -> Result<i32> {
    let plan = plan(&args)?;
    let engine_path = args
        .ffmpeg
        .clone()
        .or(plan.config.engine.path.clone())
        .unwrap_or_else(|| PathBuf::from(engine::ENGINE_PROGRAM));

    println!(
        "Dry run: {} job(s), encoder {}, output to {}",
        plan.jobs.len(),
        plan.settings.encoder_profile,
        plan.output_dir.display()
    );
    for job in &plan.jobs {
        let args = engine::build_ffmpeg_args(job);
        println!("{}", engine::format_ffmpeg_cmd(&engine_path, &args));
    }
    Ok(0)
}

fn handle_convert(args: ConvertArgs) -> Result<i32> {
    let plan = plan(&args)?;

    let explicit = args.ffmpeg.clone().or(plan.config.engine.path.clone());
    let located = engine::locate_engine(explicit)?;
    tracing::info!(
        path = %located.path.display(),
        version = located.version.as_deref().unwrap_or("unknown"),
        "using ffmpeg"
    );

    if plan.jobs.is_empty() {
        eprintln!("No video files found in the given inputs");
        return Ok(0);
    }

    fs::create_dir_all(&plan.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            plan.output_dir.display()
        )
    })?;

    let runner = BatchRunner::with_launcher(
        ProcessLauncher::new(&located.path),
        plan.config.engine.runner_settings(),
    );
    let batch = Batch::new(plan.jobs, &plan.output_dir);
    let token = batch.cancellation_token();

    // Repeated Ctrl-C only repeats the request; the worker's bounded shutdown always runs
    if let Err(e) = ctrlc::set_handler(move || eprintln!("\n{}", on_interrupt(&token))) {
        tracing::warn!("Could not install Ctrl-C handler: {}", e);
    }

    runner.start(batch)?;

    let mut reporter = Reporter::new(
        args.json,
        args.show_engine_output,
        plan.config.defaults.debug_log,
    );
    for event in runner.receiver().iter() {
        reporter.report(&event);
        if event.is_terminal() {
            break;
        }
    }

    let report = runner
        .wait()
        .context("Batch worker exited without a report")?;
    Ok(exit_code(&report))
}

/// Request a stop and describe what happens next
fn on_interrupt(token: &CancellationToken) -> &'static str {
    if token.is_cancelled() {
        return "Already stopping, waiting for the engine to be shut down...";
    }
    token.cancel();
    "Stopping: terminating the engine and removing its partial output..."
}

fn exit_code(report: &BatchReport) -> i32 {
    match report.outcome {
        BatchOutcome::Completed if report.jobs.iter().all(|s| *s == JobStatus::Done) => 0,
        BatchOutcome::Completed => 1,
        BatchOutcome::Stopped => EXIT_STOPPED,
        BatchOutcome::Failed => 2,
    }
}

/// Renders batch events on the console
struct Reporter {
    json: bool,
    show_engine_output: bool,
    debug_log: bool,
    /// Latest percentage of the running job
    job_percent: Option<(usize, f64)>,
    /// What the progress line currently shows
    drawn: Option<(usize, f64)>,
    line_open: bool,
}

impl Reporter {
    fn new(json: bool, show_engine_output: bool, debug_log: bool) -> Self {
        Self {
            json,
            show_engine_output,
            debug_log,
            job_percent: None,
            drawn: None,
            line_open: false,
        }
    }

    fn report(&mut self, event: &BatchEvent) {
        if self.debug_log {
            let line = serde_json::to_string(event).unwrap_or_else(|e| format!("{:?} ({})", event, e));
            if let Err(e) = engine::write_debug_log(&line) {
                tracing::debug!("debug log write failed: {:#}", e);
            }
        }

        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Could not serialize event: {}", e),
            }
            return;
        }

        match event {
            BatchEvent::Log {
                level: LogLevel::Engine,
                text,
                ..
            } => {
                if self.show_engine_output {
                    self.end_progress_line();
                    println!("    {}", text);
                }
            }
            BatchEvent::Log { level, text, .. } => {
                self.end_progress_line();
                match level {
                    LogLevel::Error => eprintln!("error: {}", text),
                    LogLevel::Warn => eprintln!("warning: {}", text),
                    _ => println!("{}", text),
                }
            }
            BatchEvent::JobProgress { job_index, percent } => {
                self.job_percent = Some((*job_index, *percent));
            }
            BatchEvent::BatchProgress { percent } => {
                tracing::trace!(percent, "batch progress");
                if let Some(line) = self.progress_update(*percent) {
                    print!("\r{}", line);
                    io::stdout().flush().ok();
                    self.line_open = true;
                }
            }
            BatchEvent::JobFinished {
                job_index,
                success,
                exit_code,
                strategy,
            } => {
                self.end_progress_line();
                self.job_percent = None;
                let how = strategy.map(|s| s.label()).unwrap_or("no process started");
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[job {}] {} ({}, exit code {})",
                    job_index + 1,
                    if *success { "ok" } else { "FAILED" },
                    how,
                    code
                );
            }
            BatchEvent::BatchFinished { outcome } => {
                self.end_progress_line();
                println!("Batch finished: {:?}", outcome);
            }
        }
    }

    /// Next progress line to draw, if it changed enough to be worth redrawing
    fn progress_update(&mut self, overall: f64) -> Option<String> {
        let (job, percent) = self.job_percent?;
        if !should_redraw(self.drawn, job, percent) {
            return None;
        }
        self.drawn = Some((job, percent));
        Some(progress_line(job, percent, overall))
    }

    fn end_progress_line(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }
}

fn progress_line(job_index: usize, job_percent: f64, overall: f64) -> String {
    format!(
        "[job {}] {:5.1}% | overall {:5.1}%",
        job_index + 1,
        job_percent,
        overall
    )
}

/// Redraw on a new job, on a whole-percent step, or on reaching 100
fn should_redraw(drawn: Option<(usize, f64)>, job_index: usize, percent: f64) -> bool {
    match drawn {
        None => true,
        Some((job, _)) if job != job_index => true,
        Some((_, shown)) => percent - shown >= 1.0 || (percent >= 100.0 && shown < 100.0),
    }
}

fn handle_check_ffmpeg(ffmpeg: Option<PathBuf>) -> Result<i32> {
    let explicit = ffmpeg.or(load_config().engine.path);
    let located = engine::locate_engine(explicit)?;

    println!("ffmpeg found: {}", located.path.display());
    match located.version {
        Some(version) => println!("{}", version),
        None => println!("(version banner unavailable)"),
    }
    Ok(0)
}

fn handle_init_config() -> Result<i32> {
    let path = Config::config_path()?;

    if Config::exists() {
        let cfg = Config::load()?;
        println!("Config loaded successfully from {}", path.display());
        println!("{:#?}", cfg);
    } else {
        Config::ensure_default()?;
        println!("Default config saved to {}", path.display());
    }
    Ok(0)
}
