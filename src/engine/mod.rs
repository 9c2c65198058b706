// Conversion engine - independent of any front end

pub mod core;
pub mod events;
pub mod launcher;
pub mod worker;

pub use core::*;
pub use events::{BatchEvent, BatchOutcome, LogLevel};
pub use launcher::{LaunchFailure, LaunchStrategy, ProcessHandle, ProcessLauncher, Spawner};
pub use worker::{
    Batch, BatchError, BatchReport, BatchRunner, BatchState, CancellationToken, JobPhase,
    RunnerSettings, RunnerStatus,
};
