// Events delivered from the batch worker to whatever front end is listening

use super::launcher::LaunchStrategy;
use serde::{Deserialize, Serialize};

/// How a batch run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every job was processed (individual jobs may still have failed)
    Completed,
    /// A stop was requested before the queue was exhausted
    Stopped,
    /// A batch-level precondition broke mid-run
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// A verbatim line of engine output
    Engine,
    Info,
    Warn,
    Error,
}

/// Message from the batch worker to the front end.
///
/// Events for one job arrive in the order they were produced, and
/// `JobFinished` always follows that job's log and progress events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Log {
        job_index: Option<usize>,
        level: LogLevel,
        text: String,
    },

    /// Per-file completion, 0..=100
    JobProgress { job_index: usize, percent: f64 },

    /// Whole-batch completion, 0..=100
    BatchProgress { percent: f64 },

    JobFinished {
        job_index: usize,
        success: bool,
        exit_code: Option<i32>,
        /// Strategy that started the process; `None` when every launch attempt failed
        strategy: Option<LaunchStrategy>,
    },

    BatchFinished { outcome: BatchOutcome },
}

impl BatchEvent {
    pub fn job_index(&self) -> Option<usize> {
        match self {
            Self::Log { job_index, .. } => *job_index,
            Self::JobProgress { job_index, .. } | Self::JobFinished { job_index, .. } => {
                Some(*job_index)
            }
            Self::BatchProgress { .. } | Self::BatchFinished { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BatchFinished { .. })
    }
}
