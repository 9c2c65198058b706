// Batch runner scenarios against fake engines (Unix only: the engines are sh scripts)
#![cfg(unix)]

use crate::common::fake_engine::FakeEngine;
use crate::common::helpers::*;
use std::fs;
use std::io;
use std::time::Duration;
use vidbatch::engine::{
    Batch, BatchError, BatchEvent, BatchOutcome, BatchState, JobPhase, JobStatus,
    LaunchStrategy, LogLevel, RunnerSettings,
};

fn finished(events: &[BatchEvent], job: usize) -> (bool, Option<i32>, Option<LaunchStrategy>) {
    events
        .iter()
        .find_map(|e| match e {
            BatchEvent::JobFinished {
                job_index,
                success,
                exit_code,
                strategy,
            } if *job_index == job => Some((*success, *exit_code, *strategy)),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no JobFinished for job {}", job))
}

#[test]
fn test_all_jobs_succeed() {
    let ws = Workspace::new();
    let engine = FakeEngine::default().install(&ws.bin_dir(), "ffmpeg");
    let jobs = ws.jobs(2);
    let outputs: Vec<_> = jobs.iter().map(|j| j.output_path.clone()).collect();

    let runner = runner_for(&engine);
    runner.start(Batch::new(jobs, ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.jobs, vec![JobStatus::Done, JobStatus::Done]);
    for output in &outputs {
        assert!(output.exists(), "missing {}", output.display());
    }

    assert_eq!(finished(&events, 0), (true, Some(0), Some(LaunchStrategy::Direct)));
    assert_eq!(events.last(), Some(&BatchEvent::BatchFinished {
        outcome: BatchOutcome::Completed
    }));
    assert_eq!(batch_percents(&events).last().copied(), Some(100.0));
    assert_eq!(job_percents(&events, 1).last().copied(), Some(100.0));

    let logs = log_texts(&events, Some(0));
    assert!(logs.iter().any(|l| l.starts_with("=== Converting 1/2: clip1.avi")));
    assert!(logs.iter().any(|l| l == "Total duration: 4.00s"));
    assert!(logs.iter().any(|l| l.starts_with("Command: ")));
    assert!(
        events.iter().any(|e| matches!(
            e,
            BatchEvent::Log { level: LogLevel::Engine, text, .. } if text.contains("time=00:00:02.00")
        )),
        "engine output should be forwarded verbatim"
    );
}

#[test]
fn test_progress_is_monotonic() {
    let ws = Workspace::new();
    let engine = FakeEngine {
        duration_secs: 8,
        steps: 8,
        ..FakeEngine::default()
    }
    .install(&ws.bin_dir(), "ffmpeg");

    let runner = runner_for(&engine);
    runner.start(Batch::new(ws.jobs(3), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    runner.wait();

    let overall = batch_percents(&events);
    assert_non_decreasing(&overall, "batch progress");
    assert!(overall.iter().all(|p| (0.0..=100.0).contains(p)));

    for job in 0..3 {
        let percents = job_percents(&events, job);
        assert!(!percents.is_empty(), "job {} reported no progress", job);
        assert_non_decreasing(&percents, "job progress");
    }
}

#[test]
fn test_stop_during_second_job() {
    let ws = Workspace::new();
    let engine = FakeEngine {
        duration_secs: 10,
        steps: 10,
        step_delay: "0.1".to_string(),
        ..FakeEngine::default()
    }
    .install(&ws.bin_dir(), "ffmpeg");
    let jobs = ws.jobs(3);
    let outputs: Vec<_> = jobs.iter().map(|j| j.output_path.clone()).collect();

    let runner = runner_for(&engine);
    runner.start(Batch::new(jobs, ws.output_dir())).unwrap();

    let mut stop_sent = false;
    let events = collect_events(&runner, |runner, event| {
        if !stop_sent && matches!(event, BatchEvent::JobProgress { job_index: 1, .. }) {
            runner.request_stop();
            stop_sent = true;
        }
    });
    let report = runner.wait().expect("report");

    assert!(stop_sent);
    assert_eq!(report.outcome, BatchOutcome::Stopped);
    assert_eq!(
        report.jobs,
        vec![JobStatus::Done, JobStatus::Cancelled, JobStatus::Pending]
    );

    assert!(outputs[0].exists(), "completed output must be kept");
    assert!(!outputs[1].exists(), "partial output must be removed");
    assert!(!outputs[2].exists());

    assert!(
        events.iter().all(|e| e.job_index() != Some(2)),
        "third job must never start"
    );
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, BatchEvent::JobFinished { job_index: 1, .. })),
        "cancelled job is not reported as finished"
    );
    assert_eq!(events.last(), Some(&BatchEvent::BatchFinished {
        outcome: BatchOutcome::Stopped
    }));
    assert!(log_texts(&events, None).iter().any(|l| l == "Conversion stopped"));
}

#[test]
fn test_nonzero_exit_fails_job_but_batch_completes() {
    let ws = Workspace::new();
    let engine = FakeEngine::failing(3).install(&ws.bin_dir(), "ffmpeg");

    let runner = runner_for(&engine);
    runner.start(Batch::new(ws.jobs(2), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.jobs, vec![JobStatus::Failed, JobStatus::Failed]);
    assert_eq!(finished(&events, 1), (false, Some(3), Some(LaunchStrategy::Direct)));
    assert!(
        log_texts(&events, Some(0))
            .iter()
            .any(|l| l.starts_with("1/2 failed: engine exited with"))
    );
}

#[test]
fn test_direct_failure_falls_back_to_shell() {
    let ws = Workspace::new();
    let engine = FakeEngine::default().install(&ws.bin_dir(), "ffmpeg");
    let spawner =
        RefusingSpawner::refusing(&[(LaunchStrategy::Direct, io::ErrorKind::PermissionDenied)]);

    let runner = runner_with_spawner(&engine, spawner);
    runner.start(Batch::new(ws.jobs(1), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.jobs, vec![JobStatus::Done]);
    assert_eq!(finished(&events, 0), (true, Some(0), Some(LaunchStrategy::Shell)));

    let logs = log_texts(&events, Some(0));
    assert!(logs.iter().any(|l| l == "Attempt 1: direct execution"));
    assert!(logs.iter().any(|l| l.starts_with("direct execution failed:")));
    assert!(logs.iter().any(|l| l == "Attempt 2: shell-mediated execution"));
    assert!(
        logs.iter()
            .any(|l| l.contains("via fallback shell-mediated execution after: direct execution")),
        "fallback must be logged: {:#?}",
        logs
    );
    assert!(!job_percents(&events, 0).is_empty());
}

#[test]
fn test_stream_copy_success_is_degraded() {
    let ws = Workspace::new();
    let engine = FakeEngine::default().install(&ws.bin_dir(), "ffmpeg");
    let spawner = RefusingSpawner::refusing(&[
        (LaunchStrategy::Direct, io::ErrorKind::PermissionDenied),
        (LaunchStrategy::Shell, io::ErrorKind::NotFound),
    ]);

    let runner = runner_with_spawner(&engine, spawner);
    runner.start(Batch::new(ws.jobs(1), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.jobs, vec![JobStatus::Done]);
    assert_eq!(finished(&events, 0), (true, Some(0), Some(LaunchStrategy::StreamCopy)));
    assert!(events.iter().any(|e| matches!(
        e,
        BatchEvent::Log { level: LogLevel::Warn, text, .. }
            if text.contains("requested encoding parameters were not applied")
    )));
}

#[test]
fn test_all_launch_strategies_fail() {
    let ws = Workspace::new();
    let engine = ws.bin_dir().join("ffmpeg");

    let runner = runner_with_spawner(&engine, RefusingSpawner::refusing_all());
    runner.start(Batch::new(ws.jobs(3), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.jobs, vec![JobStatus::Failed; 3]);
    for job in 0..3 {
        assert_eq!(finished(&events, job), (false, None, None));
        assert!(
            log_texts(&events, Some(job))
                .iter()
                .any(|l| l.contains("all launch strategies failed")),
            "job {} should log the launch failure",
            job
        );
    }
    assert_eq!(batch_percents(&events).last().copied(), Some(100.0));
}

#[test]
fn test_output_dir_removed_mid_batch_fails_batch() {
    let ws = Workspace::new();
    let engine = FakeEngine {
        duration_secs: 5,
        steps: 5,
        step_delay: "0.1".to_string(),
        ..FakeEngine::default()
    }
    .install(&ws.bin_dir(), "ffmpeg");
    let output_dir = ws.output_dir();

    let runner = runner_for(&engine);
    runner.start(Batch::new(ws.jobs(2), &output_dir)).unwrap();

    let mut removed = false;
    let events = collect_events(&runner, |_, event| {
        if !removed && matches!(event, BatchEvent::JobProgress { job_index: 0, .. }) {
            fs::remove_dir_all(&output_dir).expect("remove output dir");
            removed = true;
        }
    });
    let report = runner.wait().expect("report");

    assert_eq!(report.outcome, BatchOutcome::Failed);
    assert_eq!(report.jobs[1], JobStatus::Pending);
    assert!(events.iter().all(|e| e.job_index() != Some(1)));
    assert!(
        log_texts(&events, None)
            .iter()
            .any(|l| l.contains("became unusable"))
    );
}

#[test]
fn test_start_rejects_empty_batch_and_bad_output_dir() {
    let ws = Workspace::new();
    let engine = FakeEngine::default().install(&ws.bin_dir(), "ffmpeg");
    let runner = runner_for(&engine);

    let err = runner
        .start(Batch::new(Vec::new(), ws.output_dir()))
        .unwrap_err();
    assert!(matches!(err, BatchError::EmptyBatch));

    let missing = ws.root.path().join("nope");
    let err = runner.start(Batch::new(ws.jobs(1), &missing)).unwrap_err();
    assert!(matches!(err, BatchError::OutputDirUnusable { .. }));

    let not_a_dir = ws.input_dir().join("clip1.avi");
    let err = runner.start(Batch::new(ws.jobs(1), &not_a_dir)).unwrap_err();
    assert!(matches!(err, BatchError::OutputDirUnusable { .. }));

    assert!(!runner.is_running());
    assert!(runner.wait().is_none());
}

#[test]
fn test_second_start_while_running_is_rejected() {
    let ws = Workspace::new();
    let engine = FakeEngine::slow().install(&ws.bin_dir(), "ffmpeg");
    let runner = runner_for(&engine);

    runner.start(Batch::new(ws.jobs(1), ws.output_dir())).unwrap();
    let err = runner
        .start(Batch::new(ws.jobs(1), ws.output_dir()))
        .unwrap_err();
    assert!(matches!(err, BatchError::AlreadyRunning));

    runner.request_stop();
    collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");
    assert_eq!(report.outcome, BatchOutcome::Stopped);

    // The runner accepts a new batch once the previous one is over
    runner.start(Batch::new(ws.jobs(1), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    assert_eq!(runner.wait().unwrap().outcome, BatchOutcome::Completed);
    assert!(finished(&events, 0).0);
}

#[test]
fn test_batch_token_stops_run() {
    let ws = Workspace::new();
    let engine = FakeEngine::slow().install(&ws.bin_dir(), "ffmpeg");
    let runner = runner_for(&engine);

    let batch = Batch::new(ws.jobs(2), ws.output_dir());
    let token = batch.cancellation_token();
    runner.start(batch).unwrap();

    let mut cancelled = false;
    collect_events(&runner, |_, event| {
        if !cancelled && matches!(event, BatchEvent::JobProgress { .. }) {
            token.cancel();
            cancelled = true;
        }
    });
    let report = runner.wait().expect("report");
    assert_eq!(report.outcome, BatchOutcome::Stopped);
    assert_eq!(report.jobs, vec![JobStatus::Cancelled, JobStatus::Pending]);
}

#[test]
fn test_engine_that_never_exits_is_timed_out() {
    let ws = Workspace::new();
    let engine = FakeEngine::hanging().install(&ws.bin_dir(), "ffmpeg");
    let runner = runner_with_settings(&engine, RunnerSettings {
        finalize_timeout: Duration::from_secs(1),
        ..fast_settings()
    });

    runner.start(Batch::new(ws.jobs(1), ws.output_dir())).unwrap();
    let events = collect_events(&runner, |_, _| {});
    let report = runner.wait().expect("report");

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.jobs, vec![JobStatus::Failed]);
    assert_eq!(finished(&events, 0), (false, None, Some(LaunchStrategy::Direct)));

    let logs = log_texts(&events, Some(0));
    assert!(logs.iter().any(|l| l == "Engine did not exit in time, terminating"));
    assert!(logs.iter().any(|l| l == "1/1 failed: engine timed out"));
}

#[test]
fn test_status_tracks_job_phase() {
    let ws = Workspace::new();
    let engine = FakeEngine::slow().install(&ws.bin_dir(), "ffmpeg");
    let runner = runner_for(&engine);
    assert_eq!(runner.status().state, BatchState::Idle);

    runner.start(Batch::new(ws.jobs(2), ws.output_dir())).unwrap();

    let mut seen = None;
    collect_events(&runner, |runner, event| {
        if seen.is_none() && matches!(event, BatchEvent::JobProgress { job_index: 0, .. }) {
            seen = Some(runner.status());
            runner.request_stop();
        }
    });

    let seen = seen.expect("job 0 reported progress");
    assert_eq!(seen.state, BatchState::Running);
    assert_eq!(seen.current_job, Some(0));
    assert_eq!(seen.phase, Some(JobPhase::Streaming));

    // Settled before BatchFinished is sent
    let after = runner.status();
    assert_eq!(after.state, BatchState::Stopped);
    assert_eq!(after.current_job, None);
    assert_eq!(after.phase, None);
    assert!(!runner.is_running());
    runner.wait();
}

#[test]
fn test_stop_while_engine_closes_output_cancels_job() {
    let ws = Workspace::new();
    // Last progress line, then half a second of silence before the output closes
    let engine = FakeEngine {
        duration_secs: 2,
        steps: 2,
        step_delay: "0.5".to_string(),
        ..FakeEngine::default()
    }
    .install(&ws.bin_dir(), "ffmpeg");
    let jobs = ws.jobs(1);
    let output = jobs[0].output_path.clone();

    // Long idle wait keeps the worker blocked on the stream when the stop lands
    let runner = runner_with_settings(&engine, RunnerSettings {
        idle_backoff: Duration::from_secs(5),
        ..fast_settings()
    });
    runner.start(Batch::new(jobs, ws.output_dir())).unwrap();

    let mut stop_sent = false;
    let events = collect_events(&runner, |runner, event| {
        if !stop_sent
            && matches!(event, BatchEvent::JobProgress { percent, .. } if *percent >= 100.0)
        {
            runner.request_stop();
            stop_sent = true;
        }
    });
    let report = runner.wait().expect("report");

    assert!(stop_sent);
    assert_eq!(report.outcome, BatchOutcome::Stopped);
    assert_eq!(report.jobs, vec![JobStatus::Cancelled]);
    assert!(!output.exists(), "output of a stopped job must be removed");
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, BatchEvent::JobFinished { .. })),
        "stopped job is not reported as finished"
    );
    assert_eq!(events.last(), Some(&BatchEvent::BatchFinished {
        outcome: BatchOutcome::Stopped
    }));
}
