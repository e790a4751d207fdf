mod common;
use common::local_endpoint;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vastctl::errors::RemoteErrorKind;
use vastctl::managers::local::LocalShell;
use vastctl::managers::tasks::TaskManager;
use vastctl::services::config::Config;
use vastctl::services::logger::Logger;
use vastctl::services::task::{StatusReport, TaskHandle, TaskState, TerminationOutcome};

fn manager(grace_period_ms: u64) -> TaskManager {
    let config = Config::default()
        .with_grace_period_ms(grace_period_ms)
        .with_command_timeout_ms(20_000);
    let shell = Arc::new(LocalShell::new(Logger::new("test"), &config));
    TaskManager::new(Logger::new("test"), shell, &config)
}

async fn wait_for<F>(manager: &TaskManager, handle: &TaskHandle, done: F) -> StatusReport
where
    F: Fn(&StatusReport) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let report = manager.status(handle, 50).await.expect("status");
        if done(&report) || Instant::now() > deadline {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn launched_task_runs_then_stops_and_cleans_up() {
    let manager = manager(500);
    let handle = manager
        .launch(&local_endpoint(), "sleep 1 && echo done", Some("lifecycle"))
        .await
        .expect("launch");
    assert!(handle.task_id.starts_with("lifecycle_"));
    assert!(handle.process_id > 0);
    assert!(Path::new(&handle.pid_path).exists());

    let running = manager.status(&handle, 50).await.expect("status");
    assert_eq!(running.state, TaskState::Running);
    assert!(!running.log_tail.contains("done"));

    let stopped = wait_for(&manager, &handle, |r| r.state == TaskState::Stopped).await;
    assert_eq!(stopped.state, TaskState::Stopped);
    assert_eq!(stopped.log_tail, "done");
    assert_eq!(stopped.total_log_lines, 1);

    // A handle rebuilt from its parts addresses the same task.
    let rebuilt =
        TaskHandle::from_parts(local_endpoint(), &handle.task_id, handle.process_id).expect("handle");
    let report = manager.terminate(&rebuilt).await.expect("terminate");
    assert_eq!(report.outcome, TerminationOutcome::AlreadyStopped);
    assert!(report.cleanup_ok);
    assert_eq!(report.removed.len(), 2);
    assert!(!Path::new(&handle.pid_path).exists());
    assert!(!Path::new(&handle.log_path).exists());
}

#[tokio::test]
async fn terminate_stops_a_cooperative_task_within_the_grace_period() {
    let manager = manager(500);
    let handle = manager
        .launch(&local_endpoint(), "echo started; sleep 30", None)
        .await
        .expect("launch");
    wait_for(&manager, &handle, |r| r.log_tail.contains("started")).await;

    let report = manager.terminate(&handle).await.expect("terminate");
    assert_eq!(report.outcome, TerminationOutcome::Terminated);
    assert!(report.cleanup_ok);

    let after = manager.status(&handle, 10).await.expect("status");
    assert_eq!(after.state, TaskState::Stopped);
    assert_eq!(after.log_tail, "");
    assert_eq!(after.total_log_lines, 0);
}

#[tokio::test]
async fn terminate_escalates_when_term_is_ignored() {
    let manager = manager(500);
    let handle = manager
        .launch(&local_endpoint(), "trap '' TERM; echo armed; sleep 30", Some("stubborn"))
        .await
        .expect("launch");
    wait_for(&manager, &handle, |r| r.log_tail.contains("armed")).await;

    let started = Instant::now();
    let report = manager.terminate(&handle).await.expect("terminate");
    assert_eq!(report.outcome, TerminationOutcome::ForceKilled);
    assert!(started.elapsed() >= Duration::from_millis(500));

    let after = wait_for(&manager, &handle, |r| r.state == TaskState::Stopped).await;
    assert_eq!(after.state, TaskState::Stopped);
}

#[tokio::test]
async fn terminate_kills_a_child_that_outlives_the_wrapper() {
    let manager = manager(500);
    // The wrapper shell dies on TERM; the child it did not exec ignores it.
    let handle = manager
        .launch(
            &local_endpoint(),
            "sh -c 'trap \"\" TERM; echo armed; exec sleep 37.123'; echo after",
            Some("orphan"),
        )
        .await
        .expect("launch");
    wait_for(&manager, &handle, |r| r.log_tail.contains("armed")).await;

    let started = Instant::now();
    let report = manager.terminate(&handle).await.expect("terminate");
    assert_eq!(report.outcome, TerminationOutcome::ForceKilled);
    assert!(started.elapsed() >= Duration::from_millis(500));

    let after = wait_for(&manager, &handle, |r| r.state == TaskState::Stopped).await;
    assert_eq!(after.state, TaskState::Stopped);
}

#[tokio::test]
async fn status_tolerates_a_missing_log() {
    let manager = manager(500);
    // Our own pid is certainly alive; the task id has never been launched.
    let handle = TaskHandle::from_parts(local_endpoint(), "never_launched_0000", std::process::id())
        .expect("handle");
    let report = manager.status(&handle, 20).await.expect("status");
    assert_eq!(report.state, TaskState::Running);
    assert_eq!(report.log_tail, "");
    assert_eq!(report.total_log_lines, 0);
    assert_eq!(report.tail_lines, 20);
}

#[tokio::test]
async fn tail_returns_only_the_requested_lines() {
    let manager = manager(500);
    let handle = manager
        .launch(&local_endpoint(), "for i in 1 2 3 4 5; do echo line$i; done", None)
        .await
        .expect("launch");
    let report = wait_for(&manager, &handle, |r| {
        r.state == TaskState::Stopped && r.total_log_lines == 5
    })
    .await;
    let tail = manager.status(&handle, 2).await.expect("status");
    assert_eq!(report.total_log_lines, 5);
    assert_eq!(tail.log_tail, "line4\nline5");

    manager.terminate(&handle).await.expect("cleanup");
}

#[tokio::test]
async fn exec_reports_failures_as_data() {
    let manager = manager(500);
    let output = manager
        .exec(&local_endpoint(), "echo partial; echo oops >&2; exit 7")
        .await
        .expect("exec");
    assert_eq!(output.exit_code, 7);
    assert_eq!(output.stdout, "partial");
    assert_eq!(output.stderr, "oops");
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_session() {
    let manager = manager(500);
    let err = manager
        .launch(&local_endpoint(), "   ", None)
        .await
        .expect_err("blank command");
    assert_eq!(err.kind, RemoteErrorKind::InvalidParams);

    let err = manager
        .launch(&local_endpoint(), "true", Some("bad name; id"))
        .await
        .expect_err("bad name");
    assert_eq!(err.kind, RemoteErrorKind::InvalidParams);
}
