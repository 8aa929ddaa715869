//! Tests for agent process spawning and control.

use std::time::{Duration, Instant};

use claude_code_sdk::cli::{ProcessInvocation, ProcessRunner, SpawnError, DRAIN_TIMEOUT};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::support::FakeAgent;

fn runner() -> ProcessRunner {
    ProcessRunner::new(Duration::from_secs(1))
}

fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_raw(i32::try_from(pid).unwrap());
    kill(pid, None) != Err(Errno::ESRCH)
}

#[tokio::test]
async fn run_captures_stdout_and_exit_code() {
    let agent = FakeAgent::new("printf hello");
    let outcome = runner()
        .run(&ProcessInvocation::new(agent.path()).args(["-p", "hi"]))
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.stdout, b"hello");
    assert!(outcome.stderr.is_empty());
    assert_eq!(agent.invocations(), vec!["-p|hi|conversation="]);
}

#[tokio::test]
async fn run_reports_failure_without_error() {
    let agent = FakeAgent::new("printf out; printf 'bad flag' >&2; exit 2");
    let outcome = runner()
        .run(&ProcessInvocation::new(agent.path()))
        .await
        .unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.exit_code, Some(2));
    assert_eq!(outcome.stdout_lossy(), "out");
    assert_eq!(outcome.stderr_lossy(), "bad flag");
    assert!(!outcome.timed_out);
}

#[tokio::test]
async fn run_applies_environment_overlay_and_working_dir() {
    let agent = FakeAgent::new("printf '%s:%s' \"$ANTHROPIC_API_KEY\" \"$(pwd)\"");
    let workdir = tempfile::tempdir().unwrap();
    let expected_dir = workdir.path().canonicalize().unwrap();

    let outcome = runner()
        .run(
            &ProcessInvocation::new(agent.path())
                .env("ANTHROPIC_API_KEY", "k")
                .working_dir(workdir.path()),
        )
        .await
        .unwrap();

    let stdout = outcome.stdout_lossy();
    let (key, dir) = stdout.split_once(':').unwrap();
    assert_eq!(key, "k");
    assert_eq!(std::path::Path::new(dir).canonicalize().unwrap(), expected_dir);
}

#[tokio::test]
async fn run_timeout_keeps_partial_output() {
    let agent = FakeAgent::new("printf partial; printf warming >&2; exec sleep 30");
    let timeout = Duration::from_millis(500);
    let grace = Duration::from_secs(1);

    let started = Instant::now();
    let outcome = ProcessRunner::new(grace)
        .run(&ProcessInvocation::new(agent.path()).timeout(timeout))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.timed_out);
    assert!(!outcome.success());
    assert_eq!(outcome.stdout, b"partial");
    assert_eq!(outcome.stderr, b"warming");
    assert!(elapsed >= timeout, "finished too early: {elapsed:?}");
    assert!(
        elapsed < timeout + grace + DRAIN_TIMEOUT * 2 + Duration::from_secs(1),
        "finished too late: {elapsed:?}"
    );
}

#[tokio::test]
async fn run_timeout_escalates_to_kill() {
    let agent = FakeAgent::new("trap '' TERM; printf stubborn; while :; do sleep 0.05; done");
    let grace = Duration::from_millis(300);

    let outcome = ProcessRunner::new(grace)
        .run(&ProcessInvocation::new(agent.path()).timeout(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(outcome.timed_out);
    assert_eq!(outcome.stdout, b"stubborn");
    assert!(outcome.exit_code.is_none(), "killed by signal");
}

#[tokio::test]
async fn run_without_timeout_waits() {
    let agent = FakeAgent::new("sleep 0.3; printf done");
    let outcome = runner()
        .run(&ProcessInvocation::new(agent.path()))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.stdout, b"done");
}

#[tokio::test]
async fn run_missing_binary_is_spawn_error() {
    let err = runner()
        .run(&ProcessInvocation::new("/nonexistent/claude"))
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::NotFound(_)));
}

#[tokio::test]
async fn run_non_executable_is_permission_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("claude");
    std::fs::write(&path, "#!/bin/sh\n").unwrap();

    let err = runner()
        .run(&ProcessInvocation::new(&path))
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::PermissionDenied(_)));
}

#[tokio::test]
async fn streaming_drop_terminates_child() {
    let agent = FakeAgent::new("printf ready; exec sleep 30");
    let mut running = runner()
        .spawn_streaming(&ProcessInvocation::new(agent.path()))
        .unwrap();

    let mut buf = [0u8; 64];
    let n = running.read_chunk(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ready");

    let pid = running.id().unwrap();
    assert!(is_alive(pid));
    drop(running);

    let deadline = Instant::now() + Duration::from_secs(5);
    while is_alive(pid) {
        assert!(Instant::now() < deadline, "child {pid} survived drop");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
