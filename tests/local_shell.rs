//! Local command executor integration tests
//!
//! These spawn real processes, so they only run on unix hosts.

#![cfg(unix)]

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use toolrelay::core::config::ShellConfig;
use toolrelay::tools::shell::TRUNCATION_MARKER;
use toolrelay::tools::{ExecObserver, ExecResult, LocalShell, ShellRequest};
use toolrelay::RelayError;

fn shell(root: &Path) -> LocalShell {
    LocalShell::new(ShellConfig::default(), root)
}

fn request(command: &str) -> ShellRequest {
    ShellRequest::new(command)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecObserver for Recorder {
    fn on_start(&self, command: &str, _cwd: &Path) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("start {}", command));
        Ok(())
    }

    fn on_stdout(&self, chunk: &str) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("out {}", chunk));
        Ok(())
    }

    fn on_exit(&self, result: &ExecResult) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("exit {}", result.exit_code));
        Ok(())
    }
}

struct Grumpy;

impl ExecObserver for Grumpy {
    fn on_start(&self, _command: &str, _cwd: &Path) -> anyhow::Result<()> {
        anyhow::bail!("sink is closed")
    }

    fn on_stdout(&self, _chunk: &str) -> anyhow::Result<()> {
        panic!("observer blew up");
    }
}

#[tokio::test]
async fn test_runs_in_workspace_root() {
    let dir = TempDir::new().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();

    let result = shell(&root).run(&request("pwd"), None).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
    assert_eq!(result.cwd, root.display().to_string());
    assert_eq!(result.stdout.trim_end(), root.display().to_string());
}

#[tokio::test]
async fn test_relative_cwd_and_missing_cwd() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let shell = shell(dir.path());

    let mut req = request("pwd");
    req.cwd = Some("sub".to_string());
    let result = shell.run(&req, None).await.unwrap();
    assert!(result.cwd.ends_with("sub"));
    assert!(result.stdout.trim_end().ends_with("sub"));

    req.cwd = Some("missing".to_string());
    let err = shell.run(&req, None).await.unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
}

#[tokio::test]
async fn test_stderr_and_exit_code() {
    let dir = TempDir::new().unwrap();
    let result = shell(dir.path())
        .run(&request("echo oops >&2; exit 3"), None)
        .await
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(result.stderr.contains("oops"));
    assert!(result.signal.is_none());
}

#[tokio::test]
async fn test_unknown_program_exits_127() {
    let dir = TempDir::new().unwrap();
    let result = shell(dir.path())
        .run(&request("definitely_not_a_program_xyz"), None)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 127);
}

#[tokio::test]
async fn test_timeout_kills_process_group() {
    let dir = TempDir::new().unwrap();
    let mut req = request("sleep 5; echo finished");
    req.timeout_seconds = Some(1);

    let started = std::time::Instant::now();
    let result = shell(dir.path()).run(&req, None).await.unwrap();

    assert!(result.timed_out);
    assert!(result.signal.is_some());
    assert_ne!(result.exit_code, 0);
    assert!(!result.stdout.contains("finished"));
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[tokio::test]
async fn test_output_is_capped() {
    let dir = TempDir::new().unwrap();
    let mut req = request("head -c 5000 /dev/zero | tr '\\0' x");
    req.max_output_chars = Some(300);

    let result = shell(dir.path()).run(&req, None).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
    assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    assert_eq!(
        result.stdout.chars().count(),
        300 + TRUNCATION_MARKER.chars().count()
    );
}

#[tokio::test]
async fn test_observer_sees_the_run() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();

    let result = shell(dir.path())
        .run(&request("echo hello"), Some(&recorder))
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);

    let events = recorder.events();
    assert_eq!(events.first().map(String::as_str), Some("start echo hello"));
    assert!(events.iter().any(|e| e.starts_with("out ") && e.contains("hello")));
    assert_eq!(events.last().map(String::as_str), Some("exit 0"));
}

#[tokio::test]
async fn test_failing_observer_does_not_disturb_execution() {
    let dir = TempDir::new().unwrap();
    let result = shell(dir.path())
        .run(&request("echo still here"), Some(&Grumpy))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("still here"));
}
