//! Local command executor
//!
//! Runs one shell command in a bounded subprocess. Output is captured
//! incrementally with a per-stream cap, a timeout escalates from a graceful
//! signal to a forced kill, and the outcome is always reported as an
//! [`ExecResult`], including spawn failures.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::config::ShellConfig;
use crate::core::{Config, RelayError, Result};

/// Appended to a stream that hit its cap
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

const HARD_MAX_TIMEOUT_SECS: u64 = 900;
const MIN_OUTPUT_CHARS: usize = 256;
const HARD_MAX_OUTPUT_CHARS: usize = 200_000;
const KILL_GRACE: Duration = Duration::from_secs(2);
const READ_BUF: usize = 8192;

/// Arguments of one command invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellRequest {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_output_chars: Option<usize>,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Read a request from model-supplied tool arguments; unusable fields are ignored
    pub fn from_arguments(args: &Map<String, Value>) -> Self {
        let number = |key: &str| -> Option<u64> {
            match args.get(key)? {
                Value::Number(n) => n
                    .as_u64()
                    .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                    .or(Some(0)),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };

        Self {
            command: args
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            cwd: args
                .get("cwd")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            timeout_seconds: number("timeout_seconds"),
            max_output_chars: number("max_output_chars").map(|n| n as usize),
        }
    }
}

/// Structured outcome of one command
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecResult {
    pub command: String,
    pub cwd: String,
    pub exit_code: i32,
    pub signal: Option<String>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecResult {
    /// JSON text handed back to the model
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Live mirror of a running command. Every method is best effort: errors and
/// panics are logged and discarded.
pub trait ExecObserver: Send + Sync {
    fn on_start(&self, _command: &str, _cwd: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_stdout(&self, _chunk: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_stderr(&self, _chunk: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_exit(&self, _result: &ExecResult) -> anyhow::Result<()> {
        Ok(())
    }
}

fn notify<F>(observer: Option<&dyn ExecObserver>, call: F)
where
    F: FnOnce(&dyn ExecObserver) -> anyhow::Result<()>,
{
    let Some(observer) = observer else {
        return;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| call(observer))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "exec observer failed"),
        Err(_) => warn!("exec observer panicked"),
    }
}

/// Executes commands under a workspace root
#[derive(Debug, Clone)]
pub struct LocalShell {
    root: PathBuf,
    config: ShellConfig,
}

impl LocalShell {
    pub fn new(config: ShellConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.shell.clone(), config.workspace_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Timeout actually applied for a requested value
    pub fn effective_timeout(&self, requested: Option<u64>) -> Duration {
        let max = self.config.max_timeout_secs.clamp(1, HARD_MAX_TIMEOUT_SECS);
        let secs = requested
            .unwrap_or(self.config.default_timeout_secs)
            .clamp(1, max);
        Duration::from_secs(secs)
    }

    /// Output cap actually applied for a requested value
    pub fn effective_output_cap(&self, requested: Option<usize>) -> usize {
        let max = self
            .config
            .max_output_chars
            .clamp(MIN_OUTPUT_CHARS, HARD_MAX_OUTPUT_CHARS);
        requested
            .unwrap_or(self.config.default_max_output_chars)
            .clamp(MIN_OUTPUT_CHARS, max)
    }

    /// Resolve the working directory against the workspace root
    pub fn resolve_cwd(&self, cwd: Option<&str>) -> Result<PathBuf> {
        let candidate = match cwd.map(str::trim).filter(|c| !c.is_empty()) {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        };

        let resolved = std::fs::canonicalize(&candidate).map_err(|_| {
            RelayError::validation(format!(
                "Working directory does not exist: {}",
                candidate.display()
            ))
        })?;

        if !resolved.is_dir() {
            return Err(RelayError::validation(format!(
                "Working directory is not a directory: {}",
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    /// Run a command to completion.
    ///
    /// Only argument validation fails; everything else, including a failed
    /// spawn, resolves to an [`ExecResult`].
    pub async fn run(
        &self,
        request: &ShellRequest,
        observer: Option<&dyn ExecObserver>,
    ) -> Result<ExecResult> {
        let command = request.command.trim();
        if command.is_empty() {
            return Err(RelayError::validation("command must not be empty"));
        }
        let cwd = self.resolve_cwd(request.cwd.as_deref())?;
        let timeout = self.effective_timeout(request.timeout_seconds);
        let cap = self.effective_output_cap(request.max_output_chars);

        debug!(command = %command, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "running local command");
        notify(observer, |o| o.on_start(command, &cwd));

        let started = Instant::now();
        let result = match shell_command(command, &cwd).spawn() {
            Ok(child) => supervise(child, timeout, cap, observer, started).await,
            Err(e) => {
                warn!(error = %e, "failed to spawn shell");
                let (stderr, stderr_truncated) = truncate_output(&e.to_string(), cap);
                Capture {
                    exit_code: spawn_exit_code(&e),
                    signal: None,
                    timed_out: false,
                    stdout: (String::new(), false),
                    stderr: (stderr, stderr_truncated),
                }
            }
        };

        let exec = ExecResult {
            command: command.to_string(),
            cwd: cwd.display().to_string(),
            exit_code: result.exit_code,
            signal: result.signal,
            timed_out: result.timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
            stdout: result.stdout.0,
            stderr: result.stderr.0,
            stdout_truncated: result.stdout.1,
            stderr_truncated: result.stderr.1,
        };

        debug!(exit_code = exec.exit_code, timed_out = exec.timed_out, duration_ms = exec.duration_ms, "local command finished");
        notify(observer, |o| o.on_exit(&exec));
        Ok(exec)
    }
}

fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let shell = if which::which("bash").is_ok() { "bash" } else { "sh" };
        let mut cmd = Command::new(shell);
        cmd.args(["-lc", command]);
        cmd
    };

    cmd.current_dir(cwd)
        .env("PWD", cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so a timeout reaches every descendant
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

fn spawn_exit_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::NotFound => 127,
        io::ErrorKind::PermissionDenied => 126,
        _ => err.raw_os_error().filter(|c| *c != 0).unwrap_or(1),
    }
}

struct Capture {
    exit_code: i32,
    signal: Option<String>,
    timed_out: bool,
    stdout: (String, bool),
    stderr: (String, bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Graceful signal sent, waiting out the grace period
    Terminating,
    /// Forced kill sent
    Killed,
    /// Exited, but a descendant still holds a pipe open
    Draining,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

async fn supervise(
    mut child: Child,
    timeout: Duration,
    cap: usize,
    observer: Option<&dyn ExecObserver>,
    started: Instant,
) -> Capture {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_BUF];
    let mut err_buf = vec![0u8; READ_BUF];
    let mut out_text = Utf8Chunker::default();
    let mut err_text = Utf8Chunker::default();
    let mut out_cap = CappedOutput::new(cap);
    let mut err_cap = CappedOutput::new(cap);

    let timer = tokio::time::sleep_until((started + timeout).into());
    tokio::pin!(timer);

    let mut phase = Phase::Running;
    let mut timer_armed = true;
    let mut timed_out = false;
    let mut status: Option<io::Result<ExitStatus>> = None;

    while status.is_none() || stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_pipe(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                Ok(n) if n > 0 => {
                    let chunk = out_text.push(&out_buf[..n]);
                    if !chunk.is_empty() {
                        notify(observer, |o| o.on_stdout(&chunk));
                        out_cap.push(&chunk);
                    }
                }
                _ => stdout = None,
            },
            read = read_pipe(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                Ok(n) if n > 0 => {
                    let chunk = err_text.push(&err_buf[..n]);
                    if !chunk.is_empty() {
                        notify(observer, |o| o.on_stderr(&chunk));
                        err_cap.push(&chunk);
                    }
                }
                _ => stderr = None,
            },
            exit = child.wait(), if status.is_none() => {
                status = Some(exit);
                if phase == Phase::Running && (stdout.is_some() || stderr.is_some()) {
                    phase = Phase::Draining;
                    timer.as_mut().reset((Instant::now() + KILL_GRACE).into());
                }
            },
            _ = &mut timer, if timer_armed => match phase {
                Phase::Running => {
                    debug!(timeout_secs = timeout.as_secs(), "command timed out, terminating");
                    timed_out = true;
                    terminate(&mut child);
                    phase = Phase::Terminating;
                    timer.as_mut().reset((Instant::now() + KILL_GRACE).into());
                }
                Phase::Terminating => {
                    debug!("grace period elapsed, killing");
                    kill(&mut child);
                    phase = Phase::Killed;
                    timer.as_mut().reset((Instant::now() + KILL_GRACE).into());
                }
                Phase::Draining | Phase::Killed => {
                    // Stop waiting for pipes held open by detached descendants
                    stdout = None;
                    stderr = None;
                    timer_armed = false;
                }
            },
        }
    }

    let tail = out_text.finish();
    notify_tail(observer, &tail, false);
    out_cap.push(&tail);
    let tail = err_text.finish();
    notify_tail(observer, &tail, true);
    err_cap.push(&tail);

    let (exit_code, signal) = match status {
        Some(Ok(status)) => (status.code().unwrap_or(1), signal_name(&status)),
        Some(Err(e)) => {
            warn!(error = %e, "failed to wait for command");
            (1, None)
        }
        None => (1, None),
    };

    Capture {
        exit_code,
        signal,
        timed_out,
        stdout: out_cap.finish(),
        stderr: err_cap.finish(),
    }
}

fn notify_tail(observer: Option<&dyn ExecObserver>, tail: &str, is_stderr: bool) {
    if tail.is_empty() {
        return;
    }
    if is_stderr {
        notify(observer, |o| o.on_stderr(tail));
    } else {
        notify(observer, |o| o.on_stdout(tail));
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    if let Some(pid) = child.id() {
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::killpg(pgid, signal) {
            debug!(error = %e, ?signal, "killpg failed");
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.start_kill();
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    let raw = status.signal()?;
    Some(
        nix::sys::signal::Signal::try_from(raw)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("SIG{}", raw)),
    )
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

/// Decodes a byte stream as UTF-8, holding back sequences split across reads
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Character-capped accumulator for one stream
#[derive(Debug)]
struct CappedOutput {
    text: String,
    chars: usize,
    cap: usize,
    truncated: bool,
}

impl CappedOutput {
    fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated || chunk.is_empty() {
            return;
        }
        let remaining = self.cap - self.chars;
        match chunk.char_indices().nth(remaining) {
            Some((idx, _)) => {
                self.text.push_str(&chunk[..idx]);
                self.chars = self.cap;
                self.truncated = true;
            }
            None => {
                self.text.push_str(chunk);
                self.chars += chunk.chars().count();
            }
        }
    }

    fn finish(mut self) -> (String, bool) {
        if self.truncated {
            self.text.push_str(TRUNCATION_MARKER);
        }
        (self.text, self.truncated)
    }
}

/// Cap `text` at `cap` characters. Text already within the cap is returned unchanged.
pub fn truncate_output(text: &str, cap: usize) -> (String, bool) {
    let mut capped = CappedOutput::new(cap);
    capped.push(text);
    capped.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell(root: &Path) -> LocalShell {
        LocalShell::new(ShellConfig::default(), root)
    }

    #[test]
    fn test_truncate_within_cap_is_noop() {
        let (text, truncated) = truncate_output("hello", 5);
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let (text, truncated) = truncate_output("ééééé", 3);
        assert_eq!(text, format!("ééé{}", TRUNCATION_MARKER));
        assert!(truncated);
    }

    #[test]
    fn test_capped_output_across_chunks() {
        let mut capped = CappedOutput::new(4);
        capped.push("ab");
        capped.push("cdef");
        capped.push("gh");
        assert_eq!(capped.finish(), (format!("abcd{}", TRUNCATION_MARKER), true));
    }

    #[test]
    fn test_utf8_chunker_reassembles_split_sequences() {
        let bytes = "aé".as_bytes();
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(&bytes[..2]), "a");
        assert_eq!(chunker.push(&bytes[2..]), "é");
        assert_eq!(chunker.push(&[0xFF, b'x']), "\u{FFFD}x");
        assert_eq!(chunker.finish(), "");
    }

    #[test]
    fn test_clamping() {
        let dir = tempfile::tempdir().unwrap();
        let shell = shell(dir.path());
        assert_eq!(shell.effective_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(shell.effective_timeout(Some(5000)), Duration::from_secs(900));
        assert_eq!(shell.effective_timeout(None), Duration::from_secs(60));
        assert_eq!(shell.effective_output_cap(Some(10)), 256);
        assert_eq!(shell.effective_output_cap(Some(1_000_000)), 200_000);
        assert_eq!(shell.effective_output_cap(None), 20_000);
    }

    #[test]
    fn test_request_from_arguments() {
        let args = json!({"command": "ls", "cwd": "src", "timeout_seconds": 5, "max_output_chars": "300"});
        let request = ShellRequest::from_arguments(args.as_object().unwrap());
        assert_eq!(request.command, "ls");
        assert_eq!(request.cwd.as_deref(), Some("src"));
        assert_eq!(request.timeout_seconds, Some(5));
        assert_eq!(request.max_output_chars, Some(300));

        let empty = ShellRequest::from_arguments(&Map::new());
        assert!(empty.command.is_empty());
    }

    #[test]
    fn test_spawn_exit_codes() {
        assert_eq!(spawn_exit_code(&io::Error::from(io::ErrorKind::NotFound)), 127);
        assert_eq!(spawn_exit_code(&io::Error::from(io::ErrorKind::PermissionDenied)), 126);
        assert_eq!(spawn_exit_code(&io::Error::other("boom")), 1);
    }

    #[tokio::test]
    async fn test_empty_command_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = shell(dir.path()).run(&ShellRequest::new("   "), None).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_cwd_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = ShellRequest {
            cwd: Some("does-not-exist".to_string()),
            ..ShellRequest::new("echo hi")
        };
        let err = shell(dir.path()).run(&request, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_file_cwd_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let err = shell(dir.path()).resolve_cwd(Some("file.txt")).unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }
}
