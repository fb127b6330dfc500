//! Isolation backends
//!
//! A [`Runtime`] runs one [`ExecutionRequest`] and always returns an
//! [`ExecutionOutcome`]. Two backends ship with the crate:
//! - [`ProcessRuntime`]: local toolchains under `ulimit`, a cleared
//!   environment, a private temp dir and (when available) a fresh network
//!   namespace
//! - [`ContainerRuntime`]: one throwaway docker container per run with
//!   `--network none`
//!
//! Tests substitute their own runtime through [`crate::Sandbox::with_runtime`].

mod container;
mod process;

pub use container::ContainerRuntime;
pub use process::ProcessRuntime;

use crate::classify::{Phase, RawRun};
use crate::error::SandboxError;
use crate::language::{Language, Toolchain};
use crate::outcome::ExecutionOutcome;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How long output readers may keep draining after the child is gone
const READER_GRACE: Duration = Duration::from_millis(500);

/// Runtime seam
///
/// Implement this trait to define how a single program is executed.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Run one program. Never fails: faults are encoded in the outcome.
    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome;
}

/// One program to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Source code as submitted
    pub code: String,
    /// Language tag
    pub language: Language,
    /// Time budget for the program itself (compile steps use the overhead allowance)
    pub time_budget: Duration,
}

impl ExecutionRequest {
    /// Create a request
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, language: Language, time_budget: Duration) -> Self {
        Self {
            code: code.into(),
            language,
            time_budget,
        }
    }
}

/// Source written to a private working directory, ready to build and run
pub(crate) struct PreparedSource {
    pub(crate) dir: TempDir,
    pub(crate) toolchain: Toolchain,
}

/// Write the prepared source into a fresh temp dir
pub(crate) async fn prepare(
    request: &ExecutionRequest,
    memory_mb: u64,
) -> Result<PreparedSource, SandboxError> {
    let dir = tempfile::Builder::new()
        .prefix("mender-")
        .tempdir()
        .map_err(SandboxError::Workspace)?;
    let source = request.language.prepare_source(&request.code);
    let file_name = request.language.source_file_name(&source);
    tokio::fs::write(dir.path().join(&file_name), source)
        .await
        .map_err(SandboxError::Workspace)?;
    let toolchain = request.language.toolchain(&file_name, memory_mb);
    Ok(PreparedSource { dir, toolchain })
}

/// Output and status of one child process
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: Option<i32>,
    pub(crate) timed_out: bool,
    pub(crate) truncated: bool,
}

impl Captured {
    pub(crate) fn into_raw(self, phase: Phase, elapsed: Duration) -> RawRun {
        RawRun {
            phase,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            truncated: self.truncated,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CaptureBuffer {
    fn push(&mut self, chunk: &[u8], cap: usize) {
        let room = cap.saturating_sub(self.bytes.len());
        let take = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            self.truncated = true;
        }
    }

    fn take(&mut self) -> (String, bool) {
        let bytes = std::mem::take(&mut self.bytes);
        (String::from_utf8_lossy(&bytes).into_owned(), self.truncated)
    }
}

/// Keep reading past the cap so the child never blocks on a full pipe.
async fn drain<R>(mut reader: R, sink: Arc<Mutex<CaptureBuffer>>, cap: usize)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().push(&chunk[..n], cap),
        }
    }
}

/// Spawn `command`, capture both streams up to `max_output` bytes each, and
/// kill the whole process group once `budget` elapses.
///
/// Partial output is kept on timeout.
pub(crate) async fn capture(
    mut command: Command,
    budget: Duration,
    max_output: usize,
) -> Result<Captured, SandboxError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command
        .spawn()
        .map_err(|source| SandboxError::Spawn { program, source })?;
    let pid = child.id();

    let out_buf = Arc::new(Mutex::new(CaptureBuffer::default()));
    let err_buf = Arc::new(Mutex::new(CaptureBuffer::default()));
    let readers = [
        child
            .stdout
            .take()
            .map(|s| tokio::spawn(drain(s, Arc::clone(&out_buf), max_output))),
        child
            .stderr
            .take()
            .map(|s| tokio::spawn(drain(s, Arc::clone(&err_buf), max_output))),
    ];

    let (exit_code, timed_out) = match tokio::time::timeout(budget, child.wait()).await {
        Ok(Ok(status)) => (exit_code_of(status), false),
        Ok(Err(e)) => return Err(SandboxError::Wait(e)),
        Err(_) => {
            // The leader is not reaped yet, so its pgid still names this group
            if let Some(pid) = pid {
                kill_group(pid).await;
            }
            let _ = child.start_kill();
            let _ = child.wait().await;
            (None, true)
        }
    };

    for reader in readers.into_iter().flatten() {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    let (stdout, out_truncated) = out_buf.lock().take();
    let (stderr, err_truncated) = err_buf.lock().take();
    Ok(Captured {
        stdout,
        stderr,
        exit_code,
        timed_out,
        truncated: out_truncated || err_truncated,
    })
}

/// Kill the child's whole process group (background jobs, compiler subprocesses)
///
/// Only valid while the group leader is unreaped.
#[cfg(unix)]
async fn kill_group(pid: u32) {
    let _ = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

#[cfg(not(unix))]
async fn kill_group(_pid: u32) {}

fn exit_code_of(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

/// Quote one argument for `sh -c`
pub(crate) fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
