//! Subprocess execution of workspace files with a wall-clock timeout.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::Error;

use super::workspace::Workspace;

/// Exit code reported for timeouts, containment violations and launch failures.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Outcome of running one workspace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code; `0` is a pass.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, or a diagnostic for sandbox-level failures.
    pub stderr: String,
}

impl ExecutionResult {
    /// Builds a failed result carrying `message` as stderr.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    /// Returns true if the run exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs workspace files and reports structured results.
///
/// Implementations never return an error: every failure mode is encoded in
/// the [`ExecutionResult`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs the file at `path` (relative to the workspace root).
    async fn run(&self, path: &str, timeout: Duration) -> ExecutionResult;
}

/// Maps file extensions to interpreter command lines.
#[derive(Debug, Clone)]
pub struct InterpreterMap {
    by_extension: BTreeMap<String, String>,
    default: String,
}

impl InterpreterMap {
    /// Creates a map with a fallback interpreter for unknown extensions.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            by_extension: BTreeMap::new(),
            default: default.into(),
        }
    }

    /// Registers `command` for files ending in `.extension`.
    pub fn with(mut self, extension: impl Into<String>, command: impl Into<String>) -> Self {
        self.by_extension.insert(extension.into(), command.into());
        self
    }

    /// Returns the program and leading arguments used to run `path`.
    pub fn command_for(&self, path: &Path) -> (String, Vec<String>) {
        let command = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.by_extension.get(e))
            .unwrap_or(&self.default);

        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }
}

impl Default for InterpreterMap {
    fn default() -> Self {
        Self::new("python3")
            .with("py", "python3")
            .with("sh", "sh")
            .with("js", "node")
    }
}

/// Executor that launches workspace files as child processes.
///
/// The child runs with the workspace root as its working directory and a
/// null stdin. On timeout the child is killed.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    workspace: Workspace,
    interpreters: InterpreterMap,
    output_limit: usize,
}

impl ProcessExecutor {
    /// Creates an executor bound to `workspace` with default interpreters.
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            interpreters: InterpreterMap::default(),
            output_limit: 64 * 1024,
        }
    }

    /// Sets the interpreter map.
    pub fn with_interpreters(mut self, interpreters: InterpreterMap) -> Self {
        self.interpreters = interpreters;
        self
    }

    /// Sets the maximum number of bytes kept from each output stream.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Returns the workspace this executor is jailed to.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, path: &str, timeout: Duration) -> ExecutionResult {
        let target = match self.workspace.resolve(path) {
            Ok(target) => target,
            Err(e @ Error::Containment { .. }) => {
                return ExecutionResult::failure(format!("Cannot execute outside workspace: {}", e));
            }
            Err(e) => return ExecutionResult::failure(format!("System execution error: {}", e)),
        };

        if !target.is_file() {
            return ExecutionResult::failure(format!("File {} does not exist.", path));
        }

        let (program, args) = self.interpreters.command_for(&target);
        if program.is_empty() {
            return ExecutionResult::failure(format!("No interpreter configured for {}", path));
        }
        let working_dir = match self.workspace.canonical_root() {
            Ok(root) => root,
            Err(e) => return ExecutionResult::failure(format!("System execution error: {}", e)),
        };

        tracing::info!(path = %path, program = %program, timeout = ?timeout, "executing workspace file");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .arg(&target)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %program, error = %e, "failed to launch interpreter");
                return ExecutionResult::failure(format!(
                    "System execution error: failed to launch {}: {}",
                    program, e
                ));
            }
        };

        let pid = child.id();
        let limit = self.output_limit;
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_limited(out, limit)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_limited(err, limit)));

        let waited = tokio::time::timeout(timeout, child.wait()).await;

        // Anything the program left behind goes down with it.
        kill_process_group(pid).await;
        if waited.is_err() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(path = %path, error = %e, "child already gone");
            }
            if let Err(e) = child.wait().await {
                tracing::debug!(path = %path, error = %e, "failed to reap child");
            }
        }

        let stdout = collect_output(stdout).await;
        let stderr = collect_output(stderr).await;

        match waited {
            Ok(Ok(status)) => {
                let result = ExecutionResult {
                    exit_code: status.code().unwrap_or(FAILURE_EXIT_CODE),
                    stdout,
                    stderr,
                };
                tracing::debug!(path = %path, exit_code = result.exit_code, "execution finished");
                result
            }
            Ok(Err(e)) => ExecutionResult::failure(format!("System execution error: {}", e)),
            Err(_) => {
                tracing::warn!(path = %path, timeout = ?timeout, "execution timed out, killed process group");
                ExecutionResult {
                    exit_code: FAILURE_EXIT_CODE,
                    stdout,
                    stderr: format!("Execution timed out ({} limit).", format_limit(timeout)),
                }
            }
        }
    }
}

/// How long to wait for pipes to close once the process group is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Kills every process in the child's group.
#[cfg(unix)]
async fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => tracing::debug!(pgid = pid, "killed leftover processes"),
        Ok(_) => {}
        Err(e) => tracing::warn!(pgid = pid, error = %e, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: Option<u32>) {}

/// Reads a stream to its end, keeping at most `limit` bytes.
async fn read_limited<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> (Vec<u8>, usize) {
    let mut kept = Vec::new();
    let mut dropped = 0;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let take = limit.saturating_sub(kept.len()).min(n);
                kept.extend_from_slice(&buf[..take]);
                dropped += n - take;
            }
        }
    }

    (kept, dropped)
}

async fn collect_output(handle: Option<JoinHandle<(Vec<u8>, usize)>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
        Ok(Ok((kept, dropped))) => render_output(&kept, dropped),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "output reader failed");
            String::new()
        }
        Err(_) => {
            // A process outside the group still holds the pipe.
            tracing::warn!("output pipe still open after kill, dropping output");
            handle.abort();
            String::new()
        }
    }
}

fn render_output(kept: &[u8], dropped: usize) -> String {
    let mut text = String::from_utf8_lossy(kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n[truncated {} bytes]", dropped));
    }
    text
}

/// Formats a timeout for messages: whole seconds as `30s`, otherwise `1.5s` or `500ms`.
fn format_limit(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{:?}", timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn interpreter_map_selects_by_extension() {
        let map = InterpreterMap::default();

        assert_eq!(map.command_for(Path::new("a.py")).0, "python3");
        assert_eq!(map.command_for(Path::new("a.sh")).0, "sh");
        assert_eq!(map.command_for(Path::new("noext")).0, "python3");
    }

    #[test]
    fn interpreter_map_splits_arguments() {
        let map = InterpreterMap::new("python3 -u");

        let (program, args) = map.command_for(Path::new("x.unknown"));
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-u"]);
    }

    #[test]
    fn render_output_marks_dropped_bytes() {
        let text = render_output(b"abc", 3);
        assert!(text.starts_with("abc"));
        assert!(text.contains("[truncated 3 bytes]"));
        assert_eq!(render_output(b"abc", 0), "abc");
    }

    #[tokio::test]
    async fn read_limited_keeps_prefix_and_counts_rest() {
        let (kept, dropped) = read_limited(&b"abcdef"[..], 4).await;

        assert_eq!(kept, b"abcd");
        assert_eq!(dropped, 2);
    }

    #[test]
    fn format_limit_handles_sub_second_timeouts() {
        assert_eq!(format_limit(Duration::from_secs(30)), "30s");
        assert_eq!(format_limit(Duration::from_millis(500)), "500ms");
        assert_eq!(format_limit(Duration::from_millis(1500)), "1.5s");
    }

    #[tokio::test]
    async fn run_outside_root_is_folded_into_result() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Workspace::new(temp_dir.path()));

        let result = executor.run("../../etc/passwd", Duration::from_secs(1)).await;

        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(result.stderr.contains("outside workspace"));
    }

    #[tokio::test]
    async fn run_missing_file_reports_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Workspace::new(temp_dir.path()));

        let result = executor.run("missing.py", Duration::from_secs(1)).await;

        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(result.stderr.contains("does not exist"));
    }

    #[tokio::test]
    async fn run_with_missing_interpreter_is_folded_into_result() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.write("a.zz", "whatever").unwrap();
        let executor = ProcessExecutor::new(ws)
            .with_interpreters(InterpreterMap::new("definitely-not-an-interpreter-xyz"));

        let result = executor.run("a.zz", Duration::from_secs(1)).await;

        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(result.stderr.contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_exit_code_and_streams() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.write("fail.sh", "echo out\necho err >&2\nexit 3\n").unwrap();
        let executor = ProcessExecutor::new(ws);

        let result = executor.run("fail.sh", Duration::from_secs(10)).await;

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.passed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_uses_workspace_root_as_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path().join("ws"));
        ws.write("data.txt", "payload").unwrap();
        ws.write("scripts/read.sh", "cat data.txt\n").unwrap();
        let executor = ProcessExecutor::new(ws);

        let result = executor.run("scripts/read.sh", Duration::from_secs(10)).await;

        assert!(result.passed(), "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_whole_process_group() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.write("slow.sh", "sleep 2\ntouch marker\n").unwrap();
        let executor = ProcessExecutor::new(ws.clone());

        let result = executor.run("slow.sh", Duration::from_secs(1)).await;
        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert_eq!(result.stderr, "Execution timed out (1s limit).");

        // The interpreter's own children must not outlive the timeout.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!ws.contains("marker"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_child_holding_pipes_does_not_block_exit() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.write("bg.sh", "sleep 5 &\necho done\nexit 0\n").unwrap();
        let executor = ProcessExecutor::new(ws);

        let started = std::time::Instant::now();
        let result = executor.run("bg.sh", Duration::from_secs(30)).await;

        assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
        assert_eq!(result.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sub_second_timeout_is_reported_in_milliseconds() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::new(temp_dir.path());
        ws.write("spin.sh", "while true; do :; done\n").unwrap();
        let executor = ProcessExecutor::new(ws);

        let result = executor.run("spin.sh", Duration::from_millis(500)).await;

        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert_eq!(result.stderr, "Execution timed out (500ms limit).");
    }
}
