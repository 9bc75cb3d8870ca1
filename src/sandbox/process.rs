//! Child-process execution with a hard wall-clock timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use super::environment::ExecResult;
use super::{Result, SandboxError};
use crate::output::{strip_ansi, truncate};

/// Grace period for draining pipes after the child exits or is killed.
/// Grandchildren holding the pipes open must not hang the call.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Unprocessed output of one shell invocation.
#[derive(Debug)]
pub(crate) struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

impl RawOutput {
    /// Strip escapes, apply the output budget and note a timeout kill.
    pub(crate) fn into_exec_result(self, timeout: Duration, max_chars: usize) -> ExecResult {
        let stdout = truncate(&strip_ansi(&String::from_utf8_lossy(&self.stdout)), max_chars);
        let stderr = truncate(&strip_ansi(&String::from_utf8_lossy(&self.stderr)), max_chars);

        let mut stderr_text = stderr.text;
        if self.timed_out {
            if !stderr_text.is_empty() && !stderr_text.ends_with('\n') {
                stderr_text.push('\n');
            }
            stderr_text.push_str(&format!(
                "Command timed out after {}s and was killed",
                timeout.as_secs()
            ));
        }

        ExecResult {
            stdout: stdout.text,
            stderr: stderr_text,
            exit_code: self.exit_code,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            truncated: stdout.truncated || stderr.truncated,
        }
    }
}

/// Run `command` with `sh -c` in `cwd`, killing it after `timeout`.
pub(crate) async fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<RawOutput> {
    debug!(command, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "run_shell");
    let started = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }
    // Own process group so the whole tree can be killed on timeout.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| SandboxError::io(format!("Failed to spawn: {command}"), e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        tokio::spawn(async move {
            // The child may exit without reading; a broken pipe is expected then.
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!("stdin write ended early: {}", e);
            }
        });
    }

    let mut stdout_task = spawn_reader(child.stdout.take());
    let mut stderr_task = spawn_reader(child.stderr.take());

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(e)) => {
            warn!("Failed waiting for command: {}", e);
            (-1, false)
        }
        Err(_) => {
            warn!(command, "Command timed out, killing process tree");
            kill_tree(&mut child).await;
            (super::environment::TIMEOUT_EXIT_CODE, true)
        }
    };

    let (stdout, stderr) = tokio::join!(drain(&mut stdout_task), drain(&mut stderr_task));

    Ok(RawOutput {
        stdout,
        stderr,
        exit_code,
        timed_out,
        duration: started.elapsed(),
    })
}

/// Bytes read so far from one pipe, shared with its reader task.
type Captured = Arc<Mutex<Vec<u8>>>;

struct PipeReader {
    buf: Captured,
    handle: JoinHandle<std::io::Result<()>>,
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<PipeReader>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut reader| {
        let buf = Captured::default();
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
        });
        PipeReader { buf, handle }
    })
}

/// Collect a reader's bytes. Stream errors and the drain deadline settle
/// with whatever was read.
async fn drain(task: &mut Option<PipeReader>) -> Vec<u8> {
    let Some(reader) = task.as_mut() else {
        return Vec::new();
    };
    match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut reader.handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Error reading command output: {}", e),
        Ok(Err(e)) => warn!("Output reader task failed: {}", e),
        Err(_) => {
            debug!("Pipe still open after drain grace, keeping partial output");
            reader.handle.abort();
        }
    }
    std::mem::take(&mut *reader.buf.lock().unwrap_or_else(PoisonError::into_inner))
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        // The child leads the process group created at spawn.
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, "killpg failed: {}", e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Child already gone: {}", e);
    }
}
