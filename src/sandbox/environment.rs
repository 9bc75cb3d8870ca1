//! The execution environment capability set and its factory.
//!
//! An environment runs shell commands and touches files on behalf of one
//! sandbox. Implementations: [`LocalEnvironment`] on the host and
//! [`DockerEnvironment`] inside a container. The remote backend is
//! declared but fails fast.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::docker::DockerEnvironment;
use super::local::LocalEnvironment;
use super::{Result, SandboxError};
use crate::config::{EnvironmentKind, SandboxConfig};
use crate::output::SearchMatch;

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 137;

/// Maximum number of paths returned by [`ExecutionEnvironment::glob`].
pub const MAX_GLOB_RESULTS: usize = 1000;

/// Default cap on [`ExecutionEnvironment::grep`] matches.
pub const DEFAULT_MAX_GREP_RESULTS: usize = 100;

/// Per-call options for [`ExecutionEnvironment::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory, relative to the environment's cwd
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Overrides the environment's default timeout
    pub timeout_seconds: Option<u64>,
    /// Data written to the command's standard input
    pub stdin: Option<String>,
}

/// Outcome of a command. A non-zero exit code is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Process exit code; 137 after a timeout kill, -1 when rejected
    pub exit_code: i32,
    /// Wall-clock run time
    pub duration_ms: u64,
    /// Either stream was cut to fit the output budget
    pub truncated: bool,
}

impl ExecResult {
    /// Synthetic result for a command a human declined to run.
    pub fn rejected(feedback: Option<&str>) -> Self {
        let stderr = match feedback.map(str::trim).filter(|f| !f.is_empty()) {
            Some(feedback) => format!("Command rejected by user: {feedback}"),
            None => "Command rejected by user".to_string(),
        };
        Self {
            stdout: String::new(),
            stderr,
            exit_code: -1,
            duration_ms: 0,
            truncated: false,
        }
    }

    /// True when the command was killed by the timeout.
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Options for [`ExecutionEnvironment::glob`].
#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Directory to search from
    pub cwd: Option<String>,
    /// Path fragments to exclude (e.g. `node_modules`)
    pub ignore: Vec<String>,
}

/// Options for [`ExecutionEnvironment::grep`].
#[derive(Debug, Clone, Default)]
pub struct GrepOptions {
    /// Directory to search from
    pub cwd: Option<String>,
    /// File name glob passed to `--include`
    pub include: Option<String>,
    /// Maximum number of hits
    pub max_results: Option<usize>,
    /// Lines of context around each hit
    pub context_lines: Option<usize>,
}

/// Snapshot of an environment for display and approval prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Backend type
    pub kind: EnvironmentKind,
    /// Working directory, in the environment's own namespace
    pub cwd: String,
    /// Owning sandbox, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    /// Container id, once created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// Commands and file access inside one sandbox.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync + std::fmt::Debug {
    /// Prepares the environment. Called exactly once before first use.
    async fn initialize(&self) -> Result<()>;

    /// Runs `command` through a shell.
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult>;

    /// Reads a text file.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Writes a file, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Checks whether a path exists.
    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Finds files matching `pattern`. Sorted absolute paths.
    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>>;

    /// Searches file contents recursively.
    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<SearchMatch>>;

    /// Releases external resources. Safe to call more than once.
    async fn destroy(&self) -> Result<()>;

    /// Working directory as seen by commands.
    fn cwd(&self) -> String;

    /// Type, cwd and backend identifiers.
    fn info(&self) -> EnvironmentInfo;

    /// Host location a user-supplied path refers to.
    fn host_path(&self, path: &str) -> Result<PathBuf>;
}

/// Builds environments for sandboxes.
pub trait EnvironmentFactory: Send + Sync {
    /// Constructs (but does not initialize) an environment.
    fn create(
        &self,
        sandbox_id: &str,
        config: &SandboxConfig,
    ) -> Result<Arc<dyn ExecutionEnvironment>>;
}

/// Dispatches on [`SandboxConfig::env`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEnvironmentFactory;

impl EnvironmentFactory for DefaultEnvironmentFactory {
    fn create(
        &self,
        sandbox_id: &str,
        config: &SandboxConfig,
    ) -> Result<Arc<dyn ExecutionEnvironment>> {
        match config.env {
            EnvironmentKind::Local => Ok(Arc::new(LocalEnvironment::from_config(config)?)),
            EnvironmentKind::Docker => Ok(Arc::new(DockerEnvironment::from_config(
                sandbox_id, config,
            )?)),
            EnvironmentKind::Remote => Err(SandboxError::not_implemented(config.env.to_string())),
        }
    }
}

/// Effective timeout for one call.
pub(crate) fn effective_timeout(opts: &ExecOptions, default: Duration) -> Duration {
    opts.timeout_seconds.map_or(default, Duration::from_secs)
}

/// `find` invocation for a glob pattern rooted at `root`.
///
/// `**` collapses to `*` because `find -path` wildcards already cross
/// directory separators.
pub(crate) fn find_command(root: &str, pattern: &str, ignore: &[String], limit: usize) -> String {
    let root = root.trim_end_matches('/');
    let root = if root.is_empty() { "/" } else { root };
    let pattern = pattern.trim_start_matches("./").replace("**/", "*").replace("**", "*");

    let mut cmd = format!("find {} -type f", shell_words::quote(root));
    if pattern.contains('/') {
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        cmd.push_str(&format!(" -path {}", shell_words::quote(&full)));
    } else {
        cmd.push_str(&format!(" -name {}", shell_words::quote(&pattern)));
    }
    for fragment in ignore.iter().filter(|f| !f.is_empty()) {
        let excluded = format!("*{fragment}*");
        cmd.push_str(&format!(" -not -path {}", shell_words::quote(&excluded)));
    }
    cmd.push_str(&format!(" 2>/dev/null | head -n {limit}"));
    cmd
}

/// Recursive `grep` invocation producing `path:line:content` output.
pub(crate) fn grep_command(root: &str, pattern: &str, opts: &GrepOptions) -> String {
    let max_results = opts.max_results.unwrap_or(DEFAULT_MAX_GREP_RESULTS);
    let context = opts.context_lines.unwrap_or(0);

    let mut cmd = String::from("grep -rnIE --color=never");
    if context > 0 {
        cmd.push_str(&format!(" -C {context}"));
    }
    if let Some(include) = opts.include.as_deref().filter(|i| !i.is_empty()) {
        cmd.push_str(&format!(" --include={}", shell_words::quote(include)));
    }
    cmd.push_str(&format!(
        " -e {} {}",
        shell_words::quote(pattern),
        shell_words::quote(root)
    ));
    // Each hit may bring up to 2*context neighbours plus a `--` separator.
    let line_budget = max_results.saturating_mul(2 * context + 2);
    cmd.push_str(&format!(" 2>/dev/null | head -n {line_budget}"));
    cmd
}

/// Keep at most `max_results` hits, together with their context lines.
pub(crate) fn cap_matches(matches: Vec<SearchMatch>, max_results: usize) -> Vec<SearchMatch> {
    let mut hits = 0;
    let mut out = Vec::with_capacity(matches.len().min(max_results));
    for m in matches {
        if !m.context {
            if hits == max_results {
                break;
            }
            hits += 1;
        }
        out.push(m);
    }
    out
}
