//! Host execution environment.
//!
//! Commands run through `sh -c` in a working directory on the host. When a
//! path restriction is configured, writes must stay inside the restriction
//! root and reads refuse symbolic links.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::environment::{
    cap_matches, effective_timeout, find_command, grep_command, EnvironmentInfo, ExecOptions,
    ExecResult, ExecutionEnvironment, GlobOptions, GrepOptions, DEFAULT_MAX_GREP_RESULTS,
    MAX_GLOB_RESULTS,
};
use super::process::run_shell;
use super::{Result, SandboxError};
use crate::config::{expand_path, EnvironmentKind, SandboxConfig};
use crate::output::{is_binary, parse_search_output, SearchMatch};
use crate::security::{ensure_canonical_within, ensure_not_symlink, normalize_path};

/// Runs commands directly on the host.
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    cwd: PathBuf,
    path_restriction: Option<PathBuf>,
    default_timeout: Duration,
    max_output_chars: usize,
}

impl LocalEnvironment {
    /// Creates an environment rooted at `cwd` with default limits.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let defaults = SandboxConfig::default();
        Self {
            cwd: absolutize(&cwd.into()),
            path_restriction: None,
            default_timeout: defaults.exec_timeout(),
            max_output_chars: defaults.exec.max_output_chars,
        }
    }

    /// Builds the environment described by `config.local`.
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let cwd = match config.local.cwd.as_deref() {
            Some(dir) => expand_path(dir)?,
            None => std::env::current_dir()
                .map_err(|e| SandboxError::io("Failed to get current directory", e))?,
        };
        Ok(Self {
            cwd: absolutize(&cwd),
            path_restriction: config
                .path_restriction_root()?
                .map(|root| absolutize(&root)),
            default_timeout: config.exec_timeout(),
            max_output_chars: config.exec.max_output_chars,
        })
    }

    /// Confines writes (and symlink checks on reads) to `root`.
    #[must_use]
    pub fn with_path_restriction(mut self, root: impl Into<PathBuf>) -> Self {
        self.path_restriction = Some(absolutize(&root.into()));
        self
    }

    /// Overrides the default command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Overrides the output character budget.
    #[must_use]
    pub fn with_max_output_chars(mut self, max_chars: usize) -> Self {
        self.max_output_chars = max_chars;
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        normalize_path(&self.cwd.join(path))
    }

    fn resolve_dir(&self, dir: Option<&str>) -> PathBuf {
        dir.map_or_else(|| self.cwd.clone(), |d| self.resolve(d))
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize_path(&base.join(path))
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalEnvironment {
    async fn initialize(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.cwd).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::not_found(&self.cwd)
            } else {
                SandboxError::io(format!("Failed to inspect {}", self.cwd.display()), e)
            }
        })?;
        if !meta.is_dir() {
            return Err(SandboxError::config(format!(
                "Working directory is not a directory: {}",
                self.cwd.display()
            )));
        }
        debug!(cwd = %self.cwd.display(), "Local environment ready");
        Ok(())
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        let timeout = effective_timeout(&opts, self.default_timeout);
        let dir = self.resolve_dir(opts.cwd.as_deref());
        let raw = run_shell(command, &dir, &opts.env, opts.stdin.as_deref(), timeout).await?;
        Ok(raw.into_exec_result(timeout, self.max_output_chars))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path);
        if self.path_restriction.is_some() {
            ensure_not_symlink(&resolved).await?;
        }
        let bytes = tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::not_found(&resolved)
            } else {
                SandboxError::io(format!("Failed to read {}", resolved.display()), e)
            }
        })?;
        if is_binary(&bytes) {
            return Err(SandboxError::binary_content(&resolved));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let mut target = self.resolve(path);
        if let Some(root) = &self.path_restriction {
            target = ensure_canonical_within(&target, root).await?;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SandboxError::io(format!("Failed to create directory: {}", parent.display()), e)
            })?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to write {}", target.display()), e))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path);
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to inspect {}", resolved.display()), e))
    }

    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>> {
        let root = self.resolve_dir(opts.cwd.as_deref());
        let cmd = find_command(
            &root.to_string_lossy(),
            pattern,
            &opts.ignore,
            MAX_GLOB_RESULTS,
        );
        let raw = run_shell(&cmd, &self.cwd, &[], None, self.default_timeout).await?;
        let mut paths: Vec<String> = String::from_utf8_lossy(&raw.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        paths.sort();
        paths.truncate(MAX_GLOB_RESULTS);
        Ok(paths)
    }

    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<SearchMatch>> {
        let root = self.resolve_dir(opts.cwd.as_deref());
        let cmd = grep_command(&root.to_string_lossy(), pattern, &opts);
        let raw = run_shell(&cmd, &self.cwd, &[], None, self.default_timeout).await?;
        let matches = parse_search_output(
            &String::from_utf8_lossy(&raw.stdout),
            opts.context_lines.unwrap_or(0) > 0,
        );
        Ok(cap_matches(
            matches,
            opts.max_results.unwrap_or(DEFAULT_MAX_GREP_RESULTS),
        ))
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    fn cwd(&self) -> String {
        self.cwd.to_string_lossy().into_owned()
    }

    fn info(&self) -> EnvironmentInfo {
        EnvironmentInfo {
            kind: EnvironmentKind::Local,
            cwd: self.cwd(),
            sandbox_id: None,
            container_id: None,
        }
    }

    fn host_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;

    fn restricted(dir: &Path) -> LocalEnvironment {
        LocalEnvironment::new(dir).with_path_restriction(dir)
    }

    #[tokio::test]
    async fn test_initialize_requires_existing_directory() {
        let dir = tempdir().unwrap();
        assert!(LocalEnvironment::new(dir.path()).initialize().await.is_ok());

        let missing = LocalEnvironment::new(dir.path().join("nope"));
        assert!(missing.initialize().await.is_err());

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = LocalEnvironment::new(&file).initialize().await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_restricted_write_read_and_symlink() {
        let dir = tempdir().unwrap();
        let env = restricted(dir.path());

        let err = env.write_file("../evil.txt", "x").await.unwrap_err();
        assert!(err.is_traversal());
        assert!(!dir.path().join("../evil.txt").exists());

        env.write_file("ok.txt", "x").await.unwrap();
        assert_eq!(env.read_file("ok.txt").await.unwrap(), "x");

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path().join("ok.txt"), dir.path().join("link.txt"))
                .unwrap();
            let err = env.read_file("link.txt").await.unwrap_err();
            assert!(err.is_symlink());
        }
    }

    #[tokio::test]
    async fn test_unrestricted_read_follows_symlink() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.write_file("ok.txt", "x").await.unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path().join("ok.txt"), dir.path().join("link.txt"))
                .unwrap();
            assert_eq!(env.read_file("link.txt").await.unwrap(), "x");
        }
    }

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let env = restricted(dir.path());
        env.write_file("a/b/c.txt", "nested").await.unwrap();
        assert!(env.file_exists("a/b/c.txt").await.unwrap());
        assert!(!env.file_exists("a/b/missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_binary_fails() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0x7f, b'E', b'L', b'F', 0, 1]).unwrap();
        let env = LocalEnvironment::new(dir.path());
        let err = env.read_file("blob.bin").await.unwrap_err();
        assert!(err.is_binary_content());
    }

    #[tokio::test]
    async fn test_exec_strips_ansi_and_reports_duration() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let result = env
            .exec("printf '\\033[32mgreen\\033[0m'", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(result.stdout, "green");
        assert_eq!(result.exit_code, 0);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_exec_runs_in_requested_cwd() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let env = LocalEnvironment::new(dir.path());
        let result = env
            .exec(
                "basename \"$PWD\"",
                ExecOptions {
                    cwd: Some("sub".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "sub");
    }

    #[tokio::test]
    async fn test_exec_truncates_long_output() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path()).with_max_output_chars(100);
        let result = env
            .exec("seq 1 10000", ExecOptions::default())
            .await
            .unwrap();
        assert!(result.truncated);
        assert!(result.stdout.starts_with("1\n2\n"));
        assert!(result.stdout.trim_end().ends_with("10000"));
        assert!(result.stdout.contains("characters truncated"));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let started = Instant::now();
        let result = env
            .exec(
                "sleep 10",
                ExecOptions {
                    timeout_seconds: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_code, 137);
        assert!(result.timed_out());
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_glob_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.write_file("src/b.rs", "").await.unwrap();
        env.write_file("src/a.rs", "").await.unwrap();
        env.write_file("target/gen.rs", "").await.unwrap();
        env.write_file("README.md", "").await.unwrap();

        let found = env
            .glob(
                "**/*.rs",
                GlobOptions {
                    ignore: vec!["target".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("src/a.rs"));
        assert!(found[1].ends_with("src/b.rs"));
        assert!(Path::new(&found[0]).is_absolute());
    }

    #[tokio::test]
    async fn test_grep_parses_matches() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.write_file("notes.txt", "alpha\nneedle one\nbeta\nneedle two\n")
            .await
            .unwrap();
        env.write_file("other.md", "needle three\n").await.unwrap();

        let matches = env
            .grep(
                "needle",
                GrepOptions {
                    include: Some("*.txt".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].path.ends_with("notes.txt"));
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].text, "needle one");

        let capped = env
            .grep(
                "needle",
                GrepOptions {
                    max_results: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_info_and_destroy() {
        let dir = tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        let info = env.info();
        assert_eq!(info.kind, EnvironmentKind::Local);
        assert!(info.sandbox_id.is_none());
        assert!(env.destroy().await.is_ok());
        assert!(env.destroy().await.is_ok());
    }
}
