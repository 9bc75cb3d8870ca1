//! Mock execution environment for testing.
//!
//! Counts constructions and `initialize` calls so lifecycle tests can
//! assert on coalescing without touching the host or Docker.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::environment::{
    EnvironmentFactory, EnvironmentInfo, ExecOptions, ExecResult, ExecutionEnvironment,
    GlobOptions, GrepOptions,
};
use super::{Result, SandboxError};
use crate::config::{EnvironmentKind, SandboxConfig};
use crate::output::SearchMatch;

/// Shared counters, observable after the environment is handed out.
#[derive(Debug, Default)]
pub(crate) struct MockCounters {
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl MockCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// An environment that echoes commands back instead of running them.
#[derive(Debug)]
pub(crate) struct MockEnvironment {
    counters: Arc<MockCounters>,
    init_delay: Duration,
}

#[async_trait]
impl ExecutionEnvironment for MockEnvironment {
    async fn initialize(&self) -> Result<()> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        self.counters.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exec(&self, command: &str, _opts: ExecOptions) -> Result<ExecResult> {
        Ok(ExecResult {
            stdout: command.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 0,
            truncated: false,
        })
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        Err(SandboxError::not_found(path))
    }

    async fn write_file(&self, _path: &str, _content: &str) -> Result<()> {
        Ok(())
    }

    async fn file_exists(&self, _path: &str) -> Result<bool> {
        Ok(false)
    }

    async fn glob(&self, _pattern: &str, _opts: GlobOptions) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn grep(&self, _pattern: &str, _opts: GrepOptions) -> Result<Vec<SearchMatch>> {
        Ok(Vec::new())
    }

    async fn destroy(&self) -> Result<()> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cwd(&self) -> String {
        "/mock".to_string()
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
        Ok(PathBuf::from("/mock").join(path))
    }
}

/// Factory handing out [`MockEnvironment`]s that share one set of counters.
///
/// `remote` still fails with not-implemented, like the real factory.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockFactory {
    counters: Arc<MockCounters>,
    init_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `initialize` take `delay`, widening the race window.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }
}

impl EnvironmentFactory for MockFactory {
    fn create(
        &self,
        _sandbox_id: &str,
        config: &SandboxConfig,
    ) -> Result<Arc<dyn ExecutionEnvironment>> {
        if config.env == EnvironmentKind::Remote {
            return Err(SandboxError::not_implemented(config.env.to_string()));
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockEnvironment {
            counters: Arc::clone(&self.counters),
            init_delay: self.init_delay,
        }))
    }
}
