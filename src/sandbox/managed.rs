//! A lifecycle-managed sandbox owning at most one execution environment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::environment::{EnvironmentFactory, ExecutionEnvironment};
use super::{Result, SandboxError};
use crate::config::{EnvironmentKind, SandboxConfig, Scope};

/// Serializable snapshot of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Unique sandbox id
    pub id: String,
    /// Lifetime policy
    pub scope: Scope,
    /// Environment backend
    pub env: EnvironmentKind,
    /// Worker that owns the sandbox
    pub worker_id: String,
    /// Project the sandbox works for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Session sharing the sandbox
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Executions currently attached
    pub active_executions: Vec<String>,
    /// An environment has been built
    pub initialized: bool,
    /// Destroyed and not recreated
    pub destroyed: bool,
    /// Last time the environment was handed out
    pub last_activity_at: DateTime<Utc>,
}

/// Owns one lazily built [`ExecutionEnvironment`].
///
/// Concurrent [`get_environment`](Self::get_environment) calls share one
/// construction: the slot lock is held while the environment initializes,
/// so late callers wait and then find it filled.
pub struct ManagedSandbox {
    id: String,
    scope: Scope,
    worker_id: String,
    project_id: Option<String>,
    session_id: Option<String>,
    config: Arc<SandboxConfig>,
    idle_timeout: Option<Duration>,
    factory: Arc<dyn EnvironmentFactory>,
    environment: tokio::sync::Mutex<Option<Arc<dyn ExecutionEnvironment>>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    executions: Mutex<BTreeSet<String>>,
    last_activity: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for ManagedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSandbox")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("session_id", &self.session_id)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl ManagedSandbox {
    /// Creates an uninitialized sandbox. Fails on a malformed idle timeout.
    pub fn new(
        id: impl Into<String>,
        config: Arc<SandboxConfig>,
        factory: Arc<dyn EnvironmentFactory>,
    ) -> Result<Self> {
        let idle_timeout = config.idle_timeout()?;
        Ok(Self {
            id: id.into(),
            scope: config.scope,
            worker_id: config.worker_id.clone().unwrap_or_default(),
            project_id: config.project_id.clone(),
            session_id: None,
            config,
            idle_timeout,
            factory,
            environment: tokio::sync::Mutex::new(None),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            executions: Mutex::new(BTreeSet::new()),
            last_activity: Mutex::new(Utc::now()),
        })
    }

    /// Stamps the owning worker.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Overrides the configured project id when set.
    #[must_use]
    pub fn with_project_id(mut self, project_id: Option<String>) -> Self {
        if project_id.is_some() {
            self.project_id = project_id;
        }
        self
    }

    /// Session the sandbox is shared under.
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Unique id of this sandbox.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lifetime policy.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Session id for session-scoped sandboxes.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Configuration the environment is built from.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// True once destroyed and until recreated.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// True while an environment is built and live.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The environment, built and initialized on first call.
    pub async fn get_environment(&self) -> Result<Arc<dyn ExecutionEnvironment>> {
        self.ensure_live()?;
        let mut slot = self.environment.lock().await;
        // Destroy may have won the lock while we waited.
        self.ensure_live()?;

        if let Some(env) = slot.as_ref() {
            self.touch();
            return Ok(Arc::clone(env));
        }

        debug!(sandbox_id = %self.id, env = %self.config.env, "Building environment");
        let env = self.factory.create(&self.id, &self.config)?;
        env.initialize().await?;

        *slot = Some(Arc::clone(&env));
        self.initialized.store(true, Ordering::SeqCst);
        self.touch();
        info!(sandbox_id = %self.id, env = %self.config.env, "Sandbox environment ready");
        Ok(env)
    }

    /// Records `execution_id` as using this sandbox.
    pub fn attach_execution(&self, execution_id: &str) {
        self.lock_executions().insert(execution_id.to_string());
    }

    /// Removes `execution_id`; unknown ids are ignored.
    pub fn detach_execution(&self, execution_id: &str) {
        self.lock_executions().remove(execution_id);
    }

    /// Whether `execution_id` is attached.
    pub fn has_execution(&self, execution_id: &str) -> bool {
        self.lock_executions().contains(execution_id)
    }

    /// Attached execution ids, sorted.
    pub fn active_executions(&self) -> Vec<String> {
        self.lock_executions().iter().cloned().collect()
    }

    /// Tears down the environment, if any, and marks the sandbox destroyed.
    ///
    /// Idempotent. Environment teardown failures are logged, not returned.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let env = self.environment.lock().await.take();
        self.initialized.store(false, Ordering::SeqCst);

        if let Some(env) = env {
            if let Err(e) = env.destroy().await {
                warn!(sandbox_id = %self.id, "Failed to destroy environment: {}", e);
            }
        }
        debug!(sandbox_id = %self.id, "Sandbox destroyed");
    }

    /// Clears the destroyed flag. The next `get_environment` builds anew.
    pub async fn recreate(&self) {
        let old = {
            let mut slot = self.environment.lock().await;
            let old = slot.take();
            self.initialized.store(false, Ordering::SeqCst);
            self.destroyed.store(false, Ordering::SeqCst);
            old
        };
        if let Some(old) = old {
            if let Err(e) = old.destroy().await {
                warn!(sandbox_id = %self.id, "Failed to destroy replaced environment: {}", e);
            }
        }
        self.touch();
        debug!(sandbox_id = %self.id, "Sandbox recreated");
    }

    /// Last time the environment was handed out.
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True when an idle timeout is configured and has elapsed at `now`.
    pub fn is_idle_at(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.idle_timeout else {
            return false;
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return false;
        };
        now - self.last_activity() > timeout
    }

    /// Point-in-time snapshot.
    pub fn info(&self) -> SandboxInfo {
        SandboxInfo {
            id: self.id.clone(),
            scope: self.scope,
            env: self.config.env,
            worker_id: self.worker_id.clone(),
            project_id: self.project_id.clone(),
            session_id: self.session_id.clone(),
            active_executions: self.active_executions(),
            initialized: self.is_initialized(),
            destroyed: self.is_destroyed(),
            last_activity_at: self.last_activity(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(SandboxError::destroyed(&self.id))
        } else {
            Ok(())
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    fn lock_executions(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalConfig;
    use crate::sandbox::environment::{DefaultEnvironmentFactory, ExecOptions};
    use crate::sandbox::mock::MockFactory;

    fn sandbox_with(factory: &MockFactory, config: SandboxConfig) -> ManagedSandbox {
        ManagedSandbox::new("sb-test", Arc::new(config), Arc::new(factory.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_get_environment_builds_once() {
        let factory = MockFactory::new().with_init_delay(Duration::from_millis(50));
        let sandbox = sandbox_with(&factory, SandboxConfig::default());

        let (a, b) = tokio::join!(sandbox.get_environment(), sandbox.get_environment());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.counters().created(), 1);
        assert_eq!(factory.counters().initialized(), 1);
        assert!(sandbox.is_initialized());
    }

    #[tokio::test]
    async fn test_concurrent_get_environment_across_tasks() {
        let factory = MockFactory::new().with_init_delay(Duration::from_millis(50));
        let sandbox = Arc::new(sandbox_with(&factory, SandboxConfig::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sandbox = Arc::clone(&sandbox);
                tokio::spawn(async move { sandbox.get_environment().await.unwrap() })
            })
            .collect();
        let mut envs = Vec::new();
        for handle in handles {
            envs.push(handle.await.unwrap());
        }

        assert!(envs.iter().all(|env| Arc::ptr_eq(env, &envs[0])));
        assert_eq!(factory.counters().initialized(), 1);
    }

    #[tokio::test]
    async fn test_destroy_then_get_fails() {
        let factory = MockFactory::new();
        let sandbox = sandbox_with(&factory, SandboxConfig::default());
        sandbox.get_environment().await.unwrap();

        sandbox.destroy().await;
        assert!(sandbox.is_destroyed());
        assert!(!sandbox.is_initialized());
        assert_eq!(factory.counters().destroyed(), 1);

        let err = sandbox.get_environment().await.unwrap_err();
        assert!(err.is_destroyed());
        assert_eq!(factory.counters().created(), 1);
    }

    #[tokio::test]
    async fn test_destroy_during_construction() {
        let factory = MockFactory::new().with_init_delay(Duration::from_millis(50));
        let sandbox = sandbox_with(&factory, SandboxConfig::default());

        let (in_flight, ()) = tokio::join!(sandbox.get_environment(), sandbox.destroy());

        // The call already under way completes against the environment it built.
        let env = in_flight.unwrap();
        let result = env.exec("echo still here", ExecOptions::default()).await.unwrap();
        assert_eq!(result.stdout, "echo still here");

        assert!(sandbox.is_destroyed());
        assert!(!sandbox.is_initialized());
        assert_eq!(factory.counters().created(), 1);
        assert_eq!(factory.counters().destroyed(), 1);

        let err = sandbox.get_environment().await.unwrap_err();
        assert!(err.is_destroyed());
        assert_eq!(factory.counters().created(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_safe_before_init() {
        let factory = MockFactory::new();
        let sandbox = sandbox_with(&factory, SandboxConfig::default());

        sandbox.destroy().await;
        sandbox.destroy().await;

        assert!(sandbox.is_destroyed());
        assert_eq!(factory.counters().destroyed(), 0);
    }

    #[tokio::test]
    async fn test_recreate_builds_new_environment() {
        let factory = MockFactory::new();
        let sandbox = sandbox_with(&factory, SandboxConfig::default());
        let first = sandbox.get_environment().await.unwrap();

        sandbox.destroy().await;
        sandbox.recreate().await;
        assert!(!sandbox.is_destroyed());
        // Lazy: nothing is built until the next request.
        assert_eq!(factory.counters().created(), 1);

        let second = sandbox.get_environment().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.counters().created(), 2);
        assert_eq!(factory.counters().initialized(), 2);
    }

    #[tokio::test]
    async fn test_recreate_live_sandbox_discards_environment() {
        let factory = MockFactory::new();
        let sandbox = sandbox_with(&factory, SandboxConfig::default());
        sandbox.get_environment().await.unwrap();

        sandbox.recreate().await;

        assert!(!sandbox.is_initialized());
        assert_eq!(factory.counters().destroyed(), 1);
    }

    #[tokio::test]
    async fn test_remote_environment_not_implemented() {
        let config = SandboxConfig {
            env: EnvironmentKind::Remote,
            ..Default::default()
        };
        let sandbox = ManagedSandbox::new(
            "sb-remote",
            Arc::new(config),
            Arc::new(DefaultEnvironmentFactory),
        )
        .unwrap();

        let err = sandbox.get_environment().await.unwrap_err();
        assert!(err.is_not_implemented());
        assert!(!sandbox.is_initialized());
        assert!(!sandbox.is_destroyed());
    }

    #[tokio::test]
    async fn test_local_environment_through_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            local: LocalConfig {
                cwd: Some(dir.path().to_string_lossy().into_owned()),
            },
            ..Default::default()
        };
        let sandbox =
            ManagedSandbox::new("sb-local", Arc::new(config), Arc::new(DefaultEnvironmentFactory))
                .unwrap();

        let env = sandbox.get_environment().await.unwrap();
        let result = env.exec("echo hello", ExecOptions::default()).await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_attach_and_detach_executions() {
        let sandbox = sandbox_with(&MockFactory::new(), SandboxConfig::default());
        sandbox.attach_execution("run-1");
        sandbox.attach_execution("run-2");
        sandbox.detach_execution("run-1");
        sandbox.detach_execution("unknown");

        assert_eq!(sandbox.active_executions(), vec!["run-2".to_string()]);
        assert!(sandbox.has_execution("run-2"));
        assert!(!sandbox.has_execution("run-1"));
    }

    #[test]
    fn test_is_idle_at() {
        let config = SandboxConfig {
            idle_destroy_timeout: Some("30m".to_string()),
            ..Default::default()
        };
        let sandbox = sandbox_with(&MockFactory::new(), config);
        let now = Utc::now();

        assert!(!sandbox.is_idle_at(now));
        sandbox.set_last_activity(now - chrono::Duration::minutes(31));
        assert!(sandbox.is_idle_at(now));
    }

    #[test]
    fn test_never_idle_without_timeout() {
        let sandbox = sandbox_with(&MockFactory::new(), SandboxConfig::default());
        sandbox.set_last_activity(Utc::now() - chrono::Duration::days(30));
        assert!(!sandbox.is_idle_at(Utc::now()));
    }

    #[test]
    fn test_malformed_idle_timeout_rejected() {
        let config = SandboxConfig {
            idle_destroy_timeout: Some("soon".to_string()),
            ..Default::default()
        };
        let err = ManagedSandbox::new(
            "sb",
            Arc::new(config),
            Arc::new(MockFactory::new()),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_info_snapshot() {
        let config = SandboxConfig {
            scope: Scope::Session,
            project_id: Some("proj".to_string()),
            ..Default::default()
        };
        let sandbox = sandbox_with(&MockFactory::new(), config)
            .with_worker_id("worker-a")
            .with_session_id(Some("sess-1".to_string()));
        sandbox.attach_execution("run-1");

        let info = sandbox.info();
        assert_eq!(info.id, "sb-test");
        assert_eq!(info.scope, Scope::Session);
        assert_eq!(info.worker_id, "worker-a");
        assert_eq!(info.project_id.as_deref(), Some("proj"));
        assert_eq!(info.session_id.as_deref(), Some("sess-1"));
        assert_eq!(info.active_executions, vec!["run-1".to_string()]);
        assert!(!info.initialized);
        assert!(!info.destroyed);
    }
}
