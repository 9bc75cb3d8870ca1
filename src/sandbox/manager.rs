//! Registry of live sandboxes and the idle sweep.
//!
//! The manager is the only place sandboxes are created and destroyed. Three
//! indices live behind one lock and are always updated together:
//! sandboxes by id, session id to sandbox id (session-scoped sandboxes
//! only) and execution id to the ids of every sandbox it resolved.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::environment::{DefaultEnvironmentFactory, EnvironmentFactory};
use super::managed::{ManagedSandbox, SandboxInfo};
use super::{Result, SandboxError};
use crate::config::{SandboxConfig, Scope};

/// Identifies the caller of [`SandboxManager::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// The agent run asking for a sandbox
    pub execution_id: String,
    /// Required for session-scoped sandboxes
    pub session_id: Option<String>,
    /// Project the run works on behalf of
    pub project_id: Option<String>,
}

impl ResolveContext {
    /// Context for an execution without a session.
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            ..Default::default()
        }
    }

    /// Adds the session id used by session-scoped sandboxes.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Default)]
struct Registry {
    sandboxes: HashMap<String, Arc<ManagedSandbox>>,
    sessions: HashMap<String, String>,
    executions: HashMap<String, BTreeSet<String>>,
}

impl Registry {
    fn live(&self, sandbox_id: Option<&String>) -> Option<Arc<ManagedSandbox>> {
        sandbox_id
            .and_then(|id| self.sandboxes.get(id))
            .filter(|sandbox| !sandbox.is_destroyed())
            .cloned()
    }

    fn insert(&mut self, sandbox: Arc<ManagedSandbox>) {
        if let Some(session) = sandbox.session_id() {
            self.sessions
                .insert(session.to_string(), sandbox.id().to_string());
        }
        self.sandboxes.insert(sandbox.id().to_string(), sandbox);
    }

    fn remove(&mut self, sandbox_id: &str) -> Option<Arc<ManagedSandbox>> {
        let sandbox = self.sandboxes.remove(sandbox_id)?;
        self.sessions.retain(|_, id| id != sandbox_id);
        self.executions.retain(|_, ids| {
            ids.remove(sandbox_id);
            !ids.is_empty()
        });
        Some(sandbox)
    }
}

/// Creates, indexes and reclaims sandboxes.
pub struct SandboxManager {
    registry: Mutex<Registry>,
    worker_id: Mutex<String>,
    factory: Arc<dyn EnvironmentFactory>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("sandboxes", &self.len())
            .field("worker_id", &self.worker_id())
            .finish_non_exhaustive()
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxManager {
    /// Manager building real environments.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultEnvironmentFactory))
    }

    /// Uses `factory` to build every sandbox's environment.
    pub fn with_factory(factory: Arc<dyn EnvironmentFactory>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            worker_id: Mutex::new(String::new()),
            factory,
            sweep: Mutex::new(None),
        }
    }

    /// Finds or creates the sandbox for this caller and attaches the execution.
    ///
    /// Session scope reuses the sandbox registered for the session id.
    /// Execution scope gives each execution id its own sandbox.
    pub fn resolve(
        &self,
        config: Arc<SandboxConfig>,
        ctx: &ResolveContext,
    ) -> Result<Arc<ManagedSandbox>> {
        let session_id = match config.scope {
            Scope::Session => Some(ctx.session_id.clone().ok_or_else(|| {
                SandboxError::config("Session-scoped sandbox requires a session id")
            })?),
            Scope::Execution => None,
        };

        let mut registry = self.lock_registry();
        let existing = match session_id.as_ref() {
            Some(session) => registry.live(registry.sessions.get(session)),
            None => registry
                .executions
                .get(&ctx.execution_id)
                .into_iter()
                .flatten()
                .filter_map(|id| registry.live(Some(id)))
                .find(|sandbox| sandbox.scope() == Scope::Execution),
        };

        let sandbox = match existing {
            Some(sandbox) => sandbox,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let project_id = ctx.project_id.clone();
                let mut sandbox =
                    ManagedSandbox::new(id, Arc::clone(&config), Arc::clone(&self.factory))?
                        .with_project_id(project_id)
                        .with_session_id(session_id);
                let worker_id = self.worker_id();
                if !worker_id.is_empty() {
                    sandbox = sandbox.with_worker_id(worker_id);
                }
                let sandbox = Arc::new(sandbox);
                // A destroyed sandbox may still hold the session key.
                if let Some(stale) = sandbox
                    .session_id()
                    .and_then(|s| registry.sessions.get(s).cloned())
                {
                    registry.remove(&stale);
                }
                info!(
                    sandbox_id = %sandbox.id(),
                    scope = %config.scope,
                    env = %config.env,
                    execution_id = %ctx.execution_id,
                    "Created sandbox"
                );
                registry.insert(Arc::clone(&sandbox));
                sandbox
            }
        };

        sandbox.attach_execution(&ctx.execution_id);
        registry
            .executions
            .entry(ctx.execution_id.clone())
            .or_default()
            .insert(sandbox.id().to_string());
        Ok(sandbox)
    }

    /// Looks up a registered sandbox by id.
    pub fn get(&self, sandbox_id: &str) -> Option<Arc<ManagedSandbox>> {
        self.lock_registry().sandboxes.get(sandbox_id).cloned()
    }

    /// The sandbox registered for a session, if any.
    pub fn get_by_session(&self, session_id: &str) -> Option<Arc<ManagedSandbox>> {
        let registry = self.lock_registry();
        registry
            .sessions
            .get(session_id)
            .and_then(|id| registry.sandboxes.get(id))
            .cloned()
    }

    /// Detaches the execution from every sandbox it resolved. Execution-scoped
    /// sandboxes left without executions are destroyed; session-scoped ones
    /// stay alive.
    pub async fn on_execution_complete(&self, execution_id: &str) {
        let finished: Vec<_> = {
            let mut registry = self.lock_registry();
            let Some(sandbox_ids) = registry.executions.remove(execution_id) else {
                debug!(execution_id, "No sandbox for completed execution");
                return;
            };
            let mut finished = Vec::new();
            for sandbox_id in sandbox_ids {
                let Some(sandbox) = registry.sandboxes.get(&sandbox_id).cloned() else {
                    continue;
                };
                sandbox.detach_execution(execution_id);
                if sandbox.scope() == Scope::Execution && sandbox.active_executions().is_empty() {
                    finished.extend(registry.remove(&sandbox_id));
                }
            }
            finished
        };

        for sandbox in finished {
            debug!(sandbox_id = %sandbox.id(), execution_id, "Execution complete, destroying sandbox");
            sandbox.destroy().await;
        }
    }

    /// Destroys and unregisters a sandbox. Unknown ids are ignored.
    pub async fn destroy(&self, sandbox_id: &str) {
        let removed = self.lock_registry().remove(sandbox_id);
        match removed {
            Some(sandbox) => sandbox.destroy().await,
            None => debug!(sandbox_id, "Destroy requested for unknown sandbox"),
        }
    }

    /// Destroys and unregisters every sandbox.
    pub async fn destroy_all(&self) {
        let all: Vec<_> = {
            let mut registry = self.lock_registry();
            registry.sessions.clear();
            registry.executions.clear();
            registry.sandboxes.drain().map(|(_, sandbox)| sandbox).collect()
        };
        if !all.is_empty() {
            info!("Destroying {} sandbox(es)", all.len());
        }
        for sandbox in all {
            sandbox.destroy().await;
        }
    }

    /// Destroys every sandbox idle past its configured timeout.
    ///
    /// Returns how many were reclaimed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Utc::now();
        let idle: Vec<_> = {
            let mut registry = self.lock_registry();
            let ids: Vec<String> = registry
                .sandboxes
                .values()
                .filter(|sandbox| sandbox.is_idle_at(now))
                .map(|sandbox| sandbox.id().to_string())
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };

        for sandbox in &idle {
            info!(sandbox_id = %sandbox.id(), scope = %sandbox.scope(), "Reclaiming idle sandbox");
            sandbox.destroy().await;
        }
        idle.len()
    }

    /// Runs [`sweep_idle`](Self::sweep_idle) every `interval`.
    ///
    /// Replaces (and stops) any sweep already running. The task holds a weak
    /// reference and exits once the manager is dropped.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep_idle().await;
            }
        });

        let previous = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(interval_ms = period.as_millis(), "Idle sweep started");
    }

    /// Stops the idle sweep. No-op when none is running.
    pub fn stop_sweep(&self) {
        let handle = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Idle sweep stopped");
        }
    }

    /// True while a sweep task is alive.
    pub fn is_sweeping(&self) -> bool {
        self.sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Worker identity for sandboxes created from now on.
    pub fn set_worker_id(&self, worker_id: impl Into<String>) {
        *self
            .worker_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = worker_id.into();
    }

    /// Current worker identity; empty when unset.
    pub fn worker_id(&self) -> String {
        self.worker_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshots of all registered sandboxes, ordered by id.
    pub fn list(&self) -> Vec<SandboxInfo> {
        let mut infos: Vec<_> = self
            .lock_registry()
            .sandboxes
            .values()
            .map(|sandbox| sandbox.info())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of registered sandboxes.
    pub fn len(&self) -> usize {
        self.lock_registry().sandboxes.len()
    }

    /// True when no sandbox is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        self.stop_sweep();
    }
}
