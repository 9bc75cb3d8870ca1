//! CLI command implementations.
//!
//! Each command opens a [`Session`]: one execution-scoped sandbox that is
//! torn down when the command finishes. Commands return the process exit
//! code.

pub mod check;
pub mod console;
pub mod exec;
pub mod files;
pub mod info;
pub mod search;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use agentbox::config::{EnvironmentKind, SandboxConfig};
use agentbox::sandbox::{ResolveContext, SandboxManager};
use agentbox::tools::{SandboxToolkit, ToolContext};

use console::ConsoleStep;

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    pub dir: Option<PathBuf>,
    pub env: Option<EnvironmentKind>,
    pub yes: bool,
}

impl GlobalOpts {
    pub fn project_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to get current directory"),
        }
    }

    /// Loads `agentbox.toml` and applies command-line overrides.
    pub fn load_config(&self) -> Result<SandboxConfig> {
        let project_dir = self.project_dir()?;
        let mut config = SandboxConfig::load(&project_dir)?;
        if let Some(env) = self.env {
            config.env = env;
        }
        if config.local.cwd.is_none() {
            config.local.cwd = Some(project_dir.to_string_lossy().into_owned());
        }
        if config.docker.workspace_dir.is_none() {
            config.docker.workspace_dir = Some(project_dir.to_string_lossy().into_owned());
        }
        Ok(config)
    }
}

/// One command invocation bound to its own sandbox.
pub struct Session {
    manager: Arc<SandboxManager>,
    toolkit: SandboxToolkit,
    step: ConsoleStep,
    execution_id: String,
}

impl Session {
    pub fn open(opts: &GlobalOpts) -> Result<Self> {
        let config = opts.load_config()?;
        let manager = Arc::new(SandboxManager::new());
        if let Some(worker) = &config.worker_id {
            manager.set_worker_id(worker.clone());
        }
        let toolkit = SandboxToolkit::new(Arc::clone(&manager), config)?;
        Ok(Self {
            manager,
            toolkit,
            step: ConsoleStep::new(opts.yes),
            execution_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn toolkit(&self) -> &SandboxToolkit {
        &self.toolkit
    }

    pub fn context(&self, call_id: &str) -> ToolContext<'_> {
        ToolContext {
            step: &self.step,
            resolve: ResolveContext::new(self.execution_id.clone()),
            call_id: call_id.to_string(),
        }
    }

    /// Completes the execution, destroying its sandbox.
    pub async fn close(self) {
        self.manager.on_execution_complete(&self.execution_id).await;
    }
}
