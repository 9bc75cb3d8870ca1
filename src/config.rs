//! Sandbox configuration loaded from `agentbox.toml`.
//!
//! Every field has a default, so an empty or missing file yields a local,
//! execution-scoped sandbox that asks before running commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::{NetworkMode, SandboxError};

/// File name looked up in the project directory by [`SandboxConfig::load`].
pub const CONFIG_FILE: &str = "agentbox.toml";

/// Default hard timeout for a single command.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;

/// Default character budget for command output handed to a model.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 100_000;

/// Lifetime of a sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Torn down when the agent run that created it completes.
    #[default]
    Execution,
    /// Shared by every run carrying the same session id.
    Session,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// Which execution environment backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Commands run directly on the host.
    #[default]
    Local,
    /// Commands run inside a Docker container.
    Docker,
    /// Remote VM backend. Not implemented.
    Remote,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Docker => write!(f, "docker"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for EnvironmentKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "docker" | "container" => Ok(Self::Docker),
            "remote" => Ok(Self::Remote),
            _ => Err(SandboxError::config(format!(
                "Unknown environment type: '{s}'. Supported: local, docker, remote"
            ))),
        }
    }
}

/// How `exec` requests are gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// Every command runs unattended.
    AllowAlways,
    /// Every command waits for a human decision.
    ApprovalAlways,
    /// Commands matching the allowlist run unattended, the rest wait.
    Allowlist,
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowAlways => write!(f, "allow-always"),
            Self::ApprovalAlways => write!(f, "approval-always"),
            Self::Allowlist => write!(f, "allowlist"),
        }
    }
}

/// Sandbox settings, usually loaded from [`CONFIG_FILE`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Sandbox lifetime
    #[serde(default)]
    pub scope: Scope,

    /// Environment backend: "local", "docker" or "remote"
    #[serde(default)]
    pub env: EnvironmentKind,

    /// Idle time after which the sweep reclaims the sandbox (e.g. "30m", "0.5h")
    #[serde(default)]
    pub idle_destroy_timeout: Option<String>,

    /// Project the sandbox works on behalf of
    #[serde(default)]
    pub project_id: Option<String>,

    /// Worker identity stamped onto new sandboxes
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Local environment options
    #[serde(default)]
    pub local: LocalConfig,

    /// Docker environment options
    #[serde(default)]
    pub docker: DockerConfig,

    /// Command execution policy
    #[serde(default)]
    pub exec: ExecConfig,

    /// Ask before every write or edit
    #[serde(default)]
    pub file_approval: bool,

    /// Root directory file operations are confined to
    #[serde(default)]
    pub path_restriction: Option<String>,
}

/// Options for the local environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Working directory (defaults to the process working directory)
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Options for the Docker environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker image to use
    #[serde(default = "default_image")]
    pub image: String,

    /// Host directory bind-mounted into the container
    #[serde(default)]
    pub workspace_dir: Option<String>,

    /// Mount point of the workspace inside the container
    #[serde(default = "default_container_workdir")]
    pub container_workdir: String,

    /// Network mode
    #[serde(default)]
    pub network: NetworkMode,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Environment variables set on the container
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Additional volume mounts
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            workspace_dir: None,
            container_workdir: default_container_workdir(),
            network: NetworkMode::default(),
            resources: ResourceConfig::default(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }
}

/// Extra bind mount for the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Host path; `~` is expanded
    pub host: String,
    /// Absolute path inside the container
    pub container: String,
    /// Mount read-only (the default)
    #[serde(default = "default_true")]
    pub readonly: bool,
}

/// Container resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "2g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "2")
    #[serde(default = "default_cpus")]
    pub cpus: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
        }
    }
}

/// Command execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Security mode; unset means the environment's default
    #[serde(default)]
    pub security: Option<SecurityMode>,

    /// Glob-style command patterns that run without approval
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Hard timeout per command
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,

    /// Output character budget before head/tail truncation
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            security: None,
            allowlist: Vec::new(),
            timeout_seconds: default_exec_timeout(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "ubuntu:24.04".to_string()
}

fn default_container_workdir() -> String {
    "/workspace".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> String {
    "2".to_string()
}

fn default_exec_timeout() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}

fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

impl SandboxConfig {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Checks everything that can be checked without touching the host.
    pub fn validate(&self) -> Result<(), SandboxError> {
        self.idle_timeout()?;
        if self.env == EnvironmentKind::Remote {
            return Err(SandboxError::not_implemented(self.env.to_string()));
        }
        Ok(())
    }

    /// Parsed `idle_destroy_timeout`, if configured.
    pub fn idle_timeout(&self) -> Result<Option<Duration>, SandboxError> {
        self.idle_destroy_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }

    /// Effective security mode. Host execution defaults to asking first.
    pub fn security_mode(&self) -> SecurityMode {
        self.exec.security.unwrap_or(match self.env {
            EnvironmentKind::Local => SecurityMode::ApprovalAlways,
            EnvironmentKind::Docker | EnvironmentKind::Remote => SecurityMode::AllowAlways,
        })
    }

    /// Command timeout as a `Duration`.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec.timeout_seconds)
    }

    /// Expanded path restriction root.
    pub fn path_restriction_root(&self) -> Result<Option<PathBuf>, SandboxError> {
        self.path_restriction.as_deref().map(expand_path).transpose()
    }
}

/// Parse a duration string such as `"30m"`, `"1h"`, `"3d"` or `"0.5h"`.
///
/// Supported units: `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration(input: &str) -> Result<Duration, SandboxError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| SandboxError::config(format!("Duration '{input}' is missing a unit")))?;
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| SandboxError::config(format!("Invalid duration: '{input}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(SandboxError::config(format!("Invalid duration: '{input}'")));
    }

    let millis_per_unit = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => {
            return Err(SandboxError::config(format!(
                "Invalid duration unit '{unit}' in '{input}'. Supported: ms, s, m, h, d"
            )))
        }
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_millis((value * millis_per_unit).round() as u64))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> Result<PathBuf, SandboxError> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SandboxError::config("Could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}
