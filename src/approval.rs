//! Human approval for command execution.
//!
//! Commands that are not pre-approved suspend the calling workflow step
//! with a form describing the command. The resume payload decides whether
//! the command runs. A rejection is not an error: the agent gets a failed
//! [`ExecResult`] carrying the reviewer's feedback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::config::{SandboxConfig, SecurityMode};
use crate::sandbox::{EnvironmentInfo, ExecOptions, ExecResult, ExecutionEnvironment};
use crate::security::matches_allowlist;

/// Payload for [`WorkflowStep::suspend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRequest {
    /// Form shown to the reviewer
    pub data: Value,
    /// Give up waiting after this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// The durable execution engine's step handle.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Runs `f` at most once per `key` within a workflow run, returning the
    /// recorded value on replay.
    async fn run(&self, key: &str, f: BoxFuture<'_, Result<Value>>) -> Result<Value>;

    /// Pauses the workflow until an external resume supplies a value.
    async fn suspend(&self, key: &str, request: SuspendRequest) -> Result<Value>;
}

/// Input widget for a [`FormField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Yes/no toggle
    Boolean,
    /// Free text
    Text,
}

/// One input of an [`ApprovalForm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    /// Key of the value in the resume payload
    pub name: String,
    /// Label shown to the reviewer
    pub label: String,
    /// Widget type
    pub kind: FieldKind,
    /// Must be answered
    pub required: bool,
}

impl FormField {
    fn new(name: &str, label: &str, kind: FieldKind, required: bool) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            required,
        }
    }
}

/// Structured description rendered by an approval UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalForm {
    /// Short heading
    pub title: String,
    /// What is being asked
    pub description: String,
    /// Inputs expected in the decision
    pub fields: Vec<FormField>,
    /// Machine-readable details of the request
    pub context: Value,
}

impl ApprovalForm {
    /// Form asking whether `command` may run in `env`.
    pub fn for_command(command: &str, env: &EnvironmentInfo) -> Self {
        Self {
            title: "Approve command".to_string(),
            description: format!("Run `{command}` in {} ({})?", env.cwd, env.kind),
            fields: decision_fields(true),
            context: serde_json::json!({
                "command": command,
                "cwd": env.cwd,
                "environment": env.kind,
            }),
        }
    }

    /// Form asking whether a file operation may proceed.
    pub fn for_file(action: &str, path: &str, env: &EnvironmentInfo) -> Self {
        Self {
            title: format!("Approve file {action}"),
            description: format!("Allow {action} of {path} in {} ({})?", env.cwd, env.kind),
            fields: decision_fields(false),
            context: serde_json::json!({
                "action": action,
                "path": path,
                "cwd": env.cwd,
                "environment": env.kind,
            }),
        }
    }
}

fn decision_fields(offer_allow_always: bool) -> Vec<FormField> {
    let mut fields = vec![FormField::new(
        "approved",
        "Approve",
        FieldKind::Boolean,
        true,
    )];
    if offer_allow_always {
        fields.push(FormField::new(
            "allowAlways",
            "Always allow this command",
            FieldKind::Boolean,
            false,
        ));
    }
    fields.push(FormField::new(
        "feedback",
        "Feedback for the agent",
        FieldKind::Text,
        false,
    ));
    fields
}

/// Resume payload of an approval suspension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Whether the operation may proceed
    pub approved: bool,
    /// Remember this command for the rest of the session
    #[serde(default)]
    pub allow_always: bool,
    /// Message relayed to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ApprovalDecision {
    /// An approval without feedback.
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Default::default()
        }
    }

    /// A rejection carrying `feedback` for the agent.
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            allow_always: false,
            feedback: Some(feedback.into()),
        }
    }
}

/// Suspends `step` with `form` and decodes the decision.
pub async fn request_approval(
    step: &dyn WorkflowStep,
    key: &str,
    form: &ApprovalForm,
    timeout_seconds: Option<u64>,
) -> Result<ApprovalDecision> {
    let request = SuspendRequest {
        data: serde_json::to_value(form)?,
        timeout_seconds,
    };
    let resume = step.suspend(key, request).await?;
    serde_json::from_value(resume).context("Malformed approval decision")
}

/// Applies the security mode to command execution.
#[derive(Debug)]
pub struct ExecGate {
    mode: SecurityMode,
    allowlist: Vec<String>,
    /// Exact commands a reviewer chose to always allow
    remembered: Mutex<Vec<String>>,
    timeout_seconds: Option<u64>,
}

impl ExecGate {
    /// Gate with an explicit mode and allowlist.
    pub fn new(mode: SecurityMode, allowlist: Vec<String>) -> Self {
        Self {
            mode,
            allowlist,
            remembered: Mutex::new(Vec::new()),
            timeout_seconds: None,
        }
    }

    /// Gate using the configured mode and allowlist.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.security_mode(), config.exec.allowlist.clone())
    }

    /// How long a suspension may wait for a decision.
    #[must_use]
    pub fn with_approval_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Effective security mode.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// True when `command` must be approved before it runs.
    pub fn needs_approval(&self, command: &str) -> bool {
        match self.mode {
            SecurityMode::AllowAlways => false,
            SecurityMode::ApprovalAlways => !self.is_remembered(command),
            SecurityMode::Allowlist => {
                !(matches_allowlist(command, &self.allowlist) || self.is_remembered(command))
            }
        }
    }

    /// Runs `command`, asking for approval first when required.
    ///
    /// `key` identifies the durable step; the suspension uses `{key}:approval`.
    pub async fn execute(
        &self,
        step: &dyn WorkflowStep,
        env: Arc<dyn ExecutionEnvironment>,
        command: &str,
        opts: ExecOptions,
        key: &str,
    ) -> Result<ExecResult> {
        if self.needs_approval(command) {
            let form = ApprovalForm::for_command(command, &env.info());
            let decision = request_approval(
                step,
                &format!("{key}:approval"),
                &form,
                self.timeout_seconds,
            )
            .await?;

            if !decision.approved {
                info!(command, "Command rejected");
                return Ok(ExecResult::rejected(decision.feedback.as_deref()));
            }
            if decision.allow_always {
                self.remember(command);
            }
            debug!(command, "Command approved");
        }

        let value = step
            .run(
                key,
                Box::pin(async move {
                    let result = env.exec(command, opts).await?;
                    Ok(serde_json::to_value(result)?)
                }),
            )
            .await?;
        serde_json::from_value(value).context("Malformed exec result")
    }

    fn is_remembered(&self, command: &str) -> bool {
        let command = command.trim();
        self.lock_remembered().iter().any(|c| c == command)
    }

    fn remember(&self, command: &str) {
        let command = command.trim().to_string();
        let mut remembered = self.lock_remembered();
        if !remembered.contains(&command) {
            info!(command = %command, "Command added to allow-always list");
            remembered.push(command);
        }
    }

    fn lock_remembered(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.remembered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
