//! Agent-facing tool handlers over a shared sandbox.
//!
//! Every tool resolves the caller's sandbox through the [`SandboxManager`],
//! so all tools invoked by one run (or one session) share an environment.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::approval::{request_approval, ApprovalForm, ExecGate, WorkflowStep};
use crate::config::SandboxConfig;
use crate::output::SearchMatch;
use crate::sandbox::{
    ExecOptions, ExecResult, ExecutionEnvironment, GlobOptions, GrepOptions, ResolveContext,
    SandboxManager, MAX_GLOB_RESULTS,
};
use crate::security::{canonicalize_lenient, is_within};

/// Names of the tools a [`SandboxToolkit`] serves.
pub const TOOL_NAMES: [&str; 6] = [
    "execute_command",
    "read_file",
    "write_file",
    "edit_file",
    "find_files",
    "search_text",
];

/// Per-invocation context supplied by the agent runtime.
pub struct ToolContext<'a> {
    /// Durable step handle for approvals and side effects
    pub step: &'a dyn WorkflowStep,
    /// Which sandbox the call belongs to
    pub resolve: ResolveContext,
    /// Unique id of this tool call; durable step keys derive from it
    pub call_id: String,
}

/// Input of `execute_command`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandInput {
    /// Shell command line
    pub command: String,
    /// Working directory inside the sandbox
    #[serde(default)]
    pub cwd: Option<String>,
    /// Overrides the configured timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Data piped to standard input
    #[serde(default)]
    pub stdin: Option<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Input of `read_file`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileInput {
    /// Path inside the sandbox
    pub path: String,
    /// First line to return, 1-based
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Output of `read_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileOutput {
    /// Path as requested
    pub path: String,
    /// Selected lines of the file
    pub content: String,
}

/// Input of `write_file`.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileInput {
    /// Path inside the sandbox; parents are created
    pub path: String,
    /// Full new content
    pub content: String,
}

/// Output of `write_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileOutput {
    /// Path as requested
    pub path: String,
    /// Length of the written content in bytes
    pub bytes_written: usize,
}

/// Input of `edit_file`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditFileInput {
    /// Path inside the sandbox
    pub path: String,
    /// Exact text to replace
    pub old_string: String,
    /// Replacement text
    pub new_string: String,
    /// Replace every occurrence instead of requiring a unique one
    #[serde(default)]
    pub replace_all: bool,
}

/// Output of `edit_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditFileOutput {
    /// Path as requested
    pub path: String,
    /// Number of occurrences replaced
    pub replacements: usize,
}

/// Input of `find_files`.
#[derive(Debug, Clone, Deserialize)]
pub struct FindFilesInput {
    /// Glob such as `*.rs`
    pub pattern: String,
    /// Directory to search from
    #[serde(default)]
    pub cwd: Option<String>,
    /// Path fragments to skip
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Output of `find_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindFilesOutput {
    /// Matching paths, sorted
    pub files: Vec<String>,
    /// The result cap was reached
    pub truncated: bool,
}

/// Input of `search_text`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchTextInput {
    /// Extended regular expression
    pub pattern: String,
    /// Directory to search from
    #[serde(default)]
    pub cwd: Option<String>,
    /// Only search files matching this glob
    #[serde(default)]
    pub include: Option<String>,
    /// Maximum number of hits
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Lines of context around each hit
    #[serde(default)]
    pub context_lines: Option<usize>,
}

/// Output of `search_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTextOutput {
    /// Hits and their context lines, in file order
    pub matches: Vec<SearchMatch>,
}

/// The six sandbox tools sharing one configuration.
#[derive(Debug)]
pub struct SandboxToolkit {
    manager: Arc<SandboxManager>,
    config: Arc<SandboxConfig>,
    gate: ExecGate,
    read_root: Option<PathBuf>,
}

impl SandboxToolkit {
    /// Validates `config` up front; an unimplemented backend fails here.
    pub fn new(manager: Arc<SandboxManager>, config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        let read_root = config.path_restriction_root()?;
        Ok(Self {
            manager,
            gate: ExecGate::from_config(&config),
            config: Arc::new(config),
            read_root,
        })
    }

    /// Configuration every tool runs with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The command gate, including allow-always memory.
    pub fn gate(&self) -> &ExecGate {
        &self.gate
    }

    /// Invokes a tool by name with JSON input.
    pub async fn dispatch(&self, cx: &ToolContext<'_>, tool: &str, input: Value) -> Result<Value> {
        debug!(tool, call_id = %cx.call_id, execution_id = %cx.resolve.execution_id, "Tool call");
        let output = match tool {
            "execute_command" => serde_json::to_value(
                self.execute_command(cx, parse_input(tool, input)?).await?,
            )?,
            "read_file" => {
                serde_json::to_value(self.read_file(cx, parse_input(tool, input)?).await?)?
            }
            "write_file" => {
                serde_json::to_value(self.write_file(cx, parse_input(tool, input)?).await?)?
            }
            "edit_file" => {
                serde_json::to_value(self.edit_file(cx, parse_input(tool, input)?).await?)?
            }
            "find_files" => {
                serde_json::to_value(self.find_files(cx, parse_input(tool, input)?).await?)?
            }
            "search_text" => {
                serde_json::to_value(self.search_text(cx, parse_input(tool, input)?).await?)?
            }
            other => bail!("Unknown tool: {other}"),
        };
        Ok(output)
    }

    /// Runs a shell command, subject to the security mode.
    pub async fn execute_command(
        &self,
        cx: &ToolContext<'_>,
        input: ExecuteCommandInput,
    ) -> Result<ExecResult> {
        let env = self.environment(cx).await?;
        let opts = ExecOptions {
            cwd: input.cwd,
            env: input.env.into_iter().collect(),
            timeout_seconds: input.timeout_seconds,
            stdin: input.stdin,
        };
        self.gate
            .execute(cx.step, env, &input.command, opts, &cx.call_id)
            .await
    }

    /// Reads a text file. Paths outside the restriction root need approval.
    pub async fn read_file(
        &self,
        cx: &ToolContext<'_>,
        input: ReadFileInput,
    ) -> Result<ReadFileOutput> {
        let env = self.environment(cx).await?;
        if let Some(root) = &self.read_root {
            // Compare resolved locations so symlinked directories under the
            // root cannot reach outside it.
            let host = canonicalize_lenient(&env.host_path(&input.path)?).await?;
            if !is_within(&host, &canonicalize_lenient(root).await?) {
                self.approve_file(cx, env.as_ref(), "read", &input.path)
                    .await?;
            }
        }

        let content = env.read_file(&input.path).await?;
        Ok(ReadFileOutput {
            content: select_lines(&content, input.offset, input.limit),
            path: input.path,
        })
    }

    /// Writes a file, creating parent directories.
    pub async fn write_file(
        &self,
        cx: &ToolContext<'_>,
        input: WriteFileInput,
    ) -> Result<WriteFileOutput> {
        let env = self.environment(cx).await?;
        if self.config.file_approval {
            self.approve_file(cx, env.as_ref(), "write", &input.path)
                .await?;
        }

        let value = cx
            .step
            .run(
                &cx.call_id,
                Box::pin(async {
                    env.write_file(&input.path, &input.content).await?;
                    Ok(serde_json::to_value(WriteFileOutput {
                        path: input.path.clone(),
                        bytes_written: input.content.len(),
                    })?)
                }),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Replaces `old_string` with `new_string`. The match must be unique
    /// unless `replace_all` is set.
    pub async fn edit_file(
        &self,
        cx: &ToolContext<'_>,
        input: EditFileInput,
    ) -> Result<EditFileOutput> {
        if input.old_string.is_empty() {
            bail!("old_string must not be empty");
        }
        let env = self.environment(cx).await?;
        if self.config.file_approval {
            self.approve_file(cx, env.as_ref(), "edit", &input.path)
                .await?;
        }

        let value = cx
            .step
            .run(
                &cx.call_id,
                Box::pin(async {
                    let content = env.read_file(&input.path).await?;
                    let (updated, replacements) = apply_edit(&content, &input)?;
                    env.write_file(&input.path, &updated).await?;
                    Ok(serde_json::to_value(EditFileOutput {
                        path: input.path.clone(),
                        replacements,
                    })?)
                }),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Lists files matching a glob.
    pub async fn find_files(
        &self,
        cx: &ToolContext<'_>,
        input: FindFilesInput,
    ) -> Result<FindFilesOutput> {
        let env = self.environment(cx).await?;
        let files = env
            .glob(
                &input.pattern,
                GlobOptions {
                    cwd: input.cwd,
                    ignore: input.ignore,
                },
            )
            .await?;
        Ok(FindFilesOutput {
            truncated: files.len() >= MAX_GLOB_RESULTS,
            files,
        })
    }

    /// Searches file contents with `grep`.
    pub async fn search_text(
        &self,
        cx: &ToolContext<'_>,
        input: SearchTextInput,
    ) -> Result<SearchTextOutput> {
        let env = self.environment(cx).await?;
        let matches = env
            .grep(
                &input.pattern,
                GrepOptions {
                    cwd: input.cwd,
                    include: input.include,
                    max_results: input.max_results,
                    context_lines: input.context_lines,
                },
            )
            .await?;
        Ok(SearchTextOutput { matches })
    }

    async fn environment(&self, cx: &ToolContext<'_>) -> Result<Arc<dyn ExecutionEnvironment>> {
        let sandbox = self
            .manager
            .resolve(Arc::clone(&self.config), &cx.resolve)?;
        Ok(sandbox.get_environment().await?)
    }

    async fn approve_file(
        &self,
        cx: &ToolContext<'_>,
        env: &dyn ExecutionEnvironment,
        action: &str,
        path: &str,
    ) -> Result<()> {
        let form = ApprovalForm::for_file(action, path, &env.info());
        let decision =
            request_approval(cx.step, &format!("{}:approval", cx.call_id), &form, None).await?;
        if decision.approved {
            return Ok(());
        }
        match decision.feedback.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(feedback) => bail!("File {action} of {path} rejected by user: {feedback}"),
            None => bail!("File {action} of {path} rejected by user"),
        }
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(tool: &str, input: Value) -> Result<T> {
    serde_json::from_value(input).with_context(|| format!("Invalid input for {tool}"))
}

fn select_lines(content: &str, offset: Option<usize>, limit: Option<usize>) -> String {
    if offset.is_none() && limit.is_none() {
        return content.to_string();
    }
    let skip = offset.unwrap_or(1).saturating_sub(1);
    let lines = content.lines().skip(skip);
    let selected: Vec<&str> = match limit {
        Some(limit) => lines.take(limit).collect(),
        None => lines.collect(),
    };
    selected.join("\n")
}

fn apply_edit(content: &str, input: &EditFileInput) -> Result<(String, usize)> {
    let occurrences = content.matches(input.old_string.as_str()).count();
    match occurrences {
        0 => bail!("old_string not found in {}", input.path),
        1 => Ok((content.replacen(&input.old_string, &input.new_string, 1), 1)),
        n if input.replace_all => Ok((content.replace(&input.old_string, &input.new_string), n)),
        n => bail!(
            "old_string occurs {n} times in {}; add context or set replace_all",
            input.path
        ),
    }
}
