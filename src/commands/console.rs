//! Terminal approval prompts.
//!
//! Stands in for a durable workflow engine: steps run inline and a
//! suspension becomes a question on the terminal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::debug;

use agentbox::approval::{ApprovalDecision, ApprovalForm, SuspendRequest, WorkflowStep};

/// A reviewer's answer to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Always,
}

/// Parse a prompt reply. Anything unrecognised is `None`.
pub fn parse_answer(reply: &str, offer_always: bool) -> Option<Answer> {
    match reply.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(Answer::Yes),
        "n" | "no" | "" => Some(Answer::No),
        "a" | "always" if offer_always => Some(Answer::Always),
        _ => None,
    }
}

pub struct ConsoleStep {
    auto_approve: bool,
    stdin: Mutex<BufReader<Stdin>>,
}

impl ConsoleStep {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    /// Reads one line; `None` at end of input.
    async fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .stdin
            .lock()
            .await
            .read_line(&mut line)
            .await
            .context("Failed to read from stdin")?;
        Ok((read > 0).then_some(line))
    }

    async fn ask(&self, form: &ApprovalForm) -> Result<ApprovalDecision> {
        let offer_always = form.fields.iter().any(|f| f.name == "allowAlways");
        let choices = if offer_always {
            "[y]es / [N]o / [a]lways"
        } else {
            "[y]es / [N]o"
        };

        eprintln!("\n{} {}", "?".yellow().bold(), form.title.bold());
        eprintln!("  {}", form.description);

        let answer = loop {
            eprint!("  {} ", format!("{choices}:").cyan());
            std::io::stderr().flush().ok();
            let Some(reply) = self.read_line().await? else {
                break Answer::No;
            };
            match parse_answer(&reply, offer_always) {
                Some(answer) => break answer,
                None => eprintln!("  {}", "Please answer y, n or a.".dimmed()),
            }
        };

        match answer {
            Answer::Yes => Ok(ApprovalDecision::approve()),
            Answer::Always => Ok(ApprovalDecision {
                approved: true,
                allow_always: true,
                feedback: None,
            }),
            Answer::No => {
                eprint!("  {} ", "Feedback for the agent (optional):".cyan());
                std::io::stderr().flush().ok();
                let feedback = self
                    .read_line()
                    .await?
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty());
                Ok(ApprovalDecision {
                    approved: false,
                    allow_always: false,
                    feedback,
                })
            }
        }
    }
}

#[async_trait]
impl WorkflowStep for ConsoleStep {
    async fn run(&self, key: &str, f: BoxFuture<'_, Result<Value>>) -> Result<Value> {
        debug!(key, "Running step");
        f.await
    }

    async fn suspend(&self, key: &str, request: SuspendRequest) -> Result<Value> {
        let form: ApprovalForm =
            serde_json::from_value(request.data).context("Unexpected approval request")?;
        debug!(key, title = %form.title, "Approval requested");

        let decision = if self.auto_approve {
            ApprovalDecision::approve()
        } else {
            match request.timeout_seconds {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.ask(&form))
                    .await
                    .unwrap_or_else(|_| Ok(ApprovalDecision::reject("Approval timed out")))?,
                None => self.ask(&form).await?,
            }
        };
        Ok(serde_json::to_value(decision)?)
    }
}
