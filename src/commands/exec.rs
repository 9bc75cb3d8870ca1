use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::Write;

use agentbox::tools::ExecuteCommandInput;

use super::{GlobalOpts, Session};

/// Runs `command` and mirrors its output. Returns the command's exit code.
pub async fn run(
    opts: &GlobalOpts,
    command: &str,
    cwd: Option<String>,
    timeout: Option<u64>,
) -> Result<i32> {
    let session = Session::open(opts)?;
    let input = ExecuteCommandInput {
        command: command.to_string(),
        cwd,
        timeout_seconds: timeout,
        stdin: None,
        env: BTreeMap::new(),
    };
    let result = session
        .toolkit()
        .execute_command(&session.context("exec"), input)
        .await;
    session.close().await;
    let result = result?;

    print!("{}", result.stdout);
    std::io::stdout().flush().ok();
    eprint!("{}", result.stderr);
    if result.truncated {
        eprintln!("{}", "(output truncated)".dimmed());
    }
    Ok(result.exit_code)
}
