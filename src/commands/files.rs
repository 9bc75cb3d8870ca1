use anyhow::{Context, Result};
use colored::Colorize;
use tokio::io::AsyncReadExt;

use agentbox::tools::{ReadFileInput, WriteFileInput};

use super::{GlobalOpts, Session};

pub async fn read(
    opts: &GlobalOpts,
    path: String,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<i32> {
    let session = Session::open(opts)?;
    let output = session
        .toolkit()
        .read_file(
            &session.context("read"),
            ReadFileInput {
                path,
                offset,
                limit,
            },
        )
        .await;
    session.close().await;

    let output = output?;
    print!("{}", output.content);
    if !output.content.is_empty() && !output.content.ends_with('\n') {
        println!();
    }
    Ok(0)
}

/// Writes `content`, or standard input when no content is given.
pub async fn write(opts: &GlobalOpts, path: String, content: Option<String>) -> Result<i32> {
    let content = match content {
        Some(content) => content,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read content from stdin")?;
            buf
        }
    };

    let session = Session::open(opts)?;
    let output = session
        .toolkit()
        .write_file(&session.context("write"), WriteFileInput { path, content })
        .await;
    session.close().await;

    let output = output?;
    println!(
        "{} Wrote {} bytes to {}",
        "✓".green(),
        output.bytes_written,
        output.path.cyan()
    );
    Ok(0)
}
