use anyhow::Result;
use colored::Colorize;

use agentbox::tools::{FindFilesInput, SearchTextInput};

use super::{GlobalOpts, Session};

pub async fn find(opts: &GlobalOpts, pattern: String, ignore: Vec<String>) -> Result<i32> {
    let session = Session::open(opts)?;
    let output = session
        .toolkit()
        .find_files(
            &session.context("find"),
            FindFilesInput {
                pattern,
                cwd: None,
                ignore,
            },
        )
        .await;
    session.close().await;

    let output = output?;
    for file in &output.files {
        println!("{file}");
    }
    if output.truncated {
        eprintln!("{}", "(result limit reached)".dimmed());
    }
    Ok(i32::from(output.files.is_empty()))
}

pub async fn search(
    opts: &GlobalOpts,
    pattern: String,
    include: Option<String>,
    max_results: Option<usize>,
    context_lines: Option<usize>,
) -> Result<i32> {
    let session = Session::open(opts)?;
    let output = session
        .toolkit()
        .search_text(
            &session.context("search"),
            SearchTextInput {
                pattern,
                cwd: None,
                include,
                max_results,
                context_lines,
            },
        )
        .await;
    session.close().await;

    let output = output?;
    for m in &output.matches {
        if m.context {
            println!("{}-{}-{}", m.path.dimmed(), m.line, m.text.dimmed());
        } else {
            println!("{}:{}:{}", m.path.cyan(), m.line.to_string().yellow(), m.text);
        }
    }
    Ok(i32::from(output.matches.is_empty()))
}
