use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentbox::config::EnvironmentKind;

mod commands;

#[derive(Parser)]
#[command(name = "agentbox")]
#[command(
    author,
    version,
    about = "Sandboxed command execution for AI agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Project directory holding agentbox.toml (defaults to the current directory)
    #[arg(short = 'C', long, global = true, env = "AGENTBOX_DIR")]
    dir: Option<PathBuf>,

    /// Override the configured environment: local, docker or remote
    #[arg(long, global = true)]
    env: Option<EnvironmentKind>,

    /// Approve every request without prompting
    #[arg(short, long, global = true)]
    yes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command in the sandbox
    Exec {
        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,

        /// Working directory inside the sandbox
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in seconds (overrides exec.timeout_seconds)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Print a text file from the sandbox
    Read {
        path: String,

        /// First line to print (1-based)
        #[arg(long)]
        offset: Option<usize>,

        /// Maximum number of lines
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write a file in the sandbox (content from --content or stdin)
    Write {
        path: String,

        #[arg(long)]
        content: Option<String>,
    },

    /// Find files by glob pattern
    Find {
        pattern: String,

        /// Path fragments to exclude
        #[arg(long)]
        ignore: Vec<String>,
    },

    /// Search file contents
    Search {
        pattern: String,

        /// Only search files matching this glob
        #[arg(long)]
        include: Option<String>,

        #[arg(long)]
        max_results: Option<usize>,

        /// Lines of context around each match
        #[arg(short = 'c', long)]
        context: Option<usize>,
    },

    /// Check whether a command would run without approval
    Check {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Show the effective configuration and environment
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("agentbox=debug")
    } else {
        EnvFilter::new("agentbox=info")
    };
    let (text, json) = match cli.log_format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();

    let global = commands::GlobalOpts {
        dir: cli.dir,
        env: cli.env,
        yes: cli.yes,
    };

    let code = match cli.command {
        Commands::Exec {
            command,
            cwd,
            timeout,
        } => commands::exec::run(&global, &command.join(" "), cwd, timeout).await?,
        Commands::Read {
            path,
            offset,
            limit,
        } => commands::files::read(&global, path, offset, limit).await?,
        Commands::Write { path, content } => commands::files::write(&global, path, content).await?,
        Commands::Find { pattern, ignore } => {
            commands::search::find(&global, pattern, ignore).await?
        }
        Commands::Search {
            pattern,
            include,
            max_results,
            context,
        } => commands::search::search(&global, pattern, include, max_results, context).await?,
        Commands::Check { command } => commands::check::run(&global, &command.join(" "))?,
        Commands::Info { json } => commands::info::run(&global, json)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
