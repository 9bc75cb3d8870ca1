use anyhow::Result;
use colored::Colorize;

use agentbox::config::CONFIG_FILE;
use agentbox::sandbox::{DefaultEnvironmentFactory, EnvironmentFactory};

use super::GlobalOpts;

/// Prints the effective configuration. The environment is constructed but
/// not initialized, so no container is started.
pub fn run(opts: &GlobalOpts, json: bool) -> Result<i32> {
    let project_dir = opts.project_dir()?;
    let config = opts.load_config()?;
    let env_info = DefaultEnvironmentFactory
        .create("info", &config)
        .map(|env| env.info());

    if json {
        let value = serde_json::json!({
            "config": config,
            "security": config.security_mode(),
            "environment": env_info.as_ref().ok(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(0);
    }

    let config_path = project_dir.join(CONFIG_FILE);
    println!("\n{}", "━".repeat(50).dimmed());
    println!("{}", "   agentbox".yellow().bold());
    println!("{}", "━".repeat(50).dimmed());
    println!(
        "  Config:      {}",
        if config_path.exists() {
            config_path.display().to_string().cyan()
        } else {
            "defaults (no agentbox.toml)".dimmed()
        }
    );
    println!("  Environment: {}", config.env.to_string().cyan());
    println!("  Scope:       {}", config.scope.to_string().cyan());
    println!("  Security:    {}", config.security_mode().to_string().cyan());
    if !config.exec.allowlist.is_empty() {
        println!("  Allowlist:   {}", config.exec.allowlist.join(", ").cyan());
    }
    println!(
        "  Timeout:     {}",
        format!("{}s", config.exec.timeout_seconds).cyan()
    );
    println!(
        "  Restriction: {}",
        config.path_restriction.as_deref().unwrap_or("none").cyan()
    );
    match &env_info {
        Ok(info) => {
            println!("  Working dir: {}", info.cwd.cyan());
            println!(
                "  Container:   {}",
                info.container_id.as_deref().unwrap_or("not created").cyan()
            );
        }
        Err(e) => println!("  {} {}", "⚠".yellow(), e),
    }
    println!("{}", "━".repeat(50).dimmed());
    Ok(0)
}
