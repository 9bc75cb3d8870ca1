use anyhow::Result;
use colored::Colorize;

use agentbox::approval::ExecGate;

use super::GlobalOpts;

/// Reports whether `command` runs unattended. Exit code 1 means it needs approval.
pub fn run(opts: &GlobalOpts, command: &str) -> Result<i32> {
    let config = opts.load_config()?;
    let gate = ExecGate::from_config(&config);

    if gate.needs_approval(command) {
        println!(
            "{} {} requires approval ({})",
            "✗".yellow(),
            command.bold(),
            gate.mode()
        );
        Ok(1)
    } else {
        println!(
            "{} {} is allowed ({})",
            "✓".green(),
            command.bold(),
            gate.mode()
        );
        Ok(0)
    }
}
