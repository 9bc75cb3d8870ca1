//! Integration tests for the agentbox CLI.
//!
//! These tests run the actual executable against temporary project
//! directories using the local environment only.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the agentbox binary.
#[allow(deprecated)]
fn agentbox() -> Command {
    Command::cargo_bin("agentbox").expect("failed to find agentbox binary")
}

/// Creates a Command for agentbox running in a specific directory.
fn agentbox_in(dir: &TempDir) -> Command {
    let mut cmd = agentbox();
    cmd.current_dir(dir.path());
    cmd
}

/// A project whose config lets every command run unattended.
fn permissive_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("agentbox.toml"),
        "[exec]\nsecurity = \"allow-always\"\n",
    )
    .unwrap();
    dir
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    agentbox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("agentbox"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("read"))
        .stdout(predicate::str::contains("write"))
        .stdout(predicate::str::contains("find"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("info"));
}

#[test]
fn test_version_shows_version() {
    agentbox()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("agentbox"));
}

#[test]
fn test_exec_help_shows_timeout_flag() {
    agentbox()
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--cwd"));
}

// -----------------------------------------------------------------------------
// Check command tests
// -----------------------------------------------------------------------------

#[test]
fn test_check_allowlisted_command() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("agentbox.toml"),
        "[exec]\nsecurity = \"allowlist\"\nallowlist = [\"node *\", \"npm *\"]\n",
    )
    .unwrap();

    agentbox_in(&dir)
        .args(["check", "node", "server.js"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is allowed"));

    agentbox_in(&dir)
        .args(["check", "rm", "-rf", "/"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("requires approval"));
}

#[test]
fn test_check_local_defaults_to_approval() {
    let dir = TempDir::new().unwrap();

    agentbox_in(&dir)
        .args(["check", "ls"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("approval-always"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("agentbox.toml"),
        "idle_destroy_timeout = \"eventually\"\n",
    )
    .unwrap();

    agentbox_in(&dir)
        .args(["check", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config file"));
}

// -----------------------------------------------------------------------------
// Exec command tests
// -----------------------------------------------------------------------------

#[test]
fn test_exec_prints_output() {
    let dir = permissive_project();

    agentbox_in(&dir)
        .args(["exec", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn test_exec_propagates_exit_code() {
    let dir = permissive_project();

    agentbox_in(&dir)
        .args(["exec", "exit 3"])
        .assert()
        .code(3);
}

#[test]
fn test_exec_rejected_without_terminal_input() {
    let dir = TempDir::new().unwrap();

    agentbox_in(&dir)
        .args(["exec", "touch", "made.txt"])
        .write_stdin("n\nplease not\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Command rejected by user: please not"));

    assert!(!dir.path().join("made.txt").exists());
}

#[test]
fn test_exec_approved_on_terminal() {
    let dir = TempDir::new().unwrap();

    agentbox_in(&dir)
        .args(["exec", "touch", "made.txt"])
        .write_stdin("y\n")
        .assert()
        .success();

    assert!(dir.path().join("made.txt").exists());
}

#[test]
fn test_exec_yes_skips_prompt() {
    let dir = TempDir::new().unwrap();

    agentbox_in(&dir)
        .args(["--yes", "exec", "echo", "auto"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auto"));
}

#[test]
fn test_exec_timeout_reports_kill() {
    let dir = permissive_project();

    agentbox_in(&dir)
        .args(["exec", "--timeout", "1", "sleep 10"])
        .assert()
        .code(137)
        .stderr(predicate::str::contains("timed out after 1s"));
}

// -----------------------------------------------------------------------------
// File command tests
// -----------------------------------------------------------------------------

#[test]
fn test_write_then_read() {
    let dir = permissive_project();

    agentbox_in(&dir)
        .args(["write", "notes/todo.txt", "--content", "ship it"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 7 bytes"));

    assert_eq!(
        fs::read_to_string(dir.path().join("notes/todo.txt")).unwrap(),
        "ship it"
    );

    agentbox_in(&dir)
        .args(["read", "notes/todo.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ship it"));
}

#[test]
fn test_write_outside_restriction_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("agentbox.toml"),
        format!(
            "path_restriction = \"{}\"\n[exec]\nsecurity = \"allow-always\"\n",
            dir.path().display()
        ),
    )
    .unwrap();

    agentbox_in(&dir)
        .args(["write", "../evil.txt", "--content", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Path traversal rejected"));
}

#[test]
fn test_read_binary_file_fails() {
    let dir = permissive_project();
    fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3]).unwrap();

    agentbox_in(&dir)
        .args(["read", "blob.bin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("binary"));
}

// -----------------------------------------------------------------------------
// Find and search tests
// -----------------------------------------------------------------------------

#[test]
fn test_find_and_search() {
    let dir = permissive_project();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {\n    todo!()\n}\n").unwrap();

    agentbox_in(&dir)
        .args(["find", "*.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("src/main.rs"));

    agentbox_in(&dir)
        .args(["search", "todo!", "--include", "*.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("main.rs"))
        .stdout(predicate::str::contains("todo!()"));

    agentbox_in(&dir)
        .args(["search", "no_such_symbol"])
        .assert()
        .code(1);
}

// -----------------------------------------------------------------------------
// Info tests
// -----------------------------------------------------------------------------

#[test]
fn test_info_json() {
    let dir = permissive_project();

    agentbox_in(&dir)
        .args(["info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"security\": \"allow-always\""))
        .stdout(predicate::str::contains("\"kind\": \"local\""));
}

#[test]
fn test_info_docker_before_creation() {
    let dir = TempDir::new().unwrap();

    agentbox_in(&dir)
        .args(["--env", "docker", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("docker"))
        .stdout(predicate::str::contains("not created"));
}
