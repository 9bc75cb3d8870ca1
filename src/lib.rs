//! Sandboxed execution environments for AI agents.
//!
//! A [`sandbox::SandboxManager`] owns sandboxes scoped to one agent run or
//! to a whole session. Each sandbox lazily builds an execution environment
//! on the host or in a Docker container. [`approval::ExecGate`] applies the
//! configured security mode to commands and [`tools::SandboxToolkit`]
//! exposes the whole thing as agent tools.

pub mod approval;
pub mod config;
pub mod output;
pub mod sandbox;
pub mod security;
pub mod tools;
