//! Sandboxes for agent command execution.
//!
//! A [`SandboxManager`] hands out [`ManagedSandbox`]es keyed by execution
//! or session. Each sandbox lazily builds one [`ExecutionEnvironment`]:
//! the host ([`LocalEnvironment`]) or a Docker container
//! ([`DockerEnvironment`]).

mod docker;
mod environment;
mod error;
mod local;
mod managed;
mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod network;
mod process;

pub use docker::DockerEnvironment;
pub use environment::{
    DefaultEnvironmentFactory, EnvironmentFactory, EnvironmentInfo, ExecOptions, ExecResult,
    ExecutionEnvironment, GlobOptions, GrepOptions, DEFAULT_MAX_GREP_RESULTS, MAX_GLOB_RESULTS,
    TIMEOUT_EXIT_CODE,
};
pub use error::{Result, SandboxError};
pub use local::LocalEnvironment;
pub use managed::{ManagedSandbox, SandboxInfo};
pub use manager::{ResolveContext, SandboxManager};
pub use network::NetworkMode;
