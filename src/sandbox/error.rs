//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::path::{Path, PathBuf};

/// Result alias used throughout the sandbox layer.
pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Missing or malformed configuration.
    #[error("Invalid sandbox configuration: {message}")]
    Config {
        /// What is wrong
        message: String,
    },

    /// The selected environment backend has no implementation.
    #[error("Environment type '{kind}' is not yet implemented")]
    NotImplemented {
        /// Backend name
        kind: String,
    },

    /// A resolved path escapes the permitted root.
    #[error("Path traversal rejected: {} is outside {}", path.display(), root.display())]
    PathTraversal {
        /// Resolved offending path
        path: PathBuf,
        /// Root it had to stay under
        root: PathBuf,
    },

    /// A symbolic link was encountered under a restricted root.
    #[error("Symbolic links are not allowed: {}", path.display())]
    Symlink {
        /// The link itself
        path: PathBuf,
    },

    /// The sandbox was destroyed and has not been recreated.
    #[error("Sandbox {id} has been destroyed")]
    Destroyed {
        /// Sandbox id
        id: String,
    },

    /// File content looks binary and cannot be returned as text.
    #[error("Cannot read binary file: {}", path.display())]
    BinaryContent {
        /// Requested path
        path: PathBuf,
    },

    /// A file or directory the operation needs does not exist.
    #[error("Not found: {}", path.display())]
    NotFound {
        /// Requested path
        path: PathBuf,
    },

    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable {
        /// Client or daemon error
        message: String,
    },

    /// Container operation failed (create, start, exec, etc.).
    #[error("Container operation failed: {message}")]
    ContainerFailed {
        /// Operation and daemon error
        message: String,
    },

    /// Underlying filesystem or process IO failure.
    #[error("{context}: {source}")]
    Io {
        /// Operation that failed
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `NotImplemented` error.
    pub fn not_implemented(kind: impl Into<String>) -> Self {
        Self::NotImplemented { kind: kind.into() }
    }

    /// Creates a `PathTraversal` error.
    pub fn path_traversal(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Self {
        Self::PathTraversal {
            path: path.as_ref().to_path_buf(),
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates a `Symlink` error.
    pub fn symlink(path: impl AsRef<Path>) -> Self {
        Self::Symlink {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates a `Destroyed` error.
    pub fn destroyed(id: impl Into<String>) -> Self {
        Self::Destroyed { id: id.into() }
    }

    /// Creates a `BinaryContent` error.
    pub fn binary_content(path: impl AsRef<Path>) -> Self {
        Self::BinaryContent {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(path: impl AsRef<Path>) -> Self {
        Self::NotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Wraps an IO error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if this is a traversal or symlink rejection.
    pub fn is_traversal(&self) -> bool {
        matches!(self, Self::PathTraversal { .. } | Self::Symlink { .. })
    }

    /// Returns true if this is a symlink rejection.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink { .. })
    }

    /// Returns true if the sandbox was destroyed.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed { .. })
    }

    /// Returns true if the backend is not implemented.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    /// Returns true if the file was detected as binary.
    pub fn is_binary_content(&self) -> bool {
        matches!(self, Self::BinaryContent { .. })
    }
}
