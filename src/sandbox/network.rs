//! Network mode definitions for sandbox containers.

use serde::{Deserialize, Serialize};

/// Network access for sandbox containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Default bridge network, outbound access allowed
    #[default]
    Bridge,
    /// No network access
    None,
    /// Share the host network stack
    Host,
}

impl NetworkMode {
    /// Value for Docker's `HostConfig.network_mode`.
    pub fn docker_mode(self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::None => "none",
            Self::Host => "host",
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.docker_mode())
    }
}
