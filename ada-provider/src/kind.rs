use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The backend a template (and its provider) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Docker,
    Libvirt,
    OpenStack,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Docker,
        BackendKind::Libvirt,
        BackendKind::OpenStack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Libvirt => "libvirt",
            BackendKind::OpenStack => "openstack",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "libvirt" => Ok(BackendKind::Libvirt),
            "openstack" => Ok(BackendKind::OpenStack),
            other => Err(ProviderError::UnknownKind(other.to_string())),
        }
    }
}
