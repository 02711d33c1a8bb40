use crate::backend::MachineBackend;
use crate::config::BackendConfig;
use crate::docker::{DockerAdapter, DockerCli};
use crate::error::Result;
use crate::libvirt::{LibvirtAdapter, VirshCli};
use crate::openstack::{OpenStackAdapter, OpenStackCli};
use ada_core::command::require_tool;
use ada_core::{Clock, TokioClock};
use std::sync::Arc;

/// Builds a [`MachineBackend`] for one dispatch.
///
/// Backends hold no state between dispatches; every call gets a fresh
/// client built from the parsed configuration.
pub trait BackendFactory: Send + Sync {
    fn build(&self, config: BackendConfig) -> Result<MachineBackend>;
}

/// Production factory: CLI clients and the wall clock.
pub struct CliBackendFactory {
    clock: Arc<dyn Clock>,
}

impl CliBackendFactory {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(TokioClock),
        }
    }
}

impl Default for CliBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for CliBackendFactory {
    fn build(&self, config: BackendConfig) -> Result<MachineBackend> {
        let backend = match config {
            BackendConfig::Docker(config) => {
                require_tool("docker")?;
                let client = Arc::new(DockerCli::new(config.host.clone()));
                MachineBackend::Docker(DockerAdapter::new(config, client, self.clock.clone()))
            }
            BackendConfig::Libvirt(config) => {
                require_tool("virsh")?;
                require_tool("virt-clone")?;
                let client = Arc::new(VirshCli::new(config.uri.clone()));
                MachineBackend::Libvirt(LibvirtAdapter::new(config, client, self.clock.clone()))
            }
            BackendConfig::OpenStack(config) => {
                require_tool("openstack")?;
                let client = Arc::new(OpenStackCli::new(config.credentials.clone()));
                MachineBackend::OpenStack(OpenStackAdapter::new(
                    config,
                    client,
                    self.clock.clone(),
                ))
            }
        };
        Ok(backend)
    }
}
