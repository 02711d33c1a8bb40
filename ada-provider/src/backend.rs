use crate::docker::DockerAdapter;
use crate::error::Result;
use crate::kind::BackendKind;
use crate::libvirt::LibvirtAdapter;
use crate::openstack::OpenStackAdapter;

/// What teardown needs to find a machine's backend resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub name: String,
    /// Last known address; empty when provisioning never got that far.
    pub ip: String,
}

/// Outcome of a successful `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub ip: String,
}

/// A machine backend, ready to provision or tear down one machine.
pub enum MachineBackend {
    Docker(DockerAdapter),
    Libvirt(LibvirtAdapter),
    OpenStack(OpenStackAdapter),
}

impl MachineBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            MachineBackend::Docker(_) => BackendKind::Docker,
            MachineBackend::Libvirt(_) => BackendKind::Libvirt,
            MachineBackend::OpenStack(_) => BackendKind::OpenStack,
        }
    }

    /// Provision `name` and wait until it has an address.
    pub async fn create(&self, name: &str) -> Result<Provisioned> {
        match self {
            MachineBackend::Docker(adapter) => adapter.create(name).await,
            MachineBackend::Libvirt(adapter) => adapter.create(name).await,
            MachineBackend::OpenStack(adapter) => adapter.create(name).await,
        }
    }

    /// Release every backend resource belonging to `instance`.
    pub async fn destroy(&self, instance: &InstanceRef) -> Result<()> {
        match self {
            MachineBackend::Docker(adapter) => adapter.destroy(instance).await,
            MachineBackend::Libvirt(adapter) => adapter.destroy(instance).await,
            MachineBackend::OpenStack(adapter) => adapter.destroy(instance).await,
        }
    }
}

impl std::fmt::Debug for MachineBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineBackend::Docker(adapter) => f.debug_tuple("Docker").field(adapter.config()).finish(),
            MachineBackend::Libvirt(adapter) => {
                f.debug_tuple("Libvirt").field(adapter.config()).finish()
            }
            MachineBackend::OpenStack(adapter) => {
                f.debug_tuple("OpenStack").field(adapter.config()).finish()
            }
        }
    }
}
