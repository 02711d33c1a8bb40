//! libvirt backend driven through `virt-clone` and `virsh`.
//!
//! Machines are clones of a template domain. Teardown is name based, so it
//! also cleans up after a clone that failed halfway.

use crate::backend::{InstanceRef, Provisioned};
use crate::config::LibvirtConfig;
use crate::error::{ProviderError, Result};
use ada_core::command::CliCommand;
use ada_core::{poll_until, Clock, CoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const RUNNING_STATE: &str = "running";

/// Operations the adapter needs from a libvirt host.
#[async_trait]
pub trait LibvirtApi: Send + Sync {
    async fn clone_domain(&self, source: &str, name: &str) -> Result<()>;

    /// Set both the maximum and the current vCPU count in the persistent config.
    async fn set_vcpus(&self, name: &str, vcpus: u32) -> Result<()>;

    /// Set both the maximum and the current memory in the persistent config.
    async fn set_memory(&self, name: &str, kib: u64) -> Result<()>;

    async fn start_domain(&self, name: &str) -> Result<()>;

    /// `None` when the domain does not exist.
    async fn domain_state(&self, name: &str) -> Result<Option<String>>;

    /// First IPv4 address handed out by the DHCP lease, if any yet.
    async fn domain_ipv4(&self, name: &str) -> Result<Option<String>>;

    /// Force stop. A domain that is missing or already off is not an error.
    async fn destroy_domain(&self, name: &str) -> Result<()>;

    async fn list_pools(&self) -> Result<Vec<String>>;

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>>;

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<()>;

    /// Remove the domain definition. A missing domain is not an error.
    async fn undefine_domain(&self, name: &str) -> Result<()>;
}

/// [`LibvirtApi`] over the `virsh` and `virt-clone` CLIs.
#[derive(Debug, Clone)]
pub struct VirshCli {
    uri: String,
}

impl VirshCli {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    fn virsh(&self) -> CliCommand {
        CliCommand::new("virsh").args(["--connect", self.uri.as_str()])
    }
}

fn is_missing_domain(err: &CoreError) -> bool {
    let message = err.to_string();
    message.contains("failed to get domain") || message.contains("Domain not found")
}

fn is_not_running(err: &CoreError) -> bool {
    err.to_string().contains("domain is not running")
}

#[async_trait]
impl LibvirtApi for VirshCli {
    async fn clone_domain(&self, source: &str, name: &str) -> Result<()> {
        CliCommand::new("virt-clone")
            .args([
                "--connect",
                self.uri.as_str(),
                "--original",
                source,
                "--name",
                name,
                "--auto-clone",
            ])
            .execute_async()
            .await?;
        Ok(())
    }

    async fn set_vcpus(&self, name: &str, vcpus: u32) -> Result<()> {
        let count = vcpus.to_string();
        self.virsh()
            .args(["setvcpus", name, count.as_str(), "--config", "--maximum"])
            .execute_async()
            .await?;
        self.virsh()
            .args(["setvcpus", name, count.as_str(), "--config"])
            .execute_async()
            .await?;
        Ok(())
    }

    async fn set_memory(&self, name: &str, kib: u64) -> Result<()> {
        let size = kib.to_string();
        self.virsh()
            .args(["setmaxmem", name, size.as_str(), "--config"])
            .execute_async()
            .await?;
        self.virsh()
            .args(["setmem", name, size.as_str(), "--config"])
            .execute_async()
            .await?;
        Ok(())
    }

    async fn start_domain(&self, name: &str) -> Result<()> {
        self.virsh().args(["start", name]).execute_async().await?;
        Ok(())
    }

    async fn domain_state(&self, name: &str) -> Result<Option<String>> {
        match self.virsh().args(["domstate", name]).output_async().await {
            Ok(stdout) => Ok(Some(stdout.trim().to_string())),
            Err(e) if is_missing_domain(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn domain_ipv4(&self, name: &str) -> Result<Option<String>> {
        let stdout = self
            .virsh()
            .args(["domifaddr", name, "--source", "lease"])
            .output_async()
            .await?;
        Ok(parse_domifaddr_ipv4(&stdout))
    }

    async fn destroy_domain(&self, name: &str) -> Result<()> {
        match self.virsh().args(["destroy", name]).execute_async().await {
            Ok(()) => Ok(()),
            Err(e) if is_missing_domain(&e) || is_not_running(&e) => {
                debug!(domain = name, "domain already stopped: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let stdout = self
            .virsh()
            .args(["pool-list", "--all", "--name"])
            .output_async()
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        let stdout = self
            .virsh()
            .args(["vol-list", "--pool", pool])
            .output_async()
            .await?;
        Ok(parse_vol_list(&stdout))
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<()> {
        self.virsh()
            .args(["vol-delete", "--pool", pool, volume])
            .execute_async()
            .await?;
        Ok(())
    }

    async fn undefine_domain(&self, name: &str) -> Result<()> {
        match self.virsh().args(["undefine", name]).execute_async().await {
            Ok(()) => Ok(()),
            Err(e) if is_missing_domain(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rows after the dashed separator of a virsh table.
fn table_rows(stdout: &str) -> impl Iterator<Item = &str> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// `domifaddr` rows are `<iface> <mac> <protocol> <address>/<prefix>`.
fn parse_domifaddr_ipv4(stdout: &str) -> Option<String> {
    table_rows(stdout).find_map(|row| {
        let fields: Vec<&str> = row.split_whitespace().collect();
        match fields.as_slice() {
            [_, _, "ipv4", address, ..] => {
                address.split('/').next().map(str::to_string)
            }
            _ => None,
        }
    })
}

/// Whether `volume` is a disk `virt-clone --auto-clone` created for the
/// domain `name`: `<name>.<ext>`, or `<name>-<n>.<ext>` for further disks.
fn is_domain_volume(volume: &str, name: &str) -> bool {
    let Some(rest) = volume.strip_prefix(name) else {
        return false;
    };
    if rest.is_empty() || rest.starts_with('.') {
        return true;
    }
    match rest.strip_prefix('-') {
        Some(numbered) => {
            let digits = numbered.split('.').next().unwrap_or_default();
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// `vol-list` rows are `<name> <path>`.
fn parse_vol_list(stdout: &str) -> Vec<String> {
    table_rows(stdout)
        .filter_map(|row| row.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

pub struct LibvirtAdapter {
    config: LibvirtConfig,
    client: Arc<dyn LibvirtApi>,
    clock: Arc<dyn Clock>,
}

impl LibvirtAdapter {
    pub fn new(config: LibvirtConfig, client: Arc<dyn LibvirtApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            client,
            clock,
        }
    }

    pub fn config(&self) -> &LibvirtConfig {
        &self.config
    }

    #[instrument(skip(self), fields(uri = %self.config.uri))]
    pub async fn create(&self, name: &str) -> Result<Provisioned> {
        info!(source = %self.config.source_domain, "cloning domain");
        self.client
            .clone_domain(&self.config.source_domain, name)
            .await?;

        if let Some(vcpus) = self.config.vcpus {
            self.client.set_vcpus(name, vcpus).await?;
        }
        if let Some(kib) = self.config.memory_kib {
            self.client.set_memory(name, kib).await?;
        }

        self.client.start_domain(name).await?;
        info!("waiting for domain to come up");

        let client = &self.client;
        poll_until(
            self.clock.as_ref(),
            self.config.boot_poll,
            &format!("domain {name} running"),
            move || async move {
                match client.domain_state(name).await? {
                    Some(state) if state == RUNNING_STATE => Ok(Some(())),
                    Some(_) => Ok(None),
                    None => Err(ProviderError::Backend(format!(
                        "domain {name} disappeared while booting"
                    ))),
                }
            },
        )
        .await?;

        info!("domain is running, waiting for address");
        let ip = poll_until(
            self.clock.as_ref(),
            self.config.ip_poll,
            &format!("address for domain {name}"),
            move || async move { client.domain_ipv4(name).await },
        )
        .await?;

        info!(%ip, "domain acquired address");
        Ok(Provisioned { ip })
    }

    #[instrument(skip(self), fields(uri = %self.config.uri))]
    pub async fn destroy(&self, instance: &InstanceRef) -> Result<()> {
        let name = instance.name.as_str();

        if let Err(e) = self.client.destroy_domain(name).await {
            warn!("couldn't force stop domain: {}", e);
        }

        for pool in self.client.list_pools().await? {
            for volume in self.client.list_volumes(&pool).await? {
                if is_domain_volume(&volume, name) {
                    info!(%pool, %volume, "deleting volume");
                    self.client.delete_volume(&pool, &volume).await?;
                }
            }
        }

        self.client.undefine_domain(name).await?;
        info!("domain undefined");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMIFADDR: &str = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 vnet3      52:54:00:8a:3c:11    ipv6         fe80::5054:ff:fe8a:3c11/64
 vnet3      52:54:00:8a:3c:11    ipv4         192.168.122.45/24
";

    #[test]
    fn test_parse_domifaddr_ipv4() {
        assert_eq!(
            parse_domifaddr_ipv4(DOMIFADDR),
            Some("192.168.122.45".to_string())
        );
    }

    #[test]
    fn test_parse_domifaddr_without_lease() {
        let empty = " Name       MAC address          Protocol     Address\n\
                     -------------------------------------------------------\n\n";
        assert_eq!(parse_domifaddr_ipv4(empty), None);
        assert_eq!(parse_domifaddr_ipv4(""), None);
    }

    #[test]
    fn test_parse_vol_list() {
        let stdout = "\
 Name                 Path
------------------------------------------------------------------------------
 alice-62EDjx.qcow2   /var/lib/libvirt/images/alice-62EDjx.qcow2
 debian11-5.qcow2     /var/lib/libvirt/images/debian11-5.qcow2

";
        assert_eq!(
            parse_vol_list(stdout),
            vec!["alice-62EDjx.qcow2", "debian11-5.qcow2"]
        );
    }

    #[test]
    fn test_missing_domain_detection() {
        let err = CoreError::Command(
            "'virsh domstate x' exited with exit status: 1: error: failed to get domain 'x'"
                .to_string(),
        );
        assert!(is_missing_domain(&err));
        assert!(!is_not_running(&err));
    }

    #[test]
    fn test_domain_volume_matching() {
        assert!(is_domain_volume("bob-62EDjx.qcow2", "bob-62EDjx"));
        assert!(is_domain_volume("bob-62EDjx-1.qcow2", "bob-62EDjx"));
        assert!(is_domain_volume("bob-62EDjx", "bob-62EDjx"));
        assert!(!is_domain_volume("jim-bob-62EDjx.qcow2", "bob-62EDjx"));
        assert!(!is_domain_volume("bob-62EDjx-rk3f.qcow2", "bob-62EDjx"));
        assert!(!is_domain_volume("bob-62EDjxy.qcow2", "bob-62EDjx"));
        assert!(!is_domain_volume("bob-62EDjx-.qcow2", "bob-62EDjx"));
    }
}
