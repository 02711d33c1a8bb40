//! OpenStack backend driven through the `openstack` CLI.
//!
//! Each machine boots from its own volume (`<name>_boot`) which is deleted
//! together with the server. Teardown also deletes the volume by name, for
//! a creation that stopped before its server existed.

use crate::backend::{InstanceRef, Provisioned};
use crate::config::{OpenStackConfig, OpenStackCredentials};
use crate::error::{ProviderError, Result};
use ada_core::command::CliCommand;
use ada_core::{poll_until, Clock, CoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub name: String,
    pub size_gb: u32,
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequest {
    pub name: String,
    pub flavor_id: String,
    pub volume_id: String,
    pub network_id: String,
    pub security_groups: Vec<String>,
}

/// Operations the adapter needs from an OpenStack cloud.
#[async_trait]
pub trait OpenStackApi: Send + Sync {
    /// Resolve a network by id or name, returning its id.
    async fn find_network(&self, network: &str) -> Result<String>;

    async fn find_flavor(&self, flavor: &str) -> Result<String>;

    async fn find_image(&self, image: &str) -> Result<String>;

    async fn create_volume(&self, request: &VolumeRequest) -> Result<String>;

    async fn volume_status(&self, volume_id: &str) -> Result<String>;

    async fn create_server(&self, request: &ServerRequest) -> Result<String>;

    async fn server_status(&self, server_id: &str) -> Result<String>;

    /// First fixed IPv4 address of the server's port on `network_id`.
    async fn server_fixed_ipv4(&self, server_id: &str, network_id: &str)
        -> Result<Option<String>>;

    /// Delete by name. A server that no longer exists is not an error.
    async fn delete_server(&self, name: &str) -> Result<()>;

    /// Delete by name. A volume that no longer exists is not an error.
    async fn delete_volume(&self, name: &str) -> Result<()>;
}

/// [`OpenStackApi`] over the `openstack` CLI with `-f json` output.
#[derive(Debug, Clone)]
pub struct OpenStackCli {
    credentials: OpenStackCredentials,
}

impl OpenStackCli {
    pub fn new(credentials: OpenStackCredentials) -> Self {
        Self { credentials }
    }

    fn openstack<I, S>(&self, args: I) -> CliCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CliCommand::new("openstack")
            .args(args)
            .envs(self.credentials.env_vars())
    }

    async fn show_json(&self, resource: &str, id: &str) -> Result<Value> {
        Ok(self
            .openstack([resource, "show", id, "-f", "json"])
            .output_json_async()
            .await?)
    }
}

fn string_field(record: &Value, key: &str) -> Result<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Backend(format!("'{key}' missing from openstack output")))
}

fn is_missing(err: &CoreError, resource: &str) -> bool {
    err.to_string()
        .contains(&format!("No {resource} with a name or ID"))
}

fn boot_volume_name(name: &str) -> String {
    format!("{name}_boot")
}

#[async_trait]
impl OpenStackApi for OpenStackCli {
    async fn find_network(&self, network: &str) -> Result<String> {
        string_field(&self.show_json("network", network).await?, "id")
    }

    async fn find_flavor(&self, flavor: &str) -> Result<String> {
        string_field(&self.show_json("flavor", flavor).await?, "id")
    }

    async fn find_image(&self, image: &str) -> Result<String> {
        string_field(&self.show_json("image", image).await?, "id")
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<String> {
        let size = request.size_gb.to_string();
        let volume = self
            .openstack([
                "volume",
                "create",
                "--size",
                size.as_str(),
                "--image",
                request.image_id.as_str(),
                "--bootable",
                request.name.as_str(),
                "-f",
                "json",
            ])
            .output_json_async()
            .await?;
        string_field(&volume, "id")
    }

    async fn volume_status(&self, volume_id: &str) -> Result<String> {
        string_field(&self.show_json("volume", volume_id).await?, "status")
    }

    async fn create_server(&self, request: &ServerRequest) -> Result<String> {
        let server = self
            .openstack(server_create_args(request))
            .output_json_async()
            .await?;
        string_field(&server, "id")
    }

    async fn server_status(&self, server_id: &str) -> Result<String> {
        string_field(&self.show_json("server", server_id).await?, "status")
    }

    async fn server_fixed_ipv4(
        &self,
        server_id: &str,
        network_id: &str,
    ) -> Result<Option<String>> {
        let ports = self
            .openstack([
                "port",
                "list",
                "--server",
                server_id,
                "--network",
                network_id,
                "-f",
                "json",
            ])
            .output_json_async()
            .await?;
        Ok(first_ipv4(&parse_port_fixed_ips(&ports)))
    }

    async fn delete_server(&self, name: &str) -> Result<()> {
        match self
            .openstack(["server", "delete", name])
            .execute_async()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e, "server") => {
                info!(server = name, "server already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        match self
            .openstack(["volume", "delete", name])
            .execute_async()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e, "volume") => {
                info!(volume = name, "volume already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn server_create_args(request: &ServerRequest) -> Vec<String> {
    let mut args = vec![
        "server".to_string(),
        "create".to_string(),
        "--flavor".to_string(),
        request.flavor_id.clone(),
        "--block-device".to_string(),
        format!(
            "uuid={},source_type=volume,destination_type=volume,boot_index=0,delete_on_termination=true",
            request.volume_id
        ),
        "--network".to_string(),
        request.network_id.clone(),
    ];
    for group in &request.security_groups {
        args.push("--security-group".to_string());
        args.push(group.clone());
    }
    args.push(request.name.clone());
    args.push("-f".to_string());
    args.push("json".to_string());
    args
}

/// Fixed addresses from `port list -f json`.
///
/// Newer clients emit `"Fixed IP Addresses"` as a list of
/// `{"subnet_id", "ip_address"}` objects, older ones as a string like
/// `ip_address='10.0.0.5', subnet_id='...'`.
fn parse_port_fixed_ips(ports: &Value) -> Vec<String> {
    let Some(ports) = ports.as_array() else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    for port in ports {
        match port.get("Fixed IP Addresses") {
            Some(Value::Array(entries)) => addresses.extend(
                entries
                    .iter()
                    .filter_map(|entry| entry.get("ip_address")?.as_str())
                    .map(str::to_string),
            ),
            Some(Value::String(text)) => addresses.extend(
                text.split("ip_address='")
                    .skip(1)
                    .filter_map(|rest| rest.split('\'').next())
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    addresses
}

fn first_ipv4(addresses: &[String]) -> Option<String> {
    addresses
        .iter()
        .find(|address| address.parse::<Ipv4Addr>().is_ok())
        .cloned()
}

pub struct OpenStackAdapter {
    config: OpenStackConfig,
    client: Arc<dyn OpenStackApi>,
    clock: Arc<dyn Clock>,
}

impl OpenStackAdapter {
    pub fn new(config: OpenStackConfig, client: Arc<dyn OpenStackApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            client,
            clock,
        }
    }

    pub fn config(&self) -> &OpenStackConfig {
        &self.config
    }

    #[instrument(skip(self), fields(flavor = %self.config.flavor_name))]
    pub async fn create(&self, name: &str) -> Result<Provisioned> {
        let client = &self.client;

        let network_id = client.find_network(&self.config.network_id).await?;
        let flavor_id = client.find_flavor(&self.config.flavor_name).await?;
        let image_id = client.find_image(&self.config.image).await?;

        let volume = VolumeRequest {
            name: boot_volume_name(name),
            size_gb: self.config.volume_size_gb,
            image_id,
        };
        info!(volume = %volume.name, size_gb = volume.size_gb, "creating boot volume");
        let volume_id = client.create_volume(&volume).await?;
        let volume_id = volume_id.as_str();

        poll_until(
            self.clock.as_ref(),
            self.config.volume_poll,
            &format!("volume {volume_id} available"),
            move || async move {
                match client.volume_status(volume_id).await?.as_str() {
                    "available" => Ok(Some(())),
                    "error" => Err(ProviderError::Backend(format!(
                        "volume {volume_id} went into error state"
                    ))),
                    _ => Ok(None),
                }
            },
        )
        .await?;

        let server = ServerRequest {
            name: name.to_string(),
            flavor_id,
            volume_id: volume_id.to_string(),
            network_id,
            security_groups: self.config.security_groups.clone(),
        };
        let server_id = client.create_server(&server).await?;
        let server_id = server_id.as_str();
        info!(%server_id, "server created");

        poll_until(
            self.clock.as_ref(),
            self.config.server_poll,
            &format!("server {server_id} ACTIVE"),
            move || async move {
                match client.server_status(server_id).await?.as_str() {
                    "ACTIVE" => Ok(Some(())),
                    "ERROR" => Err(ProviderError::Backend(format!(
                        "server {server_id} went into ERROR state"
                    ))),
                    _ => Ok(None),
                }
            },
        )
        .await?;

        let network_id = server.network_id.as_str();
        let ip = poll_until(
            self.clock.as_ref(),
            self.config.ip_poll,
            &format!("fixed address for server {server_id}"),
            move || async move { client.server_fixed_ipv4(server_id, network_id).await },
        )
        .await?;

        info!(%ip, "server acquired address");
        Ok(Provisioned { ip })
    }

    #[instrument(skip(self))]
    pub async fn destroy(&self, instance: &InstanceRef) -> Result<()> {
        self.client.delete_server(&instance.name).await?;
        info!("server deleted");

        // Still attached while the server terminates; it goes with the server.
        let volume = boot_volume_name(&instance.name);
        match self.client.delete_volume(&volume).await {
            Ok(()) => info!(%volume, "boot volume deleted"),
            Err(e) => warn!(%volume, "boot volume left to server termination: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_port_fixed_ips_structured() {
        let ports = json!([{
            "ID": "9d1c",
            "MAC Address": "fa:16:3e:00:00:01",
            "Fixed IP Addresses": [
                {"subnet_id": "v6", "ip_address": "2001:db8::5"},
                {"subnet_id": "v4", "ip_address": "172.16.101.23"}
            ],
            "Status": "ACTIVE"
        }]);
        let addresses = parse_port_fixed_ips(&ports);
        assert_eq!(addresses, vec!["2001:db8::5", "172.16.101.23"]);
        assert_eq!(first_ipv4(&addresses), Some("172.16.101.23".to_string()));
    }

    #[test]
    fn test_parse_port_fixed_ips_legacy_string() {
        let ports = json!([{
            "Fixed IP Addresses": "ip_address='10.0.0.5', subnet_id='abc'\nip_address='fe80::1', subnet_id='def'"
        }]);
        let addresses = parse_port_fixed_ips(&ports);
        assert_eq!(addresses, vec!["10.0.0.5", "fe80::1"]);
        assert_eq!(first_ipv4(&addresses), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn test_no_ports_yet() {
        assert!(parse_port_fixed_ips(&json!([])).is_empty());
        assert!(parse_port_fixed_ips(&Value::Null).is_empty());
        assert_eq!(first_ipv4(&["fe80::1".to_string()]), None);
    }

    #[test]
    fn test_server_create_args() {
        let args = server_create_args(&ServerRequest {
            name: "alice-62EDjx".into(),
            flavor_id: "f1".into(),
            volume_id: "v1".into(),
            network_id: "n1".into(),
            security_groups: vec!["HTTP".into(), "SSH".into()],
        });
        let line = args.join(" ");
        assert!(line.starts_with("server create --flavor f1 --block-device uuid=v1,"));
        assert!(line.contains("delete_on_termination=true"));
        assert!(line.contains("--security-group HTTP --security-group SSH"));
        assert!(line.ends_with("alice-62EDjx -f json"));
    }

    #[test]
    fn test_missing_resource_messages() {
        let missing = CoreError::Command(
            "Failed to delete volume with name or ID 'bob-62EDjx_boot': No volume with a name or ID of 'bob-62EDjx_boot' exists.".into(),
        );
        assert!(is_missing(&missing, "volume"));
        assert!(!is_missing(&missing, "server"));
        assert_eq!(boot_volume_name("bob-62EDjx"), "bob-62EDjx_boot");
    }

    #[test]
    fn test_string_field() {
        let record = json!({"id": "abc", "status": 3});
        assert_eq!(string_field(&record, "id").unwrap(), "abc");
        assert!(string_field(&record, "status").is_err());
    }
}
