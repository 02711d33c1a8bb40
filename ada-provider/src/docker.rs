//! Docker backend: one container per machine on a named bridge network.

use crate::backend::{InstanceRef, Provisioned};
use crate::config::{DockerConfig, DockerLimits};
use crate::error::{ProviderError, Result};
use ada_core::command::CliCommand;
use ada_core::{poll_until, Clock};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Everything `docker run` needs for a new machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub limits: DockerLimits,
}

/// Operations the adapter needs from a Docker daemon.
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// Start a detached container, returning its id.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Address of `container` on `network`; `None` until one is assigned.
    async fn container_ip(&self, container: &str, network: &str) -> Result<Option<String>>;

    /// Name of the container holding `ip` on `network`, if any.
    async fn find_container_by_ip(&self, network: &str, ip: &str) -> Result<Option<String>>;

    async fn container_exists(&self, container: &str) -> Result<bool>;

    async fn stop_container(&self, container: &str) -> Result<()>;

    async fn remove_container(&self, container: &str) -> Result<()>;
}

/// [`DockerApi`] over the `docker` CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    host: Option<String>,
}

impl DockerCli {
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }

    fn docker(&self) -> CliCommand {
        let command = CliCommand::new("docker");
        match &self.host {
            Some(host) => command.args(["-H", host.as_str()]),
            None => command,
        }
    }
}

#[async_trait]
impl DockerApi for DockerCli {
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self
            .docker()
            .args(run_args(spec))
            .output_async()
            .await?;
        Ok(id.trim().to_string())
    }

    async fn container_ip(&self, container: &str, network: &str) -> Result<Option<String>> {
        let stdout = self
            .docker()
            .args([
                "inspect",
                "--format",
                "{{json .NetworkSettings.Networks}}",
                container,
            ])
            .output_async()
            .await?;
        let networks: Value = serde_json::from_str(stdout.trim())?;
        Ok(parse_container_ip(&networks, network))
    }

    async fn find_container_by_ip(&self, network: &str, ip: &str) -> Result<Option<String>> {
        let stdout = self
            .docker()
            .args(["network", "inspect", "--format", "{{json .Containers}}", network])
            .output_async()
            .await?;
        let containers: Value = serde_json::from_str(stdout.trim())?;
        Ok(parse_network_containers(&containers, ip))
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        let command = self
            .docker()
            .args(["container", "inspect", "--format", "{{.Id}}", container]);
        let output = tokio::task::spawn_blocking(move || command.execute_raw())
            .await
            .map_err(|e| ProviderError::Backend(format!("docker inspect task failed: {e}")))??;
        Ok(output.status.success())
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        self.docker()
            .args(["stop", container])
            .execute_async()
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.docker().args(["rm", container]).execute_async().await?;
        Ok(())
    }
}

fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--network".to_string(),
        spec.network.clone(),
        "--cpu-period".to_string(),
        spec.limits.cpu_period.to_string(),
    ];
    if let Some(quota) = spec.limits.cpu_quota {
        args.push("--cpu-quota".to_string());
        args.push(quota.to_string());
    }
    if let Some(memory) = &spec.limits.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    args.push(spec.image.clone());
    args
}

/// `.NetworkSettings.Networks` is keyed by network name.
fn parse_container_ip(networks: &Value, network: &str) -> Option<String> {
    networks
        .get(network)?
        .get("IPAddress")?
        .as_str()
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// `.Containers` of a network maps container id to `{"Name", "IPv4Address": "a.b.c.d/nn"}`.
fn parse_network_containers(containers: &Value, ip: &str) -> Option<String> {
    containers.as_object()?.values().find_map(|container| {
        let address = container.get("IPv4Address")?.as_str()?;
        let address = address.split('/').next().unwrap_or(address);
        if address == ip {
            container.get("Name")?.as_str().map(str::to_string)
        } else {
            None
        }
    })
}

pub struct DockerAdapter {
    config: DockerConfig,
    client: Arc<dyn DockerApi>,
    clock: Arc<dyn Clock>,
}

impl DockerAdapter {
    pub fn new(config: DockerConfig, client: Arc<dyn DockerApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            client,
            clock,
        }
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    pub async fn create(&self, name: &str) -> Result<Provisioned> {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            network: self.config.network.clone(),
            limits: self.config.limits.clone(),
        };
        info!(
            image = %spec.image,
            cpu_quota = ?spec.limits.cpu_quota,
            memory = ?spec.limits.memory,
            "starting container"
        );

        let id = self.client.run_container(&spec).await?;
        debug!(container_id = %id, "container started");

        match self.wait_for_ip(name).await {
            Ok(ip) => {
                info!(%ip, "container acquired address");
                Ok(Provisioned { ip })
            }
            Err(e) => {
                self.rollback(name).await;
                Err(e)
            }
        }
    }

    async fn wait_for_ip(&self, name: &str) -> Result<String> {
        let client = &self.client;
        let network = self.config.network.as_str();
        poll_until(
            self.clock.as_ref(),
            self.config.ip_poll,
            &format!("address for container {name}"),
            move || async move { client.container_ip(name, network).await },
        )
        .await
    }

    async fn rollback(&self, name: &str) {
        warn!("removing partially created container");
        if let Err(e) = self.client.stop_container(name).await {
            warn!("couldn't stop container: {}", e);
        }
        if let Err(e) = self.client.remove_container(name).await {
            warn!("couldn't remove container: {}", e);
        }
    }

    /// Find the container by its known address, falling back to its name,
    /// then stop and remove it. A container that no longer exists is fine.
    #[instrument(skip(self), fields(network = %self.config.network))]
    pub async fn destroy(&self, instance: &InstanceRef) -> Result<()> {
        let mut target = None;
        if !instance.ip.is_empty() {
            target = self
                .client
                .find_container_by_ip(&self.config.network, &instance.ip)
                .await?;
        }
        if target.is_none() && self.client.container_exists(&instance.name).await? {
            target = Some(instance.name.clone());
        }

        let Some(container) = target else {
            warn!("container not found, nothing to remove");
            return Ok(());
        };

        if let Err(e) = self.client.stop_container(&container).await {
            warn!(%container, "couldn't stop container: {}", e);
        }
        self.client.remove_container(&container).await?;
        info!(%container, "container removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(limits: DockerLimits) -> ContainerSpec {
        ContainerSpec {
            name: "alice-62EDjx".into(),
            image: "workspace:latest".into(),
            network: "adanet".into(),
            limits,
        }
    }

    #[test]
    fn test_run_args_with_limits() {
        let args = run_args(&spec(DockerLimits::from_template(Some(4), Some(16))));
        assert_eq!(
            args.join(" "),
            "run -d --name alice-62EDjx --network adanet --cpu-period 100000 \
             --cpu-quota 400000 --memory 16384m workspace:latest"
        );
    }

    #[test]
    fn test_run_args_without_limits() {
        let args = run_args(&spec(DockerLimits::from_template(None, None)));
        assert!(!args.contains(&"--cpu-quota".to_string()));
        assert!(!args.contains(&"--memory".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("workspace:latest"));
    }

    #[test]
    fn test_parse_container_ip() {
        let networks = json!({
            "adanet": {"IPAddress": "172.18.0.7", "Gateway": "172.18.0.1"},
            "bridge": {"IPAddress": "172.17.0.2"}
        });
        assert_eq!(
            parse_container_ip(&networks, "adanet"),
            Some("172.18.0.7".to_string())
        );
        assert_eq!(parse_container_ip(&networks, "other"), None);

        let pending = json!({"adanet": {"IPAddress": ""}});
        assert_eq!(parse_container_ip(&pending, "adanet"), None);
    }

    #[test]
    fn test_parse_network_containers() {
        let containers = json!({
            "3f2a9c": {"Name": "alice-62EDjx", "IPv4Address": "172.18.0.7/16"},
            "8b1d44": {"Name": "bob-62EDjy", "IPv4Address": "172.18.0.8/16"}
        });
        assert_eq!(
            parse_network_containers(&containers, "172.18.0.8"),
            Some("bob-62EDjy".to_string())
        );
        assert_eq!(parse_network_containers(&containers, "172.18.0.9"), None);
        assert_eq!(parse_network_containers(&Value::Null, "172.18.0.7"), None);
    }
}
