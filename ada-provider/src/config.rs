//! Typed backend configuration.
//!
//! Templates and providers keep their backend parameters as open JSON objects
//! (`extra_data` / `provider_data`). They are parsed exactly once per dispatch
//! into one of the structs below, so a missing or malformed parameter fails
//! the operation up front instead of surfacing halfway through provisioning.

use crate::error::{ProviderError, Result};
use crate::kind::BackendKind;
use ada_core::PollPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const DOCKER_CPU_PERIOD: u64 = 100_000;
pub const DEFAULT_LIBVIRT_URI: &str = "qemu:///system";
pub const DEFAULT_OPENSTACK_DOMAIN: &str = "Default";

pub const DOCKER_IP_POLL: PollPolicy = PollPolicy::from_secs(1, 300);
pub const LIBVIRT_BOOT_POLL: PollPolicy = PollPolicy::from_secs(1, 300);
pub const LIBVIRT_IP_POLL: PollPolicy = PollPolicy::from_secs(1, 300);
pub const OPENSTACK_VOLUME_POLL: PollPolicy = PollPolicy::from_secs(5, 1200);
pub const OPENSTACK_SERVER_POLL: PollPolicy = PollPolicy::from_secs(5, 300);
pub const OPENSTACK_IP_POLL: PollPolicy = PollPolicy::from_secs(5, 300);

/// Template fields an adapter needs, borrowed from the template row.
#[derive(Debug, Clone, Copy)]
pub struct TemplateParams<'a> {
    pub name: &'a str,
    pub kind: BackendKind,
    pub image: &'a str,
    pub cpu_limit_cores: Option<u32>,
    pub memory_limit_gb: Option<u32>,
    pub extra_data: &'a Value,
}

/// Provider fields an adapter needs, borrowed from the provider row.
#[derive(Debug, Clone, Copy)]
pub struct ProviderParams<'a> {
    pub name: &'a str,
    pub kind: BackendKind,
    pub provider_data: &'a Value,
}

/// Fully parsed configuration for one backend dispatch.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Docker(DockerConfig),
    Libvirt(LibvirtConfig),
    OpenStack(OpenStackConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Docker(_) => BackendKind::Docker,
            BackendConfig::Libvirt(_) => BackendKind::Libvirt,
            BackendConfig::OpenStack(_) => BackendKind::OpenStack,
        }
    }

    pub fn from_params(template: TemplateParams<'_>, provider: ProviderParams<'_>) -> Result<Self> {
        if template.kind != provider.kind {
            return Err(ProviderError::KindMismatch {
                template: template.kind.to_string(),
                provider: provider.kind.to_string(),
            });
        }

        match template.kind {
            BackendKind::Docker => DockerConfig::from_params(template, provider).map(Self::Docker),
            BackendKind::Libvirt => {
                LibvirtConfig::from_params(template, provider).map(Self::Libvirt)
            }
            BackendKind::OpenStack => {
                OpenStackConfig::from_params(template, provider).map(Self::OpenStack)
            }
        }
    }
}

fn parse_bag<T: DeserializeOwned>(bag: &Value, what: &str) -> Result<T> {
    let bag = match bag {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(bag).map_err(|e| ProviderError::Config(format!("{what}: {e}")))
}

fn require_image(template: &TemplateParams<'_>) -> Result<String> {
    if template.image.trim().is_empty() {
        return Err(ProviderError::Config(format!(
            "template '{}' has no image",
            template.name
        )));
    }
    Ok(template.image.to_string())
}

fn policy_with_timeout(default: PollPolicy, timeout_secs: Option<u64>) -> PollPolicy {
    match timeout_secs {
        Some(secs) => PollPolicy::new(default.interval, Duration::from_secs(secs)),
        None => default,
    }
}

/// Accepts `200` as well as `"200"`; templates created through the admin
/// form store numbers as strings.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// --- Docker ---

#[derive(Debug, Deserialize)]
struct DockerProviderData {
    #[serde(default)]
    base_url: Option<String>,
    network: String,
}

#[derive(Debug, Default, Deserialize)]
struct DockerTemplateExtras {
    #[serde(default)]
    ip_timeout_secs: Option<u64>,
}

/// CPU and memory ceilings passed to `docker run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerLimits {
    pub cpu_period: u64,
    pub cpu_quota: Option<u64>,
    /// Memory ceiling in docker's size syntax, e.g. `"16384m"`.
    pub memory: Option<String>,
}

impl DockerLimits {
    pub fn from_template(cpu_cores: Option<u32>, memory_gb: Option<u32>) -> Self {
        Self {
            cpu_period: DOCKER_CPU_PERIOD,
            cpu_quota: cpu_cores.map(|cores| DOCKER_CPU_PERIOD * u64::from(cores)),
            memory: memory_gb.map(|gb| format!("{}m", u64::from(gb) * 1024)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Daemon address passed as `-H`; `None` uses the local default.
    pub host: Option<String>,
    pub network: String,
    pub image: String,
    pub limits: DockerLimits,
    pub ip_poll: PollPolicy,
}

impl DockerConfig {
    fn from_params(template: TemplateParams<'_>, provider: ProviderParams<'_>) -> Result<Self> {
        let data: DockerProviderData = parse_bag(
            provider.provider_data,
            &format!("docker provider '{}'", provider.name),
        )?;
        let extras: DockerTemplateExtras = parse_bag(
            template.extra_data,
            &format!("docker template '{}'", template.name),
        )?;

        Ok(Self {
            host: data.base_url.filter(|url| !url.is_empty()),
            network: data.network,
            image: require_image(&template)?,
            limits: DockerLimits::from_template(template.cpu_limit_cores, template.memory_limit_gb),
            ip_poll: policy_with_timeout(DOCKER_IP_POLL, extras.ip_timeout_secs),
        })
    }
}

// --- libvirt ---

fn default_libvirt_uri() -> String {
    DEFAULT_LIBVIRT_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct LibvirtProviderData {
    #[serde(default = "default_libvirt_uri")]
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct LibvirtTemplateExtras {
    #[serde(default)]
    boot_timeout_secs: Option<u64>,
    #[serde(default)]
    ip_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LibvirtConfig {
    /// Connection URI, e.g. `qemu:///system`.
    pub uri: String,
    /// Domain cloned for every new machine.
    pub source_domain: String,
    pub vcpus: Option<u32>,
    pub memory_kib: Option<u64>,
    pub boot_poll: PollPolicy,
    pub ip_poll: PollPolicy,
}

impl LibvirtConfig {
    fn from_params(template: TemplateParams<'_>, provider: ProviderParams<'_>) -> Result<Self> {
        let data: LibvirtProviderData = parse_bag(
            provider.provider_data,
            &format!("libvirt provider '{}'", provider.name),
        )?;
        let extras: LibvirtTemplateExtras = parse_bag(
            template.extra_data,
            &format!("libvirt template '{}'", template.name),
        )?;

        Ok(Self {
            uri: data.base_url,
            source_domain: require_image(&template)?,
            vcpus: template.cpu_limit_cores,
            memory_kib: template
                .memory_limit_gb
                .map(|gb| u64::from(gb) * 1024 * 1024),
            boot_poll: policy_with_timeout(LIBVIRT_BOOT_POLL, extras.boot_timeout_secs),
            ip_poll: policy_with_timeout(LIBVIRT_IP_POLL, extras.ip_timeout_secs),
        })
    }
}

// --- OpenStack ---

fn default_domain() -> String {
    DEFAULT_OPENSTACK_DOMAIN.to_string()
}

/// Keystone credentials, exported to the `openstack` CLI as `OS_*` variables.
#[derive(Clone, Deserialize)]
pub struct OpenStackCredentials {
    pub auth_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
}

impl OpenStackCredentials {
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("OS_AUTH_URL", self.auth_url.clone()),
            ("OS_USERNAME", self.username.clone()),
            ("OS_PASSWORD", self.password.clone()),
            ("OS_PROJECT_NAME", self.project_name.clone()),
            ("OS_USER_DOMAIN_NAME", self.user_domain_name.clone()),
            ("OS_PROJECT_DOMAIN_NAME", self.project_domain_name.clone()),
            ("OS_IDENTITY_API_VERSION", "3".to_string()),
        ]
    }
}

impl fmt::Debug for OpenStackCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStackCredentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .finish()
    }
}

/// Security groups appear either as `"SSH"` or as `{"name": "SSH"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SecurityGroupRef {
    Named { name: String },
    Plain(String),
}

impl SecurityGroupRef {
    fn into_name(self) -> String {
        match self {
            SecurityGroupRef::Named { name } | SecurityGroupRef::Plain(name) => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenStackTemplateExtras {
    flavor_name: String,
    network_uuid: String,
    #[serde(deserialize_with = "number_or_string")]
    vol_size: u32,
    #[serde(default)]
    security_groups: Vec<SecurityGroupRef>,
    #[serde(default)]
    volume_timeout_secs: Option<u64>,
    #[serde(default)]
    boot_timeout_secs: Option<u64>,
    #[serde(default)]
    ip_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OpenStackConfig {
    pub credentials: OpenStackCredentials,
    pub image: String,
    pub flavor_name: String,
    pub network_id: String,
    pub volume_size_gb: u32,
    pub security_groups: Vec<String>,
    pub volume_poll: PollPolicy,
    pub server_poll: PollPolicy,
    pub ip_poll: PollPolicy,
}

impl OpenStackConfig {
    fn from_params(template: TemplateParams<'_>, provider: ProviderParams<'_>) -> Result<Self> {
        let credentials: OpenStackCredentials = parse_bag(
            provider.provider_data,
            &format!("openstack provider '{}'", provider.name),
        )?;
        let extras: OpenStackTemplateExtras = parse_bag(
            template.extra_data,
            &format!("openstack template '{}'", template.name),
        )?;

        if extras.vol_size == 0 {
            return Err(ProviderError::Config(format!(
                "openstack template '{}': vol_size must be positive",
                template.name
            )));
        }

        Ok(Self {
            credentials,
            image: require_image(&template)?,
            flavor_name: extras.flavor_name,
            network_id: extras.network_uuid,
            volume_size_gb: extras.vol_size,
            security_groups: extras
                .security_groups
                .into_iter()
                .map(SecurityGroupRef::into_name)
                .collect(),
            volume_poll: policy_with_timeout(OPENSTACK_VOLUME_POLL, extras.volume_timeout_secs),
            server_poll: policy_with_timeout(OPENSTACK_SERVER_POLL, extras.boot_timeout_secs),
            ip_poll: policy_with_timeout(OPENSTACK_IP_POLL, extras.ip_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template<'a>(kind: BackendKind, image: &'a str, extra: &'a Value) -> TemplateParams<'a> {
        TemplateParams {
            name: "tmpl",
            kind,
            image,
            cpu_limit_cores: Some(4),
            memory_limit_gb: Some(16),
            extra_data: extra,
        }
    }

    fn provider(kind: BackendKind, data: &Value) -> ProviderParams<'_> {
        ProviderParams {
            name: "prov",
            kind,
            provider_data: data,
        }
    }

    #[test]
    fn test_docker_limits() {
        let limits = DockerLimits::from_template(Some(4), Some(16));
        assert_eq!(limits.cpu_period, 100_000);
        assert_eq!(limits.cpu_quota, Some(400_000));
        assert_eq!(limits.memory.as_deref(), Some("16384m"));
    }

    #[test]
    fn test_docker_limits_absent() {
        let limits = DockerLimits::from_template(None, None);
        assert_eq!(limits.cpu_quota, None);
        assert_eq!(limits.memory, None);
    }

    #[test]
    fn test_docker_config() {
        let extra = Value::Null;
        let data = json!({"base_url": "unix:///var/run/docker.sock", "network": "adanet"});
        let config = BackendConfig::from_params(
            template(BackendKind::Docker, "workspace", &extra),
            provider(BackendKind::Docker, &data),
        )
        .unwrap();

        match config {
            BackendConfig::Docker(docker) => {
                assert_eq!(docker.host.as_deref(), Some("unix:///var/run/docker.sock"));
                assert_eq!(docker.network, "adanet");
                assert_eq!(docker.image, "workspace");
                assert_eq!(docker.limits.cpu_quota, Some(400_000));
                assert_eq!(docker.ip_poll, DOCKER_IP_POLL);
            }
            other => panic!("expected docker config, got {:?}", other),
        }
    }

    #[test]
    fn test_docker_missing_network() {
        let extra = Value::Null;
        let data = json!({"base_url": "unix:///var/run/docker.sock"});
        let err = BackendConfig::from_params(
            template(BackendKind::Docker, "workspace", &extra),
            provider(BackendKind::Docker, &data),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
        assert!(err.to_string().contains("network"));
    }

    #[test]
    fn test_kind_mismatch() {
        let extra = Value::Null;
        let data = json!({"base_url": "qemu:///system"});
        let err = BackendConfig::from_params(
            template(BackendKind::Docker, "workspace", &extra),
            provider(BackendKind::Libvirt, &data),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::KindMismatch { .. }));
    }

    #[test]
    fn test_libvirt_defaults() {
        let extra = json!({"ip_timeout_secs": 30});
        let data = json!({});
        let config = BackendConfig::from_params(
            template(BackendKind::Libvirt, "debian11-5", &extra),
            provider(BackendKind::Libvirt, &data),
        )
        .unwrap();

        match config {
            BackendConfig::Libvirt(libvirt) => {
                assert_eq!(libvirt.uri, DEFAULT_LIBVIRT_URI);
                assert_eq!(libvirt.source_domain, "debian11-5");
                assert_eq!(libvirt.vcpus, Some(4));
                assert_eq!(libvirt.memory_kib, Some(16 * 1024 * 1024));
                assert_eq!(libvirt.ip_poll.timeout, Duration::from_secs(30));
                assert_eq!(libvirt.ip_poll.interval, Duration::from_secs(1));
                assert_eq!(libvirt.boot_poll, LIBVIRT_BOOT_POLL);
            }
            other => panic!("expected libvirt config, got {:?}", other),
        }
    }

    #[test]
    fn test_openstack_config() {
        let extra = json!({
            "flavor_name": "c2.large",
            "network_uuid": "5be315b7-7ebd-4254-97fe-18c1df501538",
            "vol_size": "200",
            "has_https": true,
            "security_groups": [{"name": "HTTP"}, "SSH"],
        });
        let data = json!({
            "auth_url": "https://keystone.example.org:5000/v3",
            "user_domain_name": "stfc",
            "username": "svc",
            "password": "secret",
            "project_name": "portal",
        });
        let config = BackendConfig::from_params(
            template(BackendKind::OpenStack, "ubuntu-22.04", &extra),
            provider(BackendKind::OpenStack, &data),
        )
        .unwrap();

        match config {
            BackendConfig::OpenStack(os) => {
                assert_eq!(os.volume_size_gb, 200);
                assert_eq!(os.security_groups, vec!["HTTP", "SSH"]);
                assert_eq!(os.credentials.user_domain_name, "stfc");
                assert_eq!(os.credentials.project_domain_name, "Default");
                assert_eq!(os.volume_poll, OPENSTACK_VOLUME_POLL);
                assert!(!format!("{:?}", os.credentials).contains("secret"));
            }
            other => panic!("expected openstack config, got {:?}", other),
        }
    }

    #[test]
    fn test_openstack_requires_flavor() {
        let extra = json!({"network_uuid": "n", "vol_size": 10});
        let data = json!({"auth_url": "a", "username": "u", "project_name": "p"});
        let err = BackendConfig::from_params(
            template(BackendKind::OpenStack, "img", &extra),
            provider(BackendKind::OpenStack, &data),
        )
        .unwrap_err();
        assert!(err.to_string().contains("flavor_name"));
    }
}
