//! In-memory backend clients for tests.
//!
//! The fakes record every call, keep just enough state to answer the
//! adapters' polling questions, and can be told to fail or to hold a create
//! until released. [`FakeBackendFactory`] wires them to a [`ManualClock`] so
//! timeouts elapse instantly.

use crate::backend::MachineBackend;
use crate::config::BackendConfig;
use crate::docker::{ContainerSpec, DockerAdapter, DockerApi};
use crate::error::{ProviderError, Result};
use crate::factory::BackendFactory;
use crate::libvirt::{LibvirtAdapter, LibvirtApi};
use crate::openstack::{OpenStackAdapter, OpenStackApi, ServerRequest, VolumeRequest};
use ada_core::ManualClock;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ordered record of client calls, e.g. `"run alice-62EDjx"`.
#[derive(Debug, Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn record(&self, call: impl Into<String>) {
        lock(&self.0).push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        lock(&self.0).iter().any(|call| call.starts_with(prefix))
    }
}

/// Holds provisioning calls until released.
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: watch::Sender::new(true),
        }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

// --- Docker ---

#[derive(Debug)]
pub struct FakeDocker {
    pub calls: CallLog,
    pub gate: Gate,
    /// Address assigned to new containers; `None` never assigns one.
    ip: Mutex<Option<String>>,
    fail_run: Mutex<Option<String>>,
    /// Container name to address.
    containers: Mutex<HashMap<String, Option<String>>>,
    specs: Mutex<Vec<ContainerSpec>>,
}

impl Default for FakeDocker {
    fn default() -> Self {
        Self {
            calls: CallLog::default(),
            gate: Gate::new(),
            ip: Mutex::new(Some("172.18.0.7".to_string())),
            fail_run: Mutex::new(None),
            containers: Mutex::new(HashMap::new()),
            specs: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDocker {
    pub fn set_ip(&self, ip: Option<&str>) {
        *lock(&self.ip) = ip.map(str::to_string);
    }

    pub fn fail_run(&self, message: &str) {
        *lock(&self.fail_run) = Some(message.to_string());
    }

    pub fn add_container(&self, name: &str, ip: Option<&str>) {
        lock(&self.containers).insert(name.to_string(), ip.map(str::to_string));
    }

    pub fn has_container(&self, name: &str) -> bool {
        lock(&self.containers).contains_key(name)
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        lock(&self.specs).clone()
    }
}

#[async_trait]
impl DockerApi for FakeDocker {
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.calls.record(format!("run {}", spec.name));
        self.gate.pass().await;
        if let Some(message) = lock(&self.fail_run).clone() {
            return Err(ProviderError::Backend(message));
        }
        lock(&self.specs).push(spec.clone());
        let ip = lock(&self.ip).clone();
        lock(&self.containers).insert(spec.name.clone(), ip);
        Ok(format!("id-{}", spec.name))
    }

    async fn container_ip(&self, container: &str, _network: &str) -> Result<Option<String>> {
        match lock(&self.containers).get(container) {
            Some(ip) => Ok(ip.clone()),
            None => Err(ProviderError::Backend(format!("No such container: {container}"))),
        }
    }

    async fn find_container_by_ip(&self, _network: &str, ip: &str) -> Result<Option<String>> {
        Ok(lock(&self.containers)
            .iter()
            .find(|(_, address)| address.as_deref() == Some(ip))
            .map(|(name, _)| name.clone()))
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.has_container(container))
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        self.calls.record(format!("stop {container}"));
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.calls.record(format!("rm {container}"));
        lock(&self.containers).remove(container);
        Ok(())
    }
}

// --- libvirt ---

#[derive(Debug)]
pub struct FakeLibvirt {
    pub calls: CallLog,
    pub gate: Gate,
    /// Lease handed out once a domain runs; `None` never hands one out.
    ip: Mutex<Option<String>>,
    domains: Mutex<HashMap<String, String>>,
    volumes: Mutex<Vec<(String, String)>>,
}

impl Default for FakeLibvirt {
    fn default() -> Self {
        Self {
            calls: CallLog::default(),
            gate: Gate::new(),
            ip: Mutex::new(Some("192.168.122.45".to_string())),
            domains: Mutex::new(HashMap::new()),
            volumes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLibvirt {
    pub fn set_ip(&self, ip: Option<&str>) {
        *lock(&self.ip) = ip.map(str::to_string);
    }

    pub fn has_domain(&self, name: &str) -> bool {
        lock(&self.domains).contains_key(name)
    }

    pub fn volumes(&self) -> Vec<(String, String)> {
        lock(&self.volumes).clone()
    }
}

#[async_trait]
impl LibvirtApi for FakeLibvirt {
    async fn clone_domain(&self, source: &str, name: &str) -> Result<()> {
        self.calls.record(format!("clone {source} {name}"));
        self.gate.pass().await;
        lock(&self.domains).insert(name.to_string(), "shut off".to_string());
        lock(&self.volumes).push(("default".to_string(), format!("{name}.qcow2")));
        Ok(())
    }

    async fn set_vcpus(&self, name: &str, vcpus: u32) -> Result<()> {
        self.calls.record(format!("setvcpus {name} {vcpus}"));
        Ok(())
    }

    async fn set_memory(&self, name: &str, kib: u64) -> Result<()> {
        self.calls.record(format!("setmem {name} {kib}"));
        Ok(())
    }

    async fn start_domain(&self, name: &str) -> Result<()> {
        self.calls.record(format!("start {name}"));
        lock(&self.domains).insert(name.to_string(), "running".to_string());
        Ok(())
    }

    async fn domain_state(&self, name: &str) -> Result<Option<String>> {
        Ok(lock(&self.domains).get(name).cloned())
    }

    async fn domain_ipv4(&self, _name: &str) -> Result<Option<String>> {
        Ok(lock(&self.ip).clone())
    }

    async fn destroy_domain(&self, name: &str) -> Result<()> {
        self.calls.record(format!("destroy {name}"));
        if let Some(state) = lock(&self.domains).get_mut(name) {
            *state = "shut off".to_string();
        }
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let pools: HashSet<String> = lock(&self.volumes)
            .iter()
            .map(|(pool, _)| pool.clone())
            .collect();
        Ok(pools.into_iter().collect())
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        Ok(lock(&self.volumes)
            .iter()
            .filter(|(p, _)| p == pool)
            .map(|(_, volume)| volume.clone())
            .collect())
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<()> {
        self.calls.record(format!("vol-delete {pool} {volume}"));
        lock(&self.volumes).retain(|(p, v)| !(p == pool && v == volume));
        Ok(())
    }

    async fn undefine_domain(&self, name: &str) -> Result<()> {
        self.calls.record(format!("undefine {name}"));
        lock(&self.domains).remove(name);
        Ok(())
    }
}

// --- OpenStack ---

#[derive(Debug)]
pub struct FakeOpenStack {
    pub calls: CallLog,
    pub gate: Gate,
    volume_status: Mutex<String>,
    server_status: Mutex<String>,
    ip: Mutex<Option<String>>,
    servers: Mutex<HashSet<String>>,
    volumes: Mutex<HashSet<String>>,
}

impl Default for FakeOpenStack {
    fn default() -> Self {
        Self {
            calls: CallLog::default(),
            gate: Gate::new(),
            volume_status: Mutex::new("available".to_string()),
            server_status: Mutex::new("ACTIVE".to_string()),
            ip: Mutex::new(Some("172.16.101.23".to_string())),
            servers: Mutex::new(HashSet::new()),
            volumes: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeOpenStack {
    pub fn set_volume_status(&self, status: &str) {
        *lock(&self.volume_status) = status.to_string();
    }

    pub fn set_server_status(&self, status: &str) {
        *lock(&self.server_status) = status.to_string();
    }

    pub fn set_ip(&self, ip: Option<&str>) {
        *lock(&self.ip) = ip.map(str::to_string);
    }

    pub fn has_server(&self, name: &str) -> bool {
        lock(&self.servers).contains(name)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        lock(&self.volumes).contains(name)
    }
}

#[async_trait]
impl OpenStackApi for FakeOpenStack {
    async fn find_network(&self, network: &str) -> Result<String> {
        Ok(network.to_string())
    }

    async fn find_flavor(&self, flavor: &str) -> Result<String> {
        Ok(format!("flavor-{flavor}"))
    }

    async fn find_image(&self, image: &str) -> Result<String> {
        Ok(format!("image-{image}"))
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<String> {
        self.calls
            .record(format!("volume create {} {}", request.name, request.size_gb));
        self.gate.pass().await;
        lock(&self.volumes).insert(request.name.clone());
        Ok(format!("vol-{}", request.name))
    }

    async fn volume_status(&self, _volume_id: &str) -> Result<String> {
        Ok(lock(&self.volume_status).clone())
    }

    async fn create_server(&self, request: &ServerRequest) -> Result<String> {
        self.calls.record(format!(
            "server create {} {}",
            request.name,
            request.security_groups.join(",")
        ));
        lock(&self.servers).insert(request.name.clone());
        Ok(format!("srv-{}", request.name))
    }

    async fn server_status(&self, _server_id: &str) -> Result<String> {
        Ok(lock(&self.server_status).clone())
    }

    async fn server_fixed_ipv4(
        &self,
        _server_id: &str,
        _network_id: &str,
    ) -> Result<Option<String>> {
        Ok(lock(&self.ip).clone())
    }

    async fn delete_server(&self, name: &str) -> Result<()> {
        self.calls.record(format!("server delete {name}"));
        if lock(&self.servers).remove(name) {
            // delete_on_termination
            lock(&self.volumes).remove(&format!("{name}_boot"));
        }
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.calls.record(format!("volume delete {name}"));
        lock(&self.volumes).remove(name);
        Ok(())
    }
}

/// [`BackendFactory`] handing out the shared fakes.
#[derive(Debug, Default)]
pub struct FakeBackendFactory {
    pub docker: Arc<FakeDocker>,
    pub libvirt: Arc<FakeLibvirt>,
    pub openstack: Arc<FakeOpenStack>,
    pub clock: Arc<ManualClock>,
}

impl FakeBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendFactory for FakeBackendFactory {
    fn build(&self, config: BackendConfig) -> Result<MachineBackend> {
        Ok(match config {
            BackendConfig::Docker(config) => MachineBackend::Docker(DockerAdapter::new(
                config,
                self.docker.clone(),
                self.clock.clone(),
            )),
            BackendConfig::Libvirt(config) => MachineBackend::Libvirt(LibvirtAdapter::new(
                config,
                self.libvirt.clone(),
                self.clock.clone(),
            )),
            BackendConfig::OpenStack(config) => MachineBackend::OpenStack(OpenStackAdapter::new(
                config,
                self.openstack.clone(),
                self.clock.clone(),
            )),
        })
    }
}
