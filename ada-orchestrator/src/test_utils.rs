//! Fixtures for tests of this crate and of the HTTP service.

use crate::actor::Actor;
use crate::machine::MachineOrchestrator;
use crate::model::{DataSource, Machine, MachineTemplate, NewDataSource, NewProvider, NewTemplate};
use crate::registry::TaskRegistry;
use crate::resolver::NoopResolver;
use crate::store::Store;
use crate::transfer::{RemoteExecutor, TransferOrchestrator};
use ada_core::CoreError;
use ada_provider::mock::FakeBackendFactory;
use ada_provider::BackendKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // Every connection to `sqlite::memory:` is its own database, so keep
    // exactly one alive for the life of the pool.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Provider parameters accepted by the backend of `kind`.
pub fn provider_data(kind: BackendKind) -> Value {
    match kind {
        BackendKind::Docker => json!({"base_url": "unix:///var/run/docker.sock", "network": "adanet"}),
        BackendKind::Libvirt => json!({"base_url": "qemu:///system"}),
        BackendKind::OpenStack => json!({
            "auth_url": "https://keystone.example.org:5000/v3",
            "username": "portal",
            "password": "secret",
            "project_name": "analysis",
        }),
    }
}

/// Template parameters accepted by the backend of `kind`.
pub fn template_extra(kind: BackendKind) -> Value {
    match kind {
        BackendKind::Docker | BackendKind::Libvirt => json!({}),
        BackendKind::OpenStack => json!({
            "flavor_name": "c2.large",
            "network_uuid": "5be315b7-7ebd-4254-97fe-18c1df501538",
            "vol_size": "200",
            "security_groups": [{"name": "HTTP"}, "SSH"],
        }),
    }
}

/// A template with 4 cores and 16 GB backed by its own provider.
pub async fn seed_template(
    store: &Store,
    kind: BackendKind,
    name: &str,
    group: &str,
) -> MachineTemplate {
    let provider = format!("{name}-provider");
    store
        .upsert_provider(&NewProvider {
            name: provider.clone(),
            kind,
            customer: "test".to_string(),
            provider_data: provider_data(kind),
        })
        .await
        .expect("Failed to seed provider");

    store
        .upsert_template(&NewTemplate {
            name: name.to_string(),
            kind,
            image: format!("{name}-image"),
            description: None,
            cpu_limit_cores: Some(4),
            memory_limit_gb: Some(16),
            group_name: group.to_string(),
            provider,
            extra_data: template_extra(kind),
        })
        .await
        .expect("Failed to seed template")
}

pub async fn seed_data_source(store: &Store, host: &str, dir: &str, users: &[&str]) -> DataSource {
    store
        .upsert_data_source(&NewDataSource {
            source_host: host.to_string(),
            source_dir: dir.to_string(),
            data_size_mb: 512,
            users: users.iter().map(|u| u.to_string()).collect(),
        })
        .await
        .expect("Failed to seed data source")
}

/// One recorded remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub user: String,
    pub host: String,
    pub command: String,
}

/// [`RemoteExecutor`] that records commands instead of running them.
#[derive(Debug)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<RemoteCall>>,
    failure: Mutex<Option<String>>,
    open: watch::Sender<bool>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            open: watch::Sender::new(true),
        }
    }
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every following command exit non-zero with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Hold commands until [`RecordingExecutor::release`].
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(&self, user: &str, host: &str, command: &str) -> ada_core::Result<()> {
        self.calls.lock().unwrap().push(RemoteCall {
            user: user.to_string(),
            host: host.to_string(),
            command: command.to_string(),
        });

        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(CoreError::Command(message)),
            None => Ok(()),
        }
    }
}

/// Both orchestrators wired to in-memory fakes.
pub struct TestHarness {
    pub store: Store,
    pub backends: Arc<FakeBackendFactory>,
    pub executor: Arc<RecordingExecutor>,
    pub registry: Arc<TaskRegistry>,
    pub machines: MachineOrchestrator,
    pub transfers: TransferOrchestrator,
}

impl TestHarness {
    pub async fn new() -> Self {
        let store = Store::new(create_test_db().await);
        let backends = Arc::new(FakeBackendFactory::new());
        let executor = Arc::new(RecordingExecutor::default());
        let registry = Arc::new(TaskRegistry::new());

        let machines = MachineOrchestrator::new(
            store.clone(),
            backends.clone(),
            registry.clone(),
            Arc::new(NoopResolver),
        );
        let transfers = TransferOrchestrator::new(store.clone(), registry.clone(), executor.clone());

        Self {
            store,
            backends,
            executor,
            registry,
            machines,
            transfers,
        }
    }

    /// Reload a machine straight from the store.
    pub async fn machine(&self, id: &str) -> Machine {
        self.store
            .get_machine(id)
            .await
            .expect("Failed to load machine")
            .expect("Machine missing")
    }

    /// Create a machine from `template` and wait for its creation task.
    pub async fn provisioned_machine(&self, template: &str, actor: &Actor) -> Machine {
        let machine = self
            .machines
            .create_machine(template, actor)
            .await
            .expect("Failed to create machine");
        self.registry.wait_for(&machine.id).await;
        self.machine(&machine.id).await
    }
}
