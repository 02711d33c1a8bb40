use crate::config::Config;
use ada_orchestrator::{
    MachineOrchestrator, SshExecutor, Store, SystemResolver, TaskRegistry, TransferOrchestrator,
};
use ada_provider::CliBackendFactory;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub machines: MachineOrchestrator,
    pub transfers: TransferOrchestrator,
}

impl AppState {
    pub fn new(machines: MachineOrchestrator, transfers: TransferOrchestrator) -> Self {
        Self {
            machines,
            transfers,
        }
    }

    /// Orchestrators backed by the real CLIs, sharing one task registry.
    pub fn production(pool: SqlitePool, config: &Config) -> Self {
        let store = Store::new(pool);
        let registry = Arc::new(TaskRegistry::new());

        let machines = MachineOrchestrator::new(
            store.clone(),
            Arc::new(CliBackendFactory::new()),
            registry.clone(),
            Arc::new(SystemResolver),
        )
        .with_options(config.lifecycle_options());
        let transfers = TransferOrchestrator::new(store, registry, Arc::new(SshExecutor))
            .with_settings(config.transfer_settings());

        Self::new(machines, transfers)
    }

    pub fn store(&self) -> &Store {
        self.machines.store()
    }
}
