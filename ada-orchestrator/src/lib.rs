//! Machine lifecycle and data transfer orchestration
//!
//! This crate contains the core business logic of the portal: the data model
//! and its SQLite store, the lifecycle orchestrator driving machines through
//! the backend adapters, and the transfer orchestrator copying data sources
//! onto ready machines. It is consumed by the ada-api HTTP service but can
//! also be used by CLI commands or background workers.

pub mod actor;
pub mod catalog;
pub mod db;
pub mod error;
pub mod expiry;
pub mod machine;
pub mod model;
pub mod operation;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod transfer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use actor::Actor;
pub use catalog::Catalog;
pub use error::{OrchestratorError, Result};
pub use expiry::{ExpiryReport, ExpiryRule};
pub use machine::{LifecycleOptions, MachineOrchestrator, ReconcileReport};
pub use model::{
    DataSource, DataTransferJob, JobState, Machine, MachineProvider, MachineState,
    MachineTemplate, NewDataSource, NewProvider, NewTemplate,
};
pub use operation::{Operation, OperationFilters, OperationStatus, OperationType};
pub use registry::{TaskKind, TaskRegistry};
pub use resolver::{HostnameResolver, NoopResolver, SystemResolver};
pub use store::Store;
pub use transfer::{RemoteExecutor, SshExecutor, TransferOrchestrator, TransferSettings};
