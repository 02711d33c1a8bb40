//! Copying registered data sources onto ready machines.
//!
//! The copy runs on the source host: we ssh there and start an rsync that
//! pushes the directory to the machine over a second ssh hop.

use crate::actor::Actor;
use crate::error::{OrchestratorError, Result};
use crate::model::{DataSource, DataTransferJob, JobState, Machine, MachineState};
use crate::operation::{OperationStatus, OperationType};
use crate::registry::{TaskKind, TaskRegistry};
use crate::store::Store;
use ada_core::command::CliCommand;
use ada_core::validation::{validate_server_address, validate_shell_safe};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Runs a command line on a remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` as `user` on `host`; a non-zero exit is an error.
    async fn run(&self, user: &str, host: &str, command: &str) -> ada_core::Result<()>;
}

/// `ssh` in batch mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshExecutor;

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, user: &str, host: &str, command: &str) -> ada_core::Result<()> {
        ssh_command(user, host, command).execute_async().await
    }
}

/// Non-interactive ssh to `user@host` running `command`. Host keys are not
/// checked or recorded, the same as for the rsync hop.
fn ssh_command(user: &str, host: &str, command: &str) -> CliCommand {
    CliCommand::new("ssh")
        .args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
        ])
        .arg(format!("{user}@{host}"))
        .arg(command)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Login on the data source host.
    pub source_user: String,
    /// Login on the destination machine.
    pub dest_user: String,
    /// Target directory on the machine, relative to the login's home.
    pub dest_dir: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            source_user: "root".to_string(),
            dest_user: "ubuntu".to_string(),
            dest_dir: String::new(),
        }
    }
}

/// rsync invocation run on the source host.
pub fn rsync_command(source_dir: &str, dest_user: &str, dest_ip: &str, dest_dir: &str) -> String {
    format!(
        "rsync -avz -e 'ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null' \
         {source_dir} {dest_user}@{dest_ip}:{dest_dir}"
    )
}

#[derive(Clone)]
pub struct TransferOrchestrator {
    store: Store,
    registry: Arc<TaskRegistry>,
    executor: Arc<dyn RemoteExecutor>,
    settings: TransferSettings,
}

impl TransferOrchestrator {
    pub fn new(store: Store, registry: Arc<TaskRegistry>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            store,
            registry,
            executor,
            settings: TransferSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: TransferSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Persist a `RUNNING` job and dispatch the copy.
    ///
    /// Nothing is written unless the actor may use both the data source and
    /// the machine and the machine is `READY`.
    pub async fn start_transfer(
        &self,
        data_source_id: &str,
        machine_id: &str,
        actor: &Actor,
    ) -> Result<DataTransferJob> {
        let source = self
            .store
            .get_data_source(data_source_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("data source {data_source_id}")))?;
        let machine = self
            .store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("machine {machine_id}")))?;

        if !actor.is_admin {
            if !source.users.iter().any(|user| user == &actor.user) {
                return Err(OrchestratorError::Forbidden(format!(
                    "{} may not use data source {}",
                    actor.user,
                    source.location()
                )));
            }
            if !machine.is_accessible_by(&actor.user) {
                return Err(OrchestratorError::Forbidden(format!(
                    "machine {} is not shared with {}",
                    machine.name, actor.user
                )));
            }
        }

        if machine.state != MachineState::Ready {
            return Err(OrchestratorError::Forbidden(format!(
                "machine {} is {}, not READY",
                machine.name, machine.state
            )));
        }

        let command = self.command_for(&source, &machine)?;

        let job = DataTransferJob {
            id: Uuid::new_v4().to_string(),
            state: JobState::Running,
            user: actor.user.clone(),
            data_source_id: source.id.clone(),
            machine_id: machine.id.clone(),
            created_at: Utc::now(),
            finish_date: None,
            error_message: None,
        };
        self.store.insert_job(&job).await?;
        let operation_id = self
            .store
            .record_operation(&machine.id, OperationType::Transfer, OperationStatus::Running)
            .await?;

        info!(
            job_id = %job.id,
            source = %source.location(),
            machine = %machine.name,
            user = %job.user,
            "transfer started"
        );

        self.dispatch(&job, source.source_host, command, operation_id)?;
        Ok(job)
    }

    fn command_for(&self, source: &DataSource, machine: &Machine) -> Result<String> {
        validate_server_address(&source.source_host)?;
        validate_server_address(&machine.ip)?;
        validate_shell_safe(&source.source_dir, "source directory")?;
        validate_shell_safe(&self.settings.source_user, "source user")?;
        validate_shell_safe(&self.settings.dest_user, "destination user")?;
        validate_shell_safe(&self.settings.dest_dir, "destination directory")?;

        Ok(rsync_command(
            &source.source_dir,
            &self.settings.dest_user,
            &machine.ip,
            &self.settings.dest_dir,
        ))
    }

    fn dispatch(
        &self,
        job: &DataTransferJob,
        source_host: String,
        command: String,
        operation_id: String,
    ) -> Result<()> {
        let span = info_span!("transfer", job_id = %job.id, host = %source_host);
        let store = self.store.clone();
        let executor = self.executor.clone();
        let user = self.settings.source_user.clone();
        let job_id = job.id.clone();

        let task = {
            let job_id = job_id.clone();
            let operation_id = operation_id.clone();
            async move {
                let outcome = executor.run(&user, &source_host, &command).await;
                let error = match &outcome {
                    Ok(()) => {
                        info!("transfer finished");
                        None
                    }
                    Err(e) => {
                        error!("transfer failed: {}", e);
                        Some(e.to_string())
                    }
                };
                record_outcome(&store, &job_id, &operation_id, error.as_deref()).await;
            }
            .instrument(span)
        };

        let store = self.store.clone();
        let on_panic = {
            let job_id = job_id.clone();
            async move {
                record_outcome(&store, &job_id, &operation_id, Some("transfer task panicked")).await;
            }
        };

        self.registry.spawn(&job_id, TaskKind::Transfer, task, on_panic)
    }

    /// Hide a job from its owner's list. Running copies keep running.
    pub async fn dismiss_transfer(&self, job_id: &str, actor: &Actor) -> Result<DataTransferJob> {
        let job = self.load(job_id).await?;
        if job.user != actor.user {
            return Err(OrchestratorError::Forbidden(format!(
                "job {} belongs to {}",
                job.id, job.user
            )));
        }

        if job.state != JobState::Hidden {
            self.store.hide_job(&job.id).await?;
        }
        self.load(job_id).await
    }

    pub async fn list_visible_jobs(&self, actor: &Actor) -> Result<Vec<DataTransferJob>> {
        self.store.list_visible_jobs(&actor.user).await
    }

    /// `host:dir` of the data sources already copied onto a machine.
    pub async fn copied_sources(&self, machine_id: &str, actor: &Actor) -> Result<Vec<String>> {
        let machine = self
            .store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("machine {machine_id}")))?;
        if !actor.is_admin && !machine.is_accessible_by(&actor.user) {
            return Err(OrchestratorError::Forbidden(format!(
                "machine {} is not shared with {}",
                machine.name, actor.user
            )));
        }
        self.store.copied_sources(&machine.id).await
    }

    pub async fn list_data_sources(&self, actor: &Actor) -> Result<Vec<DataSource>> {
        let user = (!actor.is_admin).then_some(actor.user.as_str());
        self.store.list_data_sources(user).await
    }

    async fn load(&self, job_id: &str) -> Result<DataTransferJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("transfer job {job_id}")))
    }
}

async fn record_outcome(store: &Store, job_id: &str, operation_id: &str, error: Option<&str>) {
    let (state, status) = match error {
        None => (JobState::Done, OperationStatus::Success),
        Some(_) => (JobState::Failed, OperationStatus::Failed),
    };

    if let Err(e) = store.finish_job(job_id, state, error).await {
        error!(job_id, "failed to record transfer outcome: {}", e);
    }
    if let Err(e) = store.finish_operation(operation_id, status, error).await {
        error!(operation_id, "failed to record operation outcome: {}", e);
    }
}
