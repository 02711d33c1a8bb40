//! Machine lifecycle orchestration.
//!
//! Request-side operations validate and persist synchronously, then hand the
//! backend work to a task in the [`TaskRegistry`]. Tasks never return errors
//! to a caller: every failure ends as a `FAILED` machine with an
//! `error_message`.

use crate::actor::Actor;
use crate::error::{OrchestratorError, Result};
use crate::expiry::{ExpiryReport, ExpiryRule};
use crate::model::{Machine, MachineProvider, MachineState, MachineTemplate};
use crate::operation::{Operation, OperationFilters, OperationStatus, OperationType};
use crate::registry::{TaskKind, TaskRegistry};
use crate::resolver::HostnameResolver;
use crate::store::Store;
use ada_core::naming::{disambiguate, safe_machine_name};
use ada_core::token::generate_share_token;
use ada_core::validation::validate_machine_name;
use ada_provider::{BackendConfig, BackendFactory, InstanceRef, MachineBackend};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

const CANCELLED_BY_DESTROY: &str = "creation cancelled by destroy request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Re-run teardown for machines found `DELETING` at startup instead of
    /// failing them.
    pub redispatch_deleting: bool,
    /// Upper bound on the reverse DNS lookup of a new machine's address.
    pub hostname_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            redispatch_deleting: true,
            hostname_timeout: Duration::from_secs(5),
        }
    }
}

/// What [`MachineOrchestrator::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub failed_provisioning: Vec<String>,
    pub redispatched_deleting: Vec<String>,
    pub failed_deleting: Vec<String>,
    pub failed_jobs: u64,
}

#[derive(Clone)]
pub struct MachineOrchestrator {
    store: Store,
    backends: Arc<dyn BackendFactory>,
    registry: Arc<TaskRegistry>,
    resolver: Arc<dyn HostnameResolver>,
    options: LifecycleOptions,
}

impl MachineOrchestrator {
    pub fn new(
        store: Store,
        backends: Arc<dyn BackendFactory>,
        registry: Arc<TaskRegistry>,
        resolver: Arc<dyn HostnameResolver>,
    ) -> Self {
        Self {
            store,
            backends,
            registry,
            resolver,
            options: LifecycleOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Persist a new `PROVISIONING` machine and dispatch its creation.
    pub async fn create_machine(&self, template_name: &str, actor: &Actor) -> Result<Machine> {
        let template = self
            .store
            .get_template_by_name(template_name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("template {template_name}")))?;

        if !actor.may_use_group(&template.group_name) {
            return Err(OrchestratorError::Forbidden(format!(
                "template {} belongs to group {}",
                template.name, template.group_name
            )));
        }

        let provider = self
            .store
            .get_provider(&template.provider_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("provider of template {}", template.name))
            })?;

        let now = Utc::now();
        let name = self.unique_name(&actor.user, now).await?;
        let machine = Machine {
            id: Uuid::new_v4().to_string(),
            display_name: name.clone(),
            name,
            ip: String::new(),
            hostname: String::new(),
            token: generate_share_token(),
            state: MachineState::Provisioning,
            owner: actor.user.clone(),
            shared_with: Vec::new(),
            template_id: template.id.clone(),
            created_at: now,
            updated_at: now,
            error_message: None,
        };

        self.store.insert_machine(&machine).await?;
        let operation_id = self
            .store
            .record_operation(&machine.id, OperationType::Create, OperationStatus::Running)
            .await?;

        info!(
            machine_id = %machine.id,
            machine = %machine.name,
            kind = %template.kind,
            owner = %machine.owner,
            "machine requested"
        );

        self.dispatch_create(machine.clone(), template, provider, operation_id)?;
        Ok(machine)
    }

    /// Owner's name plus the encoded creation time, with a random suffix on
    /// the rare collision within one second.
    async fn unique_name(&self, owner: &str, at: chrono::DateTime<Utc>) -> Result<String> {
        let base = safe_machine_name(owner, at);
        let mut candidate = base.clone();
        while self.store.machine_name_exists(&candidate).await? {
            candidate = disambiguate(&base);
        }
        Ok(candidate)
    }

    fn dispatch_create(
        &self,
        machine: Machine,
        template: MachineTemplate,
        provider: MachineProvider,
        operation_id: String,
    ) -> Result<()> {
        let span = info_span!(
            "create_machine",
            machine_id = %machine.id,
            machine = %machine.name,
            kind = %template.kind
        );

        let this = self.clone();
        let id = machine.id.clone();
        let task = {
            let operation_id = operation_id.clone();
            async move { this.provision(machine, template, provider, operation_id).await }
                .instrument(span)
        };

        let store = self.store.clone();
        let on_panic = {
            let id = id.clone();
            async move {
                fail_machine(&store, &id, MachineState::Provisioning, "provisioning task panicked")
                    .await;
                finish_operation(&store, &operation_id, Some("provisioning task panicked")).await;
            }
        };

        self.registry.spawn(&id, TaskKind::Create, task, on_panic)
    }

    async fn provision(
        &self,
        machine: Machine,
        template: MachineTemplate,
        provider: MachineProvider,
        operation_id: String,
    ) {
        let outcome = async {
            let backend = self.build_backend(&template, &provider)?;
            let provisioned = backend.create(&machine.name).await?;
            Ok::<_, OrchestratorError>(provisioned)
        }
        .await;

        match outcome {
            Ok(provisioned) => {
                let hostname = self.lookup_hostname(&provisioned.ip).await;
                match self
                    .store
                    .complete_provisioning(&machine.id, &provisioned.ip, &hostname)
                    .await
                {
                    Ok(true) => {
                        info!(ip = %provisioned.ip, hostname = %hostname, "machine ready");
                        finish_operation(&self.store, &operation_id, None).await;
                    }
                    Ok(false) => {
                        warn!(ip = %provisioned.ip, "machine left PROVISIONING before creation finished");
                        finish_operation(
                            &self.store,
                            &operation_id,
                            Some("machine state changed during creation"),
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("failed to record provisioned machine: {}", e);
                        let message = format!(
                            "failed to record provisioned machine: {e}; backend resources of {} may need manual cleanup",
                            machine.name
                        );
                        fail_machine(&self.store, &machine.id, MachineState::Provisioning, &message)
                            .await;
                        finish_operation(&self.store, &operation_id, Some(&message)).await;
                    }
                }
            }
            Err(e) => {
                error!("machine creation failed: {}", e);
                let message = e.to_string();
                fail_machine(&self.store, &machine.id, MachineState::Provisioning, &message).await;
                finish_operation(&self.store, &operation_id, Some(&message)).await;
            }
        }
    }

    /// Best effort: a slow or failing lookup leaves the hostname empty.
    async fn lookup_hostname(&self, ip: &str) -> String {
        match tokio::time::timeout(self.options.hostname_timeout, self.resolver.hostname(ip)).await {
            Ok(hostname) => hostname,
            Err(_) => {
                warn!(%ip, timeout = ?self.options.hostname_timeout, "hostname lookup timed out");
                String::new()
            }
        }
    }

    fn build_backend(
        &self,
        template: &MachineTemplate,
        provider: &MachineProvider,
    ) -> Result<MachineBackend> {
        let config = BackendConfig::from_params(template.params(), provider.params())
            .map_err(|e| match e {
                ada_provider::ProviderError::KindMismatch { .. } => {
                    OrchestratorError::Invariant(e.to_string())
                }
                other => other.into(),
            })?;
        Ok(self.backends.build(config)?)
    }

    /// Request teardown of a machine.
    ///
    /// Returns the machine as it stands after the request: `DELETING` once
    /// teardown was dispatched, unchanged for machines already deleting or
    /// deleted. A machine still provisioning is failed first; its teardown
    /// starts once the creation task has finished its current backend call.
    pub async fn destroy_machine(&self, id: &str, actor: &Actor) -> Result<Machine> {
        let machine = self.load(id).await?;

        if !actor.owns_or_admin(&machine.owner) {
            return Err(OrchestratorError::Forbidden(format!(
                "{} may not destroy machine {}",
                actor.user, machine.name
            )));
        }

        let machine = match machine.state {
            MachineState::Deleting | MachineState::Deleted => return Ok(machine),
            MachineState::Provisioning => self.cancel_creation(machine).await?,
            MachineState::Ready | MachineState::Failed => machine,
        };

        info!(machine_id = %machine.id, machine = %machine.name, by = %actor.user, "destroy requested");
        self.begin_teardown(machine).await
    }

    async fn cancel_creation(&self, machine: Machine) -> Result<Machine> {
        let cancelled = self
            .store
            .set_machine_state(
                &machine.id,
                MachineState::Provisioning,
                MachineState::Failed,
                Some(CANCELLED_BY_DESTROY),
            )
            .await?;

        let machine = self.load(&machine.id).await?;
        let (status, error) = match machine.state {
            MachineState::Ready if !cancelled => (OperationStatus::Success, None),
            _ => (OperationStatus::Failed, Some(CANCELLED_BY_DESTROY)),
        };
        self.store
            .close_operations(&machine.id, OperationType::Create, status, error)
            .await?;

        Ok(machine)
    }

    async fn begin_teardown(&self, machine: Machine) -> Result<Machine> {
        if !matches!(machine.state, MachineState::Ready | MachineState::Failed) {
            return Ok(machine);
        }

        let moved = self
            .store
            .set_machine_state(&machine.id, machine.state, MachineState::Deleting, None)
            .await?;

        let current = self.load(&machine.id).await?;
        if !moved {
            return match current.state {
                MachineState::Deleting | MachineState::Deleted => Ok(current),
                other => Err(OrchestratorError::InvalidState(format!(
                    "machine {} changed to {} during destroy",
                    current.name, other
                ))),
            };
        }

        self.dispatch_destroy(current.clone()).await?;
        Ok(current)
    }

    async fn dispatch_destroy(&self, machine: Machine) -> Result<()> {
        let operation_id = self
            .store
            .record_operation(&machine.id, OperationType::Destroy, OperationStatus::Running)
            .await?;

        let span = info_span!("destroy_machine", machine_id = %machine.id, machine = %machine.name);
        let this = self.clone();
        let id = machine.id.clone();
        let task = {
            let operation_id = operation_id.clone();
            async move { this.teardown(machine, operation_id).await }.instrument(span)
        };

        let store = self.store.clone();
        let on_panic = {
            let id = id.clone();
            async move {
                fail_machine(&store, &id, MachineState::Deleting, "teardown task panicked").await;
                finish_operation(&store, &operation_id, Some("teardown task panicked")).await;
            }
        };

        // Queued behind a create task that is still running.
        self.registry.spawn_after(&id, TaskKind::Destroy, task, on_panic)
    }

    async fn teardown(&self, machine: Machine, operation_id: String) {
        let outcome = async {
            let template = self
                .store
                .get_template(&machine.template_id)
                .await?
                .ok_or_else(|| {
                    OrchestratorError::NotFound(format!("template {}", machine.template_id))
                })?;
            let provider = self
                .store
                .get_provider(&template.provider_id)
                .await?
                .ok_or_else(|| {
                    OrchestratorError::NotFound(format!("provider of template {}", template.name))
                })?;

            let backend = self.build_backend(&template, &provider)?;
            let instance = InstanceRef {
                name: machine.name.clone(),
                ip: machine.ip.clone(),
            };
            backend.destroy(&instance).await?;
            Ok::<_, OrchestratorError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                match self
                    .store
                    .set_machine_state(&machine.id, MachineState::Deleting, MachineState::Deleted, None)
                    .await
                {
                    Ok(true) => info!("machine deleted"),
                    Ok(false) => warn!("machine left DELETING before teardown finished"),
                    Err(e) => error!("failed to record deleted machine: {}", e),
                }
                finish_operation(&self.store, &operation_id, None).await;
            }
            Err(e) => {
                error!("machine teardown failed: {}", e);
                let message = e.to_string();
                fail_machine(&self.store, &machine.id, MachineState::Deleting, &message).await;
                finish_operation(&self.store, &operation_id, Some(&message)).await;
            }
        }
    }

    /// Resolve machines left mid-transition by a previous process.
    ///
    /// `PROVISIONING` machines fail, flagged for manual cleanup since their
    /// backend resources may exist. `DELETING` machines get their teardown
    /// dispatched again, or fail when re-dispatch is disabled. Transfer jobs
    /// still `RUNNING` fail.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for machine in self.store.machines_in_state(MachineState::Provisioning).await? {
            self.registry.abort(&machine.id);

            let message = format!(
                "provisioning interrupted; backend resources of {} may need manual cleanup",
                machine.name
            );
            if self
                .store
                .set_machine_state(
                    &machine.id,
                    MachineState::Provisioning,
                    MachineState::Failed,
                    Some(&message),
                )
                .await?
            {
                self.store
                    .close_operations(
                        &machine.id,
                        OperationType::Create,
                        OperationStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                warn!(machine_id = %machine.id, machine = %machine.name, "failed interrupted provisioning");
                report.failed_provisioning.push(machine.id);
            }
        }

        for machine in self.store.machines_in_state(MachineState::Deleting).await? {
            if self.registry.is_active(&machine.id) {
                continue;
            }

            let message = "teardown interrupted";
            self.store
                .close_operations(
                    &machine.id,
                    OperationType::Destroy,
                    OperationStatus::Failed,
                    Some(message),
                )
                .await?;

            if self.options.redispatch_deleting {
                info!(machine_id = %machine.id, machine = %machine.name, "re-dispatching teardown");
                let id = machine.id.clone();
                self.dispatch_destroy(machine).await?;
                report.redispatched_deleting.push(id);
            } else if self
                .store
                .set_machine_state(
                    &machine.id,
                    MachineState::Deleting,
                    MachineState::Failed,
                    Some(message),
                )
                .await?
            {
                warn!(machine_id = %machine.id, machine = %machine.name, "failed interrupted teardown");
                report.failed_deleting.push(machine.id);
            }
        }

        report.failed_jobs = self
            .store
            .fail_running_jobs("transfer interrupted by restart")
            .await?;

        info!(
            failed_provisioning = report.failed_provisioning.len(),
            redispatched_deleting = report.redispatched_deleting.len(),
            failed_deleting = report.failed_deleting.len(),
            failed_jobs = report.failed_jobs,
            "reconcile finished"
        );
        Ok(report)
    }

    pub async fn get_machine(&self, id: &str, actor: &Actor) -> Result<Machine> {
        let machine = self.load(id).await?;
        if !actor.is_admin && !machine.is_accessible_by(&actor.user) {
            return Err(OrchestratorError::Forbidden(format!(
                "machine {} is not shared with {}",
                machine.name, actor.user
            )));
        }
        Ok(machine)
    }

    /// Owned and shared machines that are not deleted; every machine for admins.
    pub async fn list_machines(&self, actor: &Actor) -> Result<Vec<Machine>> {
        if actor.is_admin {
            self.store.list_all_machines().await
        } else {
            self.store.list_machines_for(&actor.user).await
        }
    }

    pub async fn list_templates(&self, actor: &Actor) -> Result<Vec<MachineTemplate>> {
        let templates = self.store.list_templates().await?;
        Ok(templates
            .into_iter()
            .filter(|template| actor.may_use_group(&template.group_name))
            .collect())
    }

    pub async fn rename_machine(&self, id: &str, display_name: &str, actor: &Actor) -> Result<Machine> {
        validate_machine_name(display_name)?;
        let machine = self.load_owned(id, actor).await?;
        self.store.rename_machine(&machine.id, display_name).await?;
        self.load(id).await
    }

    /// Add `actor` to the users of the machine behind a share token.
    pub async fn accept_share(&self, token: &str, actor: &Actor) -> Result<Machine> {
        let machine = self
            .store
            .get_machine_by_token(token)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound("share token".to_string()))?;

        if machine.state == MachineState::Deleted {
            return Err(OrchestratorError::InvalidState(format!(
                "machine {} has been deleted",
                machine.name
            )));
        }

        if machine.is_accessible_by(&actor.user) {
            return Ok(machine);
        }

        self.store.add_share(&machine.id, &actor.user).await?;
        info!(machine_id = %machine.id, user = %actor.user, "share accepted");
        self.load(&machine.id).await
    }

    /// Remove every share and issue a new token.
    pub async fn revoke_shares(&self, id: &str, actor: &Actor) -> Result<Machine> {
        let machine = self.load_owned(id, actor).await?;
        self.store
            .reset_shares(&machine.id, &generate_share_token())
            .await?;
        info!(machine_id = %machine.id, "shares revoked");
        self.load(id).await
    }

    /// Destroy `READY` machines older than their group's limit.
    pub async fn expire_machines(&self, rules: &[ExpiryRule], dry_run: bool) -> Result<ExpiryReport> {
        let mut report = ExpiryReport::default();
        let system = Actor::system();

        for rule in rules {
            let cutoff = Utc::now() - chrono::Duration::hours(i64::from(rule.max_age_hours));
            for machine in self.store.expired_machines(&rule.group, cutoff).await? {
                info!(
                    machine_id = %machine.id,
                    machine = %machine.name,
                    group = %rule.group,
                    created_at = %machine.created_at,
                    dry_run,
                    "machine expired"
                );
                report.expired.push(machine.id.clone());

                if dry_run {
                    continue;
                }
                match self.destroy_machine(&machine.id, &system).await {
                    Ok(_) => report.destroyed.push(machine.id),
                    Err(e) => warn!(machine_id = %machine.id, "couldn't destroy expired machine: {}", e),
                }
            }
        }

        Ok(report)
    }

    /// Operations on the actor's machines; all operations for admins.
    pub async fn list_operations(
        &self,
        filters: &OperationFilters,
        actor: &Actor,
    ) -> Result<Vec<Operation>> {
        let owner = (!actor.is_admin).then_some(actor.user.as_str());
        self.store.list_operations(filters, owner).await
    }

    async fn load(&self, id: &str) -> Result<Machine> {
        self.store
            .get_machine(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("machine {id}")))
    }

    async fn load_owned(&self, id: &str, actor: &Actor) -> Result<Machine> {
        let machine = self.load(id).await?;
        if machine.owner != actor.user {
            return Err(OrchestratorError::Forbidden(format!(
                "only the owner may change machine {}",
                machine.name
            )));
        }
        Ok(machine)
    }
}

async fn fail_machine(store: &Store, id: &str, from: MachineState, message: &str) {
    match store
        .set_machine_state(id, from, MachineState::Failed, Some(message))
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(machine_id = id, "machine left {} before it could be failed", from),
        Err(e) => error!(machine_id = id, "failed to record machine failure: {}", e),
    }
}

async fn finish_operation(store: &Store, operation_id: &str, error: Option<&str>) {
    let status = match error {
        None => OperationStatus::Success,
        Some(_) => OperationStatus::Failed,
    };
    if let Err(e) = store.finish_operation(operation_id, status, error).await {
        error!(operation_id, "failed to record operation outcome: {}", e);
    }
}
