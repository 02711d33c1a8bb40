//! SQLite persistence for machines, templates, providers, data sources,
//! transfer jobs and operations.
//!
//! Every machine state write is a compare-and-set against the expected
//! current state, and refuses transitions outside the lifecycle diagram.

use crate::error::{OrchestratorError, Result};
use crate::model::{
    from_timestamp, DataSource, DataTransferJob, JobState, Machine, MachineProvider,
    MachineState, MachineTemplate, NewDataSource, NewProvider, NewTemplate,
};
use crate::operation::{Operation, OperationFilters, OperationStatus, OperationType};
use ada_provider::BackendKind;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

/// Separator for `group_concat` user lists.
const LIST_SEPARATOR: char = '\u{1f}';

const MACHINE_SELECT: &str = "
    SELECT m.id, m.name, m.display_name, m.ip, m.hostname, m.token, m.state, m.owner,
           m.template_id, m.created_at, m.updated_at, m.error_message,
           (SELECT group_concat(s.user_name, char(31)) FROM machine_shares s
             WHERE s.machine_id = m.id) AS shared_with
      FROM machines m";

const DATA_SOURCE_SELECT: &str = "
    SELECT d.id, d.source_host, d.source_dir, d.data_size_mb, d.created_at,
           (SELECT group_concat(u.user_name, char(31)) FROM data_source_users u
             WHERE u.data_source_id = d.id) AS users
      FROM data_sources d";

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- providers ---

    /// Insert a provider, or update the one with the same name.
    #[instrument(skip(self, provider), fields(provider = %provider.name))]
    pub async fn upsert_provider(&self, provider: &NewProvider) -> Result<MachineProvider> {
        sqlx::query(
            "INSERT INTO machine_providers (id, name, kind, customer, provider_data, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                customer = excluded.customer,
                provider_data = excluded.provider_data",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&provider.name)
        .bind(provider.kind.as_str())
        .bind(&provider.customer)
        .bind(serde_json::to_string(&provider.provider_data)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.get_provider_by_name(&provider.name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("provider {}", provider.name)))
    }

    pub async fn get_provider(&self, id: &str) -> Result<Option<MachineProvider>> {
        let row = sqlx::query_as::<_, ProviderRow>("SELECT * FROM machine_providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MachineProvider::try_from).transpose()
    }

    pub async fn get_provider_by_name(&self, name: &str) -> Result<Option<MachineProvider>> {
        let row =
            sqlx::query_as::<_, ProviderRow>("SELECT * FROM machine_providers WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(MachineProvider::try_from).transpose()
    }

    // --- templates ---

    /// Insert a template, or update the one with the same name.
    #[instrument(skip(self, template), fields(template = %template.name))]
    pub async fn upsert_template(&self, template: &NewTemplate) -> Result<MachineTemplate> {
        let provider = self
            .get_provider_by_name(&template.provider)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("provider {}", template.provider)))?;

        sqlx::query(
            "INSERT INTO machine_templates
                (id, name, kind, image, description, cpu_limit_cores, memory_limit_gb,
                 group_name, provider_id, extra_data, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                image = excluded.image,
                description = excluded.description,
                cpu_limit_cores = excluded.cpu_limit_cores,
                memory_limit_gb = excluded.memory_limit_gb,
                group_name = excluded.group_name,
                provider_id = excluded.provider_id,
                extra_data = excluded.extra_data",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&template.name)
        .bind(template.kind.as_str())
        .bind(&template.image)
        .bind(&template.description)
        .bind(template.cpu_limit_cores.map(i64::from))
        .bind(template.memory_limit_gb.map(i64::from))
        .bind(&template.group_name)
        .bind(&provider.id)
        .bind(serde_json::to_string(&template.extra_data)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.get_template_by_name(&template.name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("template {}", template.name)))
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<MachineTemplate>> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM machine_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MachineTemplate::try_from).transpose()
    }

    pub async fn get_template_by_name(&self, name: &str) -> Result<Option<MachineTemplate>> {
        let row =
            sqlx::query_as::<_, TemplateRow>("SELECT * FROM machine_templates WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(MachineTemplate::try_from).transpose()
    }

    pub async fn list_templates(&self) -> Result<Vec<MachineTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>("SELECT * FROM machine_templates ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MachineTemplate::try_from).collect()
    }

    // --- machines ---

    #[instrument(skip(self, machine), fields(machine_id = %machine.id, machine = %machine.name))]
    pub async fn insert_machine(&self, machine: &Machine) -> Result<()> {
        sqlx::query(
            "INSERT INTO machines
                (id, name, display_name, ip, hostname, token, state, owner, template_id,
                 created_at, updated_at, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&machine.id)
        .bind(&machine.name)
        .bind(&machine.display_name)
        .bind(&machine.ip)
        .bind(&machine.hostname)
        .bind(&machine.token)
        .bind(machine.state)
        .bind(&machine.owner)
        .bind(&machine.template_id)
        .bind(machine.created_at.timestamp())
        .bind(machine.updated_at.timestamp())
        .bind(&machine.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_machine(&self, id: &str) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, MachineRow>(&format!("{MACHINE_SELECT} WHERE m.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Machine::from))
    }

    pub async fn get_machine_by_token(&self, token: &str) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, MachineRow>(&format!("{MACHINE_SELECT} WHERE m.token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Machine::from))
    }

    pub async fn machine_name_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM machines WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Machines owned by or shared with `user`, excluding deleted ones.
    pub async fn list_machines_for(&self, user: &str) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            "{MACHINE_SELECT}
             WHERE m.state != 'DELETED'
               AND (m.owner = ? OR EXISTS (
                    SELECT 1 FROM machine_shares s
                     WHERE s.machine_id = m.id AND s.user_name = ?))
             ORDER BY m.created_at DESC"
        ))
        .bind(user)
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    pub async fn list_all_machines(&self) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            "{MACHINE_SELECT} WHERE m.state != 'DELETED' ORDER BY m.created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    pub async fn machines_in_state(&self, state: MachineState) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            "{MACHINE_SELECT} WHERE m.state = ? ORDER BY m.created_at"
        ))
        .bind(state)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    /// `READY` machines of templates in `group_name` created at or before `cutoff`.
    pub async fn expired_machines(
        &self,
        group_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            "{MACHINE_SELECT}
               JOIN machine_templates t ON t.id = m.template_id
             WHERE t.group_name = ? AND m.state = 'READY' AND m.created_at <= ?
             ORDER BY m.created_at"
        ))
        .bind(group_name)
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    /// Move a machine from `from` to `to`.
    ///
    /// Returns `false` when the machine is no longer in `from`. An edge
    /// outside the lifecycle diagram is an [`OrchestratorError::Invariant`]
    /// and nothing is written. `error` replaces the stored error message
    /// when given.
    #[instrument(skip(self))]
    pub async fn set_machine_state(
        &self,
        id: &str,
        from: MachineState,
        to: MachineState,
        error: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::Invariant(format!(
                "illegal machine transition {from} -> {to}"
            )));
        }

        let result = sqlx::query(
            "UPDATE machines
             SET state = ?, updated_at = ?, error_message = COALESCE(?, error_message)
             WHERE id = ? AND state = ?",
        )
        .bind(to)
        .bind(Utc::now().timestamp())
        .bind(error)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `PROVISIONING -> READY` together with the address, in one statement.
    #[instrument(skip(self))]
    pub async fn complete_provisioning(&self, id: &str, ip: &str, hostname: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE machines
             SET state = ?, ip = ?, hostname = ?, updated_at = ?, error_message = NULL
             WHERE id = ? AND state = ?",
        )
        .bind(MachineState::Ready)
        .bind(ip)
        .bind(hostname)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(MachineState::Provisioning)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn rename_machine(&self, id: &str, display_name: &str) -> Result<()> {
        sqlx::query("UPDATE machines SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(display_name)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_share(&self, machine_id: &str, user: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO machine_shares (machine_id, user_name) VALUES (?, ?)")
            .bind(machine_id)
            .bind(user)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every share of the machine and replace its token.
    #[instrument(skip(self, token))]
    pub async fn reset_shares(&self, machine_id: &str, token: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM machine_shares WHERE machine_id = ?")
            .bind(machine_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE machines SET token = ?, updated_at = ? WHERE id = ?")
            .bind(token)
            .bind(Utc::now().timestamp())
            .bind(machine_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // --- data sources ---

    /// Insert a data source keyed by host and directory, replacing its users.
    #[instrument(skip(self, source), fields(host = %source.source_host, dir = %source.source_dir))]
    pub async fn upsert_data_source(&self, source: &NewDataSource) -> Result<DataSource> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO data_sources (id, source_host, source_dir, data_size_mb, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_host, source_dir) DO UPDATE SET
                data_size_mb = excluded.data_size_mb",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&source.source_host)
        .bind(&source.source_dir)
        .bind(source.data_size_mb)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        let id: String = sqlx::query_scalar(
            "SELECT id FROM data_sources WHERE source_host = ? AND source_dir = ?",
        )
        .bind(&source.source_host)
        .bind(&source.source_dir)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM data_source_users WHERE data_source_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for user in &source.users {
            sqlx::query(
                "INSERT OR IGNORE INTO data_source_users (data_source_id, user_name) VALUES (?, ?)",
            )
            .bind(&id)
            .bind(user)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_data_source(&id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("data source {id}")))
    }

    pub async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>> {
        let row =
            sqlx::query_as::<_, DataSourceRow>(&format!("{DATA_SOURCE_SELECT} WHERE d.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(DataSource::from))
    }

    /// Data sources `user` may copy from; every source when `user` is `None`.
    pub async fn list_data_sources(&self, user: Option<&str>) -> Result<Vec<DataSource>> {
        let rows = match user {
            Some(user) => {
                sqlx::query_as::<_, DataSourceRow>(&format!(
                    "{DATA_SOURCE_SELECT}
                     WHERE EXISTS (SELECT 1 FROM data_source_users u
                                    WHERE u.data_source_id = d.id AND u.user_name = ?)
                     ORDER BY d.source_host, d.source_dir"
                ))
                .bind(user)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DataSourceRow>(&format!(
                    "{DATA_SOURCE_SELECT} ORDER BY d.source_host, d.source_dir"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(DataSource::from).collect())
    }

    // --- transfer jobs ---

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn insert_job(&self, job: &DataTransferJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO data_transfer_jobs
                (id, state, user_name, data_source_id, machine_id, created_at, finish_date, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.state)
        .bind(&job.user)
        .bind(&job.data_source_id)
        .bind(&job.machine_id)
        .bind(job.created_at.timestamp())
        .bind(job.finish_date.map(|dt| dt.timestamp()))
        .bind(&job.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<DataTransferJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM data_transfer_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DataTransferJob::from))
    }

    /// Record the outcome of a copy. Only the first outcome is kept; a job
    /// hidden while running stays hidden but still gets its finish date.
    #[instrument(skip(self))]
    pub async fn finish_job(&self, id: &str, outcome: JobState, error: Option<&str>) -> Result<bool> {
        if !matches!(outcome, JobState::Done | JobState::Failed) {
            return Err(OrchestratorError::Invariant(format!(
                "{outcome:?} is not a terminal job outcome"
            )));
        }

        let result = sqlx::query(
            "UPDATE data_transfer_jobs
             SET state = CASE WHEN state = ? THEN state ELSE ? END,
                 finish_date = ?, error_message = ?
             WHERE id = ? AND finish_date IS NULL AND state IN (?, ?)",
        )
        .bind(JobState::Hidden)
        .bind(outcome)
        .bind(Utc::now().timestamp())
        .bind(error)
        .bind(id)
        .bind(JobState::Running)
        .bind(JobState::Hidden)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn hide_job(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE data_transfer_jobs SET state = ? WHERE id = ?")
            .bind(JobState::Hidden)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fail every job still running, including dismissed ones which stay
    /// hidden; returns how many changed.
    pub async fn fail_running_jobs(&self, error: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE data_transfer_jobs
             SET state = CASE WHEN state = ? THEN state ELSE ? END,
                 finish_date = ?, error_message = ?
             WHERE state = ? OR (state = ? AND finish_date IS NULL)",
        )
        .bind(JobState::Hidden)
        .bind(JobState::Failed)
        .bind(Utc::now().timestamp())
        .bind(error)
        .bind(JobState::Running)
        .bind(JobState::Hidden)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// A user's jobs that have not been dismissed, newest first.
    pub async fn list_visible_jobs(&self, user: &str) -> Result<Vec<DataTransferJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM data_transfer_jobs
             WHERE user_name = ? AND state != ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user)
        .bind(JobState::Hidden)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DataTransferJob::from).collect())
    }

    /// `host:dir` of every source successfully copied onto the machine.
    pub async fn copied_sources(&self, machine_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT d.source_host, d.source_dir
               FROM data_transfer_jobs j
               JOIN data_sources d ON d.id = j.data_source_id
              WHERE j.machine_id = ?
                AND (j.state = ? OR (j.state = ? AND j.finish_date IS NOT NULL
                                     AND j.error_message IS NULL))
              ORDER BY d.source_host, d.source_dir",
        )
        .bind(machine_id)
        .bind(JobState::Done)
        .bind(JobState::Hidden)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(host, dir)| format!("{host}:{dir}"))
            .collect())
    }

    // --- operations ---

    /// Record an operation for tracking
    pub async fn record_operation(
        &self,
        machine_id: &str,
        operation_type: OperationType,
        status: OperationStatus,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO operations (id, machine_id, operation_type, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(machine_id)
        .bind(operation_type)
        .bind(status)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn finish_operation(
        &self,
        id: &str,
        status: OperationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close every pending or running operation of one type on a machine.
    pub async fn close_operations(
        &self,
        machine_id: &str,
        operation_type: OperationType,
        status: OperationStatus,
        error: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE operations SET status = ?, completed_at = ?, error = ?
             WHERE machine_id = ? AND operation_type = ? AND status IN (?, ?)",
        )
        .bind(status)
        .bind(Utc::now().timestamp())
        .bind(error)
        .bind(machine_id)
        .bind(operation_type)
        .bind(OperationStatus::Pending)
        .bind(OperationStatus::Running)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Operations matching `filters`, restricted to machines of `owner` when given.
    pub async fn list_operations(
        &self,
        filters: &OperationFilters,
        owner: Option<&str>,
    ) -> Result<Vec<Operation>> {
        let mut query = "SELECT o.* FROM operations o WHERE 1=1".to_string();

        if owner.is_some() {
            query.push_str(
                " AND EXISTS (SELECT 1 FROM machines m WHERE m.id = o.machine_id AND m.owner = ?)",
            );
        }
        if filters.machine_id.is_some() {
            query.push_str(" AND o.machine_id = ?");
        }
        if filters.operation_type.is_some() {
            query.push_str(" AND o.operation_type = ?");
        }
        if filters.status.is_some() {
            query.push_str(" AND o.status = ?");
        }

        query.push_str(" ORDER BY o.started_at DESC, o.rowid DESC");

        let mut q = sqlx::query_as::<_, OperationRow>(&query);

        if let Some(owner) = owner {
            q = q.bind(owner);
        }
        if let Some(machine_id) = &filters.machine_id {
            q = q.bind(machine_id);
        }
        if let Some(operation_type) = filters.operation_type {
            q = q.bind(operation_type);
        }
        if let Some(status) = filters.status {
            q = q.bind(status);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

fn split_list(list: Option<String>) -> Vec<String> {
    let mut items: Vec<String> = list
        .unwrap_or_default()
        .split(LIST_SEPARATOR)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    items.sort();
    items
}

fn parse_bag(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_kind(raw: &str) -> Result<BackendKind> {
    raw.parse()
        .map_err(|e: ada_provider::ProviderError| OrchestratorError::Invariant(e.to_string()))
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct MachineRow {
    id: String,
    name: String,
    display_name: String,
    ip: String,
    hostname: String,
    token: String,
    state: MachineState,
    owner: String,
    template_id: String,
    created_at: i64,
    updated_at: i64,
    error_message: Option<String>,
    shared_with: Option<String>,
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    kind: String,
    image: String,
    description: Option<String>,
    cpu_limit_cores: Option<i64>,
    memory_limit_gb: Option<i64>,
    group_name: String,
    provider_id: String,
    extra_data: String,
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: String,
    name: String,
    kind: String,
    customer: String,
    provider_data: String,
}

#[derive(sqlx::FromRow)]
struct DataSourceRow {
    id: String,
    source_host: String,
    source_dir: String,
    data_size_mb: i64,
    created_at: i64,
    users: Option<String>,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    state: JobState,
    user_name: String,
    data_source_id: String,
    machine_id: String,
    created_at: i64,
    finish_date: Option<i64>,
    error_message: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    machine_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

impl From<MachineRow> for Machine {
    fn from(row: MachineRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            ip: row.ip,
            hostname: row.hostname,
            token: row.token,
            state: row.state,
            owner: row.owner,
            shared_with: split_list(row.shared_with),
            template_id: row.template_id,
            created_at: from_timestamp(row.created_at),
            updated_at: from_timestamp(row.updated_at),
            error_message: row.error_message,
        }
    }
}

impl TryFrom<TemplateRow> for MachineTemplate {
    type Error = OrchestratorError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        Ok(Self {
            kind: parse_kind(&row.kind)?,
            extra_data: parse_bag(&row.extra_data)?,
            id: row.id,
            name: row.name,
            image: row.image,
            description: row.description,
            cpu_limit_cores: row.cpu_limit_cores.and_then(|v| u32::try_from(v).ok()),
            memory_limit_gb: row.memory_limit_gb.and_then(|v| u32::try_from(v).ok()),
            group_name: row.group_name,
            provider_id: row.provider_id,
        })
    }
}

impl TryFrom<ProviderRow> for MachineProvider {
    type Error = OrchestratorError;

    fn try_from(row: ProviderRow) -> Result<Self> {
        Ok(Self {
            kind: parse_kind(&row.kind)?,
            provider_data: parse_bag(&row.provider_data)?,
            id: row.id,
            name: row.name,
            customer: row.customer,
        })
    }
}

impl From<DataSourceRow> for DataSource {
    fn from(row: DataSourceRow) -> Self {
        Self {
            id: row.id,
            source_host: row.source_host,
            source_dir: row.source_dir,
            data_size_mb: row.data_size_mb,
            users: split_list(row.users),
            created_at: from_timestamp(row.created_at),
        }
    }
}

impl From<JobRow> for DataTransferJob {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            state: row.state,
            user: row.user_name,
            data_source_id: row.data_source_id,
            machine_id: row.machine_id,
            created_at: from_timestamp(row.created_at),
            finish_date: row.finish_date.map(from_timestamp),
            error_message: row.error_message,
        }
    }
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        Self {
            id: row.id,
            machine_id: row.machine_id,
            operation_type: row.operation_type,
            status: row.status,
            started_at: from_timestamp(row.started_at),
            completed_at: row.completed_at.map(from_timestamp),
            error: row.error,
        }
    }
}
