use ada_provider::{BackendKind, ProviderParams, TemplateParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a [`Machine`].
///
/// ```text
/// PROVISIONING -> READY | FAILED
/// READY | FAILED -> DELETING
/// DELETING -> DELETED | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MachineState {
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl MachineState {
    pub const ALL: [MachineState; 5] = [
        MachineState::Provisioning,
        MachineState::Ready,
        MachineState::Failed,
        MachineState::Deleting,
        MachineState::Deleted,
    ];

    /// Whether `self -> next` is an edge of the lifecycle diagram.
    pub fn can_transition_to(self, next: MachineState) -> bool {
        use MachineState::*;
        matches!(
            (self, next),
            (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Deleting)
                | (Failed, Deleting)
                | (Deleting, Deleted)
                | (Deleting, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Provisioning => "PROVISIONING",
            MachineState::Ready => "READY",
            MachineState::Failed => "FAILED",
            MachineState::Deleting => "DELETING",
            MachineState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    /// Backend resource name, fixed at creation.
    pub name: String,
    pub display_name: String,
    pub ip: String,
    pub hostname: String,
    pub token: String,
    pub state: MachineState,
    pub owner: String,
    pub shared_with: Vec<String>,
    pub template_id: String,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,

    pub error_message: Option<String>,
}

impl Machine {
    pub fn is_accessible_by(&self, user: &str) -> bool {
        self.owner == user || self.shared_with.iter().any(|u| u == user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineTemplate {
    pub id: String,
    pub name: String,
    pub kind: BackendKind,
    pub image: String,
    pub description: Option<String>,
    pub cpu_limit_cores: Option<u32>,
    pub memory_limit_gb: Option<u32>,
    pub group_name: String,
    pub provider_id: String,
    pub extra_data: Value,
}

impl MachineTemplate {
    pub fn params(&self) -> TemplateParams<'_> {
        TemplateParams {
            name: &self.name,
            kind: self.kind,
            image: &self.image,
            cpu_limit_cores: self.cpu_limit_cores,
            memory_limit_gb: self.memory_limit_gb,
            extra_data: &self.extra_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineProvider {
    pub id: String,
    pub name: String,
    pub kind: BackendKind,
    pub customer: String,
    /// Connection parameters and credentials; never serialized out.
    #[serde(skip_serializing, default)]
    pub provider_data: Value,
}

impl MachineProvider {
    pub fn params(&self) -> ProviderParams<'_> {
        ProviderParams {
            name: &self.name,
            kind: self.kind,
            provider_data: &self.provider_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub source_host: String,
    pub source_dir: String,
    pub data_size_mb: i64,
    pub users: Vec<String>,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,
}

impl DataSource {
    /// `host:dir`, the form shown for copied sources.
    pub fn location(&self) -> String {
        format!("{}:{}", self.source_host, self.source_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum JobState {
    Running,
    Done,
    Failed,
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTransferJob {
    pub id: String,
    pub state: JobState,
    pub user: String,
    pub data_source_id: String,
    pub machine_id: String,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_optional_datetime")]
    pub finish_date: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
}

// --- catalog inputs ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub customer: String,
    #[serde(default = "empty_object")]
    pub provider_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub kind: BackendKind,
    pub image: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cpu_limit_cores: Option<u32>,
    #[serde(default)]
    pub memory_limit_gb: Option<u32>,
    #[serde(default)]
    pub group_name: String,
    /// Provider name.
    pub provider: String,
    #[serde(default = "empty_object")]
    pub extra_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataSource {
    pub source_host: String,
    pub source_dir: String,
    #[serde(default)]
    pub data_size_mb: i64,
    #[serde(default)]
    pub users: Vec<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
pub(crate) fn serialize_datetime<S>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

pub(crate) fn serialize_optional_datetime<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match dt {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
