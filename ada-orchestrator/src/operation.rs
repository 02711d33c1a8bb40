use crate::model::{serialize_datetime, serialize_optional_datetime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record of one dispatched background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub machine_id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,

    #[serde(serialize_with = "serialize_datetime")]
    pub started_at: DateTime<Utc>,

    #[serde(serialize_with = "serialize_optional_datetime")]
    pub completed_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Destroy,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationFilters {
    pub machine_id: Option<String>,
    pub operation_type: Option<OperationType>,
    pub status: Option<OperationStatus>,
}
