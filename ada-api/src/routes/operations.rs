use crate::{error::ApiResult, state::AppState};
use ada_orchestrator::{Actor, Operation, OperationFilters, OperationStatus, OperationType};
use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/operations", get(list_operations))
}

#[derive(Debug, Deserialize)]
struct OperationsQuery {
    machine_id: Option<String>,
    #[serde(rename = "type")]
    operation_type: Option<String>,
    status: Option<String>,
}

async fn list_operations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<Operation>>> {
    // Parse operation_type from string
    let operation_type = query
        .operation_type
        .and_then(|s| serde_json::from_str::<OperationType>(&format!("\"{}\"", s)).ok());

    // Parse status from string
    let status = query
        .status
        .and_then(|s| serde_json::from_str::<OperationStatus>(&format!("\"{}\"", s)).ok());

    let filters = OperationFilters {
        machine_id: query.machine_id,
        operation_type,
        status,
    };
    let operations = state.machines.list_operations(&filters, &actor).await?;

    Ok(Json(operations))
}
