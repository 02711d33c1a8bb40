use crate::{error::ApiResult, state::AppState};
use ada_orchestrator::{Actor, DataSource, DataTransferJob};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/transfers", get(list_transfers).post(start_transfer))
        .route("/api/v1/transfers/{id}/dismiss", post(dismiss_transfer))
        .route("/api/v1/data-sources", get(list_data_sources))
        .route("/api/v1/machines/{id}/copied-sources", get(copied_sources))
}

#[derive(Debug, Deserialize)]
struct StartTransferRequest {
    data_source_id: String,
    machine_id: String,
}

async fn start_transfer(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<StartTransferRequest>,
) -> ApiResult<Json<DataTransferJob>> {
    let job = state
        .transfers
        .start_transfer(&req.data_source_id, &req.machine_id, &actor)
        .await?;

    Ok(Json(job))
}

async fn list_transfers(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<DataTransferJob>>> {
    let jobs = state.transfers.list_visible_jobs(&actor).await?;

    Ok(Json(jobs))
}

async fn dismiss_transfer(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<DataTransferJob>> {
    let job = state.transfers.dismiss_transfer(&id, &actor).await?;

    Ok(Json(job))
}

async fn list_data_sources(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<DataSource>>> {
    let sources = state.transfers.list_data_sources(&actor).await?;

    Ok(Json(sources))
}

async fn copied_sources(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let copied = state.transfers.copied_sources(&id, &actor).await?;

    Ok(Json(copied))
}
