use crate::{error::ApiResult, state::AppState};
use ada_orchestrator::{Actor, Machine, MachineTemplate};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/machines", get(list_machines).post(create_machine))
        .route(
            "/api/v1/machines/{id}",
            get(get_machine).delete(destroy_machine),
        )
        .route("/api/v1/machines/{id}/rename", post(rename_machine))
        .route("/api/v1/machines/{id}/shares/revoke", post(revoke_shares))
        .route("/api/v1/shares/{token}/accept", post(accept_share))
        .route("/api/v1/templates", get(list_templates))
}

#[derive(Debug, Deserialize)]
struct CreateMachineRequest {
    template: String,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    display_name: String,
}

/// The share token is only shown to people allowed to hand it out.
fn redact(mut machine: Machine, actor: &Actor) -> Machine {
    if !actor.owns_or_admin(&machine.owner) {
        machine.token.clear();
    }
    machine
}

async fn create_machine(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateMachineRequest>,
) -> ApiResult<Json<Machine>> {
    let machine = state.machines.create_machine(&req.template, &actor).await?;

    Ok(Json(machine))
}

async fn list_machines(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<Machine>>> {
    let machines = state
        .machines
        .list_machines(&actor)
        .await?
        .into_iter()
        .map(|m| redact(m, &actor))
        .collect();

    Ok(Json(machines))
}

async fn get_machine(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Machine>> {
    let machine = state.machines.get_machine(&id, &actor).await?;

    Ok(Json(redact(machine, &actor)))
}

async fn destroy_machine(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Machine>> {
    let machine = state.machines.destroy_machine(&id, &actor).await?;

    Ok(Json(redact(machine, &actor)))
}

async fn rename_machine(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Machine>> {
    let machine = state
        .machines
        .rename_machine(&id, &req.display_name, &actor)
        .await?;

    Ok(Json(machine))
}

async fn revoke_shares(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Machine>> {
    let machine = state.machines.revoke_shares(&id, &actor).await?;

    Ok(Json(machine))
}

async fn accept_share(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(token): Path<String>,
) -> ApiResult<Json<Machine>> {
    let machine = state.machines.accept_share(&token, &actor).await?;

    Ok(Json(redact(machine, &actor)))
}

async fn list_templates(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<MachineTemplate>>> {
    let templates = state.machines.list_templates(&actor).await?;

    Ok(Json(templates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Machine {
        serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "name": "alice-abcd",
            "display_name": "alice-abcd",
            "ip": "",
            "hostname": "",
            "token": "Q3F9kTQ3F9kTQ3F9",
            "state": "READY",
            "owner": "alice",
            "shared_with": ["bob"],
            "template_id": "t-1",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "error_message": null
        }))
        .unwrap()
    }

    #[test]
    fn test_token_hidden_from_share_recipients() {
        assert!(redact(sample(), &Actor::user("bob")).token.is_empty());
        assert_eq!(redact(sample(), &Actor::user("alice")).token, "Q3F9kTQ3F9kTQ3F9");
        assert_eq!(redact(sample(), &Actor::admin("root")).token, "Q3F9kTQ3F9kTQ3F9");
    }
}
