//! Integration tests for authentication middleware

use ada_api::auth::auth_middleware;
use ada_orchestrator::Actor;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use tower::ServiceExt; // for `oneshot`

// Simple handler that echoes the resolved actor
async fn test_handler(axum::Extension(actor): axum::Extension<Actor>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "user": actor.user,
        "is_admin": actor.is_admin,
        "group": actor.group,
    }))
}

fn create_test_app() -> Router {
    Router::new()
        .route("/protected", get(test_handler))
        .layer(middleware::from_fn(auth_middleware))
}

async fn call(headers: &[(&str, &str)]) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().uri("/protected");
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let response = create_test_app()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let (status, _) = call(&[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&[("x-ada-user", "  ")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_plain_user() {
    let (status, body) = call(&[("x-ada-user", "alice")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "alice");
    assert_eq!(body["is_admin"], false);
    assert!(body["group"].is_null());
}

#[tokio::test]
async fn test_oauth2_proxy_header_is_accepted() {
    let (status, body) = call(&[("x-forwarded-user", "bob")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "bob");
}

#[tokio::test]
async fn test_admin_and_group_headers() {
    let (_, body) = call(&[
        ("x-ada-user", "root"),
        ("x-ada-admin", "TRUE"),
        ("x-ada-group", "physics"),
    ])
    .await;
    assert_eq!(body["is_admin"], true);
    assert_eq!(body["group"], "physics");

    let (_, body) = call(&[("x-ada-user", "eve"), ("x-ada-admin", "yes")]).await;
    assert_eq!(body["is_admin"], false);
}
