//! Common test utilities and helpers for ada-api tests

#![allow(dead_code)]

use ada_api::{create_app, AppState};
use ada_orchestrator::test_utils::{seed_data_source, seed_template, TestHarness};
use ada_provider::BackendKind;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use tower::ServiceExt; // for `oneshot`

/// Identity headers the authenticating proxy would set
pub fn user(name: &str) -> Vec<(&'static str, String)> {
    vec![("x-ada-user", name.to_string())]
}

pub fn admin(name: &str) -> Vec<(&'static str, String)> {
    vec![
        ("x-ada-user", name.to_string()),
        ("x-ada-admin", "true".to_string()),
    ]
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub harness: TestHarness,
}

impl TestClient {
    /// App over fake backends with a docker template `workspace` in group
    /// `physics` and a data source granted to alice
    pub async fn new() -> Self {
        let harness = TestHarness::new().await;
        seed_template(&harness.store, BackendKind::Docker, "workspace", "physics").await;
        seed_data_source(&harness.store, "data01.example.org", "/data/run42", &["alice"]).await;

        let state = AppState::new(harness.machines.clone(), harness.transfers.clone());
        let app = create_app(state);
        Self { app, harness }
    }

    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn request(
        method: &str,
        uri: &str,
        headers: &[(&'static str, String)],
    ) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, v.as_str());
        }
        builder
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        headers: &[(&'static str, String)],
    ) -> Response<Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let request = Self::request("POST", uri, headers)
            .header("content-type", "application/json")
            .body(Body::from(req_body))
            .unwrap();
        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&'static str, String)]) -> Response<Body> {
        let request = Self::request("GET", uri, headers)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    pub async fn delete(&self, uri: &str, headers: &[(&'static str, String)]) -> Response<Body> {
        let request = Self::request("DELETE", uri, headers)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }
}
