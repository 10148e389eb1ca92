// tests/audit_api.rs

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{setup, Fixture};
use tenant_isolation::config::{AppState, Settings};

const TOKEN: &str = "segredo-de-teste";

fn test_app(f: &Fixture, audit_token: Option<&str>) -> axum::Router {
    let mut settings = Settings::from_lookup(|_| None).unwrap();
    settings.audit_token = audit_token.map(str::to_string);
    let state = AppState::new(f.store.clone(), f.policies.clone(), &settings);
    tenant_isolation::app(state)
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

// -- Data routes --------------------------------------------------------------

#[tokio::test]
async fn data_routes_are_scoped_by_headers() {
    let f = setup().await;
    let a = f.tenant("a").await;
    let b = f.tenant("b").await;
    f.contacts(a, 2).await;
    f.contacts(b, 1).await;
    let app = test_app(&f, None);

    let response = app
        .clone()
        .oneshot(
            get("/api/data/contacts")
                .header("x-workspace-id", a.workspace.to_string())
                .header("x-org-id", a.org.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

    // Sem contexto não há caminho alternativo: a requisição é rejeitada.
    let response = app
        .oneshot(get("/api/data/contacts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_tenants_rows_look_like_not_found() {
    let f = setup().await;
    let a = f.tenant("a").await;
    let b = f.tenant("b").await;
    let app = test_app(&f, None);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/data/notes")
                .header("content-type", "application/json")
                .header("x-workspace-id", b.workspace.to_string())
                .body(Body::from(
                    json!({ "workspace_id": b.workspace, "body": "privado" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            get(&format!("/api/data/notes/{}", id))
                .header("x-workspace-id", a.workspace.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Recurso sem política também é "não encontrado" na leitura.
    let response = app
        .oneshot(
            get("/api/data/payroll")
                .header("x-workspace-id", a.workspace.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cross_tenant_write_is_forbidden() {
    let f = setup().await;
    let a = f.tenant("a").await;
    let b = f.tenant("b").await;
    let app = test_app(&f, None);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/data/contacts")
                .header("content-type", "application/json")
                .header("x-workspace-id", a.workspace.to_string())
                .body(Body::from(json!({ "workspace_id": b.workspace }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(f.count_bypass("contacts").await, 0);
}

#[tokio::test]
async fn malformed_context_header_is_rejected() {
    let f = setup().await;
    let response = test_app(&f, None)
        .oneshot(
            get("/api/data/contacts")
                .header("x-org-id", "nao-e-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// -- Audit routes -------------------------------------------------------------

#[tokio::test]
async fn audit_routes_require_the_token() {
    let f = setup().await;

    let response = test_app(&f, None)
        .oneshot(get("/api/audit/enforced").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = test_app(&f, Some(TOKEN))
        .oneshot(
            get("/api/audit/enforced")
                .header("Authorization", "Bearer outro")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn audit_report_over_http() {
    let f = setup().await;
    let a = f.tenant("a").await;
    f.contacts(a, 2).await;
    let app = test_app(&f, Some(TOKEN));

    let response = app
        .clone()
        .oneshot(
            get("/api/audit/enforced")
                .header("Authorization", format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), f.policies.len());

    let response = app
        .clone()
        .oneshot(
            get("/api/audit/blocking/contacts")
                .header("Authorization", format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["blocking"], json!(true));
    assert_eq!(body["observedCount"], json!(0));

    f.store.disable_enforcement("notes");
    let response = app
        .oneshot(
            get("/api/audit/report?baseline=contacts,notes")
                .header("Authorization", format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["drift"], json!(["notes"]));
    assert_eq!(body["regressions"], json!(["notes"]));
}

#[tokio::test]
async fn isolation_check_over_http() {
    let f = setup().await;
    let a = f.tenant("a").await;
    let b = f.tenant("b").await;
    f.contacts(a, 1).await;

    let response = test_app(&f, Some(TOKEN))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/audit/isolation")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", TOKEN))
                .body(Body::from(
                    json!({
                        "resource": "contacts",
                        "contextA": { "workspaceId": a.workspace, "orgId": a.org },
                        "contextB": { "workspaceId": b.workspace, "orgId": b.org }
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isolated"], json!(true));
    assert_eq!(body["countA"], json!(1));
    assert_eq!(body["countB"], json!(0));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let f = setup().await;
    let response = test_app(&f, None)
        .oneshot(get("/api-docs/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/api/data/{resource}"].is_object());
}
