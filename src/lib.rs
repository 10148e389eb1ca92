// src/lib.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use utoipa::OpenApi;

pub mod common;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod services;

use crate::config::AppState;
use crate::docs::ApiDoc;
use crate::middleware::auth::audit_guard;

/// Monta o router completo. As rotas de auditoria só existem quando há um
/// `AUDIT_TOKEN` configurado.
pub fn app(app_state: AppState) -> Router {
    // Rotas de dados (contexto sempre vem dos cabeçalhos)
    let data_routes = Router::new()
        .route(
            "/{resource}",
            get(handlers::data::list_records).post(handlers::data::create_record),
        )
        .route("/{resource}/{id}", get(handlers::data::get_record));

    let mut router = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/data", data_routes);

    if app_state.audit_token.is_some() {
        let audit_routes = Router::new()
            .route("/enforced", get(handlers::audit::list_enforced))
            .route("/report", get(handlers::audit::get_report))
            .route("/blocking/{resource}", get(handlers::audit::verify_blocking))
            .route("/isolation", post(handlers::audit::verify_isolation))
            .layer(axum_middleware::from_fn_with_state(
                app_state.clone(),
                audit_guard,
            ));
        router = router.nest("/api/audit", audit_routes);
    }

    router.with_state(app_state)
}
