// src/handlers/audit.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    common::error::AppError,
    config::AppState,
    models::audit::{AuditReport, BlockingCheck, IsolationCheck, IsolationCheckRequest},
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// Recursos que estavam sob enforcement no último deploy, separados por vírgula.
    pub baseline: Option<String>,
}

impl ReportQuery {
    fn baseline(&self) -> Option<Vec<String>> {
        self.baseline.as_ref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

// GET /api/audit/enforced
#[utoipa::path(
    get,
    path = "/api/audit/enforced",
    tag = "Audit",
    responses(
        (status = 200, description = "Recursos sob enforcement agora", body = [String]),
        (status = 401, description = "Token de auditoria ausente")
    ),
    security(("audit_token" = []))
)]
pub async fn list_enforced(
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let enforced = app_state.isolation.list_enforced().await?;
    Ok((StatusCode::OK, Json(enforced)))
}

// GET /api/audit/report
#[utoipa::path(
    get,
    path = "/api/audit/report",
    tag = "Audit",
    params(ReportQuery),
    responses(
        (status = 200, description = "Relatório de isolamento", body = AuditReport),
        (status = 401, description = "Token de auditoria ausente")
    ),
    security(("audit_token" = []))
)]
pub async fn get_report(
    State(app_state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let report = app_state.isolation.report(query.baseline()).await?;
    Ok((StatusCode::OK, Json(report)))
}

// GET /api/audit/blocking/{resource}
#[utoipa::path(
    get,
    path = "/api/audit/blocking/{resource}",
    tag = "Audit",
    params(("resource" = String, Path, description = "Nome do recurso protegido")),
    responses(
        (status = 200, description = "Leitura sem contexto", body = BlockingCheck),
        (status = 404, description = "Recurso desconhecido")
    ),
    security(("audit_token" = []))
)]
pub async fn verify_blocking(
    State(app_state): State<AppState>,
    Path(resource): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let check = app_state.isolation.verify_blocking(resource).await?;
    Ok((StatusCode::OK, Json(check)))
}

// POST /api/audit/isolation
#[utoipa::path(
    post,
    path = "/api/audit/isolation",
    tag = "Audit",
    request_body = IsolationCheckRequest,
    responses(
        (status = 200, description = "Comparação entre dois contextos", body = IsolationCheck),
        (status = 422, description = "Contexto inválido ou recurso somente bypass")
    ),
    security(("audit_token" = []))
)]
pub async fn verify_isolation(
    State(app_state): State<AppState>,
    Json(payload): Json<IsolationCheckRequest>,
) -> Result<impl IntoResponse, AppError> {
    let check = app_state.isolation.verify_isolation(payload).await?;
    Ok((StatusCode::OK, Json(check)))
}
