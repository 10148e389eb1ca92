// src/handlers/data.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::RequestContext,
    models::tenancy::DataRecord,
};

// Rotas genéricas de dados. Toda operação roda dentro de `with_context` com o
// contexto dos cabeçalhos; não existe caminho de bypass aqui.

// GET /api/data/{resource}
#[utoipa::path(
    get,
    path = "/api/data/{resource}",
    tag = "Data",
    responses(
        (status = 200, description = "Linhas visíveis no contexto", body = [DataRecord]),
        (status = 400, description = "Contexto inválido"),
        (status = 404, description = "Recurso desconhecido")
    ),
    params(
        ("resource" = String, Path, description = "Nome do recurso protegido"),
        ("x-workspace-id" = Option<Uuid>, Header, description = "Workspace do contexto"),
        ("x-org-id" = Option<Uuid>, Header, description = "Org do contexto"),
        ("x-user-id" = Option<Uuid>, Header, description = "Usuário do contexto")
    )
)]
pub async fn list_records(
    State(app_state): State<AppState>,
    RequestContext(context): RequestContext,
    Path(resource): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rows = app_state.isolation.list(context, resource).await?;
    Ok((StatusCode::OK, Json(rows)))
}

// GET /api/data/{resource}/{id}
#[utoipa::path(
    get,
    path = "/api/data/{resource}/{id}",
    tag = "Data",
    responses(
        (status = 200, description = "A linha, se visível no contexto", body = DataRecord),
        (status = 404, description = "Não encontrada (ou de outro tenant)")
    ),
    params(
        ("resource" = String, Path, description = "Nome do recurso protegido"),
        ("id" = Uuid, Path, description = "Id da linha"),
        ("x-workspace-id" = Option<Uuid>, Header, description = "Workspace do contexto"),
        ("x-org-id" = Option<Uuid>, Header, description = "Org do contexto"),
        ("x-user-id" = Option<Uuid>, Header, description = "Usuário do contexto")
    )
)]
pub async fn get_record(
    State(app_state): State<AppState>,
    RequestContext(context): RequestContext,
    Path((resource, id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let row = app_state.isolation.get(context, resource, id).await?;
    Ok((StatusCode::OK, Json(row)))
}

// POST /api/data/{resource}
#[utoipa::path(
    post,
    path = "/api/data/{resource}",
    tag = "Data",
    request_body = DataRecord,
    responses(
        (status = 201, description = "Linha criada", body = DataRecord),
        (status = 403, description = "A linha não pertence ao tenant do contexto"),
        (status = 404, description = "Recurso desconhecido")
    ),
    params(
        ("resource" = String, Path, description = "Nome do recurso protegido"),
        ("x-workspace-id" = Option<Uuid>, Header, description = "Workspace do contexto"),
        ("x-org-id" = Option<Uuid>, Header, description = "Org do contexto"),
        ("x-user-id" = Option<Uuid>, Header, description = "Usuário do contexto")
    )
)]
pub async fn create_record(
    State(app_state): State<AppState>,
    RequestContext(context): RequestContext,
    Path(resource): Path<String>,
    Json(DataRecord(record)): Json<DataRecord>,
) -> Result<impl IntoResponse, AppError> {
    let created = app_state
        .isolation
        .create(context, resource, record)
        .await
        .map_err(|e| match e {
            // Escrita em recurso sem política: rejeição, mas sem revelar nada.
            AppError::PolicyNotFound(resource) => AppError::NotFound(resource),
            other => other,
        })?;

    Ok((StatusCode::CREATED, Json(created)))
}
