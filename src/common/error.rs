// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// O erro único da camada de isolamento, com `thiserror` para a ergonomia.
#[derive(Debug, Error)]
pub enum AppError {
    // Contexto sem workspace/org e sem bypass explícito.
    #[error("Contexto de tenant inválido: {0}")]
    InvalidContext(String),

    #[error("Nenhuma política registrada para o recurso '{0}'")]
    PolicyNotFound(String),

    #[error("Política duplicada para o recurso '{0}'")]
    DuplicatePolicy(String),

    #[error("Política inválida para o recurso '{resource}': {reason}")]
    InvalidPolicy { resource: String, reason: String },

    // Escrita fora do escopo do tenant vinculado. Nunca é corrigida em silêncio.
    #[error("Violação de isolamento em '{resource}': {detail}")]
    IsolationViolation { resource: String, detail: String },

    // A conexão não aceitou o vínculo do contexto. Único erro que pode ser repetido.
    #[error("Falha ao vincular o contexto à conexão: {0}")]
    BindingFailure(String),

    #[error("Registro não encontrado em '{0}'")]
    NotFound(String),

    #[error("Identificador SQL inválido: '{0}'")]
    InvalidIdentifier(String),

    #[error("Erro de validação: {0}")]
    Validation(String),

    #[error("Credencial de auditoria ausente ou inválida")]
    Unauthorized,

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    /// Constrói uma `IsolationViolation` e já registra o evento no alvo de segurança,
    /// separado dos erros comuns para poder gerar alerta.
    pub fn isolation_violation(resource: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::warn!(
            target: "tenant_isolation::security",
            resource,
            detail = %detail,
            "tentativa de escrita fora do escopo do tenant"
        );
        AppError::IsolationViolation {
            resource: resource.to_string(),
            detail,
        }
    }

    /// Apenas `BindingFailure` pode ser repetido automaticamente.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::BindingFailure(_))
    }

    /// Para leituras, recurso sem política e registro invisível são indistinguíveis
    /// de "não encontrado". Nunca revelamos a existência de linhas de outro tenant.
    pub fn into_read_error(self) -> Self {
        match self {
            AppError::PolicyNotFound(resource) => AppError::NotFound(resource),
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidContext(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound(_) | AppError::PolicyNotFound(_) => {
                (StatusCode::NOT_FOUND, "Registro não encontrado.".to_string())
            }
            // Rejeição dura, sem detalhes sobre o tenant dono da linha.
            AppError::IsolationViolation { .. } => (
                StatusCode::FORBIDDEN,
                "Operação rejeitada pelo isolamento de tenant.".to_string(),
            ),
            AppError::BindingFailure(ref e) => {
                tracing::error!("Falha de vínculo de contexto: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Banco de dados indisponível.".to_string(),
                )
            }

            // Todos os outros erros (DuplicatePolicy, DatabaseError, ...) viram 500.
            ref e => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Ocorreu um erro inesperado.".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_binding_failures_are_retryable() {
        assert!(AppError::BindingFailure("timeout".into()).is_retryable());
        assert!(!AppError::InvalidContext("x".into()).is_retryable());
        assert!(!AppError::isolation_violation("contacts", "outro workspace").is_retryable());
        assert!(!AppError::PolicyNotFound("contacts".into()).is_retryable());
    }

    #[test]
    fn reads_hide_missing_policies_as_not_found() {
        let err = AppError::PolicyNotFound("secret_table".into()).into_read_error();
        assert!(matches!(err, AppError::NotFound(ref r) if r == "secret_table"));
    }

    #[test]
    fn isolation_violation_maps_to_forbidden() {
        let response = AppError::isolation_violation("contacts", "x").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AppError::PolicyNotFound("contacts".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
