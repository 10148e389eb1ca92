// src/middleware/auth.rs

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{common::error::AppError, config::AppState};

// O middleware que protege as rotas de auditoria.
// Elas expõem contagens de vários tenants, então exigem o token operacional
// (`Authorization: Bearer <AUDIT_TOKEN>`).
pub async fn audit_guard(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = app_state.audit_token.as_deref() else {
        return Err(AppError::Unauthorized);
    };

    let presented = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token_matches(token, expected) => {
            Ok(next.run(request).await)
        }
        _ => {
            tracing::warn!(
                target: "tenant_isolation::security",
                "acesso às rotas de auditoria sem token válido"
            );
            Err(AppError::Unauthorized)
        }
    }
}

// Comparação em tempo constante. Com tamanhos diferentes ainda faz uma
// comparação de mesmo custo antes de recusar.
fn token_matches(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}
