// src/middleware/tenancy.rs

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::context::{require_context, ScopedContext};

// Os cabeçalhos que carregam o contexto de tenant da requisição.
pub const WORKSPACE_ID_HEADER: &str = "x-workspace-id";
pub const ORG_ID_HEADER: &str = "x-org-id";
pub const USER_ID_HEADER: &str = "x-user-id";

// O extrator do contexto da requisição.
// Sempre produz um contexto com escopo: não existe cabeçalho que peça bypass.
#[derive(Debug, Clone)]
pub struct RequestContext(pub ScopedContext);

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let workspace_id = read_uuid(&parts.headers, WORKSPACE_ID_HEADER)?;
        let org_id = read_uuid(&parts.headers, ORG_ID_HEADER)?;
        let user_id = read_uuid(&parts.headers, USER_ID_HEADER)?;

        require_context(workspace_id, org_id, user_id).map(RequestContext)
    }
}

// Cabeçalho ausente = campo vazio. Cabeçalho presente e malformado = erro,
// nunca "ignora e segue".
fn read_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };

    let value_str = value.to_str().map_err(|_| {
        AppError::InvalidContext(format!("Cabeçalho {} contém caracteres inválidos.", name))
    })?;

    Uuid::parse_str(value_str.trim())
        .map(Some)
        .map_err(|_| AppError::InvalidContext(format!("Cabeçalho {} inválido (não é um UUID).", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_empty_but_malformed_is_rejected() {
        let mut headers = HeaderMap::new();
        assert_eq!(read_uuid(&headers, ORG_ID_HEADER).unwrap(), None);

        headers.insert(ORG_ID_HEADER, HeaderValue::from_static("nao-e-uuid"));
        assert!(matches!(
            read_uuid(&headers, ORG_ID_HEADER),
            Err(AppError::InvalidContext(_))
        ));

        let id = Uuid::new_v4();
        headers.insert(ORG_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(read_uuid(&headers, ORG_ID_HEADER).unwrap(), Some(id));
    }
}
