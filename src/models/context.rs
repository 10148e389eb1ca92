// src/models/context.rs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::AppError;

// ---
// 1. ContextField (o que um predicado pode ler do contexto)
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    WorkspaceId,
    OrgId,
    UserId,
}

impl ContextField {
    /// Nome da variável de sessão (set_config) correspondente.
    pub fn session_key(self) -> &'static str {
        match self {
            ContextField::WorkspaceId => "app.workspace_id",
            ContextField::OrgId => "app.org_id",
            ContextField::UserId => "app.user_id",
        }
    }
}

// ---
// 2. ScopedContext (acesso normal, isolamento ativo)
// ---
// Imutável depois de construído: os campos só são lidos pelos getters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScopedContext {
    workspace_id: Option<Uuid>,
    org_id: Option<Uuid>,
    user_id: Option<Uuid>,
}

impl ScopedContext {
    /// Exige pelo menos um workspace ou org. Sem eles o único caminho é o bypass.
    pub fn new(
        workspace_id: Option<Uuid>,
        org_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        if workspace_id.is_none() && org_id.is_none() {
            return Err(AppError::InvalidContext(
                "É obrigatório informar workspaceId ou orgId.".to_string(),
            ));
        }

        Ok(Self {
            workspace_id,
            org_id,
            user_id,
        })
    }

    pub fn workspace_id(&self) -> Option<Uuid> {
        self.workspace_id
    }

    pub fn org_id(&self) -> Option<Uuid> {
        self.org_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn field(&self, field: ContextField) -> Option<Uuid> {
        match field {
            ContextField::WorkspaceId => self.workspace_id,
            ContextField::OrgId => self.org_id,
            ContextField::UserId => self.user_id,
        }
    }
}

// Desserialização passa pelo mesmo construtor, para o invariante valer também no JSON.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopedContextPayload {
    workspace_id: Option<Uuid>,
    org_id: Option<Uuid>,
    user_id: Option<Uuid>,
}

impl<'de> Deserialize<'de> for ScopedContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let payload = ScopedContextPayload::deserialize(deserializer)?;
        ScopedContext::new(payload.workspace_id, payload.org_id, payload.user_id)
            .map_err(serde::de::Error::custom)
    }
}

// ---
// 3. BypassContext (administrativo, isolamento desligado)
// ---
// Sempre carrega o motivo, que vai para o log de auditoria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassContext {
    reason: String,
}

impl BypassContext {
    pub fn new(reason: impl Into<String>) -> Result<Self, AppError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(AppError::InvalidContext(
                "Bypass exige um motivo explícito.".to_string(),
            ));
        }
        Ok(Self { reason })
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// ---
// 4. TenantContext (a união: ou escopo, ou bypass; nunca os dois)
// ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantContext {
    Scoped(ScopedContext),
    Bypass(BypassContext),
}

impl TenantContext {
    pub fn is_bypass(&self) -> bool {
        matches!(self, TenantContext::Bypass(_))
    }

    /// Valor de um campo do contexto. Bypass não tem tenant, logo nunca tem valor.
    pub fn field(&self, field: ContextField) -> Option<Uuid> {
        match self {
            TenantContext::Scoped(scoped) => scoped.field(field),
            TenantContext::Bypass(_) => None,
        }
    }
}

/// Ponto de entrada dos caminhos de requisição (handlers, workers com tenant conhecido).
pub fn require_context(
    workspace_id: Option<Uuid>,
    org_id: Option<Uuid>,
    user_id: Option<Uuid>,
) -> Result<ScopedContext, AppError> {
    ScopedContext::new(workspace_id, org_id, user_id)
}

/// Ponto de entrada dos caminhos de sistema (migrações, jobs, webhooks antes do tenant).
pub fn require_bypass(reason: impl Into<String>) -> Result<BypassContext, AppError> {
    BypassContext::new(reason)
}
