// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::AppError;

/// Uma linha de qualquer recurso protegido, coluna -> valor.
/// É o formato que atravessa os datastores (no Postgres, `to_jsonb(t)`).
pub type Record = Map<String, Value>;

/// Corpo das rotas de dados: uma linha como objeto JSON livre.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct DataRecord(pub Record);

/// Lê uma coluna como UUID. Ausente, nula ou malformada vira `None`,
/// e `None` nunca satisfaz uma igualdade de predicado.
pub fn uuid_field(record: &Record, column: &str) -> Option<Uuid> {
    record
        .get(column)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

pub fn record_id(record: &Record) -> Option<Uuid> {
    uuid_field(record, "id")
}

/// Converte um modelo tipado no formato de linha genérico.
pub fn to_record<T: Serialize>(model: &T) -> Result<Record, AppError> {
    match serde_json::to_value(model).map_err(anyhow::Error::from)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Validation(format!(
            "Esperado um objeto JSON, recebido: {}",
            other
        ))),
    }
}

// ---
// 1. Org (o tenant de topo)
// ---
// Nunca é apagada de verdade; `archived_at` marca o soft delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Org {
    pub fn new(name: &str, slug: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            archived_at: None,
        }
    }
}

// ---
// 2. Workspace (sub-tenant de uma Org)
// ---
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub slug: String,
}

impl Workspace {
    pub fn new(org_id: Uuid, name: &str, slug: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            slug: slug.to_string(),
        }
    }
}

// ---
// 3. Membership (a "Ponte" Usuário-Org)
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: MembershipRole,
}

impl Membership {
    pub fn new(org_id: Uuid, user_id: Uuid, role: MembershipRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            role,
        }
    }
}

// ---
// 4. User (identidade global, chaveada pelo id do provedor de auth externo)
// ---
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_auth_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl User {
    pub fn new(external_auth_id: &str, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_auth_id: external_auth_id.to_string(),
            email: email.to_string(),
            display_name: None,
        }
    }
}
