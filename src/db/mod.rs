// src/db/mod.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::audit::EnforcementState;
use crate::models::context::TenantContext;
use crate::models::tenancy::Record;
use crate::policy::sql::PolicyDdl;

pub mod memory;
pub mod postgres;

pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

/// Um datastore compartilhado entre tenants. Cada `open` entrega uma sessão
/// (conexão + transação) vinculada 1:1 a um contexto.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    type Session: DataSession;

    /// Vincula o contexto à sessão. `None` = sessão sem contexto, que não
    /// enxerga nada protegido (usada apenas pelo auditor).
    async fn open(&self, context: Option<TenantContext>) -> Result<Self::Session, AppError>;
}

/// Operações de dados dentro de uma sessão vinculada. Todas passam pelo
/// filtro do contexto; nenhuma aceita outro contexto.
#[async_trait]
pub trait DataSession: Send {
    fn context(&self) -> Option<&TenantContext>;

    async fn fetch_all(&mut self, resource: &str) -> Result<Vec<Record>, AppError>;

    async fn fetch_one(&mut self, resource: &str, id: Uuid) -> Result<Record, AppError>;

    async fn count(&mut self, resource: &str) -> Result<i64, AppError>;

    async fn insert(&mut self, resource: &str, record: Record) -> Result<Record, AppError>;

    async fn update(
        &mut self,
        resource: &str,
        id: Uuid,
        changes: Record,
    ) -> Result<Record, AppError>;

    async fn delete(&mut self, resource: &str, id: Uuid) -> Result<(), AppError>;

    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}

/// Interface de bootstrap (ferramental operacional, fora do caminho de request).
#[async_trait]
pub trait EnforcementAdmin: Send + Sync {
    /// Liga o enforcement se ainda não estiver ligado. Retorna `true` se mudou algo.
    async fn enable_enforcement(&self, resource: &str) -> Result<bool, AppError>;

    /// Substitui (ou cria) as políticas declaradas do recurso.
    async fn declare_policy(&self, ddl: &PolicyDdl) -> Result<(), AppError>;

    /// Estado real de enforcement, lido do datastore.
    async fn enforcement_state(&self) -> Result<BTreeMap<String, EnforcementState>, AppError>;
}

/// Gera um id quando a linha nova não traz um.
pub(crate) fn ensure_id(record: &mut Record) -> Result<Uuid, AppError> {
    match record.get("id") {
        None | Some(serde_json::Value::Null) => {
            let id = Uuid::new_v4();
            record.insert("id".to_string(), serde_json::Value::String(id.to_string()));
            Ok(id)
        }
        Some(_) => crate::models::tenancy::record_id(record)
            .ok_or_else(|| AppError::Validation("O campo 'id' precisa ser um UUID.".to_string())),
    }
}
