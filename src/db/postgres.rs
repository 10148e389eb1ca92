// src/db/postgres.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::db_utils::{bind_tenant_context, quote_ident};
use crate::common::error::AppError;
use crate::db::{ensure_id, DataSession, Datastore, EnforcementAdmin};
use crate::models::audit::EnforcementState;
use crate::models::context::TenantContext;
use crate::models::tenancy::{record_id, Record};
use crate::policy::sql::{enable_statements, PolicyDdl};
use crate::policy::table::PolicyTable;

// SQLSTATE do Postgres para "new row violates row-level security policy".
const INSUFFICIENT_PRIVILEGE: &str = "42501";

#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
    policies: Arc<PolicyTable>,
}

impl PgDatastore {
    pub fn new(pool: PgPool, policies: Arc<PolicyTable>) -> Self {
        Self { pool, policies }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    type Session = PgSession;

    async fn open(&self, context: Option<TenantContext>) -> Result<PgSession, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::BindingFailure(e.to_string()))?;

        // O vínculo vive só dentro desta transação (set_config local).
        bind_tenant_context(&mut tx, context.as_ref())
            .await
            .map_err(|e| AppError::BindingFailure(e.to_string()))?;

        Ok(PgSession {
            tx,
            context,
            policies: Arc::clone(&self.policies),
        })
    }
}

// ---
// Sessão: uma transação com o contexto vinculado
// ---
// Se a sessão for descartada sem commit (erro ou cancelamento), o drop da
// transação faz rollback e o vínculo some junto.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    context: Option<TenantContext>,
    policies: Arc<PolicyTable>,
}

impl PgSession {
    // Recurso sem política nunca chega ao banco.
    fn table(&self, resource: &str) -> Result<String, AppError> {
        self.policies.get(resource)?;
        quote_ident(resource)
    }

    // Zero linhas afetadas: se a linha é visível, foi a política de escrita que barrou.
    async fn explain_missing(&mut self, resource: &str, table: &str, id: Uuid) -> AppError {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} AS t WHERE t.id = $1)", table);
        match sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
        {
            Ok(true) => AppError::isolation_violation(
                resource,
                "a linha existente não é gravável no contexto atual",
            ),
            Ok(false) => AppError::NotFound(resource.to_string()),
            Err(e) => map_db_error(resource, e),
        }
    }
}

#[async_trait]
impl DataSession for PgSession {
    fn context(&self) -> Option<&TenantContext> {
        self.context.as_ref()
    }

    async fn fetch_all(&mut self, resource: &str) -> Result<Vec<Record>, AppError> {
        let table = self.table(resource)?;
        let sql = format!("SELECT to_jsonb(t) FROM {} AS t", table);

        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))?;

        rows.into_iter().map(into_record).collect()
    }

    async fn fetch_one(&mut self, resource: &str, id: Uuid) -> Result<Record, AppError> {
        let table = self.table(resource)?;
        let sql = format!("SELECT to_jsonb(t) FROM {} AS t WHERE t.id = $1", table);

        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))?;

        match row {
            Some(value) => into_record(value),
            None => Err(AppError::NotFound(resource.to_string())),
        }
    }

    async fn count(&mut self, resource: &str) -> Result<i64, AppError> {
        let table = self.table(resource)?;
        let sql = format!("SELECT COUNT(*) FROM {}", table);

        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))
    }

    async fn insert(&mut self, resource: &str, mut record: Record) -> Result<Record, AppError> {
        let table = self.table(resource)?;
        ensure_id(&mut record)?;
        let sql = insert_sql(&table, &column_list(&record)?);

        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(record))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))?;

        into_record(row)
    }

    async fn update(
        &mut self,
        resource: &str,
        id: Uuid,
        changes: Record,
    ) -> Result<Record, AppError> {
        let table = self.table(resource)?;
        if changes.contains_key("id") && record_id(&changes) != Some(id) {
            return Err(AppError::Validation(
                "O id de um registro não pode ser alterado.".to_string(),
            ));
        }
        if changes.is_empty() {
            return self.fetch_one(resource, id).await;
        }
        let sql = update_sql(&table, &column_list(&changes)?);

        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(changes))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))?;

        match row {
            Some(value) => into_record(value),
            None => Err(self.explain_missing(resource, &table, id).await),
        }
    }

    async fn delete(&mut self, resource: &str, id: Uuid) -> Result<(), AppError> {
        let table = self.table(resource)?;
        let sql = format!("DELETE FROM {} AS t WHERE t.id = $1", table);

        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(resource, e))?;

        if result.rows_affected() == 0 {
            return Err(self.explain_missing(resource, &table, id).await);
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---
// Bootstrap / introspecção
// ---
#[async_trait]
impl EnforcementAdmin for PgDatastore {
    async fn enable_enforcement(&self, resource: &str) -> Result<bool, AppError> {
        let table = quote_ident(resource)?;

        let current: Option<(bool, bool)> = sqlx::query_as(
            r#"
            SELECT c.relrowsecurity, c.relforcerowsecurity
            FROM pg_class c
            WHERE c.oid = to_regclass($1)
            "#,
        )
        .bind(&table)
        .fetch_optional(&self.pool)
        .await?;

        match current {
            None => Err(AppError::InvalidPolicy {
                resource: resource.to_string(),
                reason: "a tabela não existe no banco".to_string(),
            }),
            Some((true, true)) => Ok(false),
            Some(_) => {
                let mut tx = self.pool.begin().await?;
                for statement in enable_statements(resource)? {
                    sqlx::query(&statement).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                Ok(true)
            }
        }
    }

    async fn declare_policy(&self, ddl: &PolicyDdl) -> Result<(), AppError> {
        // Funções auxiliares primeiro: as políticas referenciam elas.
        let mut tx = self.pool.begin().await?;
        for function in &ddl.functions {
            sqlx::query(&function.sql).execute(&mut *tx).await?;
        }
        for statement in &ddl.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            resource = %ddl.resource,
            functions = ddl.functions.len(),
            "políticas declaradas"
        );
        Ok(())
    }

    async fn enforcement_state(&self) -> Result<BTreeMap<String, EnforcementState>, AppError> {
        let rows: Vec<(String, bool, bool, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT
                c.relname::text,
                c.relrowsecurity,
                c.relforcerowsecurity,
                COALESCE(
                    array_agg(p.policyname::text ORDER BY p.policyname)
                        FILTER (WHERE p.policyname IS NOT NULL),
                    '{}'::text[]
                )
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_policies p ON p.schemaname = n.nspname AND p.tablename = c.relname
            WHERE n.nspname = current_schema() AND c.relkind = 'r'
            GROUP BY c.relname, c.relrowsecurity, c.relforcerowsecurity
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, enabled, forced, policies)| {
                (
                    name,
                    EnforcementState {
                        enabled,
                        forced,
                        policies,
                    },
                )
            })
            .collect())
    }
}

// ---
// Helpers
// ---

fn map_db_error(resource: &str, error: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE) {
            return AppError::isolation_violation(resource, "rejeitada pela política de linha");
        }
        if db_err.is_unique_violation() {
            return AppError::Validation(format!("Registro duplicado em '{}'.", resource));
        }
    }
    error.into()
}

fn into_record(value: Value) -> Result<Record, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::InternalServerError(anyhow::anyhow!(
            "linha inesperada vinda do banco: {}",
            other
        ))),
    }
}

fn column_list(record: &Record) -> Result<String, AppError> {
    let columns = record
        .keys()
        .map(|k| quote_ident(k))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns.join(", "))
}

// O registro chega como um único parâmetro JSON; `jsonb_populate_record` faz a
// conversão de tipos coluna a coluna.
fn insert_sql(table: &str, columns: &str) -> String {
    format!(
        "INSERT INTO {table} AS t ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) \
         RETURNING to_jsonb(t)"
    )
}

fn update_sql(table: &str, columns: &str) -> String {
    format!(
        "UPDATE {table} AS t SET ({columns}) = \
         (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1::jsonb)) \
         WHERE t.id = $2 RETURNING to_jsonb(t)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_statements_bind_the_whole_record_as_json() {
        let record = json!({ "id": Uuid::nil(), "workspace_id": Uuid::nil(), "name": "Ana" })
            .as_object()
            .cloned()
            .unwrap();
        let columns = column_list(&record).unwrap();
        assert_eq!(columns, "\"id\", \"name\", \"workspace_id\"");

        let insert = insert_sql("\"contacts\"", &columns);
        assert!(insert.starts_with("INSERT INTO \"contacts\" AS t (\"id\", \"name\", \"workspace_id\")"));
        assert!(insert.contains("jsonb_populate_record(NULL::\"contacts\", $1::jsonb)"));

        let update = update_sql("\"contacts\"", &columns);
        assert!(update.contains("WHERE t.id = $2"));
    }

    #[test]
    fn hostile_column_names_are_rejected() {
        let record = json!({ "name; DROP TABLE contacts": 1 })
            .as_object()
            .cloned()
            .unwrap();
        assert!(matches!(
            column_list(&record),
            Err(AppError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn non_object_rows_are_internal_errors() {
        assert!(into_record(json!({ "id": 1 })).is_ok());
        assert!(matches!(
            into_record(json!([1, 2])),
            Err(AppError::InternalServerError(_))
        ));
    }
}
