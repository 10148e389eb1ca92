// src/services/scope_service.rs

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::{
    common::error::AppError,
    db::{DataSession, Datastore},
    models::context::{require_bypass, ScopedContext, TenantContext},
};

const RETRY_BACKOFF_MS: u64 = 50;

/// Escopo de contexto: vincula um `TenantContext` a uma única sessão
/// (conexão + transação) e garante o desvínculo em toda saída.
///
/// O trabalho recebe a sessão por referência e devolve um `BoxFuture` preso a
/// ela, então nada escapa do escopo. Cada chamada abre uma sessão nova; um
/// escopo aninhado usa a própria sessão e não altera a do escopo externo.
pub struct ContextScope<D: Datastore> {
    store: Arc<D>,
    bind_retries: u32,
}

impl<D: Datastore> Clone for ContextScope<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bind_retries: self.bind_retries,
        }
    }
}

impl<D: Datastore> ContextScope<D> {
    pub fn new(store: Arc<D>, bind_retries: u32) -> Self {
        Self {
            store,
            bind_retries,
        }
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    /// Executa `work` com o contexto vinculado. Commit se `Ok`, rollback se `Err`.
    pub async fn with_context<T, F>(&self, context: ScopedContext, work: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut D::Session) -> BoxFuture<'s, Result<T, AppError>> + Send,
    {
        tracing::debug!(
            target: "tenant_isolation::scope",
            workspace_id = ?context.workspace_id(),
            org_id = ?context.org_id(),
            user_id = ?context.user_id(),
            "abrindo escopo de tenant"
        );
        self.run(Some(TenantContext::Scoped(context)), work).await
    }

    /// Executa `work` sem isolamento. Só para caminhos que não vêm de request
    /// de usuário final; o motivo é obrigatório e vai para o log de auditoria.
    pub async fn with_bypass<T, F>(&self, reason: &str, work: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut D::Session) -> BoxFuture<'s, Result<T, AppError>> + Send,
    {
        let bypass = require_bypass(reason)?;
        tracing::warn!(
            target: "tenant_isolation::bypass",
            reason = bypass.reason(),
            "escopo de bypass aberto"
        );
        self.run(Some(TenantContext::Bypass(bypass)), work).await
    }

    /// Sessão sem nenhum contexto. Usada pelo auditor para provar que nada vaza.
    pub(crate) async fn with_unbound<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut D::Session) -> BoxFuture<'s, Result<T, AppError>> + Send,
    {
        let mut session = self.bind(None).await?;
        let result = work(&mut session).await;
        // Nunca grava nada: é só observação.
        session.rollback().await?;
        result
    }

    async fn run<T, F>(&self, context: Option<TenantContext>, work: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut D::Session) -> BoxFuture<'s, Result<T, AppError>> + Send,
    {
        // Se este future for cancelado, a sessão é descartada aqui mesmo e o
        // drop dela desfaz o vínculo antes de a conexão voltar à pool.
        let mut session = self.bind(context).await?;

        match work(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::error!("Falha no rollback do escopo: {:?}", rollback_err);
                }
                Err(e)
            }
        }
    }

    // Só `BindingFailure` é repetido, e nunca cai para uma sessão sem escopo.
    async fn bind(&self, context: Option<TenantContext>) -> Result<D::Session, AppError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.open(context.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && attempt < self.bind_retries => {
                    attempt += 1;
                    tracing::warn!(
                        target: "tenant_isolation::scope",
                        attempt,
                        error = %e,
                        "falha ao vincular contexto, tentando novamente"
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EnforcementAdmin, MemoryDatastore};
    use crate::policy::sql::policy_ddl;
    use crate::policy::table::PolicyTable;
    use futures::FutureExt;
    use serde_json::json;
    use uuid::Uuid;

    async fn scope(retries: u32) -> ContextScope<MemoryDatastore> {
        let policies = Arc::new(PolicyTable::from_registry().unwrap());
        let store = MemoryDatastore::new(Arc::clone(&policies));
        for resource in policies.resources() {
            store.enable_enforcement(resource).await.unwrap();
            store
                .declare_policy(&policy_ddl(&policies, resource).unwrap())
                .await
                .unwrap();
        }
        ContextScope::new(Arc::new(store), retries)
    }

    #[tokio::test]
    async fn failed_work_is_rolled_back() {
        let scope = scope(0).await;
        let ws = Uuid::new_v4();
        let ctx = ScopedContext::new(Some(ws), None, None).unwrap();

        let result: Result<(), AppError> = scope
            .with_context(ctx.clone(), move |s| {
                async move {
                    let row = json!({ "workspace_id": ws }).as_object().cloned().unwrap();
                    s.insert("notes", row).await?;
                    Err(AppError::Validation("falha proposital".into()))
                }
                .boxed()
            })
            .await;
        assert!(result.is_err());

        let count = scope
            .with_context(ctx, |s| async move { s.count("notes").await }.boxed())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn binding_failures_are_retried_up_to_the_limit() {
        let scope = scope(2).await;
        let ctx = ScopedContext::new(Some(Uuid::new_v4()), None, None).unwrap();

        scope.store().fail_next_binds(2);
        let ok = scope
            .with_context(ctx.clone(), |s| async move { s.count("notes").await }.boxed())
            .await;
        assert_eq!(ok.unwrap(), 0);

        scope.store().fail_next_binds(3);
        let err = scope
            .with_context(ctx, |s| async move { s.count("notes").await }.boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BindingFailure(_)));
        assert_eq!(scope.store().bound_idle_connections(), 0);
    }

    #[tokio::test]
    async fn bypass_requires_a_reason() {
        let scope = scope(0).await;
        let err = scope
            .with_bypass("  ", |s| async move { s.count("notes").await }.boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidContext(_)));
    }
}
