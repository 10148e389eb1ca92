// src/services/isolation_service.rs

use async_trait::async_trait;
use futures::FutureExt;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{DataSession, Datastore, EnforcementAdmin},
    models::{
        audit::{AuditReport, BlockingCheck, IsolationCheck, IsolationCheckRequest},
        context::ScopedContext,
        tenancy::Record,
    },
    services::{audit_service::Auditor, scope_service::ContextScope},
};

/// Fachada usada pelos handlers. Não é genérica no datastore, então o
/// `AppState` guarda um `Arc<dyn IsolationService>` e os handlers continuam simples.
#[async_trait]
pub trait IsolationService: Send + Sync {
    async fn list(&self, context: ScopedContext, resource: String) -> Result<Vec<Record>, AppError>;

    async fn get(&self, context: ScopedContext, resource: String, id: Uuid) -> Result<Record, AppError>;

    async fn create(
        &self,
        context: ScopedContext,
        resource: String,
        record: Record,
    ) -> Result<Record, AppError>;

    async fn list_enforced(&self) -> Result<Vec<String>, AppError>;

    async fn verify_blocking(&self, resource: String) -> Result<BlockingCheck, AppError>;

    async fn verify_isolation(&self, request: IsolationCheckRequest) -> Result<IsolationCheck, AppError>;

    async fn report(&self, baseline: Option<Vec<String>>) -> Result<AuditReport, AppError>;
}

pub struct Isolation<D: Datastore + EnforcementAdmin> {
    scope: ContextScope<D>,
    auditor: Auditor<D>,
}

impl<D: Datastore + EnforcementAdmin> Isolation<D> {
    pub fn new(scope: ContextScope<D>, auditor: Auditor<D>) -> Self {
        Self { scope, auditor }
    }
}

#[async_trait]
impl<D: Datastore + EnforcementAdmin> IsolationService for Isolation<D> {
    async fn list(&self, context: ScopedContext, resource: String) -> Result<Vec<Record>, AppError> {
        self.scope
            .with_context(context, move |s| {
                async move { s.fetch_all(&resource).await }.boxed()
            })
            .await
            .map_err(AppError::into_read_error)
    }

    async fn get(&self, context: ScopedContext, resource: String, id: Uuid) -> Result<Record, AppError> {
        self.scope
            .with_context(context, move |s| {
                async move { s.fetch_one(&resource, id).await }.boxed()
            })
            .await
            .map_err(AppError::into_read_error)
    }

    async fn create(
        &self,
        context: ScopedContext,
        resource: String,
        record: Record,
    ) -> Result<Record, AppError> {
        self.scope
            .with_context(context, move |s| {
                async move { s.insert(&resource, record).await }.boxed()
            })
            .await
    }

    async fn list_enforced(&self) -> Result<Vec<String>, AppError> {
        self.auditor.list_enforced().await
    }

    async fn verify_blocking(&self, resource: String) -> Result<BlockingCheck, AppError> {
        self.auditor.verify_blocking(&resource).await
    }

    async fn verify_isolation(&self, request: IsolationCheckRequest) -> Result<IsolationCheck, AppError> {
        self.auditor
            .verify_isolation(&request.resource, request.context_a, request.context_b)
            .await
    }

    async fn report(&self, baseline: Option<Vec<String>>) -> Result<AuditReport, AppError> {
        self.auditor.report(baseline.as_deref()).await
    }
}
