// src/services/audit_service.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{DataSession, Datastore, EnforcementAdmin},
    models::{
        audit::{AuditReport, BlockingCheck, EnforcementState, IsolationCheck},
        context::ScopedContext,
        policy::AttributionShape,
        tenancy::record_id,
    },
    policy::{sql::POLICY_NAMES, table::PolicyTable},
    services::scope_service::ContextScope,
};

/// Um recurso está sob enforcement quando o datastore diz que está ligado,
/// forçado e com as quatro políticas declaradas.
pub fn is_enforced(state: &EnforcementState) -> bool {
    state.enabled
        && state.forced
        && POLICY_NAMES
            .iter()
            .all(|name| state.policies.iter().any(|p| p == name))
}

/// Auditor de isolamento. Ferramenta operacional, fora do caminho de request.
/// A verdade é sempre o estado vivo do datastore.
pub struct Auditor<D: Datastore + EnforcementAdmin> {
    scope: ContextScope<D>,
    policies: Arc<PolicyTable>,
}

impl<D: Datastore + EnforcementAdmin> Clone for Auditor<D> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            policies: Arc::clone(&self.policies),
        }
    }
}

impl<D: Datastore + EnforcementAdmin> Auditor<D> {
    pub fn new(scope: ContextScope<D>, policies: Arc<PolicyTable>) -> Self {
        Self { scope, policies }
    }

    /// Recursos registrados que estão de fato sob enforcement agora.
    pub async fn list_enforced(&self) -> Result<Vec<String>, AppError> {
        let state = self.scope.store().enforcement_state().await?;
        Ok(self
            .policies
            .resources()
            .filter(|resource| state.get(*resource).is_some_and(is_enforced))
            .map(str::to_string)
            .collect())
    }

    /// Lê o recurso sem nenhum contexto vinculado. O esperado é zero linhas.
    pub async fn verify_blocking(&self, resource: &str) -> Result<BlockingCheck, AppError> {
        self.policies.get(resource)?;

        let target = resource.to_string();
        let observed_count = self
            .scope
            .with_unbound(move |s| async move { s.count(&target).await }.boxed())
            .await?;

        if observed_count > 0 {
            tracing::error!(
                target: "tenant_isolation::security",
                resource,
                observed_count,
                "sessão sem contexto enxergou linhas protegidas"
            );
        }

        Ok(BlockingCheck {
            resource: resource.to_string(),
            blocking: observed_count == 0,
            observed_count,
        })
    }

    /// Localiza as linhas visíveis em cada contexto e compara os conjuntos.
    /// É só leitura: nada é criado nem alterado no datastore.
    pub async fn verify_isolation(
        &self,
        resource: &str,
        context_a: ScopedContext,
        context_b: ScopedContext,
    ) -> Result<IsolationCheck, AppError> {
        let policy = self.policies.get(resource)?;
        if policy.shape == AttributionShape::BypassOnly {
            return Err(AppError::Validation(format!(
                "'{}' é somente bypass e não tem tenant para comparar.",
                resource
            )));
        }

        let ids_a = self.visible_ids(resource, context_a).await?;
        let ids_b = self.visible_ids(resource, context_b).await?;
        let shared = ids_a.intersection(&ids_b).count() as i64;

        if shared > 0 {
            tracing::error!(
                target: "tenant_isolation::security",
                resource,
                shared,
                "linhas visíveis para os dois contextos"
            );
        }

        Ok(IsolationCheck {
            resource: resource.to_string(),
            count_a: ids_a.len() as i64,
            count_b: ids_b.len() as i64,
            shared,
            isolated: shared == 0,
        })
    }

    /// Relatório completo: enforcement, drift, regressões contra a baseline
    /// e a checagem de bloqueio de cada recurso registrado.
    pub async fn report(&self, baseline: Option<&[String]>) -> Result<AuditReport, AppError> {
        let registered: Vec<String> = self.policies.resources().map(str::to_string).collect();
        let enforced = self.list_enforced().await?;
        let enforced_set: BTreeSet<&str> = enforced.iter().map(String::as_str).collect();

        let drift: Vec<String> = registered
            .iter()
            .filter(|r| !enforced_set.contains(r.as_str()))
            .cloned()
            .collect();
        let regressions: Vec<String> = baseline
            .unwrap_or_default()
            .iter()
            .filter(|r| !enforced_set.contains(r.as_str()))
            .cloned()
            .collect();

        let mut blocking = Vec::with_capacity(registered.len());
        for resource in &registered {
            blocking.push(self.verify_blocking(resource).await?);
        }

        let ok = drift.is_empty() && regressions.is_empty() && blocking.iter().all(|b| b.blocking);
        if !drift.is_empty() {
            tracing::warn!(?drift, "recursos registrados sem enforcement no datastore");
        }

        Ok(AuditReport {
            generated_at: Utc::now(),
            registered,
            enforced,
            drift,
            regressions,
            blocking,
            ok,
        })
    }

    async fn visible_ids(
        &self,
        resource: &str,
        context: ScopedContext,
    ) -> Result<BTreeSet<Uuid>, AppError> {
        let target = resource.to_string();
        let rows = self
            .scope
            .with_context(context, move |s| {
                async move { s.fetch_all(&target).await }.boxed()
            })
            .await?;
        Ok(rows.iter().filter_map(record_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforcement_needs_all_four_policies() {
        let mut state = EnforcementState {
            enabled: true,
            forced: true,
            policies: POLICY_NAMES.iter().map(|n| n.to_string()).collect(),
        };
        assert!(is_enforced(&state));

        state.policies.pop();
        assert!(!is_enforced(&state));

        state.policies = POLICY_NAMES.iter().map(|n| n.to_string()).collect();
        state.forced = false;
        assert!(!is_enforced(&state));
    }
}
