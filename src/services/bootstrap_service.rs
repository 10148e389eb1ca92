// src/services/bootstrap_service.rs

use std::sync::Arc;

use serde::Serialize;

use crate::{
    common::error::AppError,
    db::EnforcementAdmin,
    policy::{sql::policy_ddl, table::PolicyTable},
};

/// Resultado de um `bootstrap_all`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSummary {
    /// Recursos em que o enforcement foi ligado agora.
    pub enabled: Vec<String>,
    /// Recursos que já estavam com enforcement ligado.
    pub unchanged: Vec<String>,
    pub policies_declared: usize,
}

/// Ferramental de bootstrap: liga o enforcement e (re)declara as políticas.
/// Tudo aqui é idempotente.
#[derive(Clone)]
pub struct BootstrapService {
    admin: Arc<dyn EnforcementAdmin>,
    policies: Arc<PolicyTable>,
}

impl BootstrapService {
    pub fn new(admin: Arc<dyn EnforcementAdmin>, policies: Arc<PolicyTable>) -> Self {
        Self { admin, policies }
    }

    /// Liga o enforcement do recurso se ainda não estiver ligado.
    pub async fn enable_enforcement(&self, resource: &str) -> Result<bool, AppError> {
        self.policies.get(resource)?;
        let changed = self.admin.enable_enforcement(resource).await?;
        if changed {
            tracing::info!(resource, "enforcement ligado");
        }
        Ok(changed)
    }

    /// Gera o DDL a partir da Policy Table e substitui as políticas do recurso.
    pub async fn declare_policy(&self, resource: &str) -> Result<(), AppError> {
        let ddl = policy_ddl(&self.policies, resource)?;
        self.admin.declare_policy(&ddl).await
    }

    /// Liga e declara tudo o que está na Policy Table.
    pub async fn bootstrap_all(&self) -> Result<BootstrapSummary, AppError> {
        self.policies.validate()?;

        let mut summary = BootstrapSummary::default();
        for resource in self.policies.resources() {
            if self.enable_enforcement(resource).await? {
                summary.enabled.push(resource.to_string());
            } else {
                summary.unchanged.push(resource.to_string());
            }
            self.declare_policy(resource).await?;
            summary.policies_declared += 1;
        }

        tracing::info!(
            enabled = summary.enabled.len(),
            unchanged = summary.unchanged.len(),
            "✅ Bootstrap de isolamento concluído"
        );
        Ok(summary)
    }
}
