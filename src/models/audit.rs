// src/models/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::context::ScopedContext;

/// Estado real de enforcement de um recurso, lido do datastore (nunca do código).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementState {
    pub enabled: bool,
    pub forced: bool,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockingCheck {
    pub resource: String,
    pub blocking: bool,
    // A magnitude importa: 0 é o esperado, qualquer outro valor é regressão.
    pub observed_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IsolationCheck {
    pub resource: String,
    pub count_a: i64,
    pub count_b: i64,
    // Linhas visíveis para os dois contextos ao mesmo tempo.
    pub shared: i64,
    pub isolated: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IsolationCheckRequest {
    pub resource: String,
    pub context_a: ScopedContext,
    pub context_b: ScopedContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub registered: Vec<String>,
    pub enforced: Vec<String>,
    // Registrados no código mas sem enforcement no datastore.
    pub drift: Vec<String>,
    // Estavam na baseline e não estão mais sob enforcement.
    pub regressions: Vec<String>,
    pub blocking: Vec<BlockingCheck>,
    pub ok: bool,
}
