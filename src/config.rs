// src/config.rs

use std::{env, fmt::Display, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::{Datastore, EnforcementAdmin},
    policy::table::PolicyTable,
    services::{Auditor, ContextScope, Isolation, IsolationService},
};

/// Qual datastore o processo usa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Postgres(String),
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub bind_max_retries: u32,
    pub policy_catalog_path: Option<PathBuf>,
    pub audit_token: Option<String>,
}

impl Settings {
    /// Carrega o `.env` (se existir) e lê as variáveis do processo.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            db_max_connections: parse_or(&non_empty, "DB_MAX_CONNECTIONS", 5)?,
            db_acquire_timeout: Duration::from_secs(parse_or(
                &non_empty,
                "DB_ACQUIRE_TIMEOUT_SECS",
                3,
            )?),
            bind_max_retries: parse_or(&non_empty, "BIND_MAX_RETRIES", 3)?,
            policy_catalog_path: non_empty("POLICY_CATALOG_PATH").map(PathBuf::from),
            audit_token: non_empty("AUDIT_TOKEN"),
        })
    }

    pub fn backend(&self) -> Backend {
        match &self.database_url {
            Some(url) => Backend::Postgres(url.clone()),
            None => Backend::Memory,
        }
    }

    /// Catálogo embutido + o catálogo opcional em JSON, validado como um todo.
    pub fn load_policies(&self) -> anyhow::Result<PolicyTable> {
        let mut table = PolicyTable::from_registry()?;
        if let Some(path) = &self.policy_catalog_path {
            table.extend_from_file(path)?;
            table.validate()?;
            tracing::info!(path = %path.display(), "catálogo de políticas extra carregado");
        }
        Ok(table)
    }

    pub async fn connect(&self, database_url: &str) -> anyhow::Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.db_max_connections)
            .acquire_timeout(self.db_acquire_timeout)
            .connect(database_url)
            .await
            .context("Falha ao conectar ao banco de dados")?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");
        Ok(pool)
    }
}

// Valor ausente usa o padrão; valor presente e inválido é erro de configuração.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} inválido ('{}'): {}", name, raw, e)),
    }
}

// O estado compartilhado que será acessível em toda a aplicação
#[derive(Clone)]
pub struct AppState {
    pub isolation: Arc<dyn IsolationService>,
    pub audit_token: Option<Arc<str>>,
}

impl AppState {
    // --- Monta o gráfico de dependências ---
    pub fn new<D>(store: Arc<D>, policies: Arc<PolicyTable>, settings: &Settings) -> Self
    where
        D: Datastore + EnforcementAdmin,
    {
        let scope = ContextScope::new(store, settings.bind_max_retries);
        let auditor = Auditor::new(scope.clone(), policies);

        Self {
            isolation: Arc::new(Isolation::new(scope, auditor)),
            audit_token: settings.audit_token.as_deref().map(Arc::from),
        }
    }
}
