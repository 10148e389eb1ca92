//src/main.rs

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tenant_isolation::{
    app,
    config::{AppState, Backend, Settings},
    db::{Datastore, EnforcementAdmin, MemoryDatastore, PgDatastore},
    policy::PolicyTable,
    services::{Auditor, BootstrapService, ContextScope},
};

#[derive(Debug, Parser)]
#[command(name = "tenant-isolation", about = "Camada de isolamento multi-tenant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sobe a API HTTP (padrão).
    Serve,
    /// Roda as migrações, liga o enforcement e declara as políticas.
    Bootstrap,
    /// Imprime o relatório de isolamento em JSON. Sai com erro se algo regrediu.
    Audit {
        /// Arquivo JSON com a lista de recursos que estavam sob enforcement.
        #[arg(long)]
        baseline: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Inicializa o logger (RUST_LOG, padrão "info").
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let policies = Arc::new(settings.load_policies()?);
    tracing::info!(resources = policies.len(), "Policy Table carregada");

    let command = cli.command.unwrap_or(Command::Serve);

    match settings.backend() {
        Backend::Postgres(url) => {
            let pool = settings.connect(&url).await?;

            // Faz o app rodar as migrações do SQLx na inicialização
            sqlx::migrate!()
                .run(&pool)
                .await
                .context("Falha ao rodar as migrações do banco de dados.")?;
            tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

            let store = Arc::new(PgDatastore::new(pool, Arc::clone(&policies)));
            run(command, store, policies, settings).await
        }
        Backend::Memory => {
            tracing::warn!("DATABASE_URL ausente: usando o datastore em memória");
            let store = Arc::new(MemoryDatastore::new(Arc::clone(&policies)));
            // Em memória não há estado persistido: o bootstrap roda sempre.
            BootstrapService::new(store.clone(), Arc::clone(&policies))
                .bootstrap_all()
                .await?;
            run(command, store, policies, settings).await
        }
    }
}

async fn run<D>(
    command: Command,
    store: Arc<D>,
    policies: Arc<PolicyTable>,
    settings: Settings,
) -> anyhow::Result<()>
where
    D: Datastore + EnforcementAdmin,
{
    match command {
        Command::Serve => serve(store, policies, settings).await,
        Command::Bootstrap => {
            let summary = BootstrapService::new(store, policies).bootstrap_all().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Audit { baseline } => audit(store, policies, &settings, baseline).await,
    }
}

async fn serve<D>(store: Arc<D>, policies: Arc<PolicyTable>, settings: Settings) -> anyhow::Result<()>
where
    D: Datastore + EnforcementAdmin,
{
    if settings.audit_token.is_none() {
        tracing::warn!("AUDIT_TOKEN ausente: rotas de auditoria desativadas");
    }

    let app_state = AppState::new(store, policies, &settings);
    let router = app(app_state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Falha ao iniciar o listener TCP em {}", settings.bind_addr))?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);

    axum::serve(listener, router).await.context("Erro no servidor Axum")?;
    Ok(())
}

async fn audit<D>(
    store: Arc<D>,
    policies: Arc<PolicyTable>,
    settings: &Settings,
    baseline: Option<PathBuf>,
) -> anyhow::Result<()>
where
    D: Datastore + EnforcementAdmin,
{
    let baseline: Option<Vec<String>> = match baseline {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Falha ao ler a baseline {}", path.display()))?;
            Some(serde_json::from_str(&raw).context("Baseline deve ser uma lista JSON de recursos")?)
        }
        None => None,
    };

    let scope = ContextScope::new(store, settings.bind_max_retries);
    let report = Auditor::new(scope, policies)
        .report(baseline.as_deref())
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ok {
        anyhow::bail!(
            "auditoria de isolamento falhou: drift={:?} regressões={:?}",
            report.drift,
            report.regressions
        );
    }
    Ok(())
}
