// src/db/memory.rs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::db::{ensure_id, DataSession, Datastore, EnforcementAdmin};
use crate::models::audit::EnforcementState;
use crate::models::context::TenantContext;
use crate::models::policy::Access;
use crate::models::tenancy::{record_id, Record};
use crate::policy::predicate::{Predicate, RowSource};
use crate::policy::sql::PolicyDdl;
use crate::policy::table::PolicyTable;

type Tables = BTreeMap<String, Vec<Record>>;

impl RowSource for Tables {
    fn rows(&self, resource: &str) -> &[Record] {
        self.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---
// Datastore em memória
// ---
// Backend de referência: aplica os mesmos predicados que o Postgres aplica via
// RLS, e simula uma pool de conexões que guarda o vínculo de cada conexão, para
// provar que nenhuma volta à pool ainda vinculada.
#[derive(Clone)]
pub struct MemoryDatastore {
    inner: Arc<Inner>,
}

struct Inner {
    policies: Arc<PolicyTable>,
    tables: RwLock<Tables>,
    enforcement: RwLock<BTreeMap<String, EnforcementState>>,
    declared: RwLock<BTreeMap<String, PolicyDdl>>,
    idle: Mutex<Vec<MemoryConnection>>,
    next_connection: AtomicUsize,
    failing_binds: AtomicU32,
}

#[derive(Debug)]
struct MemoryConnection {
    id: usize,
    binding: Option<TenantContext>,
}

impl Inner {
    fn checkout(&self) -> MemoryConnection {
        self.idle.lock().pop().unwrap_or_else(|| MemoryConnection {
            id: self.next_connection.fetch_add(1, Ordering::SeqCst),
            binding: None,
        })
    }

    // Desvincula sempre antes de devolver à pool.
    fn checkin(&self, mut connection: MemoryConnection) {
        connection.binding = None;
        tracing::trace!(connection = connection.id, "conexão devolvida à pool");
        self.idle.lock().push(connection);
    }
}

impl MemoryDatastore {
    pub fn new(policies: Arc<PolicyTable>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policies,
                tables: RwLock::new(Tables::new()),
                enforcement: RwLock::new(BTreeMap::new()),
                declared: RwLock::new(BTreeMap::new()),
                idle: Mutex::new(Vec::new()),
                next_connection: AtomicUsize::new(0),
                failing_binds: AtomicU32::new(0),
            }),
        }
    }

    pub fn policies(&self) -> &Arc<PolicyTable> {
        &self.inner.policies
    }

    /// Faz os próximos `count` vínculos falharem com `BindingFailure`.
    pub fn fail_next_binds(&self, count: u32) {
        self.inner.failing_binds.store(count, Ordering::SeqCst);
    }

    /// Conexões ociosas que ainda carregam um vínculo. Deve ser sempre zero.
    pub fn bound_idle_connections(&self) -> usize {
        self.inner
            .idle
            .lock()
            .iter()
            .filter(|c| c.binding.is_some())
            .count()
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Desliga o enforcement de um recurso, como um `DISABLE ROW LEVEL SECURITY`
    /// feito por fora. Serve para exercitar a detecção de drift do auditor.
    pub fn disable_enforcement(&self, resource: &str) {
        if let Some(state) = self.inner.enforcement.write().get_mut(resource) {
            state.enabled = false;
            state.forced = false;
        }
    }

    pub fn declared_policy(&self, resource: &str) -> Option<PolicyDdl> {
        self.inner.declared.read().get(resource).cloned()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    type Session = MemorySession;

    async fn open(&self, context: Option<TenantContext>) -> Result<MemorySession, AppError> {
        let mut connection = self.inner.checkout();

        let refused = self
            .inner
            .failing_binds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            self.inner.checkin(connection);
            return Err(AppError::BindingFailure(
                "a conexão recusou o vínculo do contexto".to_string(),
            ));
        }

        connection.binding = context;
        Ok(MemorySession {
            inner: Arc::clone(&self.inner),
            connection: Some(connection),
            staged: None,
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl EnforcementAdmin for MemoryDatastore {
    async fn enable_enforcement(&self, resource: &str) -> Result<bool, AppError> {
        let mut enforcement = self.inner.enforcement.write();
        let state = enforcement.entry(resource.to_string()).or_default();
        let changed = !(state.enabled && state.forced);
        state.enabled = true;
        state.forced = true;
        Ok(changed)
    }

    async fn declare_policy(&self, ddl: &PolicyDdl) -> Result<(), AppError> {
        self.inner
            .enforcement
            .write()
            .entry(ddl.resource.clone())
            .or_default()
            .policies = ddl.policy_names();
        self.inner
            .declared
            .write()
            .insert(ddl.resource.clone(), ddl.clone());
        Ok(())
    }

    async fn enforcement_state(&self) -> Result<BTreeMap<String, EnforcementState>, AppError> {
        Ok(self.inner.enforcement.read().clone())
    }
}

// ---
// Sessão em memória
// ---
// As escritas ficam num snapshot próprio (para a sessão ler o que escreveu) e
// num log. No commit o log é reaplicado sobre as tabelas vivas, então duas
// sessões sobrepostas não apagam o trabalho uma da outra. Drop sem commit descarta.
pub struct MemorySession {
    inner: Arc<Inner>,
    connection: Option<MemoryConnection>,
    staged: Option<Tables>,
    pending: Vec<PendingWrite>,
}

#[derive(Debug)]
enum PendingWrite {
    Insert { resource: String, record: Record },
    Update { resource: String, id: Uuid, changes: Record },
    Delete { resource: String, id: Uuid },
}

impl PendingWrite {
    fn resource(&self) -> &str {
        match self {
            Self::Insert { resource, .. }
            | Self::Update { resource, .. }
            | Self::Delete { resource, .. } => resource,
        }
    }

    // Reaplica a escrita sobre o estado vivo, checando de novo unicidade e
    // predicado de escrita contra o que outras sessões já confirmaram.
    fn apply(self, tables: &mut Tables, write: &Predicate) -> Result<(), AppError> {
        match self {
            Self::Insert { resource, record } => {
                let id = record_id(&record);
                if tables.rows(&resource).iter().any(|r| record_id(r) == id) {
                    return Err(AppError::Validation(format!(
                        "Já existe um registro com id {} em '{}'.",
                        id.unwrap_or_default(),
                        resource
                    )));
                }
                if !write.matches(&record, &*tables) {
                    return Err(AppError::isolation_violation(
                        &resource,
                        "a linha nova não pertence ao tenant do contexto",
                    ));
                }
                tables.entry(resource).or_default().push(record);
            }
            Self::Update { resource, id, changes } => {
                let position = tables
                    .rows(&resource)
                    .iter()
                    .position(|r| record_id(r) == Some(id))
                    .ok_or_else(|| AppError::NotFound(resource.clone()))?;

                let current = &tables.rows(&resource)[position];
                if !write.matches(current, &*tables) {
                    return Err(AppError::isolation_violation(
                        &resource,
                        "a linha existente não é gravável no contexto atual",
                    ));
                }
                let mut updated = current.clone();
                updated.extend(changes);
                if !write.matches(&updated, &*tables) {
                    return Err(AppError::isolation_violation(
                        &resource,
                        "a alteração moveria a linha para fora do tenant do contexto",
                    ));
                }
                if let Some(rows) = tables.get_mut(&resource) {
                    rows[position] = updated;
                }
            }
            Self::Delete { resource, id } => {
                let Some(position) = tables
                    .rows(&resource)
                    .iter()
                    .position(|r| record_id(r) == Some(id))
                else {
                    // Outra sessão já removeu a linha.
                    return Ok(());
                };
                if !write.matches(&tables.rows(&resource)[position], &*tables) {
                    return Err(AppError::isolation_violation(
                        &resource,
                        "a linha existente não é gravável no contexto atual",
                    ));
                }
                if let Some(rows) = tables.get_mut(&resource) {
                    rows.remove(position);
                }
            }
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.inner.checkin(connection);
        }
    }
}

impl MemorySession {
    // O filtro efetivo do recurso, espelhando o RLS do Postgres:
    // desligado = tabela aberta; ligado sem política = nega tudo.
    fn predicate(&self, resource: &str, access: Access) -> Result<Predicate, AppError> {
        self.inner.policies.get(resource)?;

        let state = self
            .inner
            .enforcement
            .read()
            .get(resource)
            .cloned()
            .unwrap_or_default();
        if !state.enabled {
            return Ok(Predicate::Const(true));
        }
        if state.policies.is_empty() {
            return Ok(Predicate::Const(false));
        }
        self.inner.policies.evaluate(resource, self.context(), access)
    }

    fn with_view<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        match &self.staged {
            Some(tables) => f(tables),
            None => f(&self.inner.tables.read()),
        }
    }

    fn staged_tables(&mut self) -> &mut Tables {
        let inner = &self.inner;
        self.staged.get_or_insert_with(|| inner.tables.read().clone())
    }

    // Localiza a linha visível e checa a imagem anterior contra o predicado de escrita.
    fn locate_writable(
        &mut self,
        resource: &str,
        id: Uuid,
    ) -> Result<(usize, Predicate), AppError> {
        let read = self.predicate(resource, Access::Read)?;
        let write = self.predicate(resource, Access::Write)?;

        let view: &Tables = self.staged_tables();
        let position = view
            .rows(resource)
            .iter()
            .position(|r| record_id(r) == Some(id) && read.matches(r, view))
            .ok_or_else(|| AppError::NotFound(resource.to_string()))?;

        if !write.matches(&view.rows(resource)[position], view) {
            return Err(AppError::isolation_violation(
                resource,
                "a linha existente não é gravável no contexto atual",
            ));
        }
        Ok((position, write))
    }
}

#[async_trait]
impl DataSession for MemorySession {
    fn context(&self) -> Option<&TenantContext> {
        self.connection.as_ref().and_then(|c| c.binding.as_ref())
    }

    async fn fetch_all(&mut self, resource: &str) -> Result<Vec<Record>, AppError> {
        let read = self.predicate(resource, Access::Read)?;
        Ok(self.with_view(|tables| {
            tables
                .rows(resource)
                .iter()
                .filter(|r| read.matches(r, tables))
                .cloned()
                .collect()
        }))
    }

    async fn fetch_one(&mut self, resource: &str, id: Uuid) -> Result<Record, AppError> {
        let read = self.predicate(resource, Access::Read)?;
        self.with_view(|tables| {
            tables
                .rows(resource)
                .iter()
                .find(|r| record_id(r) == Some(id) && read.matches(r, tables))
                .cloned()
        })
        .ok_or_else(|| AppError::NotFound(resource.to_string()))
    }

    async fn count(&mut self, resource: &str) -> Result<i64, AppError> {
        Ok(self.fetch_all(resource).await?.len() as i64)
    }

    async fn insert(&mut self, resource: &str, mut record: Record) -> Result<Record, AppError> {
        let write = self.predicate(resource, Access::Write)?;
        let id = ensure_id(&mut record)?;

        let tables = self.staged_tables();
        if tables.rows(resource).iter().any(|r| record_id(r) == Some(id)) {
            return Err(AppError::Validation(format!(
                "Já existe um registro com id {} em '{}'.",
                id, resource
            )));
        }
        if !write.matches(&record, &*tables) {
            return Err(AppError::isolation_violation(
                resource,
                "a linha nova não pertence ao tenant do contexto",
            ));
        }

        tables
            .entry(resource.to_string())
            .or_default()
            .push(record.clone());
        self.pending.push(PendingWrite::Insert {
            resource: resource.to_string(),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update(
        &mut self,
        resource: &str,
        id: Uuid,
        changes: Record,
    ) -> Result<Record, AppError> {
        if changes.contains_key("id") && record_id(&changes) != Some(id) {
            return Err(AppError::Validation(
                "O id de um registro não pode ser alterado.".to_string(),
            ));
        }

        let (position, write) = self.locate_writable(resource, id)?;
        let tables = self.staged_tables();

        let mut updated = tables.rows(resource)[position].clone();
        updated.extend(changes.clone());

        // A imagem depois da escrita também precisa ficar no escopo.
        if !write.matches(&updated, &*tables) {
            return Err(AppError::isolation_violation(
                resource,
                "a alteração moveria a linha para fora do tenant do contexto",
            ));
        }

        if let Some(rows) = tables.get_mut(resource) {
            rows[position] = updated.clone();
        }
        self.pending.push(PendingWrite::Update {
            resource: resource.to_string(),
            id,
            changes,
        });
        Ok(updated)
    }

    async fn delete(&mut self, resource: &str, id: Uuid) -> Result<(), AppError> {
        let (position, _) = self.locate_writable(resource, id)?;
        if let Some(rows) = self.staged_tables().get_mut(resource) {
            rows.remove(position);
        }
        self.pending.push(PendingWrite::Delete {
            resource: resource.to_string(),
            id,
        });
        Ok(())
    }

    async fn commit(mut self) -> Result<(), AppError> {
        self.staged = None;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let mut predicates: BTreeMap<String, Predicate> = BTreeMap::new();
        for write in &pending {
            if !predicates.contains_key(write.resource()) {
                let predicate = self.predicate(write.resource(), Access::Write)?;
                predicates.insert(write.resource().to_string(), predicate);
            }
        }

        // Tudo ou nada: o log é aplicado numa cópia e só troca se nada falhar.
        let mut live = self.inner.tables.write();
        let mut next = live.clone();
        for write in pending {
            let predicate = predicates
                .get(write.resource())
                .cloned()
                .unwrap_or(Predicate::Const(false));
            write.apply(&mut next, &predicate)?;
        }
        *live = next;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), AppError> {
        self.staged = None;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context::{BypassContext, ScopedContext};
    use crate::policy::sql::policy_ddl;
    use serde_json::json;

    async fn enforced_store() -> MemoryDatastore {
        let policies = Arc::new(PolicyTable::from_registry().unwrap());
        let store = MemoryDatastore::new(Arc::clone(&policies));
        for resource in policies.resources() {
            store.enable_enforcement(resource).await.unwrap();
            store
                .declare_policy(&policy_ddl(&policies, resource).unwrap())
                .await
                .unwrap();
        }
        store
    }

    fn bypass() -> Option<TenantContext> {
        Some(TenantContext::Bypass(BypassContext::new("teste").unwrap()))
    }

    fn rec(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded_on_drop() {
        let store = enforced_store().await;
        let ws = Uuid::new_v4();

        let mut session = store.open(bypass()).await.unwrap();
        session
            .insert("contacts", rec(json!({ "workspace_id": ws, "name": "Ana" })))
            .await
            .unwrap();
        assert_eq!(session.count("contacts").await.unwrap(), 1);
        drop(session);

        let mut session = store.open(bypass()).await.unwrap();
        assert_eq!(session.count("contacts").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn connections_return_to_pool_unbound() {
        let store = enforced_store().await;
        let ctx = TenantContext::Scoped(ScopedContext::new(Some(Uuid::new_v4()), None, None).unwrap());

        let session = store.open(Some(ctx.clone())).await.unwrap();
        assert_eq!(session.context(), Some(&ctx));
        session.commit().await.unwrap();

        assert_eq!(store.idle_connections(), 1);
        assert_eq!(store.bound_idle_connections(), 0);

        // A mesma conexão física, reaproveitada, chega sem o vínculo anterior.
        let session = store.open(None).await.unwrap();
        assert_eq!(session.context(), None);
    }

    #[tokio::test]
    async fn unenforced_table_is_open_and_enabled_without_policy_is_closed() {
        let policies = Arc::new(PolicyTable::from_registry().unwrap());
        let store = MemoryDatastore::new(policies);
        let ws = Uuid::new_v4();

        let mut session = store.open(bypass()).await.unwrap();
        session
            .insert("contacts", rec(json!({ "workspace_id": ws })))
            .await
            .unwrap();
        session.commit().await.unwrap();

        // Sem enforcement, até a sessão sem contexto enxerga a linha.
        let mut session = store.open(None).await.unwrap();
        assert_eq!(session.count("contacts").await.unwrap(), 1);
        drop(session);

        store.enable_enforcement("contacts").await.unwrap();
        let mut session = store.open(bypass()).await.unwrap();
        assert_eq!(session.count("contacts").await.unwrap(), 0);
    }

    fn scoped(workspace: Uuid) -> Option<TenantContext> {
        Some(TenantContext::Scoped(
            ScopedContext::new(Some(workspace), None, None).unwrap(),
        ))
    }

    #[tokio::test]
    async fn overlapping_sessions_keep_each_others_commits() {
        let store = enforced_store().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut session_a = store.open(scoped(a)).await.unwrap();
        let mut session_b = store.open(scoped(b)).await.unwrap();
        session_a
            .insert("contacts", rec(json!({ "workspace_id": a, "name": "Ana" })))
            .await
            .unwrap();
        session_b
            .insert("contacts", rec(json!({ "workspace_id": b, "name": "Bia" })))
            .await
            .unwrap();

        // B confirma primeiro; o commit de A não pode apagar a linha de B.
        session_b.commit().await.unwrap();
        session_a.commit().await.unwrap();

        let mut view = store.open(scoped(a)).await.unwrap();
        assert_eq!(view.count("contacts").await.unwrap(), 1);
        drop(view);
        let mut view = store.open(scoped(b)).await.unwrap();
        assert_eq!(view.count("contacts").await.unwrap(), 1);
        drop(view);
        let mut view = store.open(bypass()).await.unwrap();
        assert_eq!(view.count("contacts").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn overlapping_updates_merge_onto_the_latest_row() {
        let store = enforced_store().await;
        let ws = Uuid::new_v4();

        let mut seed = store.open(scoped(ws)).await.unwrap();
        let row = seed
            .insert("contacts", rec(json!({ "workspace_id": ws, "name": "Ana" })))
            .await
            .unwrap();
        seed.commit().await.unwrap();
        let id = record_id(&row).unwrap();

        let mut first = store.open(scoped(ws)).await.unwrap();
        let mut second = store.open(scoped(ws)).await.unwrap();
        first
            .update("contacts", id, rec(json!({ "name": "Ana Souza" })))
            .await
            .unwrap();
        second
            .update("contacts", id, rec(json!({ "email": "ana@crm.test" })))
            .await
            .unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let mut view = store.open(scoped(ws)).await.unwrap();
        let row = view.fetch_one("contacts", id).await.unwrap();
        assert_eq!(row["name"], json!("Ana Souza"));
        assert_eq!(row["email"], json!("ana@crm.test"));
    }

    #[tokio::test]
    async fn conflicting_insert_fails_the_whole_commit() {
        let store = enforced_store().await;
        let ws = Uuid::new_v4();
        let id = Uuid::new_v4();

        let mut first = store.open(scoped(ws)).await.unwrap();
        let mut second = store.open(scoped(ws)).await.unwrap();
        first
            .insert("contacts", rec(json!({ "id": id, "workspace_id": ws })))
            .await
            .unwrap();
        second
            .insert("contacts", rec(json!({ "workspace_id": ws, "name": "extra" })))
            .await
            .unwrap();
        second
            .insert("contacts", rec(json!({ "id": id, "workspace_id": ws })))
            .await
            .unwrap();
        first.commit().await.unwrap();

        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Nenhuma escrita do commit recusado chegou às tabelas.
        let mut view = store.open(scoped(ws)).await.unwrap();
        assert_eq!(view.count("contacts").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_cannot_move_row_to_another_workspace() {
        let store = enforced_store().await;
        let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());
        let ctx = TenantContext::Scoped(ScopedContext::new(Some(mine), None, None).unwrap());

        let mut session = store.open(Some(ctx)).await.unwrap();
        let row = session
            .insert("notes", rec(json!({ "workspace_id": mine, "body": "oi" })))
            .await
            .unwrap();
        let id = record_id(&row).unwrap();

        let err = session
            .update("notes", id, rec(json!({ "workspace_id": theirs })))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IsolationViolation { .. }));

        let err = session
            .update("notes", id, rec(json!({ "id": Uuid::new_v4() })))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
