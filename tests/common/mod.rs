// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use uuid::Uuid;

use tenant_isolation::{
    db::{DataSession, MemoryDatastore},
    models::{
        context::ScopedContext,
        tenancy::{to_record, Membership, MembershipRole, Org, Record, User, Workspace},
    },
    policy::PolicyTable,
    services::{BootstrapService, ContextScope},
};

pub struct Fixture {
    pub store: Arc<MemoryDatastore>,
    pub policies: Arc<PolicyTable>,
    pub scope: ContextScope<MemoryDatastore>,
}

/// Datastore em memória com o catálogo embutido já sob enforcement.
pub async fn setup() -> Fixture {
    let policies = Arc::new(PolicyTable::from_registry().unwrap());
    let store = Arc::new(MemoryDatastore::new(Arc::clone(&policies)));
    BootstrapService::new(store.clone(), Arc::clone(&policies))
        .bootstrap_all()
        .await
        .unwrap();

    Fixture {
        scope: ContextScope::new(Arc::clone(&store), 3),
        store,
        policies,
    }
}

pub fn rec(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub fn ctx(workspace_id: Uuid, org_id: Uuid) -> ScopedContext {
    ScopedContext::new(Some(workspace_id), Some(org_id), None).unwrap()
}

pub fn user_ctx(org_id: Uuid, user_id: Uuid) -> ScopedContext {
    ScopedContext::new(None, Some(org_id), Some(user_id)).unwrap()
}

/// Um tenant completo: org + workspace.
#[derive(Debug, Clone, Copy)]
pub struct Tenant {
    pub org: Uuid,
    pub workspace: Uuid,
}

impl Tenant {
    pub fn context(&self) -> ScopedContext {
        ctx(self.workspace, self.org)
    }
}

impl Fixture {
    /// Cria org + workspace pelo caminho de sistema (bypass), como faz o signup.
    pub async fn tenant(&self, slug: &str) -> Tenant {
        let org = Org::new(slug, slug);
        let workspace = Workspace::new(org.id, "Principal", "principal");
        let tenant = Tenant {
            org: org.id,
            workspace: workspace.id,
        };
        let org = to_record(&org).unwrap();
        let workspace = to_record(&workspace).unwrap();

        self.scope
            .with_bypass("signup de teste", move |s| {
                async move {
                    s.insert("orgs", org).await?;
                    s.insert("workspaces", workspace).await?;
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap();
        tenant
    }

    pub async fn user_in(&self, orgs: &[Uuid], email: &str) -> Uuid {
        let user = User::new(&format!("auth|{}", email), email);
        let id = user.id;
        let mut rows = vec![("users", to_record(&user).unwrap())];
        for org in orgs {
            let membership = Membership::new(*org, id, MembershipRole::Member);
            rows.push(("memberships", to_record(&membership).unwrap()));
        }
        self.bypass_insert(rows).await;
        id
    }

    pub async fn bypass_insert(&self, rows: Vec<(&'static str, Record)>) {
        self.scope
            .with_bypass("seed de teste", move |s| {
                async move {
                    for (resource, row) in rows {
                        s.insert(resource, row).await?;
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap();
    }

    /// Insere `n` contatos dentro do contexto do tenant.
    pub async fn contacts(&self, tenant: Tenant, n: usize) {
        let ws = tenant.workspace;
        self.scope
            .with_context(tenant.context(), move |s| {
                async move {
                    for i in 0..n {
                        s.insert(
                            "contacts",
                            rec(json!({ "workspace_id": ws, "name": format!("contato {}", i) })),
                        )
                        .await?;
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap();
    }

    pub async fn count_in(&self, context: ScopedContext, resource: &'static str) -> i64 {
        self.scope
            .with_context(context, move |s| async move { s.count(resource).await }.boxed())
            .await
            .unwrap()
    }

    pub async fn count_bypass(&self, resource: &'static str) -> i64 {
        self.scope
            .with_bypass("contagem de teste", move |s| {
                async move { s.count(resource).await }.boxed()
            })
            .await
            .unwrap()
    }

    pub async fn count_unbound(&self, resource: &'static str) -> i64 {
        let mut session = tenant_isolation::db::Datastore::open(&*self.store, None)
            .await
            .unwrap();
        let count = session.count(resource).await.unwrap();
        session.rollback().await.unwrap();
        count
    }
}
