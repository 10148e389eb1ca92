// src/policy/catalog.rs

use crate::common::error::AppError;
use crate::models::policy::{AttributionShape, MembershipRule};
use crate::policy::table::PolicyTable;

// ---
// Catálogo estático dos recursos protegidos
// ---
// Cada recurso é declarado uma única vez com `inventory::submit!`. Adicionar um
// recurso novo é só mais uma entrada aqui, sem lógica própria.

pub struct StaticPolicy {
    pub resource: &'static str,
    pub shape: StaticShape,
}

pub enum StaticShape {
    DirectWorkspace(&'static str),
    DirectOrg(&'static str),
    ParentLookup {
        parent: &'static str,
        foreign_key: &'static str,
    },
    Membership(MembershipRule),
    BypassOnly,
}

impl StaticPolicy {
    pub const fn new(resource: &'static str, shape: StaticShape) -> Self {
        Self { resource, shape }
    }
}

impl From<&StaticShape> for AttributionShape {
    fn from(shape: &StaticShape) -> Self {
        match shape {
            StaticShape::DirectWorkspace(column) => AttributionShape::DirectWorkspace {
                column: column.to_string(),
            },
            StaticShape::DirectOrg(column) => AttributionShape::DirectOrg {
                column: column.to_string(),
            },
            StaticShape::ParentLookup {
                parent,
                foreign_key,
            } => AttributionShape::ParentLookup {
                parent: parent.to_string(),
                foreign_key: foreign_key.to_string(),
            },
            StaticShape::Membership(rule) => AttributionShape::Membership { rule: *rule },
            StaticShape::BypassOnly => AttributionShape::BypassOnly,
        }
    }
}

inventory::collect!(StaticPolicy);

impl PolicyTable {
    /// Monta a tabela a partir de todas as declarações estáticas do binário.
    pub fn from_registry() -> Result<Self, AppError> {
        let mut table = PolicyTable::new();
        for entry in inventory::iter::<StaticPolicy> {
            table.register_policy(entry.resource, AttributionShape::from(&entry.shape))?;
        }
        table.validate()?;
        Ok(table)
    }
}

// --- 1. Atribuição direta por workspace ---
inventory::submit! { StaticPolicy::new("contacts", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("pipelines", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("opportunities", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("notes", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("workspace_settings", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("outbound_routing_rules", StaticShape::DirectWorkspace("workspace_id")) }
inventory::submit! { StaticPolicy::new("ingest_routes", StaticShape::DirectWorkspace("workspace_id")) }

// --- 2. Atribuição direta por org ---
inventory::submit! { StaticPolicy::new("workspaces", StaticShape::DirectOrg("org_id")) }
inventory::submit! { StaticPolicy::new("memberships", StaticShape::DirectOrg("org_id")) }
inventory::submit! { StaticPolicy::new("integration_connections", StaticShape::DirectOrg("org_id")) }
inventory::submit! { StaticPolicy::new("integration_objects", StaticShape::DirectOrg("org_id")) }

// --- 3. Atribuição indireta (um salto até o pai) ---
inventory::submit! {
    StaticPolicy::new("pipeline_stages", StaticShape::ParentLookup { parent: "pipelines", foreign_key: "pipeline_id" })
}
inventory::submit! {
    StaticPolicy::new("stage_history", StaticShape::ParentLookup { parent: "opportunities", foreign_key: "opportunity_id" })
}
inventory::submit! {
    StaticPolicy::new("field_mapping_rules", StaticShape::ParentLookup { parent: "ingest_routes", foreign_key: "ingest_route_id" })
}
inventory::submit! {
    StaticPolicy::new("attribution_records", StaticShape::ParentLookup { parent: "contacts", foreign_key: "contact_id" })
}

// --- 4. Membership ---
inventory::submit! { StaticPolicy::new("orgs", StaticShape::Membership(MembershipRule::OrgMember)) }
inventory::submit! { StaticPolicy::new("users", StaticShape::Membership(MembershipRule::UserCoMember)) }

// --- 5. Somente bypass ---
inventory::submit! { StaticPolicy::new("system_event_logs", StaticShape::BypassOnly) }
inventory::submit! { StaticPolicy::new("webhook_events", StaticShape::BypassOnly) }
