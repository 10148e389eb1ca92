// src/policy/evaluator.rs

use crate::common::error::AppError;
use crate::models::context::{ContextField, TenantContext};
use crate::models::policy::{
    Access, AttributionShape, MembershipRule, ID_COLUMN, MEMBERSHIP_ORG_COLUMN,
    MEMBERSHIP_RESOURCE, MEMBERSHIP_USER_COLUMN,
};
use crate::models::tenancy::Record;
use crate::policy::predicate::{Operand, Predicate, RowSource, Source};
use crate::policy::table::PolicyTable;

const PARENT_ALIAS: &str = "parent";

impl PolicyTable {
    /// Predicado do recurso com os campos de contexto ainda abertos.
    /// É a forma usada para gerar as políticas RLS.
    pub fn template(&self, resource: &str, access: Access) -> Result<Predicate, AppError> {
        let policy = self.get(resource)?;

        let predicate = match &policy.shape {
            AttributionShape::DirectWorkspace { column } => Predicate::eq(
                Operand::row(column),
                Operand::Context(ContextField::WorkspaceId),
            ),
            AttributionShape::DirectOrg { column } => {
                Predicate::eq(Operand::row(column), Operand::Context(ContextField::OrgId))
            }
            AttributionShape::ParentLookup {
                parent,
                foreign_key,
            } => {
                let parent_policy = self.get(parent)?;
                let (tenant_column, field) =
                    parent_policy.shape.direct_attribute().ok_or_else(|| {
                        AppError::InvalidPolicy {
                            resource: resource.to_string(),
                            reason: format!("o pai '{}' não tem atribuição direta", parent),
                        }
                    })?;

                Predicate::exists(
                    vec![Source {
                        alias: PARENT_ALIAS.to_string(),
                        resource: parent.clone(),
                    }],
                    Predicate::And(vec![
                        Predicate::eq(
                            Operand::source(PARENT_ALIAS, ID_COLUMN),
                            Operand::row(foreign_key),
                        ),
                        Predicate::eq(
                            Operand::source(PARENT_ALIAS, tenant_column),
                            Operand::Context(field),
                        ),
                    ]),
                    false,
                )
            }
            // Leitura e escrita iguais: só membros da org, nunca o org_id do contexto.
            AttributionShape::Membership {
                rule: MembershipRule::OrgMember,
            } => org_member(),
            AttributionShape::Membership {
                rule: MembershipRule::UserCoMember,
            } => {
                let is_self =
                    Predicate::eq(Operand::row(ID_COLUMN), Operand::Context(ContextField::UserId));
                match access {
                    // Visível para co-membros, gravável só pelo próprio usuário.
                    Access::Read => Predicate::Or(vec![is_self, shares_org()]),
                    Access::Write => is_self,
                }
            }
            AttributionShape::BypassOnly => Predicate::Const(false),
        };

        Ok(predicate)
    }

    /// O filtro concreto para o contexto vinculado. Bypass libera tudo, mas o
    /// recurso ainda precisa estar registrado.
    pub fn evaluate(
        &self,
        resource: &str,
        context: Option<&TenantContext>,
        access: Access,
    ) -> Result<Predicate, AppError> {
        let template = self.template(resource, access)?;
        match context {
            Some(TenantContext::Bypass(_)) => Ok(Predicate::Const(true)),
            other => Ok(template.bind(other)),
        }
    }

    /// Valida uma linha que está sendo gravada (a imagem depois da escrita).
    pub fn check_write(
        &self,
        resource: &str,
        context: Option<&TenantContext>,
        record: &Record,
        rows: &dyn RowSource,
    ) -> Result<(), AppError> {
        let predicate = self.evaluate(resource, context, Access::Write)?;
        if predicate.matches(record, rows) {
            return Ok(());
        }
        Err(AppError::isolation_violation(
            resource,
            "a linha gravada não pertence ao tenant do contexto",
        ))
    }
}

// exists(membership m WHERE m.org_id = row.id AND m.user_id = ctx.user)
fn org_member() -> Predicate {
    Predicate::exists(
        vec![Source {
            alias: "m".to_string(),
            resource: MEMBERSHIP_RESOURCE.to_string(),
        }],
        Predicate::And(vec![
            Predicate::eq(
                Operand::source("m", MEMBERSHIP_ORG_COLUMN),
                Operand::row(ID_COLUMN),
            ),
            Predicate::eq(
                Operand::source("m", MEMBERSHIP_USER_COLUMN),
                Operand::Context(ContextField::UserId),
            ),
        ]),
        true,
    )
}

// exists(membership m1, m2 WHERE m1.user_id = row.id AND m2.user_id = ctx.user AND m1.org_id = m2.org_id)
fn shares_org() -> Predicate {
    Predicate::exists(
        vec![
            Source {
                alias: "m1".to_string(),
                resource: MEMBERSHIP_RESOURCE.to_string(),
            },
            Source {
                alias: "m2".to_string(),
                resource: MEMBERSHIP_RESOURCE.to_string(),
            },
        ],
        Predicate::And(vec![
            Predicate::eq(
                Operand::source("m1", MEMBERSHIP_USER_COLUMN),
                Operand::row(ID_COLUMN),
            ),
            Predicate::eq(
                Operand::source("m2", MEMBERSHIP_USER_COLUMN),
                Operand::Context(ContextField::UserId),
            ),
            Predicate::eq(
                Operand::source("m1", MEMBERSHIP_ORG_COLUMN),
                Operand::source("m2", MEMBERSHIP_ORG_COLUMN),
            ),
        ]),
        true,
    )
}
