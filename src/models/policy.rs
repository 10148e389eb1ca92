// src/models/policy.rs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::common::db_utils::is_valid_identifier;
use crate::models::context::ContextField;

/// Coluna de id usada em todas as junções (pai, membership, users).
pub const ID_COLUMN: &str = "id";

// Tabela de vínculo usuário-org usada pelas políticas de membership.
pub const MEMBERSHIP_RESOURCE: &str = "memberships";
pub const MEMBERSHIP_ORG_COLUMN: &str = "org_id";
pub const MEMBERSHIP_USER_COLUMN: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

// ---
// Regras de membership (shape 4)
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRule {
    // Org visível se o usuário do contexto tem membership nela.
    OrgMember,
    // User visível para si mesmo e para co-membros; gravável só por si mesmo.
    UserCoMember,
}

// ---
// O formato de atribuição de cada recurso protegido
// ---
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AttributionShape {
    DirectWorkspace { column: String },
    DirectOrg { column: String },
    ParentLookup { parent: String, foreign_key: String },
    Membership { rule: MembershipRule },
    BypassOnly,
}

impl AttributionShape {
    /// Shapes 1 e 2: coluna do tenant e o campo do contexto que ela compara.
    pub fn direct_attribute(&self) -> Option<(&str, ContextField)> {
        match self {
            AttributionShape::DirectWorkspace { column } => {
                Some((column.as_str(), ContextField::WorkspaceId))
            }
            AttributionShape::DirectOrg { column } => Some((column.as_str(), ContextField::OrgId)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttributionShape::DirectWorkspace { .. } => "direct_workspace",
            AttributionShape::DirectOrg { .. } => "direct_org",
            AttributionShape::ParentLookup { .. } => "parent_lookup",
            AttributionShape::Membership { .. } => "membership",
            AttributionShape::BypassOnly => "bypass_only",
        }
    }

    /// Identificadores SQL que o shape carrega (validados no registro).
    pub fn identifiers(&self) -> Vec<&str> {
        match self {
            AttributionShape::DirectWorkspace { column } | AttributionShape::DirectOrg { column } => {
                vec![column.as_str()]
            }
            AttributionShape::ParentLookup { parent, foreign_key } => {
                vec![parent.as_str(), foreign_key.as_str()]
            }
            AttributionShape::Membership { .. } | AttributionShape::BypassOnly => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub resource: String,
    #[serde(flatten)]
    pub shape: AttributionShape,
}

// ---
// Declaração vinda do catálogo JSON (POLICY_CATALOG_PATH)
// ---
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PolicyDeclaration {
    #[validate(
        length(min = 1, message = "O nome do recurso é obrigatório."),
        custom(function = "validate_identifier")
    )]
    pub resource: String,

    #[serde(flatten)]
    pub shape: AttributionShape,
}

fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    if is_valid_identifier(value) {
        return Ok(());
    }
    let mut err = ValidationError::new("identifier");
    err.message = Some("Use apenas [a-z0-9_], começando por letra ou '_'.".into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_parse_from_tagged_json() {
        let raw = r#"[
            {"resource": "invoices", "shape": "direct_workspace", "column": "workspace_id"},
            {"resource": "invoice_lines", "shape": "parent_lookup", "parent": "invoices", "foreign_key": "invoice_id"},
            {"resource": "audit_trail", "shape": "bypass_only"}
        ]"#;
        let decls: Vec<PolicyDeclaration> = serde_json::from_str(raw).unwrap();

        assert_eq!(decls.len(), 3);
        assert_eq!(
            decls[1].shape,
            AttributionShape::ParentLookup {
                parent: "invoices".into(),
                foreign_key: "invoice_id".into()
            }
        );
        assert!(decls.iter().all(|d| d.validate().is_ok()));
    }

    #[test]
    fn declarations_reject_unsafe_identifiers() {
        let decl = PolicyDeclaration {
            resource: "contacts; DROP TABLE orgs".into(),
            shape: AttributionShape::BypassOnly,
        };
        assert!(decl.validate().is_err());
    }
}
