// src/policy/table.rs

use std::collections::BTreeMap;
use std::path::Path;

use validator::Validate;

use crate::common::db_utils::is_valid_identifier;
use crate::common::error::AppError;
use crate::models::policy::{AttributionShape, Policy, PolicyDeclaration};
use crate::policy::sql::longest_helper_name;

/// Registro estático: recurso -> política. É a única fonte de verdade sobre
/// o que é protegido, e é reconstruído a partir do código/config a cada boot.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: BTreeMap<String, Policy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declara como um recurso é atribuído a um tenant. Duas declarações para o
    /// mesmo recurso são erro de programação (`DuplicatePolicy`).
    pub fn register_policy(
        &mut self,
        resource: impl Into<String>,
        shape: AttributionShape,
    ) -> Result<(), AppError> {
        let resource = resource.into();

        for ident in std::iter::once(resource.as_str()).chain(shape.identifiers()) {
            if !is_valid_identifier(ident) {
                return Err(AppError::InvalidIdentifier(ident.to_string()));
            }
        }

        // Membership vira funções auxiliares no banco, nomeadas a partir do recurso.
        if matches!(shape, AttributionShape::Membership { .. })
            && !is_valid_identifier(&longest_helper_name(&resource))
        {
            return Err(AppError::InvalidPolicy {
                reason: format!(
                    "nome longo demais para as funções auxiliares ({} bytes)",
                    resource.len()
                ),
                resource,
            });
        }

        if self.policies.contains_key(&resource) {
            return Err(AppError::DuplicatePolicy(resource));
        }

        tracing::debug!(resource = %resource, shape = shape.label(), "política registrada");
        self.policies
            .insert(resource.clone(), Policy { resource, shape });
        Ok(())
    }

    /// Recurso sem registro é inacessível: nunca "aberto por padrão".
    pub fn get(&self, resource: &str) -> Result<&Policy, AppError> {
        self.policies
            .get(resource)
            .ok_or_else(|| AppError::PolicyNotFound(resource.to_string()))
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.policies.contains_key(resource)
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Checagens que só fazem sentido com a tabela completa: todo lookup de pai
    /// aponta para um recurso registrado com atribuição direta (um único salto).
    pub fn validate(&self) -> Result<(), AppError> {
        for policy in self.policies.values() {
            if let AttributionShape::ParentLookup { parent, .. } = &policy.shape {
                let parent_policy = self.get(parent)?;
                if parent_policy.shape.direct_attribute().is_none() {
                    return Err(AppError::InvalidPolicy {
                        resource: policy.resource.clone(),
                        reason: format!(
                            "o pai '{}' precisa ter atribuição direta (workspace ou org)",
                            parent
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn extend(
        &mut self,
        declarations: impl IntoIterator<Item = PolicyDeclaration>,
    ) -> Result<(), AppError> {
        for declaration in declarations {
            declaration
                .validate()
                .map_err(|e| AppError::Validation(e.to_string()))?;
            self.register_policy(declaration.resource, declaration.shape)?;
        }
        Ok(())
    }

    /// Carrega declarações extras de um arquivo JSON (lista de `PolicyDeclaration`).
    pub fn extend_from_file(&mut self, path: &Path) -> Result<(), AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Falha ao ler o catálogo de políticas {}: {}", path.display(), e)
        })?;
        let declarations: Vec<PolicyDeclaration> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Validation(format!("Catálogo de políticas inválido: {}", e)))?;
        self.extend(declarations)
    }
}
