// src/policy/sql.rs

use crate::common::db_utils::{is_valid_identifier, quote_ident};
use crate::common::error::AppError;
use crate::models::policy::Access;
use crate::policy::predicate::{HelperFunction, SqlRenderer};
use crate::policy::table::PolicyTable;

/// Nomes das políticas criadas em cada tabela protegida (uma por comando).
pub const POLICY_NAMES: [&str; 4] = [
    "tenant_isolation_select",
    "tenant_isolation_insert",
    "tenant_isolation_update",
    "tenant_isolation_delete",
];

/// O conjunto completo de DDL que declara as políticas de um recurso.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDdl {
    pub resource: String,
    pub functions: Vec<HelperFunction>,
    pub statements: Vec<String>,
}

impl PolicyDdl {
    pub fn policy_names(&self) -> Vec<String> {
        POLICY_NAMES.iter().map(|n| n.to_string()).collect()
    }
}

/// `ENABLE` + `FORCE`: sem o FORCE o dono da tabela passaria por cima das políticas.
pub fn enable_statements(resource: &str) -> Result<Vec<String>, AppError> {
    let table = quote_ident(resource)?;
    Ok(vec![
        format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table),
        format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY", table),
    ])
}

/// Gera o DDL idempotente (drop + create) das quatro políticas do recurso.
pub fn policy_ddl(policies: &PolicyTable, resource: &str) -> Result<PolicyDdl, AppError> {
    let table = quote_ident(resource)?;

    let mut read_renderer = SqlRenderer::new(resource, &function_prefix(resource, Access::Read));
    let read = read_renderer.policy_expression(&policies.template(resource, Access::Read)?);

    let mut write_renderer = SqlRenderer::new(resource, &function_prefix(resource, Access::Write));
    let write = write_renderer.policy_expression(&policies.template(resource, Access::Write)?);

    let mut functions = read_renderer.into_functions();
    functions.extend(write_renderer.into_functions());

    // O Postgres trunca nomes acima de 63 bytes, e a função de leitura e a de
    // escrita acabariam com o mesmo nome.
    if let Some(function) = functions.iter().find(|f| !is_valid_identifier(&f.name)) {
        return Err(AppError::InvalidPolicy {
            resource: resource.to_string(),
            reason: format!("nome de função auxiliar longo demais: {}", function.name),
        });
    }

    let mut statements: Vec<String> = POLICY_NAMES
        .iter()
        .map(|name| format!("DROP POLICY IF EXISTS {} ON {}", name, table))
        .collect();
    statements.push(format!(
        "CREATE POLICY {} ON {} FOR SELECT USING ({})",
        POLICY_NAMES[0], table, read
    ));
    statements.push(format!(
        "CREATE POLICY {} ON {} FOR INSERT WITH CHECK ({})",
        POLICY_NAMES[1], table, write
    ));
    statements.push(format!(
        "CREATE POLICY {} ON {} FOR UPDATE USING ({}) WITH CHECK ({})",
        POLICY_NAMES[2], table, write, write
    ));
    statements.push(format!(
        "CREATE POLICY {} ON {} FOR DELETE USING ({})",
        POLICY_NAMES[3], table, write
    ));

    Ok(PolicyDdl {
        resource: resource.to_string(),
        functions,
        statements,
    })
}

fn function_prefix(resource: &str, access: Access) -> String {
    format!("tenant_isolation_{}_{}", resource, access.as_str())
}

/// O nome mais longo de função auxiliar que o recurso pode gerar.
pub(crate) fn longest_helper_name(resource: &str) -> String {
    format!("{}_lookup_99", function_prefix(resource, Access::Write))
}
