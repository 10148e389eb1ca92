use sqlx::PgConnection;

use crate::common::error::AppError;
use crate::models::context::{ContextField, TenantContext};

// ---
// Helper RLS: A "Chave" para o Banco de Dados
// ---
pub const BYPASS_SESSION_KEY: &str = "app.bypass";

/// Define as variáveis RLS (a "chave") na transação corrente.
///
/// `set_config(.., true)` é local à transação: commit, rollback ou o drop da
/// transação (cancelamento) desfazem o vínculo antes de a conexão voltar à pool.
/// Sem contexto, todas as variáveis ficam vazias e as políticas não casam nada.
pub(crate) async fn bind_tenant_context(
    conn: &mut PgConnection,
    context: Option<&TenantContext>,
) -> Result<(), sqlx::Error> {
    let value = |field: ContextField| {
        context
            .and_then(|ctx| ctx.field(field))
            .map(|id| id.to_string())
            .unwrap_or_default()
    };
    let bypass = if context.is_some_and(TenantContext::is_bypass) {
        "on"
    } else {
        "off"
    };

    // Um único round trip para as quatro variáveis.
    sqlx::query(
        r#"
        SELECT
            set_config($1, $2, true),
            set_config($3, $4, true),
            set_config($5, $6, true),
            set_config($7, $8, true)
        "#,
    )
    .bind(ContextField::WorkspaceId.session_key())
    .bind(value(ContextField::WorkspaceId))
    .bind(ContextField::OrgId.session_key())
    .bind(value(ContextField::OrgId))
    .bind(ContextField::UserId.session_key())
    .bind(value(ContextField::UserId))
    .bind(BYPASS_SESSION_KEY)
    .bind(bypass)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Expressão SQL que lê um campo do contexto da sessão (vazio vira NULL).
pub fn session_value_sql(field: ContextField) -> String {
    format!(
        "NULLIF(current_setting('{}', true), '')::uuid",
        field.session_key()
    )
}

pub fn bypass_sql() -> String {
    format!("current_setting('{}', true) = 'on'", BYPASS_SESSION_KEY)
}

// Nomes de tabelas e colunas entram no SQL por formatação, então só aceitamos
// identificadores simples em minúsculas.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn quote_ident(name: &str) -> Result<String, AppError> {
    if !is_valid_identifier(name) {
        return Err(AppError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}
