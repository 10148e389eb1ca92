// src/policy/predicate.rs

use uuid::Uuid;

use crate::common::db_utils::{bypass_sql, session_value_sql};
use crate::models::context::{ContextField, TenantContext};
use crate::models::tenancy::{uuid_field, Record};

// ---
// 1. A árvore do predicado
// ---
// Um único formato serve aos dois usos: avaliação em memória (com o contexto
// já substituído por literais) e geração do DDL das políticas RLS (com o
// contexto lido das variáveis de sessão).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    // Coluna da linha protegida.
    Row(String),
    // Coluna de uma linha de lookup (alias declarado no `Lookup`).
    Source { alias: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Column(Column),
    Context(ContextField),
    Literal(Uuid),
    Null,
}

impl Operand {
    pub fn row(name: &str) -> Self {
        Operand::Column(Column::Row(name.to_string()))
    }

    pub fn source(alias: &str, name: &str) -> Self {
        Operand::Column(Column::Source {
            alias: alias.to_string(),
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub alias: String,
    pub resource: String,
}

/// `EXISTS (SELECT 1 FROM sources WHERE filter)`.
///
/// `privileged` marca lookups que precisam enxergar a tabela alvo inteira,
/// independente da política dela (membership). No Postgres viram funções
/// auxiliares com bypass restrito ao corpo da função.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub sources: Vec<Source>,
    pub filter: Predicate,
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Const(bool),
    Eq(Operand, Operand),
    Exists(Box<Lookup>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(left: Operand, right: Operand) -> Self {
        Predicate::Eq(left, right)
    }

    pub fn exists(sources: Vec<Source>, filter: Predicate, privileged: bool) -> Self {
        Predicate::Exists(Box::new(Lookup {
            sources,
            filter,
            privileged,
        }))
    }

    pub fn is_const(&self, value: bool) -> bool {
        matches!(self, Predicate::Const(v) if *v == value)
    }

    /// Substitui os campos de contexto pelos valores do contexto vinculado.
    /// Campo ausente (ou nenhum contexto) vira `Null`, que nunca casa.
    pub fn bind(&self, context: Option<&TenantContext>) -> Predicate {
        let operand = |op: &Operand| match op {
            Operand::Context(field) => context
                .and_then(|ctx| ctx.field(*field))
                .map(Operand::Literal)
                .unwrap_or(Operand::Null),
            other => other.clone(),
        };

        match self {
            Predicate::Const(v) => Predicate::Const(*v),
            Predicate::Eq(l, r) => Predicate::Eq(operand(l), operand(r)),
            Predicate::Exists(lookup) => Predicate::exists(
                lookup.sources.clone(),
                lookup.filter.bind(context),
                lookup.privileged,
            ),
            Predicate::And(items) => Predicate::And(items.iter().map(|p| p.bind(context)).collect()),
            Predicate::Or(items) => Predicate::Or(items.iter().map(|p| p.bind(context)).collect()),
        }
    }

    // ---
    // 2. Avaliação em memória
    // ---

    pub fn matches(&self, row: &Record, rows: &dyn RowSource) -> bool {
        self.eval(row, rows, &mut Vec::new())
    }

    fn eval<'a>(
        &'a self,
        row: &'a Record,
        rows: &'a dyn RowSource,
        frames: &mut Vec<(&'a str, &'a Record)>,
    ) -> bool {
        match self {
            Predicate::Const(v) => *v,
            Predicate::Eq(l, r) => match (resolve(l, row, frames), resolve(r, row, frames)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Predicate::And(items) => items.iter().all(|p| p.eval(row, rows, frames)),
            Predicate::Or(items) => items.iter().any(|p| p.eval(row, rows, frames)),
            Predicate::Exists(lookup) => lookup.any_match(0, row, rows, frames),
        }
    }
}

/// Acesso às linhas das outras tabelas durante a avaliação de um lookup.
pub trait RowSource {
    fn rows(&self, resource: &str) -> &[Record];
}

impl Lookup {
    // Produto cartesiano das fontes, parando no primeiro casamento.
    fn any_match<'a>(
        &'a self,
        depth: usize,
        row: &'a Record,
        rows: &'a dyn RowSource,
        frames: &mut Vec<(&'a str, &'a Record)>,
    ) -> bool {
        let Some(source) = self.sources.get(depth) else {
            return self.filter.eval(row, rows, frames);
        };

        for candidate in rows.rows(&source.resource) {
            frames.push((source.alias.as_str(), candidate));
            let hit = self.any_match(depth + 1, row, rows, frames);
            frames.pop();
            if hit {
                return true;
            }
        }
        false
    }
}

fn resolve(operand: &Operand, row: &Record, frames: &[(&str, &Record)]) -> Option<Uuid> {
    match operand {
        Operand::Column(Column::Row(name)) => uuid_field(row, name),
        Operand::Column(Column::Source { alias, name }) => frames
            .iter()
            .rev()
            .find(|(a, _)| *a == alias.as_str())
            .and_then(|(_, record)| uuid_field(record, name)),
        Operand::Literal(id) => Some(*id),
        // Campo de contexto não vinculado nunca casa.
        Operand::Context(_) | Operand::Null => None,
    }
}

// ---
// 3. Renderização para SQL (corpo das políticas RLS)
// ---

/// Função auxiliar gerada para um lookup privilegiado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperFunction {
    pub name: String,
    pub arity: usize,
    pub sql: String,
}

pub struct SqlRenderer {
    table: String,
    function_prefix: String,
    // Em modo função, colunas da linha protegida viram parâmetros posicionais.
    params: Option<Vec<String>>,
    functions: Vec<HelperFunction>,
}

impl SqlRenderer {
    pub fn new(table: &str, function_prefix: &str) -> Self {
        Self {
            table: table.to_string(),
            function_prefix: function_prefix.to_string(),
            params: None,
            functions: Vec::new(),
        }
    }

    pub fn into_functions(self) -> Vec<HelperFunction> {
        self.functions
    }

    /// Corpo de política: bypass da sessão OU o predicado do recurso.
    pub fn policy_expression(&mut self, template: &Predicate) -> String {
        format!("({}) OR ({})", bypass_sql(), self.predicate(template))
    }

    pub fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Const(true) => "true".to_string(),
            Predicate::Const(false) => "false".to_string(),
            Predicate::Eq(l, r) => format!("{} = {}", self.operand(l), self.operand(r)),
            Predicate::And(items) => self.join(items, " AND ", "true"),
            Predicate::Or(items) => self.join(items, " OR ", "false"),
            Predicate::Exists(lookup) if lookup.privileged && self.params.is_none() => {
                self.helper_call(lookup)
            }
            Predicate::Exists(lookup) => format!("EXISTS ({})", self.lookup(lookup)),
        }
    }

    fn join(&mut self, items: &[Predicate], sep: &str, empty: &str) -> String {
        if items.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = items
            .iter()
            .map(|p| format!("({})", self.predicate(p)))
            .collect();
        parts.join(sep)
    }

    fn lookup(&mut self, lookup: &Lookup) -> String {
        let from: Vec<String> = lookup
            .sources
            .iter()
            .map(|s| format!("{} AS {}", quote(&s.resource), quote(&s.alias)))
            .collect();
        format!(
            "SELECT 1 FROM {} WHERE {}",
            from.join(", "),
            self.predicate(&lookup.filter)
        )
    }

    // O lookup vira uma função SQL com `SET app.bypass = 'on'` limitado ao corpo,
    // recebendo as colunas da linha protegida como parâmetros.
    fn helper_call(&mut self, lookup: &Lookup) -> String {
        let mut inner = SqlRenderer {
            table: self.table.clone(),
            function_prefix: self.function_prefix.clone(),
            params: Some(Vec::new()),
            functions: Vec::new(),
        };
        let body = inner.lookup(lookup);
        let params = inner.params.unwrap_or_default();

        let name = format!("{}_lookup_{}", self.function_prefix, self.functions.len() + 1);
        let signature = vec!["uuid"; params.len()].join(", ");
        let sql = format!(
            "CREATE OR REPLACE FUNCTION {name}({signature}) RETURNS boolean \
             LANGUAGE sql STABLE SET app.bypass = 'on' \
             AS $fn$ SELECT EXISTS ({body}) $fn$"
        );
        self.functions.push(HelperFunction {
            name: name.clone(),
            arity: params.len(),
            sql,
        });

        let args: Vec<String> = params
            .iter()
            .map(|c| format!("{}.{}", quote(&self.table), quote(c)))
            .collect();
        format!("{}({})", name, args.join(", "))
    }

    fn operand(&mut self, operand: &Operand) -> String {
        match operand {
            Operand::Column(Column::Row(name)) => match self.params.as_mut() {
                Some(params) => {
                    let position = match params.iter().position(|p| p == name) {
                        Some(i) => i,
                        None => {
                            params.push(name.clone());
                            params.len() - 1
                        }
                    };
                    format!("${}", position + 1)
                }
                None => format!("{}.{}", quote(&self.table), quote(name)),
            },
            Operand::Column(Column::Source { alias, name }) => {
                format!("{}.{}", quote(alias), quote(name))
            }
            Operand::Context(field) => session_value_sql(*field),
            Operand::Literal(id) => format!("'{}'::uuid", id),
            Operand::Null => "NULL".to_string(),
        }
    }
}

// Os identificadores já foram validados no registro da política.
fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}
