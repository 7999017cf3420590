//! Dispatch of utility (non-plannable) statements.

use tracing::debug;

use crate::commands::{alter, analyze, create_table, drop, function, index, matview, types, variable, view};
use crate::nodes::parsenodes::{ObjectType, RawStmt, TransactionStmtKind};
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::engine::QueryResult;

/// Execute one utility statement. `source_text` is the query string it came
/// from, used for error positions and stored definitions.
pub fn process_utility(stmt: &RawStmt, source_text: &str) -> PgResult<QueryResult> {
    debug!(command = %command_tag(stmt), "processing utility statement");
    match stmt {
        RawStmt::Create(create) => create_table::execute_create_table(create, source_text),
        RawStmt::CreateTableAs(ctas) => match ctas.objtype {
            ObjectType::View => view::execute_create_view(ctas, source_text),
            _ => create_table::execute_create_table_as(ctas, source_text),
        },
        RawStmt::RefreshMatView(refresh) => matview::execute_refresh_matview(refresh),
        RawStmt::Index(stmt) => index::execute_create_index(stmt, source_text),
        RawStmt::CreateFunction(stmt) => function::execute_create_function(stmt, source_text),
        RawStmt::CreateDomain(stmt) => types::execute_create_domain(stmt, source_text),
        RawStmt::CompositeType(stmt) => types::execute_create_composite_type(stmt),
        RawStmt::Drop(stmt) => drop::execute_drop(stmt),
        RawStmt::AlterTable(stmt) => alter::execute_alter_table(stmt, source_text),
        RawStmt::Analyze(targets) => analyze::execute_analyze(targets),
        RawStmt::VariableSet(stmt) => variable::execute_set(stmt),
        RawStmt::VariableShow(name) => variable::execute_show(name),
        RawStmt::Transaction(_) => Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("{} cannot be executed here", command_tag(stmt)),
        )),
        RawStmt::Select(_) | RawStmt::Insert(_) | RawStmt::Update(_) | RawStmt::Delete(_) | RawStmt::Return(_) => {
            Err(PgError::new(
                SqlState::InternalError,
                format!("{} is not a utility statement", command_tag(stmt)),
            ))
        }
    }
}

/// The command name a statement reports, without row counts.
pub fn command_tag(stmt: &RawStmt) -> String {
    let tag = match stmt {
        RawStmt::Select(_) | RawStmt::Return(_) => "SELECT",
        RawStmt::Insert(_) => "INSERT",
        RawStmt::Update(_) => "UPDATE",
        RawStmt::Delete(_) => "DELETE",
        RawStmt::Create(_) => "CREATE TABLE",
        RawStmt::CreateTableAs(ctas) => match ctas.objtype {
            ObjectType::MatView => "CREATE MATERIALIZED VIEW",
            ObjectType::View => "CREATE VIEW",
            _ => "CREATE TABLE AS",
        },
        RawStmt::RefreshMatView(_) => "REFRESH MATERIALIZED VIEW",
        RawStmt::Index(_) => "CREATE INDEX",
        RawStmt::CreateFunction(_) => "CREATE FUNCTION",
        RawStmt::CreateDomain(_) => "CREATE DOMAIN",
        RawStmt::CompositeType(_) => "CREATE TYPE",
        RawStmt::Drop(stmt) => drop::command_tag(stmt.remove_type),
        RawStmt::AlterTable(_) => "ALTER TABLE",
        RawStmt::Analyze(_) => "ANALYZE",
        RawStmt::VariableSet(_) => "SET",
        RawStmt::VariableShow(_) => "SHOW",
        RawStmt::Transaction(TransactionStmtKind::Begin) => "BEGIN",
        RawStmt::Transaction(TransactionStmtKind::Commit) => "COMMIT",
        RawStmt::Transaction(TransactionStmtKind::Rollback) => "ROLLBACK",
    };
    tag.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::raw_parser;

    #[test]
    fn tags_follow_statement_kind() {
        let stmts = raw_parser("CREATE MATERIALIZED VIEW m AS SELECT 1; DROP VIEW v; BEGIN").unwrap();
        let tags: Vec<String> = stmts.iter().map(command_tag).collect();
        assert_eq!(tags, vec!["CREATE MATERIALIZED VIEW", "DROP VIEW", "BEGIN"]);
    }
}
