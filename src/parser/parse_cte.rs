//! Non-recursive WITH lists.

use tracing::debug;

use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod};
use crate::nodes::parsenodes::{ColumnTypes, CommonTableExpr, WithClause};
use crate::parser::analyze::parse_sub_analyze;
use crate::parser::parse_node::ParseState;
use crate::utils::elog::{PgError, PgResult, SqlState};

/// Analyze each CTE of a WITH clause into the current level's CTE
/// namespace. A CTE can see the ones declared before it; naming a later one
/// is reported as such rather than as a missing table.
pub fn transform_with_clause(pstate: &mut ParseState<'_>, with: &WithClause) -> PgResult<()> {
    if with.recursive {
        return Err(PgError::new(SqlState::FeatureNotSupported, "WITH RECURSIVE is not supported").at(with.location));
    }
    for (idx, item) in with.ctes.iter().enumerate() {
        if with.ctes[..idx].iter().any(|prev| prev.ctename == item.ctename) {
            return Err(PgError::new(
                SqlState::DuplicateAlias,
                format!("WITH query name \"{}\" specified more than once", item.ctename),
            )
            .at(item.location));
        }
    }
    pstate.level_mut().future_ctes = with.ctes.iter().map(|item| item.ctename.clone()).collect();

    for item in &with.ctes {
        pstate.level_mut().future_ctes.retain(|name| name != &item.ctename);
        let query = parse_sub_analyze(pstate, &item.query)?;

        let mut colnames: Vec<String> = Vec::new();
        let mut columns = ColumnTypes::default();
        for (idx, tle) in query.visible_targets().enumerate() {
            colnames.push(tle.resname.clone().unwrap_or_else(|| format!("?column{}?", idx + 1)));
            columns.push(expr_type(&tle.expr), expr_typmod(&tle.expr), expr_collation(&tle.expr));
        }
        if item.aliascolnames.len() > colnames.len() {
            return Err(PgError::new(
                SqlState::InvalidColumnReference,
                format!(
                    "WITH query \"{}\" has {} columns available but {} columns specified",
                    item.ctename,
                    colnames.len(),
                    item.aliascolnames.len()
                ),
            )
            .at(item.location));
        }
        for (name, alias) in colnames.iter_mut().zip(&item.aliascolnames) {
            *name = alias.clone();
        }
        debug!(cte = %item.ctename, columns = colnames.len(), "analyzed WITH query");
        pstate.level_mut().ctenamespace.push(CommonTableExpr {
            ctename: item.ctename.clone(),
            aliascolnames: item.aliascolnames.clone(),
            query: Box::new(query),
            colnames,
            columns,
            refcount: 0,
            location: item.location,
        });
    }
    pstate.level_mut().future_ctes.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::Catalog;
    use crate::nodes::parsenodes::RteKind;
    use crate::parser::analyze::parse_analyze;
    use crate::parser::gram::raw_parser;
    use crate::utils::elog::PgResult;
    use crate::nodes::parsenodes::Query;

    fn analyze(sql: &str) -> PgResult<Query> {
        let catalog = Catalog::default();
        let stmts = raw_parser(sql)?;
        parse_analyze(&catalog, &stmts[0], sql, &[])
    }

    #[test]
    fn cte_columns_take_alias_names() {
        let query = analyze("WITH w(x, y) AS (SELECT 1, 'a') SELECT y, x FROM w").unwrap();
        assert_eq!(query.cte_list.len(), 1);
        assert_eq!(query.cte_list[0].colnames, vec!["x", "y"]);
        assert_eq!(query.cte_list[0].refcount, 1);
        assert!(matches!(&query.rtable[0].kind, RteKind::Cte { ctelevelsup: 0, .. }));
        let names: Vec<_> = query.target_list.iter().filter_map(|t| t.resname.clone()).collect();
        assert_eq!(names, vec!["y", "x"]);
    }

    #[test]
    fn later_cte_sees_earlier_one() {
        let query = analyze("WITH a AS (SELECT 1 AS v), b AS (SELECT v + 1 AS w FROM a) SELECT w FROM b").unwrap();
        assert_eq!(query.cte_list.len(), 2);
        assert_eq!(query.cte_list[0].refcount, 1);
    }

    #[test]
    fn forward_reference_is_reported() {
        let err = analyze("WITH a AS (SELECT * FROM b), b AS (SELECT 1) SELECT * FROM a").unwrap_err();
        assert_eq!(err.message, "relation \"b\" does not exist");
        assert!(err.detail.is_some());
    }

    #[test]
    fn duplicate_and_recursive_rejected() {
        let err = analyze("WITH a AS (SELECT 1), a AS (SELECT 2) SELECT 1").unwrap_err();
        assert_eq!(err.message, "WITH query name \"a\" specified more than once");
        let err = analyze("WITH a(x, y) AS (SELECT 1) SELECT 1").unwrap_err();
        assert_eq!(err.message, "WITH query \"a\" has 1 columns available but 2 columns specified");
        assert!(analyze("WITH RECURSIVE a AS (SELECT 1) SELECT 1").is_err());
    }
}
