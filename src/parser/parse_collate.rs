//! Collation assignment.
//!
//! Expressions are built with invalid collations; once a clause is complete
//! a bottom-up pass derives each node's result collation and the collation
//! its function should use. Explicit `COLLATE` beats implicit collations,
//! a non-default implicit collation beats the default one, and two
//! different non-default implicit collations leave the node without a
//! collation. Two different explicit collations are an error.

use crate::catalog::Catalog;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_proc::AggKind;
use crate::catalog::pg_type::DEFAULT_COLLATION_OID;
use crate::nodes::node_funcs::{expr_collation, expr_location, expr_type};
use crate::nodes::parsenodes::{FromExpr, JoinTreeNode, Query};
use crate::nodes::primnodes::{Expr, SubLinkType, TargetEntry};
use crate::utils::elog::{PgError, PgResult, SqlState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Strength {
    None,
    Implicit,
    Conflict,
    Explicit,
}

#[derive(Debug, Clone, Copy)]
struct CollState {
    collation: Oid,
    strength: Strength,
    location: Option<usize>,
    /// Second collation of an implicit conflict, for the error message.
    collation2: Oid,
}

impl CollState {
    const NONE: Self = Self {
        collation: INVALID_OID,
        strength: Strength::None,
        location: None,
        collation2: INVALID_OID,
    };

    fn input_collation(&self) -> Oid {
        if self.strength == Strength::Conflict {
            INVALID_OID
        } else {
            self.collation
        }
    }
}

struct Assigner<'c> {
    catalog: &'c Catalog,
}

impl Assigner<'_> {
    fn merge(&self, state: &mut CollState, other: CollState) -> PgResult<()> {
        if other.strength > state.strength {
            *state = other;
            return Ok(());
        }
        if other.strength < state.strength || other.collation == state.collation {
            return Ok(());
        }
        match other.strength {
            Strength::Implicit => {
                if state.collation == DEFAULT_COLLATION_OID {
                    *state = other;
                } else if other.collation != DEFAULT_COLLATION_OID {
                    state.strength = Strength::Conflict;
                    state.collation2 = other.collation;
                }
            }
            Strength::Explicit => {
                return Err(PgError::new(
                    SqlState::CollationMismatch,
                    format!(
                        "collation mismatch between explicit collations \"{}\" and \"{}\"",
                        self.catalog.collation_name(state.collation),
                        self.catalog.collation_name(other.collation)
                    ),
                )
                .at(other.location));
            }
            Strength::None | Strength::Conflict => {}
        }
        Ok(())
    }

    fn merge_all<'e>(&self, exprs: impl IntoIterator<Item = &'e mut Expr>) -> PgResult<CollState> {
        let mut state = CollState::NONE;
        for expr in exprs {
            let child = self.assign(expr)?;
            self.merge(&mut state, child)?;
        }
        Ok(state)
    }

    fn separately<'e>(&self, exprs: impl IntoIterator<Item = &'e mut Expr>) -> PgResult<()> {
        for expr in exprs {
            self.assign(expr)?;
        }
        Ok(())
    }

    /// Result collation of a node of type `typid` whose inputs merged to
    /// `inputs`, and the state it contributes to its parent.
    fn result(&self, inputs: CollState, typid: Oid, location: Option<usize>) -> (Oid, CollState) {
        let typcoll = self.catalog.type_collation(typid);
        if typcoll == INVALID_OID {
            return (INVALID_OID, CollState::NONE);
        }
        if inputs.strength > Strength::None {
            (inputs.input_collation(), inputs)
        } else {
            (
                typcoll,
                CollState {
                    collation: typcoll,
                    strength: Strength::Implicit,
                    location,
                    collation2: INVALID_OID,
                },
            )
        }
    }

    /// State of a leaf whose collation was fixed when it was built.
    fn leaf(&self, collation: Oid, location: Option<usize>) -> CollState {
        if collation == INVALID_OID {
            CollState::NONE
        } else {
            CollState {
                collation,
                strength: Strength::Implicit,
                location,
                collation2: INVALID_OID,
            }
        }
    }

    fn assign(&self, expr: &mut Expr) -> PgResult<CollState> {
        let location = expr_location(expr);
        let typid = expr_type(expr);
        let own_collation = expr_collation(expr);
        let state = match expr {
            Expr::Var(var) => {
                if var.varcollid == INVALID_OID {
                    var.varcollid = self.catalog.type_collation(var.vartype);
                }
                self.leaf(var.varcollid, location)
            }
            Expr::Const(c) => {
                if c.constcollid == INVALID_OID {
                    c.constcollid = self.catalog.type_collation(c.consttype);
                }
                self.leaf(c.constcollid, location)
            }
            Expr::Param(p) => {
                if p.paramcollid == INVALID_OID {
                    p.paramcollid = self.catalog.type_collation(p.paramtype);
                }
                self.leaf(p.paramcollid, location)
            }
            Expr::CaseTestExpr(c) => self.leaf(c.collation, location),
            Expr::CoerceToDomainValue(c) => self.leaf(c.collation, location),
            Expr::SetToDefault(s) => self.leaf(s.collation, location),
            Expr::SqlValueFunction(_) => self.leaf(self.catalog.type_collation(typid), location),
            Expr::CollateExpr(c) => {
                self.assign(&mut c.arg)?;
                CollState {
                    collation: c.coll_oid,
                    strength: Strength::Explicit,
                    location,
                    collation2: INVALID_OID,
                }
            }
            Expr::FieldSelect(fs) => {
                self.assign(&mut fs.arg)?;
                if fs.resultcollid == INVALID_OID {
                    fs.resultcollid = self.catalog.type_collation(fs.resulttype);
                }
                self.leaf(fs.resultcollid, location)
            }
            Expr::FieldStore(fs) => {
                self.assign(&mut fs.arg)?;
                self.separately(fs.newvals.iter_mut())?;
                CollState::NONE
            }
            Expr::RowExpr(row) => {
                self.separately(row.args.iter_mut())?;
                CollState::NONE
            }
            Expr::RowCompareExpr(rc) => {
                rc.inputcollids.clear();
                for (l, r) in rc.largs.iter_mut().zip(rc.rargs.iter_mut()) {
                    let pair = self.merge_all([l, r])?;
                    rc.inputcollids.push(pair.input_collation());
                }
                CollState::NONE
            }
            Expr::SubLink(sublink) => {
                if let Some(test) = &mut sublink.testexpr {
                    self.assign(test)?;
                }
                match sublink.sub_link_type {
                    SubLinkType::Expr | SubLinkType::Array => {
                        let collation = sublink
                            .subselect
                            .visible_targets()
                            .next()
                            .map_or(INVALID_OID, |tle| expr_collation(&tle.expr));
                        self.leaf(collation, location)
                    }
                    _ => CollState::NONE,
                }
            }
            Expr::SubPlan(_) => self.leaf(own_collation, location),
            Expr::CaseExpr(case) => {
                if let Some(arg) = &mut case.arg {
                    self.assign(arg)?;
                }
                let mut inputs = CollState::NONE;
                for when in &mut case.args {
                    self.assign(&mut when.expr)?;
                    let child = self.assign(&mut when.result)?;
                    self.merge(&mut inputs, child)?;
                }
                let child = self.assign(&mut case.defresult)?;
                self.merge(&mut inputs, child)?;
                let (collation, out) = self.result(inputs, case.casetype, location);
                case.casecollid = collation;
                out
            }
            Expr::SubscriptingRef(sref) => {
                for index in sref.refupperindexpr.iter_mut().chain(sref.reflowerindexpr.iter_mut()).flatten() {
                    self.assign(index)?;
                }
                let mut inputs = self.assign(&mut sref.refexpr)?;
                if let Some(assign) = &mut sref.refassgnexpr {
                    let child = self.assign(assign)?;
                    self.merge(&mut inputs, child)?;
                }
                let (collation, out) = self.result(inputs, sref.refrestype, location);
                sref.refcollid = collation;
                out
            }
            Expr::Aggref(agg) => {
                let inputs = match agg.aggkind {
                    AggKind::Normal => {
                        let mut inputs = CollState::NONE;
                        for tle in &mut agg.args {
                            let child = self.assign(&mut tle.expr)?;
                            if !tle.resjunk {
                                self.merge(&mut inputs, child)?;
                            }
                        }
                        inputs
                    }
                    AggKind::OrderedSet => {
                        self.separately(agg.args.iter_mut().map(|tle| &mut tle.expr))?;
                        self.merge_all(agg.aggdirectargs.iter_mut())?
                    }
                    AggKind::Hypothetical => {
                        let mut direct = agg.aggdirectargs.iter_mut();
                        // Each hypothetical value pairs with its aggregated column.
                        let extra = direct.len().saturating_sub(agg.args.len());
                        for expr in direct.by_ref().take(extra) {
                            self.assign(expr)?;
                        }
                        for (d, tle) in direct.zip(agg.args.iter_mut()) {
                            self.merge_all([d, &mut tle.expr])?;
                        }
                        CollState::NONE
                    }
                };
                if let Some(filter) = &mut agg.aggfilter {
                    self.assign(filter)?;
                }
                agg.inputcollid = inputs.input_collation();
                let (collation, out) = self.result(inputs, agg.aggtype, location);
                agg.aggcollid = collation;
                out
            }
            Expr::WindowFunc(wf) => {
                let inputs = self.merge_all(wf.args.iter_mut())?;
                if let Some(filter) = &mut wf.aggfilter {
                    self.assign(filter)?;
                }
                wf.inputcollid = inputs.input_collation();
                let (collation, out) = self.result(inputs, wf.wintype, location);
                wf.wincollid = collation;
                out
            }
            Expr::GroupingFunc(gf) => {
                self.separately(gf.args.iter_mut())?;
                CollState::NONE
            }
            Expr::FuncExpr(f) => {
                let inputs = self.merge_all(f.args.iter_mut())?;
                f.inputcollid = inputs.input_collation();
                let (collation, out) = self.result(inputs, f.funcresulttype, location);
                f.funccollid = collation;
                out
            }
            Expr::OpExpr(op) | Expr::DistinctExpr(op) | Expr::NullIfExpr(op) => {
                let inputs = self.merge_all(op.args.iter_mut())?;
                op.inputcollid = inputs.input_collation();
                let (collation, out) = self.result(inputs, op.opresulttype, location);
                op.opcollid = collation;
                out
            }
            Expr::ScalarArrayOpExpr(op) => {
                let inputs = self.merge_all(op.args.iter_mut())?;
                op.inputcollid = inputs.input_collation();
                CollState::NONE
            }
            Expr::MinMaxExpr(mm) => {
                let inputs = self.merge_all(mm.args.iter_mut())?;
                mm.inputcollid = inputs.input_collation();
                let (collation, out) = self.result(inputs, mm.minmaxtype, location);
                mm.minmaxcollid = collation;
                out
            }
            Expr::CoalesceExpr(c) => {
                let inputs = self.merge_all(c.args.iter_mut())?;
                let (collation, out) = self.result(inputs, c.coalescetype, location);
                c.coalescecollid = collation;
                out
            }
            Expr::ArrayExpr(a) => {
                let inputs = self.merge_all(a.elements.iter_mut())?;
                let (collation, out) = self.result(inputs, a.array_typeid, location);
                a.array_collid = collation;
                out
            }
            Expr::RelabelType(r) => {
                let inputs = self.assign(&mut r.arg)?;
                let (collation, out) = self.result(inputs, r.resulttype, location);
                r.resultcollid = collation;
                out
            }
            Expr::CoerceViaIO(c) => {
                let inputs = self.assign(&mut c.arg)?;
                let (collation, out) = self.result(inputs, c.resulttype, location);
                c.resultcollid = collation;
                out
            }
            Expr::ArrayCoerceExpr(c) => {
                let inputs = self.assign(&mut c.arg)?;
                self.assign(&mut c.elemexpr)?;
                let (collation, out) = self.result(inputs, c.resulttype, location);
                c.resultcollid = collation;
                out
            }
            Expr::CoerceToDomain(c) => {
                let inputs = self.assign(&mut c.arg)?;
                let (collation, out) = self.result(inputs, c.resulttype, location);
                c.resultcollid = collation;
                out
            }
            Expr::BoolExpr(b) => {
                self.separately(b.args.iter_mut())?;
                CollState::NONE
            }
            Expr::NullTest(nt) => {
                self.assign(&mut nt.arg)?;
                CollState::NONE
            }
            Expr::BooleanTest(bt) => {
                self.assign(&mut bt.arg)?;
                CollState::NONE
            }
            Expr::JsonConstructorExpr(ctor) => {
                self.separately(ctor.args.iter_mut())?;
                if let Some(coercion) = &mut ctor.coercion {
                    self.assign(coercion)?;
                }
                let collation = self.catalog.type_collation(ctor.returning.typid);
                self.leaf(collation, location)
            }
            Expr::JsonIsPredicate(pred) => {
                self.assign(&mut pred.expr)?;
                CollState::NONE
            }
            Expr::JsonExpr(je) => {
                self.assign(&mut je.formatted_expr)?;
                self.assign(&mut je.path_spec)?;
                self.separately(je.passing_values.iter_mut())?;
                for behavior in je.on_empty.iter_mut().chain(std::iter::once(&mut je.on_error)) {
                    if let Some(expr) = &mut behavior.expr {
                        self.assign(expr)?;
                    }
                }
                je.collation = self.catalog.type_collation(je.returning.typid);
                self.leaf(je.collation, location)
            }
        };
        Ok(state)
    }

    fn target_entry(&self, tle: &mut TargetEntry) -> PgResult<()> {
        let state = self.assign(&mut tle.expr)?;
        if tle.ressortgroupref != 0 && state.strength == Strength::Conflict {
            return Err(implicit_conflict(self.catalog, state));
        }
        Ok(())
    }

    fn jointree_node(&self, node: &mut JoinTreeNode) -> PgResult<()> {
        if let JoinTreeNode::Join(join) = node {
            self.jointree_node(&mut join.larg)?;
            self.jointree_node(&mut join.rarg)?;
            if let Some(quals) = &mut join.quals {
                self.assign(quals)?;
            }
        }
        Ok(())
    }

    fn from_expr(&self, from: &mut FromExpr) -> PgResult<()> {
        for node in &mut from.fromlist {
            self.jointree_node(node)?;
        }
        if let Some(quals) = &mut from.quals {
            self.assign(quals)?;
        }
        Ok(())
    }
}

fn implicit_conflict(catalog: &Catalog, state: CollState) -> PgError {
    PgError::new(
        SqlState::CollationMismatch,
        format!(
            "collation mismatch between implicit collations \"{}\" and \"{}\"",
            catalog.collation_name(state.collation),
            catalog.collation_name(state.collation2)
        ),
    )
    .with_hint("You can choose the collation by applying the COLLATE clause to one or both expressions.")
    .at(state.location)
}

/// Assign collations throughout one expression.
pub fn assign_expr_collations(catalog: &Catalog, expr: &mut Expr) -> PgResult<()> {
    Assigner { catalog }.assign(expr).map(|_| ())
}

pub fn assign_list_collations(catalog: &Catalog, exprs: &mut [Expr]) -> PgResult<()> {
    let assigner = Assigner { catalog };
    exprs.iter_mut().try_for_each(|expr| assigner.assign(expr).map(|_| ()))
}

/// Assign collations in every clause of a finished query level. Range-table
/// expressions are handled when their FROM items are built, and
/// sub-queries when they are analyzed.
pub fn assign_query_collations(catalog: &Catalog, query: &mut Query) -> PgResult<()> {
    let assigner = Assigner { catalog };
    for tle in query.target_list.iter_mut().chain(query.returning_list.iter_mut()) {
        assigner.target_entry(tle)?;
    }
    assigner.from_expr(&mut query.jointree)?;
    for expr in [
        &mut query.having_qual,
        &mut query.limit_offset,
        &mut query.limit_count,
    ]
    .into_iter()
    .flatten()
    {
        assigner.assign(expr)?;
    }
    for wc in &mut query.window_clause {
        for expr in [&mut wc.start_offset, &mut wc.end_offset].into_iter().flatten() {
            assigner.assign(expr)?;
        }
    }
    Ok(())
}

/// Common collation of a column built from several expressions (set
/// operations, VALUES rows, CTE columns). `none_ok` tolerates an implicit
/// conflict by yielding no collation.
pub fn select_common_collation(catalog: &Catalog, exprs: &[&Expr], none_ok: bool) -> PgResult<Oid> {
    let assigner = Assigner { catalog };
    let mut state = CollState::NONE;
    for expr in exprs {
        let collation = expr_collation(expr);
        let child = match expr {
            Expr::CollateExpr(_) => CollState {
                collation,
                strength: Strength::Explicit,
                location: expr_location(expr),
                collation2: INVALID_OID,
            },
            _ => assigner.leaf(collation, expr_location(expr)),
        };
        assigner.merge(&mut state, child)?;
    }
    if state.strength == Strength::Conflict {
        if none_ok {
            return Ok(INVALID_OID);
        }
        return Err(implicit_conflict(catalog, state));
    }
    Ok(state.collation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{C_COLLATION_OID, INT4OID, TEXTOID};
    use crate::nodes::datum::Datum;
    use crate::nodes::makefuncs::{make_const, make_op_expr, make_var};
    use crate::nodes::primnodes::{CollateExpr, Location};
    use crate::parser::parse_oper::oper;

    fn collate(arg: Expr, coll_oid: Oid) -> Expr {
        Expr::CollateExpr(Box::new(CollateExpr {
            arg,
            coll_oid,
            location: Location(Some(10)),
        }))
    }

    fn text_eq(catalog: &Catalog, l: Expr, r: Expr) -> Expr {
        let op = oper(catalog, &["=".to_string()], TEXTOID, TEXTOID, None).unwrap();
        Expr::OpExpr(Box::new(make_op_expr(op.oid, op.code, op.result, vec![l, r], None)))
    }

    #[test]
    fn text_literal_takes_default_collation() {
        let catalog = Catalog::default();
        let mut expr = make_const(TEXTOID, Datum::text("a"));
        assign_expr_collations(&catalog, &mut expr).unwrap();
        assert_eq!(expr_collation(&expr), DEFAULT_COLLATION_OID);
        let mut int = make_const(INT4OID, Datum::Int4(1));
        assign_expr_collations(&catalog, &mut int).unwrap();
        assert_eq!(expr_collation(&int), INVALID_OID);
    }

    #[test]
    fn explicit_collation_beats_implicit() {
        let catalog = Catalog::default();
        let var = make_var(1, 1, TEXTOID, -1, DEFAULT_COLLATION_OID, 0);
        let mut expr = text_eq(&catalog, var, collate(make_const(TEXTOID, Datum::text("b")), C_COLLATION_OID));
        assign_expr_collations(&catalog, &mut expr).unwrap();
        let Expr::OpExpr(op) = &expr else { panic!("expected OpExpr") };
        assert_eq!(op.inputcollid, C_COLLATION_OID);
        assert_eq!(op.opcollid, INVALID_OID);
    }

    #[test]
    fn conflicting_explicit_collations_are_rejected() {
        let catalog = Catalog::default();
        let posix = catalog.collation_by_name("POSIX").unwrap();
        let mut expr = text_eq(
            &catalog,
            collate(make_const(TEXTOID, Datum::text("a")), C_COLLATION_OID),
            collate(make_const(TEXTOID, Datum::text("b")), posix),
        );
        let err = assign_expr_collations(&catalog, &mut expr).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::CollationMismatch);
        assert_eq!(err.message, "collation mismatch between explicit collations \"C\" and \"POSIX\"");
    }

    #[test]
    fn implicit_conflict_yields_no_common_collation() {
        let catalog = Catalog::default();
        let posix = catalog.collation_by_name("POSIX").unwrap();
        let a = make_var(1, 1, TEXTOID, -1, C_COLLATION_OID, 0);
        let b = make_var(1, 2, TEXTOID, -1, posix, 0);
        assert_eq!(select_common_collation(&catalog, &[&a, &b], true).unwrap(), INVALID_OID);
        let err = select_common_collation(&catalog, &[&a, &b], false).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::CollationMismatch);
        let d = make_var(1, 3, TEXTOID, -1, DEFAULT_COLLATION_OID, 0);
        assert_eq!(select_common_collation(&catalog, &[&d, &a], false).unwrap(), C_COLLATION_OID);
    }
}
