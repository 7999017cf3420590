//! Constructors for commonly built nodes.

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::BOOLOID;
use crate::nodes::datum::Datum;
use crate::nodes::primnodes::{
    BoolExpr, BoolExprType, CoercionForm, Const, Expr, FnCache, FuncExpr, Index, Location,
    NullTest, NullTestType, OpExpr, Param, ParamKind, RelabelType, Var,
};

pub fn make_var(
    varno: Index,
    varattno: i16,
    vartype: Oid,
    vartypmod: i32,
    varcollid: Oid,
    varlevelsup: u32,
) -> Expr {
    Expr::Var(Var {
        varno,
        varattno,
        vartype,
        vartypmod,
        varcollid,
        varlevelsup,
        location: Location(None),
    })
}

pub fn make_const(consttype: Oid, value: Datum) -> Expr {
    Expr::Const(Const {
        consttype,
        consttypmod: -1,
        constcollid: INVALID_OID,
        constvalue: value,
        location: Location(None),
    })
}

pub fn make_typed_const(consttype: Oid, consttypmod: i32, constcollid: Oid, value: Datum) -> Expr {
    Expr::Const(Const {
        consttype,
        consttypmod,
        constcollid,
        constvalue: value,
        location: Location(None),
    })
}

pub fn make_null_const(consttype: Oid, consttypmod: i32, constcollid: Oid) -> Expr {
    make_typed_const(consttype, consttypmod, constcollid, Datum::Null)
}

pub fn make_bool_const(value: Option<bool>) -> Expr {
    make_const(BOOLOID, value.map_or(Datum::Null, Datum::Bool))
}

/// AND/OR of `args`, collapsing a single argument to itself.
pub fn make_bool_expr(boolop: BoolExprType, mut args: Vec<Expr>, location: Option<usize>) -> Expr {
    if boolop != BoolExprType::Not && args.len() == 1 {
        return args.remove(0);
    }
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop,
        args,
        location: location.into(),
    }))
}

pub fn make_not_expr(arg: Expr, location: Option<usize>) -> Expr {
    Expr::BoolExpr(Box::new(BoolExpr {
        boolop: BoolExprType::Not,
        args: vec![arg],
        location: location.into(),
    }))
}

pub fn make_null_test(arg: Expr, nulltesttype: NullTestType, location: Option<usize>) -> Expr {
    Expr::NullTest(Box::new(NullTest {
        arg,
        nulltesttype,
        argisrow: false,
        location: location.into(),
    }))
}

pub fn make_func_expr(
    funcid: Oid,
    rettype: Oid,
    args: Vec<Expr>,
    funccollid: Oid,
    inputcollid: Oid,
    funcformat: CoercionForm,
) -> FuncExpr {
    FuncExpr {
        funcid,
        funcresulttype: rettype,
        funcretset: false,
        funcvariadic: false,
        funcformat,
        funccollid,
        inputcollid,
        args,
        location: Location(None),
        cache: FnCache::default(),
    }
}

pub fn make_op_expr(
    opno: Oid,
    opfuncid: Oid,
    opresulttype: Oid,
    args: Vec<Expr>,
    location: Option<usize>,
) -> OpExpr {
    OpExpr {
        opno,
        opfuncid,
        opresulttype,
        opretset: false,
        opcollid: INVALID_OID,
        inputcollid: INVALID_OID,
        args,
        location: location.into(),
        cache: FnCache::default(),
    }
}

pub fn make_relabel_type(
    arg: Expr,
    resulttype: Oid,
    resulttypmod: i32,
    resultcollid: Oid,
    relabelformat: CoercionForm,
) -> Expr {
    Expr::RelabelType(Box::new(RelabelType {
        arg,
        resulttype,
        resulttypmod,
        resultcollid,
        relabelformat,
        location: Location(None),
    }))
}

pub fn make_param(paramkind: ParamKind, paramid: i32, paramtype: Oid, paramtypmod: i32, paramcollid: Oid) -> Expr {
    Expr::Param(Param {
        paramkind,
        paramid,
        paramtype,
        paramtypmod,
        paramcollid,
        location: Location(None),
    })
}

/// Conjunction list as a single expression (`None` for an empty list).
pub fn make_ands_explicit(mut quals: Vec<Expr>) -> Option<Expr> {
    match quals.len() {
        0 => None,
        1 => quals.pop(),
        _ => Some(make_bool_expr(BoolExprType::And, quals, None)),
    }
}

/// Flatten a qualification into its top-level AND arms.
pub fn make_ands_implicit(qual: Option<Expr>) -> Vec<Expr> {
    match qual {
        None => Vec::new(),
        Some(Expr::BoolExpr(b)) if b.boolop == BoolExprType::And => {
            b.args.into_iter().flat_map(|arg| make_ands_implicit(Some(arg))).collect()
        }
        Some(Expr::Const(c)) if c.constvalue == Datum::Bool(true) => Vec::new(),
        Some(other) => vec![other],
    }
}
