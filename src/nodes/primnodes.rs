//! Analyzed expression trees.
//!
//! [`Expr`] is a closed sum type; the analyzer produces it, the planner
//! rewrites it (SubLink → SubPlan, Var renumbering) and the evaluator
//! dispatches on its tag.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::{Query, SortGroupClause};
use crate::utils::fmgr::FmgrInfo;

/// Range-table index.
pub type Index = u32;

/// Special `varno` values used after set-references processing.
pub const INNER_VAR: Index = 65_000;
pub const OUTER_VAR: Index = 65_001;

/// Lazily resolved function-manager entry hung off FuncExpr/OpExpr nodes.
/// Equality ignores it and cloning starts from an empty cell.
#[derive(Default)]
pub struct FnCache(OnceLock<Arc<FmgrInfo>>);

impl FnCache {
    pub fn get(&self) -> Option<&Arc<FmgrInfo>> {
        self.0.get()
    }

    pub fn get_or_try_init<E>(
        &self,
        init: impl FnOnce() -> Result<Arc<FmgrInfo>, E>,
    ) -> Result<&Arc<FmgrInfo>, E> {
        if let Some(info) = self.0.get() {
            return Ok(info);
        }
        let info = init()?;
        Ok(self.0.get_or_init(|| info))
    }
}

impl Clone for FnCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for FnCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for FnCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() {
            "FnCache(ready)"
        } else {
            "FnCache"
        })
    }
}

/// Source offset of an analyzed node. Never takes part in node equality, so
/// two occurrences of the same expression compare equal.
#[derive(Clone, Copy, Default)]
pub struct Location(pub Option<usize>);

impl Location {
    pub fn get(self) -> Option<usize> {
        self.0
    }
}

impl From<Option<usize>> for Location {
    fn from(value: Option<usize>) -> Self {
        Self(value)
    }
}

impl PartialEq for Location {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(offset) => write!(f, "@{offset}"),
            None => f.write_str("@-"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionForm {
    ExplicitCall,
    ExplicitCast,
    ImplicitCast,
    SqlSyntax,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub varno: Index,
    /// Attribute number; 0 means the whole row.
    pub varattno: i16,
    pub vartype: Oid,
    pub vartypmod: i32,
    pub varcollid: Oid,
    pub varlevelsup: u32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Const {
    pub consttype: Oid,
    pub consttypmod: i32,
    pub constcollid: Oid,
    pub constvalue: Datum,
    pub location: Location,
}

impl Const {
    pub fn is_null(&self) -> bool {
        self.constvalue.is_null()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `$n` supplied by the caller.
    Extern,
    /// Internal parameter set by an outer plan node or an InitPlan.
    Exec,
    /// Placeholder for a sub-select output column inside a SubLink test.
    Sublink,
    /// Output column of a multiple-assignment sub-select; id is
    /// `(sub_link_id << 16) | column`.
    Multiexpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub paramkind: ParamKind,
    pub paramid: i32,
    pub paramtype: Oid,
    pub paramtypmod: i32,
    pub paramcollid: Oid,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncExpr {
    pub funcid: Oid,
    pub funcresulttype: Oid,
    pub funcretset: bool,
    pub funcvariadic: bool,
    pub funcformat: CoercionForm,
    pub funccollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    pub location: Location,
    pub cache: FnCache,
}

/// Also used, with a different tag, for `IS DISTINCT FROM` and `NULLIF`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpExpr {
    pub opno: Oid,
    pub opfuncid: Oid,
    pub opresulttype: Oid,
    pub opretset: bool,
    pub opcollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    pub location: Location,
    pub cache: FnCache,
}

/// `scalar op ANY/ALL (array)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarArrayOpExpr {
    pub opno: Oid,
    pub opfuncid: Oid,
    pub use_or: bool,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    pub location: Location,
    pub cache: FnCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolExprType {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoolExpr {
    pub boolop: BoolExprType,
    pub args: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullTestType {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NullTest {
    pub arg: Expr,
    pub nulltesttype: NullTestType,
    /// Apply the row-wise rule: a row is null only if every field is null.
    pub argisrow: bool,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolTestType {
    IsTrue,
    IsNotTrue,
    IsFalse,
    IsNotFalse,
    IsUnknown,
    IsNotUnknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanTest {
    pub arg: Expr,
    pub booltesttype: BoolTestType,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseWhen {
    pub expr: Expr,
    pub result: Expr,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpr {
    pub casetype: Oid,
    pub casecollid: Oid,
    pub arg: Option<Expr>,
    pub args: Vec<CaseWhen>,
    pub defresult: Expr,
    pub location: Location,
}

/// Placeholder for the value a CASE, FieldStore, SubscriptingRef assignment
/// or ArrayCoerceExpr element expression is working on.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseTestExpr {
    pub type_id: Oid,
    pub type_mod: i32,
    pub collation: Oid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowExpr {
    pub args: Vec<Expr>,
    pub row_typeid: Oid,
    pub row_format: CoercionForm,
    pub colnames: Vec<String>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCompareType {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowCompareExpr {
    pub rctype: RowCompareType,
    pub opnos: Vec<Oid>,
    pub opfamilies: Vec<Oid>,
    pub inputcollids: Vec<Oid>,
    pub largs: Vec<Expr>,
    pub rargs: Vec<Expr>,
    /// One comparison-support cache per column.
    pub caches: Vec<FnCache>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoalesceExpr {
    pub coalescetype: Oid,
    pub coalescecollid: Oid,
    pub args: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxOp {
    Greatest,
    Least,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxExpr {
    pub minmaxtype: Oid,
    pub minmaxcollid: Oid,
    pub inputcollid: Oid,
    pub op: MinMaxOp,
    pub args: Vec<Expr>,
    pub location: Location,
    /// Ordering-support cache for the common type.
    pub cache: FnCache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpr {
    pub array_typeid: Oid,
    pub array_collid: Oid,
    pub element_typeid: Oid,
    pub elements: Vec<Expr>,
    /// Elements are themselves arrays (`ARRAY[[1,2],[3,4]]`).
    pub multidims: bool,
    pub location: Location,
}

/// Array element/slice fetch or assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptingRef {
    pub refcontainertype: Oid,
    pub refelemtype: Oid,
    /// Type of the result: the element type for a fetch, the container type
    /// for a slice fetch or an assignment.
    pub refrestype: Oid,
    pub reftypmod: i32,
    pub refcollid: Oid,
    /// Upper bounds (or single subscripts); `None` for an omitted slice bound.
    pub refupperindexpr: Vec<Option<Expr>>,
    /// Lower bounds for a slice; empty when not a slice.
    pub reflowerindexpr: Vec<Option<Expr>>,
    pub refexpr: Expr,
    pub refassgnexpr: Option<Expr>,
}

impl SubscriptingRef {
    pub fn is_slice(&self) -> bool {
        !self.reflowerindexpr.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelect {
    pub arg: Expr,
    pub fieldnum: i16,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldStore {
    pub arg: Expr,
    pub newvals: Vec<Expr>,
    pub fieldnums: Vec<i16>,
    pub resulttype: Oid,
}

/// Binary-compatible relabeling; no runtime work.
#[derive(Debug, Clone, PartialEq)]
pub struct RelabelType {
    pub arg: Expr,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
    pub relabelformat: CoercionForm,
    pub location: Location,
}

/// Coercion through the source type's output and the target's input function.
#[derive(Debug, Clone, PartialEq)]
pub struct CoerceViaIO {
    pub arg: Expr,
    pub resulttype: Oid,
    pub resultcollid: Oid,
    pub coerceformat: CoercionForm,
    pub location: Location,
}

/// Per-element coercion of an array; `elemexpr` reads the element through a
/// CaseTestExpr.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayCoerceExpr {
    pub arg: Expr,
    pub elemexpr: Expr,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
    pub coerceformat: CoercionForm,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollateExpr {
    pub arg: Expr,
    pub coll_oid: Oid,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoerceToDomain {
    pub arg: Expr,
    pub resulttype: Oid,
    pub resulttypmod: i32,
    pub resultcollid: Oid,
    pub coercionformat: CoercionForm,
    pub location: Location,
}

/// The value being checked inside a domain CHECK expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CoerceToDomainValue {
    pub type_id: Oid,
    pub type_mod: i32,
    pub collation: Oid,
    pub location: Location,
}

/// `DEFAULT` in INSERT/UPDATE; replaced before planning.
#[derive(Debug, Clone, PartialEq)]
pub struct SetToDefault {
    pub type_id: Oid,
    pub type_mod: i32,
    pub collation: Oid,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlValueFunctionOp {
    CurrentDate,
    CurrentTimestamp,
    LocalTimestamp,
    CurrentRole,
    CurrentUser,
    User,
    SessionUser,
    CurrentCatalog,
    CurrentSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlValueFunction {
    pub op: SqlValueFunctionOp,
    pub type_id: Oid,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubLinkType {
    Exists,
    All,
    Any,
    RowCompare,
    Expr,
    MultiExpr,
    Array,
}

/// A sub-select appearing in an expression, before planning.
#[derive(Debug, Clone, PartialEq)]
pub struct SubLink {
    pub sub_link_type: SubLinkType,
    pub sub_link_id: i32,
    /// Combining expression over PARAM_SUBLINK params (ANY/ALL/ROWCOMPARE).
    pub testexpr: Option<Expr>,
    pub oper_name: Vec<String>,
    pub subselect: Box<Query>,
    /// Boolean for the predicate kinds, the column type for EXPR, the array
    /// type for ARRAY and `record` for MULTIEXPR.
    pub result_type: Oid,
    pub location: Location,
}

/// A planned sub-select. `plan_id` indexes the statement's sub-plan registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubPlan {
    pub sub_link_type: SubLinkType,
    /// Test expression with PARAM_EXEC params standing for sub-select outputs.
    pub testexpr: Option<Expr>,
    /// PARAM_EXEC ids the test expression reads the current sub-select row from.
    pub param_ids: Vec<i32>,
    pub plan_id: usize,
    pub plan_name: String,
    pub first_col_type: Oid,
    pub first_col_typmod: i32,
    pub first_col_collation: Oid,
    /// Type of the SubPlan's value as an expression.
    pub result_type: Oid,
    /// Params this InitPlan sets (empty for an ordinary SubPlan, except MULTIEXPR).
    pub set_param: Vec<i32>,
    /// Correlation params received from the outer query.
    pub par_param: Vec<i32>,
    /// Outer expressions evaluated into `par_param` before each execution.
    pub args: Vec<Expr>,
}

impl SubPlan {
    pub fn is_correlated(&self) -> bool {
        !self.par_param.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggSplit {
    Simple,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggref {
    pub aggfnoid: Oid,
    pub aggtype: Oid,
    pub aggcollid: Oid,
    pub inputcollid: Oid,
    /// Declared types of all arguments, direct ones first.
    pub aggargtypes: Vec<Oid>,
    pub aggdirectargs: Vec<Expr>,
    /// Aggregated arguments (plus ORDER BY / DISTINCT helper columns, resjunk).
    pub args: Vec<TargetEntry>,
    pub aggorder: Vec<SortGroupClause>,
    pub aggdistinct: Vec<SortGroupClause>,
    pub aggfilter: Option<Expr>,
    pub aggstar: bool,
    pub aggvariadic: bool,
    pub aggkind: crate::catalog::pg_proc::AggKind,
    pub agglevelsup: u32,
    /// Slot in the owning Agg node's value array; assigned by the planner.
    pub aggno: i32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingFunc {
    pub args: Vec<Expr>,
    /// `ressortgroupref` of each argument's grouping column.
    pub refs: Vec<u32>,
    pub agglevelsup: u32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowFunc {
    pub winfnoid: Oid,
    pub wintype: Oid,
    pub wincollid: Oid,
    pub inputcollid: Oid,
    pub args: Vec<Expr>,
    pub aggfilter: Option<Expr>,
    /// Index of the WindowClause this call uses (1-based `winref`).
    pub winref: u32,
    pub winstar: bool,
    /// A plain aggregate used as a window function.
    pub winagg: bool,
    /// Slot in the WindowAgg value array; assigned by the planner.
    pub wfuncno: i32,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFormatType {
    Default,
    Json,
    Jsonb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonEncoding {
    Default,
    Utf8,
    Utf16,
    Utf32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonFormat {
    pub format_type: JsonFormatType,
    pub encoding: JsonEncoding,
    pub location: Location,
}

impl JsonFormat {
    pub fn default_format() -> Self {
        Self {
            format_type: JsonFormatType::Default,
            encoding: JsonEncoding::Default,
            location: Location(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonReturning {
    pub format: JsonFormat,
    pub typid: Oid,
    pub typmod: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonConstructorType {
    Object,
    Array,
    /// `JSON_ARRAY(query)`; the single argument is an ARRAY sub-select.
    ArrayQuery,
    Parse,
    Scalar,
    Serialize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonConstructorExpr {
    pub ctor_type: JsonConstructorType,
    pub args: Vec<Expr>,
    /// Converts the json/jsonb result to the RETURNING type, reading the
    /// constructed value through a CaseTestExpr.
    pub coercion: Option<Expr>,
    pub returning: JsonReturning,
    pub absent_on_null: bool,
    pub unique: bool,
    pub location: Location,
}

impl JsonConstructorExpr {
    /// Type of the value the constructor builds before `coercion` runs.
    pub fn produced_type(&self) -> Oid {
        match self.ctor_type {
            JsonConstructorType::Serialize => crate::catalog::pg_type::TEXTOID,
            _ if self.returning.typid == crate::catalog::pg_type::JSONBOID => crate::catalog::pg_type::JSONBOID,
            _ => crate::catalog::pg_type::JSONOID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonValueType {
    Any,
    Object,
    Array,
    Scalar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonIsPredicate {
    pub expr: Expr,
    pub format: JsonFormat,
    pub item_type: JsonValueType,
    pub unique_keys: bool,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonExprOp {
    Exists,
    Query,
    Value,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonBehaviorType {
    Null,
    Error,
    Empty,
    True,
    False,
    Unknown,
    EmptyArray,
    EmptyObject,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonBehavior {
    pub btype: JsonBehaviorType,
    /// Value produced by the behavior, already coerced to the RETURNING type.
    pub expr: Option<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonWrapper {
    Unspec,
    None,
    Conditional,
    Unconditional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonExpr {
    pub op: JsonExprOp,
    pub column_name: Option<String>,
    /// Context item, coerced to jsonb.
    pub formatted_expr: Expr,
    pub format: JsonFormat,
    /// Path, coerced to jsonpath.
    pub path_spec: Expr,
    pub returning: JsonReturning,
    pub passing_names: Vec<String>,
    pub passing_values: Vec<Expr>,
    pub on_empty: Option<JsonBehavior>,
    pub on_error: JsonBehavior,
    /// Convert scalar results through the RETURNING type's input function.
    pub use_io_coercion: bool,
    /// Convert results with JSON-aware runtime coercion (json/jsonb targets).
    pub use_json_coercion: bool,
    pub wrapper: JsonWrapper,
    pub omit_quotes: bool,
    pub collation: Oid,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(Var),
    Const(Const),
    Param(Param),
    Aggref(Box<Aggref>),
    GroupingFunc(Box<GroupingFunc>),
    WindowFunc(Box<WindowFunc>),
    SubscriptingRef(Box<SubscriptingRef>),
    FuncExpr(Box<FuncExpr>),
    OpExpr(Box<OpExpr>),
    DistinctExpr(Box<OpExpr>),
    NullIfExpr(Box<OpExpr>),
    ScalarArrayOpExpr(Box<ScalarArrayOpExpr>),
    BoolExpr(Box<BoolExpr>),
    SubLink(Box<SubLink>),
    SubPlan(Box<SubPlan>),
    FieldSelect(Box<FieldSelect>),
    FieldStore(Box<FieldStore>),
    RelabelType(Box<RelabelType>),
    CoerceViaIO(Box<CoerceViaIO>),
    ArrayCoerceExpr(Box<ArrayCoerceExpr>),
    CollateExpr(Box<CollateExpr>),
    CaseExpr(Box<CaseExpr>),
    CaseTestExpr(CaseTestExpr),
    ArrayExpr(Box<ArrayExpr>),
    RowExpr(Box<RowExpr>),
    RowCompareExpr(Box<RowCompareExpr>),
    CoalesceExpr(Box<CoalesceExpr>),
    MinMaxExpr(Box<MinMaxExpr>),
    SqlValueFunction(SqlValueFunction),
    NullTest(Box<NullTest>),
    BooleanTest(Box<BooleanTest>),
    CoerceToDomain(Box<CoerceToDomain>),
    CoerceToDomainValue(CoerceToDomainValue),
    SetToDefault(SetToDefault),
    JsonConstructorExpr(Box<JsonConstructorExpr>),
    JsonIsPredicate(Box<JsonIsPredicate>),
    JsonExpr(Box<JsonExpr>),
}

/// One output column of a query or plan node.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    pub expr: Expr,
    /// 1-based position.
    pub resno: i16,
    pub resname: Option<String>,
    /// Nonzero when a sort/group clause refers to this entry.
    pub ressortgroupref: u32,
    pub resorigtbl: Oid,
    pub resorigcol: i16,
    /// Helper column, not part of the visible result.
    pub resjunk: bool,
}

impl TargetEntry {
    pub fn new(expr: Expr, resno: i16, resname: Option<String>, resjunk: bool) -> Self {
        Self {
            expr,
            resno,
            resname,
            ressortgroupref: 0,
            resorigtbl: INVALID_OID,
            resorigcol: 0,
            resjunk,
        }
    }
}
