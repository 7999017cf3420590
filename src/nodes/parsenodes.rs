//! Raw parse trees produced by the grammar, and the analyzed [`Query`].

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::table::RelKind;
use crate::nodes::primnodes::{
    BoolExprType, BoolTestType, Expr, Index, JsonBehaviorType, JsonExprOp, JsonFormat,
    JsonValueType, JsonWrapper, MinMaxOp, NullTestType, SqlValueFunctionOp, SubLinkType,
    TargetEntry,
};

// ---------------------------------------------------------------------------
// Raw expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AConstValue {
    Integer(i64),
    /// Numeric literal kept as text until its type is known.
    Float(String),
    String(String),
    Bool(bool),
    Null,
}

/// One element of a dotted column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRefField {
    Name(String),
    Star,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Indirection {
    Field(String),
    Star,
    Subscript {
        lidx: Option<Box<RawExpr>>,
        uidx: Option<Box<RawExpr>>,
        is_slice: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AExprKind {
    Op,
    OpAny,
    OpAll,
    Distinct,
    NotDistinct,
    NullIf,
    In,
    Between,
    NotBetween,
    BetweenSym,
    NotBetweenSym,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    /// Possibly qualified name; `["int4"]`, `["pg_catalog", "text"]`.
    pub names: Vec<String>,
    pub typmods: Vec<i32>,
    /// One entry per `[]` suffix; `-1` for an unspecified bound.
    pub array_bounds: Vec<i32>,
    pub setof: bool,
    pub location: Option<usize>,
}

impl TypeName {
    pub fn simple(name: &str) -> Self {
        Self {
            names: vec![name.to_string()],
            typmods: Vec::new(),
            array_bounds: Vec::new(),
            setof: false,
            location: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortByDir {
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortByNulls {
    Default,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortBy {
    pub node: RawExpr,
    pub dir: SortByDir,
    pub nulls: SortByNulls,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    Range,
    Rows,
    Groups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBoundKind {
    UnboundedPreceding,
    OffsetPreceding,
    CurrentRow,
    OffsetFollowing,
    UnboundedFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub mode: FrameMode,
    pub start: FrameBoundKind,
    pub end: FrameBoundKind,
    /// Frame clause was written explicitly.
    pub explicit: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            mode: FrameMode::Range,
            start: FrameBoundKind::UnboundedPreceding,
            end: FrameBoundKind::CurrentRow,
            explicit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowDef {
    pub name: Option<String>,
    pub refname: Option<String>,
    pub partition_clause: Vec<RawExpr>,
    pub order_clause: Vec<SortBy>,
    pub frame_options: FrameOptions,
    pub start_offset: Option<Box<RawExpr>>,
    pub end_offset: Option<Box<RawExpr>>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    pub funcname: Vec<String>,
    pub args: Vec<RawExpr>,
    pub agg_order: Vec<SortBy>,
    pub agg_filter: Option<Box<RawExpr>>,
    pub over: Option<Box<WindowDef>>,
    pub agg_within_group: bool,
    pub agg_star: bool,
    pub agg_distinct: bool,
    pub func_variadic: bool,
    pub location: Option<usize>,
}

impl FuncCall {
    pub fn new(funcname: Vec<String>, args: Vec<RawExpr>, location: Option<usize>) -> Self {
        Self {
            funcname,
            args,
            agg_order: Vec::new(),
            agg_filter: None,
            over: None,
            agg_within_group: false,
            agg_star: false,
            agg_distinct: false,
            func_variadic: false,
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawCaseWhen {
    pub expr: RawExpr,
    pub result: RawExpr,
    pub location: Option<usize>,
}

/// Value argument of an SQL/JSON function with an optional `FORMAT` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonValueExpr {
    pub raw_expr: Box<RawExpr>,
    pub format: Option<JsonFormat>,
}

/// `RETURNING type [FORMAT JSON [ENCODING ...]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonOutput {
    pub type_name: TypeName,
    pub format: Option<JsonFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawJsonBehavior {
    pub btype: JsonBehaviorType,
    pub expr: Option<Box<RawExpr>>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonQuotes {
    Unspec,
    Keep,
    Omit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonKeyValue {
    pub key: RawExpr,
    pub value: JsonValueExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonArgument {
    pub name: String,
    pub value: JsonValueExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonFuncExpr {
    pub op: JsonExprOp,
    pub column_name: Option<String>,
    pub context_item: JsonValueExpr,
    pub pathspec: Box<RawExpr>,
    pub passing: Vec<JsonArgument>,
    pub output: Option<JsonOutput>,
    pub on_empty: Option<RawJsonBehavior>,
    pub on_error: Option<RawJsonBehavior>,
    pub wrapper: JsonWrapper,
    pub quotes: JsonQuotes,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawExpr {
    ColumnRef {
        fields: Vec<ColumnRefField>,
        location: Option<usize>,
    },
    ParamRef {
        number: i32,
        location: Option<usize>,
    },
    AConst {
        value: AConstValue,
        location: Option<usize>,
    },
    AExpr {
        kind: AExprKind,
        name: Vec<String>,
        lexpr: Option<Box<RawExpr>>,
        rexpr: Option<Box<RawExpr>>,
        location: Option<usize>,
    },
    BoolExpr {
        op: BoolExprType,
        args: Vec<RawExpr>,
        location: Option<usize>,
    },
    NullTest {
        arg: Box<RawExpr>,
        kind: NullTestType,
        location: Option<usize>,
    },
    BooleanTest {
        arg: Box<RawExpr>,
        kind: BoolTestType,
        location: Option<usize>,
    },
    TypeCast {
        arg: Box<RawExpr>,
        type_name: TypeName,
        location: Option<usize>,
    },
    CollateClause {
        arg: Box<RawExpr>,
        collname: Vec<String>,
        location: Option<usize>,
    },
    FuncCall(Box<FuncCall>),
    NamedArgExpr {
        arg: Box<RawExpr>,
        name: String,
        location: Option<usize>,
    },
    Indirection {
        arg: Box<RawExpr>,
        indirection: Vec<Indirection>,
    },
    ArrayExpr {
        elements: Vec<RawExpr>,
        location: Option<usize>,
    },
    RowExpr {
        args: Vec<RawExpr>,
        explicit_row: bool,
        location: Option<usize>,
    },
    SubLink {
        sub_link_type: SubLinkType,
        testexpr: Option<Box<RawExpr>>,
        oper_name: Vec<String>,
        subselect: Box<SelectStmt>,
        location: Option<usize>,
    },
    CaseExpr {
        arg: Option<Box<RawExpr>>,
        args: Vec<RawCaseWhen>,
        defresult: Option<Box<RawExpr>>,
        location: Option<usize>,
    },
    CoalesceExpr {
        args: Vec<RawExpr>,
        location: Option<usize>,
    },
    MinMaxExpr {
        op: MinMaxOp,
        args: Vec<RawExpr>,
        location: Option<usize>,
    },
    SqlValueFunction {
        op: SqlValueFunctionOp,
        location: Option<usize>,
    },
    SetToDefault {
        location: Option<usize>,
    },
    /// Column `colno` (1-based) of a multiple-assignment `(a, b) = source`.
    MultiAssignRef {
        source: Box<RawExpr>,
        colno: usize,
        ncolumns: usize,
    },
    GroupingFunc {
        args: Vec<RawExpr>,
        location: Option<usize>,
    },
    /// Right-hand list of `IN (...)` and the bounds pair of BETWEEN.
    List(Vec<RawExpr>),
    JsonObjectConstructor {
        exprs: Vec<JsonKeyValue>,
        output: Option<JsonOutput>,
        absent_on_null: bool,
        unique: bool,
        location: Option<usize>,
    },
    JsonArrayConstructor {
        exprs: Vec<JsonValueExpr>,
        output: Option<JsonOutput>,
        absent_on_null: bool,
        location: Option<usize>,
    },
    JsonArrayQueryConstructor {
        query: Box<SelectStmt>,
        output: Option<JsonOutput>,
        format: Option<JsonFormat>,
        absent_on_null: bool,
        location: Option<usize>,
    },
    JsonParseExpr {
        expr: JsonValueExpr,
        output: Option<JsonOutput>,
        unique_keys: bool,
        location: Option<usize>,
    },
    JsonScalarExpr {
        expr: Box<RawExpr>,
        output: Option<JsonOutput>,
        location: Option<usize>,
    },
    JsonSerializeExpr {
        expr: JsonValueExpr,
        output: Option<JsonOutput>,
        location: Option<usize>,
    },
    JsonIsPredicate {
        expr: Box<RawExpr>,
        format: JsonFormat,
        item_type: JsonValueType,
        unique_keys: bool,
        location: Option<usize>,
    },
    JsonFuncExpr(Box<JsonFuncExpr>),
}

impl RawExpr {
    pub fn location(&self) -> Option<usize> {
        match self {
            Self::ColumnRef { location, .. }
            | Self::ParamRef { location, .. }
            | Self::AConst { location, .. }
            | Self::AExpr { location, .. }
            | Self::BoolExpr { location, .. }
            | Self::NullTest { location, .. }
            | Self::BooleanTest { location, .. }
            | Self::TypeCast { location, .. }
            | Self::CollateClause { location, .. }
            | Self::NamedArgExpr { location, .. }
            | Self::ArrayExpr { location, .. }
            | Self::RowExpr { location, .. }
            | Self::SubLink { location, .. }
            | Self::CaseExpr { location, .. }
            | Self::CoalesceExpr { location, .. }
            | Self::MinMaxExpr { location, .. }
            | Self::SqlValueFunction { location, .. }
            | Self::SetToDefault { location }
            | Self::GroupingFunc { location, .. }
            | Self::JsonObjectConstructor { location, .. }
            | Self::JsonArrayConstructor { location, .. }
            | Self::JsonArrayQueryConstructor { location, .. }
            | Self::JsonParseExpr { location, .. }
            | Self::JsonScalarExpr { location, .. }
            | Self::JsonSerializeExpr { location, .. }
            | Self::JsonIsPredicate { location, .. } => *location,
            Self::FuncCall(call) => call.location,
            Self::JsonFuncExpr(func) => func.location,
            Self::Indirection { arg, .. } => arg.location(),
            Self::MultiAssignRef { source, .. } => source.location(),
            Self::List(items) => items.first().and_then(Self::location),
        }
    }

    pub fn is_null_const(&self) -> bool {
        matches!(
            self,
            Self::AConst {
                value: AConstValue::Null,
                ..
            }
        )
    }

    pub fn column_ref(names: &[&str]) -> Self {
        Self::ColumnRef {
            fields: names
                .iter()
                .map(|name| ColumnRefField::Name((*name).to_string()))
                .collect(),
            location: None,
        }
    }

    pub fn op(name: &str, lexpr: RawExpr, rexpr: RawExpr, location: Option<usize>) -> Self {
        Self::AExpr {
            kind: AExprKind::Op,
            name: vec![name.to_string()],
            lexpr: Some(Box::new(lexpr)),
            rexpr: Some(Box::new(rexpr)),
            location,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub aliasname: String,
    pub colnames: Vec<String>,
}

impl Alias {
    pub fn new(aliasname: impl Into<String>) -> Self {
        Self {
            aliasname: aliasname.into(),
            colnames: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeVar {
    pub schemaname: Option<String>,
    pub relname: String,
    pub alias: Option<Alias>,
    pub inh: bool,
    pub location: Option<usize>,
}

impl RangeVar {
    pub fn new(relname: impl Into<String>) -> Self {
        Self {
            schemaname: None,
            relname: relname.into(),
            alias: None,
            inh: true,
            location: None,
        }
    }

    pub fn qualified(schemaname: Option<String>, relname: impl Into<String>) -> Self {
        Self {
            schemaname,
            ..Self::new(relname)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Full,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonTableColumnKind {
    Ordinality,
    Regular,
    Formatted,
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonTableColumn {
    pub kind: JsonTableColumnKind,
    pub name: String,
    pub type_name: Option<TypeName>,
    pub pathspec: Option<String>,
    pub format: Option<JsonFormat>,
    pub wrapper: JsonWrapper,
    pub quotes: JsonQuotes,
    pub on_empty: Option<RawJsonBehavior>,
    pub on_error: Option<RawJsonBehavior>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeJsonTable {
    pub context_item: JsonValueExpr,
    pub pathspec: Box<RawExpr>,
    pub passing: Vec<JsonArgument>,
    pub columns: Vec<JsonTableColumn>,
    pub on_error: Option<RawJsonBehavior>,
    pub alias: Option<Alias>,
    pub lateral: bool,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    RangeVar(RangeVar),
    RangeSubselect {
        lateral: bool,
        subquery: Box<SelectStmt>,
        alias: Option<Alias>,
        location: Option<usize>,
    },
    RangeFunction {
        lateral: bool,
        ordinality: bool,
        function: Box<RawExpr>,
        alias: Option<Alias>,
        location: Option<usize>,
    },
    Join {
        jointype: JoinType,
        is_natural: bool,
        larg: Box<FromItem>,
        rarg: Box<FromItem>,
        using_clause: Vec<String>,
        join_using_alias: Option<Alias>,
        quals: Option<Box<RawExpr>>,
        alias: Option<Alias>,
        location: Option<usize>,
    },
    JsonTable(Box<RangeJsonTable>),
}

/// A target-list item: `val AS name` in SELECT, `name[.indirection] = val`
/// in UPDATE SET, a column in an INSERT column list.
#[derive(Debug, Clone, PartialEq)]
pub struct ResTarget {
    pub name: Option<String>,
    pub indirection: Vec<Indirection>,
    pub val: Option<RawExpr>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    None,
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub ctename: String,
    pub aliascolnames: Vec<String>,
    pub query: Box<SelectStmt>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub ctes: Vec<WithItem>,
    pub recursive: bool,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    /// `None`: no DISTINCT; `Some(vec![])`: plain DISTINCT; otherwise DISTINCT ON.
    pub distinct_clause: Option<Vec<RawExpr>>,
    pub target_list: Vec<ResTarget>,
    pub from_clause: Vec<FromItem>,
    pub where_clause: Option<RawExpr>,
    pub group_clause: Vec<RawExpr>,
    pub having_clause: Option<RawExpr>,
    pub window_clause: Vec<WindowDef>,
    /// Non-empty for a bare `VALUES (...), (...)`.
    pub values_lists: Vec<Vec<RawExpr>>,
    pub sort_clause: Vec<SortBy>,
    pub limit_offset: Option<RawExpr>,
    pub limit_count: Option<RawExpr>,
    pub with_clause: Option<WithClause>,
    pub op: SetOperation,
    pub all: bool,
    pub larg: Option<Box<SelectStmt>>,
    pub rarg: Option<Box<SelectStmt>>,
}

impl Default for SelectStmt {
    fn default() -> Self {
        Self {
            distinct_clause: None,
            target_list: Vec::new(),
            from_clause: Vec::new(),
            where_clause: None,
            group_clause: Vec::new(),
            having_clause: None,
            window_clause: Vec::new(),
            values_lists: Vec::new(),
            sort_clause: Vec::new(),
            limit_offset: None,
            limit_count: None,
            with_clause: None,
            op: SetOperation::None,
            all: false,
            larg: None,
            rarg: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub relation: RangeVar,
    pub cols: Vec<ResTarget>,
    /// `None` means `DEFAULT VALUES`.
    pub select_stmt: Option<Box<SelectStmt>>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub relation: RangeVar,
    pub target_list: Vec<ResTarget>,
    pub from_clause: Vec<FromItem>,
    pub where_clause: Option<RawExpr>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub relation: RangeVar,
    pub using_clause: Vec<FromItem>,
    pub where_clause: Option<RawExpr>,
    pub returning_list: Vec<ResTarget>,
    pub with_clause: Option<WithClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub colname: String,
    pub type_name: TypeName,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub raw_default: Option<RawExpr>,
    pub collation: Option<Vec<String>>,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    Unique { name: Option<String>, columns: Vec<String> },
    PrimaryKey { name: Option<String>, columns: Vec<String> },
    Check { name: Option<String>, expr: RawExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateStmt {
    pub relation: RangeVar,
    pub table_elts: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub temp: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    MatView,
    View,
    Index,
    Function,
    Type,
    Domain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntoClause {
    pub rel: RangeVar,
    pub col_names: Vec<String>,
    pub skip_data: bool,
    pub temp: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableAsStmt {
    pub query: Box<SelectStmt>,
    pub into: IntoClause,
    pub objtype: ObjectType,
    pub if_not_exists: bool,
    /// Source text of the defining query, kept for the catalog.
    pub query_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshMatViewStmt {
    pub concurrent: bool,
    pub skip_data: bool,
    pub relation: RangeVar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexElem {
    pub name: Option<String>,
    pub expr: Option<RawExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStmt {
    pub idxname: Option<String>,
    pub relation: RangeVar,
    pub params: Vec<IndexElem>,
    pub unique: bool,
    pub where_clause: Option<RawExpr>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionParameterMode {
    In,
    Variadic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: Option<String>,
    pub arg_type: TypeName,
    pub mode: FunctionParameterMode,
    pub defexpr: Option<RawExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    /// `AS $$ ... $$`; parsed on first execution.
    Text(String),
    /// `BEGIN ATOMIC ... END` or `RETURN expr`; analyzed at creation.
    Atomic(Vec<RawStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateFunctionStmt {
    pub replace: bool,
    pub funcname: Vec<String>,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: TypeName,
    pub returns_set: bool,
    pub language: String,
    pub body: FunctionBody,
    pub volatility: Option<crate::catalog::pg_proc::Volatility>,
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDomainStmt {
    pub domainname: Vec<String>,
    pub type_name: TypeName,
    pub not_null: bool,
    pub constraints: Vec<(Option<String>, RawExpr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeTypeStmt {
    pub typevar: RangeVar,
    pub coldeflist: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropStmt {
    pub remove_type: ObjectType,
    pub objects: Vec<Vec<String>>,
    pub missing_ok: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableCmd {
    AddColumn(ColumnDef),
    DropColumn { name: String, missing_ok: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableStmt {
    pub relation: RangeVar,
    pub cmds: Vec<AlterTableCmd>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSetStmt {
    pub name: String,
    /// `None` for `SET x TO DEFAULT` and `RESET x`.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStmtKind {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawStmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Create(CreateStmt),
    CreateTableAs(CreateTableAsStmt),
    RefreshMatView(RefreshMatViewStmt),
    Index(IndexStmt),
    CreateFunction(CreateFunctionStmt),
    CreateDomain(CreateDomainStmt),
    CompositeType(CompositeTypeStmt),
    Drop(DropStmt),
    AlterTable(AlterTableStmt),
    Analyze(Vec<RangeVar>),
    VariableSet(VariableSetStmt),
    VariableShow(String),
    Transaction(TransactionStmtKind),
    /// `RETURN expr` inside a function body.
    Return(RawExpr),
}

impl RawStmt {
    pub fn is_optimizable(&self) -> bool {
        matches!(
            self,
            Self::Select(_) | Self::Insert(_) | Self::Update(_) | Self::Delete(_) | Self::Return(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Analyzed queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

/// Privileges a range-table entry requires.
pub const ACL_SELECT: u32 = 1 << 1;
pub const ACL_INSERT: u32 = 1 << 0;
pub const ACL_UPDATE: u32 = 1 << 2;
pub const ACL_DELETE: u32 = 1 << 3;

/// Output-column metadata shared by function, VALUES, CTE and table-function RTEs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnTypes {
    pub coltypes: Vec<Oid>,
    pub coltypmods: Vec<i32>,
    pub colcollations: Vec<Oid>,
}

impl ColumnTypes {
    pub fn push(&mut self, typid: Oid, typmod: i32, collation: Oid) {
        self.coltypes.push(typid);
        self.coltypmods.push(typmod);
        self.colcollations.push(collation);
    }

    pub fn len(&self) -> usize {
        self.coltypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coltypes.is_empty()
    }
}

/// One output column of a JSON_TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonTableColumnSpec {
    pub kind: JsonTableColumnKind,
    /// Per-row expression over a CaseTestExpr standing for the row item; `None`
    /// for the ordinality column.
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableFunc {
    pub context_item: Expr,
    pub row_path: Expr,
    pub passing_names: Vec<String>,
    pub passing_values: Vec<Expr>,
    pub columns: Vec<JsonTableColumnSpec>,
    pub error_on_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RteKind {
    Relation {
        relid: Oid,
        relkind: RelKind,
    },
    Subquery {
        subquery: Box<Query>,
    },
    Join {
        jointype: JoinType,
        /// Output columns as Vars of the joined inputs (or COALESCE for merged
        /// USING columns of outer joins).
        joinaliasvars: Vec<Expr>,
        /// Number of merged USING columns at the front of the output.
        joinmergedcols: usize,
    },
    Function {
        function: Expr,
        ordinality: bool,
        columns: ColumnTypes,
        /// Function returns a composite that is expanded into columns.
        returns_composite: bool,
    },
    TableFunc {
        tablefunc: Box<TableFunc>,
        columns: ColumnTypes,
    },
    Values {
        values_lists: Vec<Vec<Expr>>,
        columns: ColumnTypes,
    },
    Cte {
        ctename: String,
        ctelevelsup: u32,
        columns: ColumnTypes,
    },
    Result,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeTblEntry {
    pub kind: RteKind,
    pub alias: Option<Alias>,
    /// Effective names: the reference name and every column name.
    pub eref: Alias,
    pub lateral: bool,
    pub inh: bool,
    pub in_from_cl: bool,
    pub required_perms: u32,
    /// Columns referenced, for privilege checks (1-based; 0 = whole row).
    pub selected_cols: Vec<i16>,
    pub modified_cols: Vec<i16>,
}

impl RangeTblEntry {
    pub fn new(kind: RteKind, alias: Option<Alias>, eref: Alias) -> Self {
        Self {
            kind,
            alias,
            eref,
            lateral: false,
            inh: false,
            in_from_cl: true,
            required_perms: 0,
            selected_cols: Vec::new(),
            modified_cols: Vec::new(),
        }
    }

    pub fn relid(&self) -> Oid {
        match &self.kind {
            RteKind::Relation { relid, .. } => *relid,
            _ => INVALID_OID,
        }
    }

    pub fn mark_selected(&mut self, attno: i16) {
        if !self.selected_cols.contains(&attno) {
            self.selected_cols.push(attno);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpr {
    pub jointype: JoinType,
    pub larg: JoinTreeNode,
    pub rarg: JoinTreeNode,
    pub quals: Option<Expr>,
    /// Range-table index of the join's own RTE.
    pub rtindex: Index,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinTreeNode {
    RangeTblRef(Index),
    Join(Box<JoinExpr>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FromExpr {
    pub fromlist: Vec<JoinTreeNode>,
    pub quals: Option<Expr>,
}

/// Sort/group specification referencing a target entry by `ressortgroupref`.
#[derive(Debug, Clone, PartialEq)]
pub struct SortGroupClause {
    pub tle_sort_group_ref: u32,
    pub eqop: Oid,
    /// Ordering operator; `INVALID_OID` when the type has no btree ordering.
    pub sortop: Oid,
    pub descending: bool,
    pub nulls_first: bool,
    pub hashable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowClause {
    pub name: Option<String>,
    pub refname: Option<String>,
    pub partition_clause: Vec<SortGroupClause>,
    pub order_clause: Vec<SortGroupClause>,
    pub frame_options: FrameOptions,
    pub start_offset: Option<Expr>,
    pub end_offset: Option<Expr>,
    pub winref: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommonTableExpr {
    pub ctename: String,
    pub aliascolnames: Vec<String>,
    pub query: Box<Query>,
    pub colnames: Vec<String>,
    pub columns: ColumnTypes,
    pub refcount: usize,
    pub location: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetOpTree {
    /// Leaf: a subquery RTE.
    Leaf(Index),
    Node(Box<SetOperationStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperationStmt {
    pub op: SetOperation,
    pub all: bool,
    pub larg: SetOpTree,
    pub rarg: SetOpTree,
    pub columns: ColumnTypes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub command_type: CmdType,
    pub utility_stmt: Option<Box<RawStmt>>,
    pub can_set_tag: bool,
    /// Target relation's range-table index for INSERT/UPDATE/DELETE; 0 otherwise.
    pub result_relation: Index,
    pub has_aggs: bool,
    pub has_window_funcs: bool,
    pub has_target_srfs: bool,
    pub has_sub_links: bool,
    pub has_distinct_on: bool,
    pub cte_list: Vec<CommonTableExpr>,
    pub rtable: Vec<RangeTblEntry>,
    pub jointree: FromExpr,
    pub target_list: Vec<TargetEntry>,
    pub returning_list: Vec<TargetEntry>,
    pub group_clause: Vec<SortGroupClause>,
    pub having_qual: Option<Expr>,
    pub window_clause: Vec<WindowClause>,
    pub distinct_clause: Vec<SortGroupClause>,
    pub sort_clause: Vec<SortGroupClause>,
    pub limit_offset: Option<Expr>,
    pub limit_count: Option<Expr>,
    pub set_operations: Option<Box<SetOperationStmt>>,
}

impl Query {
    pub fn new(command_type: CmdType) -> Self {
        Self {
            command_type,
            utility_stmt: None,
            can_set_tag: true,
            result_relation: 0,
            has_aggs: false,
            has_window_funcs: false,
            has_target_srfs: false,
            has_sub_links: false,
            has_distinct_on: false,
            cte_list: Vec::new(),
            rtable: Vec::new(),
            jointree: FromExpr::default(),
            target_list: Vec::new(),
            returning_list: Vec::new(),
            group_clause: Vec::new(),
            having_qual: None,
            window_clause: Vec::new(),
            distinct_clause: Vec::new(),
            sort_clause: Vec::new(),
            limit_offset: None,
            limit_count: None,
            set_operations: None,
        }
    }

    pub fn utility(stmt: RawStmt) -> Self {
        Self {
            utility_stmt: Some(Box::new(stmt)),
            ..Self::new(CmdType::Utility)
        }
    }

    /// Range-table entry by 1-based index.
    pub fn rte(&self, rtindex: Index) -> Option<&RangeTblEntry> {
        self.rtable.get((rtindex as usize).checked_sub(1)?)
    }

    /// Visible (non-junk) output columns.
    pub fn visible_targets(&self) -> impl Iterator<Item = &TargetEntry> {
        self.target_list.iter().filter(|tle| !tle.resjunk)
    }
}
