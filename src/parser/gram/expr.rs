//! Expressions, type names and the SQL/JSON clause family.

use crate::nodes::parsenodes::{
    AConstValue, AExprKind, ColumnRefField, FrameBoundKind, FrameMode, FrameOptions, FuncCall,
    Indirection, JsonArgument, JsonFuncExpr, JsonKeyValue, JsonOutput, JsonQuotes,
    JsonTableColumn, JsonTableColumnKind, JsonValueExpr, RangeJsonTable, RawCaseWhen, RawExpr,
    RawJsonBehavior, TypeName, WindowDef,
};
use crate::nodes::primnodes::{
    BoolExprType, BoolTestType, JsonBehaviorType, JsonEncoding, JsonExprOp, JsonFormat,
    JsonFormatType, JsonValueType, JsonWrapper, Location, MinMaxOp, NullTestType,
    SqlValueFunctionOp, SubLinkType,
};
use crate::parser::gram::Parser;
use crate::parser::scan::{Keyword, TokenKind};
use crate::utils::elog::{PgError, PgResult, SqlState, syntax_error};
use crate::utils::interrupt::StackDepthGuard;

pub(super) const BP_OR: u8 = 10;
pub(super) const BP_AND: u8 = 20;
pub(super) const BP_NOT: u8 = 30;
pub(super) const BP_IS: u8 = 40;
pub(super) const BP_CMP: u8 = 50;
pub(super) const BP_PRED: u8 = 60;
pub(super) const BP_OTHER: u8 = 70;
pub(super) const BP_ADD: u8 = 80;
pub(super) const BP_MUL: u8 = 90;
pub(super) const BP_EXP: u8 = 100;
pub(super) const BP_COLLATE: u8 = 110;
pub(super) const BP_UNARY: u8 = 115;
pub(super) const BP_POSTFIX: u8 = 130;

enum Infix {
    Or,
    And,
    Is,
    NullWord(NullTestType),
    Op(String),
    Predicate { negated: bool },
    Collate,
    Subscript,
    Field,
    Typecast,
}

fn append_indirection(lhs: RawExpr, el: Indirection) -> RawExpr {
    match lhs {
        RawExpr::Indirection {
            arg,
            mut indirection,
        } => {
            indirection.push(el);
            RawExpr::Indirection { arg, indirection }
        }
        other => RawExpr::Indirection {
            arg: Box::new(other),
            indirection: vec![el],
        },
    }
}

fn not_supported(message: &str, location: Option<usize>) -> PgError {
    PgError::new(SqlState::FeatureNotSupported, message).at(location)
}

fn negate(arg: RawExpr, location: Option<usize>) -> RawExpr {
    match arg {
        RawExpr::AConst {
            value: AConstValue::Integer(v),
            ..
        } => RawExpr::AConst {
            value: AConstValue::Integer(-v),
            location,
        },
        RawExpr::AConst {
            value: AConstValue::Float(text),
            ..
        } => {
            let text = match text.strip_prefix('-') {
                Some(rest) => rest.to_string(),
                None => format!("-{text}"),
            };
            RawExpr::AConst {
                value: AConstValue::Float(text),
                location,
            }
        }
        other => RawExpr::AExpr {
            kind: AExprKind::Op,
            name: vec!["-".to_string()],
            lexpr: None,
            rexpr: Some(Box::new(other)),
            location,
        },
    }
}

fn sql_type(name: &str) -> Vec<String> {
    vec!["pg_catalog".to_string(), name.to_string()]
}

impl Parser<'_> {
    pub(super) fn parse_expr(&mut self) -> PgResult<RawExpr> {
        self.parse_expr_bp(0)
    }

    pub(super) fn parse_expr_list(&mut self) -> PgResult<Vec<RawExpr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.consume_comma() {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn peek_infix(&self) -> Option<(Infix, u8)> {
        let infix = match self.current_kind() {
            TokenKind::Keyword(Keyword::Or) => (Infix::Or, BP_OR),
            TokenKind::Keyword(Keyword::And) => (Infix::And, BP_AND),
            TokenKind::Keyword(Keyword::Is) => (Infix::Is, BP_IS),
            TokenKind::Identifier(w) if w == "isnull" => {
                (Infix::NullWord(NullTestType::IsNull), BP_IS)
            }
            TokenKind::Identifier(w) if w == "notnull" => {
                (Infix::NullWord(NullTestType::IsNotNull), BP_IS)
            }
            kind @ (TokenKind::Less
            | TokenKind::Greater
            | TokenKind::Equal
            | TokenKind::LessEquals
            | TokenKind::GreaterEquals
            | TokenKind::NotEquals) => (Infix::Op(kind.operator_text()?.to_string()), BP_CMP),
            TokenKind::Keyword(Keyword::Not) => {
                let next = self.peek_nth_kind(1);
                let predicate = matches!(
                    next,
                    TokenKind::Keyword(Keyword::In | Keyword::Like | Keyword::ILike | Keyword::Similar)
                ) || matches!(next, TokenKind::Identifier(w) if w == "between");
                if !predicate {
                    return None;
                }
                (Infix::Predicate { negated: true }, BP_PRED)
            }
            TokenKind::Keyword(Keyword::In | Keyword::Like | Keyword::ILike | Keyword::Similar) => {
                (Infix::Predicate { negated: false }, BP_PRED)
            }
            TokenKind::Identifier(w) if w == "between" => {
                (Infix::Predicate { negated: false }, BP_PRED)
            }
            kind @ (TokenKind::Plus | TokenKind::Minus) => {
                (Infix::Op(kind.operator_text()?.to_string()), BP_ADD)
            }
            kind @ (TokenKind::Star | TokenKind::Slash | TokenKind::Percent) => {
                (Infix::Op(kind.operator_text()?.to_string()), BP_MUL)
            }
            TokenKind::Caret => (Infix::Op("^".to_string()), BP_EXP),
            TokenKind::Operator(op) => (Infix::Op(op.clone()), BP_OTHER),
            TokenKind::Keyword(Keyword::Collate) => (Infix::Collate, BP_COLLATE),
            TokenKind::LBracket => (Infix::Subscript, BP_POSTFIX),
            TokenKind::Dot => (Infix::Field, BP_POSTFIX),
            TokenKind::Typecast => (Infix::Typecast, BP_POSTFIX),
            _ => return None,
        };
        Some(infix)
    }

    pub(super) fn parse_expr_bp(&mut self, min_bp: u8) -> PgResult<RawExpr> {
        let _depth = StackDepthGuard::enter()?;
        let mut lhs = self.parse_prefix_expr()?;
        // one guard per level of left nesting; tree depth stays within max_expr_depth
        let mut nesting = Vec::new();

        while let Some((infix, l_bp)) = self.peek_infix() {
            if l_bp <= min_bp {
                break;
            }
            if !matches!(infix, Infix::Or | Infix::And | Infix::Subscript | Infix::Field) {
                nesting.push(StackDepthGuard::enter()?);
            }
            let location = self.location();
            lhs = match infix {
                Infix::Or | Infix::And => {
                    self.advance();
                    let rhs = self.parse_expr_bp(l_bp)?;
                    let boolop = if matches!(infix, Infix::Or) {
                        BoolExprType::Or
                    } else {
                        BoolExprType::And
                    };
                    // flatten chains of the same operator
                    match lhs {
                        RawExpr::BoolExpr {
                            op,
                            mut args,
                            location: first,
                        } if op == boolop => {
                            args.push(rhs);
                            RawExpr::BoolExpr {
                                op,
                                args,
                                location: first,
                            }
                        }
                        other => RawExpr::BoolExpr {
                            op: boolop,
                            args: vec![other, rhs],
                            location,
                        },
                    }
                }
                Infix::Is => self.parse_is_clause(lhs)?,
                Infix::NullWord(kind) => {
                    self.advance();
                    RawExpr::NullTest {
                        arg: Box::new(lhs),
                        kind,
                        location,
                    }
                }
                Infix::Op(name) => {
                    self.advance();
                    self.parse_op_rhs(lhs, name, l_bp, location)?
                }
                Infix::Predicate { negated } => {
                    if negated {
                        self.advance();
                    }
                    self.parse_predicate(lhs, negated, location)?
                }
                Infix::Collate => {
                    self.advance();
                    let collname = self.parse_any_name()?;
                    RawExpr::CollateClause {
                        arg: Box::new(lhs),
                        collname,
                        location,
                    }
                }
                Infix::Subscript => {
                    let el = self.parse_subscript()?;
                    append_indirection(lhs, el)
                }
                Infix::Field => {
                    self.advance();
                    let el = if self.consume_if(|k| matches!(k, TokenKind::Star)) {
                        Indirection::Star
                    } else {
                        Indirection::Field(self.parse_col_label()?)
                    };
                    append_indirection(lhs, el)
                }
                Infix::Typecast => {
                    self.advance();
                    let type_name = self.parse_type_name()?;
                    RawExpr::TypeCast {
                        arg: Box::new(lhs),
                        type_name,
                        location,
                    }
                }
            };
        }
        Ok(lhs)
    }

    /// Right operand of a binary operator, including `op ANY/ALL (...)`.
    fn parse_op_rhs(
        &mut self,
        lhs: RawExpr,
        name: String,
        l_bp: u8,
        location: Option<usize>,
    ) -> PgResult<RawExpr> {
        let quantifier = match self.current_kind() {
            TokenKind::Keyword(Keyword::Any | Keyword::Some) => Some(false),
            TokenKind::Keyword(Keyword::All) => Some(true),
            _ => None,
        };
        if let Some(is_all) = quantifier
            && matches!(self.peek_nth_kind(1), TokenKind::LParen)
        {
            self.advance();
            self.advance();
            if self.starts_select(0) {
                let subselect = self.parse_select_stmt()?;
                self.expect_rparen()?;
                return Ok(RawExpr::SubLink {
                    sub_link_type: if is_all {
                        SubLinkType::All
                    } else {
                        SubLinkType::Any
                    },
                    testexpr: Some(Box::new(lhs)),
                    oper_name: vec![name],
                    subselect: Box::new(subselect),
                    location,
                });
            }
            let array = self.parse_expr()?;
            self.expect_rparen()?;
            return Ok(RawExpr::AExpr {
                kind: if is_all {
                    AExprKind::OpAll
                } else {
                    AExprKind::OpAny
                },
                name: vec![name],
                lexpr: Some(Box::new(lhs)),
                rexpr: Some(Box::new(array)),
                location,
            });
        }
        let rhs = self.parse_expr_bp(l_bp)?;
        Ok(RawExpr::op(&name, lhs, rhs, location))
    }

    fn parse_predicate(
        &mut self,
        lhs: RawExpr,
        negated: bool,
        location: Option<usize>,
    ) -> PgResult<RawExpr> {
        if self.consume_keyword(Keyword::In) {
            self.expect_lparen()?;
            if self.starts_select(0) {
                let subselect = self.parse_select_stmt()?;
                self.expect_rparen()?;
                let sublink = RawExpr::SubLink {
                    sub_link_type: SubLinkType::Any,
                    testexpr: Some(Box::new(lhs)),
                    oper_name: vec!["=".to_string()],
                    subselect: Box::new(subselect),
                    location,
                };
                if negated {
                    return Ok(RawExpr::BoolExpr {
                        op: BoolExprType::Not,
                        args: vec![sublink],
                        location,
                    });
                }
                return Ok(sublink);
            }
            let list = self.parse_expr_list()?;
            self.expect_rparen()?;
            return Ok(RawExpr::AExpr {
                kind: AExprKind::In,
                name: vec![if negated { "<>" } else { "=" }.to_string()],
                lexpr: Some(Box::new(lhs)),
                rexpr: Some(Box::new(RawExpr::List(list))),
                location,
            });
        }
        if self.consume_word("between") {
            let symmetric = self.consume_keyword(Keyword::Symmetric);
            if !symmetric {
                self.consume_word("asymmetric");
            }
            let low = self.parse_expr_bp(BP_PRED)?;
            self.expect_keyword(Keyword::And)?;
            let high = self.parse_expr_bp(BP_PRED)?;
            let kind = match (negated, symmetric) {
                (false, false) => AExprKind::Between,
                (true, false) => AExprKind::NotBetween,
                (false, true) => AExprKind::BetweenSym,
                (true, true) => AExprKind::NotBetweenSym,
            };
            return Ok(RawExpr::AExpr {
                kind,
                name: vec!["between".to_string()],
                lexpr: Some(Box::new(lhs)),
                rexpr: Some(Box::new(RawExpr::List(vec![low, high]))),
                location,
            });
        }
        let name = if self.consume_keyword(Keyword::Like) {
            if negated { "!~~" } else { "~~" }
        } else if self.consume_keyword(Keyword::ILike) {
            if negated { "!~~*" } else { "~~*" }
        } else {
            return Err(not_supported("SIMILAR TO is not supported", location));
        };
        let expr = self.parse_op_rhs(lhs, name.to_string(), BP_PRED, location)?;
        if self.peek_word("escape") {
            return Err(not_supported("LIKE ... ESCAPE is not supported", self.location()));
        }
        Ok(expr)
    }

    fn parse_is_clause(&mut self, lhs: RawExpr) -> PgResult<RawExpr> {
        let location = self.location();
        self.expect_keyword(Keyword::Is)?;
        let not = self.consume_keyword(Keyword::Not);
        let arg = Box::new(lhs);
        let expr = match self.current_kind() {
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                RawExpr::NullTest {
                    arg,
                    kind: if not {
                        NullTestType::IsNotNull
                    } else {
                        NullTestType::IsNull
                    },
                    location,
                }
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                let kind = if not { BoolTestType::IsNotTrue } else { BoolTestType::IsTrue };
                RawExpr::BooleanTest { arg, kind, location }
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                let kind = if not { BoolTestType::IsNotFalse } else { BoolTestType::IsFalse };
                RawExpr::BooleanTest { arg, kind, location }
            }
            TokenKind::Identifier(w) if w == "unknown" => {
                self.advance();
                let kind = if not {
                    BoolTestType::IsNotUnknown
                } else {
                    BoolTestType::IsUnknown
                };
                RawExpr::BooleanTest { arg, kind, location }
            }
            TokenKind::Keyword(Keyword::Distinct) => {
                self.advance();
                self.expect_keyword(Keyword::From)?;
                let rhs = self.parse_expr_bp(BP_IS)?;
                RawExpr::AExpr {
                    kind: if not {
                        AExprKind::NotDistinct
                    } else {
                        AExprKind::Distinct
                    },
                    name: vec!["=".to_string()],
                    lexpr: Some(arg),
                    rexpr: Some(Box::new(rhs)),
                    location,
                }
            }
            TokenKind::Identifier(w) if w == "json" => {
                let pred = self.parse_json_is_predicate(*arg)?;
                if not {
                    RawExpr::BoolExpr {
                        op: BoolExprType::Not,
                        args: vec![pred],
                        location,
                    }
                } else {
                    pred
                }
            }
            _ => return Err(self.error_at_current("syntax error")),
        };
        Ok(expr)
    }

    fn parse_prefix_expr(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        match self.current_kind() {
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                let arg = self.parse_expr_bp(BP_NOT)?;
                Ok(RawExpr::BoolExpr {
                    op: BoolExprType::Not,
                    args: vec![arg],
                    location,
                })
            }
            TokenKind::Minus => {
                self.advance();
                let arg = self.parse_expr_bp(BP_UNARY)?;
                Ok(negate(arg, location))
            }
            TokenKind::Plus | TokenKind::Operator(_) => {
                let name = self
                    .current_kind()
                    .operator_text()
                    .unwrap_or_default()
                    .to_string();
                self.advance();
                let arg = self.parse_expr_bp(BP_UNARY)?;
                Ok(RawExpr::AExpr {
                    kind: AExprKind::Op,
                    name: vec![name],
                    lexpr: None,
                    rexpr: Some(Box::new(arg)),
                    location,
                })
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        let constant = |value| RawExpr::AConst { value, location };
        match self.current_kind().clone() {
            TokenKind::Integer(v) => {
                self.advance();
                Ok(constant(AConstValue::Integer(v)))
            }
            TokenKind::Float(text) => {
                self.advance();
                Ok(constant(AConstValue::Float(text)))
            }
            TokenKind::String(text) => {
                self.advance();
                Ok(constant(AConstValue::String(text)))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(constant(AConstValue::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(constant(AConstValue::Bool(false)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(constant(AConstValue::Null))
            }
            TokenKind::Parameter(number) => {
                self.advance();
                Ok(RawExpr::ParamRef { number, location })
            }
            TokenKind::Keyword(Keyword::Default) => {
                self.advance();
                Ok(RawExpr::SetToDefault { location })
            }
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::Keyword(Keyword::Case) => self.parse_case_expr(),
            TokenKind::Keyword(Keyword::Cast) => {
                self.advance();
                self.expect_lparen()?;
                let arg = self.parse_expr()?;
                self.expect_keyword(Keyword::As)?;
                let type_name = self.parse_type_name()?;
                self.expect_rparen()?;
                Ok(RawExpr::TypeCast {
                    arg: Box::new(arg),
                    type_name,
                    location,
                })
            }
            TokenKind::Keyword(Keyword::Array) => {
                self.advance();
                if matches!(self.current_kind(), TokenKind::LParen) {
                    self.advance();
                    let subselect = self.parse_select_stmt()?;
                    self.expect_rparen()?;
                    return Ok(RawExpr::SubLink {
                        sub_link_type: SubLinkType::Array,
                        testexpr: None,
                        oper_name: Vec::new(),
                        subselect: Box::new(subselect),
                        location,
                    });
                }
                self.parse_array_brackets(location)
            }
            TokenKind::Keyword(
                kw @ (Keyword::CurrentDate
                | Keyword::CurrentTimestamp
                | Keyword::LocalTimestamp
                | Keyword::CurrentRole
                | Keyword::CurrentUser
                | Keyword::User
                | Keyword::SessionUser
                | Keyword::CurrentCatalog
                | Keyword::CurrentSchema),
            ) => {
                self.advance();
                let op = match kw {
                    Keyword::CurrentDate => SqlValueFunctionOp::CurrentDate,
                    Keyword::CurrentTimestamp => SqlValueFunctionOp::CurrentTimestamp,
                    Keyword::LocalTimestamp => SqlValueFunctionOp::LocalTimestamp,
                    Keyword::CurrentRole => SqlValueFunctionOp::CurrentRole,
                    Keyword::CurrentUser => SqlValueFunctionOp::CurrentUser,
                    Keyword::User => SqlValueFunctionOp::User,
                    Keyword::SessionUser => SqlValueFunctionOp::SessionUser,
                    Keyword::CurrentCatalog => SqlValueFunctionOp::CurrentCatalog,
                    _ => SqlValueFunctionOp::CurrentSchema,
                };
                // current_schema() and current_timestamp(p): the precision is ignored
                if matches!(self.current_kind(), TokenKind::LParen) {
                    self.advance();
                    if matches!(self.current_kind(), TokenKind::Integer(_)) {
                        self.advance();
                    }
                    self.expect_rparen()?;
                }
                Ok(RawExpr::SqlValueFunction { op, location })
            }
            TokenKind::Keyword(kw)
                if kw.is_type_func_name() && matches!(self.peek_nth_kind(1), TokenKind::LParen) =>
            {
                self.advance();
                self.parse_func_application(vec![kw.text().to_string()], location)
            }
            TokenKind::Identifier(word) => self.parse_identifier_expr(word, location),
            TokenKind::QuotedIdentifier(_) => self.parse_columnref_or_func(location),
            _ => Err(self.error_at_current("syntax error")),
        }
    }

    fn parse_paren_expr(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        if self.starts_select(1) {
            let direct = !matches!(self.peek_nth_kind(1), TokenKind::LParen);
            let save = self.idx;
            self.advance();
            match self.parse_select_stmt() {
                Ok(subselect) if matches!(self.current_kind(), TokenKind::RParen) => {
                    self.advance();
                    return Ok(RawExpr::SubLink {
                        sub_link_type: SubLinkType::Expr,
                        testexpr: None,
                        oper_name: Vec::new(),
                        subselect: Box::new(subselect),
                        location,
                    });
                }
                Ok(_) if direct => return Err(self.error_at_current("syntax error")),
                Err(err) if direct => return Err(err),
                // `((select 1) + 1)`: a parenthesized expression after all
                _ => self.idx = save,
            }
        }
        self.advance();
        let first = self.parse_expr()?;
        if self.consume_comma() {
            let mut args = vec![first];
            args.extend(self.parse_expr_list()?);
            self.expect_rparen()?;
            return Ok(RawExpr::RowExpr {
                args,
                explicit_row: false,
                location,
            });
        }
        self.expect_rparen()?;
        Ok(first)
    }

    fn parse_case_expr(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        self.expect_keyword(Keyword::Case)?;
        let arg = if self.peek_keyword(Keyword::When) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let mut args = Vec::new();
        loop {
            let when_location = self.location();
            if !self.consume_keyword(Keyword::When) {
                break;
            }
            let expr = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let result = self.parse_expr()?;
            args.push(RawCaseWhen {
                expr,
                result,
                location: when_location,
            });
        }
        if args.is_empty() {
            return Err(self.error_at_current("syntax error"));
        }
        let defresult = if self.consume_keyword(Keyword::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword(Keyword::End)?;
        Ok(RawExpr::CaseExpr {
            arg,
            args,
            defresult,
            location,
        })
    }

    /// `[...]` after ARRAY; inner brackets are sub-arrays.
    fn parse_array_brackets(&mut self, location: Option<usize>) -> PgResult<RawExpr> {
        self.expect_token(|k| matches!(k, TokenKind::LBracket), "\"[\"")?;
        let mut elements = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RBracket) {
            loop {
                if matches!(self.current_kind(), TokenKind::LBracket) {
                    let inner = self.location();
                    elements.push(self.parse_array_brackets(inner)?);
                } else {
                    elements.push(self.parse_expr()?);
                }
                if !self.consume_comma() {
                    break;
                }
            }
        }
        self.expect_token(|k| matches!(k, TokenKind::RBracket), "\"]\"")?;
        Ok(RawExpr::ArrayExpr { elements, location })
    }

    fn parse_identifier_expr(&mut self, word: String, location: Option<usize>) -> PgResult<RawExpr> {
        if matches!(self.peek_nth_kind(1), TokenKind::LParen) {
            match word.as_str() {
                "exists" => {
                    self.advance();
                    self.expect_lparen()?;
                    let subselect = self.parse_select_stmt()?;
                    self.expect_rparen()?;
                    return Ok(RawExpr::SubLink {
                        sub_link_type: SubLinkType::Exists,
                        testexpr: None,
                        oper_name: Vec::new(),
                        subselect: Box::new(subselect),
                        location,
                    });
                }
                "row" => {
                    self.advance();
                    self.expect_lparen()?;
                    let args = if matches!(self.current_kind(), TokenKind::RParen) {
                        Vec::new()
                    } else {
                        self.parse_expr_list()?
                    };
                    self.expect_rparen()?;
                    return Ok(RawExpr::RowExpr {
                        args,
                        explicit_row: true,
                        location,
                    });
                }
                "coalesce" | "greatest" | "least" | "grouping" | "nullif" => {
                    self.advance();
                    self.expect_lparen()?;
                    let mut args = self.parse_expr_list()?;
                    self.expect_rparen()?;
                    return Ok(match word.as_str() {
                        "coalesce" => RawExpr::CoalesceExpr { args, location },
                        "greatest" => RawExpr::MinMaxExpr {
                            op: MinMaxOp::Greatest,
                            args,
                            location,
                        },
                        "least" => RawExpr::MinMaxExpr {
                            op: MinMaxOp::Least,
                            args,
                            location,
                        },
                        "grouping" => RawExpr::GroupingFunc { args, location },
                        _ => {
                            if args.len() != 2 {
                                return Err(syntax_error(
                                    "NULLIF requires exactly two arguments",
                                    location,
                                ));
                            }
                            let rexpr = args.pop().map(Box::new);
                            let lexpr = args.pop().map(Box::new);
                            RawExpr::AExpr {
                                kind: AExprKind::NullIf,
                                name: vec!["=".to_string()],
                                lexpr,
                                rexpr,
                                location,
                            }
                        }
                    });
                }
                "json_object" => return self.parse_json_object(),
                "json_array" => return self.parse_json_array(),
                "json" | "json_scalar" | "json_serialize" => {
                    return self.parse_json_value_function(&word);
                }
                "json_exists" => return self.parse_json_func_expr(JsonExprOp::Exists),
                "json_value" => return self.parse_json_func_expr(JsonExprOp::Value),
                "json_query" => return self.parse_json_func_expr(JsonExprOp::Query),
                "substring" | "trim" | "position" => {
                    if let Some(expr) = self.parse_special_string_func(&word, location)? {
                        return Ok(expr);
                    }
                }
                _ => {}
            }
        }

        if matches!(self.peek_nth_kind(1), TokenKind::String(_)) {
            self.advance();
            return self.finish_typed_literal(TypeName::simple(&word), location);
        }
        if matches!(
            word.as_str(),
            "double" | "character" | "char" | "varchar" | "national" | "timestamp" | "numeric"
                | "decimal" | "dec" | "float"
        ) {
            let save = self.idx;
            if let Ok(type_name) = self.parse_type_name()
                && matches!(self.current_kind(), TokenKind::String(_))
            {
                return self.finish_typed_literal(type_name, location);
            }
            self.idx = save;
        }
        self.parse_columnref_or_func(location)
    }

    fn finish_typed_literal(
        &mut self,
        mut type_name: TypeName,
        location: Option<usize>,
    ) -> PgResult<RawExpr> {
        let TokenKind::String(text) = self.current_kind().clone() else {
            return Err(self.error_at_current("syntax error"));
        };
        let literal_location = self.location();
        self.advance();
        type_name.location = location;
        Ok(RawExpr::TypeCast {
            arg: Box::new(RawExpr::AConst {
                value: AConstValue::String(text),
                location: literal_location,
            }),
            type_name,
            location,
        })
    }

    fn parse_columnref_or_func(&mut self, location: Option<usize>) -> PgResult<RawExpr> {
        let mut fields = vec![ColumnRefField::Name(self.parse_col_id()?)];
        while matches!(self.current_kind(), TokenKind::Dot) {
            if matches!(self.peek_nth_kind(1), TokenKind::Star) {
                self.advance();
                self.advance();
                fields.push(ColumnRefField::Star);
                break;
            }
            self.advance();
            fields.push(ColumnRefField::Name(self.parse_col_label()?));
        }
        let has_star = fields.last() == Some(&ColumnRefField::Star);
        if !has_star && matches!(self.current_kind(), TokenKind::LParen) {
            let funcname = fields
                .into_iter()
                .filter_map(|field| match field {
                    ColumnRefField::Name(name) => Some(name),
                    ColumnRefField::Star => None,
                })
                .collect();
            return self.parse_func_application(funcname, location);
        }
        Ok(RawExpr::ColumnRef { fields, location })
    }

    /// A function call where a FROM item is expected.
    pub(super) fn parse_func_expr_windowless(&mut self) -> PgResult<RawExpr> {
        let expr = self.parse_primary_expr()?;
        if let RawExpr::FuncCall(call) = &expr
            && call.over.is_some()
        {
            return Err(syntax_error(
                "window functions are not allowed in functions in FROM",
                call.location,
            ));
        }
        Ok(expr)
    }

    fn parse_func_arg(&mut self) -> PgResult<RawExpr> {
        let named = matches!(
            self.current_kind(),
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
        ) && matches!(
            self.peek_nth_kind(1),
            TokenKind::EqualsGreater | TokenKind::ColonEquals
        );
        if named {
            let location = self.location();
            let name = self.parse_col_id()?;
            self.advance();
            let arg = self.parse_expr()?;
            return Ok(RawExpr::NamedArgExpr {
                arg: Box::new(arg),
                name,
                location,
            });
        }
        self.parse_expr()
    }

    fn parse_func_application(
        &mut self,
        funcname: Vec<String>,
        location: Option<usize>,
    ) -> PgResult<RawExpr> {
        self.expect_lparen()?;
        let mut call = FuncCall::new(funcname, Vec::new(), location);
        if self.consume_if(|k| matches!(k, TokenKind::Star)) {
            call.agg_star = true;
            self.expect_rparen()?;
        } else if !self.consume_if(|k| matches!(k, TokenKind::RParen)) {
            if self.consume_keyword(Keyword::Distinct) {
                call.agg_distinct = true;
            } else {
                self.consume_keyword(Keyword::All);
            }
            loop {
                if self.consume_keyword(Keyword::Variadic) {
                    call.func_variadic = true;
                    call.args.push(self.parse_func_arg()?);
                    break;
                }
                call.args.push(self.parse_func_arg()?);
                if !self.consume_comma() {
                    break;
                }
            }
            if self.consume_keyword(Keyword::Order) {
                self.expect_word("by")?;
                call.agg_order = self.parse_sort_list()?;
            }
            self.expect_rparen()?;
        }

        if self.peek_word("within") && self.peek_nth_keyword(1, Keyword::Group) {
            let within_location = self.location();
            self.advance();
            self.advance();
            if !call.agg_order.is_empty() {
                return Err(syntax_error(
                    "cannot use multiple ORDER BY clauses with WITHIN GROUP",
                    within_location,
                ));
            }
            if call.agg_distinct {
                return Err(syntax_error(
                    "cannot use DISTINCT with WITHIN GROUP",
                    within_location,
                ));
            }
            if call.func_variadic {
                return Err(syntax_error(
                    "cannot use VARIADIC with WITHIN GROUP",
                    within_location,
                ));
            }
            self.expect_lparen()?;
            self.expect_keyword(Keyword::Order)?;
            self.expect_word("by")?;
            call.agg_order = self.parse_sort_list()?;
            self.expect_rparen()?;
            call.agg_within_group = true;
        }
        if self.peek_word("filter") && matches!(self.peek_nth_kind(1), TokenKind::LParen) {
            self.advance();
            self.advance();
            self.expect_keyword(Keyword::Where)?;
            call.agg_filter = Some(Box::new(self.parse_expr()?));
            self.expect_rparen()?;
        }
        if self.consume_word("over") {
            let def = if matches!(self.current_kind(), TokenKind::LParen) {
                self.parse_window_spec()?
            } else {
                let over_location = self.location();
                WindowDef {
                    name: Some(self.parse_col_id()?),
                    refname: None,
                    partition_clause: Vec::new(),
                    order_clause: Vec::new(),
                    frame_options: FrameOptions::default(),
                    start_offset: None,
                    end_offset: None,
                    location: over_location,
                }
            };
            call.over = Some(Box::new(def));
        }
        Ok(RawExpr::FuncCall(Box::new(call)))
    }

    /// `substring(s FROM a FOR b)`, `trim(LEADING x FROM s)`, `position(a IN b)`.
    /// Returns `None` for the plain call syntax.
    fn parse_special_string_func(
        &mut self,
        word: &str,
        location: Option<usize>,
    ) -> PgResult<Option<RawExpr>> {
        let save = self.idx;
        self.advance();
        self.expect_lparen()?;
        let call = |name: &str, args: Vec<RawExpr>| {
            Some(RawExpr::FuncCall(Box::new(FuncCall::new(
                vec!["pg_catalog".to_string(), name.to_string()],
                args,
                location,
            ))))
        };
        match word {
            "position" => {
                let needle = self.parse_expr_bp(BP_PRED)?;
                if !self.consume_keyword(Keyword::In) {
                    self.idx = save;
                    return Ok(None);
                }
                let haystack = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(call("strpos", vec![haystack, needle]))
            }
            "substring" => {
                let string = self.parse_expr()?;
                let from = self.consume_keyword(Keyword::From);
                let start = if from { Some(self.parse_expr()?) } else { None };
                let count = if self.consume_keyword(Keyword::For) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                if start.is_none() && count.is_none() {
                    self.idx = save;
                    return Ok(None);
                }
                self.expect_rparen()?;
                let start = start.unwrap_or(RawExpr::AConst {
                    value: AConstValue::Integer(1),
                    location,
                });
                let mut args = vec![string, start];
                args.extend(count);
                Ok(call("substring", args))
            }
            _ => {
                let name = if self.consume_word("leading") {
                    "ltrim"
                } else if self.consume_word("trailing") {
                    "rtrim"
                } else {
                    self.consume_word("both");
                    "btrim"
                };
                if self.consume_keyword(Keyword::From) {
                    let string = self.parse_expr()?;
                    self.expect_rparen()?;
                    return Ok(call(name, vec![string]));
                }
                let first = self.parse_expr()?;
                if self.consume_keyword(Keyword::From) {
                    let string = self.parse_expr()?;
                    self.expect_rparen()?;
                    return Ok(call(name, vec![string, first]));
                }
                let mut args = vec![first];
                while self.consume_comma() {
                    args.push(self.parse_expr()?);
                }
                self.expect_rparen()?;
                Ok(call(name, args))
            }
        }
    }

    pub(super) fn parse_opt_indirection(&mut self) -> PgResult<Vec<Indirection>> {
        let mut indirection = Vec::new();
        loop {
            match self.current_kind() {
                TokenKind::LBracket => indirection.push(self.parse_subscript()?),
                TokenKind::Dot => {
                    self.advance();
                    indirection.push(Indirection::Field(self.parse_col_label()?));
                }
                _ => return Ok(indirection),
            }
        }
    }

    fn parse_subscript(&mut self) -> PgResult<Indirection> {
        self.expect_token(|k| matches!(k, TokenKind::LBracket), "\"[\"")?;
        let lower = if matches!(self.current_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if self.consume_if(|k| matches!(k, TokenKind::Colon)) {
            let upper = if matches!(self.current_kind(), TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect_token(|k| matches!(k, TokenKind::RBracket), "\"]\"")?;
            return Ok(Indirection::Subscript {
                lidx: lower,
                uidx: upper,
                is_slice: true,
            });
        }
        if lower.is_none() {
            return Err(self.error_at_current("syntax error"));
        }
        self.expect_token(|k| matches!(k, TokenKind::RBracket), "\"]\"")?;
        Ok(Indirection::Subscript {
            lidx: None,
            uidx: lower,
            is_slice: false,
        })
    }

    // -----------------------------------------------------------------------
    // window frames
    // -----------------------------------------------------------------------

    pub(super) fn parse_frame_clause(&mut self, def: &mut WindowDef) -> PgResult<()> {
        let location = self.location();
        let mode = if self.consume_word("rows") {
            FrameMode::Rows
        } else if self.consume_word("range") {
            FrameMode::Range
        } else {
            self.expect_word("groups")?;
            FrameMode::Groups
        };
        let (start, start_offset, end, end_offset) = if self.consume_word("between") {
            let (start, start_offset) = self.parse_frame_bound()?;
            self.expect_keyword(Keyword::And)?;
            let (end, end_offset) = self.parse_frame_bound()?;
            (start, start_offset, end, end_offset)
        } else {
            let (start, start_offset) = self.parse_frame_bound()?;
            (start, start_offset, FrameBoundKind::CurrentRow, None)
        };

        let windowing_error = |message: &str| {
            PgError::new(SqlState::WindowingError, message).at(location)
        };
        if start == FrameBoundKind::UnboundedFollowing {
            return Err(windowing_error("frame start cannot be UNBOUNDED FOLLOWING"));
        }
        if end == FrameBoundKind::UnboundedPreceding {
            return Err(windowing_error("frame end cannot be UNBOUNDED PRECEDING"));
        }
        if start == FrameBoundKind::CurrentRow && end == FrameBoundKind::OffsetPreceding {
            return Err(windowing_error(
                "frame starting from current row cannot have preceding rows",
            ));
        }
        if start == FrameBoundKind::OffsetFollowing
            && matches!(end, FrameBoundKind::OffsetPreceding | FrameBoundKind::CurrentRow)
        {
            return Err(windowing_error(
                "frame starting from following row cannot have preceding rows",
            ));
        }
        if self.peek_word("exclude") {
            return Err(not_supported("frame EXCLUDE clauses are not supported", self.location()));
        }
        def.frame_options = FrameOptions {
            mode,
            start,
            end,
            explicit: true,
        };
        def.start_offset = start_offset.map(Box::new);
        def.end_offset = end_offset.map(Box::new);
        Ok(())
    }

    fn parse_frame_bound(&mut self) -> PgResult<(FrameBoundKind, Option<RawExpr>)> {
        if self.consume_word("unbounded") {
            if self.consume_word("preceding") {
                return Ok((FrameBoundKind::UnboundedPreceding, None));
            }
            self.expect_word("following")?;
            return Ok((FrameBoundKind::UnboundedFollowing, None));
        }
        if self.peek_word("current") && self.peek_nth_word(1, "row") {
            self.advance();
            self.advance();
            return Ok((FrameBoundKind::CurrentRow, None));
        }
        let offset = self.parse_expr()?;
        if self.consume_word("preceding") {
            return Ok((FrameBoundKind::OffsetPreceding, Some(offset)));
        }
        self.expect_word("following")?;
        Ok((FrameBoundKind::OffsetFollowing, Some(offset)))
    }

    // -----------------------------------------------------------------------
    // type names
    // -----------------------------------------------------------------------

    pub(super) fn parse_type_name(&mut self) -> PgResult<TypeName> {
        let location = self.location();
        let setof = self.consume_word("setof");
        let (names, typmods) = self.parse_type_base()?;
        let mut array_bounds = Vec::new();
        loop {
            if self.consume_if(|k| matches!(k, TokenKind::LBracket)) {
                let bound = match self.current_kind() {
                    TokenKind::Integer(v) => {
                        let v = i32::try_from(*v).unwrap_or(-1);
                        self.advance();
                        v
                    }
                    _ => -1,
                };
                self.expect_token(|k| matches!(k, TokenKind::RBracket), "\"]\"")?;
                array_bounds.push(bound);
            } else if self.peek_keyword(Keyword::Array) {
                self.advance();
                array_bounds.push(-1);
                if self.consume_if(|k| matches!(k, TokenKind::LBracket)) {
                    if let TokenKind::Integer(v) = self.current_kind() {
                        if let Some(last) = array_bounds.last_mut() {
                            *last = i32::try_from(*v).unwrap_or(-1);
                        }
                        self.advance();
                    }
                    self.expect_token(|k| matches!(k, TokenKind::RBracket), "\"]\"")?;
                }
                break;
            } else {
                break;
            }
        }
        Ok(TypeName {
            names,
            typmods,
            array_bounds,
            setof,
            location,
        })
    }

    fn parse_opt_typmods(&mut self) -> PgResult<Vec<i32>> {
        if !matches!(self.current_kind(), TokenKind::LParen) {
            return Ok(Vec::new());
        }
        self.advance();
        let mut typmods = Vec::new();
        loop {
            let negative = self.consume_if(|k| matches!(k, TokenKind::Minus));
            match self.current_kind() {
                TokenKind::Integer(v) => {
                    let v = i32::try_from(*v).map_err(|_| {
                        syntax_error("type modifier is out of range", self.location())
                    })?;
                    typmods.push(if negative { -v } else { v });
                    self.advance();
                }
                _ => {
                    return Err(PgError::new(
                        SqlState::SyntaxError,
                        "type modifiers must be simple constants or identifiers",
                    )
                    .at(self.location()));
                }
            }
            if !self.consume_comma() {
                break;
            }
        }
        self.expect_rparen()?;
        Ok(typmods)
    }

    fn parse_type_base(&mut self) -> PgResult<(Vec<String>, Vec<i32>)> {
        let word = match self.current_kind() {
            TokenKind::Identifier(word) => word.clone(),
            TokenKind::QuotedIdentifier(_) => String::new(),
            _ => return Err(self.error_at_current("syntax error")),
        };
        let simple = |name: &str| -> PgResult<(Vec<String>, Vec<i32>)> { Ok((sql_type(name), Vec::new())) };
        match word.as_str() {
            "double" if self.peek_nth_word(1, "precision") => {
                self.advance();
                self.advance();
                simple("float8")
            }
            "national" | "character" | "char" | "nchar" => {
                self.advance();
                if word == "national" && !self.consume_word("character") {
                    self.expect_word("char")?;
                }
                let varying = self.consume_word("varying");
                let mut typmods = self.parse_opt_typmods()?;
                if varying {
                    return Ok((sql_type("varchar"), typmods));
                }
                if typmods.is_empty() {
                    typmods.push(1);
                }
                Ok((sql_type("bpchar"), typmods))
            }
            "varchar" => {
                self.advance();
                Ok((sql_type("varchar"), self.parse_opt_typmods()?))
            }
            "timestamp" => {
                self.advance();
                let typmods = self.parse_opt_typmods()?;
                let with_tz = if self.peek_keyword(Keyword::With) && self.peek_nth_word(1, "time") {
                    self.advance();
                    self.advance();
                    self.expect_word("zone")?;
                    true
                } else {
                    if self.consume_word("without") {
                        self.expect_word("time")?;
                        self.expect_word("zone")?;
                    }
                    false
                };
                Ok((sql_type(if with_tz { "timestamptz" } else { "timestamp" }), typmods))
            }
            "int" | "integer" => {
                self.advance();
                simple("int4")
            }
            "smallint" => {
                self.advance();
                simple("int2")
            }
            "bigint" => {
                self.advance();
                simple("int8")
            }
            "real" => {
                self.advance();
                simple("float4")
            }
            "boolean" => {
                self.advance();
                simple("bool")
            }
            "float" => {
                let location = self.location();
                self.advance();
                let precision = self.parse_opt_typmods()?;
                match precision.as_slice() {
                    [] => simple("float8"),
                    [p] if *p < 1 => Err(PgError::new(
                        SqlState::InvalidParameterValue,
                        "precision for type float must be at least 1 bit",
                    )
                    .at(location)),
                    [p] if *p <= 24 => simple("float4"),
                    [p] if *p <= 53 => simple("float8"),
                    _ => Err(PgError::new(
                        SqlState::InvalidParameterValue,
                        "precision for type float must be less than 54 bits",
                    )
                    .at(location)),
                }
            }
            "decimal" | "dec" | "numeric" => {
                self.advance();
                Ok((sql_type("numeric"), self.parse_opt_typmods()?))
            }
            _ => {
                let names = self.parse_any_name()?;
                let typmods = self.parse_opt_typmods()?;
                Ok((names, typmods))
            }
        }
    }

    // -----------------------------------------------------------------------
    // SQL/JSON
    // -----------------------------------------------------------------------

    fn parse_json_format_opt(&mut self) -> PgResult<Option<JsonFormat>> {
        if !(self.peek_word("format") && self.peek_nth_word(1, "json")) {
            return Ok(None);
        }
        let location = self.location();
        self.advance();
        self.advance();
        let encoding = if self.consume_word("encoding") {
            let encoding_location = self.location();
            let name = self.parse_col_id()?;
            match name.as_str() {
                "utf8" => JsonEncoding::Utf8,
                "utf16" => JsonEncoding::Utf16,
                "utf32" => JsonEncoding::Utf32,
                other => {
                    return Err(PgError::new(
                        SqlState::InvalidParameterValue,
                        format!("unrecognized JSON encoding: {other}"),
                    )
                    .at(encoding_location));
                }
            }
        } else {
            JsonEncoding::Default
        };
        Ok(Some(JsonFormat {
            format_type: JsonFormatType::Json,
            encoding,
            location: Location(location),
        }))
    }

    fn parse_json_value_expr(&mut self) -> PgResult<JsonValueExpr> {
        let raw_expr = self.parse_expr()?;
        let format = self.parse_json_format_opt()?;
        Ok(JsonValueExpr {
            raw_expr: Box::new(raw_expr),
            format,
        })
    }

    fn parse_json_returning_opt(&mut self) -> PgResult<Option<JsonOutput>> {
        if !self.consume_keyword(Keyword::Returning) {
            return Ok(None);
        }
        let type_name = self.parse_type_name()?;
        let format = self.parse_json_format_opt()?;
        Ok(Some(JsonOutput { type_name, format }))
    }

    /// `NULL ON NULL` / `ABSENT ON NULL`.
    fn parse_json_on_null_opt(&mut self, default: bool) -> PgResult<bool> {
        let absent = if self.peek_keyword(Keyword::Null) && self.peek_nth_keyword(1, Keyword::On) {
            false
        } else if self.peek_word("absent") {
            true
        } else {
            return Ok(default);
        };
        self.advance();
        self.expect_keyword(Keyword::On)?;
        self.expect_keyword(Keyword::Null)?;
        Ok(absent)
    }

    /// `WITH UNIQUE [KEYS]` / `WITHOUT UNIQUE [KEYS]`.
    fn parse_json_unique_opt(&mut self) -> PgResult<bool> {
        let unique = if self.peek_keyword(Keyword::With) && self.peek_nth_keyword(1, Keyword::Unique)
        {
            true
        } else if self.peek_word("without") && self.peek_nth_keyword(1, Keyword::Unique) {
            false
        } else {
            return Ok(false);
        };
        self.advance();
        self.advance();
        self.consume_word("keys");
        Ok(unique)
    }

    fn at_json_constructor_tail(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::RParen | TokenKind::Keyword(Keyword::Returning)
        ) || (self.peek_keyword(Keyword::Null) && self.peek_nth_keyword(1, Keyword::On))
            || (self.peek_word("absent") && self.peek_nth_keyword(1, Keyword::On))
            || ((self.peek_keyword(Keyword::With) || self.peek_word("without"))
                && self.peek_nth_keyword(1, Keyword::Unique))
    }

    fn parse_json_object(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        self.advance();
        self.expect_lparen()?;
        let mut exprs = Vec::new();
        while !self.at_json_constructor_tail() {
            let key = self.parse_expr()?;
            if !self.consume_word("value") {
                self.expect_token(|k| matches!(k, TokenKind::Colon), "VALUE or \":\"")?;
            }
            let value = self.parse_json_value_expr()?;
            exprs.push(JsonKeyValue { key, value });
            if !self.consume_comma() {
                break;
            }
        }
        let absent_on_null = self.parse_json_on_null_opt(false)?;
        let unique = self.parse_json_unique_opt()?;
        let output = self.parse_json_returning_opt()?;
        self.expect_rparen()?;
        Ok(RawExpr::JsonObjectConstructor {
            exprs,
            output,
            absent_on_null,
            unique,
            location,
        })
    }

    fn parse_json_array(&mut self) -> PgResult<RawExpr> {
        let location = self.location();
        self.advance();
        self.expect_lparen()?;
        if self.starts_select(0) {
            let query = self.parse_select_stmt()?;
            let format = self.parse_json_format_opt()?;
            let output = self.parse_json_returning_opt()?;
            self.expect_rparen()?;
            return Ok(RawExpr::JsonArrayQueryConstructor {
                query: Box::new(query),
                output,
                format,
                absent_on_null: true,
                location,
            });
        }
        let mut exprs = Vec::new();
        while !self.at_json_constructor_tail() {
            exprs.push(self.parse_json_value_expr()?);
            if !self.consume_comma() {
                break;
            }
        }
        let absent_on_null = self.parse_json_on_null_opt(true)?;
        let output = self.parse_json_returning_opt()?;
        self.expect_rparen()?;
        Ok(RawExpr::JsonArrayConstructor {
            exprs,
            output,
            absent_on_null,
            location,
        })
    }

    /// `JSON(...)`, `JSON_SCALAR(...)` and `JSON_SERIALIZE(...)`.
    fn parse_json_value_function(&mut self, word: &str) -> PgResult<RawExpr> {
        let location = self.location();
        self.advance();
        self.expect_lparen()?;
        let expr = match word {
            "json" => {
                let expr = self.parse_json_value_expr()?;
                let unique_keys = self.parse_json_unique_opt()?;
                let output = self.parse_json_returning_opt()?;
                RawExpr::JsonParseExpr {
                    expr,
                    output,
                    unique_keys,
                    location,
                }
            }
            "json_scalar" => {
                let expr = self.parse_expr()?;
                let output = self.parse_json_returning_opt()?;
                RawExpr::JsonScalarExpr {
                    expr: Box::new(expr),
                    output,
                    location,
                }
            }
            _ => {
                let expr = self.parse_json_value_expr()?;
                let output = self.parse_json_returning_opt()?;
                RawExpr::JsonSerializeExpr {
                    expr,
                    output,
                    location,
                }
            }
        };
        self.expect_rparen()?;
        Ok(expr)
    }

    fn parse_json_is_predicate(&mut self, lhs: RawExpr) -> PgResult<RawExpr> {
        let location = self.location();
        self.expect_word("json")?;
        let item_type = if self.consume_word("value") {
            JsonValueType::Any
        } else if self.consume_word("object") {
            JsonValueType::Object
        } else if self.consume_keyword(Keyword::Array) {
            JsonValueType::Array
        } else if self.consume_word("scalar") {
            JsonValueType::Scalar
        } else {
            JsonValueType::Any
        };
        let unique_keys = self.parse_json_unique_opt()?;
        Ok(RawExpr::JsonIsPredicate {
            expr: Box::new(lhs),
            format: JsonFormat::default_format(),
            item_type,
            unique_keys,
            location,
        })
    }

    fn parse_json_passing_opt(&mut self) -> PgResult<Vec<JsonArgument>> {
        let mut passing = Vec::new();
        if !self.consume_word("passing") {
            return Ok(passing);
        }
        loop {
            let value = self.parse_json_value_expr()?;
            self.expect_keyword(Keyword::As)?;
            let name = self.parse_col_label()?;
            passing.push(JsonArgument { name, value });
            if !self.consume_comma() {
                return Ok(passing);
            }
        }
    }

    /// `WITH [CONDITIONAL|UNCONDITIONAL] [ARRAY] WRAPPER` / `WITHOUT [ARRAY] WRAPPER`.
    fn parse_json_wrapper_opt(&mut self) -> PgResult<JsonWrapper> {
        let wrapper_follows = |p: &Self| {
            matches!(p.peek_nth_kind(1), TokenKind::Keyword(Keyword::Array))
                || p.peek_nth_word(1, "wrapper")
                || p.peek_nth_word(1, "conditional")
                || p.peek_nth_word(1, "unconditional")
        };
        if self.peek_word("without") && wrapper_follows(self) {
            self.advance();
            self.consume_keyword(Keyword::Array);
            self.expect_word("wrapper")?;
            return Ok(JsonWrapper::None);
        }
        if self.peek_keyword(Keyword::With) && wrapper_follows(self) {
            self.advance();
            let wrapper = if self.consume_word("conditional") {
                JsonWrapper::Conditional
            } else {
                self.consume_word("unconditional");
                JsonWrapper::Unconditional
            };
            self.consume_keyword(Keyword::Array);
            self.expect_word("wrapper")?;
            return Ok(wrapper);
        }
        Ok(JsonWrapper::Unspec)
    }

    fn parse_json_quotes_opt(&mut self) -> PgResult<JsonQuotes> {
        let quotes = if self.peek_word("keep") && self.peek_nth_word(1, "quotes") {
            JsonQuotes::Keep
        } else if self.peek_word("omit") && self.peek_nth_word(1, "quotes") {
            JsonQuotes::Omit
        } else {
            return Ok(JsonQuotes::Unspec);
        };
        self.advance();
        self.advance();
        if self.peek_keyword(Keyword::On) && self.peek_nth_word(1, "scalar") {
            self.advance();
            self.advance();
            self.expect_word("string")?;
        }
        Ok(quotes)
    }

    fn parse_json_behavior_opt(&mut self) -> PgResult<Option<RawJsonBehavior>> {
        let location = self.location();
        let (btype, width) = match self.current_kind() {
            TokenKind::Identifier(w) if w == "error" => (JsonBehaviorType::Error, 1),
            TokenKind::Keyword(Keyword::Null) => (JsonBehaviorType::Null, 1),
            TokenKind::Keyword(Keyword::True) => (JsonBehaviorType::True, 1),
            TokenKind::Keyword(Keyword::False) => (JsonBehaviorType::False, 1),
            TokenKind::Identifier(w) if w == "unknown" => (JsonBehaviorType::Unknown, 1),
            TokenKind::Identifier(w) if w == "empty" => {
                if self.peek_nth_word(1, "object") {
                    (JsonBehaviorType::EmptyObject, 2)
                } else if self.peek_nth_keyword(1, Keyword::Array) {
                    (JsonBehaviorType::EmptyArray, 2)
                } else {
                    (JsonBehaviorType::Empty, 1)
                }
            }
            TokenKind::Keyword(Keyword::Default) => {
                self.advance();
                let expr = self.parse_expr()?;
                return Ok(Some(RawJsonBehavior {
                    btype: JsonBehaviorType::Default,
                    expr: Some(Box::new(expr)),
                    location,
                }));
            }
            _ => return Ok(None),
        };
        if !self.peek_nth_keyword(width, Keyword::On) {
            return Ok(None);
        }
        for _ in 0..width {
            self.advance();
        }
        Ok(Some(RawJsonBehavior {
            btype,
            expr: None,
            location,
        }))
    }

    /// Up to two `behavior ON EMPTY` / `behavior ON ERROR` clauses, in that order.
    fn parse_json_behaviors(
        &mut self,
    ) -> PgResult<(Option<RawJsonBehavior>, Option<RawJsonBehavior>)> {
        let mut on_empty = None;
        let mut on_error = None;
        while let Some(behavior) = self.parse_json_behavior_opt()? {
            self.expect_keyword(Keyword::On)?;
            if on_error.is_none() && on_empty.is_none() && self.consume_word("empty") {
                on_empty = Some(behavior);
            } else if on_error.is_none() && self.consume_word("error") {
                on_error = Some(behavior);
            } else {
                return Err(self.error_at_current("syntax error"));
            }
        }
        Ok((on_empty, on_error))
    }

    fn parse_json_func_expr(&mut self, op: JsonExprOp) -> PgResult<RawExpr> {
        let location = self.location();
        self.advance();
        self.expect_lparen()?;
        let context_item = self.parse_json_value_expr()?;
        self.expect_token(|k| matches!(k, TokenKind::Comma), "\",\"")?;
        let pathspec = self.parse_expr()?;
        let passing = self.parse_json_passing_opt()?;
        let output = self.parse_json_returning_opt()?;
        let (wrapper, quotes) = if op == JsonExprOp::Query {
            let wrapper = self.parse_json_wrapper_opt()?;
            let quotes = self.parse_json_quotes_opt()?;
            (wrapper, quotes)
        } else {
            (JsonWrapper::Unspec, JsonQuotes::Unspec)
        };
        if wrapper != JsonWrapper::Unspec
            && wrapper != JsonWrapper::None
            && quotes != JsonQuotes::Unspec
        {
            return Err(syntax_error(
                "SQL/JSON QUOTES behavior must not be specified when WITH WRAPPER is used",
                location,
            )
            .with_hint("Use WITHOUT WRAPPER in JSON_QUERY()."));
        }
        let (on_empty, on_error) = self.parse_json_behaviors()?;
        if op == JsonExprOp::Exists && on_empty.is_some() {
            return Err(syntax_error("invalid ON EMPTY behavior for JSON_EXISTS()", location));
        }
        self.expect_rparen()?;
        Ok(RawExpr::JsonFuncExpr(Box::new(JsonFuncExpr {
            op,
            column_name: None,
            context_item,
            pathspec: Box::new(pathspec),
            passing,
            output,
            on_empty,
            on_error,
            wrapper,
            quotes,
            location,
        })))
    }

    pub(super) fn parse_json_table(&mut self) -> PgResult<RangeJsonTable> {
        let location = self.location();
        self.expect_word("json_table")?;
        self.expect_lparen()?;
        let context_item = self.parse_json_value_expr()?;
        self.expect_token(|k| matches!(k, TokenKind::Comma), "\",\"")?;
        let pathspec = self.parse_expr()?;
        if self.consume_keyword(Keyword::As) {
            self.parse_col_label()?;
        }
        let passing = self.parse_json_passing_opt()?;
        self.expect_word("columns")?;
        self.expect_lparen()?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_json_table_column()?);
            if !self.consume_comma() {
                break;
            }
        }
        self.expect_rparen()?;
        let (on_empty, on_error) = self.parse_json_behaviors()?;
        if on_empty.is_some() {
            return Err(syntax_error("invalid ON EMPTY behavior for JSON_TABLE", location));
        }
        self.expect_rparen()?;
        Ok(RangeJsonTable {
            context_item,
            pathspec: Box::new(pathspec),
            passing,
            columns,
            on_error,
            alias: None,
            lateral: false,
            location,
        })
    }

    fn parse_json_path_opt(&mut self) -> PgResult<Option<String>> {
        if !self.consume_word("path") {
            return Ok(None);
        }
        match self.current_kind().clone() {
            TokenKind::String(path) => {
                self.advance();
                Ok(Some(path))
            }
            _ => Err(self.error_at_current("syntax error")),
        }
    }

    fn parse_json_table_column(&mut self) -> PgResult<JsonTableColumn> {
        let location = self.location();
        if self.peek_word("nested") {
            return Err(not_supported("NESTED PATH columns are not supported", location));
        }
        let name = self.parse_col_id()?;
        let mut column = JsonTableColumn {
            kind: JsonTableColumnKind::Regular,
            name,
            type_name: None,
            pathspec: None,
            format: None,
            wrapper: JsonWrapper::Unspec,
            quotes: JsonQuotes::Unspec,
            on_empty: None,
            on_error: None,
            location,
        };
        if self.consume_keyword(Keyword::For) {
            self.expect_word("ordinality")?;
            column.kind = JsonTableColumnKind::Ordinality;
            return Ok(column);
        }
        column.type_name = Some(self.parse_type_name()?);
        if self.consume_word("exists") {
            column.kind = JsonTableColumnKind::Exists;
            column.pathspec = self.parse_json_path_opt()?;
            let (on_empty, on_error) = self.parse_json_behaviors()?;
            if on_empty.is_some() {
                return Err(syntax_error(
                    "invalid ON EMPTY behavior for column",
                    location,
                ));
            }
            column.on_error = on_error;
            return Ok(column);
        }
        column.format = self.parse_json_format_opt()?;
        if column.format.is_some() {
            column.kind = JsonTableColumnKind::Formatted;
        }
        column.pathspec = self.parse_json_path_opt()?;
        column.wrapper = self.parse_json_wrapper_opt()?;
        column.quotes = self.parse_json_quotes_opt()?;
        let (on_empty, on_error) = self.parse_json_behaviors()?;
        column.on_empty = on_empty;
        column.on_error = on_error;
        Ok(column)
    }
}

#[cfg(test)]
mod tests {
    use crate::nodes::parsenodes::{AConstValue, AExprKind, RawExpr, RawStmt};
    use crate::nodes::primnodes::{BoolExprType, JsonExprOp, JsonWrapper, SubLinkType};
    use crate::parser::gram::{parse_expression, raw_parser};

    fn expr(text: &str) -> RawExpr {
        parse_expression(text).unwrap()
    }

    fn op_name(e: &RawExpr) -> &str {
        match e {
            RawExpr::AExpr { name, .. } => name[0].as_str(),
            other => panic!("not an operator: {other:?}"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let e = expr("1 + 2 * 3");
        assert_eq!(op_name(&e), "+");
        let RawExpr::AExpr { rexpr, .. } = &e else { unreachable!() };
        assert_eq!(op_name(rexpr.as_deref().unwrap()), "*");

        let e = expr("- 2 ^ 2");
        assert_eq!(op_name(&e), "^");
    }

    #[test]
    fn negative_literals_fold() {
        assert!(matches!(
            expr("-5"),
            RawExpr::AConst { value: AConstValue::Integer(-5), .. }
        ));
        assert!(matches!(
            expr("-1.5"),
            RawExpr::AConst { value: AConstValue::Float(ref s), .. } if s == "-1.5"
        ));
    }

    #[test]
    fn boolean_precedence_and_flattening() {
        let e = expr("a or b and not c or d");
        let RawExpr::BoolExpr { op, args, .. } = e else { panic!() };
        assert_eq!(op, BoolExprType::Or);
        assert_eq!(args.len(), 3);
        assert!(matches!(args[1], RawExpr::BoolExpr { op: BoolExprType::And, .. }));
    }

    #[test]
    fn is_and_between() {
        assert!(matches!(expr("a is not null"), RawExpr::NullTest { .. }));
        assert!(matches!(expr("a is unknown"), RawExpr::BooleanTest { .. }));
        assert!(matches!(
            expr("a is not distinct from b"),
            RawExpr::AExpr { kind: AExprKind::NotDistinct, .. }
        ));
        assert!(matches!(
            expr("a not between 1 and 2 + 3"),
            RawExpr::AExpr { kind: AExprKind::NotBetween, .. }
        ));
        assert!(matches!(
            expr("x not in (select 1)"),
            RawExpr::BoolExpr { op: BoolExprType::Not, .. }
        ));
    }

    #[test]
    fn quantified_comparisons() {
        assert!(matches!(
            expr("a = any (array[1, 2])"),
            RawExpr::AExpr { kind: AExprKind::OpAny, .. }
        ));
        assert!(matches!(
            expr("a < all (select b from t)"),
            RawExpr::SubLink { sub_link_type: SubLinkType::All, .. }
        ));
    }

    #[test]
    fn casts_typed_literals_and_indirection() {
        let RawExpr::TypeCast { type_name, .. } = expr("'1'::numeric(10, 2)[]") else { panic!() };
        assert_eq!(type_name.names, vec!["pg_catalog", "numeric"]);
        assert_eq!(type_name.typmods, vec![10, 2]);
        assert_eq!(type_name.array_bounds, vec![-1]);

        let RawExpr::TypeCast { type_name, .. } = expr("double precision '1.5'") else { panic!() };
        assert_eq!(type_name.names[1], "float8");

        let RawExpr::TypeCast { type_name, .. } = expr("jsonb '{}'") else { panic!() };
        assert_eq!(type_name.names, vec!["jsonb"]);

        let RawExpr::Indirection { indirection, .. } = expr("(r).f[1:2]") else { panic!() };
        assert_eq!(indirection.len(), 2);
    }

    #[test]
    fn function_call_decorations() {
        let RawExpr::FuncCall(call) =
            expr("string_agg(distinct x, ',' order by x) filter (where x > 0)")
        else {
            panic!()
        };
        assert!(call.agg_distinct);
        assert_eq!(call.agg_order.len(), 1);
        assert!(call.agg_filter.is_some());

        let RawExpr::FuncCall(call) = expr("percentile_cont(0.5) within group (order by v)")
        else {
            panic!()
        };
        assert!(call.agg_within_group);

        let RawExpr::FuncCall(call) =
            expr("sum(x) over (partition by g order by x rows between 1 preceding and current row)")
        else {
            panic!()
        };
        let over = call.over.unwrap();
        assert_eq!(over.partition_clause.len(), 1);
        assert!(over.frame_options.explicit);
        assert!(over.start_offset.is_some());

        let RawExpr::FuncCall(call) = expr("f(a => 1, variadic array[2])") else { panic!() };
        assert!(call.func_variadic);
        assert!(matches!(call.args[0], RawExpr::NamedArgExpr { .. }));
    }

    #[test]
    fn invalid_frames_are_windowing_errors() {
        let err = parse_expression("count(*) over (rows unbounded following)").unwrap_err();
        assert_eq!(err.sqlstate.code(), "42P20");
    }

    #[test]
    fn special_forms() {
        assert!(matches!(expr("coalesce(a, 1)"), RawExpr::CoalesceExpr { .. }));
        assert!(matches!(expr("nullif(a, 1)"), RawExpr::AExpr { kind: AExprKind::NullIf, .. }));
        assert!(matches!(expr("row(1, 2)"), RawExpr::RowExpr { explicit_row: true, .. }));
        assert!(matches!(expr("(1, 2)"), RawExpr::RowExpr { explicit_row: false, .. }));
        assert!(matches!(expr("exists (select 1)"), RawExpr::SubLink { .. }));
        assert!(matches!(expr("((select 1) + 1)"), RawExpr::AExpr { .. }));
        let RawExpr::FuncCall(call) = expr("substring('abc' from 2 for 1)") else { panic!() };
        assert_eq!(call.args.len(), 3);
        let RawExpr::FuncCall(call) = expr("trim(leading 'x' from s)") else { panic!() };
        assert_eq!(call.funcname[1], "ltrim");
        let RawExpr::FuncCall(call) = expr("left('abc', 2)") else { panic!() };
        assert_eq!(call.funcname, vec!["left"]);
    }

    #[test]
    fn case_and_arrays() {
        let RawExpr::CaseExpr { arg, args, defresult, .. } =
            expr("case when a then 'x' when b then 'y' else 'z' end")
        else {
            panic!()
        };
        assert!(arg.is_none());
        assert_eq!(args.len(), 2);
        assert!(defresult.is_some());

        let RawExpr::ArrayExpr { elements, .. } = expr("array[[1, 2], [3, 4]]") else { panic!() };
        assert!(matches!(elements[0], RawExpr::ArrayExpr { .. }));
    }

    #[test]
    fn sql_json_syntax() {
        let RawExpr::JsonObjectConstructor { exprs, absent_on_null, unique, output, .. } =
            expr("json_object('a' : 1, 'b' value 'x' absent on null with unique keys returning jsonb)")
        else {
            panic!()
        };
        assert_eq!(exprs.len(), 2);
        assert!(absent_on_null && unique);
        assert!(output.is_some());

        let RawExpr::JsonArrayConstructor { absent_on_null, .. } = expr("json_array(1, null)")
        else {
            panic!()
        };
        assert!(absent_on_null);

        assert!(matches!(
            expr("json_array(select 1)"),
            RawExpr::JsonArrayQueryConstructor { .. }
        ));
        assert!(matches!(
            expr("'{}' is not json object"),
            RawExpr::BoolExpr { op: BoolExprType::Not, .. }
        ));

        let RawExpr::JsonFuncExpr(func) = expr(
            "json_query(js, '$.a' passing 1 as x returning jsonb with conditional wrapper \
             empty array on empty error on error)",
        ) else {
            panic!()
        };
        assert_eq!(func.op, JsonExprOp::Query);
        assert_eq!(func.wrapper, JsonWrapper::Conditional);
        assert_eq!(func.passing.len(), 1);
        assert!(func.on_empty.is_some() && func.on_error.is_some());
    }

    #[test]
    fn json_table_columns() {
        let stmts = raw_parser(
            "select * from json_table('[1,2]', '$[*]' columns (n for ordinality, \
             v int path '$', j jsonb format json path '$', e boolean exists path '$.x') \
             error on error) as jt",
        )
        .unwrap();
        let RawStmt::Select(stmt) = &stmts[0] else { panic!() };
        let crate::nodes::parsenodes::FromItem::JsonTable(table) = &stmt.from_clause[0] else {
            panic!()
        };
        assert_eq!(table.columns.len(), 4);
        assert!(table.on_error.is_some());
        assert_eq!(table.alias.as_ref().map(|a| a.aliasname.as_str()), Some("jt"));
    }
}
