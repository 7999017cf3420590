//! CREATE / DROP / ALTER / REFRESH and the session utility statements.

use crate::catalog::pg_proc::Volatility;
use crate::nodes::parsenodes::{
    AlterTableCmd, AlterTableStmt, ColumnDef, CompositeTypeStmt, CreateDomainStmt,
    CreateFunctionStmt, CreateStmt, CreateTableAsStmt, DropStmt, FunctionBody,
    FunctionParameter, FunctionParameterMode, IndexElem, IndexStmt, IntoClause, ObjectType,
    RawStmt, RefreshMatViewStmt, TableConstraint, TransactionStmtKind, TypeName,
    VariableSetStmt,
};
use crate::parser::gram::Parser;
use crate::parser::scan::{Keyword, TokenKind};
use crate::utils::elog::{PgError, PgResult, SqlState, syntax_error};

fn not_supported(message: &str, location: Option<usize>) -> PgError {
    PgError::new(SqlState::FeatureNotSupported, message).at(location)
}

impl Parser<'_> {
    fn parse_if_not_exists(&mut self) -> PgResult<bool> {
        if self.peek_word("if") && self.peek_nth_keyword(1, Keyword::Not) {
            self.advance();
            self.advance();
            self.expect_word("exists")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_if_exists(&mut self) -> PgResult<bool> {
        if self.peek_word("if") && self.peek_nth_word(1, "exists") {
            self.advance();
            self.advance();
            return Ok(true);
        }
        Ok(false)
    }

    /// `WITH [NO] DATA`; returns `skip_data`.
    fn parse_with_data_opt(&mut self) -> PgResult<bool> {
        if !self.peek_keyword(Keyword::With) {
            return Ok(false);
        }
        self.advance();
        let skip = self.consume_word("no");
        self.expect_word("data")?;
        Ok(skip)
    }

    pub(super) fn parse_create_stmt(&mut self) -> PgResult<RawStmt> {
        let location = self.location();
        self.expect_keyword(Keyword::Create)?;
        let replace = if self.consume_keyword(Keyword::Or) {
            self.expect_word("replace")?;
            true
        } else {
            false
        };
        let temp = self.consume_word("temp") || self.consume_word("temporary");
        if self.peek_word("unlogged") {
            self.advance();
        }

        if self.consume_keyword(Keyword::Table) {
            return self.parse_create_table(temp);
        }
        if self.consume_word("materialized") {
            self.expect_word("view")?;
            return self.parse_create_view_like(ObjectType::MatView, temp);
        }
        if self.consume_word("view") {
            return self.parse_create_view_like(ObjectType::View, temp);
        }
        if self.consume_keyword(Keyword::Unique) {
            self.expect_word("index")?;
            return self.parse_create_index(true);
        }
        if self.consume_word("index") {
            return self.parse_create_index(false);
        }
        if self.consume_word("function") {
            return self.parse_create_function(replace);
        }
        if self.consume_word("domain") {
            return self.parse_create_domain();
        }
        if self.consume_word("type") {
            return self.parse_create_type();
        }
        Err(not_supported("unsupported CREATE statement", location))
    }

    fn parse_create_table(&mut self, temp: bool) -> PgResult<RawStmt> {
        let if_not_exists = self.parse_if_not_exists()?;
        let relation = self.parse_qualified_name()?;

        // CREATE TABLE name [(cols)] AS query
        let column_list_then_as = matches!(self.current_kind(), TokenKind::LParen) && {
            let mut n = 1;
            while matches!(
                self.peek_nth_kind(n),
                TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_) | TokenKind::Comma
            ) {
                n += 1;
            }
            matches!(self.peek_nth_kind(n), TokenKind::RParen)
                && self.peek_nth_keyword(n + 1, Keyword::As)
        };
        if column_list_then_as || self.peek_keyword(Keyword::As) {
            let col_names = if column_list_then_as {
                self.parse_paren_name_list()?
            } else {
                Vec::new()
            };
            let query_start = self.query_start_after_as()?;
            let query = self.parse_select_stmt()?;
            let query_text = self.source[query_start..self.previous_end()].trim().to_string();
            let skip_data = self.parse_with_data_opt()?;
            return Ok(RawStmt::CreateTableAs(CreateTableAsStmt {
                query: Box::new(query),
                into: IntoClause {
                    rel: relation,
                    col_names,
                    skip_data,
                    temp,
                },
                objtype: ObjectType::Table,
                if_not_exists,
                query_text,
            }));
        }

        self.expect_lparen()?;
        let mut table_elts = Vec::new();
        let mut constraints = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            loop {
                if self.at_table_constraint() {
                    constraints.push(self.parse_table_constraint()?);
                } else {
                    table_elts.push(self.parse_column_def(&mut constraints)?);
                }
                if !self.consume_comma() {
                    break;
                }
            }
        }
        self.expect_rparen()?;
        Ok(RawStmt::Create(CreateStmt {
            relation,
            table_elts,
            constraints,
            temp,
            if_not_exists,
        }))
    }

    fn query_start_after_as(&mut self) -> PgResult<usize> {
        self.expect_keyword(Keyword::As)?;
        Ok(self.location().unwrap_or_default())
    }

    fn parse_create_view_like(&mut self, objtype: ObjectType, temp: bool) -> PgResult<RawStmt> {
        let if_not_exists = self.parse_if_not_exists()?;
        let relation = self.parse_qualified_name()?;
        let col_names = if matches!(self.current_kind(), TokenKind::LParen) {
            self.parse_paren_name_list()?
        } else {
            Vec::new()
        };
        let query_start = self.query_start_after_as()?;
        let query = self.parse_select_stmt()?;
        let query_text = self.source[query_start..self.previous_end()].trim().to_string();
        let skip_data = if objtype == ObjectType::MatView {
            self.parse_with_data_opt()?
        } else {
            false
        };
        Ok(RawStmt::CreateTableAs(CreateTableAsStmt {
            query: Box::new(query),
            into: IntoClause {
                rel: relation,
                col_names,
                skip_data,
                temp,
            },
            objtype,
            if_not_exists,
            query_text,
        }))
    }

    fn at_table_constraint(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Keyword(
                Keyword::Constraint
                    | Keyword::Unique
                    | Keyword::Primary
                    | Keyword::Check
                    | Keyword::Foreign
            )
        )
    }

    fn parse_table_constraint(&mut self) -> PgResult<TableConstraint> {
        let name = if self.consume_keyword(Keyword::Constraint) {
            Some(self.parse_col_id()?)
        } else {
            None
        };
        let location = self.location();
        if self.consume_keyword(Keyword::Unique) {
            self.consume_word("nulls");
            let columns = self.parse_paren_name_list()?;
            return Ok(TableConstraint::Unique { name, columns });
        }
        if self.consume_keyword(Keyword::Primary) {
            self.expect_word("key")?;
            let columns = self.parse_paren_name_list()?;
            return Ok(TableConstraint::PrimaryKey { name, columns });
        }
        if self.consume_keyword(Keyword::Check) {
            self.expect_lparen()?;
            let expr = self.parse_expr()?;
            self.expect_rparen()?;
            return Ok(TableConstraint::Check { name, expr });
        }
        if self.peek_keyword(Keyword::Foreign) {
            return Err(not_supported("FOREIGN KEY constraints are not supported", location));
        }
        Err(self.error_at_current("syntax error"))
    }

    /// Column definition; column-level CHECK constraints go to `constraints`.
    fn parse_column_def(&mut self, constraints: &mut Vec<TableConstraint>) -> PgResult<ColumnDef> {
        let location = self.location();
        let colname = self.parse_col_id()?;
        let type_name = self.parse_type_name()?;
        let mut def = ColumnDef {
            colname,
            type_name,
            not_null: false,
            unique: false,
            primary_key: false,
            raw_default: None,
            collation: None,
            location,
        };
        loop {
            let constraint_name = if self.consume_keyword(Keyword::Constraint) {
                Some(self.parse_col_id()?)
            } else {
                None
            };
            let location = self.location();
            if self.consume_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null)?;
                def.not_null = true;
            } else if self.consume_keyword(Keyword::Null) {
                def.not_null = false;
            } else if self.consume_keyword(Keyword::Default) {
                def.raw_default = Some(self.parse_expr_bp(super::expr::BP_COLLATE)?);
            } else if self.consume_keyword(Keyword::Unique) {
                def.unique = true;
            } else if self.consume_keyword(Keyword::Primary) {
                self.expect_word("key")?;
                def.primary_key = true;
                def.not_null = true;
            } else if self.consume_keyword(Keyword::Check) {
                self.expect_lparen()?;
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                constraints.push(TableConstraint::Check {
                    name: constraint_name,
                    expr,
                });
            } else if self.consume_keyword(Keyword::Collate) {
                def.collation = Some(self.parse_any_name()?);
            } else if self.peek_keyword(Keyword::References) {
                return Err(not_supported("FOREIGN KEY constraints are not supported", location));
            } else if self.peek_word("generated") {
                return Err(not_supported("generated columns are not supported", location));
            } else {
                if constraint_name.is_some() {
                    return Err(self.error_at_current("syntax error"));
                }
                return Ok(def);
            }
        }
    }

    fn parse_create_index(&mut self, unique: bool) -> PgResult<RawStmt> {
        let location = self.location();
        if self.consume_word("concurrently") {
            return Err(not_supported("CREATE INDEX CONCURRENTLY is not supported", location));
        }
        let if_not_exists = self.parse_if_not_exists()?;
        let idxname = if self.peek_keyword(Keyword::On) {
            None
        } else {
            Some(self.parse_col_id()?)
        };
        self.expect_keyword(Keyword::On)?;
        self.consume_keyword(Keyword::Only);
        let relation = self.parse_qualified_name()?;
        if self.consume_keyword(Keyword::Using) {
            let method_location = self.location();
            let method = self.parse_col_id()?;
            if method != "btree" && method != "hash" {
                return Err(PgError::new(
                    SqlState::UndefinedObject,
                    format!("access method \"{method}\" does not exist"),
                )
                .at(method_location));
            }
        }
        self.expect_lparen()?;
        let mut params = Vec::new();
        loop {
            let elem = if matches!(self.current_kind(), TokenKind::LParen) {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                IndexElem {
                    name: None,
                    expr: Some(expr),
                }
            } else if matches!(self.peek_nth_kind(1), TokenKind::LParen) {
                IndexElem {
                    name: None,
                    expr: Some(self.parse_func_expr_windowless()?),
                }
            } else {
                IndexElem {
                    name: Some(self.parse_col_id()?),
                    expr: None,
                }
            };
            let _ = self.consume_keyword(Keyword::Asc) || self.consume_keyword(Keyword::Desc);
            if self.consume_word("nulls") && !self.consume_word("first") {
                self.expect_word("last")?;
            }
            params.push(elem);
            if !self.consume_comma() {
                break;
            }
        }
        self.expect_rparen()?;
        let where_clause = if self.consume_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(RawStmt::Index(IndexStmt {
            idxname,
            relation,
            params,
            unique,
            where_clause,
            if_not_exists,
        }))
    }

    fn parse_function_parameter(&mut self) -> PgResult<FunctionParameter> {
        let location = self.location();
        let mode = if self.consume_keyword(Keyword::In) {
            FunctionParameterMode::In
        } else if self.consume_keyword(Keyword::Variadic) {
            FunctionParameterMode::Variadic
        } else if self.peek_word("out") || self.peek_word("inout") {
            return Err(not_supported("OUT parameters are not supported", location));
        } else {
            FunctionParameterMode::In
        };
        // `name type` versus a bare (possibly multi-word) type
        let type_starts = |p: &Self, n: usize| {
            matches!(
                p.peek_nth_kind(n),
                TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
            )
        };
        let multi_word_type = (self.peek_word("double") && self.peek_nth_word(1, "precision"))
            || ((self.peek_word("character") || self.peek_word("char"))
                && self.peek_nth_word(1, "varying"));
        let name = if !multi_word_type
            && matches!(
                self.current_kind(),
                TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
            )
            && type_starts(self, 1)
        {
            Some(self.parse_col_id()?)
        } else {
            None
        };
        let arg_type = self.parse_type_name()?;
        let defexpr = if self.consume_keyword(Keyword::Default)
            || self.consume_if(|k| matches!(k, TokenKind::Equal))
        {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(FunctionParameter {
            name,
            arg_type,
            mode,
            defexpr,
        })
    }

    fn parse_create_function(&mut self, replace: bool) -> PgResult<RawStmt> {
        let funcname = self.parse_any_name()?;
        self.expect_lparen()?;
        let mut parameters = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            loop {
                parameters.push(self.parse_function_parameter()?);
                if !self.consume_comma() {
                    break;
                }
            }
        }
        self.expect_rparen()?;

        let returns_location = self.location();
        self.expect_word("returns")?;
        if self.peek_keyword(Keyword::Table) {
            return Err(not_supported("RETURNS TABLE is not supported", returns_location));
        }
        let mut return_type = self.parse_type_name()?;
        let returns_set = std::mem::take(&mut return_type.setof);

        let mut language = None;
        let mut body = None;
        let mut volatility = None;
        let mut strict = false;
        loop {
            let location = self.location();
            if self.consume_word("language") {
                language = Some(match self.current_kind().clone() {
                    TokenKind::String(name) => {
                        self.advance();
                        name.to_lowercase()
                    }
                    _ => self.parse_col_id()?,
                });
            } else if self.consume_keyword(Keyword::As) {
                let TokenKind::String(text) = self.current_kind().clone() else {
                    return Err(self.error_at_current("syntax error"));
                };
                self.advance();
                if self.consume_comma() {
                    return Err(not_supported(
                        "only one AS item needed for language \"sql\"",
                        location,
                    ));
                }
                body = Some(FunctionBody::Text(text));
            } else if self.consume_word("immutable") {
                volatility = Some(Volatility::Immutable);
            } else if self.consume_word("stable") {
                volatility = Some(Volatility::Stable);
            } else if self.consume_word("volatile") {
                volatility = Some(Volatility::Volatile);
            } else if self.consume_word("strict") {
                strict = true;
            } else if self.consume_word("called") {
                self.expect_keyword(Keyword::On)?;
                self.expect_keyword(Keyword::Null)?;
                self.expect_word("input")?;
                strict = false;
            } else if self.peek_word("returns") && self.peek_nth_keyword(1, Keyword::Null) {
                self.advance();
                self.advance();
                self.expect_keyword(Keyword::On)?;
                self.expect_keyword(Keyword::Null)?;
                self.expect_word("input")?;
                strict = true;
            } else if self.consume_word("parallel") {
                self.parse_col_id()?;
            } else if self.consume_word("leakproof") {
            } else if self.peek_keyword(Keyword::Not) && self.peek_nth_word(1, "leakproof") {
                self.advance();
                self.advance();
            } else if self.consume_word("return") {
                let expr = self.parse_expr()?;
                body = Some(FunctionBody::Atomic(vec![RawStmt::Return(expr)]));
            } else if self.peek_word("begin") && self.peek_nth_word(1, "atomic") {
                self.advance();
                self.advance();
                let mut stmts = Vec::new();
                loop {
                    while self.consume_if(|k| matches!(k, TokenKind::Semicolon)) {}
                    if self.consume_keyword(Keyword::End) {
                        break;
                    }
                    if self.at_eof() {
                        return Err(self.error_at_current("syntax error"));
                    }
                    stmts.push(self.parse_stmt()?);
                }
                body = Some(FunctionBody::Atomic(stmts));
            } else {
                break;
            }
        }

        let Some(body) = body else {
            return Err(PgError::new(
                SqlState::InvalidObjectDefinition,
                "no function body specified",
            )
            .at(returns_location));
        };
        let language = language.unwrap_or_else(|| "sql".to_string());
        Ok(RawStmt::CreateFunction(CreateFunctionStmt {
            replace,
            funcname,
            parameters,
            return_type,
            returns_set,
            language,
            body,
            volatility,
            strict,
        }))
    }

    fn parse_create_domain(&mut self) -> PgResult<RawStmt> {
        let domainname = self.parse_any_name()?;
        self.consume_keyword(Keyword::As);
        let type_name = self.parse_type_name()?;
        let mut not_null = false;
        let mut constraints = Vec::new();
        loop {
            let name = if self.consume_keyword(Keyword::Constraint) {
                Some(self.parse_col_id()?)
            } else {
                None
            };
            if self.consume_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null)?;
                not_null = true;
            } else if self.consume_keyword(Keyword::Null) {
                not_null = false;
            } else if self.consume_keyword(Keyword::Check) {
                self.expect_lparen()?;
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                constraints.push((name, expr));
            } else if self.peek_keyword(Keyword::Default) {
                return Err(not_supported("domain defaults are not supported", self.location()));
            } else {
                if name.is_some() {
                    return Err(self.error_at_current("syntax error"));
                }
                break;
            }
        }
        Ok(RawStmt::CreateDomain(CreateDomainStmt {
            domainname,
            type_name,
            not_null,
            constraints,
        }))
    }

    fn parse_create_type(&mut self) -> PgResult<RawStmt> {
        let typevar = self.parse_qualified_name()?;
        self.expect_keyword(Keyword::As)?;
        if self.peek_word("enum") || self.peek_word("range") {
            return Err(not_supported(
                "only composite types can be created",
                self.location(),
            ));
        }
        self.expect_lparen()?;
        let mut coldeflist = Vec::new();
        let mut ignored = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            loop {
                let def = self.parse_column_def(&mut ignored)?;
                if def.not_null || def.raw_default.is_some() || !ignored.is_empty() {
                    return Err(syntax_error(
                        "composite type attributes cannot have constraints",
                        def.location,
                    ));
                }
                coldeflist.push(def);
                if !self.consume_comma() {
                    break;
                }
            }
        }
        self.expect_rparen()?;
        Ok(RawStmt::CompositeType(CompositeTypeStmt {
            typevar,
            coldeflist,
        }))
    }

    pub(super) fn parse_drop_stmt(&mut self) -> PgResult<RawStmt> {
        let location = self.location();
        self.expect_word("drop")?;
        let remove_type = if self.consume_keyword(Keyword::Table) {
            ObjectType::Table
        } else if self.consume_word("materialized") {
            self.expect_word("view")?;
            ObjectType::MatView
        } else if self.consume_word("view") {
            ObjectType::View
        } else if self.consume_word("index") {
            ObjectType::Index
        } else if self.consume_word("function") {
            ObjectType::Function
        } else if self.consume_word("type") {
            ObjectType::Type
        } else if self.consume_word("domain") {
            ObjectType::Domain
        } else {
            return Err(not_supported("unsupported DROP statement", location));
        };
        let missing_ok = self.parse_if_exists()?;
        let mut objects = Vec::new();
        loop {
            objects.push(self.parse_any_name()?);
            // DROP FUNCTION f(int, text): overloads are not distinguished
            if remove_type == ObjectType::Function
                && self.consume_if(|k| matches!(k, TokenKind::LParen))
                && !self.consume_if(|k| matches!(k, TokenKind::RParen))
            {
                loop {
                    self.parse_function_parameter()?;
                    if !self.consume_comma() {
                        break;
                    }
                }
                self.expect_rparen()?;
            }
            if !self.consume_comma() {
                break;
            }
        }
        if !self.consume_word("cascade") {
            self.consume_word("restrict");
        }
        Ok(RawStmt::Drop(DropStmt {
            remove_type,
            objects,
            missing_ok,
        }))
    }

    pub(super) fn parse_alter_stmt(&mut self) -> PgResult<RawStmt> {
        let location = self.location();
        self.expect_word("alter")?;
        if !self.consume_keyword(Keyword::Table) {
            return Err(not_supported("unsupported ALTER statement", location));
        }
        self.parse_if_exists()?;
        self.consume_keyword(Keyword::Only);
        let relation = self.parse_qualified_name()?;
        let mut cmds = Vec::new();
        loop {
            let cmd_location = self.location();
            if self.consume_word("add") {
                self.consume_keyword(Keyword::Column);
                if self.at_table_constraint() {
                    return Err(not_supported(
                        "ALTER TABLE ADD CONSTRAINT is not supported",
                        cmd_location,
                    ));
                }
                let mut checks = Vec::new();
                let def = self.parse_column_def(&mut checks)?;
                if !checks.is_empty() {
                    return Err(not_supported(
                        "CHECK constraints on added columns are not supported",
                        cmd_location,
                    ));
                }
                cmds.push(AlterTableCmd::AddColumn(def));
            } else if self.consume_word("drop") {
                self.consume_keyword(Keyword::Column);
                let missing_ok = self.parse_if_exists()?;
                let name = self.parse_col_id()?;
                if !self.consume_word("cascade") {
                    self.consume_word("restrict");
                }
                cmds.push(AlterTableCmd::DropColumn { name, missing_ok });
            } else {
                return Err(not_supported("unsupported ALTER TABLE action", cmd_location));
            }
            if !self.consume_comma() {
                break;
            }
        }
        Ok(RawStmt::AlterTable(AlterTableStmt { relation, cmds }))
    }

    pub(super) fn parse_refresh_stmt(&mut self) -> PgResult<RawStmt> {
        self.expect_word("refresh")?;
        self.expect_word("materialized")?;
        self.expect_word("view")?;
        let concurrent = self.consume_word("concurrently");
        let relation = self.parse_qualified_name()?;
        let skip_data = self.parse_with_data_opt()?;
        Ok(RawStmt::RefreshMatView(RefreshMatViewStmt {
            concurrent,
            skip_data,
            relation,
        }))
    }

    pub(super) fn parse_analyze_stmt(&mut self) -> PgResult<RawStmt> {
        self.advance();
        self.consume_word("verbose");
        let mut relations = Vec::new();
        if matches!(
            self.current_kind(),
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
        ) {
            loop {
                relations.push(self.parse_qualified_name()?);
                if !self.consume_comma() {
                    break;
                }
            }
        }
        Ok(RawStmt::Analyze(relations))
    }

    fn parse_var_value(&mut self) -> PgResult<String> {
        let negative = self.consume_if(|k| matches!(k, TokenKind::Minus));
        let sign = if negative { "-" } else { "" };
        let value = match self.current_kind().clone() {
            TokenKind::String(s) | TokenKind::Identifier(s) | TokenKind::QuotedIdentifier(s) => s,
            TokenKind::Integer(v) => format!("{sign}{v}"),
            TokenKind::Float(s) => format!("{sign}{s}"),
            TokenKind::Keyword(kw) => kw.text().to_string(),
            _ => return Err(self.error_at_current("syntax error")),
        };
        self.advance();
        Ok(value)
    }

    pub(super) fn parse_variable_stmt(&mut self) -> PgResult<RawStmt> {
        if self.consume_word("show") {
            let name = if self.consume_keyword(Keyword::All) {
                "all".to_string()
            } else {
                self.parse_any_name()?.join(".")
            };
            return Ok(RawStmt::VariableShow(name));
        }
        if self.consume_word("reset") {
            let name = if self.consume_keyword(Keyword::All) {
                "all".to_string()
            } else {
                self.parse_any_name()?.join(".")
            };
            return Ok(RawStmt::VariableSet(VariableSetStmt { name, value: None }));
        }
        self.expect_word("set")?;
        if !self.consume_word("session") {
            self.consume_word("local");
        }
        let name = self.parse_any_name()?.join(".");
        if !self.consume_keyword(Keyword::To) {
            self.expect_token(|k| matches!(k, TokenKind::Equal), "TO or \"=\"")?;
        }
        if self.consume_keyword(Keyword::Default) {
            return Ok(RawStmt::VariableSet(VariableSetStmt { name, value: None }));
        }
        let mut values = vec![self.parse_var_value()?];
        while self.consume_comma() {
            values.push(self.parse_var_value()?);
        }
        Ok(RawStmt::VariableSet(VariableSetStmt {
            name,
            value: Some(values.join(", ")),
        }))
    }

    pub(super) fn consume_transaction_noise(&mut self) {
        if !self.consume_word("work") {
            self.consume_word("transaction");
        }
    }

    pub(super) fn parse_transaction_stmt(&mut self) -> PgResult<RawStmt> {
        let TokenKind::Identifier(word) = self.current_kind().clone() else {
            return Err(self.error_at_current("syntax error"));
        };
        self.advance();
        let kind = match word.as_str() {
            "begin" => {
                self.consume_transaction_noise();
                TransactionStmtKind::Begin
            }
            "start" => {
                self.expect_word("transaction")?;
                TransactionStmtKind::Begin
            }
            "commit" => {
                self.consume_transaction_noise();
                TransactionStmtKind::Commit
            }
            _ => {
                self.consume_transaction_noise();
                TransactionStmtKind::Rollback
            }
        };
        // isolation level and access mode are accepted and ignored
        while !self.at_eof() && !matches!(self.current_kind(), TokenKind::Semicolon) {
            if kind != TransactionStmtKind::Begin {
                return Err(self.error_at_current("syntax error"));
            }
            self.advance();
        }
        Ok(RawStmt::Transaction(kind))
    }
}

#[cfg(test)]
mod tests {
    use crate::nodes::parsenodes::{
        AlterTableCmd, FunctionBody, ObjectType, RawStmt, TableConstraint, TransactionStmtKind,
    };
    use crate::parser::gram::raw_parser;

    fn one(sql: &str) -> RawStmt {
        raw_parser(sql).unwrap().remove(0)
    }

    #[test]
    fn create_table_with_constraints() {
        let RawStmt::Create(stmt) = one(
            "create temp table if not exists t (id int primary key, \
             name varchar(20) not null default 'x', n numeric check (n > 0), unique (name))",
        ) else {
            panic!()
        };
        assert!(stmt.temp && stmt.if_not_exists);
        assert_eq!(stmt.table_elts.len(), 3);
        assert!(stmt.table_elts[0].primary_key && stmt.table_elts[0].not_null);
        assert_eq!(stmt.table_elts[1].type_name.typmods, vec![20]);
        assert!(stmt.table_elts[1].raw_default.is_some());
        assert_eq!(stmt.constraints.len(), 2);
        assert!(matches!(stmt.constraints[1], TableConstraint::Unique { .. }));
    }

    #[test]
    fn create_matview_keeps_query_text() {
        let RawStmt::CreateTableAs(stmt) =
            one("create materialized view mv (a) as select x from t where x > 1 with no data")
        else {
            panic!()
        };
        assert_eq!(stmt.objtype, ObjectType::MatView);
        assert!(stmt.into.skip_data);
        assert_eq!(stmt.into.col_names, vec!["a"]);
        assert_eq!(stmt.query_text, "select x from t where x > 1");

        let RawStmt::CreateTableAs(stmt) = one("create table t2 (a, b) as select 1, 2") else {
            panic!()
        };
        assert_eq!(stmt.objtype, ObjectType::Table);
        assert_eq!(stmt.into.col_names.len(), 2);
    }

    #[test]
    fn refresh_and_index() {
        let RawStmt::RefreshMatView(stmt) = one("refresh materialized view concurrently s.mv")
        else {
            panic!()
        };
        assert!(stmt.concurrent && !stmt.skip_data);
        assert_eq!(stmt.relation.schemaname.as_deref(), Some("s"));

        let RawStmt::Index(stmt) = one("create unique index on mv (a, (b + 1)) where a > 0") else {
            panic!()
        };
        assert!(stmt.unique && stmt.idxname.is_none());
        assert_eq!(stmt.params.len(), 2);
        assert!(stmt.params[1].expr.is_some());
        assert!(stmt.where_clause.is_some());
    }

    #[test]
    fn create_function_forms() {
        let RawStmt::CreateFunction(stmt) = one(
            "create or replace function addone(x int) returns int \
             language sql immutable strict as $$ select x + 1 $$",
        ) else {
            panic!()
        };
        assert!(stmt.replace && stmt.strict);
        assert_eq!(stmt.parameters[0].name.as_deref(), Some("x"));
        assert!(matches!(stmt.body, FunctionBody::Text(ref s) if s.trim() == "select x + 1"));

        let RawStmt::CreateFunction(stmt) =
            one("create function two(double precision, b int default 2) returns setof int return b")
        else {
            panic!()
        };
        assert!(stmt.returns_set);
        assert!(stmt.parameters[0].name.is_none());
        assert!(stmt.parameters[1].defexpr.is_some());
        assert!(matches!(stmt.body, FunctionBody::Atomic(ref s) if s.len() == 1));

        let RawStmt::CreateFunction(stmt) = one(
            "create function f() returns int begin atomic select 1; select 2; end",
        ) else {
            panic!()
        };
        assert!(matches!(stmt.body, FunctionBody::Atomic(ref s) if s.len() == 2));
    }

    #[test]
    fn drop_alter_and_session() {
        let RawStmt::Drop(stmt) = one("drop materialized view if exists a, b cascade") else {
            panic!()
        };
        assert_eq!(stmt.remove_type, ObjectType::MatView);
        assert!(stmt.missing_ok);
        assert_eq!(stmt.objects.len(), 2);

        let RawStmt::AlterTable(stmt) = one("alter table t add column c text, drop column d")
        else {
            panic!()
        };
        assert!(matches!(stmt.cmds[0], AlterTableCmd::AddColumn(_)));
        assert!(matches!(stmt.cmds[1], AlterTableCmd::DropColumn { .. }));

        let RawStmt::VariableSet(stmt) = one("set search_path to a, public") else { panic!() };
        assert_eq!(stmt.value.as_deref(), Some("a, public"));
        assert!(matches!(one("show work_mem"), RawStmt::VariableShow(ref n) if n == "work_mem"));
        assert!(matches!(
            one("start transaction isolation level serializable"),
            RawStmt::Transaction(TransactionStmtKind::Begin)
        ));
        assert!(matches!(one("end"), RawStmt::Transaction(TransactionStmtKind::Commit)));
        assert!(matches!(one("abort"), RawStmt::Transaction(TransactionStmtKind::Rollback)));
    }
}
