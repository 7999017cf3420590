//! Recursive-descent SQL grammar producing raw parse trees.
//!
//! Expressions use precedence climbing; statements are matched by their
//! leading words. Non-reserved words arrive as identifiers and are compared
//! by text (see [`crate::parser::scan`]).

mod ddl;
mod expr;

use crate::nodes::parsenodes::{
    Alias, DeleteStmt, FromItem, InsertStmt, JoinType, RangeVar, RawExpr, RawStmt, ResTarget,
    SelectStmt, SetOperation, SortBy, SortByDir, SortByNulls, UpdateStmt, WindowDef, WithClause,
    WithItem,
};
use crate::nodes::primnodes::SubLinkType;
use crate::parser::scan::{Keyword, Token, TokenKind, scan};
use crate::utils::elog::{PgError, PgResult, syntax_error};

/// Parse a string holding one or more `;`-separated statements.
pub fn raw_parser(sql: &str) -> PgResult<Vec<RawStmt>> {
    let tokens = scan(sql)?;
    let mut parser = Parser::new(sql, tokens);
    let mut stmts = Vec::new();
    loop {
        while parser.consume_if(|k| matches!(k, TokenKind::Semicolon)) {}
        if parser.at_eof() {
            break;
        }
        stmts.push(parser.parse_stmt()?);
        if !parser.at_eof() && !matches!(parser.current_kind(), TokenKind::Semicolon) {
            return Err(parser.error_at_current("syntax error"));
        }
    }
    Ok(stmts)
}

/// Parse a standalone expression, as used for column defaults stored as text.
pub fn parse_expression(text: &str) -> PgResult<RawExpr> {
    let tokens = scan(text)?;
    let mut parser = Parser::new(text, tokens);
    let expr = parser.parse_expr()?;
    if !parser.at_eof() {
        return Err(parser.error_at_current("syntax error"));
    }
    Ok(expr)
}

pub(super) struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    idx: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            idx: 0,
        }
    }

    // -----------------------------------------------------------------------
    // token helpers
    // -----------------------------------------------------------------------

    fn current_kind(&self) -> &TokenKind {
        &self.tokens[self.idx].kind
    }

    fn peek_nth_kind(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.idx + n).min(last)].kind
    }

    fn location(&self) -> Option<usize> {
        Some(self.tokens[self.idx].start)
    }

    /// End offset of the most recently consumed token.
    fn previous_end(&self) -> usize {
        match self.idx.checked_sub(1) {
            Some(prev) => self.tokens[prev].end,
            None => 0,
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
    }

    fn consume_if<F>(&mut self, predicate: F) -> bool
    where
        F: Fn(&TokenKind) -> bool,
    {
        if predicate(self.current_kind()) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_token<F>(&mut self, predicate: F, expected: &str) -> PgResult<()>
    where
        F: Fn(&TokenKind) -> bool,
    {
        if self.consume_if(predicate) {
            return Ok(());
        }
        Err(self.error_at_current(&format!("expected {expected}")))
    }

    fn expect_lparen(&mut self) -> PgResult<()> {
        self.expect_token(|k| matches!(k, TokenKind::LParen), "\"(\"")
    }

    fn expect_rparen(&mut self) -> PgResult<()> {
        self.expect_token(|k| matches!(k, TokenKind::RParen), "\")\"")
    }

    fn consume_comma(&mut self) -> bool {
        self.consume_if(|k| matches!(k, TokenKind::Comma))
    }

    fn peek_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.current_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn peek_nth_keyword(&self, n: usize, keyword: Keyword) -> bool {
        matches!(self.peek_nth_kind(n), TokenKind::Keyword(k) if *k == keyword)
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> bool {
        self.consume_if(|k| matches!(k, TokenKind::Keyword(kw) if *kw == keyword))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> PgResult<()> {
        if self.consume_keyword(keyword) {
            return Ok(());
        }
        Err(self.error_at_current(&format!("expected {}", keyword.text().to_uppercase())))
    }

    /// Non-reserved word, matched case-insensitively by its (already folded)
    /// text. Quoted identifiers never match.
    fn peek_word(&self, word: &str) -> bool {
        matches!(self.current_kind(), TokenKind::Identifier(w) if w == word)
    }

    fn peek_nth_word(&self, n: usize, word: &str) -> bool {
        matches!(self.peek_nth_kind(n), TokenKind::Identifier(w) if w == word)
    }

    fn consume_word(&mut self, word: &str) -> bool {
        if self.peek_word(word) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_word(&mut self, word: &str) -> PgResult<()> {
        if self.consume_word(word) {
            return Ok(());
        }
        Err(self.error_at_current(&format!("expected {}", word.to_uppercase())))
    }

    fn error_at_current(&self, message: &str) -> PgError {
        let token = &self.tokens[self.idx];
        let message = if matches!(token.kind, TokenKind::Eof) {
            format!("{message} at end of input")
        } else {
            format!(
                "{message} at or near \"{}\"",
                &self.source[token.start..token.end]
            )
        };
        syntax_error(message, Some(token.start))
    }

    /// Column or relation name: an identifier or a quoted identifier.
    fn parse_col_id(&mut self) -> PgResult<String> {
        match self.current_kind() {
            TokenKind::Identifier(name) | TokenKind::QuotedIdentifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_at_current("syntax error")),
        }
    }

    /// Any word, reserved or not (attribute names after a dot, labels after AS).
    fn parse_col_label(&mut self) -> PgResult<String> {
        if let TokenKind::Keyword(keyword) = self.current_kind() {
            let text = keyword.text().to_string();
            self.advance();
            return Ok(text);
        }
        self.parse_col_id()
    }

    fn parse_any_name(&mut self) -> PgResult<Vec<String>> {
        let mut names = vec![self.parse_col_id()?];
        while self.consume_if(|k| matches!(k, TokenKind::Dot)) {
            names.push(self.parse_col_label()?);
        }
        Ok(names)
    }

    fn parse_name_list(&mut self) -> PgResult<Vec<String>> {
        let mut names = vec![self.parse_col_id()?];
        while self.consume_comma() {
            names.push(self.parse_col_id()?);
        }
        Ok(names)
    }

    fn parse_paren_name_list(&mut self) -> PgResult<Vec<String>> {
        self.expect_lparen()?;
        let names = self.parse_name_list()?;
        self.expect_rparen()?;
        Ok(names)
    }

    fn parse_qualified_name(&mut self) -> PgResult<RangeVar> {
        let location = self.location();
        let mut names = self.parse_any_name()?;
        let relname = names.pop().unwrap_or_default();
        let schemaname = match names.len() {
            0 => None,
            1 => names.pop(),
            // catalog.schema.rel: the catalog must be the current database
            2 => names.pop(),
            _ => {
                return Err(syntax_error(
                    "improper qualified name (too many dotted names)",
                    location,
                ));
            }
        };
        let mut rv = RangeVar::qualified(schemaname, relname);
        rv.location = location;
        Ok(rv)
    }

    fn starts_select(&self, n: usize) -> bool {
        let mut n = n;
        while matches!(self.peek_nth_kind(n), TokenKind::LParen) {
            n += 1;
        }
        matches!(
            self.peek_nth_kind(n),
            TokenKind::Keyword(Keyword::Select | Keyword::With | Keyword::Table)
        ) || self.peek_nth_word(n, "values")
    }

    // -----------------------------------------------------------------------
    // statements
    // -----------------------------------------------------------------------

    fn parse_stmt(&mut self) -> PgResult<RawStmt> {
        match self.current_kind() {
            TokenKind::Keyword(Keyword::Select | Keyword::Table) | TokenKind::LParen => {
                Ok(RawStmt::Select(self.parse_select_stmt()?))
            }
            TokenKind::Keyword(Keyword::With) => self.parse_with_stmt(),
            TokenKind::Keyword(Keyword::Create) => self.parse_create_stmt(),
            TokenKind::Keyword(Keyword::End) => {
                self.advance();
                self.consume_transaction_noise();
                Ok(RawStmt::Transaction(
                    crate::nodes::parsenodes::TransactionStmtKind::Commit,
                ))
            }
            TokenKind::Identifier(word) => match word.as_str() {
                "values" => Ok(RawStmt::Select(self.parse_select_stmt()?)),
                "insert" => Ok(RawStmt::Insert(self.parse_insert_stmt(None)?)),
                "update" => Ok(RawStmt::Update(self.parse_update_stmt(None)?)),
                "delete" => Ok(RawStmt::Delete(self.parse_delete_stmt(None)?)),
                "drop" => self.parse_drop_stmt(),
                "alter" => self.parse_alter_stmt(),
                "refresh" => self.parse_refresh_stmt(),
                "analyze" | "analyse" => self.parse_analyze_stmt(),
                "set" | "reset" | "show" => self.parse_variable_stmt(),
                "begin" | "start" | "commit" | "rollback" | "abort" => {
                    self.parse_transaction_stmt()
                }
                "return" => {
                    self.advance();
                    Ok(RawStmt::Return(self.parse_expr()?))
                }
                _ => Err(self.error_at_current("syntax error")),
            },
            _ => Err(self.error_at_current("syntax error")),
        }
    }

    fn parse_with_stmt(&mut self) -> PgResult<RawStmt> {
        let with = self.parse_with_clause()?;
        if self.peek_word("insert") {
            return Ok(RawStmt::Insert(self.parse_insert_stmt(Some(with))?));
        }
        if self.peek_word("update") {
            return Ok(RawStmt::Update(self.parse_update_stmt(Some(with))?));
        }
        if self.peek_word("delete") {
            return Ok(RawStmt::Delete(self.parse_delete_stmt(Some(with))?));
        }
        let mut stmt = self.parse_select_body()?;
        if stmt.with_clause.is_some() {
            return Err(syntax_error("multiple WITH clauses not allowed", with.location));
        }
        stmt.with_clause = Some(with);
        Ok(RawStmt::Select(stmt))
    }

    fn parse_with_clause(&mut self) -> PgResult<WithClause> {
        let location = self.location();
        self.expect_keyword(Keyword::With)?;
        let recursive = self.consume_word("recursive");
        let mut ctes = Vec::new();
        loop {
            let item_location = self.location();
            let ctename = self.parse_col_id()?;
            let aliascolnames = if matches!(self.current_kind(), TokenKind::LParen) {
                self.parse_paren_name_list()?
            } else {
                Vec::new()
            };
            self.expect_keyword(Keyword::As)?;
            if self.consume_keyword(Keyword::Not) {
                self.expect_word("materialized")?;
            } else {
                self.consume_word("materialized");
            }
            self.expect_lparen()?;
            let query = self.parse_select_stmt()?;
            self.expect_rparen()?;
            ctes.push(WithItem {
                ctename,
                aliascolnames,
                query: Box::new(query),
                location: item_location,
            });
            if !self.consume_comma() {
                break;
            }
        }
        Ok(WithClause {
            ctes,
            recursive,
            location,
        })
    }

    /// Full SELECT: optional WITH, set operations, ORDER BY and LIMIT.
    fn parse_select_stmt(&mut self) -> PgResult<SelectStmt> {
        if self.peek_keyword(Keyword::With) {
            let with = self.parse_with_clause()?;
            let mut stmt = self.parse_select_body()?;
            if stmt.with_clause.is_some() {
                return Err(syntax_error("multiple WITH clauses not allowed", with.location));
            }
            stmt.with_clause = Some(with);
            return Ok(stmt);
        }
        self.parse_select_body()
    }

    fn parse_select_body(&mut self) -> PgResult<SelectStmt> {
        let mut stmt = self.parse_select_set(0)?;

        let location = self.location();
        if self.consume_keyword(Keyword::Order) {
            self.expect_word("by")?;
            if !stmt.sort_clause.is_empty() {
                return Err(syntax_error("multiple ORDER BY clauses not allowed", location));
            }
            stmt.sort_clause = self.parse_sort_list()?;
        }
        self.parse_limit_clauses(&mut stmt)?;
        if self.peek_keyword(Keyword::For) {
            return Err(PgError::new(
                crate::utils::elog::SqlState::FeatureNotSupported,
                "row-level locking clauses are not supported",
            )
            .at(self.location()));
        }
        Ok(stmt)
    }

    fn parse_limit_clauses(&mut self, stmt: &mut SelectStmt) -> PgResult<()> {
        loop {
            let location = self.location();
            if self.consume_keyword(Keyword::Limit) {
                if stmt.limit_count.is_some() {
                    return Err(syntax_error("multiple LIMIT clauses not allowed", location));
                }
                stmt.limit_count = Some(if self.peek_keyword(Keyword::All) {
                    let location = self.location();
                    self.advance();
                    RawExpr::AConst {
                        value: crate::nodes::parsenodes::AConstValue::Null,
                        location,
                    }
                } else {
                    self.parse_expr()?
                });
                if self.consume_comma() {
                    return Err(syntax_error(
                        "LIMIT #,# syntax is not supported",
                        location,
                    )
                    .with_hint("Use separate LIMIT and OFFSET clauses."));
                }
            } else if self.consume_keyword(Keyword::Offset) {
                if stmt.limit_offset.is_some() {
                    return Err(syntax_error("multiple OFFSET clauses not allowed", location));
                }
                stmt.limit_offset = Some(self.parse_expr_bp(expr::BP_ADD)?);
                if !self.consume_word("row") {
                    self.consume_word("rows");
                }
            } else if self.consume_keyword(Keyword::Fetch) {
                if stmt.limit_count.is_some() {
                    return Err(syntax_error("multiple LIMIT clauses not allowed", location));
                }
                if !self.consume_word("first") {
                    self.expect_word("next")?;
                }
                let count = if self.peek_word("row") || self.peek_word("rows") {
                    RawExpr::AConst {
                        value: crate::nodes::parsenodes::AConstValue::Integer(1),
                        location: self.location(),
                    }
                } else {
                    self.parse_expr_bp(expr::BP_ADD)?
                };
                if !self.consume_word("row") {
                    self.expect_word("rows")?;
                }
                if !self.consume_keyword(Keyword::Only) {
                    self.expect_keyword(Keyword::With)?;
                    self.expect_word("ties")?;
                    return Err(PgError::new(
                        crate::utils::elog::SqlState::FeatureNotSupported,
                        "WITH TIES is not supported",
                    )
                    .at(location));
                }
                stmt.limit_count = Some(count);
            } else {
                return Ok(());
            }
        }
    }

    /// Set-operation tree; INTERSECT binds tighter than UNION and EXCEPT.
    fn parse_select_set(&mut self, min_bp: u8) -> PgResult<SelectStmt> {
        let mut left = self.parse_select_primary()?;
        loop {
            let (op, l_bp) = match self.current_kind() {
                TokenKind::Keyword(Keyword::Union) => (SetOperation::Union, 1),
                TokenKind::Keyword(Keyword::Except) => (SetOperation::Except, 1),
                TokenKind::Keyword(Keyword::Intersect) => (SetOperation::Intersect, 3),
                _ => break,
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let all = self.consume_keyword(Keyword::All);
            if !all {
                self.consume_keyword(Keyword::Distinct);
            }
            let right = self.parse_select_set(l_bp + 1)?;
            left = SelectStmt {
                op,
                all,
                larg: Some(Box::new(left)),
                rarg: Some(Box::new(right)),
                ..SelectStmt::default()
            };
        }
        Ok(left)
    }

    fn parse_select_primary(&mut self) -> PgResult<SelectStmt> {
        match self.current_kind() {
            TokenKind::LParen => {
                self.advance();
                let stmt = self.parse_select_stmt()?;
                self.expect_rparen()?;
                Ok(stmt)
            }
            TokenKind::Keyword(Keyword::Select) => self.parse_simple_select(),
            TokenKind::Keyword(Keyword::Table) => {
                let location = self.location();
                self.advance();
                self.consume_keyword(Keyword::Only);
                let relation = self.parse_qualified_name()?;
                Ok(SelectStmt {
                    target_list: vec![ResTarget {
                        name: None,
                        indirection: Vec::new(),
                        val: Some(RawExpr::ColumnRef {
                            fields: vec![crate::nodes::parsenodes::ColumnRefField::Star],
                            location,
                        }),
                        location,
                    }],
                    from_clause: vec![FromItem::RangeVar(relation)],
                    ..SelectStmt::default()
                })
            }
            TokenKind::Identifier(word) if word == "values" => self.parse_values_clause(),
            _ => Err(self.error_at_current("syntax error")),
        }
    }

    fn parse_values_clause(&mut self) -> PgResult<SelectStmt> {
        self.expect_word("values")?;
        let mut values_lists = Vec::new();
        loop {
            self.expect_lparen()?;
            values_lists.push(self.parse_expr_list()?);
            self.expect_rparen()?;
            if !self.consume_comma() {
                break;
            }
        }
        Ok(SelectStmt {
            values_lists,
            ..SelectStmt::default()
        })
    }

    fn parse_simple_select(&mut self) -> PgResult<SelectStmt> {
        self.expect_keyword(Keyword::Select)?;
        let mut stmt = SelectStmt::default();

        if self.consume_keyword(Keyword::Distinct) {
            if self.consume_keyword(Keyword::On) {
                self.expect_lparen()?;
                stmt.distinct_clause = Some(self.parse_expr_list()?);
                self.expect_rparen()?;
            } else {
                stmt.distinct_clause = Some(Vec::new());
            }
        } else {
            self.consume_keyword(Keyword::All);
        }

        if !self.at_select_clause_end() {
            stmt.target_list = self.parse_target_list()?;
        }
        if self.peek_keyword(Keyword::Into) {
            return Err(PgError::new(
                crate::utils::elog::SqlState::FeatureNotSupported,
                "SELECT ... INTO is not supported",
            )
            .with_hint("Use CREATE TABLE ... AS instead.")
            .at(self.location()));
        }
        if self.consume_keyword(Keyword::From) {
            stmt.from_clause = self.parse_from_list()?;
        }
        if self.consume_keyword(Keyword::Where) {
            stmt.where_clause = Some(self.parse_expr()?);
        }
        if self.consume_keyword(Keyword::Group) {
            self.expect_word("by")?;
            if !self.consume_keyword(Keyword::All) {
                self.consume_keyword(Keyword::Distinct);
            }
            stmt.group_clause = self.parse_group_list()?;
        }
        if self.consume_keyword(Keyword::Having) {
            stmt.having_clause = Some(self.parse_expr()?);
        }
        if self.consume_keyword(Keyword::Window) {
            loop {
                let location = self.location();
                let name = self.parse_col_id()?;
                self.expect_keyword(Keyword::As)?;
                let mut def = self.parse_window_spec()?;
                def.name = Some(name);
                def.location = location;
                stmt.window_clause.push(def);
                if !self.consume_comma() {
                    break;
                }
            }
        }
        Ok(stmt)
    }

    fn at_select_clause_end(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Eof
                | TokenKind::Semicolon
                | TokenKind::RParen
                | TokenKind::Keyword(
                    Keyword::From
                        | Keyword::Where
                        | Keyword::Group
                        | Keyword::Having
                        | Keyword::Window
                        | Keyword::Order
                        | Keyword::Limit
                        | Keyword::Offset
                        | Keyword::Fetch
                        | Keyword::Union
                        | Keyword::Intersect
                        | Keyword::Except
                )
        )
    }

    fn parse_group_list(&mut self) -> PgResult<Vec<RawExpr>> {
        let mut items = Vec::new();
        loop {
            if matches!(self.current_kind(), TokenKind::LParen)
                && matches!(self.peek_nth_kind(1), TokenKind::RParen)
            {
                // `()`: the empty grouping set, a single group over all rows.
                self.advance();
                self.advance();
            } else if self.peek_word("rollup") || self.peek_word("cube") {
                return Err(PgError::new(
                    crate::utils::elog::SqlState::FeatureNotSupported,
                    "ROLLUP and CUBE are not supported",
                )
                .at(self.location()));
            } else {
                items.push(self.parse_expr()?);
            }
            if !self.consume_comma() {
                return Ok(items);
            }
        }
    }

    pub(super) fn parse_target_list(&mut self) -> PgResult<Vec<ResTarget>> {
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_target_el()?);
            if !self.consume_comma() {
                return Ok(targets);
            }
        }
    }

    fn parse_target_el(&mut self) -> PgResult<ResTarget> {
        let location = self.location();
        if matches!(self.current_kind(), TokenKind::Star) {
            self.advance();
            return Ok(ResTarget {
                name: None,
                indirection: Vec::new(),
                val: Some(RawExpr::ColumnRef {
                    fields: vec![crate::nodes::parsenodes::ColumnRefField::Star],
                    location,
                }),
                location,
            });
        }
        let val = self.parse_expr()?;
        let name = if self.consume_keyword(Keyword::As) {
            Some(self.parse_col_label()?)
        } else if matches!(
            self.current_kind(),
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
        ) {
            Some(self.parse_col_id()?)
        } else {
            None
        };
        Ok(ResTarget {
            name,
            indirection: Vec::new(),
            val: Some(val),
            location,
        })
    }

    pub(super) fn parse_sort_list(&mut self) -> PgResult<Vec<SortBy>> {
        let mut items = Vec::new();
        loop {
            let location = self.location();
            let node = self.parse_expr()?;
            let dir = if self.consume_keyword(Keyword::Asc) {
                SortByDir::Asc
            } else if self.consume_keyword(Keyword::Desc) {
                SortByDir::Desc
            } else if self.consume_keyword(Keyword::Using) {
                match self.current_kind() {
                    TokenKind::Less => {
                        self.advance();
                        SortByDir::Asc
                    }
                    TokenKind::Greater => {
                        self.advance();
                        SortByDir::Desc
                    }
                    _ => {
                        return Err(PgError::new(
                            crate::utils::elog::SqlState::FeatureNotSupported,
                            "ORDER BY USING supports only < and >",
                        )
                        .at(self.location()));
                    }
                }
            } else {
                SortByDir::Default
            };
            let nulls = if self.consume_word("nulls") {
                if self.consume_word("first") {
                    SortByNulls::First
                } else {
                    self.expect_word("last")?;
                    SortByNulls::Last
                }
            } else {
                SortByNulls::Default
            };
            items.push(SortBy {
                node,
                dir,
                nulls,
                location,
            });
            if !self.consume_comma() {
                return Ok(items);
            }
        }
    }

    // -----------------------------------------------------------------------
    // FROM clause
    // -----------------------------------------------------------------------

    pub(super) fn parse_from_list(&mut self) -> PgResult<Vec<FromItem>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_table_ref()?);
            if !self.consume_comma() {
                return Ok(items);
            }
        }
    }

    fn parse_table_ref(&mut self) -> PgResult<FromItem> {
        let mut left = self.parse_table_primary()?;
        loop {
            let location = self.location();
            if self.consume_keyword(Keyword::Cross) {
                self.expect_keyword(Keyword::Join)?;
                let right = self.parse_table_primary()?;
                left = FromItem::Join {
                    jointype: JoinType::Inner,
                    is_natural: false,
                    larg: Box::new(left),
                    rarg: Box::new(right),
                    using_clause: Vec::new(),
                    join_using_alias: None,
                    quals: None,
                    alias: None,
                    location,
                };
                continue;
            }
            let is_natural = self.consume_keyword(Keyword::Natural);
            let jointype = match self.current_kind() {
                TokenKind::Keyword(Keyword::Join) => JoinType::Inner,
                TokenKind::Keyword(Keyword::Inner) => {
                    self.advance();
                    JoinType::Inner
                }
                TokenKind::Keyword(Keyword::Left) => {
                    self.advance();
                    self.consume_keyword(Keyword::Outer);
                    JoinType::Left
                }
                TokenKind::Keyword(Keyword::Right) => {
                    self.advance();
                    self.consume_keyword(Keyword::Outer);
                    JoinType::Right
                }
                TokenKind::Keyword(Keyword::Full) => {
                    self.advance();
                    self.consume_keyword(Keyword::Outer);
                    JoinType::Full
                }
                _ if is_natural => return Err(self.error_at_current("syntax error")),
                _ => return Ok(left),
            };
            self.expect_keyword(Keyword::Join)?;
            let right = self.parse_table_primary()?;
            let mut using_clause = Vec::new();
            let mut join_using_alias = None;
            let mut quals = None;
            if !is_natural {
                if self.consume_keyword(Keyword::On) {
                    quals = Some(Box::new(self.parse_expr()?));
                } else if self.consume_keyword(Keyword::Using) {
                    using_clause = self.parse_paren_name_list()?;
                    if self.consume_keyword(Keyword::As) {
                        join_using_alias = Some(Alias::new(self.parse_col_id()?));
                    }
                } else {
                    return Err(self.error_at_current("syntax error"));
                }
            }
            left = FromItem::Join {
                jointype,
                is_natural,
                larg: Box::new(left),
                rarg: Box::new(right),
                using_clause,
                join_using_alias,
                quals,
                alias: None,
                location,
            };
        }
    }

    fn parse_table_primary(&mut self) -> PgResult<FromItem> {
        let location = self.location();
        let lateral = self.consume_keyword(Keyword::Lateral);

        if matches!(self.current_kind(), TokenKind::LParen) {
            if self.starts_select(1) {
                self.advance();
                let subquery = self.parse_select_stmt()?;
                self.expect_rparen()?;
                let alias = self.parse_opt_alias(&[])?;
                return Ok(FromItem::RangeSubselect {
                    lateral,
                    subquery: Box::new(subquery),
                    alias,
                    location,
                });
            }
            if lateral {
                return Err(self.error_at_current("syntax error"));
            }
            self.advance();
            let mut inner = self.parse_table_ref()?;
            self.expect_rparen()?;
            if let Some(alias) = self.parse_opt_alias(&[])? {
                match &mut inner {
                    FromItem::Join { alias: slot, .. } => *slot = Some(alias),
                    _ => {
                        return Err(syntax_error(
                            "alias on a parenthesized table reference must follow a join",
                            location,
                        ));
                    }
                }
            }
            return Ok(inner);
        }

        if self.peek_word("json_table") && matches!(self.peek_nth_kind(1), TokenKind::LParen) {
            let mut table = self.parse_json_table()?;
            table.lateral = lateral;
            table.alias = self.parse_opt_alias(&[])?;
            return Ok(FromItem::JsonTable(Box::new(table)));
        }

        let inh = !self.consume_keyword(Keyword::Only);
        let name_start = self.idx;
        let names = self.parse_any_name()?;
        if matches!(self.current_kind(), TokenKind::LParen) {
            self.idx = name_start;
            let function = self.parse_func_expr_windowless()?;
            let ordinality = if self.peek_keyword(Keyword::With) && self.peek_nth_word(1, "ordinality")
            {
                self.advance();
                self.advance();
                true
            } else {
                false
            };
            let alias = self.parse_opt_alias(&[])?;
            return Ok(FromItem::RangeFunction {
                lateral,
                ordinality,
                function: Box::new(function),
                alias,
                location,
            });
        }
        if lateral {
            return Err(syntax_error("syntax error at or near \"LATERAL\"", location));
        }
        let mut rv = self.range_var_from_names(names, location)?;
        rv.inh = inh;
        rv.alias = self.parse_opt_alias(&[])?;
        Ok(FromItem::RangeVar(rv))
    }

    fn range_var_from_names(
        &self,
        mut names: Vec<String>,
        location: Option<usize>,
    ) -> PgResult<RangeVar> {
        if names.len() > 3 {
            return Err(syntax_error(
                "improper qualified name (too many dotted names)",
                location,
            ));
        }
        let relname = names.pop().unwrap_or_default();
        let mut rv = RangeVar::qualified(names.pop(), relname);
        rv.location = location;
        Ok(rv)
    }

    /// `[AS] alias [(colnames)]`. Bare aliases must not be one of `exclude`.
    pub(super) fn parse_opt_alias(&mut self, exclude: &[&str]) -> PgResult<Option<Alias>> {
        let aliasname = if self.consume_keyword(Keyword::As) {
            self.parse_col_id()?
        } else {
            match self.current_kind() {
                TokenKind::Identifier(word) if !exclude.contains(&word.as_str()) => {
                    self.parse_col_id()?
                }
                TokenKind::QuotedIdentifier(_) => self.parse_col_id()?,
                _ => return Ok(None),
            }
        };
        let colnames = if matches!(self.current_kind(), TokenKind::LParen) {
            self.parse_paren_name_list()?
        } else {
            Vec::new()
        };
        Ok(Some(Alias {
            aliasname,
            colnames,
        }))
    }

    // -----------------------------------------------------------------------
    // INSERT / UPDATE / DELETE
    // -----------------------------------------------------------------------

    fn parse_insert_stmt(&mut self, with_clause: Option<WithClause>) -> PgResult<InsertStmt> {
        self.expect_word("insert")?;
        self.expect_keyword(Keyword::Into)?;
        let mut relation = self.parse_qualified_name()?;
        if self.consume_keyword(Keyword::As) {
            relation.alias = Some(Alias::new(self.parse_col_id()?));
        }

        let mut cols = Vec::new();
        if matches!(self.current_kind(), TokenKind::LParen) && !self.starts_select(1) {
            self.advance();
            loop {
                let location = self.location();
                let name = self.parse_col_id()?;
                let indirection = self.parse_opt_indirection()?;
                cols.push(ResTarget {
                    name: Some(name),
                    indirection,
                    val: None,
                    location,
                });
                if !self.consume_comma() {
                    break;
                }
            }
            self.expect_rparen()?;
        }

        let select_stmt = if self.consume_keyword(Keyword::Default) {
            self.expect_word("values")?;
            None
        } else {
            if self.peek_word("overriding") {
                return Err(PgError::new(
                    crate::utils::elog::SqlState::FeatureNotSupported,
                    "OVERRIDING is not supported",
                )
                .at(self.location()));
            }
            Some(Box::new(self.parse_select_stmt()?))
        };
        if self.peek_keyword(Keyword::On) && self.peek_nth_word(1, "conflict") {
            return Err(PgError::new(
                crate::utils::elog::SqlState::FeatureNotSupported,
                "ON CONFLICT is not supported",
            )
            .at(self.location()));
        }
        let returning_list = self.parse_returning()?;
        Ok(InsertStmt {
            relation,
            cols,
            select_stmt,
            returning_list,
            with_clause,
        })
    }

    fn parse_update_stmt(&mut self, with_clause: Option<WithClause>) -> PgResult<UpdateStmt> {
        self.expect_word("update")?;
        let inh = !self.consume_keyword(Keyword::Only);
        let mut relation = self.parse_qualified_name()?;
        relation.inh = inh;
        relation.alias = self
            .parse_opt_alias(&["set"])?
            .map(|alias| Alias::new(alias.aliasname));
        self.expect_word("set")?;
        let target_list = self.parse_set_clause_list()?;
        let from_clause = if self.consume_keyword(Keyword::From) {
            self.parse_from_list()?
        } else {
            Vec::new()
        };
        let where_clause = self.parse_where_or_current()?;
        let returning_list = self.parse_returning()?;
        Ok(UpdateStmt {
            relation,
            target_list,
            from_clause,
            where_clause,
            returning_list,
            with_clause,
        })
    }

    fn parse_delete_stmt(&mut self, with_clause: Option<WithClause>) -> PgResult<DeleteStmt> {
        self.expect_word("delete")?;
        self.expect_keyword(Keyword::From)?;
        let inh = !self.consume_keyword(Keyword::Only);
        let mut relation = self.parse_qualified_name()?;
        relation.inh = inh;
        relation.alias = self
            .parse_opt_alias(&[])?
            .map(|alias| Alias::new(alias.aliasname));
        let using_clause = if self.consume_keyword(Keyword::Using) {
            self.parse_from_list()?
        } else {
            Vec::new()
        };
        let where_clause = self.parse_where_or_current()?;
        let returning_list = self.parse_returning()?;
        Ok(DeleteStmt {
            relation,
            using_clause,
            where_clause,
            returning_list,
            with_clause,
        })
    }

    fn parse_where_or_current(&mut self) -> PgResult<Option<RawExpr>> {
        if !self.consume_keyword(Keyword::Where) {
            return Ok(None);
        }
        if self.peek_word("current") && self.peek_nth_word(1, "of") {
            return Err(PgError::new(
                crate::utils::elog::SqlState::FeatureNotSupported,
                "WHERE CURRENT OF is not supported",
            )
            .at(self.location()));
        }
        Ok(Some(self.parse_expr()?))
    }

    fn parse_returning(&mut self) -> PgResult<Vec<ResTarget>> {
        if self.consume_keyword(Keyword::Returning) {
            self.parse_target_list()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_set_clause_list(&mut self) -> PgResult<Vec<ResTarget>> {
        let mut targets = Vec::new();
        loop {
            if matches!(self.current_kind(), TokenKind::LParen) {
                self.parse_multi_assignment(&mut targets)?;
            } else {
                let location = self.location();
                let name = self.parse_col_id()?;
                let indirection = self.parse_opt_indirection()?;
                self.expect_token(|k| matches!(k, TokenKind::Equal), "\"=\"")?;
                let val = self.parse_expr()?;
                targets.push(ResTarget {
                    name: Some(name),
                    indirection,
                    val: Some(val),
                    location,
                });
            }
            if !self.consume_comma() {
                return Ok(targets);
            }
        }
    }

    /// `(a, b[1], c) = source`: one target per column, each pointing at the
    /// shared source.
    fn parse_multi_assignment(&mut self, targets: &mut Vec<ResTarget>) -> PgResult<()> {
        self.expect_lparen()?;
        let mut columns = Vec::new();
        loop {
            let location = self.location();
            let name = self.parse_col_id()?;
            let indirection = self.parse_opt_indirection()?;
            columns.push((name, indirection, location));
            if !self.consume_comma() {
                break;
            }
        }
        self.expect_rparen()?;
        self.expect_token(|k| matches!(k, TokenKind::Equal), "\"=\"")?;

        let source_location = self.location();
        let source = if matches!(self.current_kind(), TokenKind::LParen) && self.starts_select(1) {
            self.advance();
            let subselect = self.parse_select_stmt()?;
            self.expect_rparen()?;
            RawExpr::SubLink {
                sub_link_type: SubLinkType::Expr,
                testexpr: None,
                oper_name: Vec::new(),
                subselect: Box::new(subselect),
                location: source_location,
            }
        } else {
            let expr = self.parse_expr()?;
            match expr {
                RawExpr::RowExpr { .. } => expr,
                // `(a) = (1)`: a single column needs no row.
                other if columns.len() == 1 => other,
                _ => {
                    return Err(syntax_error(
                        "source for a multiple-column UPDATE item must be a sub-SELECT or ROW() expression",
                        source_location,
                    ));
                }
            }
        };

        let ncolumns = columns.len();
        if ncolumns == 1 && !matches!(source, RawExpr::SubLink { .. } | RawExpr::RowExpr { .. })
        {
            let (name, indirection, location) = columns.remove(0);
            targets.push(ResTarget {
                name: Some(name),
                indirection,
                val: Some(source),
                location,
            });
            return Ok(());
        }
        for (i, (name, indirection, location)) in columns.into_iter().enumerate() {
            targets.push(ResTarget {
                name: Some(name),
                indirection,
                val: Some(RawExpr::MultiAssignRef {
                    source: Box::new(source.clone()),
                    colno: i + 1,
                    ncolumns,
                }),
                location,
            });
        }
        Ok(())
    }

    pub(super) fn parse_window_spec(&mut self) -> PgResult<WindowDef> {
        let location = self.location();
        self.expect_lparen()?;
        let mut def = WindowDef {
            name: None,
            refname: None,
            partition_clause: Vec::new(),
            order_clause: Vec::new(),
            frame_options: Default::default(),
            start_offset: None,
            end_offset: None,
            location,
        };
        if let TokenKind::Identifier(word) | TokenKind::QuotedIdentifier(word) =
            self.current_kind()
            && !matches!(word.as_str(), "partition" | "rows" | "range" | "groups")
        {
            def.refname = Some(self.parse_col_id()?);
        }
        if self.consume_word("partition") {
            self.expect_word("by")?;
            def.partition_clause = self.parse_expr_list()?;
        }
        if self.consume_keyword(Keyword::Order) {
            self.expect_word("by")?;
            def.order_clause = self.parse_sort_list()?;
        }
        if self.peek_word("rows") || self.peek_word("range") || self.peek_word("groups") {
            self.parse_frame_clause(&mut def)?;
        }
        self.expect_rparen()?;
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::parsenodes::{AConstValue, AExprKind, ColumnRefField, Indirection};

    fn one(sql: &str) -> RawStmt {
        let mut stmts = raw_parser(sql).unwrap();
        assert_eq!(stmts.len(), 1, "{sql}");
        stmts.remove(0)
    }

    fn select(sql: &str) -> SelectStmt {
        match one(sql) {
            RawStmt::Select(stmt) => stmt,
            other => panic!("not a select: {other:?}"),
        }
    }

    #[test]
    fn splits_statements() {
        let stmts = raw_parser("select 1; ; select 2;").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(raw_parser("").unwrap().is_empty());
    }

    #[test]
    fn simple_select_clauses() {
        let stmt = select(
            "select distinct on (a) a, b as bee, c cee from t where a > 1 \
             group by a, b having count(*) > 1 order by 1 desc nulls first limit 5 offset 2",
        );
        assert_eq!(stmt.distinct_clause.as_ref().map(Vec::len), Some(1));
        assert_eq!(stmt.target_list.len(), 3);
        assert_eq!(stmt.target_list[1].name.as_deref(), Some("bee"));
        assert_eq!(stmt.target_list[2].name.as_deref(), Some("cee"));
        assert_eq!(stmt.group_clause.len(), 2);
        assert!(stmt.having_clause.is_some());
        assert_eq!(stmt.sort_clause[0].dir, SortByDir::Desc);
        assert_eq!(stmt.sort_clause[0].nulls, SortByNulls::First);
        assert!(stmt.limit_count.is_some() && stmt.limit_offset.is_some());
    }

    #[test]
    fn set_operation_precedence() {
        let stmt = select("select 1 union select 2 intersect select 3 order by 1");
        assert_eq!(stmt.op, SetOperation::Union);
        assert_eq!(stmt.rarg.as_ref().map(|r| r.op), Some(SetOperation::Intersect));
        assert_eq!(stmt.sort_clause.len(), 1);
    }

    #[test]
    fn joins_and_subselects() {
        let stmt = select(
            "select * from a left join b using (id) cross join c, \
             lateral (select 1) s(x), generate_series(1, 3) with ordinality g",
        );
        assert_eq!(stmt.from_clause.len(), 3);
        match &stmt.from_clause[0] {
            FromItem::Join { jointype, larg, .. } => {
                assert_eq!(*jointype, JoinType::Inner);
                assert!(matches!(
                    larg.as_ref(),
                    FromItem::Join {
                        jointype: JoinType::Left,
                        ..
                    }
                ));
            }
            other => panic!("{other:?}"),
        }
        match &stmt.from_clause[1] {
            FromItem::RangeSubselect { lateral, alias, .. } => {
                assert!(*lateral);
                assert_eq!(alias.as_ref().map(|a| a.colnames.len()), Some(1));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(
            &stmt.from_clause[2],
            FromItem::RangeFunction {
                ordinality: true,
                ..
            }
        ));
    }

    #[test]
    fn values_lists() {
        let stmt = select("values (1, 'a'), (2, default)");
        assert_eq!(stmt.values_lists.len(), 2);
        assert!(matches!(stmt.values_lists[1][1], RawExpr::SetToDefault { .. }));
    }

    #[test]
    fn update_with_multi_assignment() {
        let RawStmt::Update(stmt) = one("update t as x set (a, b) = (1, 2), c[1] = 3 where id = 1 returning *")
        else {
            panic!("not an update");
        };
        assert_eq!(stmt.relation.alias.as_ref().map(|a| a.aliasname.as_str()), Some("x"));
        assert_eq!(stmt.target_list.len(), 3);
        assert!(matches!(
            stmt.target_list[1].val,
            Some(RawExpr::MultiAssignRef {
                colno: 2,
                ncolumns: 2,
                ..
            })
        ));
        assert!(matches!(
            stmt.target_list[2].indirection[0],
            Indirection::Subscript { is_slice: false, .. }
        ));
        assert_eq!(stmt.returning_list.len(), 1);
    }

    #[test]
    fn insert_and_delete() {
        let RawStmt::Insert(stmt) = one("insert into s.t (a, b) values (1, 2) returning a") else {
            panic!("not an insert");
        };
        assert_eq!(stmt.relation.schemaname.as_deref(), Some("s"));
        assert_eq!(stmt.cols.len(), 2);
        assert!(stmt.select_stmt.is_some());

        let RawStmt::Insert(stmt) = one("insert into t default values") else {
            panic!("not an insert");
        };
        assert!(stmt.select_stmt.is_none());

        let RawStmt::Delete(stmt) = one("delete from t using u where t.id = u.id") else {
            panic!("not a delete");
        };
        assert_eq!(stmt.using_clause.len(), 1);
    }

    #[test]
    fn with_clause_on_select() {
        let stmt = select("with x(a) as (select 1) select a from x");
        let with = stmt.with_clause.unwrap();
        assert_eq!(with.ctes[0].ctename, "x");
        assert_eq!(with.ctes[0].aliascolnames, vec!["a".to_string()]);
    }

    #[test]
    fn limit_all_is_null() {
        let stmt = select("select 1 limit all");
        assert!(matches!(
            stmt.limit_count,
            Some(RawExpr::AConst {
                value: AConstValue::Null,
                ..
            })
        ));
    }

    #[test]
    fn in_list_and_star() {
        let stmt = select("select t.* from t where x in (1, 2)");
        assert!(matches!(
            &stmt.target_list[0].val,
            Some(RawExpr::ColumnRef { fields, .. }) if fields[1] == ColumnRefField::Star
        ));
        assert!(matches!(
            stmt.where_clause,
            Some(RawExpr::AExpr {
                kind: AExprKind::In,
                ..
            })
        ));
    }

    #[test]
    fn errors_carry_position() {
        let err = raw_parser("select from where").unwrap_err();
        assert_eq!(err.position, Some(12));
        assert!(err.message.contains("\"where\""));
    }
}
