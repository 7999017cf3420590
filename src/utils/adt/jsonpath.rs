//! SQL/JSON path language.
//!
//! A path is parsed into a [`JsonPath`] tree whose `Display` form is the
//! canonical `jsonpath` text. [`JsonPathExecutor`] walks a `jsonb` document
//! in lax or strict mode; the `jsonb_path_*` functions and the SQL/JSON query
//! expressions both go through it.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};

use super::cmp::json_number_to_decimal;
use super::json::{decimal_to_json_number, escape_json, json_arg, json_kind};
use crate::nodes::datum::Datum;
use crate::utils::elog::{PgError, PgResult, SqlState};
use crate::utils::fmgr::FunctionCallInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMethod {
    Size,
    Type,
    Double,
}

impl ItemMethod {
    fn name(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Type => "type",
            Self::Double => "double",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    Index(PathNode),
    Range(PathNode, PathNode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathNode {
    Root,
    Current,
    Variable(String),
    Last,
    Literal(Value),
    Member(Box<PathNode>, String),
    AnyMember(Box<PathNode>),
    AnyElement(Box<PathNode>),
    Subscripts(Box<PathNode>, Vec<Subscript>),
    Filter(Box<PathNode>, Box<PathNode>),
    Method(Box<PathNode>, ItemMethod),
    Arith(ArithOp, Box<PathNode>, Box<PathNode>),
    Negate(Box<PathNode>),
    Plus(Box<PathNode>),
    // predicates
    Compare(CmpOp, Box<PathNode>, Box<PathNode>),
    And(Box<PathNode>, Box<PathNode>),
    Or(Box<PathNode>, Box<PathNode>),
    Not(Box<PathNode>),
    Exists(Box<PathNode>),
    IsUnknown(Box<PathNode>),
    StartsWith(Box<PathNode>, Box<PathNode>),
}

impl PathNode {
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Self::Compare(..)
                | Self::And(..)
                | Self::Or(..)
                | Self::Not(_)
                | Self::Exists(_)
                | Self::IsUnknown(_)
                | Self::StartsWith(..)
        )
    }

    fn priority(&self) -> u8 {
        match self {
            Self::Or(..) => 0,
            Self::And(..) => 1,
            Self::Compare(..) | Self::StartsWith(..) => 2,
            Self::Arith(ArithOp::Add | ArithOp::Sub, ..) => 3,
            Self::Arith(..) => 4,
            Self::Negate(_) | Self::Plus(_) => 5,
            _ => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    pub lax: bool,
    pub expr: PathNode,
}

// -- printing ----------------------------------------------------------------

fn print_node(f: &mut fmt::Formatter<'_>, node: &PathNode, brackets: bool) -> fmt::Result {
    let operand = |f: &mut fmt::Formatter<'_>, arg: &PathNode| print_node(f, arg, arg.priority() <= node.priority());
    match node {
        PathNode::Root => f.write_str("$"),
        PathNode::Current => f.write_str("@"),
        PathNode::Last => f.write_str("last"),
        PathNode::Variable(name) => {
            let mut quoted = String::from("$");
            escape_json(&mut quoted, name);
            f.write_str(&quoted)
        }
        PathNode::Literal(Value::String(s)) => {
            let mut quoted = String::new();
            escape_json(&mut quoted, s);
            f.write_str(&quoted)
        }
        PathNode::Literal(other) => write!(f, "{other}"),
        PathNode::Member(base, key) => {
            print_node(f, base, false)?;
            let mut quoted = String::from(".");
            escape_json(&mut quoted, key);
            f.write_str(&quoted)
        }
        PathNode::AnyMember(base) => {
            print_node(f, base, false)?;
            f.write_str(".*")
        }
        PathNode::AnyElement(base) => {
            print_node(f, base, false)?;
            f.write_str("[*]")
        }
        PathNode::Subscripts(base, subscripts) => {
            print_node(f, base, false)?;
            f.write_str("[")?;
            for (idx, subscript) in subscripts.iter().enumerate() {
                if idx > 0 {
                    f.write_str(",")?;
                }
                match subscript {
                    Subscript::Index(index) => print_node(f, index, false)?,
                    Subscript::Range(from, to) => {
                        print_node(f, from, false)?;
                        f.write_str(" to ")?;
                        print_node(f, to, false)?;
                    }
                }
            }
            f.write_str("]")
        }
        PathNode::Filter(base, pred) => {
            print_node(f, base, false)?;
            f.write_str("?(")?;
            print_node(f, pred, false)?;
            f.write_str(")")
        }
        PathNode::Method(base, method) => {
            print_node(f, base, false)?;
            write!(f, ".{}()", method.name())
        }
        PathNode::Negate(arg) | PathNode::Plus(arg) => {
            if brackets {
                f.write_str("(")?;
            }
            f.write_str(if matches!(node, PathNode::Negate(_)) { "-" } else { "+" })?;
            operand(f, arg)?;
            if brackets {
                f.write_str(")")?;
            }
            Ok(())
        }
        PathNode::Arith(_, l, r)
        | PathNode::Compare(_, l, r)
        | PathNode::And(l, r)
        | PathNode::Or(l, r)
        | PathNode::StartsWith(l, r) => {
            let symbol = match node {
                PathNode::Arith(op, ..) => op.symbol(),
                PathNode::Compare(op, ..) => op.symbol(),
                PathNode::And(..) => "&&",
                PathNode::Or(..) => "||",
                _ => "starts with",
            };
            if brackets {
                f.write_str("(")?;
            }
            operand(f, l)?;
            write!(f, " {symbol} ")?;
            operand(f, r)?;
            if brackets {
                f.write_str(")")?;
            }
            Ok(())
        }
        PathNode::Not(arg) => {
            f.write_str("!(")?;
            print_node(f, arg, false)?;
            f.write_str(")")
        }
        PathNode::Exists(arg) => {
            f.write_str("exists (")?;
            print_node(f, arg, false)?;
            f.write_str(")")
        }
        PathNode::IsUnknown(arg) => {
            f.write_str("(")?;
            print_node(f, arg, false)?;
            f.write_str(") is unknown")
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.lax {
            f.write_str("strict ")?;
        }
        print_node(f, &self.expr, true)
    }
}

// -- parsing -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dollar,
    At,
    Var(String),
    Ident(String),
    Str(String),
    Num(String),
    Punct(&'static str),
}

fn path_syntax_error(near: Option<&str>) -> PgError {
    let message = match near {
        Some(text) => format!("syntax error at or near \"{text}\" of jsonpath input"),
        None => "syntax error at end of jsonpath input".to_string(),
    };
    PgError::new(SqlState::SyntaxErrorInJsonPath, message)
}

fn tokenize(input: &str) -> PgResult<Vec<Tok>> {
    const PUNCTS: [&str; 22] = [
        "==", "!=", "<>", "<=", ">=", "&&", "||", "<", ">", "!", ".", "[", "]", "(", ")", ",", "?", "*", "+",
        "-", "/", "%",
    ];
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '"' {
            let (text, next) = lex_string(&chars, i)?;
            tokens.push(Tok::Str(text));
            i = next;
            continue;
        }
        if c == '$' {
            if chars.get(i + 1) == Some(&'"') {
                let (text, next) = lex_string(&chars, i + 1)?;
                tokens.push(Tok::Var(text));
                i = next;
            } else if chars.get(i + 1).is_some_and(|&c| is_ident(c)) {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                tokens.push(Tok::Var(chars[start..i].iter().collect()));
            } else {
                tokens.push(Tok::Dollar);
                i += 1;
            }
            continue;
        }
        if c == '@' {
            tokens.push(Tok::At);
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit) && !matches!(tokens.last(), Some(Tok::Dollar | Tok::At | Tok::Var(_) | Tok::Ident(_) | Tok::Str(_) | Tok::Punct("]" | ")")))) {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if matches!(chars.get(i), Some('e' | 'E')) {
                let mut j = i + 1;
                if matches!(chars.get(j), Some('+' | '-')) {
                    j += 1;
                }
                if chars.get(j).is_some_and(char::is_ascii_digit) {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            tokens.push(Tok::Num(chars[start..i].iter().collect()));
            continue;
        }
        if is_ident(c) {
            let start = i;
            while i < chars.len() && is_ident(chars[i]) {
                i += 1;
            }
            tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(punct) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(path_syntax_error(Some(&c.to_string())));
        };
        tokens.push(Tok::Punct(*punct));
        i += punct.len();
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> PgResult<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let esc = chars.get(i + 1).copied().ok_or_else(|| path_syntax_error(None))?;
                i += 2;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    'u' => {
                        let hex: String = chars.get(i..i + 4).map(|h| h.iter().collect()).unwrap_or_default();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                PgError::new(SqlState::SyntaxErrorInJsonPath, "invalid Unicode escape sequence")
                            })?;
                        out.push(code);
                        i += 4;
                    }
                    other => out.push(other),
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(path_syntax_error(None))
}

struct PathParser {
    tokens: Vec<Tok>,
    pos: usize,
    in_filter: usize,
    in_subscript: usize,
}

impl PathParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn error_here(&self) -> PgError {
        match self.peek() {
            None => path_syntax_error(None),
            Some(tok) => path_syntax_error(Some(&token_text(tok))),
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w.eq_ignore_ascii_case(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> PgResult<()> {
        if self.eat_punct(punct) { Ok(()) } else { Err(self.error_here()) }
    }

    fn parse(mut self) -> PgResult<JsonPath> {
        let mut lax = true;
        if self.eat_ident("strict") {
            lax = false;
        } else {
            self.eat_ident("lax");
        }
        let expr = self.or_expr()?;
        if self.peek().is_some() {
            return Err(self.error_here());
        }
        Ok(JsonPath { lax, expr })
    }

    fn or_expr(&mut self) -> PgResult<PathNode> {
        let mut left = self.and_expr()?;
        while self.eat_punct("||") {
            let right = self.and_expr()?;
            left = PathNode::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PgResult<PathNode> {
        let mut left = self.not_expr()?;
        while self.eat_punct("&&") {
            let right = self.not_expr()?;
            left = PathNode::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> PgResult<PathNode> {
        if self.eat_punct("!") {
            self.expect_punct("(")?;
            let inner = self.or_expr()?;
            self.expect_punct(")")?;
            return Ok(PathNode::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PgResult<PathNode> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Tok::Punct("==")) => Some(CmpOp::Eq),
            Some(Tok::Punct("!=" | "<>")) => Some(CmpOp::Ne),
            Some(Tok::Punct("<")) => Some(CmpOp::Lt),
            Some(Tok::Punct("<=")) => Some(CmpOp::Le),
            Some(Tok::Punct(">")) => Some(CmpOp::Gt),
            Some(Tok::Punct(">=")) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.additive()?;
            return Ok(PathNode::Compare(op, Box::new(left), Box::new(right)));
        }
        if self.eat_ident("starts") {
            if !self.eat_ident("with") {
                return Err(self.error_here());
            }
            let right = self.additive()?;
            return Ok(PathNode::StartsWith(Box::new(left), Box::new(right)));
        }
        if self.eat_ident("like_regex") {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                "like_regex is not supported in jsonpath",
            ));
        }
        Ok(left)
    }

    fn additive(&mut self) -> PgResult<PathNode> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_punct("+") {
                ArithOp::Add
            } else if self.eat_punct("-") {
                ArithOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = PathNode::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> PgResult<PathNode> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_punct("*") {
                ArithOp::Mul
            } else if self.eat_punct("/") {
                ArithOp::Div
            } else if self.eat_punct("%") {
                ArithOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = PathNode::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> PgResult<PathNode> {
        if self.eat_punct("-") {
            let arg = self.unary()?;
            return Ok(match arg {
                PathNode::Literal(Value::Number(n)) => match json_number_to_decimal(&n) {
                    Some(d) => PathNode::Literal(decimal_to_json_number(-d)),
                    None => PathNode::Negate(Box::new(PathNode::Literal(Value::Number(n)))),
                },
                other => PathNode::Negate(Box::new(other)),
            });
        }
        if self.eat_punct("+") {
            let arg = self.unary()?;
            return Ok(match arg {
                literal @ PathNode::Literal(Value::Number(_)) => literal,
                other => PathNode::Plus(Box::new(other)),
            });
        }
        let primary = self.primary()?;
        self.accessors(primary)
    }

    fn primary(&mut self) -> PgResult<PathNode> {
        let Some(tok) = self.next() else {
            return Err(path_syntax_error(None));
        };
        Ok(match tok {
            Tok::Dollar => PathNode::Root,
            Tok::At => {
                if self.in_filter == 0 {
                    return Err(PgError::new(
                        SqlState::SyntaxErrorInJsonPath,
                        "@ is not allowed in root expressions",
                    ));
                }
                PathNode::Current
            }
            Tok::Var(name) => PathNode::Variable(name),
            Tok::Str(s) => PathNode::Literal(Value::String(s)),
            Tok::Num(text) => {
                let value = text
                    .parse::<Decimal>()
                    .ok()
                    .or_else(|| Decimal::from_scientific(&text).ok())
                    .ok_or_else(|| path_syntax_error(Some(&text)))?;
                PathNode::Literal(decimal_to_json_number(value))
            }
            Tok::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "true" => PathNode::Literal(Value::Bool(true)),
                "false" => PathNode::Literal(Value::Bool(false)),
                "null" => PathNode::Literal(Value::Null),
                "last" => {
                    if self.in_subscript == 0 {
                        return Err(PgError::new(
                            SqlState::SyntaxErrorInJsonPath,
                            "LAST is allowed only in array subscripts",
                        ));
                    }
                    PathNode::Last
                }
                "exists" => {
                    self.expect_punct("(")?;
                    let inner = self.or_expr()?;
                    self.expect_punct(")")?;
                    PathNode::Exists(Box::new(inner))
                }
                _ => return Err(path_syntax_error(Some(&word))),
            },
            Tok::Punct("(") => {
                let inner = self.or_expr()?;
                self.expect_punct(")")?;
                if self.eat_ident("is") {
                    if !self.eat_ident("unknown") {
                        return Err(self.error_here());
                    }
                    return Ok(PathNode::IsUnknown(Box::new(inner)));
                }
                inner
            }
            other => return Err(path_syntax_error(Some(&token_text(&other)))),
        })
    }

    fn accessors(&mut self, mut node: PathNode) -> PgResult<PathNode> {
        loop {
            if self.eat_punct(".") {
                node = match self.next() {
                    Some(Tok::Punct("*")) => PathNode::AnyMember(Box::new(node)),
                    Some(Tok::Str(key)) => PathNode::Member(Box::new(node), key),
                    Some(Tok::Ident(word)) => {
                        if self.eat_punct("(") {
                            self.expect_punct(")")?;
                            let method = match word.as_str() {
                                "size" => ItemMethod::Size,
                                "type" => ItemMethod::Type,
                                "double" => ItemMethod::Double,
                                _ => {
                                    return Err(PgError::new(
                                        SqlState::FeatureNotSupported,
                                        format!("jsonpath item method .{word}() is not supported"),
                                    ));
                                }
                            };
                            PathNode::Method(Box::new(node), method)
                        } else {
                            PathNode::Member(Box::new(node), word)
                        }
                    }
                    Some(Tok::Var(name)) => PathNode::Member(Box::new(node), format!("${name}")),
                    Some(other) => return Err(path_syntax_error(Some(&token_text(&other)))),
                    None => return Err(path_syntax_error(None)),
                };
            } else if self.eat_punct("[") {
                if self.eat_punct("*") {
                    self.expect_punct("]")?;
                    node = PathNode::AnyElement(Box::new(node));
                    continue;
                }
                self.in_subscript += 1;
                let mut subscripts = Vec::new();
                loop {
                    let from = self.or_expr()?;
                    if self.eat_ident("to") {
                        let to = self.or_expr()?;
                        subscripts.push(Subscript::Range(from, to));
                    } else {
                        subscripts.push(Subscript::Index(from));
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.in_subscript -= 1;
                self.expect_punct("]")?;
                node = PathNode::Subscripts(Box::new(node), subscripts);
            } else if self.eat_punct("?") {
                self.expect_punct("(")?;
                self.in_filter += 1;
                let pred = self.or_expr()?;
                self.in_filter -= 1;
                self.expect_punct(")")?;
                node = PathNode::Filter(Box::new(node), Box::new(pred));
            } else {
                return Ok(node);
            }
        }
    }
}

fn token_text(tok: &Tok) -> String {
    match tok {
        Tok::Dollar => "$".to_string(),
        Tok::At => "@".to_string(),
        Tok::Var(name) => format!("${name}"),
        Tok::Ident(word) | Tok::Num(word) => word.clone(),
        Tok::Str(s) => format!("\"{s}\""),
        Tok::Punct(p) => (*p).to_string(),
    }
}

/// Parse `jsonpath` text.
pub fn parse_jsonpath(input: &str) -> PgResult<JsonPath> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(path_syntax_error(None));
    }
    PathParser {
        tokens,
        pos: 0,
        in_filter: 0,
        in_subscript: 0,
    }
    .parse()
}

// -- execution ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b { Self::True } else { Self::False }
    }

    fn to_value(self) -> Value {
        match self {
            Self::True => Value::Bool(true),
            Self::False => Value::Bool(false),
            Self::Unknown => Value::Null,
        }
    }
}

fn path_error(state: SqlState, message: impl Into<String>) -> PgError {
    PgError::new(state, message)
}

/// Evaluates one path against one document.
pub struct JsonPathExecutor<'a> {
    lax: bool,
    root: &'a Value,
    vars: &'a Map<String, Value>,
}

impl<'a> JsonPathExecutor<'a> {
    pub fn new(path: &JsonPath, root: &'a Value, vars: &'a Map<String, Value>) -> Self {
        Self {
            lax: path.lax,
            root,
            vars,
        }
    }

    /// All items the path selects.
    pub fn execute(&self, path: &JsonPath) -> PgResult<Vec<Value>> {
        self.eval(&path.expr, None, None)
    }

    fn unwrap_arrays(&self, items: Vec<Value>) -> Vec<Value> {
        if !self.lax {
            return items;
        }
        items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(elements) => elements,
                other => vec![other],
            })
            .collect()
    }

    fn eval(&self, node: &PathNode, current: Option<&Value>, last: Option<i64>) -> PgResult<Vec<Value>> {
        crate::utils::interrupt::check_for_interrupts()?;
        match node {
            PathNode::Root => Ok(vec![self.root.clone()]),
            PathNode::Current => Ok(current.cloned().into_iter().collect()),
            PathNode::Last => match last {
                Some(last) => Ok(vec![Value::from(last)]),
                None => Err(path_error(
                    SqlState::InvalidSqlJsonSubscript,
                    "evaluating jsonpath LAST outside of array subscript",
                )),
            },
            PathNode::Variable(name) => match self.vars.get(name) {
                Some(value) => Ok(vec![value.clone()]),
                None => Err(path_error(
                    SqlState::UndefinedJsonPathVariable,
                    format!("could not find jsonpath variable \"{name}\""),
                )),
            },
            PathNode::Literal(value) => Ok(vec![value.clone()]),
            PathNode::Member(base, key) => {
                let mut out = Vec::new();
                for item in self.eval(base, current, last)? {
                    self.member(&item, key, &mut out, true)?;
                }
                Ok(out)
            }
            PathNode::AnyMember(base) => {
                let mut out = Vec::new();
                for item in self.eval(base, current, last)? {
                    match item {
                        Value::Object(map) => out.extend(map.into_iter().map(|(_, v)| v)),
                        Value::Array(elements) if self.lax => {
                            for element in elements {
                                if let Value::Object(map) = element {
                                    out.extend(map.into_iter().map(|(_, v)| v));
                                }
                            }
                        }
                        _ if self.lax => {}
                        _ => {
                            return Err(path_error(
                                SqlState::SqlJsonObjectNotFound,
                                "jsonpath wildcard member accessor can only be applied to an object",
                            ));
                        }
                    }
                }
                Ok(out)
            }
            PathNode::AnyElement(base) => {
                let mut out = Vec::new();
                for item in self.eval(base, current, last)? {
                    match item {
                        Value::Array(elements) => out.extend(elements),
                        other if self.lax => out.push(other),
                        _ => {
                            return Err(path_error(
                                SqlState::SqlJsonArrayNotFound,
                                "jsonpath wildcard array accessor can only be applied to an array",
                            ));
                        }
                    }
                }
                Ok(out)
            }
            PathNode::Subscripts(base, subscripts) => {
                let mut out = Vec::new();
                for item in self.eval(base, current, last)? {
                    let elements = match item {
                        Value::Array(elements) => elements,
                        other if self.lax => vec![other],
                        _ => {
                            return Err(path_error(
                                SqlState::SqlJsonArrayNotFound,
                                "jsonpath array accessor can only be applied to an array",
                            ));
                        }
                    };
                    let size = elements.len() as i64;
                    for subscript in subscripts {
                        let (from, to) = match subscript {
                            Subscript::Index(index) => {
                                let i = self.subscript_value(index, current, size - 1)?;
                                (i, i)
                            }
                            Subscript::Range(from, to) => (
                                self.subscript_value(from, current, size - 1)?,
                                self.subscript_value(to, current, size - 1)?,
                            ),
                        };
                        if (from < 0 || from > to || to >= size) && !self.lax {
                            return Err(path_error(
                                SqlState::InvalidSqlJsonSubscript,
                                "jsonpath array subscript is out of bounds",
                            ));
                        }
                        let from = from.max(0);
                        let to = to.min(size - 1);
                        let mut index = from;
                        while index <= to {
                            out.push(elements[index as usize].clone());
                            index += 1;
                        }
                    }
                }
                Ok(out)
            }
            PathNode::Filter(base, pred) => {
                let items = self.unwrap_arrays(self.eval(base, current, last)?);
                let mut out = Vec::new();
                for item in items {
                    if self.predicate(pred, Some(&item), last) == Truth::True {
                        out.push(item);
                    }
                }
                Ok(out)
            }
            PathNode::Method(base, method) => {
                let mut out = Vec::new();
                for item in self.eval(base, current, last)? {
                    self.method(*method, item, &mut out)?;
                }
                Ok(out)
            }
            PathNode::Arith(op, l, r) => {
                let left = self.single_numeric(l, current, last, || {
                    format!("left operand of jsonpath operator {} is not a single numeric value", op.symbol())
                })?;
                let right = self.single_numeric(r, current, last, || {
                    format!("right operand of jsonpath operator {} is not a single numeric value", op.symbol())
                })?;
                Ok(vec![arith(*op, left, right)?])
            }
            PathNode::Negate(arg) | PathNode::Plus(arg) => {
                let negate = matches!(node, PathNode::Negate(_));
                let items = self.unwrap_arrays(self.eval(arg, current, last)?);
                items
                    .into_iter()
                    .map(|item| match &item {
                        Value::Number(n) => {
                            let value = json_number_to_decimal(n).unwrap_or_default();
                            Ok(decimal_to_json_number(if negate { -value } else { value }))
                        }
                        _ => Err(path_error(
                            SqlState::NonNumericSqlJsonItem,
                            format!(
                                "operand of unary jsonpath operator {} is not a numeric value",
                                if negate { "-" } else { "+" }
                            ),
                        )),
                    })
                    .collect()
            }
            pred => Ok(vec![self.predicate(pred, current, last).to_value()]),
        }
    }

    fn member(&self, item: &Value, key: &str, out: &mut Vec<Value>, unwrap: bool) -> PgResult<()> {
        match item {
            Value::Object(map) => match map.get(key) {
                Some(value) => out.push(value.clone()),
                None if self.lax => {}
                None => {
                    return Err(path_error(
                        SqlState::SqlJsonMemberNotFound,
                        format!("JSON object does not contain key \"{key}\""),
                    ));
                }
            },
            Value::Array(elements) if self.lax && unwrap => {
                for element in elements {
                    self.member(element, key, out, false)?;
                }
            }
            _ if self.lax => {}
            _ => {
                return Err(path_error(
                    SqlState::SqlJsonMemberNotFound,
                    "jsonpath member accessor can only be applied to an object",
                ));
            }
        }
        Ok(())
    }

    fn method(&self, method: ItemMethod, item: Value, out: &mut Vec<Value>) -> PgResult<()> {
        match method {
            ItemMethod::Type => out.push(Value::String(json_kind(&item).to_string())),
            ItemMethod::Size => match item {
                Value::Array(elements) => out.push(Value::from(elements.len())),
                _ if self.lax => out.push(Value::from(1)),
                _ => {
                    return Err(path_error(
                        SqlState::SqlJsonArrayNotFound,
                        "jsonpath item method .size() can only be applied to an array",
                    ));
                }
            },
            ItemMethod::Double => match item {
                Value::Array(elements) if self.lax => {
                    for element in elements {
                        self.method(method, element, out)?;
                    }
                }
                Value::Number(n) => out.push(Value::Number(n)),
                Value::String(s) => {
                    let parsed = s
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .and_then(serde_json::Number::from_f64)
                        .ok_or_else(|| {
                            path_error(
                                SqlState::NonNumericSqlJsonItem,
                                format!(
                                    "argument \"{s}\" of jsonpath item method .double() is invalid for type double precision"
                                ),
                            )
                        })?;
                    out.push(Value::Number(parsed));
                }
                _ => {
                    return Err(path_error(
                        SqlState::NonNumericSqlJsonItem,
                        "jsonpath item method .double() can only be applied to a string or numeric value",
                    ));
                }
            },
        }
        Ok(())
    }

    fn subscript_value(&self, node: &PathNode, current: Option<&Value>, last: i64) -> PgResult<i64> {
        let items = self.eval(node, current, Some(last))?;
        match items.as_slice() {
            [Value::Number(n)] => json_number_to_decimal(n)
                .and_then(|d| d.trunc().to_i64())
                .ok_or_else(|| {
                    path_error(
                        SqlState::InvalidSqlJsonSubscript,
                        "jsonpath array subscript is out of integer range",
                    )
                }),
            _ => Err(path_error(
                SqlState::InvalidSqlJsonSubscript,
                "jsonpath array subscript is not a single numeric value",
            )),
        }
    }

    fn single_numeric(
        &self,
        node: &PathNode,
        current: Option<&Value>,
        last: Option<i64>,
        message: impl FnOnce() -> String,
    ) -> PgResult<Decimal> {
        let items = self.unwrap_arrays(self.eval(node, current, last)?);
        match items.as_slice() {
            [Value::Number(n)] => json_number_to_decimal(n).ok_or_else(|| {
                path_error(SqlState::NonNumericSqlJsonItem, "jsonpath number is out of range")
            }),
            _ => Err(path_error(SqlState::SingletonSqlJsonItemRequired, message())),
        }
    }

    fn predicate(&self, node: &PathNode, current: Option<&Value>, last: Option<i64>) -> Truth {
        match node {
            PathNode::And(l, r) => match self.predicate(l, current, last) {
                Truth::False => Truth::False,
                left => match (left, self.predicate(r, current, last)) {
                    (_, Truth::False) => Truth::False,
                    (Truth::True, Truth::True) => Truth::True,
                    _ => Truth::Unknown,
                },
            },
            PathNode::Or(l, r) => match self.predicate(l, current, last) {
                Truth::True => Truth::True,
                left => match (left, self.predicate(r, current, last)) {
                    (_, Truth::True) => Truth::True,
                    (Truth::False, Truth::False) => Truth::False,
                    _ => Truth::Unknown,
                },
            },
            PathNode::Not(arg) => match self.predicate(arg, current, last) {
                Truth::True => Truth::False,
                Truth::False => Truth::True,
                Truth::Unknown => Truth::Unknown,
            },
            PathNode::IsUnknown(arg) => Truth::from_bool(self.predicate(arg, current, last) == Truth::Unknown),
            PathNode::Exists(arg) => match self.eval(arg, current, last) {
                Ok(items) => Truth::from_bool(!items.is_empty()),
                Err(_) => Truth::Unknown,
            },
            PathNode::Compare(op, l, r) => self.compare(*op, l, r, current, last),
            PathNode::StartsWith(l, r) => {
                let (Ok(left), Ok(right)) = (self.eval(l, current, last), self.eval(r, current, last)) else {
                    return Truth::Unknown;
                };
                let [Value::String(prefix)] = right.as_slice() else {
                    return Truth::Unknown;
                };
                let mut found = false;
                for item in self.unwrap_arrays(left) {
                    match item {
                        Value::String(s) if s.starts_with(prefix.as_str()) => {
                            found = true;
                            if self.lax {
                                return Truth::True;
                            }
                        }
                        Value::String(_) => {}
                        _ => return Truth::Unknown,
                    }
                }
                Truth::from_bool(found)
            }
            other => match self.eval(other, current, last) {
                Ok(items) => match items.as_slice() {
                    [Value::Bool(b)] => Truth::from_bool(*b),
                    _ => Truth::Unknown,
                },
                Err(_) => Truth::Unknown,
            },
        }
    }

    fn compare(&self, op: CmpOp, l: &PathNode, r: &PathNode, current: Option<&Value>, last: Option<i64>) -> Truth {
        let (Ok(left), Ok(right)) = (self.eval(l, current, last), self.eval(r, current, last)) else {
            return Truth::Unknown;
        };
        let (left, right) = (self.unwrap_arrays(left), self.unwrap_arrays(right));
        let mut found = false;
        let mut error = false;
        for a in &left {
            for b in &right {
                match compare_items(op, a, b) {
                    Truth::True => {
                        if self.lax {
                            return Truth::True;
                        }
                        found = true;
                    }
                    Truth::Unknown => {
                        if !self.lax {
                            return Truth::Unknown;
                        }
                        error = true;
                    }
                    Truth::False => {}
                }
            }
        }
        if found {
            Truth::True
        } else if error {
            Truth::Unknown
        } else {
            Truth::False
        }
    }
}

fn compare_items(op: CmpOp, a: &Value, b: &Value) -> Truth {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) | (_, Value::Null) => return Truth::from_bool(op == CmpOp::Ne),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (json_number_to_decimal(x), json_number_to_decimal(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => return Truth::Unknown,
        },
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        _ => return Truth::Unknown,
    };
    Truth::from_bool(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

fn arith(op: ArithOp, left: Decimal, right: Decimal) -> PgResult<Value> {
    let overflow = || path_error(SqlState::NumericValueOutOfRange, "value out of range for type numeric");
    let result = match op {
        ArithOp::Add => left.checked_add(right),
        ArithOp::Sub => left.checked_sub(right),
        ArithOp::Mul => left.checked_mul(right),
        ArithOp::Div | ArithOp::Mod => {
            if right.is_zero() {
                return Err(PgError::new(SqlState::DivisionByZero, "division by zero"));
            }
            if op == ArithOp::Div {
                left.checked_div(right)
            } else {
                left.checked_rem(right)
            }
        }
    };
    result.map(decimal_to_json_number).ok_or_else(overflow)
}

/// Run `path` over `target`. Errors are swallowed when `silent`.
pub fn execute_jsonpath(
    path: &JsonPath,
    target: &Value,
    vars: &Map<String, Value>,
    silent: bool,
) -> PgResult<Option<Vec<Value>>> {
    match JsonPathExecutor::new(path, target, vars).execute(path) {
        Ok(items) => Ok(Some(items)),
        Err(err) if silent && err.sqlstate != SqlState::QueryCanceled => Ok(None),
        Err(err) => Err(err),
    }
}

/// Unpack `(target, path, vars, silent)` arguments.
fn path_call(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Option<Vec<Value>>> {
    let target = json_arg(fcinfo.arg(0))?;
    let path = parse_jsonpath(fcinfo.arg(1).as_str().unwrap_or_default())?;
    let vars = match fcinfo.arg(2) {
        Datum::Null => Map::new(),
        other => match json_arg(other)? {
            Value::Object(map) => map,
            _ => {
                return Err(PgError::new(
                    SqlState::InvalidParameterValue,
                    "\"vars\" argument is not an object",
                )
                .with_detail(
                    "Jsonpath parameters should be encoded as key-value pairs of \"vars\" object.",
                ));
            }
        },
    };
    let silent = fcinfo.arg(3).as_bool().unwrap_or(false);
    execute_jsonpath(&path, &target, &vars, silent)
}

pub fn jsonb_path_exists(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(path_call(fcinfo)?.map_or(Datum::Null, |items| Datum::Bool(!items.is_empty())))
}

pub fn jsonb_path_match(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let silent = fcinfo.arg(3).as_bool().unwrap_or(false);
    let Some(items) = path_call(fcinfo)? else {
        return Ok(Datum::Null);
    };
    match items.as_slice() {
        [Value::Bool(b)] => Ok(Datum::Bool(*b)),
        [Value::Null] => Ok(Datum::Null),
        _ if silent => Ok(Datum::Null),
        _ => Err(PgError::new(
            SqlState::SingletonSqlJsonItemRequired,
            "single boolean result is expected",
        )),
    }
}

pub fn jsonb_path_query(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    Ok(path_call(fcinfo)?
        .unwrap_or_default()
        .into_iter()
        .map(Datum::Jsonb)
        .collect())
}

pub fn jsonb_path_query_array(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(path_call(fcinfo)?.map_or(Datum::Null, |items| Datum::Jsonb(Value::Array(items))))
}

pub fn jsonb_path_query_first(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(path_call(fcinfo)?
        .and_then(|items| items.into_iter().next())
        .map_or(Datum::Null, Datum::Jsonb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::adt::json::jsonb_parse;

    fn canonical(input: &str) -> String {
        parse_jsonpath(input).unwrap().to_string()
    }

    fn query(path: &str, doc: &str) -> PgResult<Vec<Value>> {
        let path = parse_jsonpath(path)?;
        let doc = jsonb_parse(doc).unwrap();
        let vars = Map::new();
        JsonPathExecutor::new(&path, &doc, &vars).execute(&path)
    }

    #[test]
    fn canonical_text() {
        assert_eq!(canonical("$.a[*] ? (@.b > 1)"), r#"$."a"[*]?(@."b" > 1)"#);
        assert_eq!(canonical("strict $.a"), r#"strict $."a""#);
        assert_eq!(canonical("$.a + 1"), r#"($."a" + 1)"#);
        assert_eq!(canonical("$[1, 2 to last]"), "$[1,2 to last]");
        assert_eq!(canonical("$ ? (@ == 1 && (@ < 3 || @ > 4))"), "$?(@ == 1 && (@ < 3 || @ > 4))");
        assert_eq!(canonical("$.x.size()"), r#"$."x".size()"#);
        assert_eq!(canonical("$var"), r#"$"var""#);
        assert_eq!(canonical("-1"), "-1");
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_jsonpath("$.").unwrap_err().code(), "42601");
        assert_eq!(parse_jsonpath("@.a").unwrap_err().message, "@ is not allowed in root expressions");
        assert_eq!(parse_jsonpath("last").unwrap_err().message, "LAST is allowed only in array subscripts");
    }

    #[test]
    fn lax_mode_unwraps_and_skips() {
        let doc = r#"{"a": [{"b": 1}, {"b": 2}, {"c": 3}]}"#;
        assert_eq!(query("$.a.b", doc).unwrap(), vec![Value::from(1), Value::from(2)]);
        assert_eq!(query("$.zz", doc).unwrap(), Vec::<Value>::new());
        assert_eq!(query("$.a[last].c", doc).unwrap(), vec![Value::from(3)]);
        assert_eq!(query("$.a[*] ? (@.b >= 2).b", doc).unwrap(), vec![Value::from(2)]);
    }

    #[test]
    fn strict_mode_raises_structural_errors() {
        let err = query("strict $.zz", r#"{"a": 1}"#).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::SqlJsonMemberNotFound);
        let err = query("strict $[5]", "[1]").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidSqlJsonSubscript);
    }

    #[test]
    fn predicates_and_arithmetic() {
        assert_eq!(query("$.a == 1", r#"{"a": 1}"#).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(query(r#"$.a == "x""#, r#"{"a": 1}"#).unwrap(), vec![Value::Null]);
        assert_eq!(query("$.a * 2 + 1", r#"{"a": 4}"#).unwrap(), vec![Value::from(9)]);
        assert_eq!(query("$.type()", "[1]").unwrap(), vec![Value::from("array")]);
        assert_eq!(query(r#"$ ? (@ starts with "ab")"#, r#"["abc", "xab"]"#).unwrap(), vec![Value::from("abc")]);
        let err = query("$.a / 0", r#"{"a": 4}"#).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DivisionByZero);
    }

    #[test]
    fn variables_resolve_from_vars() {
        let path = parse_jsonpath("$.a ? (@ > $min)").unwrap();
        let doc = jsonb_parse(r#"{"a": [1, 5, 9]}"#).unwrap();
        let mut vars = Map::new();
        vars.insert("min".to_string(), Value::from(4));
        let items = execute_jsonpath(&path, &doc, &vars, false).unwrap().unwrap();
        assert_eq!(items, vec![Value::from(5), Value::from(9)]);
        let err = execute_jsonpath(&path, &doc, &Map::new(), false);
        assert!(err.is_ok(), "missing variable inside a filter is unknown");
        let bare = parse_jsonpath("$missing").unwrap();
        assert_eq!(
            execute_jsonpath(&bare, &doc, &Map::new(), false).unwrap_err().sqlstate,
            SqlState::UndefinedJsonPathVariable
        );
        assert_eq!(execute_jsonpath(&bare, &doc, &Map::new(), true).unwrap(), None);
    }
}
