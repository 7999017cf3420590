//! SQL scanner.
//!
//! Only reserved words become [`Keyword`] tokens. Every other word, including
//! the many non-reserved keywords of the grammar (`over`, `filter`, `refresh`,
//! `json` ...), stays a [`TokenKind::Identifier`] and is matched by text, so
//! those words remain usable as column and table names.

use crate::parser::scansup::{downcase_truncate_identifier, scanner_isspace, truncate_identifier};
use crate::utils::elog::{PgResult, syntax_error};

macro_rules! keywords {
    ($($variant:ident => $text:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Keyword {
            $($variant,)*
        }

        impl Keyword {
            fn from_ident(ident: &str) -> Option<Self> {
                match ident {
                    $($text => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn text(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                }
            }
        }
    };
}

keywords! {
    All => "all",
    And => "and",
    Any => "any",
    Array => "array",
    As => "as",
    Asc => "asc",
    Case => "case",
    Cast => "cast",
    Check => "check",
    Collate => "collate",
    Column => "column",
    Constraint => "constraint",
    Create => "create",
    Cross => "cross",
    CurrentCatalog => "current_catalog",
    CurrentDate => "current_date",
    CurrentRole => "current_role",
    CurrentSchema => "current_schema",
    CurrentTimestamp => "current_timestamp",
    CurrentUser => "current_user",
    Default => "default",
    Desc => "desc",
    Distinct => "distinct",
    Do => "do",
    Else => "else",
    End => "end",
    Except => "except",
    False => "false",
    Fetch => "fetch",
    For => "for",
    Foreign => "foreign",
    From => "from",
    Full => "full",
    Grant => "grant",
    Group => "group",
    Having => "having",
    ILike => "ilike",
    In => "in",
    Inner => "inner",
    Intersect => "intersect",
    Into => "into",
    Is => "is",
    Join => "join",
    Lateral => "lateral",
    Left => "left",
    Like => "like",
    Limit => "limit",
    LocalTimestamp => "localtimestamp",
    Natural => "natural",
    Not => "not",
    Null => "null",
    Offset => "offset",
    On => "on",
    Only => "only",
    Or => "or",
    Order => "order",
    Outer => "outer",
    Primary => "primary",
    References => "references",
    Returning => "returning",
    Right => "right",
    Select => "select",
    SessionUser => "session_user",
    Similar => "similar",
    Some => "some",
    Symmetric => "symmetric",
    Table => "table",
    Then => "then",
    To => "to",
    True => "true",
    Union => "union",
    Unique => "unique",
    User => "user",
    Using => "using",
    Variadic => "variadic",
    When => "when",
    Where => "where",
    Window => "window",
    With => "with",
}

/// True when `ident` is a reserved word, which must be quoted to be used as
/// a name.
pub fn is_reserved_word(ident: &str) -> bool {
    Keyword::from_ident(ident).is_some()
}

impl Keyword {
    /// Reserved words that may still name a function (`left(s, 2)`).
    pub fn is_type_func_name(self) -> bool {
        matches!(
            self,
            Self::Left
                | Self::Right
                | Self::Full
                | Self::Inner
                | Self::Join
                | Self::Natural
                | Self::Cross
                | Self::Like
                | Self::ILike
                | Self::Is
                | Self::Outer
                | Self::Similar
                | Self::CurrentSchema
                | Self::Collate
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Keyword(Keyword),
    Identifier(String),
    /// `"Quoted"` identifier: never a keyword, case preserved.
    QuotedIdentifier(String),
    String(String),
    Integer(i64),
    Float(String),
    Parameter(i32),
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Semicolon,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Less,
    Greater,
    Equal,
    Typecast,
    DotDot,
    ColonEquals,
    EqualsGreater,
    LessEquals,
    GreaterEquals,
    NotEquals,
    Operator(String),
}

impl TokenKind {
    /// Operator spelling for tokens usable as a binary or prefix operator.
    pub fn operator_text(&self) -> Option<&str> {
        Some(match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Caret => "^",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Equal => "=",
            Self::LessEquals => "<=",
            Self::GreaterEquals => ">=",
            Self::NotEquals => "<>",
            Self::Operator(op) => op,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

/// Split `input` into tokens. The last token is always [`TokenKind::Eof`].
pub fn scan(input: &str) -> PgResult<Vec<Token>> {
    Scanner::new(input).scan_all()
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn scan_all(mut self) -> PgResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.input.len() {
                out.push(Token {
                    kind: TokenKind::Eof,
                    start: self.pos,
                    end: self.pos,
                });
                break;
            }
            out.push(self.next_token()?);
        }
        Ok(out)
    }

    fn next_token(&mut self) -> PgResult<Token> {
        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(self.mk(start, TokenKind::Eof));
        };

        if matches!(ch, 'e' | 'E') && self.peek_nth_char(1) == Some('\'') {
            self.advance_char();
            return self.scan_quoted_string(start, true);
        }
        if matches!(ch, 'n' | 'N') && self.peek_nth_char(1) == Some('\'') {
            self.advance_char();
            return self.scan_quoted_string(start, false);
        }

        for (text, kind) in [
            ("::", TokenKind::Typecast),
            ("..", TokenKind::DotDot),
            (":=", TokenKind::ColonEquals),
        ] {
            if self.starts_with(text) {
                self.pos += 2;
                return Ok(self.mk(start, kind));
            }
        }

        match ch {
            '\'' => self.scan_quoted_string(start, false),
            '"' => self.scan_quoted_identifier(start),
            '$' => self.scan_parameter_or_dollar_quote(start),
            '.' if self.peek_nth_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number(start, true)
            }
            c if c.is_ascii_digit() => self.scan_number(start, false),
            c if is_ident_start(c) => self.scan_identifier_or_keyword(start),
            ',' | '(' | ')' | '[' | ']' | ';' | ':' | '.' => {
                self.pos += 1;
                let kind = match ch {
                    ',' => TokenKind::Comma,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ';' => TokenKind::Semicolon,
                    ':' => TokenKind::Colon,
                    _ => TokenKind::Dot,
                };
                Ok(self.mk(start, kind))
            }
            c if is_operator_char(c) => self.scan_operator(start),
            _ => Err(syntax_error(
                format!("syntax error at or near \"{ch}\""),
                Some(start),
            )),
        }
    }

    fn mk(&self, start: usize, kind: TokenKind) -> Token {
        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn scan_quoted_string(&mut self, start: usize, backslash_escapes: bool) -> PgResult<Token> {
        self.advance_char();
        let mut out = String::new();
        loop {
            let Some(c) = self.advance_char() else {
                return Err(syntax_error("unterminated quoted string", Some(start)));
            };
            if c == '\'' {
                if self.peek_char() == Some('\'') {
                    self.advance_char();
                    out.push('\'');
                    continue;
                }
                // Adjacent literals separated by a newline concatenate.
                let save = self.pos;
                let mut saw_newline = false;
                while let Some(ws) = self.peek_char().filter(|c| scanner_isspace(*c)) {
                    saw_newline |= ws == '\n' || ws == '\r';
                    self.advance_char();
                }
                if saw_newline && self.peek_char() == Some('\'') {
                    self.advance_char();
                    continue;
                }
                self.pos = save;
                break;
            }
            if backslash_escapes && c == '\\' {
                let Some(next) = self.advance_char() else {
                    return Err(syntax_error("unterminated quoted string", Some(start)));
                };
                out.push(match next {
                    'b' => '\u{0008}',
                    'f' => '\u{000c}',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
                continue;
            }
            out.push(c);
        }
        Ok(self.mk(start, TokenKind::String(out)))
    }

    fn scan_quoted_identifier(&mut self, start: usize) -> PgResult<Token> {
        self.advance_char();
        let mut out = String::new();
        loop {
            let Some(c) = self.advance_char() else {
                return Err(syntax_error("unterminated quoted identifier", Some(start)));
            };
            if c == '"' {
                if self.peek_char() == Some('"') {
                    self.advance_char();
                    out.push('"');
                    continue;
                }
                break;
            }
            out.push(c);
        }
        if out.is_empty() {
            return Err(syntax_error("zero-length delimited identifier", Some(start)));
        }
        truncate_identifier(&mut out, true);
        Ok(self.mk(start, TokenKind::QuotedIdentifier(out)))
    }

    fn scan_parameter_or_dollar_quote(&mut self, start: usize) -> PgResult<Token> {
        self.advance_char();
        if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            let digits_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance_char();
            }
            let value = self.input[digits_start..self.pos]
                .parse::<i32>()
                .map_err(|_| syntax_error("parameter number too large", Some(start)))?;
            return Ok(self.mk(start, TokenKind::Parameter(value)));
        }

        let tag_start = self.pos;
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance_char();
        }
        if self.peek_char() == Some('$') {
            self.advance_char();
            let delimiter = format!("${}$", &self.input[tag_start..self.pos - 1]);
            let body_start = self.pos;
            let Some(offset) = self.input[body_start..].find(&delimiter) else {
                return Err(syntax_error("unterminated dollar-quoted string", Some(start)));
            };
            let body = self.input[body_start..body_start + offset].to_string();
            self.pos = body_start + offset + delimiter.len();
            return Ok(self.mk(start, TokenKind::String(body)));
        }
        Err(syntax_error("syntax error at or near \"$\"", Some(start)))
    }

    fn scan_number(&mut self, start: usize, leading_dot: bool) -> PgResult<Token> {
        if leading_dot {
            self.advance_char();
            let digit_start = self.pos;
            while self.peek_char().is_some_and(is_dec_digit_or_underscore) {
                self.advance_char();
            }
            let mut text = format!(".{}", &self.input[digit_start..self.pos]);
            self.consume_exponent(&mut text)?;
            return Ok(self.mk(start, TokenKind::Float(text.replace('_', ""))));
        }

        for (prefix, radix, message) in [
            ("0x", 16, "invalid hexadecimal integer"),
            ("0o", 8, "invalid octal integer"),
            ("0b", 2, "invalid binary integer"),
        ] {
            if self.input[self.pos..]
                .get(..2)
                .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
            {
                return self.scan_radix_integer(start, radix, message);
            }
        }

        let int_start = self.pos;
        while self.peek_char().is_some_and(is_dec_digit_or_underscore) {
            self.advance_char();
        }
        let mut text = self.input[int_start..self.pos].to_string();
        let mut is_float = false;

        if self.peek_char() == Some('.') && !self.starts_with("..") {
            is_float = true;
            self.advance_char();
            text.push('.');
            let frac_start = self.pos;
            while self.peek_char().is_some_and(is_dec_digit_or_underscore) {
                self.advance_char();
            }
            text.push_str(&self.input[frac_start..self.pos]);
        }
        if self.peek_char().is_some_and(|c| c == 'e' || c == 'E') {
            is_float = true;
            self.consume_exponent(&mut text)?;
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(syntax_error("trailing junk after numeric literal", Some(start)));
        }

        let sanitized = text.replace('_', "");
        if is_float {
            return Ok(self.mk(start, TokenKind::Float(sanitized)));
        }
        // Integers beyond int8 range become numeric literals.
        Ok(match sanitized.parse::<i64>() {
            Ok(value) => self.mk(start, TokenKind::Integer(value)),
            Err(_) => self.mk(start, TokenKind::Float(sanitized)),
        })
    }

    fn scan_radix_integer(&mut self, start: usize, radix: u32, message: &str) -> PgResult<Token> {
        self.pos += 2;
        let digits_start = self.pos;
        while self
            .peek_char()
            .is_some_and(|c| c == '_' || c.is_digit(radix))
        {
            self.advance_char();
        }
        let raw = &self.input[digits_start..self.pos];
        if raw.is_empty() || raw.starts_with('_') || self.peek_char().is_some_and(is_ident_start) {
            return Err(syntax_error(message, Some(start)));
        }
        let value = i64::from_str_radix(&raw.replace('_', ""), radix)
            .map_err(|_| syntax_error("integer literal out of range", Some(start)))?;
        Ok(self.mk(start, TokenKind::Integer(value)))
    }

    fn consume_exponent(&mut self, text: &mut String) -> PgResult<()> {
        let Some(c) = self.peek_char().filter(|c| *c == 'e' || *c == 'E') else {
            return Ok(());
        };
        self.advance_char();
        text.push(c);
        if let Some(sign) = self.peek_char().filter(|s| *s == '+' || *s == '-') {
            self.advance_char();
            text.push(sign);
        }
        let digit_start = self.pos;
        while self.peek_char().is_some_and(is_dec_digit_or_underscore) {
            self.advance_char();
        }
        if digit_start == self.pos {
            return Err(syntax_error("trailing junk after numeric literal", Some(self.pos)));
        }
        text.push_str(&self.input[digit_start..self.pos]);
        Ok(())
    }

    fn scan_identifier_or_keyword(&mut self, start: usize) -> PgResult<Token> {
        self.advance_char();
        while self.peek_char().is_some_and(is_ident_cont) {
            self.advance_char();
        }
        let normalized = downcase_truncate_identifier(&self.input[start..self.pos], true);
        if let Some(kw) = Keyword::from_ident(&normalized) {
            return Ok(self.mk(start, TokenKind::Keyword(kw)));
        }
        Ok(self.mk(start, TokenKind::Identifier(normalized)))
    }

    fn scan_operator(&mut self, start: usize) -> PgResult<Token> {
        while let Some(c) = self.peek_char() {
            if !is_operator_char(c) || (self.pos > start && (self.starts_with("/*") || self.starts_with("--"))) {
                break;
            }
            self.advance_char();
        }

        // A multi-character operator ending in + or - is only allowed when it
        // also contains a character that cannot start an SQL-standard operator.
        let mut op = self.input[start..self.pos].to_string();
        if op.len() > 1 && (op.ends_with('+') || op.ends_with('-')) {
            let has_non_sql = op[..op.len() - 1]
                .chars()
                .any(|c| matches!(c, '~' | '!' | '@' | '#' | '^' | '&' | '|' | '`' | '?' | '%'));
            if !has_non_sql {
                while op.len() > 1 && (op.ends_with('+') || op.ends_with('-')) {
                    op.pop();
                    self.pos -= 1;
                }
            }
        }

        let kind = match op.as_str() {
            "=" => TokenKind::Equal,
            "<" => TokenKind::Less,
            ">" => TokenKind::Greater,
            "+" => TokenKind::Plus,
            "-" => TokenKind::Minus,
            "*" => TokenKind::Star,
            "/" => TokenKind::Slash,
            "%" => TokenKind::Percent,
            "^" => TokenKind::Caret,
            "<=" => TokenKind::LessEquals,
            ">=" => TokenKind::GreaterEquals,
            "<>" | "!=" => TokenKind::NotEquals,
            "=>" => TokenKind::EqualsGreater,
            _ => TokenKind::Operator(op),
        };
        Ok(self.mk(start, kind))
    }

    fn skip_whitespace_and_comments(&mut self) -> PgResult<()> {
        loop {
            let before = self.pos;
            while self.peek_char().is_some_and(scanner_isspace) {
                self.advance_char();
            }
            if self.starts_with("--") {
                match self.input[self.pos..].find(['\n', '\r']) {
                    Some(offset) => self.pos += offset + 1,
                    None => self.pos = self.input.len(),
                }
            } else if self.starts_with("/*") {
                self.skip_block_comment()?;
            }
            if self.pos == before {
                return Ok(());
            }
        }
    }

    fn skip_block_comment(&mut self) -> PgResult<()> {
        let comment_start = self.pos;
        self.pos += 2;
        let mut depth = 1usize;
        while self.pos < self.input.len() {
            if self.starts_with("/*") {
                depth += 1;
                self.pos += 2;
            } else if self.starts_with("*/") {
                depth -= 1;
                self.pos += 2;
                if depth == 0 {
                    return Ok(());
                }
            } else {
                self.advance_char();
            }
        }
        Err(syntax_error("unterminated /* comment", Some(comment_start)))
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_nth_char(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    fn advance_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

fn is_ident_cont(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '$'
}

fn is_dec_digit_or_underscore(c: char) -> bool {
    c.is_ascii_digit() || c == '_'
}

fn is_operator_char(c: char) -> bool {
    matches!(
        c,
        '~' | '!' | '@' | '#' | '^' | '&' | '|' | '`' | '?' | '+' | '-' | '*' | '/' | '%' | '<' | '>' | '='
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        scan(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn reserved_words_only_become_keywords() {
        let tokens = kinds("SELECT Foo, \"Bar\" AS over FROM tbl WHERE x >= 10");
        assert_eq!(tokens[0], TokenKind::Keyword(Keyword::Select));
        assert_eq!(tokens[1], TokenKind::Identifier("foo".into()));
        assert_eq!(tokens[3], TokenKind::QuotedIdentifier("Bar".into()));
        assert_eq!(tokens[5], TokenKind::Identifier("over".into()));
        assert!(tokens.contains(&TokenKind::GreaterEquals));
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn strings_and_dollar_quotes() {
        let tokens = kinds("'a''b' E'x\\ty' $$ SELECT $1 $$ $fn$body$fn$");
        assert_eq!(tokens[0], TokenKind::String("a'b".into()));
        assert_eq!(tokens[1], TokenKind::String("x\ty".into()));
        assert_eq!(tokens[2], TokenKind::String(" SELECT $1 ".into()));
        assert_eq!(tokens[3], TokenKind::String("body".into()));
    }

    #[test]
    fn numbers_and_parameters() {
        let tokens = kinds("1..10 1.5e3 $2 0x1F 99999999999999999999");
        assert_eq!(tokens[0], TokenKind::Integer(1));
        assert_eq!(tokens[1], TokenKind::DotDot);
        assert_eq!(tokens[2], TokenKind::Integer(10));
        assert_eq!(tokens[3], TokenKind::Float("1.5e3".into()));
        assert_eq!(tokens[4], TokenKind::Parameter(2));
        assert_eq!(tokens[5], TokenKind::Integer(31));
        assert_eq!(tokens[6], TokenKind::Float("99999999999999999999".into()));
    }

    #[test]
    fn nested_comments_and_operators() {
        let tokens = kinds("a /* x /* y */ z */ ->> b || c *= d=-1");
        assert_eq!(tokens[1], TokenKind::Operator("->>".into()));
        assert_eq!(tokens[3], TokenKind::Operator("||".into()));
        assert_eq!(tokens[5], TokenKind::Operator("*=".into()));
        assert_eq!(tokens[7], TokenKind::Equal);
        assert_eq!(tokens[8], TokenKind::Minus);
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = scan("SELECT 'abc").unwrap_err();
        assert_eq!(err.position, Some(7));
        assert!(err.message.contains("unterminated quoted string"));
    }
}
