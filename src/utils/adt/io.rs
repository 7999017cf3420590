//! Text input and output of every builtin type, plus the function-based
//! scalar casts and length-coercion functions.
//!
//! Input dispatches on the base type of the target; arrays and composites
//! recurse into their element or column types. Output needs only the value.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::datetime;
use super::float::{float_datum, float_to_int, float4in, float4out, float8in, float8out};
use super::int_arithmetic::int_datum;
use super::json;
use super::jsonpath;
use super::math_functions::{apply_numeric_typmod, numeric_from_f64, numeric_to_f64};
use crate::catalog::oid::Oid;
use crate::catalog::pg_type::*;
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::datum::{ArrayValue, Datum, ItemPointer};
use crate::parser::scansup::truncate_identifier;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

fn invalid_syntax(typname: &str, input: &str) -> PgError {
    PgError::new(
        SqlState::InvalidTextRepresentation,
        format!("invalid input syntax for type {typname}: \"{input}\""),
    )
}

/// Convert the text form of a value of `typid` into a datum.
pub fn datum_in(catalog: &Catalog, typid: Oid, typmod: i32, input: &str) -> PgResult<Datum> {
    let (base, base_typmod) = catalog.base_type_and_typmod(typid, typmod);
    let typmod = if typmod >= 0 { typmod } else { base_typmod };
    match base {
        BOOLOID => bool_in(input).map(Datum::Bool),
        INT2OID => int_in(input, "smallint").and_then(|v| int_datum_in(v, INT2OID, input, "smallint")),
        INT4OID => int_in(input, "integer").and_then(|v| int_datum_in(v, INT4OID, input, "integer")),
        INT8OID => int_in(input, "bigint").map(Datum::Int8),
        FLOAT4OID => float4in(input).map(Datum::Float4),
        FLOAT8OID => float8in(input).map(Datum::Float8),
        NUMERICOID => numeric_in(input).and_then(|v| apply_numeric_typmod(v, typmod).map(Datum::Numeric)),
        TEXTOID | UNKNOWNOID | CSTRINGOID => Ok(Datum::text(input)),
        VARCHAROID => varchar_input(input, typmod, false),
        BPCHAROID => bpchar_input(input, typmod, false),
        NAMEOID => Ok(Datum::Text(name_in(input))),
        BYTEAOID => bytea_in(input).map(Datum::Bytea),
        OIDOID => oid_in(input).map(Datum::Oid),
        TIDOID => tid_in(input).map(Datum::Tid),
        DATEOID => datetime::date_in(input).map(Datum::Date),
        TIMESTAMPOID => datetime::timestamp_in(input).map(Datum::Timestamp),
        TIMESTAMPTZOID => datetime::timestamptz_in(input).map(Datum::TimestampTz),
        JSONOID => json::json_validate(input).map(|()| Datum::Json(input.to_string())),
        JSONBOID => json::jsonb_parse(input).map(Datum::Jsonb),
        JSONPATHOID => jsonpath::parse_jsonpath(input).map(|path| Datum::JsonPath(path.to_string())),
        RECORDOID => Err(PgError::new(
            SqlState::FeatureNotSupported,
            "input of anonymous composite types is not implemented",
        )),
        _ => {
            if let Some(elemtype) = catalog.element_type_of(base) {
                return array_in(catalog, input, elemtype, typmod);
            }
            if catalog.is_composite_type(base) {
                return record_in(catalog, input, base);
            }
            Err(elog(format!(
                "no input function available for type {}",
                catalog.format_type(typid)
            )))
        }
    }
}

/// Text form of a datum. `Null` has no text form and yields an empty string.
pub fn datum_out(value: &Datum) -> String {
    match value {
        Datum::Null => String::new(),
        Datum::Bool(v) => if *v { "t" } else { "f" }.to_string(),
        Datum::Int2(v) => v.to_string(),
        Datum::Int4(v) => v.to_string(),
        Datum::Int8(v) => v.to_string(),
        Datum::Float4(v) => float4out(*v),
        Datum::Float8(v) => float8out(*v),
        Datum::Numeric(v) => v.to_string(),
        Datum::Text(v) | Datum::Json(v) | Datum::JsonPath(v) => v.clone(),
        Datum::Bytea(v) => bytea_out(v),
        Datum::Oid(v) => v.to_string(),
        Datum::Tid(v) => v.to_string(),
        Datum::Date(v) => datetime::date_out(*v),
        Datum::Timestamp(v) => datetime::timestamp_out(*v),
        Datum::TimestampTz(v) => datetime::timestamptz_out(*v),
        Datum::Jsonb(v) => json::jsonb_to_text(v),
        Datum::Array(v) => array_out(v),
        Datum::Record(v) => record_out(&v.values),
    }
}

// -- scalars ----------------------------------------------------------------

pub fn bool_in(input: &str) -> PgResult<bool> {
    let text = input.trim().to_ascii_lowercase();
    let matches_prefix = |word: &str, min: usize| text.len() >= min && word.starts_with(text.as_str());
    if matches_prefix("true", 1) || matches_prefix("yes", 1) || text == "on" || text == "1" {
        return Ok(true);
    }
    if matches_prefix("false", 1) || matches_prefix("no", 1) || matches_prefix("off", 2) || text == "0" {
        return Ok(false);
    }
    Err(invalid_syntax("boolean", input))
}

fn int_in(input: &str, typname: &str) -> PgResult<i64> {
    let text = input.trim();
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit() || b == b'_') {
        return Err(invalid_syntax(typname, input));
    }
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<i64>().map_err(|_| {
        PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("value \"{input}\" is out of range for type {typname}"),
        )
    })
}

fn int_datum_in(value: i64, typid: Oid, input: &str, typname: &str) -> PgResult<Datum> {
    int_datum(value, typid).map_err(|_| {
        PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("value \"{input}\" is out of range for type {typname}"),
        )
    })
}

/// Significant digits a numeric value can carry.
const NUMERIC_MAX_PRECISION: i64 = 28;

fn numeric_overflow() -> PgError {
    PgError::new(SqlState::NumericValueOutOfRange, "value overflows numeric format")
}

fn numeric_inexact(input: &str) -> PgError {
    PgError::new(
        SqlState::NumericValueOutOfRange,
        format!("value \"{input}\" cannot be represented exactly as numeric"),
    )
    .with_detail(format!("A numeric value holds at most {NUMERIC_MAX_PRECISION} fractional digits."))
}

/// Parse a numeric literal exactly. Values whose digits do not fit fail with
/// 22003; nothing is rounded.
pub fn numeric_in(input: &str) -> PgResult<Decimal> {
    let text = input.trim();
    if text.eq_ignore_ascii_case("nan") || text.to_ascii_lowercase().ends_with("infinity") {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("numeric value \"{text}\" is not supported"),
        ));
    }
    let syntax = || invalid_syntax("numeric", input);
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (negative, unsigned) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(syntax());
            }
            (mantissa, exp.parse::<i64>().map_err(|_| numeric_overflow())?)
        }
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(syntax());
    }

    // significant digits, with the decimal point `point` places from their start
    let joined = format!("{int_part}{frac_part}");
    let leading = joined.bytes().take_while(|b| *b == b'0').count();
    let digits = joined[leading..].trim_end_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let point = (int_part.len() as i64 - leading as i64)
        .checked_add(exponent)
        .ok_or_else(numeric_overflow)?;
    let ndigits = digits.len() as i64;
    if point > NUMERIC_MAX_PRECISION + 1 {
        return Err(numeric_overflow());
    }
    if ndigits - point > NUMERIC_MAX_PRECISION {
        return Err(numeric_inexact(text));
    }

    let mut plain = String::with_capacity(digits.len() + 32);
    if negative {
        plain.push('-');
    }
    if point <= 0 {
        plain.push_str("0.");
        plain.extend(std::iter::repeat_n('0', (-point) as usize));
        plain.push_str(digits);
    } else if point >= ndigits {
        plain.push_str(digits);
        plain.extend(std::iter::repeat_n('0', (point - ndigits) as usize));
    } else {
        let (whole, fraction) = digits.split_at(point as usize);
        plain.push_str(whole);
        plain.push('.');
        plain.push_str(fraction);
    }
    let mut value = Decimal::from_str_exact(&plain).map_err(|_| {
        if point > 0 && ndigits <= point {
            numeric_overflow()
        } else {
            numeric_inexact(text)
        }
    })?;
    // keep the written scale: 1.50 stays 1.50
    let display_scale = (frac_part.len() as i64 - exponent).max(0);
    if display_scale > i64::from(value.scale()) && point.max(0) + display_scale <= NUMERIC_MAX_PRECISION {
        value.rescale(display_scale as u32);
    }
    Ok(value)
}

fn oid_in(input: &str) -> PgResult<Oid> {
    let text = input.trim();
    match text.parse::<i64>() {
        Ok(v) if (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&v) => Ok(v as u32),
        Ok(_) => Err(PgError::new(
            SqlState::NumericValueOutOfRange,
            format!("value \"{input}\" is out of range for type oid"),
        )),
        Err(_) => Err(invalid_syntax("oid", input)),
    }
}

fn tid_in(input: &str) -> PgResult<ItemPointer> {
    let bad = || invalid_syntax("tid", input);
    let inner = input
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (block, offset) = inner.split_once(',').ok_or_else(bad)?;
    Ok(ItemPointer {
        block: block.trim().parse().map_err(|_| bad())?,
        offset: offset.trim().parse().map_err(|_| bad())?,
    })
}

fn name_in(input: &str) -> String {
    let mut name = input.to_string();
    truncate_identifier(&mut name, false);
    name
}

// -- bytea ------------------------------------------------------------------

pub fn bytea_in(input: &str) -> PgResult<Vec<u8>> {
    if let Some(hex) = input.strip_prefix("\\x") {
        let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(PgError::new(
                SqlState::InvalidTextRepresentation,
                "invalid hexadecimal data: odd number of digits",
            ));
        }
        return digits
            .chunks(2)
            .map(|pair| {
                let text = std::str::from_utf8(pair).unwrap_or("");
                u8::from_str_radix(text, 16).map_err(|_| {
                    PgError::new(
                        SqlState::InvalidTextRepresentation,
                        format!("invalid hexadecimal digit: \"{}\"", text.chars().next().unwrap_or('?')),
                    )
                })
            })
            .collect();
    }
    // Escape format: `\\` and `\ooo` octal escapes.
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
        } else if bytes.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else if i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
            && bytes[i + 1] <= b'3'
        {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            return Err(invalid_syntax("bytea", input));
        }
    }
    Ok(out)
}

pub fn bytea_out(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// -- character types ----------------------------------------------------------

fn length_limit(typmod: i32) -> Option<usize> {
    (typmod >= 4).then(|| (typmod - 4) as usize)
}

fn too_long(typname: &str, limit: usize) -> PgError {
    PgError::new(
        SqlState::StringDataRightTruncation,
        format!("value too long for type {typname}({limit})"),
    )
}

/// Cut `value` to `limit` characters. Implicit coercions may only drop
/// trailing spaces.
fn truncate_chars(value: &str, limit: usize, explicit: bool, typname: &str) -> PgResult<String> {
    let Some((cut, _)) = value.char_indices().nth(limit) else {
        return Ok(value.to_string());
    };
    if !explicit && !value[cut..].chars().all(|c| c == ' ') {
        return Err(too_long(typname, limit));
    }
    Ok(value[..cut].to_string())
}

fn varchar_input(value: &str, typmod: i32, explicit: bool) -> PgResult<Datum> {
    match length_limit(typmod) {
        Some(limit) => truncate_chars(value, limit, explicit, "character varying").map(Datum::Text),
        None => Ok(Datum::text(value)),
    }
}

fn bpchar_input(value: &str, typmod: i32, explicit: bool) -> PgResult<Datum> {
    let Some(limit) = length_limit(typmod) else {
        return Ok(Datum::text(value));
    };
    let mut out = truncate_chars(value, limit, explicit, "character")?;
    let len = out.chars().count();
    out.extend(std::iter::repeat_n(' ', limit - len));
    Ok(Datum::Text(out))
}

fn typmod_args(fcinfo: &FunctionCallInfo<'_>) -> (i32, bool) {
    let typmod = fcinfo.arg(1).as_i64().unwrap_or(-1) as i32;
    let explicit = fcinfo.arg(2).as_bool().unwrap_or(false);
    (typmod, explicit)
}

/// `varchar(varchar, int4, bool)`: length coercion.
pub fn varchar_typmod(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (typmod, explicit) = typmod_args(fcinfo);
    match fcinfo.arg(0) {
        Datum::Text(value) => varchar_input(value, typmod, explicit),
        other => Ok(other.clone()),
    }
}

/// `bpchar(bpchar, int4, bool)`: length coercion with blank padding.
pub fn bpchar_typmod(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (typmod, explicit) = typmod_args(fcinfo);
    match fcinfo.arg(0) {
        Datum::Text(value) => bpchar_input(value, typmod, explicit),
        other => Ok(other.clone()),
    }
}

/// `numeric(numeric, int4)`: precision/scale coercion.
pub fn numeric_typmod(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let typmod = fcinfo.arg(1).as_i64().unwrap_or(-1) as i32;
    match fcinfo.arg(0) {
        Datum::Numeric(value) => apply_numeric_typmod(*value, typmod).map(Datum::Numeric),
        other => Ok(other.clone()),
    }
}

// -- arrays -----------------------------------------------------------------

fn malformed_array(input: &str, detail: &str) -> PgError {
    PgError::new(
        SqlState::InvalidTextRepresentation,
        format!("malformed array literal: \"{input}\""),
    )
    .with_detail(detail.to_string())
}

struct ArrayLiteralParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    /// Length of each dimension, filled in as levels are closed.
    dims: Vec<Option<usize>>,
    /// Depth at which elements appear, once known.
    leaf_depth: Option<usize>,
    elements: Vec<Option<String>>,
}

impl<'a> ArrayLiteralParser<'a> {
    fn new(input: &'a str, body: &str) -> Self {
        Self {
            input,
            chars: body.chars().collect(),
            pos: 0,
            dims: Vec::new(),
            leaf_depth: None,
            elements: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, detail: &str) -> PgError {
        malformed_array(self.input, detail)
    }

    fn parse_level(&mut self, depth: usize) -> PgResult<()> {
        if self.peek() != Some('{') {
            return Err(self.error("Array value must start with \"{\" or dimension information."));
        }
        self.pos += 1;
        if self.dims.len() <= depth {
            self.dims.push(None);
        }
        self.skip_ws();
        let mut count = 0;
        if self.peek() == Some('}') {
            self.pos += 1;
            if depth > 0 || self.leaf_depth.is_some() {
                return Err(self.error("Multidimensional arrays must have sub-arrays with matching dimensions."));
            }
            self.dims.clear();
            return Ok(());
        }
        loop {
            self.skip_ws();
            if self.peek() == Some('{') {
                if self.leaf_depth.is_some_and(|leaf| depth + 1 > leaf) {
                    return Err(self.error("Unexpected \"{\" character."));
                }
                self.parse_level(depth + 1)?;
            } else {
                match self.leaf_depth {
                    Some(leaf) if leaf != depth => {
                        return Err(self.error("Unexpected array element."));
                    }
                    _ => self.leaf_depth = Some(depth),
                }
                let element = self.parse_element()?;
                self.elements.push(element);
            }
            count += 1;
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("Unexpected end of input.")),
            }
        }
        match self.dims[depth] {
            Some(expected) if expected != count => Err(self.error(
                "Multidimensional arrays must have sub-arrays with matching dimensions.",
            )),
            _ => {
                self.dims[depth] = Some(count);
                Ok(())
            }
        }
    }

    fn parse_element(&mut self) -> PgResult<Option<String>> {
        let mut text = String::new();
        let mut quoted = false;
        let mut escaped_any = false;
        let mut trailing_ws_start = None;
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error("Unexpected end of input."));
            };
            match ch {
                '"' => {
                    quoted = true;
                    self.pos += 1;
                    loop {
                        match self.peek() {
                            None => return Err(self.error("Unexpected end of input.")),
                            Some('"') => {
                                self.pos += 1;
                                break;
                            }
                            Some('\\') => {
                                self.pos += 1;
                                let escaped = self.peek().ok_or_else(|| self.error("Unexpected end of input."))?;
                                text.push(escaped);
                                self.pos += 1;
                            }
                            Some(other) => {
                                text.push(other);
                                self.pos += 1;
                            }
                        }
                    }
                    trailing_ws_start = None;
                }
                '\\' => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("Unexpected end of input."))?;
                    text.push(escaped);
                    escaped_any = true;
                    self.pos += 1;
                    trailing_ws_start = None;
                }
                ',' | '}' => break,
                '{' => return Err(self.error("Unexpected \"{\" character.")),
                c if c.is_whitespace() => {
                    if !text.is_empty() || quoted {
                        trailing_ws_start.get_or_insert(text.len());
                        text.push(c);
                    }
                    self.pos += 1;
                }
                other => {
                    text.push(other);
                    self.pos += 1;
                    trailing_ws_start = None;
                }
            }
        }
        if let Some(start) = trailing_ws_start {
            text.truncate(start);
        }
        if !quoted && !escaped_any {
            if text.is_empty() {
                return Err(self.error("Unexpected \",\" character."));
            }
            if text.eq_ignore_ascii_case("NULL") {
                return Ok(None);
            }
        }
        Ok(Some(text))
    }
}

/// Parse an optional `[l:u][l:u]=` prefix; returns (lower, upper) pairs and
/// the remaining text.
fn parse_dimension_prefix<'a>(input: &str, text: &'a str) -> PgResult<(Vec<(i32, i32)>, &'a str)> {
    let mut rest = text;
    let mut bounds = Vec::new();
    while let Some(after) = rest.trim_start().strip_prefix('[') {
        let (spec, tail) = after
            .split_once(']')
            .ok_or_else(|| malformed_array(input, "Missing \"]\" after array dimensions."))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<i32>()
                .map_err(|_| malformed_array(input, "Array dimensions must be integers."))
        };
        let (lower, upper) = match spec.split_once(':') {
            Some((l, u)) => (parse(l)?, parse(u)?),
            None => (1, parse(spec)?),
        };
        if upper < lower {
            return Err(PgError::new(
                SqlState::ArraySubscriptError,
                "upper bound cannot be less than lower bound",
            ));
        }
        bounds.push((lower, upper));
        rest = tail;
    }
    if bounds.is_empty() {
        return Ok((bounds, text));
    }
    let rest = rest
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| malformed_array(input, "Missing \"=\" after array dimensions."))?;
    Ok((bounds, rest))
}

pub fn array_in(catalog: &Catalog, input: &str, elemtype: Oid, typmod: i32) -> PgResult<Datum> {
    let (bounds, body) = parse_dimension_prefix(input, input.trim())?;
    let mut parser = ArrayLiteralParser::new(input, body.trim_start());
    parser.skip_ws();
    parser.parse_level(0)?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("Junk after closing right brace."));
    }
    let dims: Vec<usize> = parser.dims.iter().map(|d| d.unwrap_or(0)).collect();
    if dims.is_empty() {
        return Ok(Datum::array(ArrayValue::empty(elemtype)));
    }
    let lbounds = if bounds.is_empty() {
        vec![1; dims.len()]
    } else {
        if bounds.len() != dims.len()
            || bounds
                .iter()
                .zip(&dims)
                .any(|((l, u), d)| (u - l + 1) as usize != *d)
        {
            return Err(malformed_array(
                input,
                "Specified array dimensions do not match array contents.",
            ));
        }
        bounds.iter().map(|(l, _)| *l).collect()
    };
    let elements = parser
        .elements
        .into_iter()
        .map(|element| match element {
            None => Ok(Datum::Null),
            Some(text) => datum_in(catalog, elemtype, typmod, &text),
        })
        .collect::<PgResult<Vec<_>>>()?;
    Ok(Datum::array(ArrayValue {
        elemtype,
        dims,
        lbounds,
        elements,
    }))
}

fn quote_array_element(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub fn array_out(array: &ArrayValue) -> String {
    if array.is_empty() {
        return "{}".to_string();
    }
    let mut out = String::new();
    if array.lbounds.iter().any(|l| *l != 1) {
        for dim in 0..array.ndim() {
            out.push_str(&format!("[{}:{}]", array.lbounds[dim], array.ubound(dim)));
        }
        out.push('=');
    }
    let mut index = 0;
    write_array_level(array, 0, &mut index, &mut out);
    out
}

fn write_array_level(array: &ArrayValue, dim: usize, index: &mut usize, out: &mut String) {
    out.push('{');
    for i in 0..array.dims[dim] {
        if i > 0 {
            out.push(',');
        }
        if dim + 1 < array.ndim() {
            write_array_level(array, dim + 1, index, out);
        } else {
            match &array.elements[*index] {
                Datum::Null => out.push_str("NULL"),
                value => out.push_str(&quote_array_element(&datum_out(value))),
            }
            *index += 1;
        }
    }
    out.push('}');
}

// -- records ----------------------------------------------------------------

fn malformed_record(input: &str, detail: &str) -> PgError {
    PgError::new(
        SqlState::InvalidTextRepresentation,
        format!("malformed record literal: \"{input}\""),
    )
    .with_detail(detail.to_string())
}

/// Split `(a,"b",)` into its raw fields; `None` is a null field.
fn split_record_literal(input: &str) -> PgResult<Vec<Option<String>>> {
    let text = input.trim();
    let inner = text
        .strip_prefix('(')
        .ok_or_else(|| malformed_record(input, "Missing left parenthesis."))?;
    let mut chars = inner.chars().peekable();
    let mut fields = Vec::new();
    loop {
        let mut field = String::new();
        let mut seen_any = false;
        loop {
            match chars.next() {
                None => return Err(malformed_record(input, "Unexpected end of input.")),
                Some(',') => break,
                Some(')') => {
                    fields.push(seen_any.then_some(field));
                    if chars.next().is_some() {
                        return Err(malformed_record(input, "Junk after right parenthesis."));
                    }
                    return Ok(fields);
                }
                Some('"') => {
                    seen_any = true;
                    loop {
                        match chars.next() {
                            None => return Err(malformed_record(input, "Unexpected end of input.")),
                            Some('"') if chars.peek() == Some(&'"') => {
                                chars.next();
                                field.push('"');
                            }
                            Some('"') => break,
                            Some('\\') => match chars.next() {
                                Some(c) => field.push(c),
                                None => return Err(malformed_record(input, "Unexpected end of input.")),
                            },
                            Some(c) => field.push(c),
                        }
                    }
                }
                Some('\\') => {
                    seen_any = true;
                    match chars.next() {
                        Some(c) => field.push(c),
                        None => return Err(malformed_record(input, "Unexpected end of input.")),
                    }
                }
                Some(c) => {
                    seen_any = true;
                    field.push(c);
                }
            }
        }
        fields.push(seen_any.then_some(field));
    }
}

pub fn record_in(catalog: &Catalog, input: &str, typid: Oid) -> PgResult<Datum> {
    let desc = catalog
        .composite_desc(typid)
        .ok_or_else(|| elog(format!("type {typid} is not composite")))?;
    let fields = split_record_literal(input)?;
    let live: Vec<_> = desc.attrs.iter().filter(|attr| !attr.dropped).collect();
    if fields.len() < live.len() {
        return Err(malformed_record(input, "Too few columns."));
    }
    if fields.len() > live.len() {
        return Err(malformed_record(input, "Too many columns."));
    }
    let mut fields = fields.into_iter();
    let mut values = Vec::with_capacity(desc.natts());
    for attr in &desc.attrs {
        if attr.dropped {
            values.push(Datum::Null);
            continue;
        }
        values.push(match fields.next().flatten() {
            None => Datum::Null,
            Some(text) => datum_in(catalog, attr.typid, attr.typmod, &text)?,
        });
    }
    Ok(Datum::record(typid, values))
}

fn quote_record_field(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, '(' | ')' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push(c);
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub fn record_out(values: &[Datum]) -> String {
    let fields: Vec<String> = values
        .iter()
        .map(|value| match value {
            Datum::Null => String::new(),
            other => quote_record_field(&datum_out(other)),
        })
        .collect();
    format!("({})", fields.join(","))
}

// -- SQL-callable wrappers ---------------------------------------------------

/// `type_in(cstring, oid, int4)`: the input function of every type.
pub fn type_in(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = fcinfo
        .arg(0)
        .as_str()
        .ok_or_else(|| elog("type input expects a cstring"))?;
    let typid = fcinfo.arg(1).as_i64().map_or(fcinfo.rettype, |v| v as Oid);
    let typmod = fcinfo.arg(2).as_i64().unwrap_or(-1) as i32;
    datum_in(fcinfo.catalog, typid, typmod, text)
}

/// `type_out(any)`: the output function of every type.
pub fn type_out(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Text(datum_out(fcinfo.arg(0))))
}

fn numeric_to_int(value: Decimal, target: Oid) -> PgResult<Datum> {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let typname = match target {
        INT2OID => "smallint",
        INT4OID => "integer",
        _ => "bigint",
    };
    let as_int = rounded.to_i64().ok_or_else(|| {
        PgError::new(SqlState::NumericValueOutOfRange, format!("{typname} out of range"))
    })?;
    int_datum(as_int, target)
}

fn float_to_int_datum(value: f64, target: Oid) -> PgResult<Datum> {
    let (min, max, typname) = match target {
        INT2OID => (-32768.0, 32768.0, "smallint"),
        INT4OID => (-2147483648.0, 2147483648.0, "integer"),
        _ => (-9223372036854775808.0, 9223372036854775808.0, "bigint"),
    };
    int_datum(float_to_int(value, min, max, typname)?, target)
}

/// Convert a value to another builtin scalar type. `source` matters only for
/// blank-padded character data, whose trailing spaces are dropped.
pub fn cast_scalar(value: &Datum, source: Oid, target: Oid) -> PgResult<Datum> {
    use Datum::*;
    let is_int_target = matches!(target, INT2OID | INT4OID | INT8OID);
    Ok(match value {
        Null => Null,
        Int2(_) | Int4(_) | Int8(_) => {
            let v = value.as_i64().unwrap_or(0);
            match target {
                INT2OID | INT4OID | INT8OID => int_datum(v, target)?,
                FLOAT4OID | FLOAT8OID => float_datum(v as f64, target)?,
                NUMERICOID => Numeric(Decimal::from(v)),
                BOOLOID => Bool(v != 0),
                OIDOID => {
                    if !(i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&v) {
                        return Err(PgError::new(SqlState::NumericValueOutOfRange, "OID out of range"));
                    }
                    Oid(v as u32)
                }
                _ => return Err(unsupported_cast(value, target)),
            }
        }
        Bool(b) if target == INT4OID => Int4(i32::from(*b)),
        Oid(o) => match target {
            INT4OID => Int4(*o as i32),
            INT8OID => Int8(i64::from(*o)),
            OIDOID => Oid(*o),
            _ => return Err(unsupported_cast(value, target)),
        },
        Float4(_) | Float8(_) => {
            let v = super::float::float_arg(value)?;
            match target {
                _ if is_int_target => float_to_int_datum(v, target)?,
                FLOAT4OID | FLOAT8OID => float_datum(v, target)?,
                NUMERICOID => Numeric(numeric_from_f64(v)?),
                _ => return Err(unsupported_cast(value, target)),
            }
        }
        Numeric(n) => match target {
            _ if is_int_target => numeric_to_int(*n, target)?,
            FLOAT4OID | FLOAT8OID => float_datum(numeric_to_f64(*n), target)?,
            NUMERICOID => Numeric(*n),
            _ => return Err(unsupported_cast(value, target)),
        },
        Date(d) => match target {
            TIMESTAMPOID => Timestamp(datetime::date_to_timestamp(*d)?),
            TIMESTAMPTZOID => TimestampTz(datetime::date_to_timestamp(*d)?),
            DATEOID => Date(*d),
            _ => return Err(unsupported_cast(value, target)),
        },
        Timestamp(t) | TimestampTz(t) => match target {
            TIMESTAMPOID => Timestamp(*t),
            TIMESTAMPTZOID => TimestampTz(*t),
            DATEOID => Date(datetime::timestamp_to_date(*t)?),
            _ => return Err(unsupported_cast(value, target)),
        },
        Text(s) => {
            let s = if source == BPCHAROID && target != BPCHAROID {
                s.trim_end_matches(' ')
            } else {
                s.as_str()
            };
            match target {
                NAMEOID => Text(name_in(s)),
                TEXTOID | VARCHAROID | BPCHAROID | UNKNOWNOID => Text(s.to_string()),
                _ => return Err(unsupported_cast(value, target)),
            }
        }
        other => other.clone(),
    })
}

fn unsupported_cast(value: &Datum, target: Oid) -> PgError {
    elog(format!("unsupported scalar cast of {value:?} to type {target}"))
}

/// Function-based cast between builtin scalar types; the target is the
/// call's result type.
pub fn scalar_cast(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let target = fcinfo.catalog.base_type(fcinfo.rettype);
    let source = fcinfo.catalog.base_type(fcinfo.argtype(0));
    if fcinfo
        .catalog
        .type_by_id(target)
        .is_none_or(|ty| ty.is_array())
    {
        return Err(elog(format!("scalar_cast cannot produce type {target}")));
    }
    cast_scalar(fcinfo.arg(0), source, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(typid: Oid, text: &str) -> String {
        let catalog = Catalog::default();
        datum_out(&datum_in(&catalog, typid, -1, text).unwrap())
    }

    #[test]
    fn booleans_accept_prefixes() {
        assert_eq!(roundtrip(BOOLOID, "yes"), "t");
        assert_eq!(roundtrip(BOOLOID, " tr "), "t");
        assert_eq!(roundtrip(BOOLOID, "off"), "f");
        assert!(bool_in("o").is_err());
    }

    #[test]
    fn integer_errors_match_server_messages() {
        let catalog = Catalog::default();
        let err = datum_in(&catalog, INT4OID, -1, "abc").unwrap_err();
        assert_eq!(err.message, "invalid input syntax for type integer: \"abc\"");
        let err = datum_in(&catalog, INT2OID, -1, "40000").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::NumericValueOutOfRange);
        assert_eq!(err.message, "value \"40000\" is out of range for type smallint");
        assert_eq!(roundtrip(INT8OID, " -42 "), "-42");
    }

    #[test]
    fn numeric_input_is_exact_or_out_of_range() {
        assert_eq!(roundtrip(NUMERICOID, "1.50"), "1.50");
        assert_eq!(roundtrip(NUMERICOID, "-0.05"), "-0.05");
        assert_eq!(roundtrip(NUMERICOID, "1_000.5"), "1000.5");
        assert_eq!(roundtrip(NUMERICOID, "1.5e3"), "1500");
        assert_eq!(roundtrip(NUMERICOID, "25e-2"), "0.25");
        for text in ["1e30", "1.5e-40", "12345678901234567890123456789.5", "1e999999999999999999999"] {
            let err = numeric_in(text).unwrap_err();
            assert_eq!(err.code(), "22003", "{text}");
        }
        for text in ["1e", "1.2.3", "--1", ".", "1e+-2"] {
            let err = numeric_in(text).unwrap_err();
            assert_eq!(err.code(), "22P02", "{text}");
        }
    }

    #[test]
    fn character_typmods() {
        let catalog = Catalog::default();
        let err = datum_in(&catalog, VARCHAROID, 3 + 4, "abcd").unwrap_err();
        assert_eq!(err.message, "value too long for type character varying(3)");
        assert_eq!(
            datum_in(&catalog, VARCHAROID, 3 + 4, "abc  ").unwrap(),
            Datum::text("abc")
        );
        assert_eq!(datum_in(&catalog, BPCHAROID, 5 + 4, "ab").unwrap(), Datum::text("ab   "));
    }

    #[test]
    fn arrays_parse_nested_and_quoted_elements() {
        assert_eq!(roundtrip(INT4ARRAYOID, "{1, 2 ,3}"), "{1,2,3}");
        assert_eq!(roundtrip(INT4ARRAYOID, "{{1,2},{3,4}}"), "{{1,2},{3,4}}");
        assert_eq!(roundtrip(TEXTARRAYOID, r#"{"a b","",NULL,"null",x\,y}"#), r#"{"a b","",NULL,"null","x,y"}"#);
        assert_eq!(roundtrip(INT4ARRAYOID, "[0:1]={7,8}"), "[0:1]={7,8}");
        assert_eq!(roundtrip(INT4ARRAYOID, "{}"), "{}");
        let catalog = Catalog::default();
        let err = datum_in(&catalog, INT4ARRAYOID, -1, "{{1,2},{3}}").unwrap_err();
        assert_eq!(err.message, "malformed array literal: \"{{1,2},{3}}\"");
        assert!(datum_in(&catalog, INT4ARRAYOID, -1, "{1,2").is_err());
    }

    #[test]
    fn records_quote_fields_that_need_it() {
        let value = Datum::record(
            RECORDOID,
            vec![Datum::Int4(1), Datum::text("a b"), Datum::Null, Datum::text("q\"")],
        );
        assert_eq!(datum_out(&value), "(1,\"a b\",,\"q\"\"\")");
        assert_eq!(
            split_record_literal("(1,\"a b\",,\"q\"\"\")").unwrap(),
            vec![Some("1".to_string()), Some("a b".to_string()), None, Some("q\"".to_string())]
        );
    }

    #[test]
    fn bytea_hex_and_escape_forms() {
        assert_eq!(bytea_in("\\x4142").unwrap(), b"AB");
        assert_eq!(bytea_in("a\\\\b\\001").unwrap(), b"a\\b\x01");
        assert_eq!(bytea_out(b"AB"), "\\x4142");
    }

    #[test]
    fn casts_round_and_range_check() {
        assert_eq!(cast_scalar(&Datum::Float8(2.5), FLOAT8OID, INT4OID).unwrap(), Datum::Int4(2));
        assert_eq!(
            cast_scalar(&Datum::Numeric(Decimal::new(25, 1)), NUMERICOID, INT4OID).unwrap(),
            Datum::Int4(3)
        );
        let err = cast_scalar(&Datum::Int8(1 << 40), INT8OID, INT4OID).unwrap_err();
        assert_eq!(err.message, "integer out of range");
        assert_eq!(
            cast_scalar(&Datum::text("ab  "), BPCHAROID, TEXTOID).unwrap(),
            Datum::text("ab")
        );
    }
}
