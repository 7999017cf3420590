//! `json` and `jsonb` support.
//!
//! `json` values are kept as their input text; `jsonb` values are parsed
//! into a `serde_json::Value` whose object keys are kept in jsonb storage
//! order (shorter keys first, then bytewise), with the last duplicate key
//! winning. Functions shared by both types look at `fcinfo.rettype` to decide
//! which representation to hand back.

use std::collections::HashSet;
use std::fmt::Write as _;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value};

use super::cmp::{json_number_to_decimal, jsonb_key_order};
use super::datetime;
use super::float::{float4out, float8out};
use super::io::{bytea_out, datum_out};
use crate::catalog::Catalog;
use crate::catalog::oid::Oid;
use crate::catalog::pg_type::*;
use crate::nodes::datum::{ArrayValue, Datum, RecordValue};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

fn invalid_json(detail: impl Into<String>) -> PgError {
    PgError::new(SqlState::InvalidTextRepresentation, "invalid input syntax for type json")
        .with_detail(detail)
}

/// Check that `input` is one well-formed JSON value.
pub fn json_validate(input: &str) -> PgResult<()> {
    json_parse(input).map(|_| ())
}

/// Parse `json` text, keeping object keys in input order.
pub fn json_parse(input: &str) -> PgResult<Value> {
    serde_json::from_str::<Value>(input).map_err(|err| {
        let detail = if err.is_eof() {
            "The input string ended unexpectedly.".to_string()
        } else {
            format!("{err}.")
        };
        invalid_json(detail)
    })
}

/// Parse `jsonb` text into its normalized form.
pub fn jsonb_parse(input: &str) -> PgResult<Value> {
    json_parse(input).map(jsonb_normalize)
}

/// Reorder object keys into jsonb storage order, recursively.
pub fn jsonb_normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, jsonb_normalize(v))).collect();
            entries.sort_by(|a, b| jsonb_key_order(&a.0, &b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(jsonb_normalize).collect()),
        other => other,
    }
}

/// Quote a string the way JSON output does.
pub fn escape_json(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn quote_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    escape_json(&mut out, s);
    out
}

/// Canonical jsonb text: `{"a": 1, "b": [1, 2]}`.
pub fn jsonb_to_text(value: &Value) -> String {
    let mut out = String::new();
    write_jsonb(&mut out, value);
    out
}

fn write_jsonb(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            out.push('{');
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                escape_json(out, key);
                out.push_str(": ");
                write_jsonb(out, item);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_jsonb(out, item);
            }
            out.push(']');
        }
        Value::String(s) => escape_json(out, s),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_pretty(out: &mut String, value: &Value, level: usize) {
    let indent = |out: &mut String, level: usize| out.push_str(&"    ".repeat(level));
    match value {
        Value::Object(map) if !map.is_empty() => {
            out.push_str("{\n");
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(",\n");
                }
                indent(out, level + 1);
                escape_json(out, key);
                out.push_str(": ");
                write_pretty(out, item, level + 1);
            }
            out.push('\n');
            indent(out, level);
            out.push('}');
        }
        Value::Array(items) if !items.is_empty() => {
            out.push_str("[\n");
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(",\n");
                }
                indent(out, level + 1);
                write_pretty(out, item, level + 1);
            }
            out.push('\n');
            indent(out, level);
            out.push(']');
        }
        other => write_jsonb(out, other),
    }
}

/// `typeof`-style name of a JSON value.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// -- unique keys -------------------------------------------------------------

/// True when no object anywhere in `input` repeats a key. `input` must
/// already be valid JSON.
pub fn json_has_unique_keys(input: &str) -> bool {
    let mut scanner = KeyScanner {
        bytes: input.as_bytes(),
        pos: 0,
    };
    scanner.value().unwrap_or(true)
}

struct KeyScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl KeyScanner<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    /// `Some(false)` on a duplicate key, `None` on malformed input.
    fn value(&mut self) -> Option<bool> {
        match self.peek()? {
            b'{' => self.object(),
            b'[' => self.array(),
            b'"' => self.string().map(|_| true),
            _ => {
                while self.pos < self.bytes.len() && !b",]} \t\r\n".contains(&self.bytes[self.pos]) {
                    self.pos += 1;
                }
                Some(true)
            }
        }
    }

    fn object(&mut self) -> Option<bool> {
        self.pos += 1;
        let mut keys = HashSet::new();
        if self.peek()? == b'}' {
            self.pos += 1;
            return Some(true);
        }
        loop {
            let key = self.string()?;
            if !keys.insert(key) {
                return Some(false);
            }
            if self.peek()? != b':' {
                return None;
            }
            self.pos += 1;
            if !self.value()? {
                return Some(false);
            }
            match self.peek()? {
                b',' => self.pos += 1,
                b'}' => {
                    self.pos += 1;
                    return Some(true);
                }
                _ => return None,
            }
        }
    }

    fn array(&mut self) -> Option<bool> {
        self.pos += 1;
        if self.peek()? == b']' {
            self.pos += 1;
            return Some(true);
        }
        loop {
            if !self.value()? {
                return Some(false);
            }
            match self.peek()? {
                b',' => self.pos += 1,
                b']' => {
                    self.pos += 1;
                    return Some(true);
                }
                _ => return None,
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        if self.peek()? != b'"' {
            return None;
        }
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    let raw = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
                    return serde_json::from_str(raw).ok();
                }
                _ => self.pos += 1,
            }
        }
        None
    }
}

/// Which shapes an `IS JSON` predicate accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonItemKind {
    Any,
    Object,
    Array,
    Scalar,
}

/// `text IS JSON [kind] [WITH UNIQUE KEYS]`.
pub fn text_is_json(input: &str, kind: JsonItemKind, unique_keys: bool) -> bool {
    let Ok(value) = json_parse(input) else {
        return false;
    };
    value_is_kind(&value, kind) && (!unique_keys || json_has_unique_keys(input))
}

pub fn value_is_kind(value: &Value, kind: JsonItemKind) -> bool {
    match kind {
        JsonItemKind::Any => true,
        JsonItemKind::Object => value.is_object(),
        JsonItemKind::Array => value.is_array(),
        JsonItemKind::Scalar => !value.is_object() && !value.is_array(),
    }
}

// -- datum conversion --------------------------------------------------------

/// A jsonb number for a decimal; integral values stay integers.
pub fn decimal_to_json_number(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(int) = value.trunc().to_i64() {
            return Value::from(int);
        }
    }
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn float_to_json(value: f64, text: String) -> Value {
    if value.is_finite() {
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            return Value::from(value as i64);
        }
        Number::from_f64(value).map_or(Value::String(text), Value::Number)
    } else {
        Value::String(text)
    }
}

fn json_timestamp(text: String, tz: bool) -> String {
    if text.ends_with("infinity") {
        return text;
    }
    let mut out = text.replacen(' ', "T", 1);
    if tz {
        if let Some(stripped) = out.strip_suffix("+00") {
            out = format!("{stripped}+00:00");
        }
    }
    out
}

fn record_field_names(catalog: &Catalog, record: &RecordValue) -> Vec<String> {
    match catalog.composite_desc(record.typid) {
        Some(desc) if desc.natts() == record.values.len() => desc.column_names(),
        _ => (1..=record.values.len()).map(|i| format!("f{i}")).collect(),
    }
}

fn record_columns<'a>(catalog: &Catalog, record: &'a RecordValue) -> Vec<(String, &'a Datum)> {
    let dropped: Vec<bool> = catalog
        .composite_desc(record.typid)
        .filter(|desc| desc.natts() == record.values.len())
        .map(|desc| desc.attrs.iter().map(|a| a.dropped).collect())
        .unwrap_or_else(|| vec![false; record.values.len()]);
    record_field_names(catalog, record)
        .into_iter()
        .zip(&record.values)
        .zip(dropped)
        .filter(|(_, dropped)| !dropped)
        .map(|(pair, _)| pair)
        .collect()
}

/// The `to_jsonb` conversion of any datum.
pub fn datum_to_jsonb(catalog: &Catalog, value: &Datum) -> PgResult<Value> {
    Ok(match value {
        Datum::Null => Value::Null,
        Datum::Bool(v) => Value::Bool(*v),
        Datum::Int2(v) => Value::from(*v),
        Datum::Int4(v) => Value::from(*v),
        Datum::Int8(v) => Value::from(*v),
        Datum::Oid(v) => Value::from(*v),
        Datum::Float4(v) => float_to_json(f64::from(*v), float4out(*v)),
        Datum::Float8(v) => float_to_json(*v, float8out(*v)),
        Datum::Numeric(v) => decimal_to_json_number(*v),
        Datum::Text(s) | Datum::JsonPath(s) => Value::String(s.clone()),
        Datum::Bytea(b) => Value::String(bytea_out(b)),
        Datum::Tid(t) => Value::String(t.to_string()),
        Datum::Date(d) => Value::String(datetime::date_out(*d)),
        Datum::Timestamp(t) => Value::String(json_timestamp(datetime::timestamp_out(*t), false)),
        Datum::TimestampTz(t) => Value::String(json_timestamp(datetime::timestamptz_out(*t), true)),
        Datum::Json(text) => jsonb_parse(text)?,
        Datum::Jsonb(v) => v.clone(),
        Datum::Array(array) => array_to_jsonb(catalog, array)?,
        Datum::Record(record) => {
            let mut entries = Vec::with_capacity(record.values.len());
            for (name, item) in record_columns(catalog, record) {
                entries.push((name, datum_to_jsonb(catalog, item)?));
            }
            jsonb_normalize(Value::Object(entries.into_iter().collect()))
        }
    })
}

fn array_to_jsonb(catalog: &Catalog, array: &ArrayValue) -> PgResult<Value> {
    if array.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let mut items = Vec::with_capacity(array.elements.len());
    for element in &array.elements {
        items.push(datum_to_jsonb(catalog, element)?);
    }
    Ok(nest_dims(&array.dims, &mut items.into_iter()))
}

fn nest_dims(dims: &[usize], items: &mut impl Iterator<Item = Value>) -> Value {
    match dims.split_first() {
        Some((&len, [])) => Value::Array(items.take(len).collect()),
        Some((&len, rest)) => Value::Array((0..len).map(|_| nest_dims(rest, items)).collect()),
        None => Value::Array(Vec::new()),
    }
}

/// The `to_json` conversion: compact text, with `json` values embedded as
/// they were written.
pub fn datum_to_json_text(catalog: &Catalog, value: &Datum) -> PgResult<String> {
    Ok(match value {
        Datum::Null => "null".to_string(),
        Datum::Bool(v) => v.to_string(),
        Datum::Int2(_) | Datum::Int4(_) | Datum::Int8(_) | Datum::Oid(_) | Datum::Numeric(_) => {
            datum_out(value)
        }
        Datum::Float4(v) if v.is_finite() => float4out(*v),
        Datum::Float8(v) if v.is_finite() => float8out(*v),
        Datum::Float4(_) | Datum::Float8(_) => quote_json(&datum_out(value)),
        Datum::Json(text) => text.clone(),
        Datum::Jsonb(v) => jsonb_to_text(v),
        Datum::Timestamp(t) => quote_json(&json_timestamp(datetime::timestamp_out(*t), false)),
        Datum::TimestampTz(t) => quote_json(&json_timestamp(datetime::timestamptz_out(*t), true)),
        Datum::Array(array) => {
            let mut out = String::new();
            let mut elements = array.elements.iter();
            write_json_array(catalog, &mut out, &array.dims, &mut elements)?;
            out
        }
        Datum::Record(record) => {
            let mut out = String::from("{");
            for (idx, (name, item)) in record_columns(catalog, record).into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                escape_json(&mut out, &name);
                out.push(':');
                out.push_str(&datum_to_json_text(catalog, item)?);
            }
            out.push('}');
            out
        }
        other => quote_json(&datum_out(other)),
    })
}

fn write_json_array<'a>(
    catalog: &Catalog,
    out: &mut String,
    dims: &[usize],
    elements: &mut impl Iterator<Item = &'a Datum>,
) -> PgResult<()> {
    out.push('[');
    if let Some((&len, rest)) = dims.split_first() {
        for idx in 0..len {
            if idx > 0 {
                out.push(',');
            }
            if rest.is_empty() {
                let element = elements.next().ok_or_else(|| elog("array dimensions do not match its elements"))?;
                out.push_str(&datum_to_json_text(catalog, element)?);
            } else {
                write_json_array(catalog, out, rest, elements)?;
            }
        }
    }
    out.push(']');
    Ok(())
}

/// The `Value` held by a `json` or `jsonb` datum.
pub fn json_arg(value: &Datum) -> PgResult<Value> {
    match value {
        Datum::Jsonb(v) => Ok(v.clone()),
        Datum::Json(text) | Datum::Text(text) => json_parse(text),
        other => Err(elog(format!("expected a json value, found {other:?}"))),
    }
}

fn json_result(rettype: Oid, value: Value) -> Datum {
    if rettype == JSONOID {
        Datum::Json(value.to_string())
    } else {
        Datum::Jsonb(jsonb_normalize(value))
    }
}

// -- constructors ------------------------------------------------------------

fn object_key(value: &Datum, argno: usize) -> PgResult<String> {
    match value {
        Datum::Null => Err(PgError::new(
            SqlState::NullValueNotAllowed,
            "null value not allowed for object key",
        )
        .with_detail(format!("Argument {argno} is null."))),
        Datum::Array(_) | Datum::Record(_) | Datum::Json(_) | Datum::Jsonb(_) => Err(PgError::new(
            SqlState::InvalidParameterValue,
            "key value must be scalar, not array, composite, or json",
        )),
        other => Ok(datum_out(other)),
    }
}

/// Build an object from key/value pairs. `absent_on_null` drops pairs with a
/// null value; `unique_keys` rejects repeated keys.
pub fn build_json_object(
    catalog: &Catalog,
    pairs: &[(Datum, Datum)],
    absent_on_null: bool,
    unique_keys: bool,
    jsonb: bool,
) -> PgResult<Datum> {
    let mut seen = HashSet::new();
    let mut text = String::from("{");
    let mut map = Map::new();
    let mut first = true;
    for (idx, (key, value)) in pairs.iter().enumerate() {
        let key = object_key(key, idx * 2 + 1)?;
        if absent_on_null && value.is_null() {
            continue;
        }
        if unique_keys && !seen.insert(key.clone()) {
            return Err(PgError::new(
                SqlState::DuplicateJsonObjectKeyValue,
                format!("duplicate JSON object key value: {}", quote_json(&key)),
            ));
        }
        if jsonb {
            map.insert(key, datum_to_jsonb(catalog, value)?);
        } else {
            if !first {
                text.push_str(", ");
            }
            escape_json(&mut text, &key);
            text.push_str(" : ");
            text.push_str(&datum_to_json_text(catalog, value)?);
        }
        first = false;
    }
    text.push('}');
    Ok(if jsonb {
        Datum::Jsonb(jsonb_normalize(Value::Object(map)))
    } else {
        Datum::Json(text)
    })
}

/// Build an array from values; `absent_on_null` skips nulls.
pub fn build_json_array(catalog: &Catalog, values: &[Datum], absent_on_null: bool, jsonb: bool) -> PgResult<Datum> {
    let kept = values.iter().filter(|v| !(absent_on_null && v.is_null()));
    if jsonb {
        let items = kept.map(|v| datum_to_jsonb(catalog, v)).collect::<PgResult<Vec<_>>>()?;
        return Ok(Datum::Jsonb(Value::Array(items)));
    }
    let items = kept
        .map(|v| datum_to_json_text(catalog, v))
        .collect::<PgResult<Vec<_>>>()?;
    Ok(Datum::Json(format!("[{}]", items.join(", "))))
}

fn build_object_args(fcinfo: &FunctionCallInfo<'_>, jsonb: bool) -> PgResult<Datum> {
    if fcinfo.nargs() % 2 != 0 {
        return Err(PgError::new(
            SqlState::InvalidParameterValue,
            "argument list must have even number of elements",
        )
        .with_hint(format!(
            "The arguments of {} must consist of alternating keys and values.",
            if jsonb { "jsonb_build_object()" } else { "json_build_object()" }
        )));
    }
    let pairs: Vec<(Datum, Datum)> = fcinfo
        .args
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    build_json_object(fcinfo.catalog, &pairs, false, false, jsonb)
}

pub fn to_json(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    datum_to_json_text(fcinfo.catalog, fcinfo.arg(0)).map(Datum::Json)
}

pub fn to_jsonb(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    datum_to_jsonb(fcinfo.catalog, fcinfo.arg(0)).map(Datum::Jsonb)
}

pub fn json_build_object(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    build_object_args(fcinfo, false)
}

pub fn jsonb_build_object(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    build_object_args(fcinfo, true)
}

pub fn json_build_array(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    build_json_array(fcinfo.catalog, &fcinfo.args, false, false)
}

pub fn jsonb_build_array(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    build_json_array(fcinfo.catalog, &fcinfo.args, false, true)
}

// -- processing --------------------------------------------------------------

pub fn json_typeof(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = json_arg(fcinfo.arg(0))?;
    Ok(Datum::text(json_kind(&value)))
}

pub fn json_array_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    match json_arg(fcinfo.arg(0))? {
        Value::Array(items) => Ok(Datum::Int4(items.len() as i32)),
        Value::Object(_) => Err(PgError::new(
            SqlState::InvalidParameterValue,
            "cannot get array length of a non-array",
        )),
        _ => Err(PgError::new(
            SqlState::InvalidParameterValue,
            "cannot get array length of a scalar",
        )),
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

pub fn json_strip_nulls(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = json_arg(fcinfo.arg(0))?;
    Ok(json_result(fcinfo.rettype, strip_nulls(value)))
}

pub fn jsonb_pretty(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = json_arg(fcinfo.arg(0))?;
    let mut out = String::new();
    write_pretty(&mut out, &value, 0);
    Ok(Datum::Text(out))
}

/// Position of array element `index`; negative indexes count from the end.
pub fn json_array_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let idx = usize::try_from(index).ok()?;
        (idx < len).then_some(idx)
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

fn object_field(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Option<Value>> {
    let Some(key) = fcinfo.arg(1).as_str() else {
        return Ok(None);
    };
    Ok(match json_arg(fcinfo.arg(0))? {
        Value::Object(mut map) => map.remove(key),
        _ => None,
    })
}

fn array_element(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Option<Value>> {
    let Some(index) = fcinfo.arg(1).as_i64() else {
        return Ok(None);
    };
    Ok(match json_arg(fcinfo.arg(0))? {
        Value::Array(mut items) => json_array_index(items.len(), index).map(|idx| items.swap_remove(idx)),
        _ => None,
    })
}

/// `->>` result: strings unquoted, `null` as SQL null, containers as text.
pub fn json_value_as_text(value: &Value) -> Datum {
    match value {
        Value::Null => Datum::Null,
        Value::String(s) => Datum::text(s.clone()),
        other => Datum::Text(jsonb_to_text(other)),
    }
}

pub fn json_object_field(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(object_field(fcinfo)?.map_or(Datum::Null, |v| json_result(fcinfo.rettype, v)))
}

pub fn json_object_field_text(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(object_field(fcinfo)?.map_or(Datum::Null, |v| json_value_as_text(&v)))
}

pub fn json_array_element(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(array_element(fcinfo)?.map_or(Datum::Null, |v| json_result(fcinfo.rettype, v)))
}

pub fn json_array_element_text(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(array_element(fcinfo)?.map_or(Datum::Null, |v| json_value_as_text(&v)))
}

/// jsonb containment (`@>`).
pub fn json_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Object(lhs), Value::Object(rhs)) => rhs
            .iter()
            .all(|(key, rv)| lhs.get(key).is_some_and(|lv| json_contains_nested(lv, rv))),
        (Value::Array(lhs), Value::Array(rhs)) => rhs.iter().all(|rv| {
            lhs.iter().any(|lv| match (lv, rv) {
                (Value::Array(_) | Value::Object(_), _) => json_contains_nested(lv, rv),
                _ => scalar_eq(lv, rv),
            })
        }),
        // A top-level array contains a bare scalar it holds.
        (Value::Array(lhs), scalar) if !scalar.is_object() => lhs.iter().any(|lv| scalar_eq(lv, scalar)),
        (l, r) => scalar_eq(l, r),
    }
}

fn json_contains_nested(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            json_contains(container, contained)
        }
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        (l, r) => scalar_eq(l, r),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (json_number_to_decimal(x), json_number_to_decimal(y)) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(_) | Value::Object(_), _) => false,
        _ => a == b,
    }
}

pub fn jsonb_contains(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (lhs, rhs) = (json_arg(fcinfo.arg(0))?, json_arg(fcinfo.arg(1))?);
    Ok(Datum::Bool(json_contains(&lhs, &rhs)))
}

pub fn jsonb_contained(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (lhs, rhs) = (json_arg(fcinfo.arg(0))?, json_arg(fcinfo.arg(1))?);
    Ok(Datum::Bool(json_contains(&rhs, &lhs)))
}

pub fn jsonb_exists(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = json_arg(fcinfo.arg(0))?;
    let key = fcinfo.arg(1).as_str().unwrap_or_default();
    let found = match &value {
        Value::Object(map) => map.contains_key(key),
        Value::Array(items) => items.iter().any(|item| item.as_str() == Some(key)),
        Value::String(s) => s == key,
        _ => false,
    };
    Ok(Datum::Bool(found))
}

/// `jsonb::<scalar type>` casts.
pub fn jsonb_cast_scalar(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let value = json_arg(fcinfo.arg(0))?;
    let target = fcinfo.catalog.base_type(fcinfo.rettype);
    let mismatch = |value: &Value| {
        PgError::new(
            SqlState::InvalidParameterValue,
            format!(
                "cannot cast jsonb {} to type {}",
                json_kind(value),
                fcinfo.catalog.format_type(fcinfo.rettype)
            ),
        )
    };
    match (&value, target) {
        (Value::Null, _) => Ok(Datum::Null),
        (Value::Bool(b), BOOLOID) => Ok(Datum::Bool(*b)),
        (Value::Number(n), NUMERICOID | INT2OID | INT4OID | INT8OID | FLOAT4OID | FLOAT8OID) => {
            let numeric = json_number_to_decimal(n)
                .map(Datum::Numeric)
                .or_else(|| n.as_f64().map(Datum::Float8))
                .ok_or_else(|| mismatch(&value))?;
            let source = if matches!(numeric, Datum::Numeric(_)) { NUMERICOID } else { FLOAT8OID };
            super::io::cast_scalar(&numeric, source, target)
        }
        _ => Err(mismatch(&value)),
    }
}

// -- set-returning ------------------------------------------------------------

fn elements_of(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Value>> {
    match json_arg(fcinfo.arg(0))? {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Err(PgError::new(
            SqlState::InvalidParameterValue,
            "cannot extract elements from an object",
        )),
        _ => Err(PgError::new(
            SqlState::InvalidParameterValue,
            "cannot extract elements from a scalar",
        )),
    }
}

pub fn json_array_elements(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    let element_type = if fcinfo.argtype(0) == JSONOID { JSONOID } else { JSONBOID };
    Ok(elements_of(fcinfo)?
        .into_iter()
        .map(|item| json_result(element_type, item))
        .collect())
}

pub fn json_array_elements_text(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    Ok(elements_of(fcinfo)?.iter().map(json_value_as_text).collect())
}

pub fn json_object_keys(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Vec<Datum>> {
    match json_arg(fcinfo.arg(0))? {
        Value::Object(map) => Ok(map.keys().map(|k| Datum::text(k.clone())).collect()),
        other => Err(PgError::new(
            SqlState::InvalidParameterValue,
            format!("cannot call json_object_keys on {}", match other {
                Value::Array(_) => "an array",
                _ => "a scalar",
            }),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn call(f: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>, argtypes: &[Oid], rettype: Oid) -> PgResult<Datum> {
        let catalog = Catalog::default();
        let fcinfo = FunctionCallInfo {
            args,
            argtypes,
            rettype,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        };
        f(&fcinfo)
    }

    fn jsonb(text: &str) -> Datum {
        Datum::Jsonb(jsonb_parse(text).unwrap())
    }

    #[test]
    fn jsonb_output_uses_storage_order_and_spacing() {
        let value = jsonb_parse(r#"{"bb": 1, "a": [1, 2], "a": [3]}"#).unwrap();
        assert_eq!(jsonb_to_text(&value), r#"{"a": [3], "bb": 1}"#);
    }

    #[test]
    fn invalid_json_reports_syntax() {
        let err = json_validate("{\"a\":").unwrap_err();
        assert_eq!(err.code(), "22P02");
        assert_eq!(err.message, "invalid input syntax for type json");
    }

    #[test]
    fn unique_key_detection() {
        assert!(json_has_unique_keys(r#"{"a": 1, "b": {"a": 2}}"#));
        assert!(!json_has_unique_keys(r#"{"a": 1, "a": 2}"#));
        assert!(!json_has_unique_keys(r#"[{"x": 1, "x": 2}]"#));
        assert!(text_is_json("[1]", JsonItemKind::Array, true));
        assert!(!text_is_json("[1]", JsonItemKind::Scalar, false));
        assert!(!text_is_json("{", JsonItemKind::Any, false));
    }

    #[test]
    fn build_object_formats() {
        let args = vec![Datum::text("a"), Datum::Int4(1), Datum::text("b"), Datum::text("x")];
        let out = call(json_build_object, args.clone(), &[TEXTOID, INT4OID, TEXTOID, TEXTOID], JSONOID).unwrap();
        assert_eq!(out, Datum::Json(r#"{"a" : 1, "b" : "x"}"#.to_string()));
        let out = call(jsonb_build_object, args, &[TEXTOID, INT4OID, TEXTOID, TEXTOID], JSONBOID).unwrap();
        assert_eq!(datum_out(&out), r#"{"a": 1, "b": "x"}"#);
    }

    #[test]
    fn build_object_rejects_null_key_and_odd_args() {
        let err = call(json_build_object, vec![Datum::Null, Datum::Int4(1)], &[TEXTOID, INT4OID], JSONOID).unwrap_err();
        assert_eq!(err.code(), "22004");
        let err = call(json_build_object, vec![Datum::text("a")], &[TEXTOID], JSONOID).unwrap_err();
        assert_eq!(err.code(), "22023");
    }

    #[test]
    fn unique_keys_and_absent_on_null() {
        let catalog = Catalog::default();
        let pairs = vec![
            (Datum::text("a"), Datum::Int4(1)),
            (Datum::text("b"), Datum::Null),
        ];
        let out = build_json_object(&catalog, &pairs, true, false, false).unwrap();
        assert_eq!(out, Datum::Json(r#"{"a" : 1}"#.to_string()));
        let dup = vec![(Datum::text("a"), Datum::Int4(1)), (Datum::text("a"), Datum::Int4(2))];
        let err = build_json_object(&catalog, &dup, false, true, true).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DuplicateJsonObjectKeyValue);
    }

    #[test]
    fn to_json_of_arrays_and_records() {
        let catalog = Catalog::default();
        let array = Datum::array(ArrayValue {
            elemtype: INT4OID,
            dims: vec![2, 2],
            lbounds: vec![1, 1],
            elements: vec![Datum::Int4(1), Datum::Int4(2), Datum::Int4(3), Datum::Null],
        });
        assert_eq!(datum_to_json_text(&catalog, &array).unwrap(), "[[1,2],[3,null]]");
        let record = Datum::Record(Arc::new(RecordValue {
            typid: RECORDOID,
            values: vec![Datum::Int4(1), Datum::text("x")],
        }));
        assert_eq!(datum_to_json_text(&catalog, &record).unwrap(), r#"{"f1":1,"f2":"x"}"#);
        assert_eq!(
            datum_to_json_text(&catalog, &Datum::Float8(f64::NAN)).unwrap(),
            r#""NaN""#
        );
    }

    #[test]
    fn field_access_operators() {
        let doc = jsonb(r#"{"a": {"b": [10, 20, 30]}}"#);
        let inner = call(json_object_field, vec![doc.clone(), Datum::text("a")], &[JSONBOID, TEXTOID], JSONBOID).unwrap();
        let arr = call(json_object_field, vec![inner, Datum::text("b")], &[JSONBOID, TEXTOID], JSONBOID).unwrap();
        let last = call(json_array_element_text, vec![arr, Datum::Int4(-1)], &[JSONBOID, INT4OID], TEXTOID).unwrap();
        assert_eq!(last, Datum::text("30"));
        let missing = call(json_object_field_text, vec![doc, Datum::text("zz")], &[JSONBOID, TEXTOID], TEXTOID).unwrap();
        assert_eq!(missing, Datum::Null);
    }

    #[test]
    fn containment_follows_jsonb_rules() {
        let lhs = jsonb_parse(r#"{"a": [1, 2, {"c": 3}], "b": 1}"#).unwrap();
        assert!(json_contains(&lhs, &jsonb_parse(r#"{"a": [2, {"c": 3}]}"#).unwrap()));
        assert!(!json_contains(&lhs, &jsonb_parse(r#"{"a": 2}"#).unwrap()));
        assert!(json_contains(&jsonb_parse("[1, 2]").unwrap(), &jsonb_parse("1").unwrap()));
        assert!(json_contains(&jsonb_parse("[1.0]").unwrap(), &jsonb_parse("[1]").unwrap()));
    }

    #[test]
    fn scalar_casts() {
        let out = call(jsonb_cast_scalar, vec![jsonb("42")], &[JSONBOID], INT4OID).unwrap();
        assert_eq!(out, Datum::Int4(42));
        let err = call(jsonb_cast_scalar, vec![jsonb("\"x\"")], &[JSONBOID], INT4OID).unwrap_err();
        assert_eq!(err.message, "cannot cast jsonb string to type integer");
        let out = call(jsonb_cast_scalar, vec![jsonb("null")], &[JSONBOID], BOOLOID).unwrap();
        assert_eq!(out, Datum::Null);
    }

    #[test]
    fn pretty_printing() {
        let out = call(jsonb_pretty, vec![jsonb(r#"{"a": [1], "b": {}}"#)], &[JSONBOID], TEXTOID).unwrap();
        assert_eq!(out, Datum::text("{\n    \"a\": [\n        1\n    ],\n    \"b\": {}\n}"));
    }

    #[test]
    fn element_sets() {
        let catalog = Catalog::default();
        let argtypes = [JSONOID];
        let fcinfo = FunctionCallInfo {
            args: vec![Datum::Json(r#"[1, "a", null]"#.to_string())],
            argtypes: &argtypes,
            rettype: TEXTOID,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        };
        let rows = json_array_elements_text(&fcinfo).unwrap();
        assert_eq!(rows, vec![Datum::text("1"), Datum::text("a"), Datum::Null]);
        let rows = json_array_elements(&fcinfo).unwrap();
        assert_eq!(rows[1], Datum::Json("\"a\"".to_string()));
    }
}
