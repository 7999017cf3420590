//! Character-string and bytea functions.
//!
//! Positions and lengths count characters, not bytes, except for the
//! `octet_length` family. Blank-padded `character` arguments are trimmed of
//! trailing spaces before matching or measuring.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use super::io::{bytea_in, datum_out};
use crate::catalog::pg_type::{BPCHAROID, TEXTOID};
use crate::nodes::datum::{ArrayValue, Datum};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

fn text_arg<'a>(fcinfo: &'a FunctionCallInfo<'_>, n: usize) -> PgResult<&'a str> {
    let value = fcinfo.arg(n);
    let text = value
        .as_str()
        .ok_or_else(|| elog(format!("expected a text argument, got {value:?}")))?;
    if fcinfo.argtype(n) == BPCHAROID {
        Ok(text.trim_end_matches(' '))
    } else {
        Ok(text)
    }
}

fn bytea_arg<'a>(fcinfo: &'a FunctionCallInfo<'_>, n: usize) -> PgResult<&'a [u8]> {
    match fcinfo.arg(n) {
        Datum::Bytea(bytes) => Ok(bytes),
        other => Err(elog(format!("expected a bytea argument, got {other:?}"))),
    }
}

fn int_arg(fcinfo: &FunctionCallInfo<'_>, n: usize) -> PgResult<i64> {
    let value = fcinfo.arg(n);
    value
        .as_i64()
        .ok_or_else(|| elog(format!("expected an integer argument, got {value:?}")))
}

fn text_result(value: impl Into<String>) -> PgResult<Datum> {
    Ok(Datum::Text(value.into()))
}

fn count_result(n: usize) -> PgResult<Datum> {
    i32::try_from(n)
        .map(Datum::Int4)
        .map_err(|_| PgError::new(SqlState::ProgramLimitExceeded, "string is too long"))
}

// -- concatenation ------------------------------------------------------------

pub fn textcat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(format!("{}{}", text_arg(fcinfo, 0)?, text_arg(fcinfo, 1)?))
}

/// `text || anynonarray`
pub fn textanycat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(format!("{}{}", text_arg(fcinfo, 0)?, datum_out(fcinfo.arg(1))))
}

/// `anynonarray || text`
pub fn anytextcat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(format!("{}{}", datum_out(fcinfo.arg(0)), text_arg(fcinfo, 1)?))
}

pub fn byteacat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let mut out = bytea_arg(fcinfo, 0)?.to_vec();
    out.extend_from_slice(bytea_arg(fcinfo, 1)?);
    Ok(Datum::Bytea(out))
}

/// The values a `VARIADIC "any"` function receives from position `start` on.
/// An explicit `VARIADIC` array is spread into its elements; a null array
/// yields `None`.
fn variadic_any_args<'a>(fcinfo: &'a FunctionCallInfo<'_>, start: usize) -> PgResult<Option<Vec<&'a Datum>>> {
    if !fcinfo.funcvariadic {
        return Ok(Some(fcinfo.args.iter().skip(start).collect()));
    }
    match fcinfo.arg(start) {
        Datum::Null => Ok(None),
        Datum::Array(array) => Ok(Some(array.elements.iter().collect())),
        other => Err(elog(format!("VARIADIC argument is not an array: {other:?}"))),
    }
}

/// `concat(VARIADIC "any")`: nulls are skipped.
pub fn text_concat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let Some(values) = variadic_any_args(fcinfo, 0)? else {
        return Ok(Datum::Null);
    };
    let out: String = values
        .into_iter()
        .filter(|arg| !arg.is_null())
        .map(datum_out)
        .collect();
    text_result(out)
}

/// `concat_ws(sep, VARIADIC "any")`: a null separator yields null.
pub fn text_concat_ws(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    if fcinfo.arg(0).is_null() {
        return Ok(Datum::Null);
    }
    let separator = text_arg(fcinfo, 0)?;
    let Some(values) = variadic_any_args(fcinfo, 1)? else {
        return Ok(Datum::Null);
    };
    let parts: Vec<String> = values
        .into_iter()
        .filter(|arg| !arg.is_null())
        .map(datum_out)
        .collect();
    text_result(parts.join(separator))
}

// -- pattern matching ---------------------------------------------------------

/// Match `text` against a LIKE pattern with `\` as the escape character.
pub fn like_match(text: &[char], pattern: &[char]) -> PgResult<bool> {
    let (mut t, mut p) = (0, 0);
    // Backtrack point: pattern index after the last `%` and the text index
    // it was tried at.
    let mut star: Option<(usize, usize)> = None;
    loop {
        if p < pattern.len() {
            match pattern[p] {
                '%' => {
                    p += 1;
                    star = Some((p, t));
                    continue;
                }
                '_' if t < text.len() => {
                    t += 1;
                    p += 1;
                    continue;
                }
                '\\' => {
                    let Some(&literal) = pattern.get(p + 1) else {
                        return Err(PgError::new(
                            SqlState::InvalidEscapeSequence,
                            "LIKE pattern must not end with escape character",
                        ));
                    };
                    if t < text.len() && text[t] == literal {
                        t += 1;
                        p += 2;
                        continue;
                    }
                }
                c if c != '_' && t < text.len() && text[t] == c => {
                    t += 1;
                    p += 1;
                    continue;
                }
                _ => {}
            }
        } else if t == text.len() {
            return Ok(true);
        }
        match star {
            Some((star_p, star_t)) if star_t < text.len() => {
                star = Some((star_p, star_t + 1));
                p = star_p;
                t = star_t + 1;
            }
            _ => return Ok(false),
        }
    }
}

fn like_args(fcinfo: &FunctionCallInfo<'_>, fold_case: bool) -> PgResult<bool> {
    let text = text_arg(fcinfo, 0)?;
    let pattern = text_arg(fcinfo, 1)?;
    if fold_case {
        let text: Vec<char> = text.to_lowercase().chars().collect();
        let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
        like_match(&text, &pattern)
    } else {
        let text: Vec<char> = text.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        like_match(&text, &pattern)
    }
}

pub fn text_like(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    like_args(fcinfo, false).map(Datum::Bool)
}

pub fn text_not_like(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    like_args(fcinfo, false).map(|m| Datum::Bool(!m))
}

pub fn text_ilike(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    like_args(fcinfo, true).map(Datum::Bool)
}

pub fn text_not_ilike(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    like_args(fcinfo, true).map(|m| Datum::Bool(!m))
}

// -- regular expressions --------------------------------------------------------

/// Compile `pattern` with PostgreSQL-style flag letters.
fn build_regex(pattern: &str, flags: &str, fn_name: &str) -> PgResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'c' => {
                builder.case_insensitive(false);
            }
            'n' | 'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' => {}
            other => {
                return Err(PgError::new(
                    SqlState::InvalidParameterValue,
                    format!("invalid regular expression option: \"{other}\""),
                )
                .with_detail(format!("{fn_name}() does not support this flag")));
            }
        }
    }
    builder.build().map_err(|err| {
        PgError::new(
            SqlState::InvalidRegularExpression,
            format!("invalid regular expression: {err}"),
        )
    })
}

fn flags_arg<'a>(fcinfo: &'a FunctionCallInfo<'_>, n: usize) -> PgResult<&'a str> {
    if fcinfo.nargs() > n { text_arg(fcinfo, n) } else { Ok("") }
}

fn regex_args(fcinfo: &FunctionCallInfo<'_>, case_insensitive: bool) -> PgResult<bool> {
    let flags = if case_insensitive { "i" } else { "" };
    let regex = build_regex(text_arg(fcinfo, 1)?, flags, "~")?;
    Ok(regex.is_match(text_arg(fcinfo, 0)?))
}

pub fn text_regex_match(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    regex_args(fcinfo, false).map(Datum::Bool)
}

pub fn text_regex_not_match(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    regex_args(fcinfo, false).map(|m| Datum::Bool(!m))
}

pub fn text_regex_imatch(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    regex_args(fcinfo, true).map(Datum::Bool)
}

pub fn text_regex_not_imatch(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    regex_args(fcinfo, true).map(|m| Datum::Bool(!m))
}

/// `regexp_like(string, pattern [, flags])`
pub fn text_regexp_like(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let regex = build_regex(text_arg(fcinfo, 1)?, flags_arg(fcinfo, 2)?, "regexp_like")?;
    Ok(Datum::Bool(regex.is_match(text_arg(fcinfo, 0)?)))
}

/// `regexp_match(string, pattern [, flags])`: the capture groups of the
/// first match as `text[]`, or the whole match when there are no groups.
pub fn text_regexp_match(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let flags = flags_arg(fcinfo, 2)?;
    if flags.contains('g') {
        return Err(PgError::new(
            SqlState::InvalidParameterValue,
            "regexp_match() does not support the \"global\" option",
        )
        .with_hint("Use the regexp_matches function instead."));
    }
    let regex = build_regex(text_arg(fcinfo, 1)?, flags, "regexp_match")?;
    let Some(caps) = regex.captures(text_arg(fcinfo, 0)?) else {
        return Ok(Datum::Null);
    };
    let groups: Vec<Datum> = if caps.len() > 1 {
        caps.iter()
            .skip(1)
            .map(|group| group.map_or(Datum::Null, |m| Datum::text(m.as_str())))
            .collect()
    } else {
        vec![caps.get(0).map_or(Datum::Null, |m| Datum::text(m.as_str()))]
    };
    Ok(Datum::array(ArrayValue::from_vec(TEXTOID, groups)))
}

/// `regexp_replace(string, pattern, replacement [, flags])`. Only the first
/// match is replaced unless the `g` flag is given; `\1`..`\9` and `\&` in
/// the replacement refer to the match.
pub fn text_regexp_replace(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let flags = flags_arg(fcinfo, 3)?;
    let regex = build_regex(text_arg(fcinfo, 1)?, flags, "regexp_replace")?;
    let replacement = postgres_replacement(text_arg(fcinfo, 2)?);
    let source = text_arg(fcinfo, 0)?;
    let replaced = if flags.contains('g') {
        regex.replace_all(source, replacement.as_str())
    } else {
        regex.replace(source, replacement.as_str())
    };
    text_result(replaced.into_owned())
}

/// Rewrite `\n` and `\&` back-references into the `${n}` syntax of the
/// regex crate, escaping literal dollars.
fn postgres_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d @ '1'..='9') => {
                    chars.next();
                    out.push_str(&format!("${{{d}}}"));
                }
                Some('&') => {
                    chars.next();
                    out.push_str("${0}");
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

pub fn text_starts_with(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bool(text_arg(fcinfo, 0)?.starts_with(text_arg(fcinfo, 1)?)))
}

// -- measurement ----------------------------------------------------------------

pub fn text_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    count_result(text_arg(fcinfo, 0)?.chars().count())
}

pub fn bpchar_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = fcinfo
        .arg(0)
        .as_str()
        .ok_or_else(|| elog("length(bpchar) expects text"))?;
    count_result(text.trim_end_matches(' ').chars().count())
}

pub fn bytea_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    count_result(bytea_arg(fcinfo, 0)?.len())
}

pub fn text_octet_length(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = fcinfo
        .arg(0)
        .as_str()
        .ok_or_else(|| elog("octet_length expects text"))?;
    count_result(text.len())
}

pub fn text_strpos(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let haystack = text_arg(fcinfo, 0)?;
    let needle = text_arg(fcinfo, 1)?;
    let pos = haystack
        .find(needle)
        .map_or(0, |byte| haystack[..byte].chars().count() + 1);
    count_result(pos)
}

// -- case and shape -------------------------------------------------------------

pub fn text_lower(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(text_arg(fcinfo, 0)?.to_lowercase())
}

pub fn text_upper(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(text_arg(fcinfo, 0)?.to_uppercase())
}

/// First letter of each alphanumeric run upper-cased, the rest lower-cased.
pub fn initcap_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if capitalize_next {
                result.extend(c.to_uppercase());
            } else {
                result.extend(c.to_lowercase());
            }
            capitalize_next = false;
        } else {
            result.push(c);
            capitalize_next = true;
        }
    }
    result
}

pub fn text_initcap(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(initcap_string(text_arg(fcinfo, 0)?))
}

pub fn text_reverse(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(text_arg(fcinfo, 0)?.chars().rev().collect::<String>())
}

pub fn text_repeat(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let count = int_arg(fcinfo, 1)?.max(0) as usize;
    if text.len().saturating_mul(count) > 1 << 30 {
        return Err(PgError::new(SqlState::ProgramLimitExceeded, "requested length too large"));
    }
    text_result(text.repeat(count))
}

pub fn text_replace(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let from = text_arg(fcinfo, 1)?;
    if from.is_empty() {
        return text_result(text);
    }
    text_result(text.replace(from, text_arg(fcinfo, 2)?))
}

/// `substr(text, start [, count])` with 1-based, possibly non-positive start.
pub fn text_substr(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let start = int_arg(fcinfo, 1)?;
    let end = if fcinfo.nargs() > 2 {
        let count = int_arg(fcinfo, 2)?;
        if count < 0 {
            return Err(PgError::new(
                SqlState::SubstringError,
                "negative substring length not allowed",
            ));
        }
        start.saturating_add(count)
    } else {
        i64::MAX
    };
    let first = start.max(1);
    if end <= first {
        return text_result("");
    }
    let taken: String = text
        .chars()
        .skip((first - 1) as usize)
        .take((end - first).min(i64::from(u32::MAX)) as usize)
        .collect();
    text_result(taken)
}

pub fn text_left(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let n = int_arg(fcinfo, 1)?;
    let len = text.chars().count() as i64;
    let keep = if n >= 0 { n.min(len) } else { (len + n).max(0) };
    text_result(text.chars().take(keep as usize).collect::<String>())
}

pub fn text_right(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let n = int_arg(fcinfo, 1)?;
    let len = text.chars().count() as i64;
    let skip = if n >= 0 { (len - n).max(0) } else { (-n).min(len) };
    text_result(text.chars().skip(skip as usize).collect::<String>())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TrimMode {
    Both,
    Leading,
    Trailing,
}

fn trim_with(fcinfo: &FunctionCallInfo<'_>, mode: TrimMode) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let set: Vec<char> = if fcinfo.nargs() > 1 {
        text_arg(fcinfo, 1)?.chars().collect()
    } else {
        vec![' ']
    };
    let in_set = |c: char| set.contains(&c);
    let trimmed = match mode {
        TrimMode::Both => text.trim_matches(in_set),
        TrimMode::Leading => text.trim_start_matches(in_set),
        TrimMode::Trailing => text.trim_end_matches(in_set),
    };
    text_result(trimmed)
}

pub fn text_btrim(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    trim_with(fcinfo, TrimMode::Both)
}

pub fn text_ltrim(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    trim_with(fcinfo, TrimMode::Leading)
}

pub fn text_rtrim(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    trim_with(fcinfo, TrimMode::Trailing)
}

/// Pad to `len` characters with `fill`, truncating when already longer.
pub fn pad_string(input: &str, len: usize, fill: &str, left: bool) -> String {
    let input_len = input.chars().count();
    if input_len >= len {
        return input.chars().take(len).collect();
    }
    if fill.is_empty() {
        return input.to_string();
    }
    let padding: String = fill.chars().cycle().take(len - input_len).collect();
    if left {
        format!("{padding}{input}")
    } else {
        format!("{input}{padding}")
    }
}

fn pad(fcinfo: &FunctionCallInfo<'_>, left: bool) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let len = int_arg(fcinfo, 1)?.max(0) as usize;
    let fill = if fcinfo.nargs() > 2 { text_arg(fcinfo, 2)? } else { " " };
    text_result(pad_string(text, len, fill, left))
}

pub fn text_lpad(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    pad(fcinfo, true)
}

pub fn text_rpad(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    pad(fcinfo, false)
}

/// `split_part(text, delimiter, n)`; negative `n` counts from the end.
pub fn text_split_part(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let delimiter = text_arg(fcinfo, 1)?;
    let n = int_arg(fcinfo, 2)?;
    if n == 0 {
        return Err(PgError::new(
            SqlState::InvalidParameterValue,
            "field position must not be zero",
        ));
    }
    let parts: Vec<&str> = if delimiter.is_empty() {
        vec![text]
    } else {
        text.split(delimiter).collect()
    };
    let index = if n > 0 {
        (n - 1) as usize
    } else {
        match parts.len().checked_sub(n.unsigned_abs() as usize) {
            Some(index) => index,
            None => return text_result(""),
        }
    };
    text_result(parts.get(index).copied().unwrap_or(""))
}

// -- digests and encodings ------------------------------------------------------

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn text_md5(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(hex(&md5::compute(text_arg(fcinfo, 0)?.as_bytes()).0))
}

pub fn bytea_md5(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    text_result(hex(&md5::compute(bytea_arg(fcinfo, 0)?).0))
}

pub fn bytea_sha256(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::Bytea(Sha256::digest(bytea_arg(fcinfo, 0)?).to_vec()))
}

fn unknown_encoding(format: &str) -> PgError {
    PgError::new(
        SqlState::InvalidParameterValue,
        format!("unrecognized encoding: \"{format}\""),
    )
}

/// `encode(bytea, format)` for the hex, base64 and escape formats.
pub fn binary_encode(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let bytes = bytea_arg(fcinfo, 0)?;
    let format = text_arg(fcinfo, 1)?;
    match format.to_ascii_lowercase().as_str() {
        "hex" => text_result(hex(bytes)),
        "base64" => {
            // Lines are wrapped at 76 characters.
            let encoded = BASE64.encode(bytes);
            let lines: Vec<&str> = encoded
                .as_bytes()
                .chunks(76)
                .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
                .collect();
            text_result(lines.join("\n"))
        }
        "escape" => {
            let mut out = String::new();
            for &byte in bytes {
                match byte {
                    b'\\' => out.push_str("\\\\"),
                    0 | 0x80..=0xff => out.push_str(&format!("\\{byte:03o}")),
                    _ => out.push(byte as char),
                }
            }
            text_result(out)
        }
        _ => Err(unknown_encoding(format)),
    }
}

/// `decode(text, format)`.
pub fn binary_decode(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let text = text_arg(fcinfo, 0)?;
    let format = text_arg(fcinfo, 1)?;
    let bytes = match format.to_ascii_lowercase().as_str() {
        "hex" => bytea_in(&format!("\\x{text}"))?,
        "base64" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            BASE64.decode(compact).map_err(|err| {
                PgError::new(
                    SqlState::InvalidParameterValue,
                    format!("invalid base64 sequence: {err}"),
                )
            })?
        }
        "escape" => bytea_in(text)?,
        _ => return Err(unknown_encoding(format)),
    };
    Ok(Datum::Bytea(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::{INT4OID, TEXTARRAYOID, TEXTOID};

    fn call(func: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>) -> PgResult<Datum> {
        let catalog = Catalog::default();
        let argtypes: Vec<_> = args
            .iter()
            .map(|arg| if matches!(arg, Datum::Int4(_)) { INT4OID } else { TEXTOID })
            .collect();
        func(&FunctionCallInfo {
            args,
            argtypes: &argtypes,
            rettype: TEXTOID,
            collation: 0,
            funcvariadic: false,
            catalog: &catalog,
        })
    }

    fn t(s: &str) -> Datum {
        Datum::text(s)
    }

    #[test]
    fn like_handles_wildcards_and_escapes() {
        let m = |text: &str, pattern: &str| {
            like_match(&text.chars().collect::<Vec<_>>(), &pattern.chars().collect::<Vec<_>>()).unwrap()
        };
        assert!(m("hello", "h%o"));
        assert!(m("hello", "_ello"));
        assert!(!m("hello", "h_o"));
        assert!(m("50%", "50\\%"));
        assert!(!m("500", "50\\%"));
        assert!(m("", "%"));
        assert!(m("abcabc", "%abc"));
        let err = like_match(&['a'], &['a', '\\']).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidEscapeSequence);
    }

    #[test]
    fn regex_operators_and_functions() {
        assert_eq!(call(text_regex_match, vec![t("abc123"), t("^[a-z]+[0-9]+$")]).unwrap(), Datum::Bool(true));
        assert_eq!(call(text_regex_imatch, vec![t("ABC"), t("^abc$")]).unwrap(), Datum::Bool(true));
        assert_eq!(call(text_regex_not_match, vec![t("ABC"), t("^abc$")]).unwrap(), Datum::Bool(true));
        assert_eq!(
            call(text_regexp_replace, vec![t("a-b-c"), t("-"), t("+"), t("g")]).unwrap(),
            t("a+b+c")
        );
        assert_eq!(
            call(text_regexp_replace, vec![t("john smith"), t("(\\w+) (\\w+)"), t("\\2, \\1 $")]).unwrap(),
            t("smith, john $")
        );
        let Datum::Array(groups) = call(text_regexp_match, vec![t("abc123"), t("([a-z]+)([0-9]+)")]).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(groups.elements, vec![t("abc"), t("123")]);
        assert_eq!(call(text_regexp_match, vec![t("xyz"), t("[0-9]")]).unwrap(), Datum::Null);
        let err = call(text_regex_match, vec![t("x"), t("(")]).unwrap_err();
        assert_eq!(err.code(), "2201B");
        let err = call(text_regexp_like, vec![t("x"), t("x"), t("q")]).unwrap_err();
        assert_eq!(err.code(), "22023");
    }

    #[test]
    fn substr_with_nonpositive_start() {
        assert_eq!(call(text_substr, vec![t("hello"), Datum::Int4(0), Datum::Int4(3)]).unwrap(), t("he"));
        assert_eq!(call(text_substr, vec![t("hello"), Datum::Int4(2)]).unwrap(), t("ello"));
        let err = call(text_substr, vec![t("hello"), Datum::Int4(1), Datum::Int4(-1)]).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::SubstringError);
    }

    #[test]
    fn split_part_counts_from_either_end() {
        assert_eq!(call(text_split_part, vec![t("a,b,c"), t(","), Datum::Int4(2)]).unwrap(), t("b"));
        assert_eq!(call(text_split_part, vec![t("a,b,c"), t(","), Datum::Int4(-1)]).unwrap(), t("c"));
        assert_eq!(call(text_split_part, vec![t("a,b,c"), t(","), Datum::Int4(5)]).unwrap(), t(""));
        assert!(call(text_split_part, vec![t("a"), t(","), Datum::Int4(0)]).is_err());
    }

    #[test]
    fn concat_skips_nulls() {
        assert_eq!(
            call(text_concat, vec![t("a"), Datum::Null, Datum::Int4(1)]).unwrap(),
            t("a1")
        );
        assert_eq!(
            call(text_concat_ws, vec![t("-"), t("a"), Datum::Null, t("b")]).unwrap(),
            t("a-b")
        );
        assert_eq!(call(text_concat_ws, vec![Datum::Null, t("a")]).unwrap(), Datum::Null);
    }

    #[test]
    fn concat_spreads_an_explicit_variadic_array() {
        let catalog = Catalog::default();
        let argtypes = [TEXTOID, TEXTARRAYOID];
        let spread = |func: fn(&FunctionCallInfo<'_>) -> PgResult<Datum>, args: Vec<Datum>| {
            func(&FunctionCallInfo {
                args,
                argtypes: &argtypes,
                rettype: TEXTOID,
                collation: 0,
                funcvariadic: true,
                catalog: &catalog,
            })
        };
        let array = Datum::array(ArrayValue::from_vec(TEXTOID, vec![t("a"), Datum::Null, t("b")]));
        assert_eq!(spread(text_concat_ws, vec![t(","), array.clone()]).unwrap(), t("a,b"));
        assert_eq!(spread(text_concat, vec![array]).unwrap(), t("ab"));
        assert_eq!(spread(text_concat_ws, vec![t(","), Datum::Null]).unwrap(), Datum::Null);
        assert_eq!(spread(text_concat, vec![Datum::Null]).unwrap(), Datum::Null);
    }

    #[test]
    fn padding_and_case() {
        assert_eq!(call(text_lpad, vec![t("hi"), Datum::Int4(5), t("xy")]).unwrap(), t("xyxhi"));
        assert_eq!(call(text_rpad, vec![t("hello"), Datum::Int4(3)]).unwrap(), t("hel"));
        assert_eq!(call(text_initcap, vec![t("hello wORLD")]).unwrap(), t("Hello World"));
        assert_eq!(
            call(text_md5, vec![t("abc")]).unwrap(),
            t("900150983cd24fb0d6963f7d28e17f72")
        );
    }
}
