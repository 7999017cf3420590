//! Identifier normalization shared by the scanner, the analyzer and the
//! SQL the engine generates for itself.

use tracing::info;

/// Identifiers are limited to `NAMEDATALEN - 1` bytes.
pub const NAMEDATALEN: usize = 64;

/// Fold an unquoted identifier to lower case (ASCII letters only) and cut it
/// to length.
pub fn downcase_truncate_identifier(ident: &str, warn: bool) -> String {
    let mut folded = ident.to_ascii_lowercase();
    truncate_identifier(&mut folded, warn);
    folded
}

/// Cut `ident` to `NAMEDATALEN - 1` bytes on a character boundary. Returns
/// whether anything was removed.
pub fn truncate_identifier(ident: &mut String, warn: bool) -> bool {
    if ident.len() < NAMEDATALEN {
        return false;
    }
    let cut = (0..NAMEDATALEN).rev().find(|&idx| ident.is_char_boundary(idx)).unwrap_or(0);
    if warn {
        info!("identifier \"{ident}\" will be truncated to \"{}\"", &ident[..cut]);
    }
    ident.truncate(cut);
    true
}

pub fn scanner_isspace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\u{000b}' | '\u{000c}')
}

/// `ident` as it must be written in SQL text to come back unchanged.
pub fn quote_identifier(ident: &str) -> String {
    let mut chars = ident.chars();
    let plain = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !crate::parser::scan::is_reserved_word(ident);
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_and_truncates() {
        assert_eq!(downcase_truncate_identifier("FoO_BaR123", false), "foo_bar123");
        let long = downcase_truncate_identifier(&"A".repeat(80), false);
        assert_eq!(long, "a".repeat(NAMEDATALEN - 1));
        // Non-ASCII letters keep their case.
        assert_eq!(downcase_truncate_identifier("ÄB", false), "Äb");
    }

    #[test]
    fn truncation_stops_on_char_boundary() {
        let mut ident = format!("{}é", "a".repeat(62));
        assert!(truncate_identifier(&mut ident, false));
        assert_eq!(ident, "a".repeat(62));
    }

    #[test]
    fn quote_identifier_only_when_needed() {
        assert_eq!(quote_identifier("abc_1"), "abc_1");
        assert_eq!(quote_identifier("Abc"), "\"Abc\"");
        assert_eq!(quote_identifier("select"), "\"select\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier(""), "\"\"");
    }
}
