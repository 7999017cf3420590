//! External parameter lists (`$n` values handed to a statement).

use crate::catalog::oid::Oid;
use crate::catalog::pg_type::UNKNOWNOID;
use crate::nodes::datum::Datum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEntryKind {
    /// Looked up by name.
    Named,
    /// Positional `$n`.
    Num,
    /// Trigger-style new/old row values, looked up by attribute number.
    New,
    Old,
    /// Terminator.
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamListEntry {
    pub kind: ParamEntryKind,
    pub name: Option<String>,
    pub id: i32,
    pub ptype: Oid,
    pub value: Datum,
}

/// A parameter vector terminated by an `Invalid` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamListInfo {
    entries: Vec<ParamListEntry>,
}

impl Default for ParamListInfo {
    fn default() -> Self {
        Self {
            entries: vec![terminator()],
        }
    }
}

fn terminator() -> ParamListEntry {
    ParamListEntry {
        kind: ParamEntryKind::Invalid,
        name: None,
        id: 0,
        ptype: UNKNOWNOID,
        value: Datum::Null,
    }
}

impl ParamListInfo {
    /// Positional parameter list `$1..$n`.
    pub fn positional(values: Vec<(Oid, Datum)>) -> Self {
        let mut entries: Vec<ParamListEntry> = values
            .into_iter()
            .enumerate()
            .map(|(idx, (ptype, value))| ParamListEntry {
                kind: ParamEntryKind::Num,
                name: None,
                id: idx as i32 + 1,
                ptype,
                value,
            })
            .collect();
        entries.push(terminator());
        Self { entries }
    }

    pub fn push(&mut self, entry: ParamListEntry) {
        let at = self.entries.len() - 1;
        self.entries.insert(at, entry);
    }

    /// Entries before the terminator.
    pub fn entries(&self) -> &[ParamListEntry] {
        let end = self
            .entries
            .iter()
            .position(|entry| entry.kind == ParamEntryKind::Invalid)
            .unwrap_or(self.entries.len());
        &self.entries[..end]
    }

    pub fn num_params(&self) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.kind == ParamEntryKind::Num)
            .count()
    }

    /// Scan the list for a matching entry. Named entries match on name,
    /// the others on kind and id.
    pub fn find(&self, kind: ParamEntryKind, id: i32, name: Option<&str>) -> Option<&ParamListEntry> {
        self.entries().iter().find(|entry| {
            entry.kind == kind
                && match kind {
                    ParamEntryKind::Named => entry.name.as_deref() == name,
                    _ => entry.id == id,
                }
        })
    }

    pub fn type_of(&self, id: i32) -> Option<Oid> {
        self.find(ParamEntryKind::Num, id, None).map(|entry| entry.ptype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::{INT4OID, TEXTOID};

    #[test]
    fn positional_list_is_terminated() {
        let params = ParamListInfo::positional(vec![
            (INT4OID, Datum::Int4(7)),
            (TEXTOID, Datum::text("x")),
        ]);
        assert_eq!(params.num_params(), 2);
        assert_eq!(
            params.find(ParamEntryKind::Num, 2, None).map(|p| &p.value),
            Some(&Datum::text("x"))
        );
        assert!(params.find(ParamEntryKind::Num, 3, None).is_none());
    }

    #[test]
    fn named_lookup_ignores_positional_entries() {
        let mut params = ParamListInfo::positional(vec![(INT4OID, Datum::Int4(1))]);
        params.push(ParamListEntry {
            kind: ParamEntryKind::Named,
            name: Some("limit".to_string()),
            id: 0,
            ptype: INT4OID,
            value: Datum::Int4(10),
        });
        let found = params.find(ParamEntryKind::Named, 0, Some("limit"));
        assert_eq!(found.map(|p| &p.value), Some(&Datum::Int4(10)));
        assert!(params.find(ParamEntryKind::Named, 0, Some("other")).is_none());
    }
}
