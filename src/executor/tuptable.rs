//! Tuple slots: one row flowing between plan nodes.

use crate::catalog::oid::{INVALID_OID, Oid};
use crate::nodes::datum::{Datum, ItemPointer};
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod};
use crate::nodes::primnodes::TargetEntry;
use crate::nodes::tupdesc::{Attribute, SELF_ITEM_POINTER_ATTRIBUTE_NUMBER, TABLE_OID_ATTRIBUTE_NUMBER, TupleDesc};
use crate::utils::elog::{PgResult, elog};

/// A materialized row. Rows read from a heap also remember where they came
/// from, which `ctid` and `tableoid` references need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleTableSlot {
    pub values: Vec<Datum>,
    pub tid: Option<ItemPointer>,
    pub tableoid: Oid,
}

impl TupleTableSlot {
    pub fn new(values: Vec<Datum>) -> Self {
        Self {
            values,
            tid: None,
            tableoid: INVALID_OID,
        }
    }

    pub fn from_heap(values: Vec<Datum>, tid: ItemPointer, tableoid: Oid) -> Self {
        Self {
            values,
            tid: Some(tid),
            tableoid,
        }
    }

    /// A row of `natts` nulls, used to null-extend outer joins.
    pub fn all_nulls(natts: usize) -> Self {
        Self::new(vec![Datum::Null; natts])
    }

    pub fn natts(&self) -> usize {
        self.values.len()
    }

    /// Fetch a user or system attribute. Attribute 0 (whole row) is handled
    /// by the evaluator, which knows the row type.
    pub fn get_attr(&self, attno: i16) -> PgResult<Datum> {
        match attno {
            SELF_ITEM_POINTER_ATTRIBUTE_NUMBER => Ok(self.tid.map_or(Datum::Null, Datum::Tid)),
            TABLE_OID_ATTRIBUTE_NUMBER => Ok(Datum::Oid(self.tableoid)),
            n if n > 0 => self
                .values
                .get(n as usize - 1)
                .cloned()
                .ok_or_else(|| elog(format!("attribute number {n} exceeds number of columns {}", self.natts()))),
            n => Err(elog(format!("invalid attribute number {n}"))),
        }
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }
}

/// Descriptor of the visible columns a target list produces.
pub fn exec_type_from_tl(tlist: &[TargetEntry]) -> TupleDesc {
    TupleDesc::new(
        tlist
            .iter()
            .filter(|tle| !tle.resjunk)
            .map(|tle| {
                Attribute::new(
                    tle.resname.clone().unwrap_or_else(|| "?column?".to_string()),
                    expr_type(&tle.expr),
                    expr_typmod(&tle.expr),
                    expr_collation(&tle.expr),
                )
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_attributes_come_from_the_heap_position() {
        let slot = TupleTableSlot::from_heap(vec![Datum::Int4(1)], ItemPointer::from_index(3), 42);
        assert_eq!(slot.get_attr(1).unwrap(), Datum::Int4(1));
        assert_eq!(slot.get_attr(-6).unwrap(), Datum::Oid(42));
        assert_eq!(slot.get_attr(-1).unwrap(), Datum::Tid(ItemPointer::from_index(3)));
        assert!(slot.get_attr(2).is_err());
    }

    #[test]
    fn projected_rows_have_no_ctid() {
        let slot = TupleTableSlot::new(vec![Datum::Null]);
        assert_eq!(slot.get_attr(-1).unwrap(), Datum::Null);
    }
}
