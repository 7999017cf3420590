//! Destination receivers: where the rows of an executed plan go.

use tracing::debug;

use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::CmdType;
use crate::nodes::tupdesc::TupleDesc;
use crate::utils::adt::io::datum_out;
use crate::utils::elog::PgResult;

use super::tuptable::TupleTableSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDest {
    /// Results are discarded.
    None,
    /// Results are written to the log.
    Debug,
    /// Results are kept in memory for the caller.
    LocalPortal,
    Remote,
    RemoteInternal,
    CopyBegin,
    CopyEnd,
    Spi,
    /// Results are inserted into a transient heap (matview population).
    TransientRel,
}

/// Consumer of the rows a plan produces. `receive` returns false to stop
/// the executor early.
pub trait DestReceiver {
    fn startup(&mut self, operation: CmdType, desc: &TupleDesc) -> PgResult<()>;
    fn receive(&mut self, slot: &TupleTableSlot) -> PgResult<bool>;
    fn shutdown(&mut self) -> PgResult<()>;
    fn destroy(&mut self) {}
    fn dest(&self) -> CommandDest;
}

#[derive(Debug, Default)]
pub struct NoneReceiver;

impl DestReceiver for NoneReceiver {
    fn startup(&mut self, _operation: CmdType, _desc: &TupleDesc) -> PgResult<()> {
        Ok(())
    }

    fn receive(&mut self, _slot: &TupleTableSlot) -> PgResult<bool> {
        Ok(true)
    }

    fn shutdown(&mut self) -> PgResult<()> {
        Ok(())
    }

    fn dest(&self) -> CommandDest {
        CommandDest::None
    }
}

/// Logs every row at debug level.
#[derive(Debug, Default)]
pub struct DebugReceiver {
    columns: Vec<String>,
}

impl DestReceiver for DebugReceiver {
    fn startup(&mut self, operation: CmdType, desc: &TupleDesc) -> PgResult<()> {
        self.columns = desc.column_names();
        debug!(?operation, columns = ?self.columns, "debug receiver started");
        Ok(())
    }

    fn receive(&mut self, slot: &TupleTableSlot) -> PgResult<bool> {
        let rendered: Vec<String> = self
            .columns
            .iter()
            .zip(&slot.values)
            .map(|(name, value)| match value {
                Datum::Null => format!("{name} = null"),
                other => format!("{name} = \"{}\"", datum_out(other)),
            })
            .collect();
        debug!(row = %rendered.join(", "), "row");
        Ok(true)
    }

    fn shutdown(&mut self) -> PgResult<()> {
        debug!("debug receiver finished");
        Ok(())
    }

    fn dest(&self) -> CommandDest {
        CommandDest::Debug
    }
}

/// Keeps every row in memory, for portals and SPI callers.
#[derive(Debug)]
pub struct CollectingReceiver {
    dest: CommandDest,
    pub desc: TupleDesc,
    pub rows: Vec<Vec<Datum>>,
    /// Stop after this many rows; `None` keeps everything.
    pub limit: Option<usize>,
}

impl CollectingReceiver {
    pub fn new(dest: CommandDest) -> Self {
        Self {
            dest,
            desc: TupleDesc::default(),
            rows: Vec::new(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl DestReceiver for CollectingReceiver {
    fn startup(&mut self, _operation: CmdType, desc: &TupleDesc) -> PgResult<()> {
        self.desc = desc.clone();
        self.rows.clear();
        Ok(())
    }

    fn receive(&mut self, slot: &TupleTableSlot) -> PgResult<bool> {
        self.rows.push(slot.values.clone());
        Ok(self.limit.is_none_or(|limit| self.rows.len() < limit))
    }

    fn shutdown(&mut self) -> PgResult<()> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.rows.clear();
    }

    fn dest(&self) -> CommandDest {
        self.dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;
    use crate::nodes::tupdesc::Attribute;

    #[test]
    fn collecting_receiver_stops_at_its_limit() {
        let mut dest = CollectingReceiver::new(CommandDest::Spi).with_limit(2);
        let desc = TupleDesc::new(vec![Attribute::new("x", INT4OID, -1, 0)]);
        dest.startup(CmdType::Select, &desc).unwrap();
        assert!(dest.receive(&TupleTableSlot::new(vec![Datum::Int4(1)])).unwrap());
        assert!(!dest.receive(&TupleTableSlot::new(vec![Datum::Int4(2)])).unwrap());
        assert_eq!(dest.rows.len(), 2);
        assert_eq!(dest.desc.column_names(), vec!["x".to_string()]);
    }

    #[test]
    fn debug_receiver_accepts_nulls() {
        let mut dest = DebugReceiver::default();
        let desc = TupleDesc::new(vec![Attribute::new("x", INT4OID, -1, 0)]);
        dest.startup(CmdType::Select, &desc).unwrap();
        assert!(dest.receive(&TupleTableSlot::new(vec![Datum::Null])).unwrap());
        dest.shutdown().unwrap();
        assert_eq!(dest.dest(), CommandDest::Debug);
    }
}
