//! In-memory heap storage.
//!
//! Every relation's rows live in a [`Heap`] keyed by its relfilenode. Each
//! tuple records the command that inserted it (`cmin`) and, once deleted, the
//! command that deleted it (`cmax`). A scan sees a tuple when it was inserted
//! by an earlier command and not deleted by one. Heaps are shared behind
//! `Arc`s so taking a storage snapshot is cheap and writers copy on write.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::trace;

use crate::access::xact::{CommandId, FROZEN_COMMAND_ID, current_command_id};
use crate::catalog::oid::Oid;
use crate::nodes::datum::{Datum, ItemPointer};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

#[derive(Debug, Clone, PartialEq)]
pub struct HeapTupleData {
    pub values: Vec<Datum>,
    pub cmin: CommandId,
    pub cmax: Option<CommandId>,
}

impl HeapTupleData {
    pub fn is_live(&self) -> bool {
        self.cmax.is_none()
    }
}

/// Visibility horizon of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub curcid: CommandId,
}

impl Snapshot {
    /// A snapshot that sees everything done before the running command.
    pub fn current() -> Self {
        Self {
            curcid: current_command_id(),
        }
    }

    pub fn tuple_visible(&self, tuple: &HeapTupleData) -> bool {
        let inserted = tuple.cmin == FROZEN_COMMAND_ID || tuple.cmin < self.curcid;
        let deleted = tuple.cmax.is_some_and(|cmax| cmax < self.curcid);
        inserted && !deleted
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    tuples: Vec<HeapTupleData>,
}

impl Heap {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuple(&self, tid: ItemPointer) -> Option<&HeapTupleData> {
        self.tuples.get(tid.index()?)
    }
}

#[derive(Debug, Default)]
pub struct HeapStorage {
    heaps: HashMap<Oid, Arc<Heap>>,
}

impl HeapStorage {
    fn heap(&self, relfilenode: Oid) -> PgResult<&Arc<Heap>> {
        self.heaps
            .get(&relfilenode)
            .ok_or_else(|| elog(format!("could not open file for relfilenode {relfilenode}")))
    }

    fn heap_mut(&mut self, relfilenode: Oid) -> PgResult<&mut Heap> {
        self.heaps
            .get_mut(&relfilenode)
            .map(Arc::make_mut)
            .ok_or_else(|| elog(format!("could not open file for relfilenode {relfilenode}")))
    }
}

/// Heaps as they were at some moment; see [`restore_storage`].
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    heaps: HashMap<Oid, Arc<Heap>>,
}

static GLOBAL_STORAGE: OnceLock<RwLock<HeapStorage>> = OnceLock::new();

fn global_storage() -> &'static RwLock<HeapStorage> {
    GLOBAL_STORAGE.get_or_init(|| RwLock::new(HeapStorage::default()))
}

pub(crate) fn with_storage_read<T>(f: impl FnOnce(&HeapStorage) -> T) -> T {
    let storage = global_storage()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    f(&storage)
}

pub(crate) fn with_storage_write<T>(f: impl FnOnce(&mut HeapStorage) -> T) -> T {
    let mut storage = global_storage()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    f(&mut storage)
}

pub fn storage_snapshot() -> StorageSnapshot {
    with_storage_read(|storage| StorageSnapshot {
        heaps: storage.heaps.clone(),
    })
}

pub fn restore_storage(snapshot: StorageSnapshot) {
    with_storage_write(|storage| storage.heaps = snapshot.heaps);
}

pub fn reset_global_storage_for_tests() {
    with_storage_write(|storage| storage.heaps.clear());
}

/// Create an empty heap file.
pub fn heap_create(relfilenode: Oid) {
    with_storage_write(|storage| {
        storage.heaps.insert(relfilenode, Arc::new(Heap::default()));
    });
}

pub fn heap_drop(relfilenode: Oid) {
    with_storage_write(|storage| {
        storage.heaps.remove(&relfilenode);
    });
}

/// Remove every tuple.
pub fn heap_truncate(relfilenode: Oid) -> PgResult<()> {
    with_storage_write(|storage| {
        *storage.heap_mut(relfilenode)? = Heap::default();
        Ok(())
    })
}

pub fn heap_insert(relfilenode: Oid, values: Vec<Datum>, cid: CommandId) -> PgResult<ItemPointer> {
    with_storage_write(|storage| {
        let heap = storage.heap_mut(relfilenode)?;
        let tid = ItemPointer::from_index(heap.tuples.len());
        heap.tuples.push(HeapTupleData {
            values,
            cmin: cid,
            cmax: None,
        });
        trace!(relfilenode, %tid, "heap insert");
        Ok(tid)
    })
}

/// Insert tuples visible to every snapshot, as a bulk load into a fresh heap.
pub fn heap_insert_frozen(relfilenode: Oid, rows: Vec<Vec<Datum>>) -> PgResult<()> {
    with_storage_write(|storage| {
        let heap = storage.heap_mut(relfilenode)?;
        heap.tuples.extend(rows.into_iter().map(|values| HeapTupleData {
            values,
            cmin: FROZEN_COMMAND_ID,
            cmax: None,
        }));
        Ok(())
    })
}

/// Mark a tuple deleted. Returns false when it was already deleted.
pub fn heap_delete(relfilenode: Oid, tid: ItemPointer, cid: CommandId) -> PgResult<bool> {
    with_storage_write(|storage| {
        let heap = storage.heap_mut(relfilenode)?;
        let tuple = tid
            .index()
            .and_then(|idx| heap.tuples.get_mut(idx))
            .ok_or_else(|| {
                PgError::new(SqlState::InternalError, format!("tuple {tid} does not exist"))
            })?;
        if tuple.cmax.is_some() {
            return Ok(false);
        }
        tuple.cmax = Some(cid);
        trace!(relfilenode, %tid, "heap delete");
        Ok(true)
    })
}

/// Replace a tuple with a new version; the old one is deleted by `cid`.
pub fn heap_update(
    relfilenode: Oid,
    tid: ItemPointer,
    values: Vec<Datum>,
    cid: CommandId,
) -> PgResult<Option<ItemPointer>> {
    if !heap_delete(relfilenode, tid, cid)? {
        return Ok(None);
    }
    heap_insert(relfilenode, values, cid).map(Some)
}

pub fn heap_fetch(relfilenode: Oid, tid: ItemPointer, snapshot: Snapshot) -> PgResult<Option<Vec<Datum>>> {
    with_storage_read(|storage| {
        let heap = storage.heap(relfilenode)?;
        Ok(heap
            .tuple(tid)
            .filter(|tuple| snapshot.tuple_visible(tuple))
            .map(|tuple| tuple.values.clone()))
    })
}

/// Open a sequential scan. The scan holds its own reference to the heap, so
/// writes made while it runs are not seen.
pub fn heap_beginscan(relfilenode: Oid, snapshot: Snapshot) -> PgResult<HeapScan> {
    let heap = with_storage_read(|storage| storage.heap(relfilenode).map(Arc::clone))?;
    Ok(HeapScan {
        heap,
        snapshot,
        pos: 0,
    })
}

/// Tuples not deleted by any command, regardless of snapshot. Used for
/// uniqueness checks.
pub fn heap_live_tuples(relfilenode: Oid) -> PgResult<Vec<(ItemPointer, Vec<Datum>)>> {
    with_storage_read(|storage| {
        let heap = storage.heap(relfilenode)?;
        Ok(heap
            .tuples
            .iter()
            .enumerate()
            .filter(|(_, tuple)| tuple.is_live())
            .map(|(idx, tuple)| (ItemPointer::from_index(idx), tuple.values.clone()))
            .collect())
    })
}

pub fn heap_exists(relfilenode: Oid) -> bool {
    with_storage_read(|storage| storage.heaps.contains_key(&relfilenode))
}

/// Apply `f` to every stored tuple, dead ones included, for ALTER TABLE
/// column changes. The flag tells whether the tuple is live.
pub fn heap_rewrite(relfilenode: Oid, mut f: impl FnMut(&mut Vec<Datum>, bool)) -> PgResult<()> {
    with_storage_write(|storage| {
        let heap = storage.heap_mut(relfilenode)?;
        for tuple in &mut heap.tuples {
            let live = tuple.is_live();
            f(&mut tuple.values, live);
        }
        Ok(())
    })
}

#[derive(Debug)]
pub struct HeapScan {
    heap: Arc<Heap>,
    snapshot: Snapshot,
    pos: usize,
}

impl HeapScan {
    pub fn rescan(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for HeapScan {
    type Item = (ItemPointer, Vec<Datum>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(tuple) = self.heap.tuples.get(self.pos) {
            let tid = ItemPointer::from_index(self.pos);
            self.pos += 1;
            if self.snapshot.tuple_visible(tuple) {
                return Some((tid, tuple.values.clone()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcop::engine::with_global_state_lock;

    const NODE: Oid = 900_001;

    #[test]
    fn own_inserts_are_invisible_until_next_command() {
        with_global_state_lock(|| {
            heap_create(NODE);
            heap_insert(NODE, vec![Datum::Int4(1)], 10).unwrap();
            let same = heap_beginscan(NODE, Snapshot { curcid: 10 }).unwrap();
            assert_eq!(same.count(), 0);
            let next = heap_beginscan(NODE, Snapshot { curcid: 11 }).unwrap();
            assert_eq!(next.count(), 1);
            heap_drop(NODE);
        });
    }

    #[test]
    fn deleted_tuples_stay_visible_to_the_deleting_command() {
        with_global_state_lock(|| {
            heap_create(NODE);
            let tid = heap_insert(NODE, vec![Datum::Int4(1)], 1).unwrap();
            assert!(heap_delete(NODE, tid, 5).unwrap());
            assert!(!heap_delete(NODE, tid, 5).unwrap());
            assert!(heap_fetch(NODE, tid, Snapshot { curcid: 5 }).unwrap().is_some());
            assert!(heap_fetch(NODE, tid, Snapshot { curcid: 6 }).unwrap().is_none());
            assert!(heap_live_tuples(NODE).unwrap().is_empty());
            heap_drop(NODE);
        });
    }

    #[test]
    fn snapshot_restore_undoes_writes() {
        with_global_state_lock(|| {
            heap_create(NODE);
            heap_insert_frozen(NODE, vec![vec![Datum::Int4(1)]]).unwrap();
            let saved = storage_snapshot();
            heap_insert(NODE, vec![Datum::Int4(2)], 3).unwrap();
            restore_storage(saved);
            assert_eq!(heap_live_tuples(NODE).unwrap().len(), 1);
            heap_drop(NODE);
        });
    }

    #[test]
    fn missing_heap_is_an_error() {
        with_global_state_lock(|| {
            assert!(heap_beginscan(123_456_789, Snapshot::current()).is_err());
        });
    }
}
