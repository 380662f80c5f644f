//! Snapshot store: versioned cells plus read attribution.
//!
//! Writes never propagate synchronously. Outside of execution they commit at
//! once and mark the cell dirty for the current turn; while a pass is running
//! they land in a pending overlay that only becomes visible at the next pass
//! boundary, so every read inside one pass sees the same committed value.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::{Error, Result, ScopeId};

new_key_type! {
    /// Identity of one observable cell.
    pub struct CellId;
}

/// Typed, copyable handle to a cell. The value lives in the runtime.
pub struct Cell<T> {
    id: CellId,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Cell<T> {
    pub(crate) fn from_id(id: CellId) -> Self {
        Cell {
            id,
            _ty: PhantomData,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cell<T> {}

impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Cell<T> {}

impl<T> Hash for Cell<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:?})", self.id)
    }
}

type EqFn = fn(&dyn Any, &dyn Any) -> bool;

fn erased_eq<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

struct CellSlot {
    value: Box<dyn Any>,
    pending: Option<Box<dyn Any>>,
    version: u64,
    owner: Option<ScopeId>,
    eq: EqFn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Structurally equal to the latest value; nothing recorded.
    Unchanged,
    /// Applied and marked dirty.
    Committed,
    /// Parked in the overlay until the next pass boundary.
    Deferred,
}

#[derive(Default)]
pub(crate) struct SnapshotStore {
    cells: SlotMap<CellId, CellSlot>,
    dirty: Vec<CellId>,
    dirty_set: HashSet<CellId>,
    overlay: Vec<CellId>,
    deferring: bool,
}

impl SnapshotStore {
    pub fn insert<T: Clone + PartialEq + 'static>(
        &mut self,
        value: T,
        owner: Option<ScopeId>,
    ) -> Cell<T> {
        let id = self.cells.insert(CellSlot {
            value: Box::new(value),
            pending: None,
            version: 0,
            owner,
            eq: erased_eq::<T>,
        });
        Cell::from_id(id)
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn read<T: Clone + 'static>(&self, id: CellId) -> Result<T> {
        self.cells
            .get(id)
            .and_then(|slot| slot.value.downcast_ref::<T>())
            .cloned()
            .ok_or(Error::UnknownCell(id))
    }

    pub fn version(&self, id: CellId) -> Option<u64> {
        self.cells.get(id).map(|s| s.version)
    }

    pub fn owner(&self, id: CellId) -> Option<ScopeId> {
        self.cells.get(id).and_then(|s| s.owner)
    }

    pub fn write<T: PartialEq + 'static>(&mut self, id: CellId, value: T) -> Result<WriteOutcome> {
        let slot = self.cells.get_mut(id).ok_or(Error::UnknownCell(id))?;
        if self.deferring {
            let latest = slot.pending.as_deref().unwrap_or(slot.value.as_ref());
            if (slot.eq)(latest, &value) {
                return Ok(WriteOutcome::Unchanged);
            }
            if slot.pending.is_none() {
                self.overlay.push(id);
            }
            slot.pending = Some(Box::new(value));
            return Ok(WriteOutcome::Deferred);
        }

        if (slot.eq)(slot.value.as_ref(), &value) {
            return Ok(WriteOutcome::Unchanged);
        }
        slot.value = Box::new(value);
        slot.version += 1;
        if self.dirty_set.insert(id) {
            self.dirty.push(id);
        }
        Ok(WriteOutcome::Committed)
    }

    /// Commits immediately, even mid-pass, without marking the cell dirty.
    /// Used for runtime-owned cells whose dependents are scheduled directly.
    pub fn commit_now<T: PartialEq + 'static>(&mut self, id: CellId, value: T) -> Result<bool> {
        let slot = self.cells.get_mut(id).ok_or(Error::UnknownCell(id))?;
        if (slot.eq)(slot.value.as_ref(), &value) {
            return Ok(false);
        }
        slot.value = Box::new(value);
        slot.version += 1;
        Ok(true)
    }

    /// Makes the overlay visible. Pending values equal to the committed one
    /// are discarded without a version bump.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        for id in std::mem::take(&mut self.overlay) {
            let Some(slot) = self.cells.get_mut(id) else {
                continue;
            };
            let Some(pending) = slot.pending.take() else {
                continue;
            };
            if (slot.eq)(pending.as_ref(), slot.value.as_ref()) {
                continue;
            }
            slot.value = pending;
            slot.version += 1;
            applied += 1;
            if self.dirty_set.insert(id) {
                self.dirty.push(id);
            }
        }
        applied
    }

    pub fn has_pending(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Dirty cells in first-write order; clears the set.
    pub fn take_dirty(&mut self) -> Vec<CellId> {
        self.dirty_set.clear();
        std::mem::take(&mut self.dirty)
    }

    /// Returns the previous mode.
    pub fn set_deferring(&mut self, deferring: bool) -> bool {
        std::mem::replace(&mut self.deferring, deferring)
    }

    pub fn remove(&mut self, id: CellId) -> bool {
        self.overlay.retain(|c| *c != id);
        if self.dirty_set.remove(&id) {
            self.dirty.retain(|c| *c != id);
        }
        self.cells.remove(id).is_some()
    }
}

pub(crate) type ReadSet = SmallVec<[CellId; 8]>;

struct ActiveScope {
    scope: ScopeId,
    epoch: u64,
    reads: ReadSet,
}

/// Stack of executing scopes; the top one owns untargeted reads.
#[derive(Default)]
pub(crate) struct ReadTracker {
    stack: Vec<ActiveScope>,
}

impl ReadTracker {
    pub fn begin(&mut self, scope: ScopeId, epoch: u64) {
        self.stack.push(ActiveScope {
            scope,
            epoch,
            reads: ReadSet::new(),
        });
    }

    pub fn end(&mut self, scope: ScopeId) -> ReadSet {
        match self.stack.iter().rposition(|a| a.scope == scope) {
            Some(pos) => self.stack.remove(pos).reads,
            None => ReadSet::new(),
        }
    }

    pub fn current(&self) -> Option<ScopeId> {
        self.stack.last().map(|a| a.scope)
    }

    pub fn record(&mut self, cell: CellId) {
        if let Some(top) = self.stack.last_mut()
            && !top.reads.contains(&cell)
        {
            top.reads.push(cell);
        }
    }

    /// Attributes a read to a specific execution. False when that execution
    /// is no longer on the stack.
    pub fn record_for(&mut self, scope: ScopeId, epoch: u64, cell: CellId) -> bool {
        match self
            .stack
            .iter_mut()
            .rev()
            .find(|a| a.scope == scope && a.epoch == epoch)
        {
            Some(active) => {
                if !active.reads.contains(&cell) {
                    active.reads.push(cell);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, scope: ScopeId) -> bool {
        self.stack.iter().any(|a| a.scope == scope)
    }

    pub fn has_read(&self, scope: ScopeId, cell: CellId) -> bool {
        self.stack
            .iter()
            .rev()
            .find(|a| a.scope == scope)
            .is_some_and(|a| a.reads.contains(&cell))
    }
}

/// Marks a scope active for the duration of its execution.
///
/// `finish` hands back the fresh read set; dropping without finishing (an
/// unwind) discards it so the previously committed set stays in place.
pub(crate) struct ScopeGuard<'a> {
    tracker: &'a RefCell<ReadTracker>,
    scope: ScopeId,
    finished: bool,
}

impl<'a> ScopeGuard<'a> {
    pub fn begin(tracker: &'a RefCell<ReadTracker>, scope: ScopeId, epoch: u64) -> Self {
        tracker.borrow_mut().begin(scope, epoch);
        ScopeGuard {
            tracker,
            scope,
            finished: false,
        }
    }

    pub fn finish(mut self) -> ReadSet {
        self.finished = true;
        self.tracker.borrow_mut().end(self.scope)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let discarded = self.tracker.borrow_mut().end(self.scope);
            log::trace!(
                "scope {:?} exited abnormally; discarded {} reads",
                self.scope,
                discarded.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn scope(n: u64) -> ScopeId {
        ScopeId::from(KeyData::from_ffi(n | (1 << 32)))
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let mut store = SnapshotStore::default();
        let c = store.insert(1, None);
        assert_eq!(store.write(c.id(), 1).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.version(c.id()), Some(0));
        assert!(!store.has_dirty());

        assert_eq!(store.write(c.id(), 2).unwrap(), WriteOutcome::Committed);
        assert_eq!(store.write(c.id(), 2).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.version(c.id()), Some(1));
        assert_eq!(store.take_dirty(), vec![c.id()]);
    }

    #[test]
    fn deferred_writes_stay_invisible_until_applied() {
        let mut store = SnapshotStore::default();
        let c = store.insert(String::from("a"), None);
        store.set_deferring(true);
        assert_eq!(
            store.write(c.id(), String::from("b")).unwrap(),
            WriteOutcome::Deferred
        );
        assert_eq!(store.read::<String>(c.id()).unwrap(), "a");
        assert!(!store.has_dirty());

        store.set_deferring(false);
        assert_eq!(store.apply_pending(), 1);
        assert_eq!(store.read::<String>(c.id()).unwrap(), "b");
        assert_eq!(store.version(c.id()), Some(1));
        assert_eq!(store.take_dirty(), vec![c.id()]);
    }

    #[test]
    fn pending_value_reverted_to_committed_is_dropped() {
        let mut store = SnapshotStore::default();
        let c = store.insert(0u32, None);
        store.set_deferring(true);
        store.write(c.id(), 5u32).unwrap();
        store.write(c.id(), 0u32).unwrap();
        store.set_deferring(false);
        assert_eq!(store.apply_pending(), 0);
        assert_eq!(store.version(c.id()), Some(0));
        assert!(!store.has_dirty());
    }

    #[test]
    fn removed_cell_is_unknown() {
        let mut store = SnapshotStore::default();
        let c = store.insert(1u8, None);
        assert!(store.remove(c.id()));
        assert!(matches!(store.read::<u8>(c.id()), Err(Error::UnknownCell(_))));
        assert!(matches!(store.write(c.id(), 2u8), Err(Error::UnknownCell(_))));
    }

    #[test]
    fn tracker_attributes_reads_to_top_and_dedups() {
        let tracker = RefCell::new(ReadTracker::default());
        let mut store = SnapshotStore::default();
        let a = store.insert(1, None).id();
        let b = store.insert(2, None).id();

        let outer = ScopeGuard::begin(&tracker, scope(1), 1);
        tracker.borrow_mut().record(a);
        {
            let inner = ScopeGuard::begin(&tracker, scope(2), 1);
            tracker.borrow_mut().record(b);
            tracker.borrow_mut().record(b);
            assert_eq!(inner.finish().as_slice(), &[b]);
        }
        tracker.borrow_mut().record(a);
        assert_eq!(outer.finish().as_slice(), &[a]);
        assert_eq!(tracker.borrow().current(), None);
    }

    #[test]
    fn guard_drop_discards_reads() {
        let tracker = RefCell::new(ReadTracker::default());
        let mut store = SnapshotStore::default();
        let a = store.insert(1, None).id();
        {
            let _g = ScopeGuard::begin(&tracker, scope(3), 7);
            assert!(tracker.borrow_mut().record_for(scope(3), 7, a));
            assert!(!tracker.borrow_mut().record_for(scope(3), 6, a));
        }
        assert!(!tracker.borrow().is_active(scope(3)));
        assert!(!tracker.borrow_mut().record_for(scope(3), 7, a));
    }
}
