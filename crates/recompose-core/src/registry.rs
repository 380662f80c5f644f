//! Observer registry: which scopes read which cells.
//!
//! Both directions are kept so that committing a fresh read set can drop
//! stale reverse edges without scanning every cell. Only the UI thread
//! mutates the registry, hence no locking.

use std::collections::{HashMap, HashSet};

use crate::store::ReadSet;
use crate::{CellId, ScopeId};

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    readers: HashMap<CellId, HashSet<ScopeId>>,
    reads: HashMap<ScopeId, ReadSet>,
}

impl ObserverRegistry {
    /// Replaces the scope's previous read set with `read_set`.
    pub fn commit(&mut self, scope: ScopeId, read_set: ReadSet) {
        if let Some(old) = self.reads.remove(&scope) {
            for cell in old.iter().filter(|c| !read_set.contains(*c)) {
                self.unlink(*cell, scope);
            }
        }
        for cell in &read_set {
            self.readers.entry(*cell).or_default().insert(scope);
        }
        if !read_set.is_empty() {
            self.reads.insert(scope, read_set);
        }
    }

    /// Every scope that read any of `cells` in its last committed execution.
    pub fn dependents_of<'a>(&self, cells: impl IntoIterator<Item = &'a CellId>) -> HashSet<ScopeId> {
        let mut out = HashSet::new();
        for cell in cells {
            if let Some(scopes) = self.readers.get(cell) {
                out.extend(scopes.iter().copied());
            }
        }
        out
    }

    pub fn read_set(&self, scope: ScopeId) -> &[CellId] {
        self.reads.get(&scope).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn forget_scope(&mut self, scope: ScopeId) {
        if let Some(old) = self.reads.remove(&scope) {
            for cell in old {
                self.unlink(cell, scope);
            }
        }
    }

    pub fn forget_cell(&mut self, cell: CellId) {
        if let Some(scopes) = self.readers.remove(&cell) {
            for scope in scopes {
                if let Some(reads) = self.reads.get_mut(&scope) {
                    reads.retain(|c| *c != cell);
                    if reads.is_empty() {
                        self.reads.remove(&scope);
                    }
                }
            }
        }
    }

    fn unlink(&mut self, cell: CellId, scope: ScopeId) {
        if let Some(set) = self.readers.get_mut(&cell) {
            set.remove(&scope);
            if set.is_empty() {
                self.readers.remove(&cell);
            }
        }
    }

    #[cfg(test)]
    fn edge_count(&self) -> usize {
        self.readers.values().map(|s| s.len()).sum()
    }
}
