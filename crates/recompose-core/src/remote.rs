//! Cross-thread writes.
//!
//! Cells live on the UI thread. Other threads (effect tasks included) hold a
//! [`RemoteWriter`] and queue writes; the runtime applies the queue at the
//! start of the next turn, in submission order, with the usual equality check.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{Cell, CellId, Result, Runtime, ScopeId};

type ApplyFn = Box<dyn FnOnce(&Runtime) -> Result<bool> + Send>;

/// Owner scope and token of the effect that issued a write.
#[derive(Clone)]
pub(crate) struct WriteGuard {
    pub scope: ScopeId,
    pub token: CancellationToken,
}

pub(crate) struct RemoteWrite {
    pub cell: CellId,
    pub guard: Option<WriteGuard>,
    pub apply: ApplyFn,
}

#[derive(Default)]
pub(crate) struct RemoteQueue {
    writes: Mutex<Vec<RemoteWrite>>,
    violations: Mutex<Vec<(ScopeId, CellId)>>,
    closed: AtomicBool,
}

impl RemoteQueue {
    pub fn take(&self) -> Vec<RemoteWrite> {
        std::mem::take(&mut *self.writes.lock())
    }

    pub fn take_violations(&self) -> Vec<(ScopeId, CellId)> {
        std::mem::take(&mut *self.violations.lock())
    }

    pub fn violation(&self, scope: ScopeId, cell: CellId) {
        self.violations.lock().push((scope, cell));
    }

    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }

    /// Refuses further writes and drops queued ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.writes.lock().clear();
        self.violations.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// `Send` handle for writing cells from any thread.
#[derive(Clone)]
pub struct RemoteWriter {
    queue: Arc<RemoteQueue>,
    guard: Option<WriteGuard>,
}

impl RemoteWriter {
    pub(crate) fn new(queue: Arc<RemoteQueue>) -> Self {
        Self { queue, guard: None }
    }

    pub(crate) fn guarded(queue: Arc<RemoteQueue>, scope: ScopeId, token: CancellationToken) -> Self {
        Self {
            queue,
            guard: Some(WriteGuard { scope, token }),
        }
    }

    /// Queues `value` for `cell`. False when the issuing effect was already
    /// cancelled or the runtime is gone, in which case nothing is queued.
    pub fn write<T: PartialEq + Send + 'static>(&self, cell: Cell<T>, value: T) -> bool {
        if self.queue.is_closed() {
            log::debug!("dropping write to {:?}: runtime was dropped", cell.id());
            return false;
        }
        if let Some(g) = &self.guard
            && g.token.is_cancelled()
        {
            log::warn!(
                "dropping write to {:?}: effect of {:?} was cancelled",
                cell.id(),
                g.scope
            );
            self.queue.violation(g.scope, cell.id());
            return false;
        }
        self.queue.writes.lock().push(RemoteWrite {
            cell: cell.id(),
            guard: self.guard.clone(),
            apply: Box::new(move |rt| rt.try_write(cell, value)),
        });
        true
    }

    /// True while the runtime exists and the issuing effect (if any) has not
    /// been cancelled.
    pub fn is_live(&self) -> bool {
        !self.queue.is_closed() && self.guard.as_ref().is_none_or(|g| !g.token.is_cancelled())
    }
}
