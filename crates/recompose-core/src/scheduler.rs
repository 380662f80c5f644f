//! Invalidation scheduling.
//!
//! Dirty cells become a [`Batch`]: their dependents, deduplicated, ordered by
//! phase, then depth (parents before children), then creation order. The
//! per-phase queues are ordered the same way, so scopes enqueued mid-pass
//! (locals, layout outputs, error boundaries) slot into the right position.

use std::collections::BTreeSet;

use web_time::Instant;

use crate::scope::ScopeTree;
use crate::{Error, FrameReport, Phase, PhaseSet, Result, Runtime, ScopeId};

/// Queue ordering: shallower first, then older first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct QueueKey {
    pub depth: u32,
    pub seq: u64,
    pub id: ScopeId,
}

/// Scopes scheduled for re-execution by one pass of a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    composition: Vec<ScopeId>,
    layout: Vec<ScopeId>,
    draw: Vec<ScopeId>,
}

impl Batch {
    pub fn scopes(&self, phase: Phase) -> &[ScopeId] {
        match phase {
            Phase::Composition => &self.composition,
            Phase::Layout => &self.layout,
            Phase::Draw => &self.draw,
        }
    }

    /// Entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, ScopeId)> + '_ {
        Phase::ALL
            .into_iter()
            .flat_map(move |p| self.scopes(p).iter().map(move |id| (p, *id)))
    }

    pub fn len(&self) -> usize {
        self.composition.len() + self.layout.len() + self.draw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        self.iter().any(|(_, s)| s == id)
    }

    fn slot(&mut self, phase: Phase) -> &mut Vec<ScopeId> {
        match phase {
            Phase::Composition => &mut self.composition,
            Phase::Layout => &mut self.layout,
            Phase::Draw => &mut self.draw,
        }
    }
}

#[derive(Default)]
pub(crate) struct Scheduler {
    queues: [BTreeSet<QueueKey>; 3],
}

impl Scheduler {
    /// Orders `scopes` into a batch. Unknown scopes are dropped.
    pub fn plan(tree: &ScopeTree, scopes: impl IntoIterator<Item = ScopeId>) -> Batch {
        let mut keyed: Vec<(Phase, QueueKey)> = scopes
            .into_iter()
            .filter_map(|id| Some((tree.get(id)?.phase(), tree.queue_key(id)?)))
            .collect();
        keyed.sort();
        keyed.dedup();

        let mut batch = Batch::default();
        for (phase, key) in keyed {
            batch.slot(phase).push(key.id);
        }
        log::trace!("planned batch of {} scopes", batch.len());
        batch
    }

    pub fn enqueue(&mut self, phase: Phase, key: QueueKey) -> bool {
        self.queues[phase.index()].insert(key)
    }

    pub fn enqueue_batch(&mut self, tree: &ScopeTree, batch: &Batch) {
        for (phase, id) in batch.iter() {
            if let Some(key) = tree.queue_key(id) {
                self.enqueue(phase, key);
            }
        }
    }

    pub fn pop(&mut self, phase: Phase) -> Option<QueueKey> {
        self.queues[phase.index()].pop_first()
    }

    pub fn remove(&mut self, phase: Phase, key: &QueueKey) -> bool {
        self.queues[phase.index()].remove(key)
    }

    pub fn contains(&self, phase: Phase, key: &QueueKey) -> bool {
        self.queues[phase.index()].contains(key)
    }

    pub fn is_empty(&self, phase: Phase) -> bool {
        self.queues[phase.index()].is_empty()
    }

    pub fn clear(&mut self, phase: Phase) -> usize {
        let n = self.queues[phase.index()].len();
        self.queues[phase.index()].clear();
        n
    }

    /// Phases with queued work.
    pub fn pending(&self) -> PhaseSet {
        Phase::ALL
            .into_iter()
            .filter(|p| !self.is_empty(*p))
            .fold(PhaseSet::empty(), |acc, p| acc | p.into())
    }
}

impl Runtime {
    /// Processes one turn: applies queued remote writes, then repeatedly
    /// turns dirty cells into a batch and runs a composition pass until
    /// nothing is dirty. Writes made during a pass are seen by the next pass
    /// of the same turn.
    ///
    /// After `maxCascadeIterations` passes the remaining work is dropped and
    /// an [`Error::UnboundedInvalidation`] diagnostic is recorded; the next
    /// turn starts with a fresh budget.
    pub fn end_turn(&self) -> Result<FrameReport> {
        let started = Instant::now();
        let sh = &self.shared;
        self.drain_remote();

        let max = sh.config.max_cascade_iterations;
        let mut passes = 0;
        let result = loop {
            let dirty = {
                let mut store = sh.store.borrow_mut();
                store.apply_pending();
                store.take_dirty()
            };
            if dirty.is_empty() && sh.sched.borrow().is_empty(Phase::Composition) {
                break Ok(());
            }
            if passes >= max {
                let dropped = sh.sched.borrow_mut().clear(Phase::Composition);
                log::error!(
                    "invalidation did not settle after {} passes; {} dirty cell(s), {} queued scope(s) dropped",
                    passes,
                    dirty.len(),
                    dropped
                );
                sh.report
                    .borrow_mut()
                    .diagnostics
                    .push(Error::UnboundedInvalidation {
                        iterations: passes,
                        cells: dirty,
                    });
                break Ok(());
            }
            passes += 1;

            let batch = {
                let tree = sh.tree.borrow();
                let dependents = sh.registry.borrow().dependents_of(&dirty);
                let batch = Scheduler::plan(&tree, dependents);
                sh.sched.borrow_mut().enqueue_batch(&tree, &batch);
                batch
            };
            log::debug!(
                "pass {}: {} dirty cell(s), {} scope(s) invalidated",
                passes,
                dirty.len(),
                batch.len()
            );
            sh.report.borrow_mut().batches.push(batch);

            if let Err(e) = self.run_pass(Phase::Composition) {
                break Err(e);
            }
        };

        let mut report = std::mem::take(&mut *sh.report.borrow_mut());
        if let Err(e) = result {
            self.carry_over(report);
            return Err(e);
        }
        report.passes = passes;
        report.duration = started.elapsed();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Body, ChildKey};
    use crate::Rect;
    use std::rc::Rc;

    fn compose() -> Body {
        Body::Compose(Rc::new(|_| {}))
    }

    fn layout() -> Body {
        Body::Layout(Rc::new(|_| Rect::default()))
    }

    #[test]
    fn plan_orders_by_phase_then_depth_then_age() {
        let mut tree = ScopeTree::default();
        let root = tree.insert(None, ChildKey::Explicit("root".into()), compose(), None);
        let l = tree.insert(Some(root), ChildKey::Positional(0), layout(), None);
        let a = tree.insert(Some(root), ChildKey::Positional(1), compose(), None);
        let b = tree.insert(Some(root), ChildKey::Positional(2), compose(), None);
        let deep = tree.insert(Some(a), ChildKey::Positional(0), compose(), None);

        let batch = Scheduler::plan(&tree, [deep, l, b, a, root, a]);
        assert_eq!(batch.scopes(Phase::Composition), &[root, a, b, deep]);
        assert_eq!(batch.scopes(Phase::Layout), &[l]);
        assert_eq!(batch.len(), 5);
        assert_eq!(
            batch.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            vec![
                Phase::Composition,
                Phase::Composition,
                Phase::Composition,
                Phase::Composition,
                Phase::Layout
            ]
        );
    }

    #[test]
    fn queue_pops_shallowest_first_and_dedups() {
        let mut tree = ScopeTree::default();
        let root = tree.insert(None, ChildKey::Explicit("root".into()), compose(), None);
        let child = tree.insert(Some(root), ChildKey::Positional(0), compose(), None);

        let mut sched = Scheduler::default();
        assert!(sched.enqueue(Phase::Composition, tree.queue_key(child).unwrap()));
        assert!(sched.enqueue(Phase::Composition, tree.queue_key(root).unwrap()));
        assert!(!sched.enqueue(Phase::Composition, tree.queue_key(root).unwrap()));
        assert_eq!(sched.pending(), PhaseSet::COMPOSITION);

        assert_eq!(sched.pop(Phase::Composition).map(|k| k.id), Some(root));
        assert_eq!(sched.pop(Phase::Composition).map(|k| k.id), Some(child));
        assert_eq!(sched.pop(Phase::Composition), None);
        assert!(sched.pending().is_empty());
    }
}
