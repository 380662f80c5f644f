//! Phased pipeline.
//!
//! A frame runs Composition, then Layout, then Draw. Each scope belongs to
//! exactly one phase and is only ever re-executed within it, so a cell read
//! during Draw never re-runs composition. Layout scopes publish their rect
//! through a runtime-owned placement cell; readers of that cell are queued
//! straight into the pass that is running.
//!
//! Every scope execution is wrapped in `catch_unwind`. A panic aborts that
//! scope's contribution (read set, newly created children, effects) and is
//! routed to the nearest error boundary; without one the frame returns
//! [`Error::ScopeExecution`].

use std::panic::{AssertUnwindSafe, catch_unwind};

use bitflags::bitflags;
use web_time::{Duration, Instant};

use crate::composer::{ComposeParts, Composer, DrawCx, LayoutCx};
use crate::error::panic_message;
use crate::scheduler::Batch;
use crate::scope::Body;
use crate::store::ScopeGuard;
use crate::{Cell, Error, ErrorInfo, Rect, Result, Runtime, Scene, ScopeFailure, ScopeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Composition,
    Layout,
    Draw,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Composition, Phase::Layout, Phase::Draw];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PhaseSet: u8 {
        const COMPOSITION = 1 << 0;
        const LAYOUT = 1 << 1;
        const DRAW = 1 << 2;
    }
}

impl From<Phase> for PhaseSet {
    fn from(p: Phase) -> Self {
        match p {
            Phase::Composition => PhaseSet::COMPOSITION,
            Phase::Layout => PhaseSet::LAYOUT,
            Phase::Draw => PhaseSet::DRAW,
        }
    }
}

/// What one turn (or one frame) did.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Planned batches, one per composition pass.
    pub batches: Vec<Batch>,
    pub composed: Vec<ScopeId>,
    pub laid_out: Vec<ScopeId>,
    pub drawn: Vec<ScopeId>,
    /// Skippable scopes whose inputs and reads were unchanged.
    pub skipped: Vec<ScopeId>,
    pub removed: Vec<ScopeId>,
    /// Composition passes run by the cascade loop.
    pub passes: usize,
    /// Non-fatal problems: capped cascades, cancelled writes, failures caught
    /// by a boundary.
    pub diagnostics: Vec<Error>,
    /// Phases that executed at least one scope.
    pub phases: PhaseSet,
    pub scene: Option<Scene>,
    pub duration: Duration,
}

impl FrameReport {
    pub fn executed(&self, phase: Phase) -> &[ScopeId] {
        match phase {
            Phase::Composition => &self.composed,
            Phase::Layout => &self.laid_out,
            Phase::Draw => &self.drawn,
        }
    }

    pub fn executed_count(&self, id: ScopeId) -> usize {
        Phase::ALL
            .into_iter()
            .map(|p| self.executed(p).iter().filter(|s| **s == id).count())
            .sum()
    }

    pub fn total_executed(&self) -> usize {
        self.composed.len() + self.laid_out.len() + self.drawn.len()
    }

    pub fn has_unbounded_invalidation(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Error::UnboundedInvalidation { .. }))
    }

    pub(crate) fn record(&mut self, phase: Phase, id: ScopeId) {
        match phase {
            Phase::Composition => self.composed.push(id),
            Phase::Layout => self.laid_out.push(id),
            Phase::Draw => self.drawn.push(id),
        }
        self.phases |= phase.into();
    }

    pub fn merge(&mut self, other: FrameReport) {
        self.batches.extend(other.batches);
        self.composed.extend(other.composed);
        self.laid_out.extend(other.laid_out);
        self.drawn.extend(other.drawn);
        self.skipped.extend(other.skipped);
        self.removed.extend(other.removed);
        self.passes += other.passes;
        self.diagnostics.extend(other.diagnostics);
        self.phases |= other.phases;
        if other.scene.is_some() {
            self.scene = other.scene;
        }
        self.duration += other.duration;
    }
}

impl Runtime {
    /// Runs one turn followed by Layout and Draw.
    ///
    /// A Layout or Draw failure caught by a boundary queues the boundary for
    /// composition; the frame then goes round again so the fallback is in
    /// the returned scene. Rounds are capped by `maxCascadeIterations`.
    pub fn frame(&self) -> Result<FrameReport> {
        let mut report = self.end_turn()?;
        let max = self.shared.config.max_cascade_iterations;
        let mut rounds = 0;
        loop {
            if let Err(e) = self.layout_and_draw(&mut report) {
                self.carry_over(report);
                return Err(e);
            }
            if self.shared.sched.borrow().is_empty(Phase::Composition) {
                break;
            }
            if rounds >= max {
                log::warn!("boundary fallbacks still pending after {} rounds; left for the next frame", rounds);
                break;
            }
            rounds += 1;
            log::debug!("frame round {}: re-composing after a caught failure", rounds);
            match self.end_turn() {
                Ok(turn) => report.merge(turn),
                Err(e) => {
                    self.carry_over(report);
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    fn layout_and_draw(&self, report: &mut FrameReport) -> Result<()> {
        report.merge(self.run_phase(Phase::Layout)?);
        report.merge(self.run_phase(Phase::Draw)?);
        Ok(())
    }

    /// Keeps what an aborted turn recorded (diagnostics, removed scopes) for
    /// the next report.
    pub(crate) fn carry_over(&self, aborted: FrameReport) {
        let mut next = self.shared.report.borrow_mut();
        next.diagnostics.extend(aborted.diagnostics);
        next.removed.extend(aborted.removed);
    }

    /// Drains the queue of one phase. Composition goes through the full
    /// turn (remote writes, dirty cells, cascade cap); Layout and Draw run
    /// whatever earlier phases queued for them.
    pub fn run_phase(&self, phase: Phase) -> Result<FrameReport> {
        if phase == Phase::Composition {
            return self.end_turn();
        }
        let started = Instant::now();
        let result = self.run_pass(phase);
        let mut report = std::mem::take(&mut *self.shared.report.borrow_mut());
        if let Err(e) = result {
            self.carry_over(report);
            return Err(e);
        }
        if phase == Phase::Draw {
            report.scene = Some(self.scene());
        }
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Pops and executes queued scopes of `phase` until none remain.
    pub(crate) fn run_pass(&self, phase: Phase) -> Result<()> {
        let prev = self.shared.store.borrow_mut().set_deferring(true);
        let result = (|| -> Result<()> {
            loop {
                let next = self.shared.sched.borrow_mut().pop(phase);
                let Some(key) = next else {
                    break;
                };
                self.execute(key.id);
                self.route_failures()?;
            }
            Ok(())
        })();
        self.shared.store.borrow_mut().set_deferring(prev);
        result
    }

    /// Executes one scope in its own phase. False when it failed; the
    /// failure is left for [`Runtime::route_failures`].
    pub(crate) fn execute(&self, id: ScopeId) -> bool {
        let sh = &self.shared;
        let prepared = {
            let mut tree = sh.tree.borrow_mut();
            let key = tree.queue_key(id);
            tree.get_mut(id).map(|node| {
                node.epoch += 1;
                let fallback = node
                    .boundary
                    .as_ref()
                    .and_then(|b| b.error.clone().map(|e| (b.fallback.clone(), e)));
                (node.body.clone(), node.epoch, fallback, key)
            })
        };
        let Some((body, epoch, fallback, key)) = prepared else {
            return false;
        };
        let phase = body.phase();
        if let Some(key) = key {
            sh.sched.borrow_mut().remove(phase, &key);
        }
        sh.report.borrow_mut().record(phase, id);
        log::trace!("execute {:?} ({:?}, epoch {})", id, phase, epoch);

        let guard = ScopeGuard::begin(&sh.tracker, id, epoch);
        let outcome = match body {
            Body::Compose(f) => {
                let mut composer = Composer::new(self.clone(), id, epoch);
                let run = catch_unwind(AssertUnwindSafe(|| match &fallback {
                    Some((fallback, info)) => fallback(&mut composer, info),
                    None => f(&mut composer),
                }));
                let parts = composer.into_parts();
                match run {
                    Ok(()) => {
                        let reads = guard.finish();
                        sh.registry.borrow_mut().commit(id, reads);
                        self.commit_composition(id, parts);
                        Ok(())
                    }
                    Err(payload) => {
                        drop(guard);
                        self.abandon_composition(parts);
                        Err(payload)
                    }
                }
            }
            Body::Layout(f) => {
                let mut lcx = LayoutCx::new(self.clone(), id, epoch);
                match catch_unwind(AssertUnwindSafe(|| f(&mut lcx))) {
                    Ok(rect) => {
                        let reads = guard.finish();
                        sh.registry.borrow_mut().commit(id, reads);
                        self.commit_placement(id, rect);
                        Ok(())
                    }
                    Err(payload) => {
                        drop(guard);
                        Err(payload)
                    }
                }
            }
            Body::Draw(f) => {
                let mut dcx = DrawCx::new(self.clone(), id, epoch);
                match catch_unwind(AssertUnwindSafe(|| f(&mut dcx))) {
                    Ok(()) => {
                        let reads = guard.finish();
                        sh.registry.borrow_mut().commit(id, reads);
                        if let Some(node) = sh.tree.borrow_mut().get_mut(id) {
                            node.scene = dcx.into_nodes();
                        }
                        Ok(())
                    }
                    Err(payload) => {
                        drop(guard);
                        Err(payload)
                    }
                }
            }
        };

        match outcome {
            Ok(()) => true,
            Err(payload) => {
                let failure = ScopeFailure {
                    scope: id,
                    phase,
                    message: panic_message(payload),
                };
                log::warn!("{failure}");
                sh.failures.borrow_mut().push(failure);
                false
            }
        }
    }

    fn commit_composition(&self, id: ScopeId, parts: ComposeParts) {
        let sh = &self.shared;
        let (removed, stale_locals) = {
            let mut tree = sh.tree.borrow_mut();
            let Some(node) = tree.get_mut(id) else {
                return;
            };
            let removed: Vec<ScopeId> = node
                .children
                .iter()
                .filter(|c| !parts.visited.contains(c))
                .copied()
                .collect();
            node.children = parts.visited;
            node.slots.truncate(parts.slots_used);
            node.keyed_slots.retain(|k, _| parts.keys_used.contains(k));
            let stale_locals: Vec<_> = node
                .locals
                .iter()
                .filter(|(t, _)| !parts.provided.contains(t))
                .map(|(t, c)| (*t, *c))
                .collect();
            for (t, _) in &stale_locals {
                node.locals.remove(t);
            }
            (removed, stale_locals)
        };
        for child in removed {
            self.teardown(child);
        }
        for (_, cell) in stale_locals {
            self.retire_cell(cell);
        }
        let disposers = sh
            .effects
            .borrow_mut()
            .retain(id, parts.launched_used, parts.disposables_used);
        for d in disposers {
            d.run();
        }
        for op in parts.ops {
            op(self);
        }
    }

    /// Keeps the previously committed children; drops the ones this failed
    /// execution created.
    fn abandon_composition(&self, parts: ComposeParts) {
        for child in parts.created {
            self.teardown(child);
        }
    }

    fn commit_placement(&self, id: ScopeId, rect: Rect) {
        let placement = self.shared.tree.borrow().get(id).and_then(|n| n.placement);
        if let Some(cell) = placement {
            self.commit_and_propagate(Cell::<Rect>::from_id(cell), rect);
        }
    }

    /// Hands recorded failures to the nearest boundary that is not already
    /// showing an error, starting at the failing scope. The boundary is
    /// queued to render its fallback.
    pub(crate) fn route_failures(&self) -> Result<()> {
        let failures = std::mem::take(&mut *self.shared.failures.borrow_mut());
        for failure in failures {
            let boundary = {
                let mut tree = self.shared.tree.borrow_mut();
                let found = tree.find_up(failure.scope, |n| {
                    n.boundary.as_ref().is_some_and(|b| b.error.is_none())
                });
                if let Some(b) = found.and_then(|b| tree.get_mut(b)).and_then(|n| n.boundary.as_mut()) {
                    b.error = Some(ErrorInfo::from(&failure));
                }
                found
            };
            match boundary {
                Some(b) => {
                    log::warn!("boundary {:?} caught failure of {:?}", b, failure.scope);
                    self.enqueue(b);
                    self.shared
                        .report
                        .borrow_mut()
                        .diagnostics
                        .push(Error::ScopeExecution(failure));
                }
                None => {
                    log::error!("uncaught scope failure: {failure}");
                    return Err(Error::ScopeExecution(failure));
                }
            }
        }
        Ok(())
    }
}
