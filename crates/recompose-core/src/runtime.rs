use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::composer::Composer;
use crate::effects::{EffectManager, effect_handle};
use crate::registry::ObserverRegistry;
use crate::remote::RemoteQueue;
use crate::scheduler::Scheduler;
use crate::scope::{Body, ChildKey, ScopeTree};
use crate::store::{ReadTracker, SnapshotStore, WriteOutcome};
use crate::{
    Cell, CellId, Error, FrameReport, Phase, PhaseSet, Rect, RemoteWriter, Result, RuntimeConfig,
    Scene, ScopeFailure, ScopeId, ScopeInfo, Size,
};

pub(crate) struct Shared {
    pub config: RuntimeConfig,
    pub store: RefCell<SnapshotStore>,
    pub registry: RefCell<ObserverRegistry>,
    pub tree: RefCell<ScopeTree>,
    pub sched: RefCell<Scheduler>,
    pub effects: RefCell<EffectManager>,
    pub tracker: RefCell<ReadTracker>,
    pub remote: Arc<RemoteQueue>,
    pub report: RefCell<FrameReport>,
    pub failures: RefCell<Vec<ScopeFailure>>,
    pub root: RefCell<Option<ScopeId>>,
    pub viewport: Cell<Rect>,
}

/// Single-threaded handle to one reactive tree and everything it owns.
///
/// Cloning is cheap and shares the same runtime. Cells, scopes and effects
/// are only touched from the thread that created it; use
/// [`Runtime::remote_writer`] to write from elsewhere.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Rc<Shared>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.remote.close();
        log::debug!("runtime dropped");
    }
}

#[derive(Clone)]
pub struct WeakRuntime(Weak<Shared>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|shared| Runtime { shared })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default config.
    ///
    /// # Panics
    ///
    /// If the shared effect pool cannot be started. Use
    /// [`Runtime::with_config`] to get that as an error instead.
    pub fn new() -> Self {
        match Self::with_config(RuntimeConfig::default()) {
            Ok(rt) => rt,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let handle = effect_handle(config.effect_worker_threads)?;
        Ok(Self::build(config, handle))
    }

    /// Spawns effect tasks on `handle` instead of the shared pool.
    pub fn with_handle(config: RuntimeConfig, handle: Handle) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, handle))
    }

    fn build(config: RuntimeConfig, handle: Handle) -> Self {
        let mut store = SnapshotStore::default();
        let viewport = store.insert(Rect::from_size(config.viewport), None);
        log::debug!(
            "runtime up: maxCascadeIterations={} strictReads={}",
            config.max_cascade_iterations,
            config.strict_reads
        );
        Runtime {
            shared: Rc::new(Shared {
                config,
                store: RefCell::new(store),
                registry: RefCell::default(),
                tree: RefCell::default(),
                sched: RefCell::default(),
                effects: RefCell::new(EffectManager::new(handle)),
                tracker: RefCell::default(),
                remote: Arc::new(RemoteQueue::default()),
                report: RefCell::default(),
                failures: RefCell::default(),
                root: RefCell::new(None),
                viewport,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Rc::downgrade(&self.shared)
    }

    /// A handle that does not keep the runtime alive, for state stored
    /// inside the tree.
    pub fn weak(&self) -> WeakRuntime {
        WeakRuntime(self.downgrade())
    }

    // --- cells -----------------------------------------------------------

    /// A cell owned by the runtime itself; it lives until disposed.
    pub fn cell<T: Clone + PartialEq + 'static>(&self, value: T) -> Cell<T> {
        self.shared.store.borrow_mut().insert(value, None)
    }

    pub(crate) fn owned_cell<T: Clone + PartialEq + 'static>(&self, value: T, owner: ScopeId) -> Cell<T> {
        let cell = self.shared.store.borrow_mut().insert(value, Some(owner));
        if let Some(node) = self.shared.tree.borrow_mut().get_mut(owner) {
            node.owned_cells.push(cell.id());
        }
        cell
    }

    /// Reads the committed value. Inside an executing scope the read is
    /// recorded as a dependency of that scope.
    ///
    /// Panics on an unknown cell; see [`Runtime::try_get`].
    pub fn get<T: Clone + 'static>(&self, cell: Cell<T>) -> T {
        match self.try_get(cell) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_get<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T> {
        let value = self.shared.store.borrow().read(cell.id())?;
        self.shared.tracker.borrow_mut().record(cell.id());
        Ok(value)
    }

    /// Reads without recording a dependency.
    pub fn peek<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T> {
        self.shared.store.borrow().read(cell.id())
    }

    pub fn version<T>(&self, cell: Cell<T>) -> Option<u64> {
        self.shared.store.borrow().version(cell.id())
    }

    /// Writes a new value; structurally equal writes are dropped. Returns
    /// whether anything was recorded.
    ///
    /// During a pass the value goes to the pending overlay and becomes
    /// visible at the next pass boundary; writes made while Layout or Draw
    /// run are picked up by the next turn.
    pub fn write<T: PartialEq + 'static>(&self, cell: Cell<T>, value: T) -> bool {
        match self.try_write(cell, value) {
            Ok(changed) => changed,
            Err(e) if self.shared.config.strict_reads => panic!("{e}"),
            Err(e) => {
                log::warn!("write ignored: {e}");
                false
            }
        }
    }

    pub fn try_write<T: PartialEq + 'static>(&self, cell: Cell<T>, value: T) -> Result<bool> {
        let outcome = self.shared.store.borrow_mut().write(cell.id(), value)?;
        log::trace!("write {:?}: {:?}", cell.id(), outcome);
        Ok(outcome != WriteOutcome::Unchanged)
    }

    pub fn update<T: Clone + PartialEq + 'static>(&self, cell: Cell<T>, f: impl FnOnce(&mut T)) -> bool {
        let Ok(mut value) = self.peek(cell) else {
            log::warn!("update ignored: unknown cell {:?}", cell.id());
            return false;
        };
        f(&mut value);
        self.write(cell, value)
    }

    /// Destroys a cell and schedules its readers.
    pub fn dispose_cell<T>(&self, cell: Cell<T>) {
        self.retire_cell(cell.id());
    }

    pub(crate) fn retire_cell(&self, id: CellId) {
        let owner = self.shared.store.borrow().owner(id);
        let readers = self.shared.registry.borrow().dependents_of([&id]);
        self.enqueue_all(readers);
        self.drop_cell(id);
        if let Some(owner) = owner
            && let Some(node) = self.shared.tree.borrow_mut().get_mut(owner)
        {
            node.owned_cells.retain(|c| *c != id);
        }
    }

    fn drop_cell(&self, id: CellId) {
        self.shared.registry.borrow_mut().forget_cell(id);
        self.shared.store.borrow_mut().remove(id);
    }

    /// Commits a runtime-managed value right away, even mid-pass, and queues
    /// its readers for their phase.
    ///
    /// Scopes still executing are left alone unless they already read the
    /// cell, in which case they run again once they finish.
    pub(crate) fn commit_and_propagate<T: PartialEq + 'static>(&self, cell: Cell<T>, value: T) {
        let changed = match self.shared.store.borrow_mut().commit_now(cell.id(), value) {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("commit ignored: {e}");
                return;
            }
        };
        if !changed {
            return;
        }
        let readers = self.shared.registry.borrow().dependents_of([&cell.id()]);
        let readers: Vec<ScopeId> = {
            let tracker = self.shared.tracker.borrow();
            readers
                .into_iter()
                .filter(|s| !tracker.is_active(*s) || tracker.has_read(*s, cell.id()))
                .collect()
        };
        self.enqueue_all(readers);
    }

    // --- scheduling ------------------------------------------------------

    pub(crate) fn enqueue(&self, id: ScopeId) {
        let tree = self.shared.tree.borrow();
        let (Some(node), Some(key)) = (tree.get(id), tree.queue_key(id)) else {
            return;
        };
        self.shared.sched.borrow_mut().enqueue(node.phase(), key);
    }

    pub(crate) fn enqueue_all(&self, ids: impl IntoIterator<Item = ScopeId>) {
        for id in ids {
            self.enqueue(id);
        }
    }

    pub(crate) fn is_queued(&self, id: ScopeId) -> bool {
        let tree = self.shared.tree.borrow();
        let (Some(node), Some(key)) = (tree.get(id), tree.queue_key(id)) else {
            return false;
        };
        self.shared.sched.borrow().contains(node.phase(), &key)
    }

    // --- tree ------------------------------------------------------------

    /// Installs the root composable, replacing (and tearing down) any previous
    /// root. It runs on the next turn.
    pub fn set_content(&self, body: impl Fn(&mut Composer) + 'static) -> ScopeId {
        let previous = self.shared.root.borrow_mut().take();
        if let Some(old) = previous {
            self.teardown(old);
        }
        let id = self.shared.tree.borrow_mut().insert(
            None,
            ChildKey::Explicit("root".into()),
            Body::Compose(Rc::new(body)),
            None,
        );
        *self.shared.root.borrow_mut() = Some(id);
        self.enqueue(id);
        log::debug!("root scope {:?} installed", id);
        id
    }

    pub fn root(&self) -> Option<ScopeId> {
        *self.shared.root.borrow()
    }

    /// Removes a scope and its subtree outside of normal reconciliation.
    pub fn remove_scope(&self, id: ScopeId) -> Result<()> {
        if !self.shared.tree.borrow().contains(id) {
            return Err(Error::UnknownScope(id));
        }
        if self.root() == Some(id) {
            *self.shared.root.borrow_mut() = None;
        }
        self.teardown(id);
        Ok(())
    }

    /// Removes a subtree, children first: cancels effects and runs disposers,
    /// drops owned cells and observer edges, and unqueues pending work.
    pub(crate) fn teardown(&self, id: ScopeId) {
        let sh = &self.shared;
        let (order, parent) = {
            let tree = sh.tree.borrow();
            (tree.subtree_postorder(id), tree.get(id).and_then(|n| n.parent))
        };
        let mut disposers = Vec::new();
        for sid in order {
            let removed = {
                let mut tree = sh.tree.borrow_mut();
                let key = tree.queue_key(sid);
                tree.remove(sid).map(|node| (key, node))
            };
            let Some((key, node)) = removed else {
                continue;
            };
            if let Some(key) = key {
                sh.sched.borrow_mut().remove(node.phase(), &key);
            }
            disposers.extend(sh.effects.borrow_mut().cancel_scope(sid));
            sh.registry.borrow_mut().forget_scope(sid);
            for cell in &node.owned_cells {
                self.drop_cell(*cell);
            }
            sh.report.borrow_mut().removed.push(sid);
            log::debug!("scope {:?} removed", sid);
            drop(node);
        }
        if let Some(p) = parent {
            sh.tree.borrow_mut().detach(p, id);
        }
        for d in disposers {
            d.run();
        }
    }

    /// Clears a boundary's captured error so its content is tried again on
    /// the next turn.
    pub fn reset_boundary(&self, id: ScopeId) -> Result<()> {
        {
            let mut tree = self.shared.tree.borrow_mut();
            let node = tree.get_mut(id).ok_or(Error::UnknownScope(id))?;
            if let Some(b) = node.boundary.as_mut() {
                b.error = None;
            }
        }
        self.enqueue(id);
        Ok(())
    }

    // --- inspection ------------------------------------------------------

    pub fn dependents_of<T>(&self, cell: Cell<T>) -> Vec<ScopeId> {
        let mut out: Vec<ScopeId> = self
            .shared
            .registry
            .borrow()
            .dependents_of([&cell.id()])
            .into_iter()
            .collect();
        let tree = self.shared.tree.borrow();
        out.sort_by_key(|s| tree.queue_key(*s));
        out
    }

    pub fn read_set(&self, scope: ScopeId) -> Vec<CellId> {
        self.shared.registry.borrow().read_set(scope).to_vec()
    }

    pub fn scope_info(&self, id: ScopeId) -> Option<ScopeInfo> {
        self.shared.tree.borrow().info(id)
    }

    pub fn scope_count(&self) -> usize {
        self.shared.tree.borrow().len()
    }

    pub fn cell_count(&self) -> usize {
        self.shared.store.borrow().len()
    }

    /// Effect tasks neither cancelled nor finished.
    pub fn running_effects(&self) -> usize {
        self.shared.effects.borrow().running()
    }

    /// Effect tasks started since the runtime was created.
    pub fn effects_started(&self) -> u64 {
        self.shared.effects.borrow().started()
    }

    /// Phases with outstanding work. Composition also counts dirty cells and
    /// queued remote writes.
    pub fn pending_phases(&self) -> PhaseSet {
        let mut set = self.shared.sched.borrow().pending();
        let store = self.shared.store.borrow();
        if store.has_dirty() || store.has_pending() || !self.shared.remote.is_empty() {
            set |= PhaseSet::COMPOSITION;
        }
        set
    }

    pub fn needs_frame(&self) -> bool {
        !self.pending_phases().is_empty()
    }

    pub fn viewport(&self) -> Cell<Rect> {
        self.shared.viewport
    }

    pub fn set_viewport(&self, size: Size) -> bool {
        self.write(self.shared.viewport, Rect::from_size(size))
    }

    /// The retained draw output of the whole tree, in tree order.
    pub fn scene(&self) -> Scene {
        let tree = self.shared.tree.borrow();
        let nodes = match self.root() {
            Some(root) => tree
                .preorder(root)
                .into_iter()
                .filter_map(|id| tree.get(id))
                .filter(|n| n.phase() == Phase::Draw)
                .flat_map(|n| n.scene.iter().cloned())
                .collect(),
            None => Vec::new(),
        };
        Scene {
            nodes,
            ..Scene::default()
        }
    }

    // --- remote writes ---------------------------------------------------

    pub fn remote_writer(&self) -> RemoteWriter {
        RemoteWriter::new(self.shared.remote.clone())
    }

    /// Applies queued cross-thread writes. Writes from effects cancelled in
    /// the meantime are dropped; writes attempted after cancellation are
    /// reported as diagnostics.
    pub(crate) fn drain_remote(&self) {
        let writes = self.shared.remote.take();
        if !writes.is_empty() {
            log::trace!("applying {} remote write(s)", writes.len());
        }
        for w in writes {
            if let Some(g) = &w.guard
                && g.token.is_cancelled()
            {
                log::debug!(
                    "dropping queued write to {:?}: effect of {:?} was cancelled",
                    w.cell,
                    g.scope
                );
                continue;
            }
            if let Err(e) = (w.apply)(self) {
                log::warn!("remote write to {:?} failed: {e}", w.cell);
            }
        }
        let mut report = self.shared.report.borrow_mut();
        for (scope, cell) in self.shared.remote.take_violations() {
            report
                .diagnostics
                .push(Error::EffectCancellationViolation { scope, cell });
        }
    }
}
