//! Execution contexts handed to scope bodies.
//!
//! [`Composer`] is what a composition body receives. It declares children,
//! remembers state, provides locals and registers effects. [`LayoutCx`] and
//! [`DrawCx`] are the narrower contexts of layout and draw bodies. All three
//! deref to [`ScopeCx`], which reads and writes cells on behalf of the
//! executing scope.
//!
//! ```ignore
//! rt.set_content(move |cx| {
//!     let n = cx.get(count);
//!     cx.keyed("label", move |cx| {
//!         cx.draw(move |d| d.text(format!("{n}"), Color::WHITE, 14.0));
//!     });
//! });
//! ```

use std::any::{Any, TypeId};
use std::cell::{Cell as StdCell, RefCell};
use std::future::Future;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use tokio_util::sync::CancellationToken;

use crate::effects::{Dispose, EffectCx, EffectManager, Latest, Launch};
use crate::runtime::Shared;
use crate::scope::{Body, Boundary, ChildKey, FallbackFn};
use crate::{
    Cell, CellId, Color, Error, ErrorInfo, Phase, Rect, RemoteWriter, Result, Runtime, SceneNode,
    ScopeId,
};

/// Reads and writes on behalf of one execution of one scope.
pub struct ScopeCx {
    pub(crate) rt: Runtime,
    scope: ScopeId,
    epoch: u64,
    phase: Phase,
}

impl ScopeCx {
    fn new(rt: Runtime, scope: ScopeId, epoch: u64, phase: Phase) -> Self {
        Self {
            rt,
            scope,
            epoch,
            phase,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.scope
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    /// Reads a cell and records it as a dependency of this scope.
    pub fn get<T: Clone + 'static>(&self, cell: Cell<T>) -> T {
        let sh = &self.rt.shared;
        let value = match sh.store.borrow().read(cell.id()) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        sh.tracker
            .borrow_mut()
            .record_for(self.scope, self.epoch, cell.id());
        value
    }

    pub fn write<T: PartialEq + 'static>(&self, cell: Cell<T>, value: T) -> bool {
        self.rt.write(cell, value)
    }

    pub fn update<T: Clone + PartialEq + 'static>(&self, cell: Cell<T>, f: impl FnOnce(&mut T)) -> bool {
        self.rt.update(cell, f)
    }

    /// Nearest value of type `T` provided by this scope or an ancestor.
    pub fn local<T: Clone + 'static>(&self) -> Option<T> {
        let cell = self.local_cell(TypeId::of::<T>())?;
        Some(self.get(Cell::<T>::from_id(cell)))
    }

    pub fn local_or_default<T: Clone + Default + 'static>(&self) -> T {
        self.local().unwrap_or_default()
    }

    fn local_cell(&self, ty: TypeId) -> Option<CellId> {
        let tree = self.rt.shared.tree.borrow();
        let mut cur = Some(self.scope);
        while let Some(id) = cur {
            let node = tree.get(id)?;
            if let Some(cell) = node.locals.get(&ty) {
                return Some(*cell);
            }
            cur = node.parent;
        }
        None
    }

    /// A handle that stays valid only while this execution is running.
    pub fn handle(&self) -> ScopeHandle {
        ScopeHandle {
            rt: self.rt.downgrade(),
            strict: self.rt.shared.config.strict_reads,
            scope: self.scope,
            epoch: self.epoch,
        }
    }
}

/// A scope identity captured during execution.
///
/// Reading through it attributes the read to the execution it was taken
/// from. Once that execution has ended the read is stale: it panics when the
/// runtime reads strictly and otherwise logs a warning and returns the value
/// untracked.
#[derive(Clone)]
pub struct ScopeHandle {
    rt: Weak<Shared>,
    strict: bool,
    scope: ScopeId,
    epoch: u64,
}

impl ScopeHandle {
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn is_live(&self) -> bool {
        self.rt
            .upgrade()
            .is_some_and(|sh| sh.tracker.borrow().is_active(self.scope))
    }

    pub fn try_read<T: Clone + 'static>(&self, cell: Cell<T>) -> Result<T> {
        let stale = Error::StaleRead {
            scope: self.scope,
            cell: cell.id(),
        };
        let sh = self.rt.upgrade().ok_or(stale)?;
        if !sh
            .tracker
            .borrow_mut()
            .record_for(self.scope, self.epoch, cell.id())
        {
            return Err(Error::StaleRead {
                scope: self.scope,
                cell: cell.id(),
            });
        }
        sh.store.borrow().read(cell.id())
    }

    pub fn read<T: Clone + 'static>(&self, cell: Cell<T>) -> T {
        match self.try_read(cell) {
            Ok(v) => v,
            Err(e @ Error::StaleRead { .. }) if !self.strict => {
                log::warn!("{e}; returning untracked value");
                let value = self.rt.upgrade().map(|sh| sh.store.borrow().read(cell.id()));
                match value {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => panic!("{e}"),
                    None => panic!("{e}: runtime dropped"),
                }
            }
            Err(e) => panic!("{e}"),
        }
    }
}

type DeferredOp = Box<dyn FnOnce(&Runtime)>;

/// What a composition execution declared, applied by the runtime once the
/// body returns.
pub(crate) struct ComposeParts {
    pub visited: Vec<ScopeId>,
    pub created: Vec<ScopeId>,
    pub provided: Vec<TypeId>,
    pub slots_used: usize,
    pub keys_used: Vec<String>,
    pub launched_used: usize,
    pub disposables_used: usize,
    pub ops: Vec<DeferredOp>,
}

pub struct Composer {
    cx: ScopeCx,
    positional: usize,
    slot_cursor: usize,
    keys_used: Vec<String>,
    launched_cursor: usize,
    disposable_cursor: usize,
    visited: Vec<ScopeId>,
    created: Vec<ScopeId>,
    provided: Vec<TypeId>,
    ops: Vec<DeferredOp>,
}

impl Deref for Composer {
    type Target = ScopeCx;

    fn deref(&self) -> &ScopeCx {
        &self.cx
    }
}

impl Composer {
    pub(crate) fn new(rt: Runtime, scope: ScopeId, epoch: u64) -> Self {
        Self {
            cx: ScopeCx::new(rt, scope, epoch, Phase::Composition),
            positional: 0,
            slot_cursor: 0,
            keys_used: Vec::new(),
            launched_cursor: 0,
            disposable_cursor: 0,
            visited: Vec::new(),
            created: Vec::new(),
            provided: Vec::new(),
            ops: Vec::new(),
        }
    }

    pub(crate) fn into_parts(self) -> ComposeParts {
        ComposeParts {
            visited: self.visited,
            created: self.created,
            provided: self.provided,
            slots_used: self.slot_cursor,
            keys_used: self.keys_used,
            launched_used: self.launched_cursor,
            disposables_used: self.disposable_cursor,
            ops: self.ops,
        }
    }

    // --- children --------------------------------------------------------

    /// Declares an unkeyed child, matched by call position.
    pub fn child(&mut self, body: impl Fn(&mut Composer) + 'static) -> ScopeId {
        let key = self.next_positional();
        self.declare::<()>(key, Body::Compose(Rc::new(body)), None, None)
    }

    /// Declares a child matched by `key`, so it keeps its state when
    /// siblings are inserted or reordered.
    pub fn keyed(&mut self, key: impl Into<String>, body: impl Fn(&mut Composer) + 'static) -> ScopeId {
        let key = self.explicit(key.into());
        self.declare::<()>(key, Body::Compose(Rc::new(body)), None, None)
    }

    /// Declares a child that is skipped when its `inputs` equal the previous
    /// ones and none of the cells it read have changed.
    pub fn skippable<P: PartialEq + Clone + 'static>(
        &mut self,
        inputs: P,
        body: impl Fn(&mut Composer, &P) + 'static,
    ) -> ScopeId {
        let key = self.next_positional();
        let p = inputs.clone();
        let body = Body::Compose(Rc::new(move |cx: &mut Composer| body(cx, &p)));
        self.declare(key, body, Some(inputs), None)
    }

    pub fn keyed_skippable<P: PartialEq + Clone + 'static>(
        &mut self,
        key: impl Into<String>,
        inputs: P,
        body: impl Fn(&mut Composer, &P) + 'static,
    ) -> ScopeId {
        let key = self.explicit(key.into());
        let p = inputs.clone();
        let body = Body::Compose(Rc::new(move |cx: &mut Composer| body(cx, &p)));
        self.declare(key, body, Some(inputs), None)
    }

    /// Declares this scope's layout callback. It runs in the Layout phase and
    /// returns the rect handed to draw scopes and nested layouts.
    pub fn layout(&mut self, body: impl Fn(&mut LayoutCx) -> Rect + 'static) -> ScopeId {
        let key = self.next_positional();
        self.declare::<()>(key, Body::Layout(Rc::new(body)), None, None)
    }

    pub fn keyed_layout(
        &mut self,
        key: impl Into<String>,
        body: impl Fn(&mut LayoutCx) -> Rect + 'static,
    ) -> ScopeId {
        let key = self.explicit(key.into());
        self.declare::<()>(key, Body::Layout(Rc::new(body)), None, None)
    }

    pub fn skippable_layout<P: PartialEq + Clone + 'static>(
        &mut self,
        inputs: P,
        body: impl Fn(&mut LayoutCx, &P) -> Rect + 'static,
    ) -> ScopeId {
        let key = self.next_positional();
        let p = inputs.clone();
        let body = Body::Layout(Rc::new(move |cx: &mut LayoutCx| body(cx, &p)));
        self.declare(key, body, Some(inputs), None)
    }

    /// Declares a draw callback; it runs in the Draw phase.
    pub fn draw(&mut self, body: impl Fn(&mut DrawCx) + 'static) -> ScopeId {
        let key = self.next_positional();
        self.declare::<()>(key, Body::Draw(Rc::new(body)), None, None)
    }

    pub fn keyed_draw(&mut self, key: impl Into<String>, body: impl Fn(&mut DrawCx) + 'static) -> ScopeId {
        let key = self.explicit(key.into());
        self.declare::<()>(key, Body::Draw(Rc::new(body)), None, None)
    }

    pub fn skippable_draw<P: PartialEq + Clone + 'static>(
        &mut self,
        inputs: P,
        body: impl Fn(&mut DrawCx, &P) + 'static,
    ) -> ScopeId {
        let key = self.next_positional();
        let p = inputs.clone();
        let body = Body::Draw(Rc::new(move |cx: &mut DrawCx| body(cx, &p)));
        self.declare(key, body, Some(inputs), None)
    }

    /// Declares a keyed child that catches failures of itself and its
    /// descendants and renders `fallback` instead of `content` until
    /// [`Runtime::reset_boundary`] is called.
    pub fn error_boundary(
        &mut self,
        key: impl Into<String>,
        fallback: impl Fn(&mut Composer, &ErrorInfo) + 'static,
        content: impl Fn(&mut Composer) + 'static,
    ) -> ScopeId {
        let key = self.explicit(key.into());
        self.declare::<()>(
            key,
            Body::Compose(Rc::new(content)),
            None,
            Some(Rc::new(fallback)),
        )
    }

    fn next_positional(&mut self) -> ChildKey {
        let key = ChildKey::Positional(self.positional);
        self.positional += 1;
        key
    }

    fn explicit(&self, key: String) -> ChildKey {
        let tree = self.rt.shared.tree.borrow();
        let taken = |k: &ChildKey| {
            self.visited
                .iter()
                .any(|id| tree.get(*id).is_some_and(|n| &n.key == k))
        };
        let candidate = ChildKey::Explicit(key.clone());
        if !taken(&candidate) {
            return candidate;
        }
        log::warn!(
            "duplicate child key {:?} in scope {:?}; falling back to call order",
            key,
            self.scope
        );
        let mut n = 1;
        loop {
            let candidate = ChildKey::Explicit(format!("{key}#dup{n}"));
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn declare<P: PartialEq + 'static>(
        &mut self,
        key: ChildKey,
        body: Body,
        inputs: Option<P>,
        fallback: Option<FallbackFn>,
    ) -> ScopeId {
        let rt = self.cx.rt.clone();
        let sh = &rt.shared;
        let phase = body.phase();
        let parent = self.scope;

        let existing = {
            let tree = sh.tree.borrow();
            tree.find_child(parent, &key)
                .filter(|id| !self.visited.contains(id))
                .and_then(|id| tree.get(id).map(|n| (id, n)))
                .map(|(id, n)| {
                    let same_phase = n.phase() == phase;
                    let same_inputs = match (&inputs, &n.inputs) {
                        (Some(new), Some(old)) => old.downcast_ref::<P>() == Some(new),
                        _ => false,
                    };
                    (id, same_phase, same_inputs)
                })
        };

        let id = match existing {
            Some((id, true, same_inputs)) => {
                if same_inputs && !rt.is_queued(id) {
                    self.visited.push(id);
                    sh.report.borrow_mut().skipped.push(id);
                    log::trace!("skip {:?}: inputs unchanged", id);
                    return id;
                }
                if let Some(node) = sh.tree.borrow_mut().get_mut(id) {
                    node.body = body;
                    node.inputs = inputs.map(|p| Box::new(p) as Box<dyn Any>);
                    if let Some(fallback) = fallback {
                        match node.boundary.as_mut() {
                            Some(b) => b.fallback = fallback,
                            None => {
                                node.boundary = Some(Boundary {
                                    fallback,
                                    error: None,
                                })
                            }
                        }
                    }
                }
                id
            }
            other => {
                if let Some((old, _, _)) = other {
                    log::debug!("child {:?} changed phase; replacing {:?}", key, old);
                }
                let id = sh.tree.borrow_mut().insert(
                    Some(parent),
                    key,
                    body,
                    inputs.map(|p| Box::new(p) as Box<dyn Any>),
                );
                if phase == Phase::Layout {
                    let placement = rt.owned_cell(Rect::default(), id);
                    if let Some(node) = sh.tree.borrow_mut().get_mut(id) {
                        node.placement = Some(placement.id());
                    }
                }
                if let Some(fallback) = fallback
                    && let Some(node) = sh.tree.borrow_mut().get_mut(id)
                {
                    node.boundary = Some(Boundary {
                        fallback,
                        error: None,
                    });
                }
                self.created.push(id);
                id
            }
        };

        self.visited.push(id);
        match phase {
            Phase::Composition => {
                rt.execute(id);
            }
            Phase::Layout | Phase::Draw => rt.enqueue(id),
        }
        id
    }

    // --- state -----------------------------------------------------------

    /// A value kept across executions of this scope, matched by call order.
    pub fn remember<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<T> {
        let index = self.slot_cursor;
        self.slot_cursor += 1;
        let sh = &self.cx.rt.shared;
        let mut type_changed = false;
        if let Some(slot) = sh.tree.borrow().get(self.scope).and_then(|n| n.slots.get(index)) {
            if let Some(rc) = slot.downcast_ref::<Rc<T>>() {
                return rc.clone();
            }
            type_changed = true;
        }
        if type_changed {
            log::warn!(
                "remember slot {} of {:?} changed type; reinitialising",
                index,
                self.scope
            );
        }
        let rc = Rc::new(init());
        if let Some(node) = sh.tree.borrow_mut().get_mut(self.scope) {
            if index < node.slots.len() {
                node.slots[index] = Box::new(rc.clone());
            } else {
                node.slots.push(Box::new(rc.clone()));
            }
        }
        rc
    }

    /// Like [`Composer::remember`] but matched by key instead of call order.
    pub fn remember_with_key<T: 'static>(&mut self, key: impl Into<String>, init: impl FnOnce() -> T) -> Rc<T> {
        let key = key.into();
        let sh = &self.cx.rt.shared;
        if !self.keys_used.contains(&key) {
            self.keys_used.push(key.clone());
        }
        if let Some(slot) = sh.tree.borrow().get(self.scope).and_then(|n| n.keyed_slots.get(&key)) {
            if let Some(rc) = slot.downcast_ref::<Rc<T>>() {
                return rc.clone();
            }
            log::warn!(
                "remember_with_key({:?}) of {:?} changed type; reinitialising",
                key,
                self.scope
            );
        }
        let rc = Rc::new(init());
        if let Some(node) = sh.tree.borrow_mut().get_mut(self.scope) {
            node.keyed_slots.insert(key, Box::new(rc.clone()));
        }
        rc
    }

    /// A cell created on first execution and owned by this scope.
    pub fn cell<T: Clone + PartialEq + 'static>(&mut self, init: impl FnOnce() -> T) -> Cell<T> {
        let rt = self.cx.rt.clone();
        let scope = self.scope;
        *self.remember(move || rt.owned_cell(init(), scope))
    }

    /// A cell holding `compute`'s result, recomputed only when a cell read by
    /// `compute` changes. Readers of the result are invalidated only when the
    /// result itself changes.
    ///
    /// `compute` is captured on first execution.
    pub fn derived<T: Clone + PartialEq + 'static>(
        &mut self,
        compute: impl Fn(&ScopeCx) -> T + 'static,
    ) -> Cell<T> {
        let out: Rc<StdCell<Option<Cell<T>>>> = self.remember(|| StdCell::new(None));
        let owner = self.scope;
        let slot = out.clone();
        self.skippable((), move |cx, _| {
            let value = compute(cx);
            match slot.get() {
                Some(cell) => cx.rt.commit_and_propagate(cell, value),
                None => slot.set(Some(cx.rt.owned_cell(value, owner))),
            }
        });
        match out.get() {
            Some(cell) => cell,
            None => panic!("derived value of {:?} failed to compute", owner),
        }
    }

    /// Provides `value` to this scope and its descendants, shadowing any
    /// ancestor's value of the same type. Readers re-run when it changes.
    pub fn provide<T: Clone + PartialEq + 'static>(&mut self, value: T) {
        let ty = TypeId::of::<T>();
        if !self.provided.contains(&ty) {
            self.provided.push(ty);
        }
        let rt = self.cx.rt.clone();
        let existing = rt
            .shared
            .tree
            .borrow()
            .get(self.scope)
            .and_then(|n| n.locals.get(&ty).copied());
        match existing {
            Some(cell) => rt.commit_and_propagate(Cell::<T>::from_id(cell), value),
            None => {
                let shadowed = rt
                    .shared
                    .tree
                    .borrow()
                    .get(self.scope)
                    .and_then(|n| n.parent)
                    .and_then(|p| self.ancestor_local(p, ty));
                let cell = rt.owned_cell(value, self.scope);
                if let Some(node) = rt.shared.tree.borrow_mut().get_mut(self.scope) {
                    node.locals.insert(ty, cell.id());
                }
                if let Some(shadowed) = shadowed {
                    self.reresolve(shadowed);
                }
            }
        }
    }

    fn ancestor_local(&self, from: ScopeId, ty: TypeId) -> Option<CellId> {
        let tree = self.rt.shared.tree.borrow();
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = tree.get(id)?;
            if let Some(cell) = node.locals.get(&ty) {
                return Some(*cell);
            }
            cur = node.parent;
        }
        None
    }

    /// Descendants that resolved a local to an ancestor's cell now resolve
    /// to ours.
    fn reresolve(&self, shadowed: CellId) {
        let readers = self.rt.shared.registry.borrow().dependents_of([&shadowed]);
        let below: Vec<ScopeId> = {
            let tree = self.rt.shared.tree.borrow();
            readers
                .into_iter()
                .filter(|r| tree.ancestors(*r).contains(&self.scope))
                .collect()
        };
        self.rt.enqueue_all(below);
    }

    // --- effects ---------------------------------------------------------

    /// Runs `task` on the effect pool while this scope stays in the tree.
    /// An equal `key` on re-execution leaves the running task alone; a
    /// different key cancels it and starts a new one after it has stopped.
    pub fn launched_effect<K, F, Fut>(&mut self, key: K, task: F)
    where
        K: PartialEq + Clone + Send + 'static,
        F: FnOnce(EffectCx<K>) -> Fut + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let index = self.launched_cursor;
        self.launched_cursor += 1;
        let scope = self.scope;
        self.ops.push(Box::new(move |rt: &Runtime| {
            let sh = &rt.shared;
            let launch = sh.effects.borrow_mut().begin_launch(scope, index, &key);
            let Launch::Start { previous } = launch else {
                return;
            };
            let token = CancellationToken::new();
            let writer = RemoteWriter::guarded(sh.remote.clone(), scope, token.clone());
            let cx = EffectManager::new_cx(scope, key.clone(), token.clone(), writer);
            let fut = task(cx);
            sh.effects
                .borrow_mut()
                .spawn(scope, index, key, token, previous, fut);
        }));
    }

    /// Runs `effect` on the UI thread once the execution commits, and the
    /// returned [`Dispose`] when `key` changes or the scope leaves the tree.
    pub fn disposable_effect<K: PartialEq + 'static>(&mut self, key: K, effect: impl FnOnce() -> Dispose + 'static) {
        let index = self.disposable_cursor;
        self.disposable_cursor += 1;
        let scope = self.scope;
        self.ops.push(Box::new(move |rt: &Runtime| {
            let sh = &rt.shared;
            if !sh.effects.borrow().disposable_changed(scope, index, &key) {
                return;
            }
            let old = sh.effects.borrow_mut().take_disposable(scope, index);
            if let Some(old) = old {
                old.run();
            }
            let dispose = effect();
            sh.effects
                .borrow_mut()
                .put_disposable(scope, index, key, dispose);
        }));
    }

    /// A slot updated with `value` on every execution, readable from running
    /// tasks without restarting them.
    pub fn latest<T: Send + Sync + 'static>(&mut self, value: T) -> Latest<T> {
        let held: Rc<RefCell<Option<Latest<T>>>> = self.remember(|| RefCell::new(None));
        let mut slot = held.borrow_mut();
        match slot.as_ref() {
            Some(latest) => {
                latest.set(value);
                latest.clone()
            }
            None => {
                let latest = Latest::new(value);
                *slot = Some(latest.clone());
                latest
            }
        }
    }
}

/// Context of a layout body.
pub struct LayoutCx {
    cx: ScopeCx,
}

impl Deref for LayoutCx {
    type Target = ScopeCx;

    fn deref(&self) -> &ScopeCx {
        &self.cx
    }
}

impl LayoutCx {
    pub(crate) fn new(rt: Runtime, scope: ScopeId, epoch: u64) -> Self {
        Self {
            cx: ScopeCx::new(rt, scope, epoch, Phase::Layout),
        }
    }

    /// Rect of the enclosing layout, or the viewport at the top.
    pub fn constraints(&self) -> Rect {
        let start = {
            let tree = self.rt.shared.tree.borrow();
            tree.get(self.scope)
                .and_then(|n| n.parent)
                .and_then(|p| tree.get(p))
                .and_then(|p| p.parent)
        };
        self.placement_from(start)
    }

    fn placement_from(&self, start: Option<ScopeId>) -> Rect {
        let cell = self.rt.shared.tree.borrow().nearest_placement(start);
        let cell = cell.map(Cell::<Rect>::from_id).unwrap_or(self.rt.shared.viewport);
        self.get(cell)
    }
}

/// Context of a draw body. Collects the scope's scene nodes.
pub struct DrawCx {
    cx: ScopeCx,
    nodes: Vec<SceneNode>,
}

impl Deref for DrawCx {
    type Target = ScopeCx;

    fn deref(&self) -> &ScopeCx {
        &self.cx
    }
}

impl DrawCx {
    pub(crate) fn new(rt: Runtime, scope: ScopeId, epoch: u64) -> Self {
        Self {
            cx: ScopeCx::new(rt, scope, epoch, Phase::Draw),
            nodes: Vec::new(),
        }
    }

    pub(crate) fn into_nodes(self) -> Vec<SceneNode> {
        self.nodes
    }

    /// Rect computed by the layout declared alongside this draw scope, or the
    /// nearest enclosing one.
    pub fn bounds(&self) -> Rect {
        let parent = self.rt.shared.tree.borrow().get(self.scope).and_then(|n| n.parent);
        let cell = self.rt.shared.tree.borrow().nearest_placement(parent);
        let cell = cell.map(Cell::<Rect>::from_id).unwrap_or(self.rt.shared.viewport);
        self.get(cell)
    }

    pub fn push(&mut self, node: SceneNode) {
        self.nodes.push(node);
    }

    pub fn fill(&mut self, color: Color) {
        let rect = self.bounds();
        self.push(SceneNode::Rect {
            rect,
            color,
            radius: 0.0,
        });
    }

    pub fn text(&mut self, text: impl Into<String>, color: Color, size: f32) {
        let rect = self.bounds();
        self.push(SceneNode::Text {
            rect,
            text: text.into(),
            color,
            size,
        });
    }
}
