//! # Effects
//!
//! Scope execution is pure; side effects live here, bound to a scope's
//! presence in the tree:
//!
//! - `launched_effect(key, task)` runs an async task on the effect pool while
//!   the owning scope stays in the tree. Re-executing with an equal key is a
//!   no-op; a different key cancels the old task, and the new one starts only
//!   after the old one has observed its cancellation.
//! - `disposable_effect(key, f)` runs `f` synchronously on the UI thread and
//!   runs the returned [`Dispose`] on key change or teardown.
//! - `latest(value)` is a single-slot indirection a long-running task can read
//!   to see the owner's most recent value without being restarted.
//!
//! Cancellation is cooperative: tasks poll [`EffectCx::is_cancelled`] or await
//! [`EffectCx::cancelled`] at their suspension points. Writes from a task go
//! through a [`RemoteWriter`](crate::RemoteWriter) and are applied on the UI
//! thread at the start of the next turn; writes issued after cancellation are
//! dropped.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Cell, Error, RemoteWriter, Result, ScopeId};

static EFFECT_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// The ambient tokio runtime if there is one, else a shared pool.
pub(crate) fn effect_handle(worker_threads: usize) -> Result<Handle> {
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle);
    }
    if let Some(rt) = EFFECT_RT.get() {
        return Ok(rt.handle().clone());
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(worker_threads)
        .thread_name("recompose-effects")
        .build()
        .map_err(|e| Error::Config(format!("cannot start effect pool: {e}")))?;
    Ok(EFFECT_RT.get_or_init(|| rt).handle().clone())
}

#[derive(Clone)]
pub struct Dispose(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.borrow_mut().take();
        if let Some(f) = f {
            f()
        }
    }
}

/// Helper to register cleanup inside a disposable effect.
pub fn on_dispose(f: impl FnOnce() + 'static) -> Dispose {
    Dispose::new(f)
}

/// Always-latest value shared with running tasks.
pub struct Latest<T>(Arc<ArcSwap<T>>);

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Latest<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(value)))
    }

    pub fn get(&self) -> Arc<T> {
        self.0.load_full()
    }

    pub fn set(&self, value: T) {
        self.0.store(Arc::new(value));
    }
}

/// Handed to a launched task.
pub struct EffectCx<K> {
    scope: ScopeId,
    key: K,
    token: CancellationToken,
    writer: RemoteWriter,
}

impl<K> EffectCx<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleeps for `d`; false if cancelled first.
    pub async fn delay(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Queues a write for the UI thread. Dropped (returns false) once cancelled.
    pub fn write<T: PartialEq + Send + 'static>(&self, cell: Cell<T>, value: T) -> bool {
        self.writer.write(cell, value)
    }

    pub fn writer(&self) -> RemoteWriter {
        self.writer.clone()
    }
}

struct Launched {
    key: Box<dyn Any>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Disposable {
    key: Box<dyn Any>,
    dispose: Dispose,
}

pub(crate) enum Launch {
    /// Same key as the running task.
    Unchanged,
    /// Start a new task once `previous` (already cancelled) has finished.
    Start { previous: Option<JoinHandle<()>> },
}

type Slot = (ScopeId, usize);

pub(crate) struct EffectManager {
    handle: Handle,
    launched: HashMap<Slot, Launched>,
    disposables: HashMap<Slot, Disposable>,
    started: u64,
}

impl EffectManager {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            launched: HashMap::new(),
            disposables: HashMap::new(),
            started: 0,
        }
    }

    pub fn begin_launch<K: PartialEq + 'static>(&mut self, scope: ScopeId, index: usize, key: &K) -> Launch {
        let slot = (scope, index);
        if self
            .launched
            .get(&slot)
            .and_then(|l| l.key.downcast_ref::<K>())
            .is_some_and(|k| k == key)
        {
            return Launch::Unchanged;
        }
        let previous = self.launched.remove(&slot).and_then(|prev| {
            log::debug!("effect {:?}#{} key changed; cancelling", scope, index);
            prev.token.cancel();
            prev.handle
        });
        Launch::Start { previous }
    }

    pub fn spawn<K, Fut>(
        &mut self,
        scope: ScopeId,
        index: usize,
        key: K,
        token: CancellationToken,
        previous: Option<JoinHandle<()>>,
        fut: Fut,
    ) where
        K: 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = token.clone();
        let handle = self.handle.spawn(async move {
            if let Some(prev) = previous
                && let Err(e) = prev.await
            {
                log::debug!("previous effect of {:?}#{} ended abnormally: {e}", scope, index);
            }
            if gate.is_cancelled() {
                return;
            }
            if let Err(e) = tokio::spawn(fut).await
                && e.is_panic()
            {
                log::warn!("effect {:?}#{} panicked: {e}", scope, index);
            }
        });
        self.started += 1;
        log::debug!("effect {:?}#{} started", scope, index);
        self.launched.insert(
            (scope, index),
            Launched {
                key: Box::new(key),
                token,
                handle: Some(handle),
            },
        );
    }

    pub fn new_cx<K>(scope: ScopeId, key: K, token: CancellationToken, writer: RemoteWriter) -> EffectCx<K> {
        EffectCx {
            scope,
            key,
            token,
            writer,
        }
    }

    pub fn disposable_changed<K: PartialEq + 'static>(&self, scope: ScopeId, index: usize, key: &K) -> bool {
        !self
            .disposables
            .get(&(scope, index))
            .and_then(|d| d.key.downcast_ref::<K>())
            .is_some_and(|k| k == key)
    }

    pub fn take_disposable(&mut self, scope: ScopeId, index: usize) -> Option<Dispose> {
        self.disposables.remove(&(scope, index)).map(|d| d.dispose)
    }

    pub fn put_disposable<K: 'static>(&mut self, scope: ScopeId, index: usize, key: K, dispose: Dispose) {
        self.disposables.insert(
            (scope, index),
            Disposable {
                key: Box::new(key),
                dispose,
            },
        );
    }

    /// Cancels slots at or past the counts used by the latest execution.
    /// Returned disposers must be run by the caller, outside any borrow.
    pub fn retain(&mut self, scope: ScopeId, launched_used: usize, disposables_used: usize) -> Vec<Dispose> {
        self.launched.retain(|(s, i), l| {
            let keep = *s != scope || *i < launched_used;
            if !keep {
                l.token.cancel();
            }
            keep
        });
        let stale: Vec<Slot> = self
            .disposables
            .keys()
            .filter(|(s, i)| *s == scope && *i >= disposables_used)
            .copied()
            .collect();
        stale
            .into_iter()
            .filter_map(|slot| self.disposables.remove(&slot).map(|d| d.dispose))
            .collect()
    }

    /// Cancels everything the scope owns.
    pub fn cancel_scope(&mut self, scope: ScopeId) -> Vec<Dispose> {
        let mut cancelled = 0;
        self.launched.retain(|(s, _), l| {
            if *s == scope {
                l.token.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            log::debug!("cancelled {} effect task(s) of {:?}", cancelled, scope);
        }
        self.retain(scope, usize::MAX, 0)
    }

    /// Tasks that are neither cancelled nor finished.
    pub fn running(&self) -> usize {
        self.launched
            .values()
            .filter(|l| !l.token.is_cancelled())
            .filter(|l| l.handle.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }

    pub fn started(&self) -> u64 {
        self.started
    }
}

/// The runtime went away: nothing owns these tasks any more.
impl Drop for EffectManager {
    fn drop(&mut self) {
        let cancelled = self.launched.len();
        for (_, l) in self.launched.drain() {
            l.token.cancel();
        }
        if cancelled > 0 {
            log::debug!("runtime dropped; cancelled {} effect task(s)", cancelled);
        }
        for (_, d) in self.disposables.drain() {
            d.dispose.run();
        }
    }
}
