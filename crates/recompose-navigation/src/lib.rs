//! Back-stack navigation.
//!
//! A [`NavBackStack`] is a list of destination keys. [`nav_host`] composes
//! only the top entry, as a child keyed by the entry's id. Popping or
//! replacing the top therefore removes that child from the tree, which
//! tears down its subtree and cancels every effect it launched.
//!
//! State that must outlive an entry's scope while it is covered (form input,
//! scroll offsets, results handed back by a child screen) goes in the entry's
//! [`SavedState`].
//!
//! ```rust
//! use recompose_core::*;
//! use recompose_navigation::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! enum Route {
//!     Home,
//!     Detail(u32),
//! }
//!
//! let rt = Runtime::new();
//! let stack = NavBackStack::new(&rt, Route::Home);
//! {
//!     let stack = stack.clone();
//!     rt.set_content(move |cx| {
//!         nav_host(cx, &stack, |cx, entry| {
//!             let title = format!("{:?}", entry.key());
//!             cx.draw(move |d| d.text(title.clone(), Color::WHITE, 14.0));
//!         });
//!     });
//! }
//! rt.frame().unwrap();
//!
//! stack.navigator().push(Route::Detail(7));
//! let report = rt.frame().unwrap();
//! assert_eq!(report.scene.unwrap().texts(), vec!["Detail(7)"]);
//! ```

use std::{any::Any, cell::RefCell, collections::HashMap, fmt::Debug, rc::Rc};

use recompose_core::{Cell, Composer, Runtime, ScopeId, WeakRuntime};
use serde::{Serialize, de::DeserializeOwned};

pub trait NavKey: Clone + Debug + PartialEq + 'static + Serialize + DeserializeOwned {}
impl<T> NavKey for T where T: Clone + Debug + PartialEq + 'static + Serialize + DeserializeOwned {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransitionDir {
    None,
    Push,
    Pop,
}

/// Per-entry storage that survives while the entry is covered by another.
#[derive(Default)]
pub struct SavedState {
    map: RefCell<HashMap<&'static str, Box<dyn Any>>>,
    results: RefCell<HashMap<&'static str, Box<dyn Any>>>,
}

impl SavedState {
    pub fn remember<T: 'static>(&self, key: &'static str, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        if let Some(b) = self.map.borrow().get(key)
            && let Some(rc) = b.downcast_ref::<Rc<RefCell<T>>>()
        {
            return rc.clone();
        }
        let rc = Rc::new(RefCell::new(init()));
        self.map.borrow_mut().insert(key, Box::new(rc.clone()));
        rc
    }

    pub fn set_result<T: 'static>(&self, key: &'static str, val: T) {
        self.results.borrow_mut().insert(key, Box::new(val));
    }

    pub fn take_result<T: 'static>(&self, key: &'static str) -> Option<T> {
        self.results
            .borrow_mut()
            .remove(key)?
            .downcast::<T>()
            .ok()
            .map(|b| *b)
    }
}

struct Entry<K: NavKey> {
    id: u64,
    key: K,
    saved: Rc<SavedState>,
}

struct BackState<K: NavKey> {
    entries: Vec<Entry<K>>,
    next_id: u64,
    last_dir: TransitionDir,
    version: u64,
}

impl<K: NavKey> BackState<K> {
    fn entry(&mut self, key: K) -> Entry<K> {
        let id = self.next_id;
        self.next_id += 1;
        Entry {
            id,
            key,
            saved: Rc::new(SavedState::default()),
        }
    }
}

/// The navigation history. Cloning shares the same stack.
///
/// Every change bumps a version cell; [`nav_host`] reads it, so only the
/// host scope re-runs on navigation.
#[derive(Clone)]
pub struct NavBackStack<K: NavKey> {
    inner: Rc<RefCell<BackState<K>>>,
    version: Cell<u64>,
    rt: WeakRuntime,
}

impl<K: NavKey> NavBackStack<K> {
    /// A stack holding `start`, with its version cell owned by `rt`.
    pub fn new(rt: &Runtime, start: K) -> Self {
        Self::with_version(rt.weak(), rt.cell(0), start)
    }

    fn with_version(rt: WeakRuntime, version: Cell<u64>, start: K) -> Self {
        let mut state = BackState {
            entries: Vec::new(),
            next_id: 1,
            last_dir: TransitionDir::None,
            version: 0,
        };
        let first = state.entry(start);
        state.entries.push(first);
        Self {
            inner: Rc::new(RefCell::new(state)),
            version,
            rt,
        }
    }

    pub fn top(&self) -> Option<(u64, K, Rc<SavedState>)> {
        let s = self.inner.borrow();
        s.entries
            .last()
            .map(|e| (e.id, e.key.clone(), e.saved.clone()))
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.borrow().entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn last_dir(&self) -> TransitionDir {
        self.inner.borrow().last_dir
    }

    /// The cell bumped on every change.
    pub fn version(&self) -> Cell<u64> {
        self.version
    }

    pub fn navigator(&self) -> Navigator<K> {
        Navigator { stack: self.clone() }
    }

    fn bump(&self) {
        let next = {
            let mut s = self.inner.borrow_mut();
            s.version = s.version.wrapping_add(1);
            s.version
        };
        let Some(rt) = self.rt.upgrade() else {
            log::debug!("back stack changed after its runtime was dropped");
            return;
        };
        if let Err(e) = rt.try_write(self.version, next) {
            log::warn!("back stack version not published: {e}");
        }
    }

    fn push_inner(&self, key: K) {
        let mut s = self.inner.borrow_mut();
        let entry = s.entry(key);
        log::debug!("nav push {:?} (entry {})", entry.key, entry.id);
        s.entries.push(entry);
        s.last_dir = TransitionDir::Push;
    }

    fn pop_inner(&self) -> bool {
        let mut s = self.inner.borrow_mut();
        s.last_dir = TransitionDir::Pop;
        match s.entries.pop() {
            Some(e) => {
                log::debug!("nav pop {:?} (entry {})", e.key, e.id);
                true
            }
            None => false,
        }
    }

    /// Swaps the top entry for a fresh one; the old entry's scope goes away.
    fn replace_inner(&self, key: K) {
        let mut s = self.inner.borrow_mut();
        s.entries.pop();
        let entry = s.entry(key);
        s.entries.push(entry);
        s.last_dir = TransitionDir::Push;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let s = self.inner.borrow();
        let keys: Vec<&K> = s.entries.iter().map(|e| &e.key).collect();
        serde_json::to_string(&keys)
    }

    /// Replaces the whole history with the keys in `json`. Every restored
    /// entry gets a fresh id and empty saved state. An empty list is
    /// rejected and leaves the stack untouched.
    pub fn from_json(&self, json: &str) -> serde_json::Result<()> {
        let keys: Vec<K> = serde_json::from_str(json)?;
        if keys.is_empty() {
            return Err(serde::de::Error::invalid_length(0, &"at least one entry"));
        }
        {
            let mut s = self.inner.borrow_mut();
            s.entries.clear();
            for k in keys {
                let entry = s.entry(k);
                s.entries.push(entry);
            }
            s.last_dir = TransitionDir::None;
        }
        self.bump();
        Ok(())
    }
}

#[derive(Clone)]
pub struct Navigator<K: NavKey> {
    pub stack: NavBackStack<K>,
}

impl<K: NavKey> Navigator<K> {
    pub fn push(&self, k: K) {
        self.stack.push_inner(k);
        self.stack.bump();
    }

    pub fn replace(&self, k: K) {
        self.stack.replace_inner(k);
        self.stack.bump();
    }

    /// Pops the top entry. The last entry is never popped.
    pub fn pop(&self) -> bool {
        if self.stack.size() <= 1 {
            return false;
        }
        let ok = self.stack.pop_inner();
        if ok {
            self.stack.bump();
        }
        ok
    }

    pub fn clear_and_push(&self, k: K) {
        while self.stack.pop_inner() {}
        self.stack.push_inner(k);
        self.stack.bump();
    }

    /// Pops down to the newest entry matching `pred`, which is popped too
    /// when `inclusive`. At least one entry always remains.
    pub fn pop_to<F: Fn(&K) -> bool>(&self, pred: F, inclusive: bool) {
        let count = {
            let s = self.stack.inner.borrow();
            match s.entries.iter().rposition(|e| pred(&e.key)) {
                Some(idx) => {
                    let keep = if inclusive { idx } else { idx + 1 };
                    s.entries.len() - keep.max(1)
                }
                None => 0,
            }
        };
        for _ in 0..count {
            let _ = self.stack.pop_inner();
        }
        if count > 0 {
            self.stack.bump();
        }
    }
}

/// A back stack kept in the calling scope, created with `start` on first
/// execution.
pub fn remember_back_stack<K: NavKey>(cx: &mut Composer, start: K) -> Rc<NavBackStack<K>> {
    let version = cx.cell(|| 0u64);
    let rt = cx.runtime().weak();
    cx.remember_with_key("nav:stack", move || NavBackStack::with_version(rt, version, start))
}

/// What a destination's renderer gets to know about its entry.
#[derive(Clone)]
pub struct EntryScope<K: NavKey> {
    id: u64,
    key: K,
    dir: TransitionDir,
    saved: Rc<SavedState>,
    nav: Navigator<K>,
}

impl<K: NavKey> EntryScope<K> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// How this entry became the top one.
    pub fn dir(&self) -> TransitionDir {
        self.dir
    }

    pub fn navigator(&self) -> Navigator<K> {
        self.nav.clone()
    }

    pub fn remember_saveable<T: 'static>(&self, slot: &'static str, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        self.saved.remember(slot, init)
    }

    pub fn set_result<T: 'static>(&self, slot: &'static str, v: T) {
        self.saved.set_result(slot, v)
    }

    pub fn take_result<T: 'static>(&self, slot: &'static str) -> Option<T> {
        self.saved.take_result(slot)
    }
}

/// Hands `v` to the entry below the top one, for it to pick up with
/// [`EntryScope::take_result`] once the top is popped.
pub fn set_previous_result<K: NavKey, T: 'static>(stack: &NavBackStack<K>, slot: &'static str, v: T) -> bool {
    let s = stack.inner.borrow();
    let n = s.entries.len();
    if n < 2 {
        return false;
    }
    s.entries[n - 2].saved.set_result(slot, v);
    true
}

/// Composes the top entry of `stack` with `render`.
///
/// The host is its own child scope, so navigation re-runs the host and not
/// the caller. The entry is composed under the key `nav:{id}`.
pub fn nav_host<K: NavKey>(
    cx: &mut Composer,
    stack: &NavBackStack<K>,
    render: impl Fn(&mut Composer, &EntryScope<K>) + 'static,
) -> ScopeId {
    let stack = stack.clone();
    let render = Rc::new(render);
    cx.keyed("nav:host", move |cx| {
        cx.get(stack.version);
        let Some((id, key, saved)) = stack.top() else {
            return;
        };
        let entry = EntryScope {
            id,
            key,
            dir: stack.last_dir(),
            saved,
            nav: stack.navigator(),
        };
        let render = render.clone();
        cx.keyed(format!("nav:{id}"), move |cx| render(cx, &entry));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recompose_core::{Color, RuntimeConfig, on_dispose};
    use serde::Deserialize;
    use std::cell::Cell as StdCell;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum Route {
        Home,
        Detail(u32),
        Settings,
    }

    fn runtime() -> Runtime {
        let _ = env_logger::builder().is_test(true).try_init();
        Runtime::with_config(RuntimeConfig::default().with_strict_reads(true)).unwrap()
    }

    fn title(cx: &mut Composer, entry: &EntryScope<Route>) {
        let text = format!("{:?}", entry.key());
        cx.draw(move |d| d.text(text.clone(), Color::WHITE, 14.0));
    }

    fn texts(rt: &Runtime) -> Vec<String> {
        rt.frame()
            .unwrap()
            .scene
            .unwrap()
            .texts()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_push_pop_and_floor() {
        let rt = runtime();
        let stack = NavBackStack::new(&rt, Route::Home);
        let nav = stack.navigator();

        assert!(!nav.pop());
        nav.push(Route::Detail(1));
        nav.push(Route::Settings);
        assert_eq!(stack.size(), 3);
        assert_eq!(stack.last_dir(), TransitionDir::Push);

        assert!(nav.pop());
        assert_eq!(stack.last_dir(), TransitionDir::Pop);
        assert_eq!(stack.keys(), vec![Route::Home, Route::Detail(1)]);
        assert!(nav.pop());
        assert!(!nav.pop());
        assert_eq!(stack.top().map(|t| t.1), Some(Route::Home));
    }

    #[test]
    fn test_pop_to_and_clear() {
        let rt = runtime();
        let stack = NavBackStack::new(&rt, Route::Home);
        let nav = stack.navigator();
        for i in 1..=3 {
            nav.push(Route::Detail(i));
        }
        nav.pop_to(|k| *k == Route::Detail(1), false);
        assert_eq!(stack.keys(), vec![Route::Home, Route::Detail(1)]);

        nav.push(Route::Settings);
        nav.pop_to(|k| *k == Route::Detail(1), true);
        assert_eq!(stack.keys(), vec![Route::Home]);

        // never below one entry
        nav.pop_to(|k| *k == Route::Home, true);
        assert_eq!(stack.size(), 1);

        nav.push(Route::Detail(9));
        nav.clear_and_push(Route::Settings);
        assert_eq!(stack.keys(), vec![Route::Settings]);
    }

    #[test]
    fn test_json_round_trip_resets_ids() {
        let rt = runtime();
        let stack = NavBackStack::new(&rt, Route::Home);
        stack.navigator().push(Route::Detail(4));
        let json = stack.to_json().unwrap();
        assert_eq!(json, r#"["Home",{"Detail":4}]"#);

        let restored = NavBackStack::new(&rt, Route::Settings);
        restored.from_json(&json).unwrap();
        assert_eq!(restored.keys(), vec![Route::Home, Route::Detail(4)]);
        assert_eq!(restored.last_dir(), TransitionDir::None);
        assert_eq!(restored.top().map(|t| t.0), Some(3));

        assert!(restored.from_json("[]").is_err());
        assert!(restored.from_json("not json").is_err());
        assert_eq!(restored.size(), 2);
    }

    #[test]
    fn test_host_renders_top_and_rebuilds_only_itself() {
        let rt = runtime();
        let stack = NavBackStack::new(&rt, Route::Home);
        let root_runs = Rc::new(StdCell::new(0));
        {
            let (stack, root_runs) = (stack.clone(), root_runs.clone());
            rt.set_content(move |cx| {
                root_runs.set(root_runs.get() + 1);
                nav_host(cx, &stack, title);
            });
        }
        assert_eq!(texts(&rt), vec!["Home"]);

        stack.navigator().push(Route::Detail(2));
        assert_eq!(texts(&rt), vec!["Detail(2)"]);
        stack.navigator().replace(Route::Settings);
        assert_eq!(texts(&rt), vec!["Settings"]);
        stack.navigator().pop();
        assert_eq!(texts(&rt), vec!["Home"]);
        assert_eq!(root_runs.get(), 1);
    }

    #[test]
    fn test_popped_entry_is_torn_down() {
        let rt = runtime();
        let disposed = Rc::new(StdCell::new(0));
        let holder: Rc<RefCell<Option<Rc<NavBackStack<Route>>>>> = Rc::default();
        {
            let (disposed, holder) = (disposed.clone(), holder.clone());
            rt.set_content(move |cx| {
                let stack = remember_back_stack(cx, Route::Home);
                *holder.borrow_mut() = Some(stack.clone());
                let disposed = disposed.clone();
                nav_host(cx, &stack, move |cx, entry| {
                    if let Route::Detail(_) = entry.key() {
                        let disposed = disposed.clone();
                        cx.disposable_effect((), move || {
                            on_dispose(move || disposed.set(disposed.get() + 1))
                        });
                        cx.launched_effect((), |fx| async move { fx.cancelled().await });
                    }
                });
            });
        }
        rt.frame().unwrap();
        let stack = holder.borrow().clone().unwrap();
        let scopes = rt.scope_count();

        stack.navigator().push(Route::Detail(1));
        let report = rt.frame().unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(rt.running_effects(), 1);

        stack.navigator().pop();
        let report = rt.frame().unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(disposed.get(), 1);
        assert_eq!(rt.running_effects(), 0);
        assert_eq!(rt.scope_count(), scopes);
    }

    #[test]
    fn test_saved_state_outlives_covered_scope() {
        let rt = runtime();
        let stack = NavBackStack::new(&rt, Route::Home);
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let (stack, seen) = (stack.clone(), seen.clone());
            rt.set_content(move |cx| {
                let seen = seen.clone();
                nav_host(cx, &stack, move |_cx, entry| {
                    if *entry.key() == Route::Home {
                        let visits = entry.remember_saveable("visits", || 0);
                        *visits.borrow_mut() += 1;
                        let picked = entry.take_result::<u32>("picked");
                        seen.borrow_mut().push((*visits.borrow(), picked));
                    }
                });
            });
        }
        rt.frame().unwrap();
        let nav = stack.navigator();
        nav.push(Route::Detail(5));
        rt.frame().unwrap();
        assert!(set_previous_result(&stack, "picked", 5u32));
        nav.pop();
        rt.frame().unwrap();

        assert_eq!(*seen.borrow(), vec![(1, None), (2, Some(5))]);
    }
}
