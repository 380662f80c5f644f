//! Scope tree.
//!
//! Every composable invocation, layout callback and draw callback is a node
//! here. Nodes own their remembered slots, the cells they created, the locals
//! they provide and their retained phase output; removing a node removes all
//! of that with it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};

use crate::composer::{Composer, DrawCx, LayoutCx};
use crate::scheduler::QueueKey;
use crate::{CellId, ErrorInfo, Phase, Rect, SceneNode};

new_key_type! {
    /// Identity of one scope in the tree.
    pub struct ScopeId;
}

/// How a child is matched against the previous execution of its parent.
///
/// `Positional(n)` is the n-th unkeyed child call. When unkeyed items are
/// reordered or inserted, state follows the position rather than the item;
/// give such children an `Explicit` key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChildKey {
    Positional(usize),
    Explicit(String),
}

pub(crate) type ComposeFn = Rc<dyn Fn(&mut Composer)>;
pub(crate) type LayoutFn = Rc<dyn Fn(&mut LayoutCx) -> Rect>;
pub(crate) type DrawFn = Rc<dyn Fn(&mut DrawCx)>;
pub(crate) type FallbackFn = Rc<dyn Fn(&mut Composer, &ErrorInfo)>;

#[derive(Clone)]
pub(crate) enum Body {
    Compose(ComposeFn),
    Layout(LayoutFn),
    Draw(DrawFn),
}

impl Body {
    pub fn phase(&self) -> Phase {
        match self {
            Body::Compose(_) => Phase::Composition,
            Body::Layout(_) => Phase::Layout,
            Body::Draw(_) => Phase::Draw,
        }
    }
}

pub(crate) struct Boundary {
    pub fallback: FallbackFn,
    pub error: Option<ErrorInfo>,
}

pub(crate) struct ScopeNode {
    pub parent: Option<ScopeId>,
    pub depth: u32,
    pub seq: u64,
    pub key: ChildKey,
    pub body: Body,
    /// Declared inputs; `Some` makes the scope skippable.
    pub inputs: Option<Box<dyn Any>>,
    pub children: Vec<ScopeId>,
    pub slots: Vec<Box<dyn Any>>,
    pub keyed_slots: HashMap<String, Box<dyn Any>>,
    pub owned_cells: Vec<CellId>,
    pub locals: HashMap<TypeId, CellId>,
    pub boundary: Option<Boundary>,
    /// Layout scopes: cell holding the last computed rect.
    pub placement: Option<CellId>,
    /// Draw scopes: retained output of the last successful execution.
    pub scene: Vec<SceneNode>,
    pub epoch: u64,
}

impl ScopeNode {
    pub fn phase(&self) -> Phase {
        self.body.phase()
    }

    pub fn skippable(&self) -> bool {
        self.inputs.is_some()
    }
}

/// Read-only view of a scope for collaborators and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeInfo {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub depth: u32,
    pub phase: Phase,
    pub key: ChildKey,
    pub skippable: bool,
    pub children: Vec<ScopeId>,
    pub error: Option<String>,
}

#[derive(Default)]
pub(crate) struct ScopeTree {
    nodes: SlotMap<ScopeId, ScopeNode>,
    next_seq: u64,
}

impl ScopeTree {
    pub fn insert(
        &mut self,
        parent: Option<ScopeId>,
        key: ChildKey,
        body: Body,
        inputs: Option<Box<dyn Any>>,
    ) -> ScopeId {
        let depth = parent
            .and_then(|p| self.nodes.get(p))
            .map(|p| p.depth + 1)
            .unwrap_or(0);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.nodes.insert(ScopeNode {
            parent,
            depth,
            seq,
            key,
            body,
            inputs,
            children: Vec::new(),
            slots: Vec::new(),
            keyed_slots: HashMap::new(),
            owned_cells: Vec::new(),
            locals: HashMap::new(),
            boundary: None,
            placement: None,
            scene: Vec::new(),
            epoch: 0,
        })
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn queue_key(&self, id: ScopeId) -> Option<QueueKey> {
        self.nodes.get(id).map(|n| QueueKey {
            depth: n.depth,
            seq: n.seq,
            id,
        })
    }

    pub fn info(&self, id: ScopeId) -> Option<ScopeInfo> {
        self.nodes.get(id).map(|n| ScopeInfo {
            id,
            parent: n.parent,
            depth: n.depth,
            phase: n.phase(),
            key: n.key.clone(),
            skippable: n.skippable(),
            children: n.children.clone(),
            error: n
                .boundary
                .as_ref()
                .and_then(|b| b.error.as_ref())
                .map(|e| e.message.clone()),
        })
    }

    /// Looks among the children committed by the parent's last execution.
    pub fn find_child(&self, parent: ScopeId, key: &ChildKey) -> Option<ScopeId> {
        let p = self.nodes.get(parent)?;
        p.children
            .iter()
            .copied()
            .find(|c| self.nodes.get(*c).is_some_and(|n| &n.key == key))
    }

    /// Parent first, up to the root.
    pub fn ancestors(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut cur = self.nodes.get(id).and_then(|n| n.parent);
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes.get(p).and_then(|n| n.parent);
        }
        out
    }

    /// Children before parents; `id` comes last.
    pub fn subtree_postorder(&self, id: ScopeId) -> Vec<ScopeId> {
        fn walk(tree: &ScopeTree, id: ScopeId, out: &mut Vec<ScopeId>) {
            if let Some(n) = tree.nodes.get(id) {
                for c in &n.children {
                    walk(tree, *c, out);
                }
                out.push(id);
            }
        }
        let mut out = Vec::new();
        walk(self, id, &mut out);
        out
    }

    pub fn preorder(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(n) = self.nodes.get(cur) {
                out.push(cur);
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn remove(&mut self, id: ScopeId) -> Option<ScopeNode> {
        self.nodes.remove(id)
    }

    pub fn detach(&mut self, parent: ScopeId, child: ScopeId) {
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }

    /// Placement cell of the nearest layout scope declared by `start` or one
    /// of its ancestors.
    pub fn nearest_placement(&self, start: Option<ScopeId>) -> Option<CellId> {
        let mut cur = start;
        while let Some(id) = cur {
            let node = self.nodes.get(id)?;
            let found = node.children.iter().find_map(|c| {
                self.nodes
                    .get(*c)
                    .filter(|n| n.phase() == Phase::Layout)
                    .and_then(|n| n.placement)
            });
            if found.is_some() {
                return found;
            }
            cur = node.parent;
        }
        None
    }

    /// First scope, starting at `id` itself, for which `pred` holds.
    pub fn find_up(&self, id: ScopeId, mut pred: impl FnMut(&ScopeNode) -> bool) -> Option<ScopeId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = self.nodes.get(c)?;
            if pred(node) {
                return Some(c);
            }
            cur = node.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Body {
        Body::Compose(Rc::new(|_| {}))
    }

    #[test]
    fn depth_and_sequence_follow_insertion() {
        let mut tree = ScopeTree::default();
        let root = tree.insert(None, ChildKey::Explicit("root".into()), noop(), None);
        let a = tree.insert(Some(root), ChildKey::Positional(0), noop(), None);
        let b = tree.insert(Some(a), ChildKey::Positional(0), noop(), None);
        tree.get_mut(root).unwrap().children = vec![a];
        tree.get_mut(a).unwrap().children = vec![b];

        assert_eq!(tree.get(root).unwrap().depth, 0);
        assert_eq!(tree.get(b).unwrap().depth, 2);
        assert!(tree.queue_key(a).unwrap() < tree.queue_key(b).unwrap());
        assert_eq!(tree.ancestors(b), vec![a, root]);
        assert_eq!(tree.subtree_postorder(root), vec![b, a, root]);
        assert_eq!(tree.preorder(root), vec![root, a, b]);
    }

    #[test]
    fn find_child_matches_by_key() {
        let mut tree = ScopeTree::default();
        let root = tree.insert(None, ChildKey::Explicit("root".into()), noop(), None);
        let x = tree.insert(Some(root), ChildKey::Explicit("x".into()), noop(), None);
        let p = tree.insert(Some(root), ChildKey::Positional(0), noop(), None);
        tree.get_mut(root).unwrap().children = vec![x, p];

        assert_eq!(tree.find_child(root, &ChildKey::Explicit("x".into())), Some(x));
        assert_eq!(tree.find_child(root, &ChildKey::Positional(0)), Some(p));
        assert_eq!(tree.find_child(root, &ChildKey::Positional(1)), None);

        tree.detach(root, x);
        assert_eq!(tree.find_child(root, &ChildKey::Explicit("x".into())), None);
    }
}
