#![forbid(unsafe_code)]

//! The watchable graph: recursive wrapping, ownership, and change dispatch.
//!
//! [`to_watchable`] turns a plain record/sequence tree into a graph of
//! [`Node`]s. Every node knows its owner (parent node plus the key it sits
//! under, or the root sentinel), so a mutation anywhere can bubble to the
//! root, notifying each ancestor's wildcard watchers with an accumulating
//! path. [`from_watchable`] strips all of that back off, yielding a plain
//! tree with zero residue.
//!
//! # Architecture
//!
//! `Node` is a cheap `Rc` handle over shared interior state, the same
//! single-threaded shape as the rest of the crate. All mutations funnel
//! through one write path (`write_slot`), which consults the equality
//! registry (equal writes are no-ops), adopts incoming values (cloning
//! nodes that are already owned elsewhere — a node has exactly one owner),
//! stores, and dispatches.
//!
//! # Invariants
//!
//! 1. Each node has exactly one owner at a time. Adopting a node owned
//!    elsewhere wraps a fresh clone instead of re-parenting it.
//! 2. A write whose value is equal under registered equality produces zero
//!    notifications.
//! 3. Dispatch at a node fires exact-key watchers, then wildcard watchers
//!    (unless wildcard notification is held), then recurses into the owner
//!    with the node's own key prepended to the path.
//! 4. Watcher lists are snapshotted before iteration: a callback may
//!    destroy itself, destroy siblings, or register new watchers without
//!    perturbing delivery within the current pass.
//! 5. Bookkeeping (owner links, previous-length) never appears in
//!    `from_watchable` output.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::equality;
use crate::error::{Result, WatchError};
use crate::handle::{Handle, HandleList, handle_list};
use crate::hub::WatchHub;
use crate::modes::{Mode, Modes};
use crate::sequence::AdviceTable;
use crate::value::{Key, Path, Plain, Value};

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// What a watcher receives: the slot's current value, the value it replaced,
/// the node (or hub) the watcher was registered on, and the route from that
/// target down to the mutated slot.
///
/// For wildcard watchers `value` is the target itself; for batch mutations
/// the trailing wildcard's `old` is `Null` (the previous arrangement is not
/// tracked as a whole).
#[derive(Clone, Debug)]
pub struct Change {
    pub value: Value,
    pub old: Value,
    pub target: Source,
    pub path: Path,
}

/// The object a subscription was registered on.
#[derive(Clone)]
pub enum Source {
    Node(Node),
    Hub(WatchHub),
}

impl Source {
    #[must_use]
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            Self::Hub(_) => None,
        }
    }

    #[must_use]
    pub fn as_hub(&self) -> Option<&WatchHub> {
        match self {
            Self::Hub(h) => Some(h),
            Self::Node(_) => None,
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(n) => f.debug_tuple("Node").field(n).finish(),
            Self::Hub(h) => f.debug_tuple("Hub").field(h).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node internals
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) enum Owner {
    /// Detached: freshly wrapped or removed from a container. Bubbling
    /// stops here, and the node may be adopted without cloning.
    None,
    /// Top of a watched tree.
    Root,
    /// Owned by `node` under `key`.
    Parent { node: Weak<NodeInner>, key: Key },
}

pub(crate) enum Body {
    Record(AHashMap<String, Value>),
    Seq {
        items: Vec<Value>,
        /// Length as of the last length notification; used to diff length
        /// changes that element-level bookkeeping would otherwise mask.
        old_len: usize,
    },
}

#[derive(Default)]
pub(crate) struct Catalog {
    pub(crate) by_key: AHashMap<Key, HandleList>,
    pub(crate) star: Option<HandleList>,
}

pub(crate) struct NodeInner {
    pub(crate) modes: Rc<Modes>,
    pub(crate) owner: RefCell<Owner>,
    pub(crate) body: RefCell<Body>,
    pub(crate) catalog: RefCell<Catalog>,
    pub(crate) advice: RefCell<AdviceTable>,
}

/// A watchable graph node: a record or an ordered sequence.
///
/// Cloning a `Node` yields another handle to the **same** node.
pub struct Node {
    pub(crate) inner: Rc<NodeInner>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Node::ptr_eq(self, other)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({:?})", self.to_plain())
    }
}

// ---------------------------------------------------------------------------
// Wrapping / unwrapping
// ---------------------------------------------------------------------------

/// Wrap a plain tree into a watchable graph.
///
/// Fails with [`WatchError::ScalarNotWatchable`] for scalar input.
/// Notification is paused while the tree is built.
pub fn to_watchable(plain: impl Into<Plain>) -> Result<Node> {
    let plain = plain.into();
    if plain.is_scalar() {
        return Err(WatchError::ScalarNotWatchable);
    }
    let modes = Rc::new(Modes::default());
    let node = {
        let _pause = modes.enter(Mode::Pause);
        match wrap_value(&plain, &modes) {
            Value::Node(n) => n,
            // wrap_value only returns a scalar for scalar input, excluded above.
            Value::Scalar(_) => return Err(WatchError::ScalarNotWatchable),
        }
    };
    node.set_owner(Owner::Root);
    Ok(node)
}

/// Strip all bookkeeping from a graph node, yielding the equivalent plain
/// tree.
#[must_use]
pub fn from_watchable(node: &Node) -> Plain {
    node.to_plain()
}

/// Wrap one plain value for storage in a slot: scalars pass through,
/// containers become detached nodes ready for adoption.
pub(crate) fn wrap_value(plain: &Plain, modes: &Rc<Modes>) -> Value {
    match plain {
        Plain::Scalar(s) => Value::Scalar(s.clone()),
        Plain::Record(map) => {
            let node = Node::new_container(modes, Body::Record(AHashMap::new()));
            for (k, v) in map {
                node.write_slot(Key::Prop(k.clone()), wrap_value(v, modes));
            }
            Value::Node(node)
        }
        Plain::Seq(items) => {
            let node = Node::new_container(
                modes,
                Body::Seq {
                    items: Vec::new(),
                    old_len: 0,
                },
            );
            for (i, v) in items.iter().enumerate() {
                node.write_slot(Key::Index(i), wrap_value(v, modes));
            }
            Value::Node(node)
        }
    }
}

impl Node {
    fn new_container(modes: &Rc<Modes>, body: Body) -> Node {
        Node {
            inner: Rc::new(NodeInner {
                modes: Rc::clone(modes),
                owner: RefCell::new(Owner::None),
                body: RefCell::new(body),
                catalog: RefCell::new(Catalog::default()),
                advice: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Identity comparison: do both handles refer to the same node?
    #[must_use]
    pub fn ptr_eq(a: &Node, b: &Node) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(&*self.inner.body.borrow(), Body::Record(_))
    }

    #[must_use]
    pub fn is_sequence(&self) -> bool {
        matches!(&*self.inner.body.borrow(), Body::Seq { .. })
    }

    /// Number of slots: element count for sequences, key count for records.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.inner.body.borrow() {
            Body::Record(map) => map.len(),
            Body::Seq { items, .. } => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record keys in sorted order (empty for sequences).
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match &*self.inner.body.borrow() {
            Body::Record(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            Body::Seq { .. } => Vec::new(),
        }
    }

    /// Read one slot. `Key::Length` reads a sequence's length as an `Int`.
    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.peek(&key.into())
    }

    /// Read a slot expected to hold a child node.
    #[must_use]
    pub fn get_node(&self, key: impl Into<Key>) -> Option<Node> {
        match self.get(key) {
            Some(Value::Node(n)) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_plain(&self) -> Plain {
        match &*self.inner.body.borrow() {
            Body::Record(map) => Plain::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain()))
                    .collect(),
            ),
            Body::Seq { items, .. } => Plain::Seq(items.iter().map(Value::to_plain).collect()),
        }
    }

    // -- record writes ------------------------------------------------------

    /// Assign a plain value to a record key. Nested records/sequences are
    /// wrapped as child nodes. A value equal under registered equality is a
    /// no-op.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Plain>) -> Result<()> {
        if !self.is_record() {
            return Err(WatchError::NotARecord);
        }
        let plain = value.into();
        let incoming = wrap_value(&plain, &self.inner.modes);
        self.write_slot(Key::Prop(key.into()), incoming);
        Ok(())
    }

    /// Assign an already-wrapped value to a record key. A node owned
    /// elsewhere is adopted as a fresh clone.
    pub fn set_value(&self, key: impl Into<String>, value: Value) -> Result<()> {
        if !self.is_record() {
            return Err(WatchError::NotARecord);
        }
        self.write_slot(Key::Prop(key.into()), value);
        Ok(())
    }

    /// Remove a record key, notifying watchers with the removed value as
    /// `old`. Returns the removed plain value, `None` if the key was absent.
    pub fn remove(&self, key: &str) -> Result<Option<Plain>> {
        let old = {
            let mut body = self.inner.body.borrow_mut();
            match &mut *body {
                Body::Record(map) => map.remove(key),
                Body::Seq { .. } => return Err(WatchError::NotARecord),
            }
        };
        let Some(old) = old else {
            return Ok(None);
        };
        if let Value::Node(n) = &old {
            n.set_owner(Owner::None);
        }
        let plain = old.to_plain();
        if !self.muted() {
            self.dispatch(old, vec![Key::Prop(key.to_string())]);
        }
        Ok(Some(plain))
    }

    // -- sequence writes ----------------------------------------------------

    /// Assign a plain value to a sequence index. `index == len` appends
    /// (and notifies the length change); `index > len` is an error.
    pub fn set_index(&self, index: usize, value: impl Into<Plain>) -> Result<()> {
        let len = self.seq_len()?;
        if index > len {
            return Err(WatchError::IndexOutOfBounds { index, len });
        }
        let plain = value.into();
        self.write_slot(Key::Index(index), wrap_value(&plain, &self.inner.modes));
        Ok(())
    }

    /// Append one element. Returns the new length.
    pub fn push(&self, value: impl Into<Plain>) -> Result<usize> {
        let len = self.seq_len()?;
        self.set_index(len, value)?;
        Ok(len + 1)
    }

    /// Assign the sequence length directly: shrinking detaches and drops the
    /// tail, growing pads with `Null`. Dispatches one `Length` change.
    pub fn set_len(&self, new_len: usize) -> Result<()> {
        let len = self.seq_len()?;
        if new_len == len {
            return Ok(());
        }
        let mut detached: Vec<Value> = Vec::new();
        {
            let mut body = self.inner.body.borrow_mut();
            if let Body::Seq { items, old_len } = &mut *body {
                if new_len < items.len() {
                    detached = items.split_off(new_len);
                } else {
                    items.resize(new_len, Value::null());
                }
                *old_len = new_len;
            }
        }
        for v in &detached {
            if let Value::Node(n) = v {
                n.set_owner(Owner::None);
            }
        }
        if !self.muted() {
            self.dispatch(Value::from(len as i64), vec![Key::Length]);
        }
        Ok(())
    }

    // -- watch API ----------------------------------------------------------

    /// Watch one key. The watcher also fires when a descendant beneath that
    /// key changes (the bubbling path names the exact slot).
    pub fn watch(&self, key: impl Into<Key>, watcher: impl Fn(&Change) + 'static) -> Handle {
        self.watch_rc(key.into(), Rc::new(watcher))
    }

    /// Watch several keys with one shared watcher.
    pub fn watch_keys(&self, keys: &[Key], watcher: impl Fn(&Change) + 'static) -> Vec<Handle> {
        let shared: Rc<dyn Fn(&Change)> = Rc::new(watcher);
        keys.iter()
            .map(|k| self.watch_rc(k.clone(), Rc::clone(&shared)))
            .collect()
    }

    /// Install a batch of key → watcher subscriptions.
    pub fn watch_map(
        &self,
        entries: impl IntoIterator<Item = (Key, Box<dyn Fn(&Change)>)>,
    ) -> Vec<Handle> {
        entries
            .into_iter()
            .map(|(k, w)| self.watch_rc(k, Rc::from(w)))
            .collect()
    }

    /// Watch every change on this node (and, via bubbling, beneath it).
    pub fn watch_any(&self, watcher: impl Fn(&Change) + 'static) -> Handle {
        let list = {
            let mut catalog = self.inner.catalog.borrow_mut();
            catalog.star.get_or_insert_with(handle_list).clone()
        };
        let weak = Rc::downgrade(&self.inner);
        Handle::in_container(
            Rc::new(watcher),
            &list,
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.catalog.borrow_mut().star = None;
                }
            })),
        )
    }

    fn watch_rc(&self, key: Key, watcher: Rc<dyn Fn(&Change)>) -> Handle {
        let list = {
            let mut catalog = self.inner.catalog.borrow_mut();
            catalog
                .by_key
                .entry(key.clone())
                .or_insert_with(handle_list)
                .clone()
        };
        let weak = Rc::downgrade(&self.inner);
        let entry_key = key;
        Handle::in_container(
            watcher,
            &list,
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.catalog.borrow_mut().by_key.remove(&entry_key);
                }
            })),
        )
    }

    // -- write path ---------------------------------------------------------

    /// The single write path: equality check, adoption, store, dispatch.
    /// Returns whether a change was applied.
    pub(crate) fn write_slot(&self, key: Key, incoming: Value) -> bool {
        let old = self.peek(&key);
        if let Some(existing) = &old
            && equality::eql(existing, &incoming)
        {
            return false;
        }

        let value = if self.inner.modes.get(Mode::Relocating) {
            // Moving an already-wrapped node: keep its identity, retag its
            // position.
            if let Value::Node(n) = &incoming {
                n.set_owner(Owner::Parent {
                    node: Rc::downgrade(&self.inner),
                    key: key.clone(),
                });
            }
            incoming
        } else {
            self.adopt(incoming, &key)
        };

        let mut prev_len: Option<usize> = None;
        {
            let mut body = self.inner.body.borrow_mut();
            match (&mut *body, &key) {
                (Body::Record(map), Key::Prop(name)) => {
                    map.insert(name.clone(), value);
                }
                (Body::Seq { items, old_len }, Key::Index(i)) => {
                    if *i < items.len() {
                        items[*i] = value;
                    } else {
                        items.push(value);
                    }
                    if items.len() != *old_len {
                        prev_len = Some(*old_len);
                        *old_len = items.len();
                    }
                }
                // Key/body mismatches are screened out by the public API.
                _ => return false,
            }
        }

        // Detach the displaced occupant, unless a relocation already
        // retagged it to another slot.
        if let Some(Value::Node(prev)) = &old {
            let me = Rc::downgrade(&self.inner);
            let still_mine = matches!(
                &*prev.inner.owner.borrow(),
                Owner::Parent { node, key: k } if Weak::ptr_eq(node, &me) && *k == key
            );
            if still_mine {
                prev.set_owner(Owner::None);
            }
        }

        if !self.muted() {
            self.dispatch(old.unwrap_or_else(Value::null), vec![key]);
            if let Some(prev) = prev_len {
                self.dispatch(Value::from(prev as i64), vec![Key::Length]);
            }
        }
        true
    }

    /// Take ownership of a value being written under `key`. Nodes that are
    /// detached and from this tree are retagged in place; anything else —
    /// owned elsewhere, rooted, or from a foreign tree — is wrapped as a
    /// fresh clone so the original keeps its one owner.
    fn adopt(&self, incoming: Value, key: &Key) -> Value {
        match incoming {
            Value::Scalar(_) => incoming,
            Value::Node(n) => {
                // Adopting self or an ancestor would make the owner chain
                // cyclic and dispatch would never terminate.
                let adoptable = !n.is_owned()
                    && Rc::ptr_eq(&n.inner.modes, &self.inner.modes)
                    && !self.is_self_or_ancestor(&n);
                let node = if adoptable {
                    n
                } else {
                    match wrap_value(&n.to_plain(), &self.inner.modes) {
                        Value::Node(fresh) => fresh,
                        // A node's plain form is always a container.
                        Value::Scalar(_) => n,
                    }
                };
                node.set_owner(Owner::Parent {
                    node: Rc::downgrade(&self.inner),
                    key: key.clone(),
                });
                Value::Node(node)
            }
        }
    }

    pub(crate) fn peek(&self, key: &Key) -> Option<Value> {
        let body = self.inner.body.borrow();
        match (&*body, key) {
            (Body::Record(map), Key::Prop(name)) => map.get(name).cloned(),
            (Body::Seq { items, .. }, Key::Index(i)) => items.get(*i).cloned(),
            (Body::Seq { items, .. }, Key::Length) => {
                Some(Value::from(items.len() as i64))
            }
            _ => None,
        }
    }

    pub(crate) fn set_owner(&self, owner: Owner) {
        *self.inner.owner.borrow_mut() = owner;
    }

    pub(crate) fn is_owned(&self) -> bool {
        !matches!(&*self.inner.owner.borrow(), Owner::None)
    }

    /// Is `candidate` this node, or anywhere on this node's owner chain?
    fn is_self_or_ancestor(&self, candidate: &Node) -> bool {
        if Rc::ptr_eq(&self.inner, &candidate.inner) {
            return true;
        }
        let mut cur = self.inner.owner.borrow().clone();
        while let Owner::Parent { node, .. } = cur {
            let Some(parent) = node.upgrade() else {
                return false;
            };
            if Rc::ptr_eq(&parent, &candidate.inner) {
                return true;
            }
            cur = parent.owner.borrow().clone();
        }
        false
    }

    pub(crate) fn muted(&self) -> bool {
        self.inner.modes.get(Mode::Pause) || self.inner.modes.get(Mode::Silent)
    }

    pub(crate) fn seq_len(&self) -> Result<usize> {
        match &*self.inner.body.borrow() {
            Body::Seq { items, .. } => Ok(items.len()),
            Body::Record(_) => Err(WatchError::NotASequence),
        }
    }

    // -- dispatch -----------------------------------------------------------

    /// Fire watchers for a change at `path[0]`, then bubble to the owner
    /// with this node's key prepended.
    pub(crate) fn dispatch(&self, old: Value, path: Path) {
        let Some(key) = path.first().cloned() else {
            return;
        };
        trace!(path = ?path, "dispatch");
        let (exact, star) = {
            let catalog = self.inner.catalog.borrow();
            (catalog.by_key.get(&key).cloned(), catalog.star.clone())
        };
        if let Some(list) = exact {
            let current = self.peek(&key).unwrap_or_else(Value::null);
            let change = Change {
                value: current,
                old: old.clone(),
                target: Source::Node(self.clone()),
                path: path.clone(),
            };
            let snapshot = list.borrow().clone();
            for handle in snapshot {
                handle.call(&change);
            }
        }
        if !self.inner.modes.get(Mode::HoldStar)
            && let Some(list) = star
        {
            let change = Change {
                value: Value::Node(self.clone()),
                old: old.clone(),
                target: Source::Node(self.clone()),
                path: path.clone(),
            };
            let snapshot = list.borrow().clone();
            for handle in snapshot {
                handle.call(&change);
            }
        }
        let owner = self.inner.owner.borrow().clone();
        if let Owner::Parent { node, key: own_key } = owner
            && let Some(parent) = node.upgrade()
        {
            let mut up = path;
            up.insert(0, own_key);
            Node { inner: parent }.dispatch(old, up);
        }
    }

    /// Fire wildcard watchers only, here and up the owner chain. Used by
    /// batch mutators for their single trailing wildcard notification.
    pub(crate) fn dispatch_star(&self, old: Value, path: Path) {
        let star = self.inner.catalog.borrow().star.clone();
        if let Some(list) = star {
            let change = Change {
                value: Value::Node(self.clone()),
                old: old.clone(),
                target: Source::Node(self.clone()),
                path: path.clone(),
            };
            let snapshot = list.borrow().clone();
            for handle in snapshot {
                handle.call(&change);
            }
        }
        let owner = self.inner.owner.borrow().clone();
        if let Owner::Parent { node, key: own_key } = owner
            && let Some(parent) = node.upgrade()
        {
            let mut up = path;
            up.insert(0, own_key);
            Node { inner: parent }.dispatch_star(old, up);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
