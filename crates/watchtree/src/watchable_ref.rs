#![forbid(unsafe_code)]

//! A stable, formattable view over one watchable location.
//!
//! A [`WatchableRef`] names a location — a node slot, a whole node, or a hub
//! name — rather than the value currently there. Watching the ref survives
//! the value being replaced: when a hub slot is swapped from one node to
//! another, the ref silently re-wires its nested subscription to the new
//! occupant and keeps delivering.
//!
//! An optional formatter shapes what watchers see (`value` and `old` both
//! pass through it) without touching the underlying data.
//!
//! Upstream subscriptions are lazy: nothing is attached to the source until
//! the ref has at least one watcher, and everything is torn down when the
//! last watcher is destroyed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::equality;
use crate::error::{Result, WatchError};
use crate::handle::{Handle, HandleList, destroy_all, handle_list};
use crate::hub::WatchHub;
use crate::node::{Change, Node, Source};
use crate::value::{Key, Value};

type Formatter = Rc<dyn Fn(&Value) -> Value>;

struct RefInner {
    source: Source,
    /// `None` means the whole node (wildcard view).
    key: Option<Key>,
    formatter: RefCell<Option<Formatter>>,
    watchers: HandleList,
    upstream: RefCell<Vec<Handle>>,
    /// Subscription inside the current occupant, for hub slots holding a
    /// node. Re-wired whenever the occupant is replaced.
    nested: RefCell<Option<Handle>>,
    last: RefCell<Option<Value>>,
}

/// A watchable view over one location. Cloning yields another handle to the
/// same view.
pub struct WatchableRef {
    inner: Rc<RefInner>,
}

impl Clone for WatchableRef {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for WatchableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchableRef")
            .field("key", &self.inner.key)
            .field("watchers", &self.inner.watchers.borrow().len())
            .finish()
    }
}

/// A ref over one slot of a node.
#[must_use]
pub fn get_watchable_ref(node: &Node, key: impl Into<Key>) -> WatchableRef {
    WatchableRef::of_node(node, key)
}

impl WatchableRef {
    fn build(source: Source, key: Option<Key>) -> Self {
        Self {
            inner: Rc::new(RefInner {
                source,
                key,
                formatter: RefCell::new(None),
                watchers: handle_list(),
                upstream: RefCell::new(Vec::new()),
                nested: RefCell::new(None),
                last: RefCell::new(None),
            }),
        }
    }

    /// A ref over one slot of a node.
    #[must_use]
    pub fn of_node(node: &Node, key: impl Into<Key>) -> Self {
        Self::build(Source::Node(node.clone()), Some(key.into()))
    }

    /// A ref over a whole node: fires on any change in or beneath it.
    #[must_use]
    pub fn of_node_wildcard(node: &Node) -> Self {
        Self::build(Source::Node(node.clone()), None)
    }

    /// A ref over one hub name.
    #[must_use]
    pub fn of_hub(hub: &WatchHub, name: impl Into<String>) -> Self {
        Self::build(Source::Hub(hub.clone()), Some(Key::Prop(name.into())))
    }

    /// A ref over whatever watchable thing `value` holds. Scalars have no
    /// watchable location, so they are rejected.
    pub fn over(value: &Value, key: Option<Key>) -> Result<Self> {
        match value {
            Value::Node(n) => Ok(match key {
                Some(k) => Self::of_node(n, k),
                None => Self::of_node_wildcard(n),
            }),
            Value::Scalar(_) => Err(WatchError::CannotWatch),
        }
    }

    /// Attach a formatter shaping every value watchers see.
    #[must_use]
    pub fn with_formatter(self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        *self.inner.formatter.borrow_mut() = Some(Rc::new(f));
        self
    }

    /// The location's current (formatted) value.
    #[must_use]
    pub fn value(&self) -> Value {
        let raw = Self::raw_value(&self.inner);
        Self::format(&self.inner, &raw)
    }

    /// Watch the location. The first watcher lazily attaches the upstream
    /// subscription; destroying the last one tears everything down.
    pub fn watch(&self, watcher: impl Fn(&Change) + 'static) -> Handle {
        Self::ensure_upstream(&self.inner);
        let weak = Rc::downgrade(&self.inner);
        Handle::in_container(
            Rc::new(watcher),
            &self.inner.watchers,
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let upstream: Vec<Handle> = inner.upstream.borrow_mut().drain(..).collect();
                    for h in upstream {
                        h.destroy();
                    }
                    if let Some(n) = inner.nested.borrow_mut().take() {
                        n.destroy();
                    }
                    *inner.last.borrow_mut() = None;
                }
            })),
        )
    }

    /// Destroy every watcher on this ref (upstream teardown follows).
    pub fn destroy(&self) {
        destroy_all(&self.inner.watchers);
    }

    // -- internals ----------------------------------------------------------

    fn raw_value(inner: &Rc<RefInner>) -> Value {
        match (&inner.source, &inner.key) {
            (Source::Node(n), Some(k)) => n.get(k.clone()).unwrap_or_else(Value::null),
            (Source::Node(n), None) => Value::Node(n.clone()),
            (Source::Hub(h), Some(Key::Prop(name))) => {
                h.get(name).unwrap_or_else(Value::null)
            }
            _ => Value::null(),
        }
    }

    fn format(inner: &Rc<RefInner>, raw: &Value) -> Value {
        let formatter = inner.formatter.borrow().clone();
        match formatter {
            Some(f) => f(raw),
            None => raw.clone(),
        }
    }

    fn ensure_upstream(inner: &Rc<RefInner>) {
        if !inner.upstream.borrow().is_empty() {
            return;
        }
        match (&inner.source, &inner.key) {
            (Source::Node(n), Some(k)) => {
                let weak = Rc::downgrade(inner);
                let h = n.watch(k.clone(), move |c| {
                    if let Some(inner) = weak.upgrade() {
                        // A bubbled descendant change leaves the slot's
                        // occupant identical; it must still be relayed.
                        let unconditional = c.path.len() > 1;
                        Self::deliver(&inner, c, unconditional);
                    }
                });
                inner.upstream.borrow_mut().push(h);
            }
            (Source::Node(n), None) => {
                let weak = Rc::downgrade(inner);
                let h = n.watch_any(move |c| {
                    if let Some(inner) = weak.upgrade() {
                        Self::deliver(&inner, c, true);
                    }
                });
                inner.upstream.borrow_mut().push(h);
            }
            (Source::Hub(hub), Some(Key::Prop(name))) => {
                let weak = Rc::downgrade(inner);
                let h = hub.watch(name.clone(), move |c| {
                    if let Some(inner) = weak.upgrade() {
                        Self::rewire_nested(&inner);
                        Self::deliver(&inner, c, false);
                    }
                });
                inner.upstream.borrow_mut().push(h);
                // The slot may already hold a node.
                Self::rewire_nested(inner);
            }
            _ => {}
        }
    }

    fn rewire_nested(inner: &Rc<RefInner>) {
        let fresh = match Self::raw_value(inner) {
            Value::Node(n) => {
                let weak = Rc::downgrade(inner);
                Some(n.watch_any(move |c| {
                    if let Some(inner) = weak.upgrade() {
                        Self::deliver(&inner, c, true);
                    }
                }))
            }
            Value::Scalar(_) => None,
        };
        let prev = inner.nested.borrow_mut().take();
        if let Some(prev) = prev {
            prev.destroy();
        }
        *inner.nested.borrow_mut() = fresh;
    }

    fn deliver(inner: &Rc<RefInner>, change: &Change, unconditional: bool) {
        let raw = Self::raw_value(inner);
        if !unconditional {
            let last = inner.last.borrow().clone();
            if let Some(last) = last
                && equality::eql(&last, &raw)
            {
                return;
            }
        }
        *inner.last.borrow_mut() = Some(raw.clone());
        let out = Change {
            value: Self::format(inner, &raw),
            old: Self::format(inner, &change.old),
            target: inner.source.clone(),
            path: change.path.clone(),
        };
        let snapshot = inner.watchers.borrow().clone();
        for handle in snapshot {
            handle.call(&out);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::to_watchable;
    use crate::plain;
    use std::cell::Cell;

    #[test]
    fn slot_ref_delivers_changes() {
        let root = to_watchable(plain!({ "x": 1 })).unwrap();
        let r = get_watchable_ref(&root, "x");
        assert_eq!(r.value(), Value::from(1));

        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let _w = r.watch(move |c| {
            *s.borrow_mut() = Some((c.value.clone(), c.old.clone()));
        });
        root.set("x", 2).unwrap();
        assert_eq!(seen.borrow().clone(), Some((Value::from(2), Value::from(1))));
        assert_eq!(r.value(), Value::from(2));
    }

    #[test]
    fn formatter_shapes_value_and_old() {
        let root = to_watchable(plain!({ "x": 2 })).unwrap();
        let r = get_watchable_ref(&root, "x").with_formatter(|v| match v.as_scalar() {
            Some(crate::Scalar::Int(n)) => Value::from(n * 10),
            _ => v.clone(),
        });
        assert_eq!(r.value(), Value::from(20));

        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let _w = r.watch(move |c| {
            *s.borrow_mut() = Some((c.value.clone(), c.old.clone()));
        });
        root.set("x", 3).unwrap();
        assert_eq!(
            seen.borrow().clone(),
            Some((Value::from(30), Value::from(20)))
        );
    }

    #[test]
    fn slot_ref_relays_descendant_changes() {
        let root = to_watchable(plain!({ "sub": { "n": 1 } })).unwrap();
        let r = get_watchable_ref(&root, "sub");
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _w = r.watch(move |c| {
            assert_eq!(c.path.len(), 2, "bubbled path reaches the ref");
            h.set(h.get() + 1);
        });
        root.get_node("sub").unwrap().set("n", 2).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn wildcard_ref_covers_whole_node() {
        let root = to_watchable(plain!({ "a": 1, "b": 2 })).unwrap();
        let r = WatchableRef::of_node_wildcard(&root);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _w = r.watch(move |c| {
            assert!(c.target.as_node().is_some());
            h.set(h.get() + 1);
        });
        root.set("a", 9).unwrap();
        root.set("b", 9).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn hub_ref_rewires_to_replacement_node() {
        let hub = WatchHub::new();
        let first = to_watchable(plain!({ "n": 1 })).unwrap();
        hub.mutate_notify("doc", Value::Node(first.clone()));

        let r = WatchableRef::of_hub(&hub, "doc");
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _w = r.watch(move |_| h.set(h.get() + 1));

        // Changes inside the current occupant are relayed.
        first.set("n", 2).unwrap();
        assert_eq!(hits.get(), 1);

        // Replace the occupant; the ref follows.
        let second = to_watchable(plain!({ "n": 10 })).unwrap();
        hub.mutate_notify("doc", Value::Node(second.clone()));
        assert_eq!(hits.get(), 2);
        second.set("n", 11).unwrap();
        assert_eq!(hits.get(), 3);

        // The old occupant is no longer relayed.
        first.set("n", 3).unwrap();
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn upstream_is_lazy_and_torn_down() {
        let root = to_watchable(plain!({ "x": 1 })).unwrap();
        let r = get_watchable_ref(&root, "x");
        assert!(
            root.inner.catalog.borrow().by_key.is_empty(),
            "nothing attached before the first watcher"
        );

        let w = r.watch(|_| {});
        assert_eq!(root.inner.catalog.borrow().by_key.len(), 1);

        w.destroy();
        assert!(
            root.inner.catalog.borrow().by_key.is_empty(),
            "last watcher tears the upstream down"
        );

        // Watching again re-attaches.
        let _w2 = r.watch(|_| {});
        assert_eq!(root.inner.catalog.borrow().by_key.len(), 1);
    }

    #[test]
    fn over_rejects_scalars() {
        assert!(matches!(
            WatchableRef::over(&Value::from(1), None),
            Err(WatchError::CannotWatch)
        ));
        let root = to_watchable(plain!({})).unwrap();
        assert!(WatchableRef::over(&Value::Node(root), None).is_ok());
    }
}
