#![forbid(unsafe_code)]

//! A standalone watchable property bag with a split mutate/notify cycle.
//!
//! [`WatchHub`] offers node-style watching to objects that are not part of a
//! graph. Unlike [`Node`](crate::Node) writes, which notify immediately, hub
//! mutation and notification are separate steps: [`WatchHub::mutate`] applies
//! a change and reports what happened, and the caller decides when (and
//! whether) to [`WatchHub::notify`]. [`WatchHub::mutate_notify`] fuses the
//! two for the common case.
//!
//! Mutation hooks run inside the mutate step: a before-hook may veto the
//! change, an after-hook observes it once applied. Watchers only ever run
//! from the notify step.
//!
//! The hub also acts as a subscription owner: handles parked with
//! [`WatchHub::own`] are destroyed together with the hub's own watchers by
//! [`WatchHub::destroy_all_watches`], which is the teardown entry point.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::trace;

use crate::equality;
use crate::handle::{Handle, HandleList, destroy_all, handle_list};
use crate::node::{Change, Source};
use crate::value::{Key, Value};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A mutation that was actually applied, ready to be delivered to watchers.
#[derive(Clone, Debug)]
pub struct Applied {
    pub name: String,
    pub value: Value,
    pub old: Value,
}

/// What [`WatchHub::mutate`] did.
#[derive(Clone, Debug)]
pub enum MutateOutcome {
    /// The incoming value was equal under registered equality; nothing to do.
    Unchanged,
    /// A before-hook rejected the change.
    Vetoed,
    Applied(Applied),
}

impl MutateOutcome {
    #[must_use]
    pub fn applied(&self) -> Option<&Applied> {
        match self {
            Self::Applied(a) => Some(a),
            Self::Unchanged | Self::Vetoed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

type BeforeHook = Rc<dyn Fn(&str, &Value, &Value) -> bool>;
type AfterHook = Rc<dyn Fn(&str, &Value, &Value)>;

#[derive(Default)]
struct HubCatalog {
    by_name: AHashMap<String, HandleList>,
    star: Option<HandleList>,
}

struct HubInner {
    slots: RefCell<AHashMap<String, Value>>,
    catalog: RefCell<HubCatalog>,
    before: RefCell<AHashMap<String, BeforeHook>>,
    after: RefCell<AHashMap<String, AfterHook>>,
    owned: HandleList,
}

/// A watchable property bag. Cloning yields another handle to the same hub.
pub struct WatchHub {
    inner: Rc<HubInner>,
}

impl Clone for WatchHub {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.inner.catalog.borrow();
        f.debug_struct("WatchHub")
            .field("slots", &self.inner.slots.borrow().len())
            .field("watched_names", &catalog.by_name.len())
            .field("has_star", &catalog.star.is_some())
            .finish()
    }
}

impl WatchHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HubInner {
                slots: RefCell::new(AHashMap::new()),
                catalog: RefCell::new(HubCatalog::default()),
                before: RefCell::new(AHashMap::new()),
                after: RefCell::new(AHashMap::new()),
                owned: handle_list(),
            }),
        }
    }

    /// Identity comparison: do both handles refer to the same hub?
    #[must_use]
    pub fn ptr_eq(a: &WatchHub, b: &WatchHub) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Read one slot. Absent slots read as `None`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.slots.borrow().get(name).cloned()
    }

    // -- mutate -------------------------------------------------------------

    /// Apply one change without notifying. Equal values are no-ops, and a
    /// before-hook for the name may veto. The returned [`Applied`] is what a
    /// later [`WatchHub::notify`] should deliver.
    pub fn mutate(&self, name: impl Into<String>, value: impl Into<Value>) -> MutateOutcome {
        let name = name.into();
        let value = value.into();
        let old = self
            .inner
            .slots
            .borrow()
            .get(&name)
            .cloned()
            .unwrap_or_else(Value::null);
        if equality::eql(&old, &value) {
            return MutateOutcome::Unchanged;
        }
        let before = self.inner.before.borrow().get(&name).cloned();
        if let Some(hook) = before
            && !hook(&name, &value, &old)
        {
            trace!(name, "hub mutation vetoed");
            return MutateOutcome::Vetoed;
        }
        self.inner
            .slots
            .borrow_mut()
            .insert(name.clone(), value.clone());
        let after = self.inner.after.borrow().get(&name).cloned();
        if let Some(hook) = after {
            hook(&name, &value, &old);
        }
        MutateOutcome::Applied(Applied { name, value, old })
    }

    /// Apply a batch of changes, collecting the ones actually applied.
    pub fn mutate_many(
        &self,
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Vec<Applied> {
        entries
            .into_iter()
            .filter_map(|(name, value)| match self.mutate(name, value) {
                MutateOutcome::Applied(a) => Some(a),
                MutateOutcome::Unchanged | MutateOutcome::Vetoed => None,
            })
            .collect()
    }

    // -- notify -------------------------------------------------------------

    /// Deliver one applied change: exact watchers for the name, then
    /// wildcard watchers.
    pub fn notify(&self, applied: &Applied) {
        self.notify_exact(applied);
        self.notify_star(applied);
    }

    /// Deliver a batch: exact watchers per change, then — when anything was
    /// applied — a single wildcard notification carrying the first change.
    pub fn notify_many(&self, applied: &[Applied]) {
        for a in applied {
            self.notify_exact(a);
        }
        if let Some(first) = applied.first() {
            self.notify_star(first);
        }
    }

    /// [`WatchHub::mutate`] followed by [`WatchHub::notify`] when applied.
    pub fn mutate_notify(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> MutateOutcome {
        let outcome = self.mutate(name, value);
        if let MutateOutcome::Applied(a) = &outcome {
            self.notify(a);
        }
        outcome
    }

    /// [`WatchHub::mutate_many`] followed by [`WatchHub::notify_many`].
    pub fn mutate_notify_many(
        &self,
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Vec<Applied> {
        let applied = self.mutate_many(entries);
        self.notify_many(&applied);
        applied
    }

    fn notify_exact(&self, applied: &Applied) {
        let list = self
            .inner
            .catalog
            .borrow()
            .by_name
            .get(&applied.name)
            .cloned();
        let Some(list) = list else { return };
        let change = self.change_for(applied);
        let snapshot = list.borrow().clone();
        for handle in snapshot {
            handle.call(&change);
        }
    }

    fn notify_star(&self, applied: &Applied) {
        let star = self.inner.catalog.borrow().star.clone();
        let Some(list) = star else { return };
        let change = self.change_for(applied);
        let snapshot = list.borrow().clone();
        for handle in snapshot {
            handle.call(&change);
        }
    }

    fn change_for(&self, applied: &Applied) -> Change {
        Change {
            value: applied.value.clone(),
            old: applied.old.clone(),
            target: Source::Hub(self.clone()),
            path: vec![Key::Prop(applied.name.clone())],
        }
    }

    // -- hooks --------------------------------------------------------------

    /// Install the before-hook for one name (replacing any previous one).
    /// The hook receives `(name, incoming, old)` and returns whether the
    /// mutation may proceed.
    pub fn before_mutate(
        &self,
        name: impl Into<String>,
        hook: impl Fn(&str, &Value, &Value) -> bool + 'static,
    ) {
        self.inner
            .before
            .borrow_mut()
            .insert(name.into(), Rc::new(hook));
    }

    /// Install the after-hook for one name (replacing any previous one).
    /// The hook receives `(name, value, old)` once the slot is written.
    pub fn after_mutate(
        &self,
        name: impl Into<String>,
        hook: impl Fn(&str, &Value, &Value) + 'static,
    ) {
        self.inner
            .after
            .borrow_mut()
            .insert(name.into(), Rc::new(hook));
    }

    // -- watch --------------------------------------------------------------

    /// Watch one name.
    pub fn watch(&self, name: impl Into<String>, watcher: impl Fn(&Change) + 'static) -> Handle {
        self.watch_rc(name.into(), Rc::new(watcher))
    }

    /// Watch several names with one shared watcher.
    pub fn watch_names(
        &self,
        names: &[&str],
        watcher: impl Fn(&Change) + 'static,
    ) -> Vec<Handle> {
        let shared: Rc<dyn Fn(&Change)> = Rc::new(watcher);
        names
            .iter()
            .map(|n| self.watch_rc((*n).to_string(), Rc::clone(&shared)))
            .collect()
    }

    /// Install a batch of name → watcher subscriptions.
    pub fn watch_map(
        &self,
        entries: impl IntoIterator<Item = (String, Box<dyn Fn(&Change)>)>,
    ) -> Vec<Handle> {
        entries
            .into_iter()
            .map(|(n, w)| self.watch_rc(n, Rc::from(w)))
            .collect()
    }

    /// Watch every notified change on this hub.
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

    fn watch_rc(&self, name: String, watcher: Rc<dyn Fn(&Change)>) -> Handle {
        let list = {
            let mut catalog = self.inner.catalog.borrow_mut();
            catalog
                .by_name
                .entry(name.clone())
                .or_insert_with(handle_list)
                .clone()
        };
        let weak = Rc::downgrade(&self.inner);
        Handle::in_container(
            watcher,
            &list,
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.catalog.borrow_mut().by_name.remove(&name);
                }
            })),
        )
    }

    // -- ownership / teardown -----------------------------------------------

    /// Park a foreign subscription with this hub so teardown destroys it.
    pub fn own(&self, handle: Handle) {
        self.inner.owned.borrow_mut().push(handle);
    }

    /// Destroy every watcher for one name.
    pub fn destroy_watch(&self, name: &str) {
        let list = self.inner.catalog.borrow().by_name.get(name).cloned();
        if let Some(list) = list {
            destroy_all(&list);
        }
    }

    /// Teardown: destroy every watcher, wildcard watchers, and every owned
    /// subscription.
    pub fn destroy_all_watches(&self) {
        let (lists, star) = {
            let catalog = self.inner.catalog.borrow();
            (
                catalog.by_name.values().cloned().collect::<Vec<_>>(),
                catalog.star.clone(),
            )
        };
        for list in lists {
            destroy_all(&list);
        }
        if let Some(star) = star {
            destroy_all(&star);
        }
        destroy_all(&self.inner.owned);
        self.inner.owned.borrow_mut().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn mutate_is_silent_until_notify() {
        let hub = WatchHub::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _w = hub.watch("mode", move |_| h.set(h.get() + 1));

        let outcome = hub.mutate("mode", "dark");
        assert_eq!(hits.get(), 0, "mutate does not notify");
        assert_eq!(hub.get("mode"), Some(Value::from("dark")));

        let applied = outcome.applied().cloned().unwrap();
        hub.notify(&applied);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn equal_mutation_is_unchanged() {
        let hub = WatchHub::new();
        hub.mutate_notify("n", 1);
        assert!(matches!(hub.mutate("n", 1), MutateOutcome::Unchanged));
    }

    #[test]
    fn before_hook_vetoes() {
        let hub = WatchHub::new();
        hub.mutate_notify("n", 1);
        hub.before_mutate("n", |_, value, _| value != &Value::from(13));

        assert!(matches!(hub.mutate("n", 13), MutateOutcome::Vetoed));
        assert_eq!(hub.get("n"), Some(Value::from(1)));
        assert!(matches!(hub.mutate("n", 2), MutateOutcome::Applied(_)));
    }

    #[test]
    fn after_hook_sees_applied_value() {
        let hub = WatchHub::new();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        hub.after_mutate("n", move |name, value, old| {
            *s.borrow_mut() = Some((name.to_string(), value.clone(), old.clone()));
        });
        hub.mutate("n", 5);
        assert_eq!(
            seen.borrow().clone(),
            Some(("n".to_string(), Value::from(5), Value::null()))
        );
    }

    #[test]
    fn notify_delivers_change_shape() {
        let hub = WatchHub::new();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let _w = hub.watch("n", move |c: &Change| {
            *s.borrow_mut() = Some((c.value.clone(), c.old.clone(), c.path.clone()));
        });
        let hub2 = hub.clone();
        let probe = Rc::new(RefCell::new(false));
        let p = Rc::clone(&probe);
        let _w2 = hub.watch("n", move |c: &Change| {
            if let Some(h) = c.target.as_hub() {
                *p.borrow_mut() = WatchHub::ptr_eq(h, &hub2);
            }
        });

        hub.mutate_notify("n", 2);
        assert_eq!(
            seen.borrow().clone(),
            Some((Value::from(2), Value::null(), vec![Key::Prop("n".into())]))
        );
        assert!(*probe.borrow(), "target is the hub itself");
    }

    #[test]
    fn batch_notify_fires_star_once() {
        let hub = WatchHub::new();
        let exact = Rc::new(Cell::new(0));
        let star = Rc::new(Cell::new(0));
        let e = Rc::clone(&exact);
        let _w1 = hub.watch("a", move |_| e.set(e.get() + 1));
        let s = Rc::clone(&star);
        let _w2 = hub.watch_any(move |_| s.set(s.get() + 1));

        let applied = hub.mutate_notify_many([
            ("a".to_string(), Value::from(1)),
            ("b".to_string(), Value::from(2)),
            ("b".to_string(), Value::from(2)), // duplicate, unchanged
        ]);
        assert_eq!(applied.len(), 2);
        assert_eq!(exact.get(), 1);
        assert_eq!(star.get(), 1, "one wildcard per batch");

        assert!(hub.mutate_notify_many([]).is_empty());
        assert_eq!(star.get(), 1, "empty batch stays silent");
    }

    #[test]
    fn watch_names_shares_one_watcher() {
        let hub = WatchHub::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _ws = hub.watch_names(&["a", "b"], move |_| h.set(h.get() + 1));
        hub.mutate_notify("a", 1);
        hub.mutate_notify("b", 2);
        hub.mutate_notify("c", 3);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn destroy_watch_and_teardown() {
        let hub = WatchHub::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _w1 = hub.watch("a", move |_| h.set(h.get() + 1));
        let h = Rc::clone(&hits);
        let _w2 = hub.watch_any(move |_| h.set(h.get() + 1));
        let parked = Handle::new(|_: &Change| {});
        hub.own(parked.clone());

        hub.destroy_watch("a");
        hub.mutate_notify("a", 1);
        assert_eq!(hits.get(), 1, "only the wildcard remains");

        hub.destroy_all_watches();
        hub.mutate_notify("a", 2);
        assert_eq!(hits.get(), 1);
        assert!(parked.is_destroyed());
    }
}
