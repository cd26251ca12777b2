#![forbid(unsafe_code)]

//! Cancellable, idempotent subscription tokens.
//!
//! A [`Handle`] binds a callback to an optional container list. Destroying
//! the handle neutralizes the callback, removes the handle from its
//! container, and — when that removal empties the container — fires a
//! one-shot empty callback. Watcher catalogs use the empty callback to tear
//! down their per-key entries when the last watcher goes away.
//!
//! # Invariants
//!
//! 1. `destroy()` is idempotent: the second and later calls are no-ops.
//! 2. The empty callback fires at most once, on the destroy that empties
//!    the container.
//! 3. [`destroy_all`] snapshots the container first, so destructors that
//!    insert new handles don't extend the pass, and destructors that destroy
//!    other handles are skipped silently when those are reached.
//! 4. A destroyed handle still sitting in a snapshot is inert:
//!    [`Handle::call`] returns `None`.
//!
//! The generic parameters cover every subscription shape in the crate:
//! ordinary watchers (`Handle<Change>`), and sequence advice
//! (`Handle<SeqIntent, Advice>`), which has a return value.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::node::Change;

/// Shared, interiorly-mutable list of handles: one watcher-catalog slot.
pub type HandleList<A = Change, R = ()> = Rc<RefCell<Vec<Handle<A, R>>>>;

/// Create an empty [`HandleList`].
#[must_use]
pub fn handle_list<A, R>() -> HandleList<A, R> {
    Rc::new(RefCell::new(Vec::new()))
}

struct HandleInner<A, R> {
    callback: RefCell<Option<Rc<dyn Fn(&A) -> R>>>,
    container: RefCell<Option<Weak<RefCell<Vec<Handle<A, R>>>>>>,
    on_empty: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A cancellable subscription token.
///
/// Cloning a `Handle` yields another token for the **same** subscription;
/// destroying either destroys both.
pub struct Handle<A = Change, R = ()> {
    inner: Rc<HandleInner<A, R>>,
}

impl<A, R> Clone for Handle<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A, R> std::fmt::Debug for Handle<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<A, R> Handle<A, R> {
    /// A free-standing handle with no container.
    pub fn new(callback: impl Fn(&A) -> R + 'static) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                callback: RefCell::new(Some(Rc::new(callback))),
                container: RefCell::new(None),
                on_empty: RefCell::new(None),
            }),
        }
    }

    /// Register `callback` in `container`. `on_empty` fires once if this
    /// handle's destruction empties the container.
    pub fn in_container(
        callback: Rc<dyn Fn(&A) -> R>,
        container: &HandleList<A, R>,
        on_empty: Option<Box<dyn FnOnce()>>,
    ) -> Self {
        let handle = Self {
            inner: Rc::new(HandleInner {
                callback: RefCell::new(Some(callback)),
                container: RefCell::new(Some(Rc::downgrade(container))),
                on_empty: RefCell::new(on_empty),
            }),
        };
        container.borrow_mut().push(handle.clone());
        handle
    }

    /// Invoke the callback, or return `None` if the handle was destroyed.
    pub fn call(&self, arg: &A) -> Option<R> {
        // Clone out of the cell so the callback may destroy this very handle.
        let callback = self.inner.callback.borrow().clone();
        callback.map(|cb| cb(arg))
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.callback.borrow().is_none()
    }

    /// Cancel the subscription. Idempotent.
    pub fn destroy(&self) {
        if self.inner.callback.borrow_mut().take().is_none() {
            return;
        }
        let container = self.inner.container.borrow_mut().take();
        if let Some(weak) = container
            && let Some(list) = weak.upgrade()
        {
            let emptied = {
                let mut list = list.borrow_mut();
                list.retain(|h| !Rc::ptr_eq(&h.inner, &self.inner));
                list.is_empty()
            };
            if emptied && let Some(f) = self.inner.on_empty.borrow_mut().take() {
                f();
            }
        }
    }
}

/// Destroy every handle currently in `list`.
///
/// The list is snapshotted first: handles inserted by destructors are not
/// visited this pass, and handles already destroyed by other destructors are
/// skipped silently.
pub fn destroy_all<A, R>(list: &HandleList<A, R>) {
    let snapshot: Vec<Handle<A, R>> = list.borrow().clone();
    for handle in snapshot {
        handle.destroy();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_handle(list: &HandleList<u32, ()>, hits: &Rc<Cell<u32>>) -> Handle<u32, ()> {
        let hits = Rc::clone(hits);
        Handle::in_container(
            Rc::new(move |n: &u32| hits.set(hits.get() + n)),
            list,
            None,
        )
    }

    #[test]
    fn call_then_destroy_then_call() {
        let hits = Rc::new(Cell::new(0));
        let list: HandleList<u32, ()> = handle_list();
        let h = counting_handle(&list, &hits);

        assert!(h.call(&2).is_some());
        assert_eq!(hits.get(), 2);

        h.destroy();
        assert!(h.is_destroyed());
        assert!(h.call(&2).is_none());
        assert_eq!(hits.get(), 2);
        assert!(list.borrow().is_empty());
    }

    #[test]
    fn destroy_is_idempotent() {
        let empties = Rc::new(Cell::new(0));
        let list: HandleList<u32, ()> = handle_list();
        let e = Rc::clone(&empties);
        let h = Handle::in_container(
            Rc::new(|_: &u32| {}),
            &list,
            Some(Box::new(move || e.set(e.get() + 1))),
        );

        h.destroy();
        h.destroy();
        h.destroy();
        assert_eq!(empties.get(), 1, "on_empty fires exactly once");
    }

    #[test]
    fn on_empty_fires_only_when_container_empties() {
        let empties = Rc::new(Cell::new(0));
        let list: HandleList<u32, ()> = handle_list();

        let make = |tag: u32| {
            let e = Rc::clone(&empties);
            let _ = tag;
            Handle::in_container(
                Rc::new(|_: &u32| {}),
                &list,
                Some(Box::new(move || e.set(e.get() + 1))),
            )
        };
        let a = make(1);
        let b = make(2);

        a.destroy();
        assert_eq!(empties.get(), 0, "container not yet empty");
        b.destroy();
        assert_eq!(empties.get(), 1);
    }

    #[test]
    fn destroy_all_snapshots_first() {
        let list: HandleList<u32, ()> = handle_list();
        let destroyed = Rc::new(Cell::new(0));

        // Destructor side effects are modeled by the drop order here: a
        // handle whose callback destroys its sibling must not break the pass.
        let a = counting_handle(&list, &Rc::new(Cell::new(0)));
        let b = counting_handle(&list, &Rc::new(Cell::new(0)));
        let c = counting_handle(&list, &Rc::new(Cell::new(0)));

        // Pre-destroy b: destroy_all must skip it silently.
        b.destroy();
        destroy_all(&list);
        let _ = destroyed;

        assert!(a.is_destroyed());
        assert!(c.is_destroyed());
        assert!(list.borrow().is_empty());
    }

    #[test]
    fn destroy_all_does_not_visit_handles_inserted_mid_pass() {
        let list: HandleList<u32, ()> = handle_list();
        let list_for_empty = Rc::clone(&list);
        let inserted: Rc<RefCell<Option<Handle<u32, ()>>>> = Rc::new(RefCell::new(None));
        let inserted_slot = Rc::clone(&inserted);

        // Emptying the container inserts a fresh handle. destroy_all works
        // from a snapshot, so the fresh handle must survive the pass.
        let h = Handle::in_container(
            Rc::new(|_: &u32| {}),
            &list,
            Some(Box::new(move || {
                let fresh = Handle::in_container(Rc::new(|_: &u32| {}), &list_for_empty, None);
                *inserted_slot.borrow_mut() = Some(fresh);
            })),
        );
        let _ = h;

        destroy_all(&list);

        let fresh = inserted.borrow().clone();
        let fresh = fresh.expect("on_empty ran");
        assert!(!fresh.is_destroyed(), "mid-pass insert is not visited");
        assert_eq!(list.borrow().len(), 1);
    }

    #[test]
    fn clone_shares_destruction() {
        let list: HandleList<u32, ()> = handle_list();
        let h = Handle::in_container(Rc::new(|_: &u32| {}), &list, None);
        let h2 = h.clone();
        h2.destroy();
        assert!(h.is_destroyed());
    }

    #[test]
    fn callback_may_destroy_own_handle() {
        let list: HandleList<u32, ()> = handle_list();
        let slot: Rc<RefCell<Option<Handle<u32, ()>>>> = Rc::new(RefCell::new(None));
        let slot_cb = Rc::clone(&slot);
        let h = Handle::in_container(
            Rc::new(move |_: &u32| {
                if let Some(h) = slot_cb.borrow().as_ref() {
                    h.destroy();
                }
            }),
            &list,
            None,
        );
        *slot.borrow_mut() = Some(h.clone());

        assert!(h.call(&1).is_some());
        assert!(h.is_destroyed());
        assert!(h.call(&1).is_none());
    }
}
