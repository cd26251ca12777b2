#![forbid(unsafe_code)]

//! Batch sequence mutators and the advice hook that guards them.
//!
//! Element-at-a-time writes would make a structural edit like `reverse` look
//! like N unrelated changes, each with its own wildcard storm. The mutators
//! here instead perform the whole rearrangement with wildcard notification
//! held, emit per-index exact changes only for slots whose occupant actually
//! changed, and finish with a single trailing wildcard notification (whose
//! `old` is `Null`; the previous arrangement is not tracked as a whole).
//!
//! Moved elements keep their identity: a child node relocated by a splice or
//! a reorder is retagged to its new index, never unwrapped and re-wrapped,
//! so outstanding references to it stay live.
//!
//! # Advice
//!
//! [`Node::before`] registers an advisor for one mutator. Advisors run
//! before the mutation, observe the intent, and answer with [`Advice`]:
//! proceed, proceed with a finalizer to run after the mutation, veto (the
//! mutation silently does nothing), or fail with an error. Finalizers
//! receive the [`SeqOutcome`] once the mutation has fully settled.
//!
//! # Invariants
//!
//! 1. One batch mutation emits at most one wildcard notification per node on
//!    the bubble path, and none when nothing changed.
//! 2. A failed or vetoed mutation leaves the sequence exactly as it was.
//! 3. `reorder` is transactional: if the caller's procedure fails, the
//!    previous arrangement is restored and the caller's error is returned.

use std::cmp::Ordering;
use std::rc::Rc;

use ahash::AHashMap;

use crate::equality;
use crate::error::{Result, WatchError};
use crate::handle::{Handle, HandleList, handle_list};
use crate::modes::Mode;
use crate::node::{Body, Node, Owner, wrap_value};
use crate::value::{Key, Plain, Value};

// ---------------------------------------------------------------------------
// Advice types
// ---------------------------------------------------------------------------

/// The batch mutators an advisor can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeqMethod {
    Splice,
    Pop,
    Shift,
    Unshift,
    Reverse,
    Sort,
}

/// What a mutation is about to do, as shown to advisors.
#[derive(Clone, Debug)]
pub enum SeqIntent {
    Splice {
        start: usize,
        delete_count: usize,
        insert: Vec<Plain>,
    },
    Pop,
    Shift,
    Unshift {
        insert: Vec<Plain>,
    },
    Reverse,
    Sort,
}

/// Runs after a mutation the advisor allowed, with the settled outcome.
pub type Finalizer = Box<dyn FnOnce(&SeqOutcome)>;

/// An advisor's answer.
pub enum Advice {
    /// Let the mutation run.
    Proceed,
    /// Let the mutation run, then call the finalizer.
    ProceedThen(Finalizer),
    /// Silently skip the mutation.
    Veto,
    /// Abort the mutation with an error.
    Fail(WatchError),
}

/// What a batch mutation did, as shown to finalizers.
#[derive(Debug)]
pub enum SeqOutcome {
    Spliced { removed: Vec<Plain> },
    Removed(Option<Plain>),
    Unshifted { new_len: usize },
    Reordered,
}

pub(crate) type AdviceTable = AHashMap<SeqMethod, HandleList<SeqIntent, Advice>>;

// ---------------------------------------------------------------------------
// Mutators
// ---------------------------------------------------------------------------

impl Node {
    /// Register an advisor for one batch mutator. Advisors run in
    /// registration order; the first veto or failure wins.
    pub fn before(
        &self,
        method: SeqMethod,
        advisor: impl Fn(&SeqIntent) -> Advice + 'static,
    ) -> Result<Handle<SeqIntent, Advice>> {
        let _ = self.seq_len()?;
        let list = {
            let mut advice = self.inner.advice.borrow_mut();
            advice.entry(method).or_insert_with(handle_list).clone()
        };
        let weak = Rc::downgrade(&self.inner);
        Ok(Handle::in_container(
            Rc::new(advisor),
            &list,
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.advice.borrow_mut().remove(&method);
                }
            })),
        ))
    }

    /// Remove `delete_count` elements at `start` and insert `insert` there.
    /// Out-of-range arguments are clamped. Returns the removed elements as
    /// plain values (empty when vetoed).
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: Vec<Plain>,
    ) -> Result<Vec<Plain>> {
        let _ = self.seq_len()?;
        let intent = SeqIntent::Splice {
            start,
            delete_count,
            insert: insert.clone(),
        };
        let Some(finalizers) = self.run_advice(SeqMethod::Splice, &intent)? else {
            return Ok(Vec::new());
        };
        let removed = self.splice_impl(start, delete_count, insert)?;
        let outcome = SeqOutcome::Spliced {
            removed: removed.clone(),
        };
        for f in finalizers {
            f(&outcome);
        }
        Ok(removed)
    }

    /// Remove and return the last element. `None` when the sequence is empty
    /// or the mutation was vetoed.
    pub fn pop(&self) -> Result<Option<Plain>> {
        let len = self.seq_len()?;
        if len == 0 {
            return Ok(None);
        }
        let Some(finalizers) = self.run_advice(SeqMethod::Pop, &SeqIntent::Pop)? else {
            return Ok(None);
        };
        let mut removed = self.splice_impl(len - 1, 1, Vec::new())?;
        let out = removed.pop();
        let outcome = SeqOutcome::Removed(out.clone());
        for f in finalizers {
            f(&outcome);
        }
        Ok(out)
    }

    /// Remove and return the first element. `None` when the sequence is
    /// empty or the mutation was vetoed.
    pub fn shift(&self) -> Result<Option<Plain>> {
        let len = self.seq_len()?;
        if len == 0 {
            return Ok(None);
        }
        let Some(finalizers) = self.run_advice(SeqMethod::Shift, &SeqIntent::Shift)? else {
            return Ok(None);
        };
        let mut removed = self.splice_impl(0, 1, Vec::new())?;
        let out = removed.pop();
        let outcome = SeqOutcome::Removed(out.clone());
        for f in finalizers {
            f(&outcome);
        }
        Ok(out)
    }

    /// Insert elements at the front. Returns the new length (unchanged when
    /// vetoed).
    pub fn unshift(&self, insert: Vec<Plain>) -> Result<usize> {
        let len = self.seq_len()?;
        let intent = SeqIntent::Unshift {
            insert: insert.clone(),
        };
        let Some(finalizers) = self.run_advice(SeqMethod::Unshift, &intent)? else {
            return Ok(len);
        };
        let count = insert.len();
        self.splice_impl(0, 0, insert)?;
        let new_len = len + count;
        let outcome = SeqOutcome::Unshifted { new_len };
        for f in finalizers {
            f(&outcome);
        }
        Ok(new_len)
    }

    /// Reverse the sequence in place. Returns whether anything moved.
    pub fn reverse(&self) -> Result<bool> {
        let _ = self.seq_len()?;
        let Some(finalizers) = self.run_advice(SeqMethod::Reverse, &SeqIntent::Reverse)? else {
            return Ok(false);
        };
        let moved = self.reorder_impl(|items| {
            items.reverse();
            Ok(())
        })?;
        let outcome = SeqOutcome::Reordered;
        for f in finalizers {
            f(&outcome);
        }
        Ok(moved)
    }

    /// Sort the sequence by `cmp`. Returns whether anything moved.
    pub fn sort_by(
        &self,
        cmp: impl FnMut(&Value, &Value) -> Ordering + 'static,
    ) -> Result<bool> {
        let _ = self.seq_len()?;
        let Some(finalizers) = self.run_advice(SeqMethod::Sort, &SeqIntent::Sort)? else {
            return Ok(false);
        };
        let moved = self.reorder_impl(move |items| {
            items.sort_by(cmp);
            Ok(())
        })?;
        let outcome = SeqOutcome::Reordered;
        for f in finalizers {
            f(&outcome);
        }
        Ok(moved)
    }

    /// Rearrange the sequence with an arbitrary procedure. The procedure
    /// must preserve the element count; if it fails, the previous
    /// arrangement is restored and its error is returned. Returns whether
    /// anything moved.
    pub fn reorder(&self, proc: impl FnOnce(&mut Vec<Value>) -> Result<()>) -> Result<bool> {
        let _ = self.seq_len()?;
        self.reorder_impl(proc)
    }

    // -- internals ----------------------------------------------------------

    /// Run the advisors for `method`. `Ok(None)` means vetoed; `Ok(Some)`
    /// carries the finalizers of advisors that asked for one.
    fn run_advice(&self, method: SeqMethod, intent: &SeqIntent) -> Result<Option<Vec<Finalizer>>> {
        let list = self.inner.advice.borrow().get(&method).cloned();
        let Some(list) = list else {
            return Ok(Some(Vec::new()));
        };
        let snapshot = list.borrow().clone();
        let mut finalizers = Vec::new();
        for handle in snapshot {
            match handle.call(intent) {
                None | Some(Advice::Proceed) => {}
                Some(Advice::ProceedThen(f)) => finalizers.push(f),
                Some(Advice::Veto) => return Ok(None),
                Some(Advice::Fail(e)) => return Err(e),
            }
        }
        Ok(Some(finalizers))
    }

    fn splice_impl(
        &self,
        start: usize,
        delete_count: usize,
        insert: Vec<Plain>,
    ) -> Result<Vec<Plain>> {
        let len = self.seq_len()?;
        let start = start.min(len);
        let delete_count = delete_count.min(len - start);

        let before_items: Vec<Value> = {
            let body = self.inner.body.borrow();
            match &*body {
                Body::Seq { items, .. } => items.clone(),
                Body::Record(_) => return Err(WatchError::NotASequence),
            }
        };
        let removed: Vec<Value> = before_items[start..start + delete_count].to_vec();

        let mut after: Vec<Value> = Vec::with_capacity(len - delete_count + insert.len());
        after.extend_from_slice(&before_items[..start]);
        for p in &insert {
            after.push(wrap_value(p, &self.inner.modes));
        }
        after.extend_from_slice(&before_items[start + delete_count..]);
        let new_len = after.len();

        // Place the new arrangement silently. Moved nodes are retagged in
        // place, unchanged slots skip out on the equality check.
        {
            let _silent = self.inner.modes.enter(Mode::Silent);
            let _reloc = self.inner.modes.enter(Mode::Relocating);
            for (i, v) in after.iter().enumerate() {
                self.write_slot(Key::Index(i), v.clone());
            }
            self.seq_truncate(new_len);
        }

        // Removed nodes never reappear in the new arrangement (a node has
        // one owner, so the sequence holds no duplicates).
        for v in &removed {
            if let Value::Node(n) = v {
                n.set_owner(Owner::None);
            }
        }

        let mut any_changed = new_len != len;
        {
            let _hold = self.inner.modes.enter(Mode::HoldStar);
            for i in start..len.max(new_len) {
                match (before_items.get(i), after.get(i)) {
                    (Some(o), Some(n)) => {
                        if !equality::eql(o, n) {
                            any_changed = true;
                            self.dispatch(o.clone(), vec![Key::Index(i)]);
                        }
                    }
                    (Some(o), None) => {
                        any_changed = true;
                        self.dispatch(o.clone(), vec![Key::Index(i)]);
                    }
                    (None, Some(_)) => {
                        any_changed = true;
                        self.dispatch(Value::null(), vec![Key::Index(i)]);
                    }
                    (None, None) => {}
                }
            }
            if new_len != len {
                self.dispatch(Value::from(len as i64), vec![Key::Length]);
            }
        }
        if any_changed {
            self.dispatch_star(Value::null(), Vec::new());
        }

        Ok(removed.iter().map(Value::to_plain).collect())
    }

    fn reorder_impl(&self, proc: impl FnOnce(&mut Vec<Value>) -> Result<()>) -> Result<bool> {
        // Take the elements out so the caller's procedure can never observe
        // or re-enter a half-borrowed body.
        let mut items = {
            let mut body = self.inner.body.borrow_mut();
            match &mut *body {
                Body::Seq { items, .. } => std::mem::take(items),
                Body::Record(_) => return Err(WatchError::NotASequence),
            }
        };
        let snapshot = items.clone();

        if let Err(e) = proc(&mut items) {
            if items.len() != snapshot.len() {
                tracing::error!(
                    "reorder procedure failed after changing the element count; restoring"
                );
            }
            self.restore_items(snapshot);
            return Err(e);
        }
        if items.len() != snapshot.len() {
            self.restore_items(snapshot);
            return Err(WatchError::mutation("reorder must preserve element count"));
        }
        self.restore_items(items);

        let mut moved = false;
        {
            let _hold = self.inner.modes.enter(Mode::HoldStar);
            for (i, prev) in snapshot.iter().enumerate() {
                let now = self.peek(&Key::Index(i)).unwrap_or_else(Value::null);
                if !Value::same_identity(prev, &now) {
                    moved = true;
                    self.dispatch(prev.clone(), vec![Key::Index(i)]);
                }
            }
        }
        if moved {
            self.dispatch_star(Value::null(), Vec::new());
        }
        Ok(moved)
    }

    /// Put an arrangement back into the body and retag every child node
    /// with its (possibly new) index.
    fn restore_items(&self, items: Vec<Value>) {
        {
            let mut body = self.inner.body.borrow_mut();
            if let Body::Seq { items: slot, old_len } = &mut *body {
                *old_len = items.len();
                *slot = items;
            }
        }
        let body = self.inner.body.borrow();
        if let Body::Seq { items, .. } = &*body {
            for (i, v) in items.iter().enumerate() {
                if let Value::Node(n) = v {
                    n.set_owner(Owner::Parent {
                        node: Rc::downgrade(&self.inner),
                        key: Key::Index(i),
                    });
                }
            }
        }
    }

    fn seq_truncate(&self, new_len: usize) {
        let mut body = self.inner.body.borrow_mut();
        if let Body::Seq { items, old_len } = &mut *body {
            items.truncate(new_len);
            *old_len = items.len();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
