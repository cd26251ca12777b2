#![forbid(unsafe_code)]

//! Pluggable equality used to decide whether a proposed write is a change.
//!
//! Comparators are registered per [`ScalarKind`] at startup — a type-indexed
//! strategy map rather than anything reflective. The graph consults
//! [`eql`] before every write and every hub mutation: values equal under the
//! registered comparator produce zero notifications.
//!
//! The registry is thread-local, matching the crate's single-threaded
//! cooperative model.
//!
//! # Semantics
//!
//! - `Null` compares equal only to `Null`.
//! - Scalars use the comparator registered for the left-hand kind, falling
//!   back to the right-hand kind, falling back to `PartialEq`.
//! - Nodes compare by identity; a node never equals a scalar.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::node::Node;
use crate::value::{Scalar, ScalarKind, Value};

type Comparator = Rc<dyn Fn(&Scalar, &Scalar) -> bool>;

thread_local! {
    static COMPARATORS: RefCell<AHashMap<ScalarKind, Comparator>> =
        RefCell::new(AHashMap::new());
}

/// Install a comparator for one scalar kind, replacing any previous one.
pub fn register(kind: ScalarKind, cmp: impl Fn(&Scalar, &Scalar) -> bool + 'static) {
    COMPARATORS.with(|c| {
        c.borrow_mut().insert(kind, Rc::new(cmp));
    });
}

/// Drop every registered comparator. Intended for test hygiene.
pub fn reset() {
    COMPARATORS.with(|c| c.borrow_mut().clear());
}

/// Registered-equality comparison between two slot values.
#[must_use]
pub fn eql(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Scalar(Scalar::Null), Value::Scalar(y)) => y.is_null(),
        (Value::Scalar(x), Value::Scalar(y)) => {
            let cmp = COMPARATORS.with(|c| {
                let c = c.borrow();
                c.get(&x.kind()).or_else(|| c.get(&y.kind())).cloned()
            });
            match cmp {
                Some(cmp) => cmp(x, y),
                None => x == y,
            }
        }
        (Value::Node(x), Value::Node(y)) => Node::ptr_eq(x, y),
        _ => false,
    }
}
