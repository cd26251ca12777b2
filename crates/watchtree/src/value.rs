#![forbid(unsafe_code)]

//! Plain and wrapped value representations.
//!
//! Three layers of data live in this crate:
//!
//! - [`Plain`]: an ordinary tree of scalars, records, and sequences. This is
//!   what callers hand to [`to_watchable`](crate::to_watchable) and what
//!   [`from_watchable`](crate::from_watchable) gives back, with zero
//!   bookkeeping residue.
//! - [`Value`]: what actually sits in a wrapped container slot — either a
//!   scalar (stored inline) or a child [`Node`](crate::Node).
//! - [`Key`] / [`Path`]: the address of a slot within a node, and the route
//!   accumulated while a change bubbles toward the root.
//!
//! # Invariants
//!
//! 1. `Plain` round-trips: wrapping then unwrapping any plain tree yields a
//!    deep-equal tree.
//! 2. `Value::Node` slots compare by identity; two structurally equal nodes
//!    are still distinct values.

use std::collections::BTreeMap;

use crate::node::Node;

// ---------------------------------------------------------------------------
// Scalar
// ---------------------------------------------------------------------------

/// A leaf value. Scalars are stored inline in container slots and are never
/// wrapped or watchable on their own.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Type tag for [`Scalar`], used to index the equality registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
}

impl Scalar {
    #[must_use]
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Null => ScalarKind::Null,
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Float(_) => ScalarKind::Float,
            Self::Str(_) => ScalarKind::Str,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

// ---------------------------------------------------------------------------
// Plain
// ---------------------------------------------------------------------------

/// An unwrapped data tree: what goes into and comes out of the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Plain {
    Scalar(Scalar),
    Record(BTreeMap<String, Plain>),
    Seq(Vec<Plain>),
}

impl Plain {
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// An empty record.
    #[must_use]
    pub fn record() -> Self {
        Self::Record(BTreeMap::new())
    }

    /// An empty sequence.
    #[must_use]
    pub fn seq() -> Self {
        Self::Seq(Vec::new())
    }
}

impl From<Scalar> for Plain {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<bool> for Plain {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i32> for Plain {
    fn from(v: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<i64> for Plain {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Plain {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for Plain {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Plain {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Str(v))
    }
}

impl From<Vec<Plain>> for Plain {
    fn from(v: Vec<Plain>) -> Self {
        Self::Seq(v)
    }
}

impl From<BTreeMap<String, Plain>> for Plain {
    fn from(v: BTreeMap<String, Plain>) -> Self {
        Self::Record(v)
    }
}

/// JSON-ish literal syntax for [`Plain`] trees.
///
/// ```
/// use watchtree::plain;
///
/// let tree = plain!({
///     "title": "inbox",
///     "open": true,
///     "items": [1, 2, 3],
/// });
/// assert!(!tree.is_scalar());
/// ```
#[macro_export]
macro_rules! plain {
    (null) => {
        $crate::Plain::Scalar($crate::Scalar::Null)
    };
    ([ $( $elem:tt ),* $(,)? ]) => {
        $crate::Plain::Seq(vec![ $( $crate::plain!($elem) ),* ])
    };
    ({ $( $key:literal : $val:tt ),* $(,)? }) => {
        $crate::Plain::Record(::std::collections::BTreeMap::from([
            $( ($key.to_string(), $crate::plain!($val)) ),*
        ]))
    };
    ($other:expr) => {
        $crate::Plain::from($other)
    };
}

// ---------------------------------------------------------------------------
// Key / Path
// ---------------------------------------------------------------------------

/// Address of one slot within a node. `Length` is the sequence length
/// pseudo-property; watching it observes structural growth and shrinkage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Prop(String),
    Index(usize),
    Length,
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::Prop(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Self::Prop(v)
    }
}

impl From<usize> for Key {
    fn from(v: usize) -> Self {
        Self::Index(v)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prop(p) => write!(f, "{p}"),
            Self::Index(i) => write!(f, "{i}"),
            Self::Length => write!(f, "length"),
        }
    }
}

/// Route from the notifying node down to the mutated slot. Grows at the
/// front as a change bubbles through the owner chain.
pub type Path = Vec<Key>;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Contents of a wrapped container slot.
#[derive(Clone)]
pub enum Value {
    Scalar(Scalar),
    Node(Node),
}

impl Value {
    /// Null scalar, the stand-in for absent slots and untracked old values.
    #[must_use]
    pub fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Node(_) => None,
        }
    }

    /// Strip bookkeeping, yielding a plain tree (scalars pass through).
    #[must_use]
    pub fn to_plain(&self) -> Plain {
        match self {
            Self::Scalar(s) => Plain::Scalar(s.clone()),
            Self::Node(n) => n.to_plain(),
        }
    }

    /// Slot-occupant identity: node pointer equality, scalar value equality.
    /// This is the "did this element move" test used by the batch mutators,
    /// deliberately independent of the pluggable equality registry.
    #[must_use]
    pub fn same_identity(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Scalar(x), Value::Scalar(y)) => x == y,
            (Value::Node(x), Value::Node(y)) => Node::ptr_eq(x, y),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::same_identity(self, other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s:?}"),
            Self::Node(n) => write!(f, "{n:?}"),
        }
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<Node> for Value {
    fn from(v: Node) -> Self {
        Self::Node(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Str(v))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_kind_tags() {
        assert_eq!(Scalar::Null.kind(), ScalarKind::Null);
        assert_eq!(Scalar::Bool(true).kind(), ScalarKind::Bool);
        assert_eq!(Scalar::Int(1).kind(), ScalarKind::Int);
        assert_eq!(Scalar::Float(1.5).kind(), ScalarKind::Float);
        assert_eq!(Scalar::Str("x".into()).kind(), ScalarKind::Str);
    }

    #[test]
    fn plain_macro_shapes() {
        let p = plain!({
            "a": 1,
            "b": [true, null, "s"],
            "c": { "nested": 2 },
        });
        let Plain::Record(map) = p else {
            panic!("expected record")
        };
        assert_eq!(map.len(), 3);
        assert_eq!(map["a"], Plain::Scalar(Scalar::Int(1)));
        let Plain::Seq(items) = &map["b"] else {
            panic!("expected seq")
        };
        assert_eq!(items[1], Plain::Scalar(Scalar::Null));
        assert!(matches!(&map["c"], Plain::Record(_)));
    }

    #[test]
    fn plain_macro_empty_shapes() {
        assert_eq!(plain!({}), Plain::record());
        assert_eq!(plain!([]), Plain::seq());
        assert_eq!(plain!(null), Plain::Scalar(Scalar::Null));
    }

    #[test]
    fn plain_from_primitives() {
        assert_eq!(Plain::from(3), Plain::Scalar(Scalar::Int(3)));
        assert_eq!(Plain::from("hi"), Plain::Scalar(Scalar::Str("hi".into())));
        assert_eq!(Plain::from(false), Plain::Scalar(Scalar::Bool(false)));
    }

    #[test]
    fn key_conversions() {
        assert_eq!(Key::from("name"), Key::Prop("name".into()));
        assert_eq!(Key::from(3usize), Key::Index(3));
        assert_eq!(Key::Length.to_string(), "length");
    }

    #[test]
    fn value_identity_for_scalars() {
        let a = Value::from(1);
        let b = Value::from(1);
        assert!(Value::same_identity(&a, &b));
        assert!(!Value::same_identity(&a, &Value::from(2)));
        assert!(!Value::same_identity(&a, &Value::null()));
    }

    #[test]
    fn null_value_helper() {
        assert_eq!(Value::null().as_scalar(), Some(&Scalar::Null));
    }
}
