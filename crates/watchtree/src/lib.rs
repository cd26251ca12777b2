#![forbid(unsafe_code)]

//! watchtree: a watchable object-graph library.
//!
//! Wrap a plain tree of records and sequences with [`to_watchable`] and every
//! container becomes a [`Node`] you can mutate and watch. Changes notify
//! exact-key watchers, wildcard watchers, and bubble up the ownership chain
//! with an accumulating path, so a watcher near the root can observe (and
//! address) a mutation deep in the tree. [`from_watchable`] returns the plain
//! tree with no bookkeeping residue.
//!
//! ```
//! use watchtree::{from_watchable, plain, to_watchable};
//!
//! let tree = to_watchable(plain!({ "a": { "b": 1 } }))?;
//! tree.get_node("a").unwrap().set("b", 5)?;
//! assert_eq!(from_watchable(&tree), plain!({ "a": { "b": 5 } }));
//! # Ok::<(), watchtree::WatchError>(())
//! ```
//!
//! Beyond single-slot writes, the crate provides:
//!
//! - batch sequence mutators ([`Node::splice`], [`Node::reverse`], ...) that
//!   relocate elements without destroying their identity and emit one
//!   wildcard notification per batch, guarded by an advice hook
//!   ([`Node::before`]);
//! - a pluggable [`equality`] registry deciding which writes count as
//!   changes;
//! - [`WatchHub`], a standalone watchable property bag with a split
//!   mutate/notify cycle;
//! - [`WatchableRef`], a stable formattable view over one location;
//! - [`ExtensionRegistry`], named extension points with aliasing.
//!
//! The crate is single-threaded by design: nodes, hubs, and handles are
//! `Rc`-based and meant to live on one thread, the usual shape for a UI or
//! scripting object model.

pub mod equality;
pub mod error;
pub mod extensions;
pub mod handle;
pub mod hub;
mod modes;
pub mod node;
pub mod sequence;
pub mod value;
pub mod watchable_ref;

pub use error::{Result, WatchError};
pub use extensions::ExtensionRegistry;
pub use handle::{Handle, HandleList, destroy_all, handle_list};
pub use hub::{Applied, MutateOutcome, WatchHub};
pub use node::{Change, Node, Source, from_watchable, to_watchable};
pub use sequence::{Advice, Finalizer, SeqIntent, SeqMethod, SeqOutcome};
pub use value::{Key, Path, Plain, Scalar, ScalarKind, Value};
pub use watchable_ref::{WatchableRef, get_watchable_ref};
