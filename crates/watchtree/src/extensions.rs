#![forbid(unsafe_code)]

//! Named extension points with aliasing and replacement.
//!
//! An [`ExtensionRegistry`] maps names to shared extension values (usually
//! closures or trait objects chosen by the embedding application). Aliases
//! share the target's entry at registration time, so replacing a name later
//! does not retroactively change what its aliases resolve to.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::{Result, WatchError};

/// A name-indexed registry of shared extension values.
pub struct ExtensionRegistry<F: ?Sized> {
    entries: RefCell<AHashMap<String, Rc<F>>>,
}

impl<F: ?Sized> Default for ExtensionRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> std::fmt::Debug for ExtensionRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl<F: ?Sized> ExtensionRegistry<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(AHashMap::new()),
        }
    }

    /// Register a new extension. Registering an existing name is an error;
    /// use [`ExtensionRegistry::replace`] to swap one deliberately.
    pub fn register(&self, name: impl Into<String>, ext: Rc<F>) -> Result<()> {
        let name = name.into();
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&name) {
            return Err(WatchError::DuplicateExtension { name });
        }
        entries.insert(name, ext);
        Ok(())
    }

    /// Make `alias` resolve to what `target` resolves to right now.
    pub fn alias(&self, alias: impl Into<String>, target: &str) -> Result<()> {
        let alias = alias.into();
        let mut entries = self.entries.borrow_mut();
        let Some(ext) = entries.get(target).cloned() else {
            return Err(WatchError::UnknownExtension {
                name: target.to_string(),
            });
        };
        if entries.contains_key(&alias) {
            return Err(WatchError::DuplicateExtension { name: alias });
        }
        entries.insert(alias, ext);
        Ok(())
    }

    /// Swap the extension under an existing name, returning the displaced
    /// one. Replacing an unknown name is an error.
    pub fn replace(&self, name: &str, ext: Rc<F>) -> Result<Rc<F>> {
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(name) {
            Some(slot) => Ok(std::mem::replace(slot, ext)),
            None => Err(WatchError::UnknownExtension {
                name: name.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Rc<F>> {
        self.entries.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Greeter = dyn Fn(&str) -> String;

    fn greeter(prefix: &'static str) -> Rc<Greeter> {
        Rc::new(move |name| format!("{prefix} {name}"))
    }

    #[test]
    fn register_and_lookup() {
        let reg: ExtensionRegistry<Greeter> = ExtensionRegistry::new();
        reg.register("hello", greeter("hello")).unwrap();
        let f = reg.lookup("hello").unwrap();
        assert_eq!(f("world"), "hello world");
        assert!(reg.lookup("missing").is_none());
        assert_eq!(reg.names(), vec!["hello".to_string()]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg: ExtensionRegistry<Greeter> = ExtensionRegistry::new();
        reg.register("hello", greeter("hello")).unwrap();
        assert!(matches!(
            reg.register("hello", greeter("hi")),
            Err(WatchError::DuplicateExtension { .. })
        ));
    }

    #[test]
    fn alias_shares_current_target() {
        let reg: ExtensionRegistry<Greeter> = ExtensionRegistry::new();
        reg.register("hello", greeter("hello")).unwrap();
        reg.alias("hi", "hello").unwrap();
        assert_eq!(reg.lookup("hi").unwrap()("there"), "hello there");

        // Replacing the target does not drag the alias along.
        let displaced = reg.replace("hello", greeter("howdy")).unwrap();
        assert_eq!(displaced("x"), "hello x");
        assert_eq!(reg.lookup("hello").unwrap()("y"), "howdy y");
        assert_eq!(reg.lookup("hi").unwrap()("z"), "hello z");
    }

    #[test]
    fn alias_of_unknown_target_is_rejected() {
        let reg: ExtensionRegistry<Greeter> = ExtensionRegistry::new();
        assert!(matches!(
            reg.alias("hi", "hello"),
            Err(WatchError::UnknownExtension { .. })
        ));
    }

    #[test]
    fn replace_unknown_is_rejected() {
        let reg: ExtensionRegistry<Greeter> = ExtensionRegistry::new();
        assert!(matches!(
            reg.replace("hello", greeter("hi")),
            Err(WatchError::UnknownExtension { .. })
        ));
    }
}
