#![forbid(unsafe_code)]

//! Scoped dispatch modes shared by every node of one tree.
//!
//! Four flags gate the mutation path: `Pause` (suppress all notification,
//! used while a tree is being built), `HoldStar` (suppress wildcard
//! notification so batch mutators can emit exactly one at the end), `Silent`
//! (perform writes without any dispatch), and `Relocating` (a write is moving
//! an already-wrapped node, so the write path must not re-wrap it).
//!
//! Flags are never set bare: [`Modes::enter`] returns a guard that restores
//! the previous state on drop, so a flag cannot be left stuck on even when
//! the guarded operation fails.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Pause,
    HoldStar,
    Silent,
    Relocating,
}

#[derive(Debug, Default)]
pub(crate) struct Modes {
    pause: Cell<bool>,
    hold_star: Cell<bool>,
    silent: Cell<bool>,
    relocating: Cell<bool>,
}

impl Modes {
    fn cell(&self, mode: Mode) -> &Cell<bool> {
        match mode {
            Mode::Pause => &self.pause,
            Mode::HoldStar => &self.hold_star,
            Mode::Silent => &self.silent,
            Mode::Relocating => &self.relocating,
        }
    }

    pub(crate) fn get(&self, mode: Mode) -> bool {
        self.cell(mode).get()
    }

    /// Set `mode` for the lifetime of the returned guard.
    pub(crate) fn enter(self: &Rc<Self>, mode: Mode) -> ModeGuard {
        let prev = self.cell(mode).replace(true);
        ModeGuard {
            modes: Rc::clone(self),
            mode,
            prev,
        }
    }
}

pub(crate) struct ModeGuard {
    modes: Rc<Modes>,
    mode: Mode,
    prev: bool,
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        self.modes.cell(self.mode).set(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_on_drop() {
        let modes = Rc::new(Modes::default());
        assert!(!modes.get(Mode::Silent));
        {
            let _g = modes.enter(Mode::Silent);
            assert!(modes.get(Mode::Silent));
        }
        assert!(!modes.get(Mode::Silent));
    }

    #[test]
    fn nested_guards_restore_in_order() {
        let modes = Rc::new(Modes::default());
        let outer = modes.enter(Mode::HoldStar);
        {
            let _inner = modes.enter(Mode::HoldStar);
            assert!(modes.get(Mode::HoldStar));
        }
        // Inner guard restores to "already on", not "off".
        assert!(modes.get(Mode::HoldStar));
        drop(outer);
        assert!(!modes.get(Mode::HoldStar));
    }

    #[test]
    fn flags_are_independent() {
        let modes = Rc::new(Modes::default());
        let _g = modes.enter(Mode::Pause);
        assert!(modes.get(Mode::Pause));
        assert!(!modes.get(Mode::HoldStar));
        assert!(!modes.get(Mode::Silent));
        assert!(!modes.get(Mode::Relocating));
    }
}
