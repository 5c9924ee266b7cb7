//! Lexical scopes and closure capture.
//!
//! A function literal captures every name bound around it when it is
//! compiled, not only the names it mentions: first the enclosing function's
//! own captures, then the enclosing scopes from outermost to innermost. A
//! name shadowed in an inner scope keeps its first position but takes its
//! value from the inner binding.

use indexmap::IndexMap;

use crate::lir::Slot;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Local {
    pub slot: Slot,
    /// `false` while the initializer of its `let` is being compiled.
    pub bound: bool,
}

#[derive(Default, Debug)]
pub struct Scope {
    names: IndexMap<String, Local>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, slot: Slot, bound: bool) {
        self.names.insert(name.to_owned(), Local { slot, bound });
    }

    pub fn get(&self, name: &str) -> Option<Local> {
        self.names.get(name).copied()
    }

    pub fn bind(&mut self, name: &str) {
        if let Some(local) = self.names.get_mut(name) {
            local.bound = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Local)> {
        self.names.iter().map(|(name, local)| (name.as_str(), *local))
    }
}

/// Where a closure's environment slot gets its value at construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Capture {
    Local(Slot),
    /// Slot `n` of the enclosing closure's own environment.
    Outer(u32),
    /// The closure being built; its `let` is still unbound.
    Itself,
}

/// The capture set of a function literal compiled inside a function with
/// `captures` and lexical `scopes`, in environment order.
pub fn capture_set(captures: &[String], scopes: &[Scope]) -> IndexMap<String, Capture> {
    let mut set = IndexMap::new();
    for (index, name) in captures.iter().enumerate() {
        set.insert(name.clone(), Capture::Outer(index as u32));
    }
    for scope in scopes {
        for (name, local) in scope.iter() {
            let capture = if local.bound {
                Capture::Local(local.slot)
            } else {
                Capture::Itself
            };
            set.insert(name.to_owned(), capture);
        }
    }
    log::trace!(target: "rain::closure", "capture set {:?}", set.keys().collect::<Vec<_>>());
    set
}
