//! String interning.
//!
//! Every name the front-end touches (identifiers, macro names, literal text)
//! is registered once in a [`SymbolTable`] and referred to by [`SymbolId`]
//! afterwards. Ids are cheap to copy, stable for the lifetime of the table,
//! and safe to register from any worker thread.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

/// Opaque handle to an interned string.
///
/// Id `0` is the distinguished bad/empty sentinel shared by all tables.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub const BAD: Self = Self(0);

    pub fn is_bad(self) -> bool {
        self == Self::BAD
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Interner {
    strings: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, u32>,
}

/// A thread-safe append-only string interner.
///
/// `register` is safe from any thread and returns a stable id; the table is
/// never garbage collected during a session.
#[derive(Debug)]
pub struct SymbolTable {
    inner: RwLock<Interner>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut interner = Interner::default();
        // slot 0 is the bad symbol
        let empty: Arc<str> = Arc::from("");
        interner.ids.insert(empty.clone(), 0);
        interner.strings.push(empty);
        Self { inner: RwLock::new(interner) }
    }

    /// Interns `symbol`, returning the existing id if it was seen before.
    pub fn register(&self, symbol: &str) -> SymbolId {
        if symbol.is_empty() {
            return SymbolId::BAD;
        }
        {
            let inner = self.inner.read().unwrap();
            if let Some(&id) = inner.ids.get(symbol) {
                return SymbolId(id);
            }
        }
        let mut inner = self.inner.write().unwrap();
        // racing registrations of the same string must agree on the id
        if let Some(&id) = inner.ids.get(symbol) {
            return SymbolId(id);
        }
        let id = inner.strings.len() as u32;
        let arc: Arc<str> = Arc::from(symbol);
        inner.ids.insert(arc.clone(), id);
        inner.strings.push(arc);
        SymbolId(id)
    }

    /// Looks up an already interned symbol without registering it.
    pub fn get(&self, symbol: &str) -> Option<SymbolId> {
        self.inner.read().unwrap().ids.get(symbol).map(|&id| SymbolId(id))
    }

    /// Returns the string for `id`; the bad id resolves to the empty string.
    pub fn text(&self, id: SymbolId) -> Arc<str> {
        let inner = self.inner.read().unwrap();
        inner.strings.get(id.index()).cloned().unwrap_or_else(|| inner.strings[0].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let table = SymbolTable::new();
        let a = table.register("clk");
        let b = table.register("rst_n");
        let a2 = table.register("clk");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(&*table.text(a), "clk");
        assert_eq!(&*table.text(b), "rst_n");
    }

    #[test]
    fn empty_is_bad() {
        let table = SymbolTable::new();
        assert_eq!(table.register(""), SymbolId::BAD);
        assert_eq!(&*table.text(SymbolId::BAD), "");
    }

    #[test]
    fn concurrent_registration_agrees() {
        let table = std::sync::Arc::new(SymbolTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..100).map(|i| table.register(&format!("sym{i}"))).collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<SymbolId>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
    }
}
