//! Interning of the strings carried by [`Value::Symbol`](crate::Value).

use crate::util::IndexSet;

/// A bidirectional mapping between strings and small integers.
///
/// Hosts that already intern their strings can install their own table with
/// [`Engine::set_symbol_table`](crate::Engine::set_symbol_table) so that
/// symbol ids are shared between the host and the engine.
pub trait SymbolTable {
    /// Returns the id of `s`, allocating one if needed. Repeated calls with
    /// equal strings return the same id.
    fn intern(&mut self, s: &str) -> u32;

    /// Returns the string behind `id`, if it was handed out by this table.
    fn resolve(&self, id: u32) -> Option<&str>;
}

/// The engine's default [`SymbolTable`], backed by an insertion-ordered set.
#[derive(Debug, Clone, Default)]
pub struct Interner {
    strings: IndexSet<Box<str>>,
}

impl Interner {
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the id of `s` without interning it.
    pub fn get(&self, s: &str) -> Option<u32> {
        self.strings.get_index_of(s).map(|i| i as u32)
    }
}

impl SymbolTable for Interner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.get_index_of(s) {
            return i as u32;
        }
        let (i, _) = self.strings.insert_full(s.into());
        i as u32
    }

    fn resolve(&self, id: u32) -> Option<&str> {
        self.strings.get_index(id as usize).map(|s| &**s)
    }
}
