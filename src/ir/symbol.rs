// Tensor Symbols
//
// Tensor names are interned once per graph definition; every pass works on
// dense integer ids and only goes back to strings at the workspace boundary.

use rustc_hash::FxHashMap;
use std::fmt;

/// Interned tensor identifier, dense within one symbol table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u32);

impl TensorId {
    /// Position of this id in its symbol table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Bidirectional name <-> id table
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: FxHashMap<String, TensorId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the existing id if already present
    pub fn intern(&mut self, name: &str) -> TensorId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = TensorId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Look up a name without interning it
    pub fn get(&self, name: &str) -> Option<TensorId> {
        self.ids.get(name).copied()
    }

    /// Name of an interned id
    pub fn name(&self, id: TensorId) -> &str {
        &self.names[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All interned ids in interning order
    pub fn ids(&self) -> impl Iterator<Item = TensorId> + '_ {
        (0..self.names.len() as u32).map(TensorId)
    }
}
