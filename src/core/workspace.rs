// Workspace: tensor existence and alias registration
//
// The optimizer never owns tensor storage. It asks a workspace which tensors
// are already materialized and registers the aliases it wants to apply; a
// refused alias means the rename must not be applied.

use rustc_hash::{FxHashMap, FxHashSet};

/// Lightweight reference to a workspace tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorHandle {
    name: String,
}

impl TensorHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Canonical name, after alias resolution
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Tensor registry consulted by the optimizer passes
///
/// Calls must be synchronous and idempotent: registering the same alias twice
/// succeeds twice.
pub trait Workspace {
    /// True if `name` is a tensor or a registered alias
    fn has_tensor(&self, name: &str) -> bool;

    /// Resolve `name` (following aliases) to a tensor
    fn get_tensor(&self, name: &str) -> Option<TensorHandle>;

    /// Create the tensor if missing and return it
    fn create_tensor(&mut self, name: &str) -> TensorHandle;

    /// Make `alias` refer to `target`; false if the alias cannot be established
    fn set_tensor_alias(&mut self, target: &str, alias: &str) -> bool;

    /// Names of all materialized tensors, sorted
    fn tensor_names(&self) -> Vec<String>;

    /// Canonical name of `name`, or `name` itself if unknown
    fn tensor_name(&self, name: &str) -> String {
        self.get_tensor(name)
            .map(|handle| handle.name().to_string())
            .unwrap_or_else(|| name.to_string())
    }
}

/// In-memory workspace
#[derive(Debug, Clone, Default)]
pub struct LocalWorkspace {
    tensors: FxHashSet<String>,
    aliases: FxHashMap<String, String>,
}

impl LocalWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an externally fed tensor
    pub fn feed(&mut self, name: &str) -> TensorHandle {
        self.create_tensor(name)
    }

    /// Target of a registered alias
    pub fn alias_of(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn num_aliases(&self) -> usize {
        self.aliases.len()
    }

    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        // Alias chains are bounded by the number of registered aliases
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }
}

impl Workspace for LocalWorkspace {
    fn has_tensor(&self, name: &str) -> bool {
        self.tensors.contains(name) || self.aliases.contains_key(name)
    }

    fn get_tensor(&self, name: &str) -> Option<TensorHandle> {
        if !self.has_tensor(name) {
            return None;
        }
        Some(TensorHandle::new(self.resolve(name)))
    }

    fn create_tensor(&mut self, name: &str) -> TensorHandle {
        if let Some(handle) = self.get_tensor(name) {
            return handle;
        }
        self.tensors.insert(name.to_string());
        TensorHandle::new(name)
    }

    fn set_tensor_alias(&mut self, target: &str, alias: &str) -> bool {
        if target == alias || self.tensors.contains(alias) {
            return false;
        }
        if let Some(existing) = self.aliases.get(alias) {
            return existing == target;
        }
        // Refuse cycles: the target must not resolve back to the alias
        if self.resolve(target) == alias {
            return false;
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        true
    }

    fn tensor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.iter().cloned().collect();
        names.sort();
        names
    }
}
